//! Client Builder API
//!
//! Builder-style construction for consumers (demos, tests, embedding
//! applications) that want to swap the link backend, the clock or the
//! publish mode without touching the client internals.

use crate::backend::{LinkBackend, SimulatedLink};
use crate::client::ChannelClient;
use pulsewire_core::{
    ClientConfig, ClientResult, MonotonicTimeSource, PublishMode, SimulationTiming, TimeSource,
};
use std::sync::Arc;
use tracing::info;

// ----------------------------------------------------------------------------
// Client Builder
// ----------------------------------------------------------------------------

/// Builder for [`ChannelClient`]
#[derive(Default)]
pub struct ChannelClientBuilder {
    config: ClientConfig,
    backend: Option<Arc<dyn LinkBackend>>,
    time_source: Option<Arc<dyn TimeSource>>,
}

impl ChannelClientBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole configuration
    pub fn with_config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_timing(mut self, timing: SimulationTiming) -> Self {
        self.config.timing = timing;
        self
    }

    pub fn with_publish_mode(mut self, mode: PublishMode) -> Self {
        self.config.publish_mode = mode;
        self
    }

    pub fn with_rng_seed(mut self, seed: u64) -> Self {
        self.config.rng_seed = Some(seed);
        self
    }

    /// Use a custom link backend instead of [`SimulatedLink`]
    pub fn with_backend<B: LinkBackend + 'static>(mut self, backend: B) -> Self {
        self.backend = Some(Arc::new(backend));
        self
    }

    /// Stamp messages and audit entries with a custom clock. The client
    /// wraps it so timestamps never go backwards.
    pub fn with_time_source(mut self, time_source: Arc<dyn TimeSource>) -> Self {
        self.time_source = Some(time_source);
        self
    }

    /// Validate the configuration and build the client
    pub fn build(self) -> ClientResult<ChannelClient> {
        self.config.validate()?;

        let backend = self.backend.unwrap_or_else(|| {
            Arc::new(SimulatedLink::new(self.config.timing.handshake_delay))
        });
        let clock = match self.time_source {
            Some(source) => MonotonicTimeSource::from_shared(source),
            None => MonotonicTimeSource::system(),
        };

        info!(
            backend = backend.name(),
            publish_mode = ?self.config.publish_mode,
            seeded = self.config.rng_seed.is_some(),
            "Building channel client"
        );

        Ok(ChannelClient::from_parts(self.config, backend, clock))
    }
}

impl ChannelClient {
    pub fn builder() -> ChannelClientBuilder {
        ChannelClientBuilder::new()
    }

    /// Build a client with the given configuration and the simulated backend
    pub fn new(config: ClientConfig) -> ClientResult<Self> {
        ChannelClientBuilder::new().with_config(config).build()
    }
}

// ----------------------------------------------------------------------------
// Convenience Functions
// ----------------------------------------------------------------------------

/// Client with millisecond timings, broadcast delivery and a fixed seed
pub fn create_test_client() -> ClientResult<ChannelClient> {
    ChannelClientBuilder::new()
        .with_config(ClientConfig::testing())
        .build()
}

/// Client with short delays for interactive demos
pub fn create_demo_client() -> ClientResult<ChannelClient> {
    ChannelClientBuilder::new()
        .with_config(ClientConfig::low_latency())
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulsewire_core::{ClientError, ConfigError, ConnectionStatus};
    use std::time::Duration;

    #[test]
    fn test_builder_defaults() {
        let client = ChannelClient::builder().build().unwrap();

        assert_eq!(client.status(), ConnectionStatus::Disconnected);
        assert_eq!(client.backend_name(), "simulated");
        assert_eq!(client.config().publish_mode, PublishMode::LatestValue);
    }

    #[test]
    fn test_builder_rejects_invalid_config() {
        let mut timing = SimulationTiming::testing();
        timing.feed_interval_max = Duration::ZERO;

        let result = ChannelClient::builder().with_timing(timing).build();
        assert!(matches!(
            result,
            Err(ClientError::Configuration(ConfigError::ZeroDuration { .. }))
        ));
    }

    #[test]
    fn test_builder_overrides() {
        let client = ChannelClient::builder()
            .with_publish_mode(PublishMode::Broadcast { capacity: 16 })
            .with_rng_seed(42)
            .build()
            .unwrap();

        assert_eq!(
            client.config().publish_mode,
            PublishMode::Broadcast { capacity: 16 }
        );
        assert_eq!(client.config().rng_seed, Some(42));
    }

    #[tokio::test(start_paused = true)]
    async fn test_convenience_functions() {
        let test_client = create_test_client().unwrap();
        test_client.connect().await.unwrap();
        assert!(test_client.is_connected());
        test_client.close().await;

        let demo_client = create_demo_client().unwrap();
        assert_eq!(
            demo_client.config().timing,
            SimulationTiming::low_latency()
        );
    }
}
