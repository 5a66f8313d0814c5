//! Link Backends
//!
//! The client never talks to a network. The one thing that would differ
//! between a simulated and a real link, the connect handshake, sits behind
//! the [`LinkBackend`] trait so tests can inject failures.

use pulsewire_core::{saturating_millis, ClientError, ClientResult};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

// ----------------------------------------------------------------------------
// Link Backend Trait
// ----------------------------------------------------------------------------

/// Performs the connect handshake for a channel client
///
/// Implementations must return promptly once `cancel` fires, yielding
/// [`ClientError::ConnectionAborted`].
#[async_trait::async_trait]
pub trait LinkBackend: Send + Sync {
    /// Short name used in logs and handshake errors
    fn name(&self) -> &'static str;

    /// Run the handshake to completion
    async fn handshake(&self, cancel: &CancellationToken) -> ClientResult<()>;
}

// ----------------------------------------------------------------------------
// Simulated Link
// ----------------------------------------------------------------------------

/// Backend that waits a fixed delay and always succeeds
#[derive(Debug, Clone)]
pub struct SimulatedLink {
    handshake_delay: Duration,
}

impl SimulatedLink {
    pub fn new(handshake_delay: Duration) -> Self {
        Self { handshake_delay }
    }
}

impl Default for SimulatedLink {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

#[async_trait::async_trait]
impl LinkBackend for SimulatedLink {
    fn name(&self) -> &'static str {
        "simulated"
    }

    async fn handshake(&self, cancel: &CancellationToken) -> ClientResult<()> {
        debug!(
            delay_ms = saturating_millis(self.handshake_delay),
            "Simulated handshake started"
        );

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ClientError::ConnectionAborted),
            _ = tokio::time::sleep(self.handshake_delay) => Ok(()),
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
