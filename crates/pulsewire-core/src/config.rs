//! Client Configuration
//!
//! Groups the simulated timings, the publish mode, the notification rotation
//! and the RNG seed. The defaults are the fixed delays of the simulated
//! server. The presets exist so test harnesses and demos don't have to sit
//! through thirty-second heartbeats.

use crate::bus::PublishMode;
use crate::errors::ConfigError;
use crate::types::saturating_millis;
use core::time::Duration;
use serde::{Deserialize, Serialize};

/// Canned payloads cycled through by the event feed
pub const DEFAULT_NOTIFICATION_ROTATION: [&str; 4] = [
    "New user joined the channel",
    "Server maintenance scheduled in 1 hour",
    "You have a new direct message",
    "Channel topic was updated",
];

// ----------------------------------------------------------------------------
// Simulation Timing
// ----------------------------------------------------------------------------

/// Delays used to simulate a remote server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulationTiming {
    /// Duration of the simulated connect handshake
    pub handshake_delay: Duration,
    /// Delay before the echo of a sent message
    pub echo_latency: Duration,
    /// Further delay between the echo and the generated response
    pub response_latency: Duration,
    /// Interval between heartbeats (also the delay before the first one)
    pub heartbeat_interval: Duration,
    /// Delay before the first notification
    pub feed_initial_delay: Duration,
    /// Lower bound of the randomized notification interval
    pub feed_interval_min: Duration,
    /// Upper bound of the randomized notification interval
    pub feed_interval_max: Duration,
    /// Lower bound of the synthetic ping latency, in milliseconds
    pub ping_latency_min_ms: u64,
    /// Upper bound of the synthetic ping latency, in milliseconds
    pub ping_latency_max_ms: u64,
    /// How long disconnect waits for cancelled tasks before aborting them
    pub task_shutdown_grace: Duration,
}

impl Default for SimulationTiming {
    fn default() -> Self {
        Self {
            handshake_delay: Duration::from_secs(1),
            echo_latency: Duration::from_millis(100),
            response_latency: Duration::from_millis(500),
            heartbeat_interval: Duration::from_secs(30),
            feed_initial_delay: Duration::from_secs(5),
            feed_interval_min: Duration::from_secs(10),
            feed_interval_max: Duration::from_secs(30),
            ping_latency_min_ms: 10,
            ping_latency_max_ms: 100,
            task_shutdown_grace: Duration::from_secs(1),
        }
    }
}

impl SimulationTiming {
    /// Short delays for interactive demos
    pub fn low_latency() -> Self {
        Self {
            handshake_delay: Duration::from_millis(200),
            echo_latency: Duration::from_millis(20),
            response_latency: Duration::from_millis(80),
            heartbeat_interval: Duration::from_secs(5),
            feed_initial_delay: Duration::from_secs(1),
            feed_interval_min: Duration::from_secs(2),
            feed_interval_max: Duration::from_secs(5),
            ping_latency_min_ms: 1,
            ping_latency_max_ms: 20,
            task_shutdown_grace: Duration::from_millis(250),
        }
    }

    /// Millisecond-scale delays for tests
    pub fn testing() -> Self {
        Self {
            handshake_delay: Duration::from_millis(10),
            echo_latency: Duration::from_millis(5),
            response_latency: Duration::from_millis(10),
            heartbeat_interval: Duration::from_millis(50),
            feed_initial_delay: Duration::from_millis(20),
            feed_interval_min: Duration::from_millis(30),
            feed_interval_max: Duration::from_millis(60),
            ping_latency_min_ms: 1,
            ping_latency_max_ms: 5,
            task_shutdown_grace: Duration::from_millis(100),
        }
    }
}

// ----------------------------------------------------------------------------
// Client Configuration
// ----------------------------------------------------------------------------

/// Master configuration for a channel client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    pub timing: SimulationTiming,
    pub publish_mode: PublishMode,
    /// Seed for the event feed and ping latency; `None` uses system entropy
    pub rng_seed: Option<u64>,
    pub notification_rotation: Vec<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timing: SimulationTiming::default(),
            publish_mode: PublishMode::LatestValue,
            rng_seed: None,
            notification_rotation: DEFAULT_NOTIFICATION_ROTATION
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl ClientConfig {
    /// Create new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Short delays for interactive demos
    pub fn low_latency() -> Self {
        Self {
            timing: SimulationTiming::low_latency(),
            ..Self::default()
        }
    }

    /// Fast, deterministic configuration with broadcast delivery so tests can
    /// observe every message
    pub fn testing() -> Self {
        Self {
            timing: SimulationTiming::testing(),
            publish_mode: PublishMode::Broadcast { capacity: 256 },
            rng_seed: Some(0x5eed),
            ..Self::default()
        }
    }

    /// Builder method for customizing timing
    pub fn with_timing(mut self, timing: SimulationTiming) -> Self {
        self.timing = timing;
        self
    }

    /// Builder method for choosing the publish mode
    pub fn with_publish_mode(mut self, mode: PublishMode) -> Self {
        self.publish_mode = mode;
        self
    }

    /// Builder method for fixing the RNG seed
    pub fn with_rng_seed(mut self, seed: u64) -> Self {
        self.rng_seed = Some(seed);
        self
    }

    /// Builder method for replacing the notification rotation
    pub fn with_notification_rotation<I, S>(mut self, rotation: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.notification_rotation = rotation.into_iter().map(Into::into).collect();
        self
    }

    /// Validate the configuration for consistency
    pub fn validate(&self) -> Result<(), ConfigError> {
        let timing = &self.timing;

        let positive = [
            ("heartbeat_interval", timing.heartbeat_interval),
            ("feed_interval_min", timing.feed_interval_min),
            ("feed_interval_max", timing.feed_interval_max),
        ];
        for (field, value) in positive {
            if value.is_zero() {
                return Err(ConfigError::ZeroDuration { field });
            }
        }

        if timing.feed_interval_min > timing.feed_interval_max {
            return Err(ConfigError::InvertedRange {
                field: "feed_interval",
                min_ms: saturating_millis(timing.feed_interval_min),
                max_ms: saturating_millis(timing.feed_interval_max),
            });
        }
        if timing.ping_latency_min_ms > timing.ping_latency_max_ms {
            return Err(ConfigError::InvertedRange {
                field: "ping_latency",
                min_ms: timing.ping_latency_min_ms,
                max_ms: timing.ping_latency_max_ms,
            });
        }

        if self.notification_rotation.is_empty() {
            return Err(ConfigError::EmptyRotation);
        }
        if let Some(index) = self
            .notification_rotation
            .iter()
            .position(|entry| entry.trim().is_empty())
        {
            return Err(ConfigError::BlankRotationEntry { index });
        }

        if let PublishMode::Broadcast { capacity: 0 } = self.publish_mode {
            return Err(ConfigError::ZeroBroadcastCapacity);
        }

        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
