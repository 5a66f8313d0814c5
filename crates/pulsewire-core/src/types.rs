//! Core types for the PulseWire client
//!
//! Newtypes for message identity and time, plus the task identifiers used by
//! the runtime's supervisor for health tracking and log fields.

use core::fmt;
use core::ops::{Add, Sub};
use core::time::Duration;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use uuid::Uuid;

// ----------------------------------------------------------------------------
// Message Identifier
// ----------------------------------------------------------------------------

/// Opaque unique identifier for a published message
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MessageId(Uuid);

impl MessageId {
    /// Generate a fresh random identifier
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ----------------------------------------------------------------------------
// Timestamp
// ----------------------------------------------------------------------------

/// Whole milliseconds in `duration`, saturating at `u64::MAX`
pub fn saturating_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Millisecond timestamp since Unix epoch
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(u64);

impl Add<u64> for Timestamp {
    type Output = Timestamp;

    fn add(self, other: u64) -> Timestamp {
        Timestamp(self.0.saturating_add(other))
    }
}

impl Sub for Timestamp {
    type Output = u64;

    fn sub(self, other: Timestamp) -> u64 {
        self.0.saturating_sub(other.0)
    }
}

impl Timestamp {
    /// Create a new timestamp
    pub fn new(millis: u64) -> Self {
        Self(millis)
    }

    /// Current wall-clock time
    pub fn now() -> Self {
        use std::time::{SystemTime, UNIX_EPOCH};
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Self(saturating_millis(duration))
    }

    /// Get the raw milliseconds
    pub fn as_millis(&self) -> u64 {
        self.0
    }

    /// Get duration since another timestamp (zero if `other` is later)
    pub fn duration_since(&self, other: Self) -> Duration {
        Duration::from_millis(self.0.saturating_sub(other.0))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

// ----------------------------------------------------------------------------
// Time Source Trait
// ----------------------------------------------------------------------------

/// Source of timestamps for messages and audit entries
pub trait TimeSource: Send + Sync {
    /// Get the current timestamp
    fn now(&self) -> Timestamp;
}

/// Wall-clock time source
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    fn now(&self) -> Timestamp {
        Timestamp::now()
    }
}

/// Wraps another time source and never hands out a timestamp smaller than
/// one it has already issued.
///
/// Clones share the same high-water mark, so every task stamping messages for
/// one client sees a single non-decreasing sequence.
#[derive(Clone)]
pub struct MonotonicTimeSource {
    inner: Arc<dyn TimeSource>,
    high_water: Arc<AtomicU64>,
}

impl MonotonicTimeSource {
    pub fn new<T: TimeSource + 'static>(inner: T) -> Self {
        Self::from_shared(Arc::new(inner))
    }

    pub fn from_shared(inner: Arc<dyn TimeSource>) -> Self {
        Self {
            inner,
            high_water: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Monotonic clock over wall-clock time
    pub fn system() -> Self {
        Self::new(SystemTimeSource)
    }
}

impl TimeSource for MonotonicTimeSource {
    fn now(&self) -> Timestamp {
        let candidate = self.inner.now().as_millis();
        let previous = self.high_water.fetch_max(candidate, Ordering::AcqRel);
        Timestamp(previous.max(candidate))
    }
}

impl fmt::Debug for MonotonicTimeSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MonotonicTimeSource")
            .field("high_water", &self.high_water.load(Ordering::Acquire))
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Task Identifiers
// ----------------------------------------------------------------------------

/// Identifiers for the client's background activities
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskId {
    /// Periodic heartbeat emission
    LivenessPulse,
    /// Periodic unsolicited notification emission
    EventFeed,
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskId::LivenessPulse => write!(f, "LivenessPulse"),
            TaskId::EventFeed => write!(f, "EventFeed"),
        }
    }
}

/// Health of a supervised task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskHealthStatus {
    Running,
    Stopped,
    Failed { reason: String },
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
