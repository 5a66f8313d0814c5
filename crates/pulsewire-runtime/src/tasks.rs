//! Supervised background tasks
//!
//! Two periodic emitters run for the lifetime of one connected session:
//!
//! - `LivenessPulseTask`: heartbeat every `heartbeat_interval`
//! - `EventFeedTask`: canned notifications at a randomized interval
//!
//! Each task owns its own cancellation token. Cancellation is checked while
//! sleeping and again inside the bus's emit fence before every publish.

use pulsewire_core::{
    saturating_millis, Message, MessageBus, MonotonicTimeSource, RandomSource, SimulationTiming,
};
use std::ops::RangeInclusive;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Random source shared between the event feed and the response path
pub type SharedRandom = Arc<Mutex<Box<dyn RandomSource>>>;

/// Draw a value from `range` without holding the lock past the call
pub fn draw_from(rng: &SharedRandom, range: RangeInclusive<u64>) -> u64 {
    let mut guard = rng.lock().unwrap_or_else(PoisonError::into_inner);
    guard.gen_range_u64(range)
}

// ----------------------------------------------------------------------------
// Task Errors
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TaskError {
    #[error("Notification rotation is empty")]
    EmptyRotation,
    #[error("{task} interval must be greater than zero")]
    ZeroInterval { task: &'static str },
}

// ----------------------------------------------------------------------------
// Task Context
// ----------------------------------------------------------------------------

/// Everything a session's tasks need from the client
#[derive(Clone)]
pub struct TaskContext {
    pub bus: MessageBus,
    pub clock: MonotonicTimeSource,
    pub timing: SimulationTiming,
    pub rotation: Arc<[String]>,
    pub rng: SharedRandom,
}

/// Sleep for `duration` unless `cancel` fires first. Returns `false` on cancel.
async fn sleep_unless_cancelled(cancel: &CancellationToken, duration: Duration) -> bool {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}

// ----------------------------------------------------------------------------
// Liveness Pulse
// ----------------------------------------------------------------------------

/// Emits a numbered heartbeat every interval
pub struct LivenessPulseTask {
    bus: MessageBus,
    clock: MonotonicTimeSource,
    interval: Duration,
    cancel: CancellationToken,
    emitted: Arc<AtomicU64>,
    seq: u64,
}

impl LivenessPulseTask {
    pub fn new(ctx: &TaskContext, cancel: CancellationToken, emitted: Arc<AtomicU64>) -> Self {
        Self {
            bus: ctx.bus.clone(),
            clock: ctx.clock.clone(),
            interval: ctx.timing.heartbeat_interval,
            cancel,
            emitted,
            seq: 0,
        }
    }

    pub async fn run(mut self) -> Result<(), TaskError> {
        if self.interval.is_zero() {
            return Err(TaskError::ZeroInterval {
                task: "LivenessPulse",
            });
        }
        debug!(interval_ms = saturating_millis(self.interval), "Liveness pulse started");

        while sleep_unless_cancelled(&self.cancel, self.interval).await {
            self.seq += 1;
            let heartbeat = Message::heartbeat(self.seq, &self.clock);
            if !self.bus.publish_unless_cancelled(&self.cancel, heartbeat) {
                break;
            }
            self.emitted.fetch_add(1, Ordering::AcqRel);
            debug!(seq = self.seq, "Heartbeat emitted");
        }

        debug!(emitted = self.seq, "Liveness pulse stopped");
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Event Feed
// ----------------------------------------------------------------------------

/// Cycles through the notification rotation at a randomized interval
pub struct EventFeedTask {
    bus: MessageBus,
    clock: MonotonicTimeSource,
    rotation: Arc<[String]>,
    initial_delay: Duration,
    interval_ms: RangeInclusive<u64>,
    rng: SharedRandom,
    cancel: CancellationToken,
    emitted: Arc<AtomicU64>,
    next_index: usize,
}

impl EventFeedTask {
    pub fn new(ctx: &TaskContext, cancel: CancellationToken, emitted: Arc<AtomicU64>) -> Self {
        let min_ms = saturating_millis(ctx.timing.feed_interval_min);
        let max_ms = saturating_millis(ctx.timing.feed_interval_max);

        Self {
            bus: ctx.bus.clone(),
            clock: ctx.clock.clone(),
            rotation: ctx.rotation.clone(),
            initial_delay: ctx.timing.feed_initial_delay,
            interval_ms: min_ms..=max_ms.max(min_ms),
            rng: ctx.rng.clone(),
            cancel,
            emitted,
            next_index: 0,
        }
    }

    pub async fn run(mut self) -> Result<(), TaskError> {
        if self.rotation.is_empty() {
            return Err(TaskError::EmptyRotation);
        }
        if *self.interval_ms.end() == 0 {
            return Err(TaskError::ZeroInterval { task: "EventFeed" });
        }
        debug!(rotation = self.rotation.len(), "Event feed started");

        if !sleep_unless_cancelled(&self.cancel, self.initial_delay).await {
            return Ok(());
        }

        loop {
            let payload = self.rotation[self.next_index].clone();
            self.next_index = (self.next_index + 1) % self.rotation.len();

            let notification = Message::notification(payload, &self.clock);
            if !self.bus.publish_unless_cancelled(&self.cancel, notification) {
                break;
            }
            self.emitted.fetch_add(1, Ordering::AcqRel);

            let wait = Duration::from_millis(draw_from(&self.rng, self.interval_ms.clone()));
            debug!(next_in_ms = saturating_millis(wait), "Notification emitted");
            if !sleep_unless_cancelled(&self.cancel, wait).await {
                break;
            }
        }

        debug!("Event feed stopped");
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
