//! Background Supervisor
//!
//! Owns the two periodic tasks of one connected session. A supervisor is
//! created when a handshake completes and consumed when the session ends;
//! reconnecting always builds a fresh one.
//!
//! Shutdown is two-phase. [`BackgroundSupervisor::signal_cancel`] flips the
//! session token inside the bus's emit fence, so once it returns no
//! heartbeat or notification can be published for this session.
//! [`BackgroundSupervisor::join`] then waits for the tasks up to a grace
//! deadline and aborts anything still running.

use crate::tasks::{EventFeedTask, LivenessPulseTask, TaskContext, TaskError};
use pulsewire_core::{saturating_millis, MessageBus, TaskHealthStatus, TaskId};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

// ----------------------------------------------------------------------------
// Reports
// ----------------------------------------------------------------------------

/// Snapshot of one supervised task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskReport {
    pub id: TaskId,
    pub health: TaskHealthStatus,
    /// Messages this task published during the session
    pub emitted: u64,
}

/// Snapshot of a session's supervised tasks
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupervisorReport {
    pub session: u64,
    pub tasks: Vec<TaskReport>,
}

impl SupervisorReport {
    pub fn task(&self, id: TaskId) -> Option<&TaskReport> {
        self.tasks.iter().find(|task| task.id == id)
    }

    pub fn total_emitted(&self) -> u64 {
        self.tasks.iter().map(|task| task.emitted).sum()
    }

    /// Whether every task has left the `Running` state
    pub fn all_finished(&self) -> bool {
        self.tasks
            .iter()
            .all(|task| task.health != TaskHealthStatus::Running)
    }
}

// ----------------------------------------------------------------------------
// Task Slots
// ----------------------------------------------------------------------------

struct TaskSlot {
    id: TaskId,
    handle: Option<JoinHandle<()>>,
    health: Arc<Mutex<TaskHealthStatus>>,
    emitted: Arc<AtomicU64>,
}

impl TaskSlot {
    fn health(&self) -> TaskHealthStatus {
        read_health(&self.health)
    }

    fn report(&self) -> TaskReport {
        TaskReport {
            id: self.id,
            health: self.health(),
            emitted: self.emitted.load(Ordering::Acquire),
        }
    }
}

fn read_health(health: &Mutex<TaskHealthStatus>) -> TaskHealthStatus {
    health.lock().unwrap_or_else(PoisonError::into_inner).clone()
}

fn set_health(health: &Mutex<TaskHealthStatus>, status: TaskHealthStatus) {
    *health.lock().unwrap_or_else(PoisonError::into_inner) = status;
}

/// Spawn `task` on the tracker and record its outcome in the slot's health
fn spawn_supervised<F>(
    tracker: &TaskTracker,
    id: TaskId,
    session: u64,
    emitted: Arc<AtomicU64>,
    task: F,
) -> TaskSlot
where
    F: Future<Output = Result<(), TaskError>> + Send + 'static,
{
    let health = Arc::new(Mutex::new(TaskHealthStatus::Running));
    let task_health = health.clone();

    let handle = tracker.spawn(async move {
        let status = match task.await {
            Ok(()) => {
                debug!(task = %id, session, "Supervised task stopped");
                TaskHealthStatus::Stopped
            }
            Err(err) => {
                error!(task = %id, session, error = %err, "Supervised task failed");
                TaskHealthStatus::Failed {
                    reason: err.to_string(),
                }
            }
        };
        set_health(&task_health, status);
    });

    TaskSlot {
        id,
        handle: Some(handle),
        health,
        emitted,
    }
}

// ----------------------------------------------------------------------------
// Background Supervisor
// ----------------------------------------------------------------------------

/// Supervises the liveness pulse and event feed of one session
pub struct BackgroundSupervisor {
    session: u64,
    token: CancellationToken,
    slots: Vec<TaskSlot>,
}

impl BackgroundSupervisor {
    /// Start both tasks under `session_token`. Each task gets its own child
    /// token so one task ending never cancels the other.
    pub fn start(
        session: u64,
        ctx: &TaskContext,
        session_token: &CancellationToken,
        tracker: &TaskTracker,
    ) -> Self {
        let pulse_emitted = Arc::new(AtomicU64::new(0));
        let pulse = LivenessPulseTask::new(ctx, session_token.child_token(), pulse_emitted.clone());

        let feed_emitted = Arc::new(AtomicU64::new(0));
        let feed = EventFeedTask::new(ctx, session_token.child_token(), feed_emitted.clone());

        let slots = vec![
            spawn_supervised(tracker, TaskId::LivenessPulse, session, pulse_emitted, pulse.run()),
            spawn_supervised(tracker, TaskId::EventFeed, session, feed_emitted, feed.run()),
        ];

        info!(session, "Background tasks started");

        Self {
            session,
            token: session_token.clone(),
            slots,
        }
    }

    pub fn session(&self) -> u64 {
        self.session
    }

    /// Cancel both tasks. No supervised message is published after this returns.
    pub fn signal_cancel(&self, bus: &MessageBus) {
        bus.fenced(|| self.token.cancel());
        debug!(session = self.session, "Background tasks signalled");
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn report(&self) -> SupervisorReport {
        SupervisorReport {
            session: self.session,
            tasks: self.slots.iter().map(TaskSlot::report).collect(),
        }
    }

    /// Wait for both tasks to finish, aborting any still running at the
    /// grace deadline. Cancels the tasks first if that hasn't happened yet.
    pub async fn join(mut self, grace: Duration) -> SupervisorReport {
        self.token.cancel();
        let deadline = Instant::now() + grace;

        for slot in &mut self.slots {
            let Some(mut handle) = slot.handle.take() else {
                continue;
            };

            match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(Ok(())) => {}
                Ok(Err(join_error)) => {
                    error!(task = %slot.id, error = %join_error, "Supervised task panicked");
                    set_health(
                        &slot.health,
                        TaskHealthStatus::Failed {
                            reason: join_error.to_string(),
                        },
                    );
                }
                Err(_) => {
                    warn!(
                        task = %slot.id,
                        grace_ms = saturating_millis(grace),
                        "Task ignored cancellation, aborting"
                    );
                    handle.abort();
                    set_health(
                        &slot.health,
                        TaskHealthStatus::Failed {
                            reason: "aborted after shutdown grace".to_string(),
                        },
                    );
                }
            }
        }

        let report = self.report();
        info!(
            session = self.session,
            emitted = report.total_emitted(),
            "Background tasks shut down"
        );
        report
    }
}

impl std::fmt::Debug for BackgroundSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackgroundSupervisor")
            .field("session", &self.session)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
