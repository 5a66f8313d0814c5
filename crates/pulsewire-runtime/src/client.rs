//! Channel Client
//!
//! The façade callers hold. It owns the connection state machine, the
//! inbound message bus and, while connected, the background supervisor.
//!
//! Lifecycle bookkeeping lives behind a single `std::sync::Mutex` that is
//! never held across an `.await`. Lock order is lifecycle, then the bus's
//! emit fence. Background tasks only ever take the fence.

use crate::backend::LinkBackend;
use crate::supervisor::{BackgroundSupervisor, SupervisorReport};
use crate::tasks::{draw_from, SharedRandom, TaskContext};
use pulsewire_core::{
    generate_response, source_from_seed, AuditEntry, ClientConfig, ClientError, ClientResult,
    ConnectionEvent, ConnectionStateMachine, ConnectionStatus, Message, MessageBus,
    MessageSubscription, MonotonicTimeSource, ResponseContext, StateTransitionError,
    TransitionOutcome, TransitionStats,
};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

/// Payload of the system message published when a session opens
pub const WELCOME_MESSAGE: &str = "Connected to PulseWire server";

/// Payload of the system message published when a session ends
pub const FAREWELL_MESSAGE: &str = "Disconnected from PulseWire server";

// ----------------------------------------------------------------------------
// Client Statistics
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientStats {
    pub status: ConnectionStatus,
    pub transitions: TransitionStats,
    pub messages_published: u64,
    pub sessions_opened: u64,
}

// ----------------------------------------------------------------------------
// Lifecycle Bookkeeping
// ----------------------------------------------------------------------------

/// Outcome of one handshake attempt, written once by whoever settles it
type OutcomeSlot = Arc<watch::Sender<Option<ClientResult<()>>>>;
type OutcomeReceiver = watch::Receiver<Option<ClientResult<()>>>;

fn resolve(slot: &OutcomeSlot, result: ClientResult<()>) {
    slot.send_if_modified(|outcome| {
        if outcome.is_some() {
            return false;
        }
        *outcome = Some(result);
        true
    });
}

/// In-flight handshake
struct Attempt {
    id: u64,
    token: CancellationToken,
    outcome: OutcomeSlot,
}

/// A connected session and its background tasks
struct Session {
    connected_at: Instant,
    supervisor: BackgroundSupervisor,
}

struct Lifecycle {
    machine: ConnectionStateMachine,
    attempt: Option<Attempt>,
    next_attempt_id: u64,
    session: Option<Session>,
    last_report: Option<SupervisorReport>,
    closed: bool,
}

/// What `connect` decided to do while holding the lock
enum ConnectPlan {
    AlreadyConnected,
    Join(OutcomeReceiver),
    Handshake {
        id: u64,
        token: CancellationToken,
        outcome: OutcomeSlot,
    },
}

struct ClientInner {
    config: ClientConfig,
    backend: Arc<dyn LinkBackend>,
    bus: MessageBus,
    status_tx: watch::Sender<ConnectionStatus>,
    clock: MonotonicTimeSource,
    rng: SharedRandom,
    rotation: Arc<[String]>,
    root: CancellationToken,
    tracker: TaskTracker,
    lifecycle: Mutex<Lifecycle>,
}

impl ClientInner {
    fn lock(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply `event` and mirror the new status into the watch channel
    fn transition(
        &self,
        lifecycle: &mut Lifecycle,
        event: ConnectionEvent,
    ) -> Result<TransitionOutcome, StateTransitionError> {
        let event_name = event.name();
        let outcome = lifecycle.machine.apply(event, &self.clock)?;

        match outcome {
            TransitionOutcome::Moved { from, to } => {
                self.status_tx.send_replace(to);
                info!(%from, %to, event = event_name, "Connection status changed");
            }
            TransitionOutcome::Unchanged(status) => {
                debug!(%status, event = event_name, "Request left status unchanged");
            }
        }

        Ok(outcome)
    }

    fn task_context(&self) -> TaskContext {
        TaskContext {
            bus: self.bus.clone(),
            clock: self.clock.clone(),
            timing: self.config.timing.clone(),
            rotation: self.rotation.clone(),
            rng: self.rng.clone(),
        }
    }

    fn response_context(&self) -> ResponseContext {
        let (uptime, connections) = {
            let lifecycle = self.lock();
            let uptime = lifecycle
                .session
                .as_ref()
                .map(|session| session.connected_at.elapsed())
                .unwrap_or_default();
            (uptime, lifecycle.machine.stats().sessions_opened)
        };

        let timing = &self.config.timing;
        ResponseContext {
            uptime,
            connections,
            ping_latency_ms: draw_from(
                &self.rng,
                timing.ping_latency_min_ms..=timing.ping_latency_max_ms,
            ),
        }
    }

    /// Sleep unless the client is closed first
    async fn simulate_latency(&self, duration: Duration) -> ClientResult<()> {
        tokio::select! {
            biased;
            _ = self.root.cancelled() => Err(ClientError::Closed),
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }

    fn publish_system(&self, payload: impl Into<String>) {
        self.bus.publish(Message::system(payload, &self.clock));
    }

    /// Apply a finished handshake if `id` is still the live attempt, then
    /// hand the result to everyone waiting on it
    fn finish_handshake(
        &self,
        id: u64,
        token: &CancellationToken,
        outcome: &OutcomeSlot,
        result: ClientResult<()>,
    ) {
        let settled = self.settle_handshake(id, token, result);
        resolve(outcome, settled);
    }

    fn settle_handshake(
        &self,
        id: u64,
        token: &CancellationToken,
        result: ClientResult<()>,
    ) -> ClientResult<()> {
        let mut lifecycle = self.lock();

        let current = matches!(&lifecycle.attempt, Some(attempt) if attempt.id == id);
        if !current || token.is_cancelled() {
            debug!(attempt = id, "Handshake finished after being aborted");
            return Err(ClientError::ConnectionAborted);
        }
        lifecycle.attempt = None;

        match result {
            Ok(()) => {
                self.transition(&mut lifecycle, ConnectionEvent::HandshakeSucceeded)?;
                self.publish_system(WELCOME_MESSAGE);

                let session_id = lifecycle.machine.stats().sessions_opened;
                let session_token = self.root.child_token();
                let supervisor = BackgroundSupervisor::start(
                    session_id,
                    &self.task_context(),
                    &session_token,
                    &self.tracker,
                );
                lifecycle.session = Some(Session {
                    connected_at: Instant::now(),
                    supervisor,
                });
                Ok(())
            }
            Err(err) => {
                warn!(backend = self.backend.name(), error = %err, "Handshake failed");
                self.transition(
                    &mut lifecycle,
                    ConnectionEvent::HandshakeFailed {
                        reason: err.to_string(),
                    },
                )?;
                Err(err)
            }
        }
    }

    /// Publish the echo of `text`, then the generated response
    async fn deliver(&self, text: &str) -> ClientResult<()> {
        self.simulate_latency(self.config.timing.echo_latency).await?;
        self.bus.publish(Message::echo(text, &self.clock));
        debug!(len = text.len(), "Echo published");

        self.simulate_latency(self.config.timing.response_latency)
            .await?;
        let payload = generate_response(text, &self.response_context());
        self.bus.publish(Message::response(payload, &self.clock));
        debug!("Response published");

        Ok(())
    }

    /// Wait for the session's tasks and keep their final report
    async fn retire(&self, session: Session) {
        let session_id = session.supervisor.session();
        let report = session
            .supervisor
            .join(self.config.timing.task_shutdown_grace)
            .await;
        debug!(session = session_id, "Session retired");
        self.lock().last_report = Some(report);
    }

    /// Tear down whatever the current status holds and land in `Disconnected`
    async fn disconnect_inner(&self) -> ClientResult<()> {
        let session = {
            let mut lifecycle = self.lock();

            match lifecycle.machine.status() {
                ConnectionStatus::Disconnected => {
                    self.transition(&mut lifecycle, ConnectionEvent::Disconnect)?;
                    return Ok(());
                }
                ConnectionStatus::Connecting => {
                    if let Some(attempt) = lifecycle.attempt.take() {
                        attempt.token.cancel();
                        resolve(&attempt.outcome, Err(ClientError::ConnectionAborted));
                        debug!(attempt = attempt.id, "Handshake aborted by disconnect");
                    }
                    self.transition(&mut lifecycle, ConnectionEvent::Disconnect)?;
                    self.publish_system(FAREWELL_MESSAGE);
                    None
                }
                ConnectionStatus::Connected | ConnectionStatus::Error => {
                    let session = lifecycle.session.take();
                    if let Some(session) = &session {
                        session.supervisor.signal_cancel(&self.bus);
                    }
                    self.transition(&mut lifecycle, ConnectionEvent::Disconnect)?;
                    self.publish_system(FAREWELL_MESSAGE);
                    session
                }
            }
        };

        if let Some(session) = session {
            self.retire(session).await;
        }

        Ok(())
    }
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        self.root.cancel();
        self.tracker.close();
    }
}

// ----------------------------------------------------------------------------
// Channel Client
// ----------------------------------------------------------------------------

/// Handle to a simulated real-time channel. Clones share the same client.
#[derive(Clone)]
pub struct ChannelClient {
    inner: Arc<ClientInner>,
}

impl ChannelClient {
    pub(crate) fn from_parts(
        config: ClientConfig,
        backend: Arc<dyn LinkBackend>,
        clock: MonotonicTimeSource,
    ) -> Self {
        let (status_tx, _) = watch::channel(ConnectionStatus::Disconnected);
        let rng: SharedRandom = Arc::new(Mutex::new(source_from_seed(config.rng_seed)));
        let rotation: Arc<[String]> = config.notification_rotation.iter().cloned().collect();

        let inner = ClientInner {
            bus: MessageBus::new(config.publish_mode),
            backend,
            status_tx,
            clock,
            rng,
            rotation,
            root: CancellationToken::new(),
            tracker: TaskTracker::new(),
            lifecycle: Mutex::new(Lifecycle {
                machine: ConnectionStateMachine::new(),
                attempt: None,
                next_attempt_id: 0,
                session: None,
                last_report: None,
                closed: false,
            }),
            config,
        };

        Self {
            inner: Arc::new(inner),
        }
    }

    /// Open a session.
    ///
    /// Suspends for the handshake. A no-op while already connected. A call
    /// made while another handshake is in flight waits for that handshake
    /// and returns its outcome. The handshake runs on the client's own task,
    /// so abandoning this future never leaves the client stuck in
    /// `Connecting`.
    pub async fn connect(&self) -> ClientResult<()> {
        let inner = &self.inner;

        let plan = {
            let mut lifecycle = inner.lock();
            if lifecycle.closed {
                return Err(ClientError::Closed);
            }

            match lifecycle.machine.status() {
                ConnectionStatus::Connected => {
                    inner.transition(&mut lifecycle, ConnectionEvent::Connect)?;
                    ConnectPlan::AlreadyConnected
                }
                ConnectionStatus::Connecting => match &lifecycle.attempt {
                    Some(attempt) => ConnectPlan::Join(attempt.outcome.subscribe()),
                    None => return Err(ClientError::ConnectionAborted),
                },
                ConnectionStatus::Disconnected | ConnectionStatus::Error => {
                    inner.transition(&mut lifecycle, ConnectionEvent::Connect)?;
                    lifecycle.next_attempt_id += 1;
                    let id = lifecycle.next_attempt_id;
                    let token = inner.root.child_token();
                    let (outcome, _) = watch::channel(None);
                    let outcome = Arc::new(outcome);
                    lifecycle.attempt = Some(Attempt {
                        id,
                        token: token.clone(),
                        outcome: outcome.clone(),
                    });
                    ConnectPlan::Handshake { id, token, outcome }
                }
            }
        };

        let waiting = match plan {
            ConnectPlan::AlreadyConnected => return Ok(()),
            ConnectPlan::Join(waiting) => waiting,
            ConnectPlan::Handshake { id, token, outcome } => {
                let waiting = outcome.subscribe();
                self.spawn_handshake(id, token, outcome);
                waiting
            }
        };

        self.await_outcome(waiting).await
    }

    fn spawn_handshake(&self, id: u64, token: CancellationToken, outcome: OutcomeSlot) {
        let backend = self.inner.backend.clone();
        let client: Weak<ClientInner> = Arc::downgrade(&self.inner);
        debug!(attempt = id, backend = backend.name(), "Handshake started");

        self.inner.tracker.spawn(async move {
            let result = backend.handshake(&token).await;
            match client.upgrade() {
                Some(inner) => inner.finish_handshake(id, &token, &outcome, result),
                None => resolve(&outcome, Err(ClientError::ConnectionAborted)),
            }
        });
    }

    /// Wait until the attempt behind `outcome` is settled
    async fn await_outcome(&self, mut outcome: OutcomeReceiver) -> ClientResult<()> {
        loop {
            let settled = outcome.borrow_and_update().clone();
            if let Some(result) = settled {
                return result;
            }
            tokio::select! {
                biased;
                _ = self.inner.root.cancelled() => return Err(ClientError::ConnectionAborted),
                changed = outcome.changed() => {
                    if changed.is_err() {
                        return Err(ClientError::ConnectionAborted);
                    }
                }
            }
        }
    }

    /// End the session.
    ///
    /// Cancels both background tasks, moves to `Disconnected` and publishes
    /// the farewell. A no-op while already disconnected. Aborts an in-flight
    /// handshake.
    pub async fn disconnect(&self) -> ClientResult<()> {
        if self.is_closed() {
            return Err(ClientError::Closed);
        }
        self.inner.disconnect_inner().await
    }

    /// Submit a command to the simulated server.
    ///
    /// Publishes an echo, then the generated response. Returns once the
    /// response is published. Both are published by a client task, so a
    /// caller that gives up early still leaves a complete exchange behind.
    pub async fn send(&self, text: &str) -> ClientResult<()> {
        {
            let lifecycle = self.inner.lock();
            if lifecycle.closed {
                return Err(ClientError::Closed);
            }
            let status = lifecycle.machine.status();
            if !status.can_send_messages() {
                return Err(ClientError::invalid_state("send", status));
            }
        }
        if text.trim().is_empty() {
            return Err(ClientError::EmptyInput);
        }

        let inner = self.inner.clone();
        let text = text.to_string();
        let exchange = self
            .inner
            .tracker
            .spawn(async move { inner.deliver(&text).await });

        match exchange.await {
            Ok(result) => result,
            Err(join_error) => {
                warn!(error = %join_error, "Send task did not complete");
                Err(ClientError::Closed)
            }
        }
    }

    /// Report that the link dropped underneath a connected session.
    ///
    /// Moves `Connected` to `Error`, stops the background tasks and
    /// publishes a system message carrying `reason`. Repeated reports while
    /// already in `Error` are no-ops.
    pub async fn fail_link<R: Into<String>>(&self, reason: R) -> ClientResult<()> {
        let inner = &self.inner;
        let reason = reason.into();

        let session = {
            let mut lifecycle = inner.lock();
            if lifecycle.closed {
                return Err(ClientError::Closed);
            }

            let outcome = inner.transition(
                &mut lifecycle,
                ConnectionEvent::LinkFailed {
                    reason: reason.clone(),
                },
            )?;
            if outcome.is_unchanged() {
                return Ok(());
            }

            let session = lifecycle.session.take();
            if let Some(session) = &session {
                session.supervisor.signal_cancel(&inner.bus);
            }
            warn!(%reason, "Link failed");
            inner.publish_system(format!("Connection lost: {}", reason));
            session
        };

        if let Some(session) = session {
            inner.retire(session).await;
        }

        Ok(())
    }

    /// Shut the client down.
    ///
    /// Disconnects if needed, cancels the root task context and waits for
    /// every spawned task up to the shutdown grace. Later operations fail
    /// with [`ClientError::Closed`]. Calling it twice is harmless.
    pub async fn close(&self) {
        let inner = &self.inner;

        let first_close = {
            let mut lifecycle = inner.lock();
            !std::mem::replace(&mut lifecycle.closed, true)
        };
        if !first_close {
            return;
        }

        info!("Closing channel client");
        if let Err(err) = inner.disconnect_inner().await {
            warn!(error = %err, "Disconnect during close failed");
        }

        inner.root.cancel();
        inner.tracker.close();
        let grace = inner.config.timing.task_shutdown_grace;
        if tokio::time::timeout(grace, inner.tracker.wait()).await.is_err() {
            warn!(
                remaining = inner.tracker.len(),
                "Tasks still running after close grace"
            );
        }
    }

    // ------------------------------------------------------------------------
    // Observation
    // ------------------------------------------------------------------------

    pub fn is_connected(&self) -> bool {
        self.status() == ConnectionStatus::Connected
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.inner.status_tx.borrow()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    /// Receiver that observes every status change
    pub fn subscribe_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.inner.status_tx.subscribe()
    }

    /// Subscription to published messages, using the configured publish mode
    pub fn subscribe_messages(&self) -> MessageSubscription {
        self.inner.bus.subscribe()
    }

    pub fn latest_message(&self) -> Option<Message> {
        self.inner.bus.latest()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn backend_name(&self) -> &'static str {
        self.inner.backend.name()
    }

    // ------------------------------------------------------------------------
    // Diagnostics
    // ------------------------------------------------------------------------

    pub fn stats(&self) -> ClientStats {
        let lifecycle = self.inner.lock();
        let transitions = lifecycle.machine.stats().clone();
        ClientStats {
            status: lifecycle.machine.status(),
            sessions_opened: transitions.sessions_opened,
            transitions,
            messages_published: self.inner.bus.published_count(),
        }
    }

    /// Most recent status transitions, oldest first
    pub fn audit_trail(&self, limit: usize) -> Vec<AuditEntry> {
        self.inner.lock().machine.recent_audit_entries(limit)
    }

    /// Live report for the current session, or the final report of the
    /// previous one
    pub fn supervisor_report(&self) -> Option<SupervisorReport> {
        let lifecycle = self.inner.lock();
        match &lifecycle.session {
            Some(session) => Some(session.supervisor.report()),
            None => lifecycle.last_report.clone(),
        }
    }
}

impl std::fmt::Debug for ChannelClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelClient")
            .field("status", &self.status())
            .field("backend", &self.backend_name())
            .field("bus", &self.inner.bus)
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::SimulatedLink;
    use pulsewire_core::MessageKind;

    fn client() -> ChannelClient {
        let config = ClientConfig::testing();
        let backend = Arc::new(SimulatedLink::new(config.timing.handshake_delay));
        ChannelClient::from_parts(config, backend, MonotonicTimeSource::system())
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_publishes_welcome() {
        let client = client();
        client.connect().await.unwrap();

        assert!(client.is_connected());
        let latest = client.latest_message().unwrap();
        assert_eq!(latest.kind, MessageKind::System);
        assert_eq!(latest.payload, WELCOME_MESSAGE);
        assert_eq!(client.stats().sessions_opened, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_publishes_farewell_and_stores_report() {
        let client = client();
        client.connect().await.unwrap();
        client.disconnect().await.unwrap();

        assert_eq!(client.status(), ConnectionStatus::Disconnected);
        assert_eq!(client.latest_message().unwrap().payload, FAREWELL_MESSAGE);

        let report = client.supervisor_report().unwrap();
        assert_eq!(report.session, 1);
        assert!(report.all_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn test_state_checked_before_input() {
        let client = client();
        assert_eq!(
            client.send("").await,
            Err(ClientError::invalid_state("send", ConnectionStatus::Disconnected))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_audit_trail_records_session() {
        let client = client();
        client.connect().await.unwrap();
        client.disconnect().await.unwrap();

        let statuses: Vec<_> = client.audit_trail(10).iter().map(|entry| entry.to).collect();
        assert_eq!(
            statuses,
            vec![
                ConnectionStatus::Connecting,
                ConnectionStatus::Connected,
                ConnectionStatus::Disconnected
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_fail_link_from_disconnected_is_rejected() {
        let client = client();
        let result = client.fail_link("carrier lost").await;
        assert!(matches!(result, Err(ClientError::StateTransition(_))));
        assert_eq!(client.status(), ConnectionStatus::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_client_rejects_operations() {
        let client = client();
        client.close().await;

        assert!(client.is_closed());
        assert_eq!(client.connect().await, Err(ClientError::Closed));
        assert_eq!(client.send("hi").await, Err(ClientError::Closed));
        assert_eq!(client.disconnect().await, Err(ClientError::Closed));
    }
}
