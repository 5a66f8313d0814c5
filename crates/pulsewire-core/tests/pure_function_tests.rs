//! Unit Tests for Pure Functions
//!
//! Exercises the transition table, the response generator and the message
//! constructors through the public API, without spawning any tasks.

use pulsewire_core::{
    generate_response, next_status, ClientError, CommandIntent, ConnectionEvent,
    ConnectionStateMachine, ConnectionStatus, Message, MessageKind, MonotonicTimeSource,
    ResponseContext, StateTransitionError, StatusReport, TimeSource, Timestamp,
    TransitionOutcome,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

// ----------------------------------------------------------------------------
// Test Utilities
// ----------------------------------------------------------------------------

/// Clock that only moves when told to
struct ManualClock(AtomicU64);

impl ManualClock {
    fn at(millis: u64) -> Self {
        Self(AtomicU64::new(millis))
    }

    fn set(&self, millis: u64) {
        self.0.store(millis, Ordering::SeqCst);
    }
}

impl TimeSource for ManualClock {
    fn now(&self) -> Timestamp {
        Timestamp::new(self.0.load(Ordering::SeqCst))
    }
}

fn response_context() -> ResponseContext {
    ResponseContext {
        uptime: Duration::from_secs(125),
        connections: 1,
        ping_latency_ms: 33,
    }
}

// ----------------------------------------------------------------------------
// Connection State Machine Tests
// ----------------------------------------------------------------------------

#[test]
fn test_full_table_for_connect() {
    let expectations = [
        (ConnectionStatus::Disconnected, Some(ConnectionStatus::Connecting)),
        (ConnectionStatus::Connecting, None),
        (ConnectionStatus::Connected, None),
        (ConnectionStatus::Error, Some(ConnectionStatus::Connecting)),
    ];

    for (from, moved_to) in expectations {
        let outcome = next_status(from, &ConnectionEvent::Connect).unwrap();
        match moved_to {
            Some(to) => assert_eq!(outcome, TransitionOutcome::Moved { from, to }),
            None => assert_eq!(outcome, TransitionOutcome::Unchanged(from)),
        }
    }
}

#[test]
fn test_handshake_events_only_legal_while_connecting() {
    for from in [
        ConnectionStatus::Disconnected,
        ConnectionStatus::Connected,
        ConnectionStatus::Error,
    ] {
        let err = next_status(from, &ConnectionEvent::HandshakeSucceeded).unwrap_err();
        assert_eq!(
            err,
            StateTransitionError::InvalidTransition {
                from,
                event: ConnectionEvent::HandshakeSucceeded
            }
        );
    }
}

#[test]
fn test_audit_entries_use_supplied_clock() {
    let clock = ManualClock::at(1_000);
    let mut machine = ConnectionStateMachine::new();

    machine.apply(ConnectionEvent::Connect, &clock).unwrap();
    clock.set(2_500);
    machine
        .apply(ConnectionEvent::HandshakeSucceeded, &clock)
        .unwrap();

    let audit = machine.recent_audit_entries(1);
    assert_eq!(audit.len(), 1);
    assert_eq!(audit[0].timestamp, Timestamp::new(2_500));
    assert_eq!(audit[0].to, ConnectionStatus::Connected);
}

#[test]
fn test_transition_error_surfaces_as_client_error() {
    let mut machine = ConnectionStateMachine::new();
    let result: Result<_, ClientError> = machine
        .apply(
            ConnectionEvent::LinkFailed {
                reason: "carrier lost".into(),
            },
            &ManualClock::at(0),
        )
        .map_err(Into::into);

    assert!(matches!(result, Err(ClientError::StateTransition(_))));
}

// ----------------------------------------------------------------------------
// Response Generator Tests
// ----------------------------------------------------------------------------

#[test]
fn test_ping_scenario_payload() {
    let payload = generate_response("PING", &response_context());
    assert!(payload.contains("Pong"));
    assert!(payload.contains("33ms"));
}

#[test]
fn test_status_report_uptime_in_seconds() {
    let payload = generate_response("what is the status?", &response_context());
    let report: StatusReport = serde_json::from_str(&payload).unwrap();
    assert_eq!(report.uptime_secs, 125);
    assert!(report.online);
}

#[test]
fn test_classification_is_case_insensitive() {
    assert_eq!(CommandIntent::classify("SuBsCrIbE"), CommandIntent::Subscribe);
    assert_eq!(CommandIntent::classify("UnSubscribe"), CommandIntent::Unsubscribe);
}

// ----------------------------------------------------------------------------
// Message Construction Tests
// ----------------------------------------------------------------------------

#[test]
fn test_messages_stamped_monotonically() {
    let manual = std::sync::Arc::new(ManualClock::at(10_000));
    let clock = MonotonicTimeSource::from_shared(manual.clone());

    let first = Message::system("welcome", &clock);
    manual.set(9_000);
    let second = Message::echo("hi", &clock);

    assert!(second.created_at >= first.created_at);
    assert_eq!(second.kind, MessageKind::Echo);
    assert_ne!(first.id, second.id);
}
