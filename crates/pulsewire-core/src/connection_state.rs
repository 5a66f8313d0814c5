//! Connection State Machine
//!
//! Four states with an explicit transition table. Idempotent requests
//! (connect while connected, disconnect while disconnected) come back as
//! [`TransitionOutcome::Unchanged`] rather than errors. Events that make no
//! sense from the current state are rejected with
//! [`StateTransitionError::InvalidTransition`].

use crate::errors::StateTransitionError;
use crate::types::{TimeSource, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use tracing::debug;

/// Number of audit entries retained by the state machine
pub const AUDIT_TRAIL_CAPACITY: usize = 256;

// ----------------------------------------------------------------------------
// Connection Status
// ----------------------------------------------------------------------------

/// Observable connection status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    /// Reserved for link failures reported by a transport backend
    Error,
}

impl ConnectionStatus {
    pub fn name(&self) -> &'static str {
        match self {
            ConnectionStatus::Disconnected => "Disconnected",
            ConnectionStatus::Connecting => "Connecting",
            ConnectionStatus::Connected => "Connected",
            ConnectionStatus::Error => "Error",
        }
    }

    /// Whether messages may be sent in this status
    pub fn can_send_messages(&self) -> bool {
        matches!(self, ConnectionStatus::Connected)
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ----------------------------------------------------------------------------
// State Transition Events
// ----------------------------------------------------------------------------

/// Events that drive the state machine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionEvent {
    /// Caller requested a connection
    Connect,
    /// Handshake completed
    HandshakeSucceeded,
    /// Handshake rejected by the link backend
    HandshakeFailed { reason: String },
    /// Established link dropped underneath us
    LinkFailed { reason: String },
    /// Caller requested a disconnect
    Disconnect,
}

impl ConnectionEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ConnectionEvent::Connect => "Connect",
            ConnectionEvent::HandshakeSucceeded => "HandshakeSucceeded",
            ConnectionEvent::HandshakeFailed { .. } => "HandshakeFailed",
            ConnectionEvent::LinkFailed { .. } => "LinkFailed",
            ConnectionEvent::Disconnect => "Disconnect",
        }
    }
}

impl fmt::Display for ConnectionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ----------------------------------------------------------------------------
// Transition Table
// ----------------------------------------------------------------------------

/// Result of looking an event up in the transition table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionOutcome {
    /// Status moves to a new value
    Moved {
        from: ConnectionStatus,
        to: ConnectionStatus,
    },
    /// Idempotent request; status is left as is
    Unchanged(ConnectionStatus),
}

impl TransitionOutcome {
    /// Status after the transition
    pub fn status(&self) -> ConnectionStatus {
        match self {
            TransitionOutcome::Moved { to, .. } => *to,
            TransitionOutcome::Unchanged(status) => *status,
        }
    }

    pub fn is_unchanged(&self) -> bool {
        matches!(self, TransitionOutcome::Unchanged(_))
    }
}

/// Pure transition table lookup
pub fn next_status(
    from: ConnectionStatus,
    event: &ConnectionEvent,
) -> Result<TransitionOutcome, StateTransitionError> {
    use ConnectionEvent as E;
    use ConnectionStatus as S;

    let to = match (from, event) {
        (S::Disconnected, E::Connect) | (S::Error, E::Connect) => S::Connecting,
        (S::Connecting, E::Connect) | (S::Connected, E::Connect) => {
            return Ok(TransitionOutcome::Unchanged(from))
        }

        (S::Connecting, E::HandshakeSucceeded) => S::Connected,
        (S::Connecting, E::HandshakeFailed { .. }) => S::Disconnected,

        (S::Connected, E::LinkFailed { .. }) => S::Error,
        (S::Error, E::LinkFailed { .. }) => return Ok(TransitionOutcome::Unchanged(from)),

        (S::Disconnected, E::Disconnect) => return Ok(TransitionOutcome::Unchanged(from)),
        (_, E::Disconnect) => S::Disconnected,

        (from, event) => {
            return Err(StateTransitionError::InvalidTransition {
                from,
                event: event.clone(),
            })
        }
    };

    Ok(TransitionOutcome::Moved { from, to })
}

// ----------------------------------------------------------------------------
// Audit Trail
// ----------------------------------------------------------------------------

/// Audit trail entry for an applied transition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: Timestamp,
    pub from: ConnectionStatus,
    pub to: ConnectionStatus,
    pub event: ConnectionEvent,
}

/// Counters kept by the state machine
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionStats {
    /// Transitions that moved the status
    pub applied: u64,
    /// Idempotent requests that left the status alone
    pub unchanged: u64,
    /// Events rejected as illegal
    pub rejected: u64,
    /// Completed handshakes
    pub sessions_opened: u64,
}

// ----------------------------------------------------------------------------
// State Machine
// ----------------------------------------------------------------------------

/// Guarded owner of the current connection status
#[derive(Debug, Clone)]
pub struct ConnectionStateMachine {
    status: ConnectionStatus,
    audit_trail: VecDeque<AuditEntry>,
    stats: TransitionStats,
}

impl Default for ConnectionStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionStateMachine {
    /// Start in `Disconnected`
    pub fn new() -> Self {
        Self {
            status: ConnectionStatus::Disconnected,
            audit_trail: VecDeque::with_capacity(AUDIT_TRAIL_CAPACITY),
            stats: TransitionStats::default(),
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    /// Apply an event, recording an audit entry when the status moves
    pub fn apply(
        &mut self,
        event: ConnectionEvent,
        clock: &dyn TimeSource,
    ) -> Result<TransitionOutcome, StateTransitionError> {
        let outcome = match next_status(self.status, &event) {
            Ok(outcome) => outcome,
            Err(err) => {
                self.stats.rejected += 1;
                debug!(from = %self.status, event = event.name(), "Transition rejected");
                return Err(err);
            }
        };

        match outcome {
            TransitionOutcome::Moved { from, to } => {
                if matches!(event, ConnectionEvent::HandshakeSucceeded) {
                    self.stats.sessions_opened += 1;
                }
                self.status = to;
                self.stats.applied += 1;
                if self.audit_trail.len() == AUDIT_TRAIL_CAPACITY {
                    self.audit_trail.pop_front();
                }
                self.audit_trail.push_back(AuditEntry {
                    timestamp: clock.now(),
                    from,
                    to,
                    event,
                });
            }
            TransitionOutcome::Unchanged(_) => {
                self.stats.unchanged += 1;
            }
        }

        Ok(outcome)
    }

    /// Most recent audit entries, oldest first
    pub fn recent_audit_entries(&self, limit: usize) -> Vec<AuditEntry> {
        let skip = self.audit_trail.len().saturating_sub(limit);
        self.audit_trail.iter().skip(skip).cloned().collect()
    }

    pub fn stats(&self) -> &TransitionStats {
        &self.stats
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SystemTimeSource;

    fn reason() -> String {
        "link reset".to_string()
    }

    #[test]
    fn test_initial_state() {
        let machine = ConnectionStateMachine::new();
        assert_eq!(machine.status(), ConnectionStatus::Disconnected);
        assert!(!machine.status().can_send_messages());
        assert!(machine.recent_audit_entries(10).is_empty());
    }

    #[test]
    fn test_connection_flow() {
        let mut machine = ConnectionStateMachine::new();
        let clock = SystemTimeSource;

        let outcome = machine.apply(ConnectionEvent::Connect, &clock).unwrap();
        assert_eq!(
            outcome,
            TransitionOutcome::Moved {
                from: ConnectionStatus::Disconnected,
                to: ConnectionStatus::Connecting
            }
        );

        machine
            .apply(ConnectionEvent::HandshakeSucceeded, &clock)
            .unwrap();
        assert_eq!(machine.status(), ConnectionStatus::Connected);
        assert!(machine.status().can_send_messages());

        machine.apply(ConnectionEvent::Disconnect, &clock).unwrap();
        assert_eq!(machine.status(), ConnectionStatus::Disconnected);

        let audit = machine.recent_audit_entries(10);
        assert_eq!(audit.len(), 3);
        assert_eq!(audit[0].from, ConnectionStatus::Disconnected);
        assert_eq!(audit[2].to, ConnectionStatus::Disconnected);
        assert_eq!(machine.stats().sessions_opened, 1);
    }

    #[test]
    fn test_idempotent_requests_are_unchanged() {
        let mut machine = ConnectionStateMachine::new();
        let clock = SystemTimeSource;

        let outcome = machine.apply(ConnectionEvent::Disconnect, &clock).unwrap();
        assert!(outcome.is_unchanged());

        machine.apply(ConnectionEvent::Connect, &clock).unwrap();
        machine
            .apply(ConnectionEvent::HandshakeSucceeded, &clock)
            .unwrap();
        let outcome = machine.apply(ConnectionEvent::Connect, &clock).unwrap();
        assert_eq!(outcome, TransitionOutcome::Unchanged(ConnectionStatus::Connected));

        assert_eq!(machine.stats().unchanged, 2);
        assert_eq!(machine.recent_audit_entries(10).len(), 2);
    }

    #[test]
    fn test_invalid_transition() {
        let mut machine = ConnectionStateMachine::new();
        let result = machine.apply(ConnectionEvent::HandshakeSucceeded, &SystemTimeSource);

        match result {
            Err(StateTransitionError::InvalidTransition { from, event }) => {
                assert_eq!(from, ConnectionStatus::Disconnected);
                assert_eq!(event, ConnectionEvent::HandshakeSucceeded);
            }
            other => panic!("Expected InvalidTransition, got {:?}", other),
        }
        assert_eq!(machine.status(), ConnectionStatus::Disconnected);
        assert_eq!(machine.stats().rejected, 1);
    }

    #[test]
    fn test_handshake_failure_returns_to_disconnected() {
        let outcome = next_status(
            ConnectionStatus::Connecting,
            &ConnectionEvent::HandshakeFailed { reason: reason() },
        )
        .unwrap();
        assert_eq!(outcome.status(), ConnectionStatus::Disconnected);
    }

    #[test]
    fn test_error_state_is_reachable_and_recoverable() {
        let mut machine = ConnectionStateMachine::new();
        let clock = SystemTimeSource;

        machine.apply(ConnectionEvent::Connect, &clock).unwrap();
        machine
            .apply(ConnectionEvent::HandshakeSucceeded, &clock)
            .unwrap();
        machine
            .apply(ConnectionEvent::LinkFailed { reason: reason() }, &clock)
            .unwrap();
        assert_eq!(machine.status(), ConnectionStatus::Error);

        // A second failure report is idempotent
        let outcome = machine
            .apply(ConnectionEvent::LinkFailed { reason: reason() }, &clock)
            .unwrap();
        assert!(outcome.is_unchanged());

        machine.apply(ConnectionEvent::Connect, &clock).unwrap();
        assert_eq!(machine.status(), ConnectionStatus::Connecting);
    }

    #[test]
    fn test_disconnect_from_any_active_state() {
        for from in [
            ConnectionStatus::Connecting,
            ConnectionStatus::Connected,
            ConnectionStatus::Error,
        ] {
            let outcome = next_status(from, &ConnectionEvent::Disconnect).unwrap();
            assert_eq!(
                outcome,
                TransitionOutcome::Moved {
                    from,
                    to: ConnectionStatus::Disconnected
                }
            );
        }
    }

    #[test]
    fn test_link_failure_only_from_connected() {
        for from in [ConnectionStatus::Disconnected, ConnectionStatus::Connecting] {
            assert!(next_status(from, &ConnectionEvent::LinkFailed { reason: reason() }).is_err());
        }
    }

    #[test]
    fn test_audit_trail_is_bounded() {
        let mut machine = ConnectionStateMachine::new();
        let clock = SystemTimeSource;

        for _ in 0..AUDIT_TRAIL_CAPACITY {
            machine.apply(ConnectionEvent::Connect, &clock).unwrap();
            machine.apply(ConnectionEvent::Disconnect, &clock).unwrap();
        }

        let audit = machine.recent_audit_entries(usize::MAX);
        assert_eq!(audit.len(), AUDIT_TRAIL_CAPACITY);
        assert_eq!(machine.stats().applied, 2 * AUDIT_TRAIL_CAPACITY as u64);
    }
}
