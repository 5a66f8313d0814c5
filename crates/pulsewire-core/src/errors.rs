//! Error types for the PulseWire channel client
//!
//! The simulated core only has two caller-facing failure kinds (`InvalidState`
//! and `EmptyInput`). The remaining variants cover the transport seam, shutdown
//! and configuration, and are unified under [`ClientError`].

use crate::connection_state::{ConnectionEvent, ConnectionStatus};

// ----------------------------------------------------------------------------
// State Transition Errors
// ----------------------------------------------------------------------------

/// Errors raised by the connection state machine
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StateTransitionError {
    /// The event is not legal from the current status
    #[error("Invalid transition from {from} on event {event}")]
    InvalidTransition {
        from: ConnectionStatus,
        event: ConnectionEvent,
    },
}

// ----------------------------------------------------------------------------
// Configuration Errors
// ----------------------------------------------------------------------------

/// Errors reported by [`crate::config::ClientConfig::validate`]
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("{field} must be greater than zero")]
    ZeroDuration { field: &'static str },
    #[error("{field} range is inverted: min {min_ms}ms > max {max_ms}ms")]
    InvertedRange {
        field: &'static str,
        min_ms: u64,
        max_ms: u64,
    },
    #[error("Notification rotation cannot be empty")]
    EmptyRotation,
    #[error("Notification rotation entry {index} is blank")]
    BlankRotationEntry { index: usize },
    #[error("Broadcast capacity cannot be zero")]
    ZeroBroadcastCapacity,
}

// ----------------------------------------------------------------------------
// Client Errors
// ----------------------------------------------------------------------------

/// Unified error type for channel client operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientError {
    /// Operation attempted in a status that forbids it
    #[error("Cannot {operation} while {status}")]
    InvalidState {
        operation: &'static str,
        status: ConnectionStatus,
    },

    /// `send` called with blank or whitespace-only text
    #[error("Message text is empty")]
    EmptyInput,

    /// The link backend rejected the handshake
    #[error("Handshake with {backend} failed: {reason}")]
    HandshakeFailed {
        backend: &'static str,
        reason: String,
    },

    /// An in-flight handshake was cut short by disconnect or close
    #[error("Connection attempt was aborted")]
    ConnectionAborted,

    /// The client has been closed
    #[error("Client is closed")]
    Closed,

    #[error("State transition error: {0}")]
    StateTransition(#[from] StateTransitionError),

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),
}

// ----------------------------------------------------------------------------
// Convenience Error Constructors
// ----------------------------------------------------------------------------

impl ClientError {
    /// Create an invalid state error for the named operation
    pub fn invalid_state(operation: &'static str, status: ConnectionStatus) -> Self {
        ClientError::InvalidState { operation, status }
    }

    /// Create a handshake failure for the named backend
    pub fn handshake_failed<R: Into<String>>(backend: &'static str, reason: R) -> Self {
        ClientError::HandshakeFailed {
            backend,
            reason: reason.into(),
        }
    }

    /// Whether retrying the same call later could succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ClientError::InvalidState { .. }
                | ClientError::HandshakeFailed { .. }
                | ClientError::ConnectionAborted
        )
    }
}

// ----------------------------------------------------------------------------
// Type Aliases
// ----------------------------------------------------------------------------

pub type ClientResult<T> = core::result::Result<T, ClientError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_state_display() {
        let err = ClientError::invalid_state("send", ConnectionStatus::Disconnected);
        assert_eq!(err.to_string(), "Cannot send while Disconnected");
        assert!(err.is_retryable());
    }

    #[test]
    fn test_transition_error_conversion() {
        let err: ClientError = StateTransitionError::InvalidTransition {
            from: ConnectionStatus::Disconnected,
            event: ConnectionEvent::HandshakeSucceeded,
        }
        .into();

        assert!(matches!(err, ClientError::StateTransition(_)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_empty_input_is_not_retryable() {
        assert!(!ClientError::EmptyInput.is_retryable());
        assert!(!ClientError::Closed.is_retryable());
    }
}
