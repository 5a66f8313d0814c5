//! PulseWire Core
//!
//! Foundational types for the PulseWire simulated real-time channel client:
//! the message entity, the connection state machine, the response generator,
//! the inbound message bus and the client configuration. Everything here is
//! runtime-agnostic except for the tokio `sync` primitives the bus uses.
//!
//! The async orchestration (background tasks, supervisor, client façade)
//! lives in `pulsewire-runtime`.

// ----------------------------------------------------------------------------
// Module Declarations
// ----------------------------------------------------------------------------

pub mod bus;
pub mod config;
pub mod connection_state;
pub mod errors;
pub mod message;
pub mod random;
pub mod responder;
pub mod types;

// ----------------------------------------------------------------------------
// Public API
// ----------------------------------------------------------------------------

pub use bus::{MessageBus, MessageSubscription, PublishMode, SubscriptionError};
pub use config::{ClientConfig, SimulationTiming, DEFAULT_NOTIFICATION_ROTATION};
pub use connection_state::{
    next_status, AuditEntry, ConnectionEvent, ConnectionStateMachine, ConnectionStatus,
    TransitionOutcome, TransitionStats,
};
pub use errors::{ClientError, ClientResult, ConfigError, StateTransitionError};
pub use message::{Message, MessageKind};
pub use random::{source_from_seed, RandomSource, SeededRandom, SystemRandom};
pub use responder::{generate_response, CommandIntent, ResponseContext, StatusReport};
pub use types::{
    saturating_millis, MessageId, MonotonicTimeSource, SystemTimeSource, TaskHealthStatus, TaskId,
    TimeSource, Timestamp,
};
