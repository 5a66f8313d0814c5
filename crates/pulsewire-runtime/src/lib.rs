//! PulseWire Runtime
//!
//! Async orchestration for the simulated real-time channel client:
//!
//! - `ChannelClient`: connect / disconnect / send over a simulated link
//! - `BackgroundSupervisor`: liveness pulse and event feed for a session
//! - `LinkBackend`: handshake seam, with `SimulatedLink` as the default
//! - `ChannelClientBuilder`: construction and test conveniences
//!
//! Core types (messages, state machine, bus, config) come from
//! `pulsewire-core` and are re-exported here.

// ----------------------------------------------------------------------------
// Module Declarations
// ----------------------------------------------------------------------------

pub mod backend;
pub mod builder;
pub mod client;
pub mod supervisor;
pub mod tasks;

// ----------------------------------------------------------------------------
// Public API
// ----------------------------------------------------------------------------

pub use backend::{LinkBackend, SimulatedLink};
pub use builder::{create_demo_client, create_test_client, ChannelClientBuilder};
pub use client::{ChannelClient, ClientStats, FAREWELL_MESSAGE, WELCOME_MESSAGE};
pub use supervisor::{BackgroundSupervisor, SupervisorReport, TaskReport};
pub use tasks::{EventFeedTask, LivenessPulseTask, SharedRandom, TaskContext, TaskError};

pub use pulsewire_core::{
    ClientConfig, ClientError, ClientResult, ConnectionStatus, Message, MessageKind,
    MessageSubscription, PublishMode, SimulationTiming, SubscriptionError,
};
