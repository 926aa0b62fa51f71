//! # hubwire-core
//!
//! Engine seam for the hubwire dispatch client.
//!
//! The AMQP 1.0 engine that owns the socket is an external collaborator.
//! This crate describes the contract between that engine and the code that
//! drives it:
//!
//! - [`ProtocolEngine`] / [`EngineFactory`]: a run-to-completion event loop
//!   and a way to get a fresh one per dispatch
//! - [`EventHandler`] / [`EngineOps`]: the callback and command halves of
//!   the handler contract
//! - [`AmqpMessage`], [`DeliveryState`], [`ErrorCondition`]: the engine's
//!   native message and settlement model
//! - [`TimeProvider`]: clock and deadline abstraction
//!
//! Real engines and the simulated engine in `hubwire-sim` implement the same
//! traits, so the dispatch state machine never knows which one it talks to.

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]

mod engine;
mod message;
mod time;
mod transport;

pub use engine::{
    ConnectionId, ConnectionRequest, DeliveryTag, EngineError, EngineEvent, EngineFactory,
    EngineOps, EventHandler, LinkId, ProtocolEngine, SenderLinkRequest, SessionId,
};
pub use message::{conditions, AmqpMessage, DeliveryState, ErrorCondition, MessageProperties};
pub use time::{TimeError, TimeProvider, TokioTimeProvider};
pub use transport::{
    TransportKind, UnknownTransportKind, AMQPS_PORT, AMQPS_WS_PORT, WEBSOCKET_PATH,
};
