//! # hubwire
//!
//! Synchronous cloud-to-device message dispatch over an event-driven AMQP
//! engine.
//!
//! A [`DispatchSender`] turns "send this message to that device" into one
//! blocking call. Under the hood every call gets its own engine run and its
//! own [`DispatchHandler`], which opens a connection, a session and a sender
//! link, transfers the message exactly once, waits for the settlement and
//! closes everything again before the call returns.
//!
//! ```text
//!  caller thread                     engine thread
//!  ─────────────                     ─────────────
//!  dispatch() ── lock slot
//!     │ build envelope + handler
//!     │ spawn ───────────────────►  ReactorInit → open connection
//!     │                             ConnectionRemoteOpen → session + link
//!     │                             LinkFlow → send once
//!     │                             Delivery → outcome, close link/session/connection
//!     │ join ◄───────────────────   loop returns (no open endpoints)
//!     │ translate outcome
//!  unlock slot
//! ```
//!
//! The engine itself is any [`hubwire_core::ProtocolEngine`]; the
//! `hubwire-sim` crate provides a scripted one for tests.
//!
//! ## Addressing
//!
//! - device: `/devices/{deviceId}/messages/devicebound`
//! - module: `/devices/{deviceId}/modules/{moduleId}/messages/devicebound`
//!
//! ## Errors
//!
//! Every failure is a [`DispatchError`]. Nothing is retried here; a timeout
//! is a transport error whose cause is [`TransportCause::Timeout`].

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]

mod address;
mod completion;
mod config;
mod error;
mod handler;
mod message;
mod metrics;
mod params;
mod sender;

pub use address::{device_endpoint, module_endpoint, DispatchTarget};
pub use completion::{complete, translate_failure};
pub use config::DispatchConfig;
pub use error::{DispatchError, DispatchResult, ErrorKind, TransportCause};
pub use handler::{DispatchHandler, DispatchOutcome, DispatchState, FailureSignal};
pub use message::{Acknowledgement, Message, OutboundEnvelope, ACK_PROPERTY};
pub use metrics::SenderMetrics;
pub use params::{ConnectionParameters, ConnectionParametersBuilder};
pub use sender::DispatchSender;

pub use hubwire_core::{DeliveryState, ErrorCondition, TransportKind};
