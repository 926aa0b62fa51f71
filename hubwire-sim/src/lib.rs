//! # hubwire-sim
//!
//! Deterministic stand-in for the AMQP engine, for testing code written
//! against the `hubwire-core` engine seam.
//!
//! A [`SimScript`] describes how the remote peer behaves: accept, reject,
//! refuse the socket, fail authentication, detach the link, drop the
//! transport after the transfer, never answer, or crash the engine loop.
//! A [`SimEngineFactory`] creates one [`SimEngine`] per dispatch and every
//! engine reports what the handler asked of it to a shared [`SimObserver`].
//!
//! ```ignore
//! use hubwire_sim::{SimEngineFactory, SimScript};
//!
//! let factory = SimEngineFactory::new(SimScript::rejecting("amqp:not-found", "IotHubNotFound"));
//! let observer = factory.observer();
//! // hand `factory` to the dispatch client, then inspect `observer.runs()`
//! ```

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]

mod engine;
mod observer;
mod script;

pub use engine::{SimEngine, SimEngineFactory};
pub use observer::{SimEntity, SimObserver, SimRun};
pub use script::{PeerBehavior, SimScript};
