//! The protocol engine seam.
//!
//! An engine owns one network connection and runs a single-threaded,
//! run-to-completion event loop. Every lifecycle change is delivered to the
//! registered [`EventHandler`] as an [`EngineEvent`]; the handler reacts by
//! calling back into the engine through [`EngineOps`]. The loop returns once
//! no endpoint (connection, session or link) is left open.
//!
//! ```text
//!   ProtocolEngine::run ──► EngineEvent ──► EventHandler::on_event
//!          ▲                                        │
//!          └──────────── EngineOps calls ◄──────────┘
//! ```

use async_trait::async_trait;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::message::{AmqpMessage, DeliveryState, ErrorCondition};
use crate::transport::TransportKind;

/// Handle to a connection owned by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub u64);

/// Handle to a session within a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(pub u64);

/// Handle to a link within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LinkId(pub u64);

/// Tag identifying one delivery on a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeliveryTag(pub u64);

/// Everything the engine needs to open and authenticate a connection.
///
/// Authentication is SASL PLAIN with the identity as username and the
/// access token as password.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionRequest {
    /// Remote host name.
    pub host: String,
    /// Remote port.
    pub port: u16,
    /// SASL username.
    pub username: String,
    /// SASL password.
    pub password: String,
    /// Transport to reach the host with.
    pub transport: TransportKind,
    /// WebSocket upgrade path when tunnelling.
    pub websocket_path: Option<String>,
    /// Idle timeout advertised to the peer.
    pub idle_timeout: Duration,
}

impl fmt::Debug for ConnectionRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionRequest")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("transport", &self.transport)
            .field("websocket_path", &self.websocket_path)
            .field("idle_timeout", &self.idle_timeout)
            .finish()
    }
}

/// Parameters for attaching a sender link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SenderLinkRequest {
    /// Link name.
    pub name: String,
    /// Target address the link sends to.
    pub target: String,
}

/// Lifecycle events delivered by the engine loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// The loop started. First event of every run.
    ReactorInit,

    /// The peer opened the connection.
    ConnectionRemoteOpen(ConnectionId),

    /// The peer closed the connection.
    ConnectionRemoteClose {
        /// Connection that closed.
        connection: ConnectionId,
        /// Error carried by the close frame, if any.
        error: Option<ErrorCondition>,
    },

    /// The peer began the session.
    SessionRemoteOpen(SessionId),

    /// The peer ended the session.
    SessionRemoteClose {
        /// Session that ended.
        session: SessionId,
        /// Error carried by the end frame, if any.
        error: Option<ErrorCondition>,
    },

    /// The peer attached the link.
    LinkRemoteOpen(LinkId),

    /// The peer granted link credit.
    LinkFlow {
        /// Link receiving credit.
        link: LinkId,
        /// Credit available for new deliveries.
        credit: u32,
    },

    /// The peer detached the link.
    LinkRemoteClose {
        /// Link that detached.
        link: LinkId,
        /// Error carried by the detach frame, if any.
        error: Option<ErrorCondition>,
    },

    /// The peer settled a delivery.
    Delivery {
        /// Link the delivery was sent on.
        link: LinkId,
        /// Tag returned by [`EngineOps::send`].
        tag: DeliveryTag,
        /// Remote outcome.
        state: DeliveryState,
    },

    /// The transport under the connection failed (socket, TLS, SASL).
    TransportError {
        /// Connection whose transport failed.
        connection: ConnectionId,
        /// What went wrong.
        condition: ErrorCondition,
    },
}

/// Operations a handler may invoke on the engine while handling an event.
///
/// All calls are local: they queue frames and return immediately. The
/// corresponding remote acknowledgements arrive later as events.
pub trait EngineOps {
    /// Begin opening a connection.
    fn open_connection(&mut self, request: &ConnectionRequest) -> ConnectionId;

    /// Begin a session on an open connection.
    fn open_session(&mut self, connection: ConnectionId) -> SessionId;

    /// Attach a sender link on a session.
    fn open_sender(&mut self, session: SessionId, link: &SenderLinkRequest) -> LinkId;

    /// Transfer a message on a link with credit.
    fn send(&mut self, link: LinkId, message: AmqpMessage) -> DeliveryTag;

    /// Detach a link.
    fn close_link(&mut self, link: LinkId);

    /// End a session.
    fn close_session(&mut self, session: SessionId);

    /// Close a connection.
    fn close_connection(&mut self, connection: ConnectionId);
}

/// Receiver of engine events. Called only from the engine loop.
pub trait EventHandler {
    /// Handle one event.
    fn on_event(&mut self, event: EngineEvent, ops: &mut dyn EngineOps);
}

/// Errors raised by the engine itself rather than by the remote peer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// The engine could not be created or started.
    #[error("engine failed to start: {0}")]
    Start(String),

    /// Socket-level failure outside of any connection event.
    #[error("engine I/O error: {0}")]
    Io(String),

    /// Internal invariant broken inside the engine.
    #[error("engine internal error: {0}")]
    Internal(String),
}

impl From<std::io::Error> for EngineError {
    fn from(error: std::io::Error) -> Self {
        EngineError::Io(error.to_string())
    }
}

/// A run-to-completion protocol engine.
///
/// Single-core design: the engine and its futures never cross threads.
#[async_trait(?Send)]
pub trait ProtocolEngine {
    /// Drive the event loop until no endpoint is left open.
    async fn run(&mut self, handler: &mut dyn EventHandler) -> Result<(), EngineError>;

    /// Tear down every endpoint immediately without waiting for the peer.
    ///
    /// Called whenever [`run`](ProtocolEngine::run) did not end cleanly: it
    /// was cancelled by a deadline, returned an error, or returned while the
    /// handler had no outcome. Nothing the handler opened stays half-open.
    fn abort(&mut self);
}

/// Creates one engine per dispatch.
///
/// The factory is shared across threads; the engines it creates are not.
pub trait EngineFactory: Send + Sync {
    /// Engine type produced by this factory.
    type Engine: ProtocolEngine;

    /// Create a fresh engine.
    fn create(&self) -> Result<Self::Engine, EngineError>;
}
