//! Caller-facing error taxonomy for dispatch operations.

use thiserror::Error;

/// Why a transport-level failure happened.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportCause {
    /// The remote host refused the socket.
    #[error("connection refused: {0}")]
    ConnectionRefused(String),

    /// The remote peer rejected the credentials.
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// The connection or session was closed before settlement.
    #[error("connection lost: {0}")]
    ConnectionLost(String),

    /// The sender link was detached before settlement.
    #[error("link detached: {0}")]
    LinkDetached(String),

    /// No settlement arrived before the deadline.
    #[error("deadline exceeded waiting for settlement")]
    Timeout,

    /// The engine itself failed or stopped early.
    #[error("engine failure: {0}")]
    Engine(String),
}

/// Errors returned by the dispatch client.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// An argument was empty or otherwise unusable.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The sender was used before `open` or after `close`.
    #[error("dispatch sender is not initialized, call open before dispatch")]
    NotInitialized,

    /// The remote endpoint explicitly refused the delivery.
    #[error("service rejected the message: {0}")]
    ServiceRejected(String),

    /// The transport failed before the delivery was settled.
    #[error("transport error: {0}")]
    TransportError(#[from] TransportCause),
}

/// Flat classification of [`DispatchError`], convenient for matching and metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// See [`DispatchError::InvalidArgument`].
    InvalidArgument,
    /// See [`DispatchError::NotInitialized`].
    NotInitialized,
    /// See [`DispatchError::ServiceRejected`].
    ServiceRejected,
    /// See [`DispatchError::TransportError`], except timeouts.
    TransportError,
    /// A [`DispatchError::TransportError`] caused by [`TransportCause::Timeout`].
    Timeout,
}

impl DispatchError {
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        DispatchError::InvalidArgument(message.into())
    }

    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            DispatchError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            DispatchError::NotInitialized => ErrorKind::NotInitialized,
            DispatchError::ServiceRejected(_) => ErrorKind::ServiceRejected,
            DispatchError::TransportError(TransportCause::Timeout) => ErrorKind::Timeout,
            DispatchError::TransportError(_) => ErrorKind::TransportError,
        }
    }

    /// Whether the deadline expired.
    pub fn is_timeout(&self) -> bool {
        self.kind() == ErrorKind::Timeout
    }
}

/// Result type for dispatch operations.
pub type DispatchResult<T> = Result<T, DispatchError>;
