//! The engine's native message model.
//!
//! These types are what a handler hands to [`EngineOps::send`](crate::EngineOps::send)
//! and what the engine reports back on settlement. Encoding them into AMQP frames
//! is the engine's business.

use bytes::Bytes;
use std::collections::BTreeMap;
use std::fmt;
use std::time::SystemTime;

/// Well-known AMQP error condition symbols.
pub mod conditions {
    /// Credentials were rejected by the remote peer.
    pub const UNAUTHORIZED_ACCESS: &str = "amqp:unauthorized-access";
    /// The addressed node does not exist.
    pub const NOT_FOUND: &str = "amqp:not-found";
    /// A quota or throttling limit was hit.
    pub const RESOURCE_LIMIT_EXCEEDED: &str = "amqp:resource-limit-exceeded";
    /// The peer closed the connection administratively.
    pub const CONNECTION_FORCED: &str = "amqp:connection:forced";
    /// The peer detached the link administratively.
    pub const LINK_DETACH_FORCED: &str = "amqp:link:detach-forced";
    /// The peer hit an internal error.
    pub const INTERNAL_ERROR: &str = "amqp:internal-error";
    /// Service-side operation timeout.
    pub const TIMEOUT: &str = "com.microsoft:timeout";
    /// Socket-level failure raised by the engine's transport.
    pub const IO: &str = "proton:io";
    /// Synthetic condition used when a delivery is released.
    pub const RELEASED: &str = "amqp:released";
    /// Synthetic condition used when a delivery is modified.
    pub const MODIFIED: &str = "amqp:modified";
}

/// An AMQP error condition: a symbolic name plus optional human-readable detail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorCondition {
    /// Symbolic condition, e.g. `amqp:not-found`.
    pub condition: String,
    /// Free-form description supplied by the peer.
    pub description: Option<String>,
}

impl ErrorCondition {
    /// Create a condition without a description.
    pub fn new(condition: impl Into<String>) -> Self {
        Self {
            condition: condition.into(),
            description: None,
        }
    }

    /// Attach a description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Check the symbolic condition.
    pub fn is(&self, condition: &str) -> bool {
        self.condition == condition
    }

    /// Most specific text available: the description if non-empty, otherwise the symbol.
    pub fn reason(&self) -> &str {
        match self.description.as_deref() {
            Some(description) if !description.is_empty() => description,
            _ => &self.condition,
        }
    }
}

impl fmt::Display for ErrorCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.description {
            Some(description) => write!(f, "{}: {}", self.condition, description),
            None => f.write_str(&self.condition),
        }
    }
}

/// Remote outcome of a delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryState {
    /// The peer accepted the message.
    Accepted,
    /// The peer rejected the message.
    Rejected(Option<ErrorCondition>),
    /// The peer released the message without processing it.
    Released,
    /// The peer modified the message and did not accept it.
    Modified {
        /// The delivery attempt counts as failed.
        delivery_failed: bool,
        /// The message must not be redelivered to this peer.
        undeliverable_here: bool,
    },
}

impl DeliveryState {
    /// Whether this is a positive acknowledgement.
    pub fn is_accepted(&self) -> bool {
        matches!(self, DeliveryState::Accepted)
    }
}

/// Bare message properties section.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageProperties {
    /// Application message identifier.
    pub message_id: Option<String>,
    /// Destination address of the message.
    pub to: Option<String>,
    /// Correlation identifier.
    pub correlation_id: Option<String>,
    /// Identity of the user producing the message.
    pub user_id: Option<Bytes>,
    /// Absolute time after which the message is expired.
    pub absolute_expiry_time: Option<SystemTime>,
}

/// A message in the engine's native representation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AmqpMessage {
    /// Properties section.
    pub properties: MessageProperties,
    /// Application properties section.
    pub application_properties: BTreeMap<String, String>,
    /// Binary data body.
    pub body: Bytes,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reason_prefers_description() {
        let err = ErrorCondition::new(conditions::NOT_FOUND).with_description("IotHubNotFound");
        assert_eq!(err.reason(), "IotHubNotFound");
        assert_eq!(err.to_string(), "amqp:not-found: IotHubNotFound");
    }

    #[test]
    fn reason_falls_back_to_symbol() {
        let err = ErrorCondition::new(conditions::NOT_FOUND).with_description("");
        assert_eq!(err.reason(), "amqp:not-found");
        assert!(err.is(conditions::NOT_FOUND));
    }
}
