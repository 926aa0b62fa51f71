//! The caller's message and the per-dispatch envelope built from it.

use std::collections::BTreeMap;
use std::time::SystemTime;

use bytes::Bytes;
use hubwire_core::{AmqpMessage, MessageProperties};
use serde::Deserialize;

use crate::address::DispatchTarget;

/// Application property carrying the delivery acknowledgement request.
pub const ACK_PROPERTY: &str = "iothub-ack";

/// Which delivery feedback the hub should generate for the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Acknowledgement {
    /// No feedback.
    None,
    /// Feedback when the device completes the message.
    Positive,
    /// Feedback when the message expires or is rejected.
    Negative,
    /// Both positive and negative feedback.
    Full,
}

impl Acknowledgement {
    /// Wire value of the `iothub-ack` property.
    pub fn as_str(self) -> &'static str {
        match self {
            Acknowledgement::None => "none",
            Acknowledgement::Positive => "positive",
            Acknowledgement::Negative => "negative",
            Acknowledgement::Full => "full",
        }
    }
}

/// A cloud-to-device message: opaque body plus properties.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Message {
    body: Bytes,
    properties: BTreeMap<String, String>,
    message_id: Option<String>,
    correlation_id: Option<String>,
    user_id: Option<String>,
    expiry_time: Option<SystemTime>,
    ack: Option<Acknowledgement>,
}

impl Message {
    /// Create a message with the given body.
    pub fn new(body: impl Into<Bytes>) -> Self {
        Self {
            body: body.into(),
            ..Self::default()
        }
    }

    /// Add an application property.
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Set the message id.
    pub fn with_message_id(mut self, message_id: impl Into<String>) -> Self {
        self.message_id = Some(message_id.into());
        self
    }

    /// Set the correlation id.
    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    /// Set the user id.
    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Set the absolute expiry time.
    pub fn with_expiry_time(mut self, expiry_time: SystemTime) -> Self {
        self.expiry_time = Some(expiry_time);
        self
    }

    /// Request delivery feedback.
    pub fn with_ack(mut self, ack: Acknowledgement) -> Self {
        self.ack = Some(ack);
        self
    }

    /// Message body.
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Application properties.
    pub fn properties(&self) -> &BTreeMap<String, String> {
        &self.properties
    }

    /// Message id.
    pub fn message_id(&self) -> Option<&str> {
        self.message_id.as_deref()
    }

    /// Correlation id.
    pub fn correlation_id(&self) -> Option<&str> {
        self.correlation_id.as_deref()
    }

    /// Requested acknowledgement.
    pub fn ack(&self) -> Option<Acknowledgement> {
        self.ack
    }
}

/// One message bound to one target. Built once per dispatch, never modified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundEnvelope {
    target: DispatchTarget,
    message: Message,
}

impl OutboundEnvelope {
    /// Bind a message to a target.
    pub fn new(target: DispatchTarget, message: Message) -> Self {
        Self { target, message }
    }

    /// Recipient.
    pub fn target(&self) -> &DispatchTarget {
        &self.target
    }

    /// Message being dispatched.
    pub fn message(&self) -> &Message {
        &self.message
    }

    /// Serialize into the engine's native message.
    ///
    /// Body and application properties are copied verbatim; `to` carries the
    /// resolved endpoint path.
    pub fn to_amqp(&self) -> AmqpMessage {
        let message = &self.message;
        let mut application_properties = message.properties.clone();
        if let Some(ack) = message.ack {
            application_properties.insert(ACK_PROPERTY.to_string(), ack.as_str().to_string());
        }

        AmqpMessage {
            properties: MessageProperties {
                message_id: message.message_id.clone(),
                to: Some(self.target.endpoint_path()),
                correlation_id: message.correlation_id.clone(),
                user_id: message.user_id.clone().map(Bytes::from),
                absolute_expiry_time: message.expiry_time,
            },
            application_properties,
            body: message.body.clone(),
        }
    }
}
