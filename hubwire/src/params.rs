//! Immutable connection parameters.

use std::fmt;

use hubwire_core::{ConnectionRequest, TransportKind};

use crate::config::DispatchConfig;
use crate::error::{DispatchError, DispatchResult};

/// Host, identity, access token and transport for one hub.
///
/// Validated once at construction and never mutated afterwards.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionParameters {
    host: String,
    identity_name: String,
    access_token: String,
    transport: TransportKind,
}

impl ConnectionParameters {
    /// Create connection parameters, rejecting empty strings.
    pub fn new(
        host: impl Into<String>,
        identity_name: impl Into<String>,
        access_token: impl Into<String>,
        transport: TransportKind,
    ) -> DispatchResult<Self> {
        Self::builder()
            .host(host)
            .identity_name(identity_name)
            .access_token(access_token)
            .transport(transport)
            .build()
    }

    /// Start building connection parameters field by field.
    pub fn builder() -> ConnectionParametersBuilder {
        ConnectionParametersBuilder::default()
    }

    /// Remote host name.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Identity used as SASL username.
    pub fn identity_name(&self) -> &str {
        &self.identity_name
    }

    /// Access token used as SASL password.
    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    /// Transport selector.
    pub fn transport(&self) -> TransportKind {
        self.transport
    }

    /// Derive the engine's connection request.
    pub fn connection_request(&self, config: &DispatchConfig) -> ConnectionRequest {
        ConnectionRequest {
            host: self.host.clone(),
            port: self.transport.port(),
            username: self.identity_name.clone(),
            password: self.access_token.clone(),
            transport: self.transport,
            websocket_path: self.transport.websocket_path().map(str::to_string),
            idle_timeout: config.idle_timeout,
        }
    }
}

impl fmt::Debug for ConnectionParameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionParameters")
            .field("host", &self.host)
            .field("identity_name", &self.identity_name)
            .field("access_token", &"<redacted>")
            .field("transport", &self.transport)
            .finish()
    }
}

/// Builder for [`ConnectionParameters`].
#[derive(Debug, Default, Clone)]
pub struct ConnectionParametersBuilder {
    host: Option<String>,
    identity_name: Option<String>,
    access_token: Option<String>,
    transport: Option<TransportKind>,
}

impl ConnectionParametersBuilder {
    /// Set the host.
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Set the identity name.
    pub fn identity_name(mut self, identity_name: impl Into<String>) -> Self {
        self.identity_name = Some(identity_name.into());
        self
    }

    /// Set the access token.
    pub fn access_token(mut self, access_token: impl Into<String>) -> Self {
        self.access_token = Some(access_token.into());
        self
    }

    /// Set the transport.
    pub fn transport(mut self, transport: TransportKind) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Validate and build.
    pub fn build(self) -> DispatchResult<ConnectionParameters> {
        Ok(ConnectionParameters {
            host: required(self.host, "host")?,
            identity_name: required(self.identity_name, "identity name")?,
            access_token: required(self.access_token, "access token")?,
            transport: self
                .transport
                .ok_or_else(|| DispatchError::invalid("transport kind must be set"))?,
        })
    }
}

fn required(value: Option<String>, field: &str) -> DispatchResult<String> {
    match value {
        Some(value) if !value.is_empty() => Ok(value),
        _ => Err(DispatchError::invalid(format!("{field} must not be empty"))),
    }
}
