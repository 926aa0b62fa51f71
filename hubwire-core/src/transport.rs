//! Transport selection for the engine's single connection.

use serde::Deserialize;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Port used by AMQP over TCP+TLS.
pub const AMQPS_PORT: u16 = 5671;

/// Port used by AMQP over WebSocket.
pub const AMQPS_WS_PORT: u16 = 443;

/// HTTP path of the WebSocket upgrade endpoint.
pub const WEBSOCKET_PATH: &str = "/$iothub/websocket";

/// How the engine reaches the remote host.
///
/// Deserializes from the same names [`FromStr`] accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(try_from = "String")]
pub enum TransportKind {
    /// AMQP 1.0 over TCP with TLS.
    Amqps,
    /// AMQP 1.0 tunnelled through a WebSocket.
    AmqpsWs,
}

impl TransportKind {
    /// Remote port for this transport.
    pub fn port(self) -> u16 {
        match self {
            TransportKind::Amqps => AMQPS_PORT,
            TransportKind::AmqpsWs => AMQPS_WS_PORT,
        }
    }

    /// WebSocket upgrade path, if the transport tunnels through one.
    pub fn websocket_path(self) -> Option<&'static str> {
        match self {
            TransportKind::Amqps => None,
            TransportKind::AmqpsWs => Some(WEBSOCKET_PATH),
        }
    }

    /// Canonical lowercase name.
    pub fn as_str(self) -> &'static str {
        match self {
            TransportKind::Amqps => "amqps",
            TransportKind::AmqpsWs => "amqps_ws",
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown transport name.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown transport kind: {0}")]
pub struct UnknownTransportKind(pub String);

impl FromStr for TransportKind {
    type Err = UnknownTransportKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "amqps" => Ok(TransportKind::Amqps),
            "amqps_ws" | "amqps-ws" => Ok(TransportKind::AmqpsWs),
            _ => Err(UnknownTransportKind(s.to_string())),
        }
    }
}

impl TryFrom<String> for TransportKind {
    type Error = UnknownTransportKind;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_is_case_insensitive() {
        assert_eq!("AMQPS".parse(), Ok(TransportKind::Amqps));
        assert_eq!("amqps_ws".parse(), Ok(TransportKind::AmqpsWs));
        assert_eq!(
            "mqtt".parse::<TransportKind>(),
            Err(UnknownTransportKind("mqtt".to_string()))
        );
    }

    #[test]
    fn deserialize_accepts_every_parseable_name() {
        for (name, expected) in [
            ("amqps", TransportKind::Amqps),
            ("Amqps", TransportKind::Amqps),
            ("AMQPS_WS", TransportKind::AmqpsWs),
            ("AmqpS_Ws", TransportKind::AmqpsWs),
            ("amqps-ws", TransportKind::AmqpsWs),
        ] {
            let json = format!("\"{name}\"");
            let kind: TransportKind = serde_json::from_str(&json).expect("known transport");
            assert_eq!(kind, expected, "{name}");
            assert_eq!(name.parse::<TransportKind>(), Ok(expected));
        }
    }

    #[test]
    fn deserialize_rejects_unknown_name() {
        let err = serde_json::from_str::<TransportKind>("\"mqtt\"").expect_err("unknown");
        assert!(err.to_string().contains("unknown transport kind: mqtt"));
    }

    #[test]
    fn websocket_uses_https_port_and_path() {
        assert_eq!(TransportKind::AmqpsWs.port(), 443);
        assert_eq!(
            TransportKind::AmqpsWs.websocket_path(),
            Some("/$iothub/websocket")
        );
        assert_eq!(TransportKind::Amqps.port(), 5671);
        assert_eq!(TransportKind::Amqps.websocket_path(), None);
    }
}
