//! Configuration for dispatch behavior.

use serde::Deserialize;
use std::time::Duration;

/// Configuration for a [`DispatchSender`](crate::DispatchSender).
///
/// Deserializable with every field optional, so it can be embedded in a
/// caller's own configuration file.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Upper bound on one engine run, from start until the loop returns.
    ///
    /// On expiry the engine is force-closed and the dispatch fails with a
    /// timeout.
    pub deadline: Duration,

    /// Name of the sender link attached for each dispatch.
    pub sender_link_name: String,

    /// Idle timeout advertised to the remote peer on open.
    pub idle_timeout: Duration,

    /// Name given to the thread that runs the engine loop.
    pub engine_thread_name: String,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            deadline: Duration::from_secs(60),
            sender_link_name: "sender".to_string(),
            idle_timeout: Duration::from_secs(120),
            engine_thread_name: "hubwire-engine".to_string(),
        }
    }
}

impl DispatchConfig {
    /// Set the engine run deadline.
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    /// Set the sender link name.
    pub fn with_sender_link_name(mut self, name: impl Into<String>) -> Self {
        self.sender_link_name = name.into();
        self
    }

    /// Set the idle timeout advertised to the peer.
    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    /// Create a configuration for a hub on a low-latency network.
    pub fn local_network() -> Self {
        Self {
            deadline: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(30),
            ..Self::default()
        }
    }

    /// Create a configuration for a hub reached over a slow WAN.
    pub fn wan_network() -> Self {
        Self {
            deadline: Duration::from_secs(120),
            idle_timeout: Duration::from_secs(240),
            ..Self::default()
        }
    }
}
