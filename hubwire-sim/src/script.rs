//! Scripted peer behavior for the simulated engine.

use std::time::Duration;

use hubwire_core::{conditions, DeliveryState, EngineError, ErrorCondition};

/// How the simulated remote peer reacts once the handler starts talking to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerBehavior {
    /// Open everything, grant credit, then settle the delivery with the given state.
    Settle(DeliveryState),

    /// Fail the transport as soon as a connection is requested (socket refused).
    RefuseConnection(ErrorCondition),

    /// Close the connection with an error instead of opening it (e.g. SASL failure).
    CloseConnection(ErrorCondition),

    /// Attach the link, then detach it with an error before granting credit.
    DetachLink(ErrorCondition),

    /// Accept the transfer on the wire, then lose the transport before settling.
    DropAfterSend(ErrorCondition),

    /// Open everything and accept the transfer but never settle it.
    Hang,

    /// Make the engine loop itself fail right after the connection is requested.
    FailEngine(EngineError),
}

/// Script driving one simulated engine run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimScript {
    /// Remote peer behavior.
    pub peer: PeerBehavior,

    /// Credit granted on attach.
    pub credit: u32,

    /// Additional `LinkFlow` events sent after the first one.
    pub extra_flows: u32,

    /// Delay before each event is handed to the handler.
    pub latency: Duration,
}

impl Default for SimScript {
    fn default() -> Self {
        Self {
            peer: PeerBehavior::Settle(DeliveryState::Accepted),
            credit: 1,
            extra_flows: 0,
            latency: Duration::ZERO,
        }
    }
}

impl SimScript {
    /// Peer that accepts the delivery.
    pub fn accepting() -> Self {
        Self::default()
    }

    /// Peer that rejects the delivery with the given condition and description.
    pub fn rejecting(condition: &str, description: &str) -> Self {
        Self::with_peer(PeerBehavior::Settle(DeliveryState::Rejected(Some(
            ErrorCondition::new(condition).with_description(description),
        ))))
    }

    /// Peer that refuses the TCP connection.
    pub fn refusing() -> Self {
        Self::with_peer(PeerBehavior::RefuseConnection(
            ErrorCondition::new(conditions::IO).with_description("Connection refused"),
        ))
    }

    /// Peer that rejects the credentials.
    pub fn unauthorized() -> Self {
        Self::with_peer(PeerBehavior::CloseConnection(
            ErrorCondition::new(conditions::UNAUTHORIZED_ACCESS)
                .with_description("SAS token expired"),
        ))
    }

    /// Engine whose loop dies with an I/O error once the connection is requested.
    pub fn failing_engine(message: &str) -> Self {
        Self::with_peer(PeerBehavior::FailEngine(EngineError::Io(message.to_string())))
    }

    /// Peer that never settles.
    pub fn hanging() -> Self {
        Self::with_peer(PeerBehavior::Hang)
    }

    /// Script with the given peer behavior and default link settings.
    pub fn with_peer(peer: PeerBehavior) -> Self {
        Self {
            peer,
            ..Self::default()
        }
    }

    /// Set the per-event latency.
    pub fn latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Set the credit granted on attach.
    pub fn credit(mut self, credit: u32) -> Self {
        self.credit = credit;
        self
    }

    /// Send additional flow events after the first.
    pub fn extra_flows(mut self, extra_flows: u32) -> Self {
        self.extra_flows = extra_flows;
        self
    }
}
