//! Per-dispatch state machine driven by engine events.
//!
//! One [`DispatchHandler`] is created for every dispatch and dropped when the
//! engine loop returns. It walks the lifecycle
//!
//! ```text
//! Idle → ConnectionRequested → ConnectionOpen → LinkAttaching → LinkActive
//!      → DeliverySent → { Settled | Rejected | TransportFailed }
//! ```
//!
//! and only starts closing the link, session and connection (in that order)
//! once it has reached a terminal state, so the loop cannot exit with the
//! outcome still pending.

use std::fmt;

use tracing::debug;

use hubwire_core::{
    conditions, ConnectionId, ConnectionRequest, DeliveryState, DeliveryTag, EngineError,
    EngineEvent, EngineOps, ErrorCondition, EventHandler, LinkId, SenderLinkRequest, SessionId,
};

use crate::message::OutboundEnvelope;

/// Lifecycle position of a [`DispatchHandler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DispatchState {
    /// Created, engine not started yet.
    Idle,
    /// Connection requested, waiting for the peer to open it.
    ConnectionRequested,
    /// Connection open.
    ConnectionOpen,
    /// Session begun and sender link requested.
    LinkAttaching,
    /// Link attached, waiting for credit.
    LinkActive,
    /// Message transferred, waiting for settlement.
    DeliverySent,
    /// Delivery accepted.
    Settled,
    /// Delivery refused by the peer.
    Rejected,
    /// Transport failed before settlement.
    TransportFailed,
}

impl DispatchState {
    /// Whether the dispatch has an outcome.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            DispatchState::Settled | DispatchState::Rejected | DispatchState::TransportFailed
        )
    }
}

/// Something that ended a dispatch before settlement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureSignal {
    /// The transport under the connection failed.
    TransportError(ErrorCondition),
    /// The peer closed the connection.
    ConnectionClosed(Option<ErrorCondition>),
    /// The peer ended the session.
    SessionClosed(Option<ErrorCondition>),
    /// The peer detached the sender link.
    LinkDetached(Option<ErrorCondition>),
    /// The engine run hit its deadline.
    DeadlineExceeded,
    /// The engine returned an error.
    EngineFailed(EngineError),
    /// The engine loop returned while the handler was still pending.
    EngineStopped,
}

impl fmt::Display for FailureSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn detail(error: &Option<ErrorCondition>) -> String {
            error
                .as_ref()
                .map_or_else(|| "no error condition".to_string(), ToString::to_string)
        }

        match self {
            FailureSignal::TransportError(condition) => write!(f, "transport error ({condition})"),
            FailureSignal::ConnectionClosed(error) => {
                write!(f, "connection closed ({})", detail(error))
            }
            FailureSignal::SessionClosed(error) => write!(f, "session closed ({})", detail(error)),
            FailureSignal::LinkDetached(error) => write!(f, "link detached ({})", detail(error)),
            FailureSignal::DeadlineExceeded => f.write_str("deadline exceeded"),
            FailureSignal::EngineFailed(error) => write!(f, "{error}"),
            FailureSignal::EngineStopped => f.write_str("engine stopped before settlement"),
        }
    }
}

/// Result of one dispatch as seen by the handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// No terminal event yet.
    Pending,
    /// The peer accepted the delivery.
    Settled(DeliveryState),
    /// The peer refused the delivery, with its reason.
    Rejected(String),
    /// The dispatch failed before settlement.
    TransportFailed(FailureSignal),
}

/// Event handler sending exactly one envelope over a fresh connection.
pub struct DispatchHandler {
    request: ConnectionRequest,
    link_request: SenderLinkRequest,
    envelope: OutboundEnvelope,
    state: DispatchState,
    outcome: DispatchOutcome,
    connection: Option<ConnectionId>,
    session: Option<SessionId>,
    link: Option<LinkId>,
    delivery: Option<DeliveryTag>,
    teardown_started: bool,
}

impl DispatchHandler {
    /// Create a handler for one envelope.
    ///
    /// The sender link targets the envelope's endpoint path.
    pub fn new(
        request: ConnectionRequest,
        link_name: impl Into<String>,
        envelope: OutboundEnvelope,
    ) -> Self {
        let link_request = SenderLinkRequest {
            name: link_name.into(),
            target: envelope.target().endpoint_path(),
        };
        Self {
            request,
            link_request,
            envelope,
            state: DispatchState::Idle,
            outcome: DispatchOutcome::Pending,
            connection: None,
            session: None,
            link: None,
            delivery: None,
            teardown_started: false,
        }
    }

    /// Current lifecycle position.
    pub fn state(&self) -> DispatchState {
        self.state
    }

    /// Current outcome.
    pub fn outcome(&self) -> &DispatchOutcome {
        &self.outcome
    }

    /// Consume the handler, keeping only its outcome.
    pub fn into_outcome(self) -> DispatchOutcome {
        self.outcome
    }

    /// Record a failure observed outside the event stream.
    ///
    /// Ignored once the handler is terminal: an outcome is set exactly once.
    pub fn fail(&mut self, signal: FailureSignal) {
        if self.state.is_terminal() {
            debug!(state = ?self.state, %signal, "failure after terminal state ignored");
            return;
        }
        self.finish(
            DispatchState::TransportFailed,
            DispatchOutcome::TransportFailed(signal),
        );
    }

    fn transition(&mut self, next: DispatchState) {
        debug!(from = ?self.state, to = ?next, "dispatch state transition");
        self.state = next;
    }

    fn finish(&mut self, state: DispatchState, outcome: DispatchOutcome) {
        self.transition(state);
        self.outcome = outcome;
    }

    fn fail_and_close(&mut self, signal: FailureSignal, ops: &mut dyn EngineOps) {
        self.fail(signal);
        self.close_all(ops);
    }

    /// Close link, session and connection, innermost first. Runs once.
    fn close_all(&mut self, ops: &mut dyn EngineOps) {
        if self.teardown_started {
            return;
        }
        self.teardown_started = true;
        debug!(state = ?self.state, "closing protocol entities");

        if let Some(link) = self.link {
            ops.close_link(link);
        }
        if let Some(session) = self.session {
            ops.close_session(session);
        }
        if let Some(connection) = self.connection {
            ops.close_connection(connection);
        }
    }

    fn send_once(&mut self, link: LinkId, credit: u32, ops: &mut dyn EngineOps) {
        if credit == 0 {
            debug!(?link, "flow without credit");
            return;
        }
        let tag = ops.send(link, self.envelope.to_amqp());
        debug!(?link, ?tag, target = %self.envelope.target(), "message sent");
        self.delivery = Some(tag);
        self.transition(DispatchState::DeliverySent);
    }

    fn settle(&mut self, state: DeliveryState, ops: &mut dyn EngineOps) {
        let outcome = match &state {
            DeliveryState::Accepted => DispatchOutcome::Settled(state.clone()),
            DeliveryState::Rejected(Some(condition)) => {
                DispatchOutcome::Rejected(condition.reason().to_string())
            }
            DeliveryState::Rejected(None) => DispatchOutcome::Rejected("rejected".to_string()),
            DeliveryState::Released => DispatchOutcome::Rejected(conditions::RELEASED.to_string()),
            DeliveryState::Modified { .. } => {
                DispatchOutcome::Rejected(conditions::MODIFIED.to_string())
            }
        };
        let terminal = if state.is_accepted() {
            DispatchState::Settled
        } else {
            DispatchState::Rejected
        };
        self.finish(terminal, outcome);
        self.close_all(ops);
    }
}

impl EventHandler for DispatchHandler {
    fn on_event(&mut self, event: EngineEvent, ops: &mut dyn EngineOps) {
        match (self.state, event) {
            (DispatchState::Idle, EngineEvent::ReactorInit) => {
                self.connection = Some(ops.open_connection(&self.request));
                self.transition(DispatchState::ConnectionRequested);
            }

            (DispatchState::ConnectionRequested, EngineEvent::ConnectionRemoteOpen(connection)) => {
                self.transition(DispatchState::ConnectionOpen);
                let session = ops.open_session(connection);
                self.session = Some(session);
                self.link = Some(ops.open_sender(session, &self.link_request));
                self.transition(DispatchState::LinkAttaching);
            }

            (DispatchState::LinkAttaching, EngineEvent::LinkRemoteOpen(_)) => {
                self.transition(DispatchState::LinkActive);
            }

            (
                DispatchState::LinkAttaching | DispatchState::LinkActive,
                EngineEvent::LinkFlow { link, credit },
            ) if self.link == Some(link) => self.send_once(link, credit, ops),

            (DispatchState::DeliverySent, EngineEvent::Delivery { tag, state, .. })
                if self.delivery == Some(tag) =>
            {
                self.settle(state, ops);
            }

            (state, EngineEvent::TransportError { condition, .. }) if !state.is_terminal() => {
                self.fail_and_close(FailureSignal::TransportError(condition), ops);
            }
            (state, EngineEvent::ConnectionRemoteClose { error, .. }) if !state.is_terminal() => {
                self.fail_and_close(FailureSignal::ConnectionClosed(error), ops);
            }
            (state, EngineEvent::SessionRemoteClose { error, .. }) if !state.is_terminal() => {
                self.fail_and_close(FailureSignal::SessionClosed(error), ops);
            }
            (state, EngineEvent::LinkRemoteClose { error, .. }) if !state.is_terminal() => {
                self.fail_and_close(FailureSignal::LinkDetached(error), ops);
            }

            (state, event) => {
                debug!(?state, ?event, "event ignored in current state");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::DispatchTarget;
    use crate::message::Message;
    use hubwire_core::{AmqpMessage, TransportKind};
    use std::time::Duration;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Call {
        OpenConnection(String),
        OpenSession,
        OpenSender(SenderLinkRequest),
        Send(AmqpMessage),
        CloseLink,
        CloseSession,
        CloseConnection,
    }

    #[derive(Default)]
    struct RecordingOps {
        calls: Vec<Call>,
    }

    impl RecordingOps {
        fn sends(&self) -> usize {
            self.calls
                .iter()
                .filter(|call| matches!(call, Call::Send(_)))
                .count()
        }
    }

    impl EngineOps for RecordingOps {
        fn open_connection(&mut self, request: &ConnectionRequest) -> ConnectionId {
            self.calls.push(Call::OpenConnection(request.host.clone()));
            ConnectionId(1)
        }

        fn open_session(&mut self, _connection: ConnectionId) -> SessionId {
            self.calls.push(Call::OpenSession);
            SessionId(1)
        }

        fn open_sender(&mut self, _session: SessionId, link: &SenderLinkRequest) -> LinkId {
            self.calls.push(Call::OpenSender(link.clone()));
            LinkId(1)
        }

        fn send(&mut self, _link: LinkId, message: AmqpMessage) -> DeliveryTag {
            self.calls.push(Call::Send(message));
            DeliveryTag(7)
        }

        fn close_link(&mut self, _link: LinkId) {
            self.calls.push(Call::CloseLink);
        }

        fn close_session(&mut self, _session: SessionId) {
            self.calls.push(Call::CloseSession);
        }

        fn close_connection(&mut self, _connection: ConnectionId) {
            self.calls.push(Call::CloseConnection);
        }
    }

    fn handler(module_id: Option<&str>) -> DispatchHandler {
        let request = ConnectionRequest {
            host: "hub.azure-devices.net".to_string(),
            port: 5671,
            username: "iothubowner".to_string(),
            password: "token".to_string(),
            transport: TransportKind::Amqps,
            websocket_path: None,
            idle_timeout: Duration::from_secs(120),
        };
        let target = DispatchTarget::new("dev1", module_id).expect("valid target");
        let envelope = OutboundEnvelope::new(target, Message::new("payload"));
        DispatchHandler::new(request, "sender", envelope)
    }

    /// Drive the handler up to the point where the message is on the wire.
    fn drive_to_sent(handler: &mut DispatchHandler, ops: &mut RecordingOps) {
        handler.on_event(EngineEvent::ReactorInit, ops);
        handler.on_event(EngineEvent::ConnectionRemoteOpen(ConnectionId(1)), ops);
        handler.on_event(EngineEvent::SessionRemoteOpen(SessionId(1)), ops);
        handler.on_event(EngineEvent::LinkRemoteOpen(LinkId(1)), ops);
        handler.on_event(
            EngineEvent::LinkFlow {
                link: LinkId(1),
                credit: 1,
            },
            ops,
        );
    }

    #[test]
    fn happy_path_walks_every_state() {
        let mut handler = handler(None);
        let mut ops = RecordingOps::default();
        assert_eq!(handler.state(), DispatchState::Idle);

        handler.on_event(EngineEvent::ReactorInit, &mut ops);
        assert_eq!(handler.state(), DispatchState::ConnectionRequested);

        handler.on_event(EngineEvent::ConnectionRemoteOpen(ConnectionId(1)), &mut ops);
        assert_eq!(handler.state(), DispatchState::LinkAttaching);

        handler.on_event(EngineEvent::LinkRemoteOpen(LinkId(1)), &mut ops);
        assert_eq!(handler.state(), DispatchState::LinkActive);

        handler.on_event(
            EngineEvent::LinkFlow {
                link: LinkId(1),
                credit: 5,
            },
            &mut ops,
        );
        assert_eq!(handler.state(), DispatchState::DeliverySent);
        assert_eq!(handler.outcome(), &DispatchOutcome::Pending);

        handler.on_event(
            EngineEvent::Delivery {
                link: LinkId(1),
                tag: DeliveryTag(7),
                state: DeliveryState::Accepted,
            },
            &mut ops,
        );
        assert_eq!(handler.state(), DispatchState::Settled);
        assert_eq!(
            handler.outcome(),
            &DispatchOutcome::Settled(DeliveryState::Accepted)
        );
        assert_eq!(
            &ops.calls[ops.calls.len() - 3..],
            &[Call::CloseLink, Call::CloseSession, Call::CloseConnection]
        );
    }

    #[test]
    fn sender_link_targets_module_endpoint() {
        let mut handler = handler(Some("mod1"));
        let mut ops = RecordingOps::default();
        drive_to_sent(&mut handler, &mut ops);

        let link = ops.calls.iter().find_map(|call| match call {
            Call::OpenSender(link) => Some(link.clone()),
            _ => None,
        });
        assert_eq!(
            link,
            Some(SenderLinkRequest {
                name: "sender".to_string(),
                target: "/devices/dev1/modules/mod1/messages/devicebound".to_string(),
            })
        );
    }

    #[test]
    fn extra_credit_does_not_resend() {
        let mut handler = handler(None);
        let mut ops = RecordingOps::default();
        drive_to_sent(&mut handler, &mut ops);
        for _ in 0..3 {
            handler.on_event(
                EngineEvent::LinkFlow {
                    link: LinkId(1),
                    credit: 10,
                },
                &mut ops,
            );
        }
        assert_eq!(ops.sends(), 1);
    }

    #[test]
    fn credit_on_another_link_is_ignored() {
        let mut handler = handler(None);
        let mut ops = RecordingOps::default();
        handler.on_event(EngineEvent::ReactorInit, &mut ops);
        handler.on_event(EngineEvent::ConnectionRemoteOpen(ConnectionId(1)), &mut ops);
        handler.on_event(EngineEvent::LinkRemoteOpen(LinkId(1)), &mut ops);
        handler.on_event(
            EngineEvent::LinkFlow {
                link: LinkId(2),
                credit: 5,
            },
            &mut ops,
        );
        assert_eq!(handler.state(), DispatchState::LinkActive);
        assert_eq!(ops.sends(), 0);

        handler.on_event(
            EngineEvent::LinkFlow {
                link: LinkId(1),
                credit: 5,
            },
            &mut ops,
        );
        assert_eq!(handler.state(), DispatchState::DeliverySent);
        assert_eq!(ops.sends(), 1);
    }

    #[test]
    fn zero_credit_waits() {
        let mut handler = handler(None);
        let mut ops = RecordingOps::default();
        handler.on_event(EngineEvent::ReactorInit, &mut ops);
        handler.on_event(EngineEvent::ConnectionRemoteOpen(ConnectionId(1)), &mut ops);
        handler.on_event(EngineEvent::LinkRemoteOpen(LinkId(1)), &mut ops);
        handler.on_event(
            EngineEvent::LinkFlow {
                link: LinkId(1),
                credit: 0,
            },
            &mut ops,
        );
        assert_eq!(handler.state(), DispatchState::LinkActive);
        assert_eq!(ops.sends(), 0);
    }

    #[test]
    fn rejection_prefers_description_over_condition() {
        let mut handler = handler(None);
        let mut ops = RecordingOps::default();
        drive_to_sent(&mut handler, &mut ops);
        handler.on_event(
            EngineEvent::Delivery {
                link: LinkId(1),
                tag: DeliveryTag(7),
                state: DeliveryState::Rejected(Some(
                    ErrorCondition::new(conditions::NOT_FOUND).with_description("IotHubNotFound"),
                )),
            },
            &mut ops,
        );
        assert_eq!(handler.state(), DispatchState::Rejected);
        assert_eq!(
            handler.into_outcome(),
            DispatchOutcome::Rejected("IotHubNotFound".to_string())
        );
    }

    #[test]
    fn released_and_modified_are_rejections() {
        for (state, reason) in [
            (DeliveryState::Released, conditions::RELEASED),
            (
                DeliveryState::Modified {
                    delivery_failed: true,
                    undeliverable_here: false,
                },
                conditions::MODIFIED,
            ),
            (DeliveryState::Rejected(None), "rejected"),
        ] {
            let mut handler = handler(None);
            let mut ops = RecordingOps::default();
            drive_to_sent(&mut handler, &mut ops);
            handler.on_event(
                EngineEvent::Delivery {
                    link: LinkId(1),
                    tag: DeliveryTag(7),
                    state,
                },
                &mut ops,
            );
            assert_eq!(
                handler.into_outcome(),
                DispatchOutcome::Rejected(reason.to_string())
            );
        }
    }

    #[test]
    fn settlement_for_other_tag_is_ignored() {
        let mut handler = handler(None);
        let mut ops = RecordingOps::default();
        drive_to_sent(&mut handler, &mut ops);
        handler.on_event(
            EngineEvent::Delivery {
                link: LinkId(1),
                tag: DeliveryTag(99),
                state: DeliveryState::Accepted,
            },
            &mut ops,
        );
        assert_eq!(handler.state(), DispatchState::DeliverySent);
    }

    #[test]
    fn connection_error_before_open_fails_and_closes_connection_only() {
        let mut handler = handler(None);
        let mut ops = RecordingOps::default();
        handler.on_event(EngineEvent::ReactorInit, &mut ops);
        let error = ErrorCondition::new(conditions::UNAUTHORIZED_ACCESS);
        handler.on_event(
            EngineEvent::ConnectionRemoteClose {
                connection: ConnectionId(1),
                error: Some(error.clone()),
            },
            &mut ops,
        );

        assert_eq!(handler.state(), DispatchState::TransportFailed);
        assert_eq!(
            handler.outcome(),
            &DispatchOutcome::TransportFailed(FailureSignal::ConnectionClosed(Some(error)))
        );
        assert_eq!(ops.calls.last(), Some(&Call::CloseConnection));
        assert!(!ops.calls.contains(&Call::CloseLink));
    }

    #[test]
    fn link_detach_after_send_fails_transport() {
        let mut handler = handler(None);
        let mut ops = RecordingOps::default();
        drive_to_sent(&mut handler, &mut ops);
        handler.on_event(
            EngineEvent::LinkRemoteClose {
                link: LinkId(1),
                error: Some(ErrorCondition::new(conditions::LINK_DETACH_FORCED)),
            },
            &mut ops,
        );
        assert_eq!(handler.state(), DispatchState::TransportFailed);
    }

    #[test]
    fn teardown_echoes_after_terminal_are_ignored() {
        let mut handler = handler(None);
        let mut ops = RecordingOps::default();
        drive_to_sent(&mut handler, &mut ops);
        handler.on_event(
            EngineEvent::Delivery {
                link: LinkId(1),
                tag: DeliveryTag(7),
                state: DeliveryState::Accepted,
            },
            &mut ops,
        );
        let calls_after_settle = ops.calls.len();

        handler.on_event(
            EngineEvent::LinkRemoteClose {
                link: LinkId(1),
                error: None,
            },
            &mut ops,
        );
        handler.on_event(
            EngineEvent::ConnectionRemoteClose {
                connection: ConnectionId(1),
                error: Some(ErrorCondition::new(conditions::CONNECTION_FORCED)),
            },
            &mut ops,
        );

        assert_eq!(handler.state(), DispatchState::Settled);
        assert_eq!(ops.calls.len(), calls_after_settle);
    }

    #[test]
    fn external_failure_is_recorded_once() {
        let mut handler = handler(None);
        let mut ops = RecordingOps::default();
        drive_to_sent(&mut handler, &mut ops);

        handler.fail(FailureSignal::DeadlineExceeded);
        handler.fail(FailureSignal::EngineStopped);

        assert_eq!(
            handler.outcome(),
            &DispatchOutcome::TransportFailed(FailureSignal::DeadlineExceeded)
        );
    }
}
