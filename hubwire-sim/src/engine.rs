//! Scripted in-process implementation of the engine seam.
//!
//! The engine keeps a FIFO of pending events. Every [`EngineOps`] call the
//! handler makes is answered by the scripted peer by queueing the remote
//! reaction (open, attach, flow, settlement, error). The loop drains the
//! queue and returns once every endpoint is closed on both sides.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, trace};

use hubwire_core::{
    AmqpMessage, ConnectionId, ConnectionRequest, DeliveryTag, EngineError, EngineEvent,
    EngineFactory, EngineOps, ErrorCondition, EventHandler, LinkId, ProtocolEngine,
    SenderLinkRequest, SessionId, TimeProvider, TokioTimeProvider,
};

use crate::observer::{SimEntity, SimObserver};
use crate::script::{PeerBehavior, SimScript};

/// Factory producing one [`SimEngine`] per dispatch, all reporting to one observer.
#[derive(Debug)]
pub struct SimEngineFactory {
    script: SimScript,
    observer: Arc<SimObserver>,
    next_id: AtomicU64,
    create_error: Option<EngineError>,
}

impl SimEngineFactory {
    /// Create a factory whose engines follow `script`.
    pub fn new(script: SimScript) -> Self {
        Self {
            script,
            observer: Arc::new(SimObserver::new()),
            next_id: AtomicU64::new(0),
            create_error: None,
        }
    }

    /// Make every `create` call fail with `error`.
    pub fn with_create_error(mut self, error: EngineError) -> Self {
        self.create_error = Some(error);
        self
    }

    /// Observer shared by all engines from this factory.
    pub fn observer(&self) -> Arc<SimObserver> {
        Arc::clone(&self.observer)
    }
}

impl EngineFactory for SimEngineFactory {
    type Engine = SimEngine;

    fn create(&self) -> Result<SimEngine, EngineError> {
        if let Some(error) = &self.create_error {
            return Err(error.clone());
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.observer.register(id);
        Ok(SimEngine::new(id, self.script.clone(), Arc::clone(&self.observer)))
    }
}

/// Local and remote open/close state of one endpoint.
#[derive(Debug, Default, Clone, Copy)]
struct EndpointState {
    opened: bool,
    local_closed: bool,
    remote_closed: bool,
}

impl EndpointState {
    /// Opened and not yet closed on both sides.
    fn is_live(&self) -> bool {
        self.opened && !(self.local_closed && self.remote_closed)
    }
}

/// Engine state the handler operates on through [`EngineOps`].
struct SimCore {
    id: u64,
    script: SimScript,
    observer: Arc<SimObserver>,
    queue: VecDeque<EngineEvent>,
    connection: EndpointState,
    session: EndpointState,
    link: EndpointState,
    transport_failed: bool,
    fault: Option<EngineError>,
    next_tag: u64,
}

impl SimCore {
    fn connection_id(&self) -> ConnectionId {
        ConnectionId(self.id)
    }

    fn session_id(&self) -> SessionId {
        SessionId(self.id)
    }

    fn link_id(&self) -> LinkId {
        LinkId(self.id)
    }

    fn record(&self, f: impl FnOnce(&mut crate::SimRun)) {
        self.observer.with_run(self.id, f);
    }

    fn has_live_endpoints(&self) -> bool {
        self.connection.is_live() || self.session.is_live() || self.link.is_live()
    }

    /// The socket is gone: nothing more will arrive from the peer.
    fn fail_transport(&mut self, condition: ErrorCondition) {
        self.transport_failed = true;
        self.connection.remote_closed = true;
        self.session.remote_closed = true;
        self.link.remote_closed = true;
        self.queue.push_back(EngineEvent::TransportError {
            connection: self.connection_id(),
            condition,
        });
    }
}

impl EngineOps for SimCore {
    fn open_connection(&mut self, request: &ConnectionRequest) -> ConnectionId {
        let connection = self.connection_id();
        self.record(|run| run.connection_request = Some(request.clone()));
        self.connection.opened = true;

        match self.script.peer.clone() {
            PeerBehavior::RefuseConnection(condition) => self.fail_transport(condition),
            PeerBehavior::FailEngine(error) => self.fault = Some(error),
            PeerBehavior::CloseConnection(condition) => {
                self.connection.remote_closed = true;
                self.queue.push_back(EngineEvent::ConnectionRemoteClose {
                    connection,
                    error: Some(condition),
                });
            }
            _ => self
                .queue
                .push_back(EngineEvent::ConnectionRemoteOpen(connection)),
        }
        connection
    }

    fn open_session(&mut self, _connection: ConnectionId) -> SessionId {
        let session = self.session_id();
        self.session.opened = true;
        if self.transport_failed || self.connection.remote_closed {
            self.session.remote_closed = true;
        } else {
            self.queue.push_back(EngineEvent::SessionRemoteOpen(session));
        }
        session
    }

    fn open_sender(&mut self, _session: SessionId, request: &SenderLinkRequest) -> LinkId {
        let link = self.link_id();
        self.record(|run| run.link_request = Some(request.clone()));
        self.link.opened = true;
        if self.transport_failed || self.connection.remote_closed {
            self.link.remote_closed = true;
            return link;
        }

        self.queue.push_back(EngineEvent::LinkRemoteOpen(link));
        if let PeerBehavior::DetachLink(condition) = self.script.peer.clone() {
            self.link.remote_closed = true;
            self.queue.push_back(EngineEvent::LinkRemoteClose {
                link,
                error: Some(condition),
            });
            return link;
        }

        if self.script.credit > 0 {
            let flows = 1 + self.script.extra_flows;
            for _ in 0..flows {
                self.queue.push_back(EngineEvent::LinkFlow {
                    link,
                    credit: self.script.credit,
                });
            }
        }
        link
    }

    fn send(&mut self, link: LinkId, message: AmqpMessage) -> DeliveryTag {
        let tag = DeliveryTag(self.next_tag);
        self.next_tag += 1;
        self.record(|run| run.sent.push(message));
        if self.transport_failed {
            return tag;
        }

        match self.script.peer.clone() {
            PeerBehavior::Settle(state) => {
                self.queue
                    .push_back(EngineEvent::Delivery { link, tag, state });
            }
            PeerBehavior::DropAfterSend(condition) => self.fail_transport(condition),
            PeerBehavior::Hang
            | PeerBehavior::RefuseConnection(_)
            | PeerBehavior::CloseConnection(_)
            | PeerBehavior::DetachLink(_)
            | PeerBehavior::FailEngine(_) => {}
        }
        tag
    }

    fn close_link(&mut self, link: LinkId) {
        self.record(|run| run.closed.push(SimEntity::Link));
        self.link.local_closed = true;
        if !self.link.remote_closed {
            self.link.remote_closed = true;
            self.queue
                .push_back(EngineEvent::LinkRemoteClose { link, error: None });
        }
    }

    fn close_session(&mut self, session: SessionId) {
        self.record(|run| run.closed.push(SimEntity::Session));
        self.session.local_closed = true;
        if !self.session.remote_closed {
            self.session.remote_closed = true;
            self.queue.push_back(EngineEvent::SessionRemoteClose {
                session,
                error: None,
            });
        }
    }

    fn close_connection(&mut self, connection: ConnectionId) {
        self.record(|run| run.closed.push(SimEntity::Connection));
        self.connection.local_closed = true;
        if !self.connection.remote_closed {
            self.connection.remote_closed = true;
            self.queue.push_back(EngineEvent::ConnectionRemoteClose {
                connection,
                error: None,
            });
        }
    }
}

/// Deterministic engine that plays a [`SimScript`] against the handler.
pub struct SimEngine {
    core: SimCore,
    time: TokioTimeProvider,
}

impl SimEngine {
    fn new(id: u64, script: SimScript, observer: Arc<SimObserver>) -> Self {
        Self {
            core: SimCore {
                id,
                script,
                observer,
                queue: VecDeque::new(),
                connection: EndpointState::default(),
                session: EndpointState::default(),
                link: EndpointState::default(),
                transport_failed: false,
                fault: None,
                next_tag: 0,
            },
            time: TokioTimeProvider::new(),
        }
    }

    /// Identifier of this engine's run in the observer.
    pub fn id(&self) -> u64 {
        self.core.id
    }
}

#[async_trait(?Send)]
impl ProtocolEngine for SimEngine {
    async fn run(&mut self, handler: &mut dyn EventHandler) -> Result<(), EngineError> {
        let _guard = self.core.observer.enter(self.core.id);
        debug!(run = self.core.id, "sim engine loop started");

        self.core.queue.push_back(EngineEvent::ReactorInit);
        loop {
            if let Some(event) = self.core.queue.pop_front() {
                if !self.core.script.latency.is_zero() {
                    self.time
                        .sleep(self.core.script.latency)
                        .await
                        .map_err(|e| EngineError::Internal(e.to_string()))?;
                }
                trace!(run = self.core.id, ?event, "delivering event");
                let recorded = event.clone();
                self.core.record(|run| run.events.push(recorded));
                handler.on_event(event, &mut self.core);
                if let Some(error) = self.core.fault.take() {
                    debug!(run = self.core.id, %error, "sim engine loop failed");
                    return Err(error);
                }
            } else if self.core.has_live_endpoints() {
                // Waiting on a peer that will never answer; only a deadline ends this.
                std::future::pending::<()>().await;
            } else {
                break;
            }
        }

        debug!(run = self.core.id, "sim engine loop finished");
        Ok(())
    }

    fn abort(&mut self) {
        debug!(run = self.core.id, "sim engine aborted");
        self.core.queue.clear();
        for endpoint in [
            &mut self.core.connection,
            &mut self.core.session,
            &mut self.core.link,
        ] {
            endpoint.local_closed = true;
            endpoint.remote_closed = true;
        }
        self.core.record(|run| run.aborted = true);
    }
}
