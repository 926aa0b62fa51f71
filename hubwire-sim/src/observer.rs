//! Shared recording of everything simulated engines did.
//!
//! The observer is shared between the factory (which may be used from
//! several threads) and the test that inspects it afterwards, so it is
//! `Arc`-shared and guarded by a `Mutex`. Only one engine runs at a time in
//! a correct dispatch client, so the lock is uncontended.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use hubwire_core::{AmqpMessage, ConnectionRequest, EngineEvent, SenderLinkRequest};

/// A protocol entity as seen by the simulated engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SimEntity {
    /// The connection.
    Connection,
    /// The session.
    Session,
    /// The sender link.
    Link,
}

/// Record of a single engine run.
#[derive(Debug, Clone)]
pub struct SimRun {
    /// Run identifier, in creation order starting at zero.
    pub id: u64,
    /// Connection request received from the handler.
    pub connection_request: Option<ConnectionRequest>,
    /// Sender link request received from the handler.
    pub link_request: Option<SenderLinkRequest>,
    /// Messages transferred on the link.
    pub sent: Vec<AmqpMessage>,
    /// Events handed to the handler, in order.
    pub events: Vec<EngineEvent>,
    /// Local closes issued by the handler, in order.
    pub closed: Vec<SimEntity>,
    /// Whether the run was force-closed.
    pub aborted: bool,
    /// When the loop started.
    pub started_at: Option<Instant>,
    /// When the loop returned.
    pub finished_at: Option<Instant>,
}

impl SimRun {
    fn new(id: u64) -> Self {
        Self {
            id,
            connection_request: None,
            link_request: None,
            sent: Vec::new(),
            events: Vec::new(),
            closed: Vec::new(),
            aborted: false,
            started_at: None,
            finished_at: None,
        }
    }

    /// Whether the given entity was closed by the handler.
    pub fn is_closed(&self, entity: SimEntity) -> bool {
        self.closed.contains(&entity)
    }
}

/// Observer shared by a factory and the engines it creates.
#[derive(Debug, Default)]
pub struct SimObserver {
    runs: Mutex<Vec<SimRun>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl SimObserver {
    /// Create an empty observer.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<SimRun>> {
        self.runs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn register(&self, id: u64) {
        self.lock().push(SimRun::new(id));
    }

    pub(crate) fn with_run<R>(&self, id: u64, f: impl FnOnce(&mut SimRun) -> R) -> Option<R> {
        let mut runs = self.lock();
        runs.iter_mut().find(|run| run.id == id).map(f)
    }

    /// Mark a run as started. The run counts as in flight until the guard drops,
    /// which also covers a loop future cancelled by a deadline.
    pub(crate) fn enter(self: &Arc<Self>, id: u64) -> RunGuard {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.with_run(id, |run| run.started_at = Some(Instant::now()));
        RunGuard {
            observer: Arc::clone(self),
            id,
        }
    }

    /// Number of engines created so far.
    pub fn engines_created(&self) -> usize {
        self.lock().len()
    }

    /// Snapshot of all runs.
    pub fn runs(&self) -> Vec<SimRun> {
        self.lock().clone()
    }

    /// Snapshot of a single run.
    pub fn run(&self, id: u64) -> Option<SimRun> {
        self.lock().iter().find(|run| run.id == id).cloned()
    }

    /// Most engine loops ever observed running at the same time.
    pub fn max_concurrent_runs(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

/// Marks a run finished when dropped.
pub(crate) struct RunGuard {
    observer: Arc<SimObserver>,
    id: u64,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.observer
            .with_run(self.id, |run| run.finished_at = Some(Instant::now()));
        self.observer.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}
