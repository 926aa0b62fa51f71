//! Synchronous dispatch façade.
//!
//! [`DispatchSender::dispatch`] blocks the calling thread while one engine
//! run delivers one message. The engine loop runs on its own named thread
//! inside a current-thread Tokio runtime, bounded by the configured
//! deadline; the caller joins that thread and then reads the handler's
//! terminal outcome.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use tracing::{debug, instrument, warn};

use hubwire_core::{
    EngineError, EngineFactory, ProtocolEngine, TimeError, TimeProvider, TokioTimeProvider,
};

use crate::address::DispatchTarget;
use crate::completion;
use crate::config::DispatchConfig;
use crate::error::{DispatchError, DispatchResult};
use crate::handler::{DispatchHandler, DispatchOutcome, FailureSignal};
use crate::message::{Message, OutboundEnvelope};
use crate::metrics::SenderMetrics;
use crate::params::ConnectionParameters;

/// Lifecycle of the sender's single envelope slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Closed,
    Open,
}

/// Blocking client that sends cloud-to-device messages one at a time.
///
/// Each dispatch opens a fresh connection, session and sender link, sends
/// one message, waits for settlement and closes everything again. Calls on
/// the same sender are serialized.
pub struct DispatchSender<F, T = TokioTimeProvider>
where
    F: EngineFactory,
    T: TimeProvider + Send,
{
    params: ConnectionParameters,
    config: DispatchConfig,
    factory: F,
    time: T,
    slot: Mutex<Slot>,
    // Mirrors `slot`, written only while the slot lock is held.
    open: AtomicBool,
    metrics: Mutex<SenderMetrics>,
}

impl<F: EngineFactory> DispatchSender<F, TokioTimeProvider> {
    /// Create a closed sender using the default configuration.
    pub fn new(params: ConnectionParameters, factory: F) -> Self {
        let time = TokioTimeProvider::new();
        Self {
            params,
            config: DispatchConfig::default(),
            factory,
            metrics: Mutex::new(SenderMetrics::new_at(time.now())),
            time,
            slot: Mutex::new(Slot::Closed),
            open: AtomicBool::new(false),
        }
    }
}

impl<F, T> DispatchSender<F, T>
where
    F: EngineFactory,
    T: TimeProvider + Send,
{
    /// Replace the configuration.
    pub fn with_config(mut self, config: DispatchConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace the time provider used to bound engine runs and stamp metrics.
    ///
    /// Metrics restart on the new clock.
    pub fn with_time<U: TimeProvider + Send>(self, time: U) -> DispatchSender<F, U> {
        DispatchSender {
            params: self.params,
            config: self.config,
            factory: self.factory,
            metrics: Mutex::new(SenderMetrics::new_at(time.now())),
            time,
            slot: self.slot,
            open: self.open,
        }
    }

    /// Connection parameters.
    pub fn params(&self) -> &ConnectionParameters {
        &self.params
    }

    /// Active configuration.
    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Make the sender usable. Opening an open sender is a no-op.
    pub fn open(&self) {
        let mut slot = self.lock_slot();
        *slot = Slot::Open;
        self.open.store(true, Ordering::SeqCst);
        drop(slot);
        debug!(host = %self.params.host(), "dispatch sender opened");
    }

    /// Invalidate the sender; later dispatches fail until it is reopened.
    ///
    /// Waits for an in-flight dispatch to finish.
    pub fn close(&self) {
        let mut slot = self.lock_slot();
        *slot = Slot::Closed;
        self.open.store(false, Ordering::SeqCst);
        drop(slot);
        debug!(host = %self.params.host(), "dispatch sender closed");
    }

    /// Whether `open` was called and `close` was not called since.
    ///
    /// Does not wait for an in-flight dispatch.
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// Snapshot of the outcome counters.
    pub fn metrics(&self) -> SenderMetrics {
        self.metrics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Send `message` to a device, or to a module on it, and wait for settlement.
    ///
    /// Blocks until the engine run has finished or the deadline expired.
    /// Concurrent calls wait for each other.
    #[instrument(skip(self, message))]
    pub fn dispatch(
        &self,
        device_id: &str,
        module_id: Option<&str>,
        message: Message,
    ) -> DispatchResult<()> {
        let result = self.dispatch_serialized(device_id, module_id, message);
        if let Err(err) = &result {
            warn!(%err, "dispatch failed");
        }
        self.metrics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .record(&result, self.time.now());
        result
    }

    fn dispatch_serialized(
        &self,
        device_id: &str,
        module_id: Option<&str>,
        message: Message,
    ) -> DispatchResult<()> {
        // Held until the outcome is read.
        let slot = self.lock_slot();
        if *slot != Slot::Open {
            return Err(DispatchError::NotInitialized);
        }

        let target = DispatchTarget::new(device_id, module_id)?;
        let envelope = OutboundEnvelope::new(target, message);
        let handler = DispatchHandler::new(
            self.params.connection_request(&self.config),
            self.config.sender_link_name.clone(),
            envelope,
        );

        let outcome = self.drive(handler);
        debug!(?outcome, "engine run finished");
        completion::complete(&outcome)
    }

    /// Run one engine to completion on a dedicated thread and return the outcome.
    fn drive(&self, handler: DispatchHandler) -> DispatchOutcome {
        let factory = &self.factory;
        let time = self.time.clone();
        let deadline = self.config.deadline;

        thread::scope(|scope| {
            let spawned = thread::Builder::new()
                .name(self.config.engine_thread_name.clone())
                .spawn_scoped(scope, move || run_engine(factory, time, deadline, handler));

            match spawned {
                Ok(engine_thread) => engine_thread.join().unwrap_or_else(|_| {
                    engine_failure(EngineError::Internal("engine thread panicked".to_string()))
                }),
                Err(err) => engine_failure(EngineError::from(err)),
            }
        })
    }

    fn lock_slot(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn engine_failure(error: EngineError) -> DispatchOutcome {
    DispatchOutcome::TransportFailed(FailureSignal::EngineFailed(error))
}

/// Body of the engine thread.
fn run_engine<F, T>(
    factory: &F,
    time: T,
    deadline: Duration,
    mut handler: DispatchHandler,
) -> DispatchOutcome
where
    F: EngineFactory,
    T: TimeProvider,
{
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => return engine_failure(EngineError::from(err)),
    };

    let mut engine = match factory.create() {
        Ok(engine) => engine,
        Err(err) => return engine_failure(err),
    };

    let result = runtime.block_on(time.timeout(deadline, engine.run(&mut handler)));
    let clean_exit = match result {
        Ok(Ok(())) if handler.state().is_terminal() => true,
        Ok(Ok(())) => {
            warn!(state = ?handler.state(), "engine loop returned before settlement");
            handler.fail(FailureSignal::EngineStopped);
            false
        }
        Ok(Err(err)) => {
            warn!(%err, state = ?handler.state(), "engine loop failed");
            handler.fail(FailureSignal::EngineFailed(err));
            false
        }
        Err(TimeError::Elapsed) => {
            warn!(?deadline, state = ?handler.state(), "engine run exceeded deadline");
            handler.fail(FailureSignal::DeadlineExceeded);
            false
        }
    };
    if !clean_exit {
        engine.abort();
    }
    handler.into_outcome()
}
