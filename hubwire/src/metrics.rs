//! Per-sender dispatch counters.

use std::time::Duration;

use crate::error::{DispatchResult, ErrorKind};

/// Outcome counters for one [`DispatchSender`](crate::DispatchSender).
///
/// Every call to `dispatch` is counted exactly once, in `dispatches_attempted`
/// and in the bucket matching its result. Timestamps are offsets on the
/// sender's [`TimeProvider`](hubwire_core::TimeProvider) clock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SenderMetrics {
    /// Calls to `dispatch`.
    pub dispatches_attempted: u64,
    /// Deliveries accepted by the peer.
    pub settled: u64,
    /// Deliveries refused by the peer.
    pub rejected: u64,
    /// Transport failures other than timeouts.
    pub transport_failures: u64,
    /// Runs that hit the deadline.
    pub timeouts: u64,
    /// Calls made while the sender was not open.
    pub not_initialized: u64,
    /// Calls refused because of bad arguments.
    pub invalid_arguments: u64,
    /// When the sender was created.
    pub created_at: Duration,
    /// When the last dispatch finished.
    pub last_outcome_at: Option<Duration>,
}

impl SenderMetrics {
    /// Empty counters starting at `now`.
    pub fn new_at(now: Duration) -> Self {
        Self {
            dispatches_attempted: 0,
            settled: 0,
            rejected: 0,
            transport_failures: 0,
            timeouts: 0,
            not_initialized: 0,
            invalid_arguments: 0,
            created_at: now,
            last_outcome_at: None,
        }
    }

    /// Count one finished dispatch.
    pub fn record(&mut self, result: &DispatchResult<()>, now: Duration) {
        self.dispatches_attempted += 1;
        self.last_outcome_at = Some(now);
        let counter = match result {
            Ok(()) => &mut self.settled,
            Err(err) => match err.kind() {
                ErrorKind::InvalidArgument => &mut self.invalid_arguments,
                ErrorKind::NotInitialized => &mut self.not_initialized,
                ErrorKind::ServiceRejected => &mut self.rejected,
                ErrorKind::TransportError => &mut self.transport_failures,
                ErrorKind::Timeout => &mut self.timeouts,
            },
        };
        *counter += 1;
    }

    /// Dispatches that did not succeed.
    pub fn failures(&self) -> u64 {
        self.dispatches_attempted.saturating_sub(self.settled)
    }
}
