use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{AttemptFailure, StorageError};
use crate::types::WorkUnit;

#[cfg(feature = "metrics")]
fn metric_add(name: &'static str, namespace: &str, n: u64) {
    metrics::counter!(name, "namespace" => namespace.to_string()).increment(n);
}

#[cfg(not(feature = "metrics"))]
fn metric_add(_name: &'static str, _namespace: &str, _n: u64) {}

/// Point-in-time copy of an attempter's counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttempterStats {
    pub units_fetched: u64,
    pub fetch_errors: u64,
    pub attempts_started: u64,
    pub attempts_succeeded: u64,
    pub attempts_failed: u64,
    pub requeued: u64,
    /// Units lost because both the attempt and its re-enqueue failed.
    pub dropped: u64,
    pub storage_errors: u64,
    pub source_errors: u64,
    pub reconciliations: u64,
}

/// A unit whose attempt failed and whose re-enqueue also failed.
///
/// It is no longer in the durable queue or the staging buffer; whoever
/// receives this is the last one to know about it.
#[derive(Debug, Clone)]
pub struct DroppedWork {
    pub unit: WorkUnit,
    pub failure: AttemptFailure,
    pub error: StorageError,
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum Counter {
    UnitsFetched,
    FetchErrors,
    AttemptsStarted,
    AttemptsSucceeded,
    AttemptsFailed,
    Requeued,
    Dropped,
    StorageErrors,
    SourceErrors,
    Reconciliations,
}

impl Counter {
    fn metric_name(self) -> &'static str {
        match self {
            Counter::UnitsFetched => "attempter.fetch.units",
            Counter::FetchErrors => "attempter.fetch.errors",
            Counter::AttemptsStarted => "attempter.attempt.started",
            Counter::AttemptsSucceeded => "attempter.attempt.succeeded",
            Counter::AttemptsFailed => "attempter.attempt.failed",
            Counter::Requeued => "attempter.attempt.requeued",
            Counter::Dropped => "attempter.attempt.dropped",
            Counter::StorageErrors => "attempter.reconcile.storage_errors",
            Counter::SourceErrors => "attempter.reconcile.source_errors",
            Counter::Reconciliations => "attempter.reconcile.completed",
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct Counters {
    units_fetched: AtomicU64,
    fetch_errors: AtomicU64,
    attempts_started: AtomicU64,
    attempts_succeeded: AtomicU64,
    attempts_failed: AtomicU64,
    requeued: AtomicU64,
    dropped: AtomicU64,
    storage_errors: AtomicU64,
    source_errors: AtomicU64,
    reconciliations: AtomicU64,
}

impl Counters {
    fn cell(&self, counter: Counter) -> &AtomicU64 {
        match counter {
            Counter::UnitsFetched => &self.units_fetched,
            Counter::FetchErrors => &self.fetch_errors,
            Counter::AttemptsStarted => &self.attempts_started,
            Counter::AttemptsSucceeded => &self.attempts_succeeded,
            Counter::AttemptsFailed => &self.attempts_failed,
            Counter::Requeued => &self.requeued,
            Counter::Dropped => &self.dropped,
            Counter::StorageErrors => &self.storage_errors,
            Counter::SourceErrors => &self.source_errors,
            Counter::Reconciliations => &self.reconciliations,
        }
    }

    pub(crate) fn add(&self, counter: Counter, n: u64, namespace: &str) {
        self.cell(counter).fetch_add(n, Ordering::Relaxed);
        metric_add(counter.metric_name(), namespace, n);
    }

    pub(crate) fn inc(&self, counter: Counter, namespace: &str) {
        self.add(counter, 1, namespace);
    }

    pub(crate) fn snapshot(&self) -> AttempterStats {
        let get = |counter| self.cell(counter).load(Ordering::Relaxed);
        AttempterStats {
            units_fetched: get(Counter::UnitsFetched),
            fetch_errors: get(Counter::FetchErrors),
            attempts_started: get(Counter::AttemptsStarted),
            attempts_succeeded: get(Counter::AttemptsSucceeded),
            attempts_failed: get(Counter::AttemptsFailed),
            requeued: get(Counter::Requeued),
            dropped: get(Counter::Dropped),
            storage_errors: get(Counter::StorageErrors),
            source_errors: get(Counter::SourceErrors),
            reconciliations: get(Counter::Reconciliations),
        }
    }
}
