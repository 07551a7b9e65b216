use std::fmt;
use std::future::Future;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::dispatcher::Shared;
use crate::error::SourceError;
use crate::stats::Counter;
use crate::types::WorkUnit;

/// Phase of the reconciliation state machine.
///
/// `Normal` is the only phase in which work is fetched or dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileState {
    Normal,
    /// Dispatch is frozen; waiting for in-flight attempts to settle.
    Draining,
    /// Clearing the durable queue and reloading it from the source.
    Rebuilding,
}

impl fmt::Display for ReconcileState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReconcileState::Normal => write!(f, "Normal"),
            ReconcileState::Draining => write!(f, "Draining"),
            ReconcileState::Rebuilding => write!(f, "Rebuilding"),
        }
    }
}

/// The authority consulted to rebuild the durable queue.
#[async_trait]
pub trait PendingWorkSource: Send + Sync {
    /// Every work unit that should currently be pending.
    async fn pending_work_units(&self) -> Result<Vec<WorkUnit>, SourceError>;
}

/// Adapter turning an async closure into a [`PendingWorkSource`].
pub struct FnPendingWork<F>(F);

pub fn pending_work_fn<F, Fut>(f: F) -> FnPendingWork<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<Vec<WorkUnit>, SourceError>> + Send,
{
    FnPendingWork(f)
}

#[async_trait]
impl<F, Fut> PendingWorkSource for FnPendingWork<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<Vec<WorkUnit>, SourceError>> + Send,
{
    async fn pending_work_units(&self) -> Result<Vec<WorkUnit>, SourceError> {
        (self.0)().await
    }
}

impl Shared {
    /// Drain, then rebuild the durable queue from the pending-work source.
    ///
    /// Runs on the dispatch task, so no new attempts start while it is in
    /// progress. Each rebuild step is retried until it succeeds. Returns
    /// `false` only when shutdown interrupted it.
    pub(crate) async fn reconcile(&self) -> bool {
        let namespace = self.config.namespace.as_str();
        let Some(source) = self.source.clone() else {
            self.phase.send_replace(ReconcileState::Normal);
            return true;
        };

        self.phase.send_replace(ReconcileState::Draining);
        info!(
            namespace,
            active = self.admission.active(),
            "reconciliation started; draining in-flight attempts"
        );
        tokio::select! {
            _ = self.admission.wait_idle() => {}
            _ = self.stopped() => return false,
        }

        self.phase.send_replace(ReconcileState::Rebuilding);
        // Keeps a pop from straddling the clear below.
        let fetch_gate = self.fetch_gate.lock().await;

        if self
            .retry_until_ok("clear", Counter::StorageErrors, || self.store.clear(namespace))
            .await
            .is_none()
        {
            return false;
        }

        let Some(units) = self
            .retry_until_ok("pending work lookup", Counter::SourceErrors, || {
                source.pending_work_units()
            })
            .await
        else {
            return false;
        };

        if self
            .retry_until_ok("add_many", Counter::StorageErrors, || {
                self.store.add_many(namespace, &units)
            })
            .await
            .is_none()
        {
            return false;
        }

        drop(fetch_gate);
        self.phase.send_replace(ReconcileState::Normal);
        self.counters.inc(Counter::Reconciliations, namespace);
        info!(namespace, units = units.len(), "reconciliation complete");
        true
    }

    async fn retry_until_ok<T, E, F, Fut>(
        &self,
        step: &'static str,
        counter: Counter,
        mut op: F,
    ) -> Option<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        let namespace = self.config.namespace.as_str();
        let mut failures = 0u32;
        loop {
            if !self.is_running() {
                return None;
            }
            match op().await {
                Ok(value) => return Some(value),
                Err(err) => {
                    failures = failures.saturating_add(1);
                    self.counters.inc(counter, namespace);
                    warn!(namespace, step, failures, error = %err, "reconciliation step failed; retrying");
                    self.pause(self.config.reconcile_backoff.delay_for(failures)).await;
                }
            }
        }
    }
}
