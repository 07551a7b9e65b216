use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, trace, warn};

use crate::admission::AdmissionPermit;
use crate::dispatcher::Shared;
use crate::error::AttemptFailure;
use crate::stats::{Counter, DroppedWork};
use crate::types::{WorkUnit, WorkValue};

/// The throttled operation: one call per dispatched work unit.
#[async_trait]
pub trait AttemptAction: Send + Sync {
    async fn attempt(&self, value: &WorkValue) -> Result<(), AttemptFailure>;
}

/// Adapter turning an async closure into an [`AttemptAction`].
pub struct FnAttempt<F>(F);

/// Wrap `f` as an attempt action. The closure receives its own copy of the
/// value.
pub fn attempt_fn<F, Fut>(f: F) -> FnAttempt<F>
where
    F: Fn(WorkValue) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), AttemptFailure>> + Send,
{
    FnAttempt(f)
}

#[async_trait]
impl<F, Fut> AttemptAction for FnAttempt<F>
where
    F: Fn(WorkValue) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), AttemptFailure>> + Send,
{
    async fn attempt(&self, value: &WorkValue) -> Result<(), AttemptFailure> {
        (self.0)(value.clone()).await
    }
}

/// Run one attempt to completion.
///
/// The admission permit is held until the attempt has succeeded, or until
/// the re-enqueue after a failure has settled either way: that write still
/// occupies a connection to the store.
pub(crate) async fn run_attempt(shared: Arc<Shared>, unit: WorkUnit, permit: AdmissionPermit) {
    let namespace = shared.config.namespace.as_str();

    match shared.action.attempt(&unit.value).await {
        Ok(()) => {
            shared.counters.inc(Counter::AttemptsSucceeded, namespace);
            trace!(namespace, value = ?unit.value, "attempt succeeded");
        }
        Err(failure) => {
            shared.counters.inc(Counter::AttemptsFailed, namespace);
            warn!(namespace, value = ?unit.value, error = %failure, "attempt failed; re-enqueueing");

            let retry_delay = i64::try_from(shared.config.retry_delay_ms).unwrap_or(i64::MAX);
            let retry_at = shared.clock.now_ms().saturating_add(retry_delay);

            match shared.store.add(namespace, &unit.value, retry_at).await {
                Ok(()) => {
                    shared.counters.inc(Counter::Requeued, namespace);
                }
                Err(err) => {
                    // Neither staged nor durable any more.
                    error!(
                        namespace,
                        value = ?unit.value,
                        error = %err,
                        "failed to re-enqueue after a failed attempt; work unit dropped"
                    );
                    shared.counters.inc(Counter::Dropped, namespace);
                    let _ = shared.dropped_tx.send(DroppedWork {
                        unit,
                        failure,
                        error: err,
                    });
                }
            }
        }
    }

    drop(permit);
}
