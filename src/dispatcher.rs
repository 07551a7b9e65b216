use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch, Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::admission::AdmissionController;
use crate::backoff::BackoffPolicy;
use crate::buffer::StagingBuffer;
use crate::clock::{Clock, SystemClock};
use crate::error::{ConfigError, StorageError};
use crate::reconcile::{PendingWorkSource, ReconcileState};
use crate::stats::{AttempterStats, Counter, Counters, DroppedWork};
use crate::storage::PriorityQueueStore;
use crate::worker::{run_attempt, AttemptAction};

const DROPPED_CHANNEL_CAPACITY: usize = 1_024;

/// Construction-time settings for an [`Attempter`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AttempterConfig {
    /// Identifies the durable queue. Attempters sharing a store must use
    /// distinct namespaces.
    pub namespace: String,

    /// Maximum number of attempts in flight at once.
    pub max_active_attempts: usize,

    /// Delay before a failed unit becomes due again.
    pub retry_delay_ms: u64,

    /// Period between rebuilds from the pending-work source.
    pub reconciliation_interval_ms: u64,

    /// How long the fetch loop waits after an empty pop, and the longest
    /// the dispatch loop sleeps without being woken.
    pub idle_poll_interval_ms: u64,

    /// Spacing between retries of a failed fetch.
    pub fetch_backoff: BackoffPolicy,

    /// Spacing between retries of a failed reconciliation step.
    pub reconcile_backoff: BackoffPolicy,
}

impl Default for AttempterConfig {
    fn default() -> Self {
        Self {
            namespace: String::new(),
            max_active_attempts: 480,
            retry_delay_ms: 10_000,
            reconciliation_interval_ms: 600_000,
            idle_poll_interval_ms: 10,
            fetch_backoff: BackoffPolicy::default(),
            reconcile_backoff: BackoffPolicy::default(),
        }
    }
}

impl AttempterConfig {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            ..Self::default()
        }
    }

    pub fn with_max_active_attempts(mut self, max_active_attempts: usize) -> Self {
        self.max_active_attempts = max_active_attempts;
        self
    }

    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay_ms = u64::try_from(retry_delay.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn with_reconciliation_interval(mut self, interval: Duration) -> Self {
        self.reconciliation_interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn with_idle_poll_interval(mut self, interval: Duration) -> Self {
        self.idle_poll_interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn with_fetch_backoff(mut self, policy: BackoffPolicy) -> Self {
        self.fetch_backoff = policy;
        self
    }

    pub fn with_reconcile_backoff(mut self, policy: BackoffPolicy) -> Self {
        self.reconcile_backoff = policy;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.namespace.trim().is_empty() {
            return Err(ConfigError::EmptyNamespace);
        }
        let max = u32::MAX as usize;
        if self.max_active_attempts == 0 || self.max_active_attempts > max {
            return Err(ConfigError::InvalidMaxActiveAttempts {
                value: self.max_active_attempts,
                max,
            });
        }
        if self.retry_delay_ms == 0 {
            return Err(ConfigError::ZeroRetryDelay);
        }
        if self.reconciliation_interval_ms == 0 {
            return Err(ConfigError::ZeroReconciliationInterval);
        }
        self.fetch_backoff.validate("fetch_backoff")?;
        self.reconcile_backoff.validate("reconcile_backoff")?;
        Ok(())
    }
}

/// State shared by the fetch loop, the dispatch loop and attempt tasks.
pub(crate) struct Shared {
    pub(crate) config: AttempterConfig,
    pub(crate) store: Arc<dyn PriorityQueueStore>,
    pub(crate) action: Arc<dyn AttemptAction>,
    pub(crate) source: Option<Arc<dyn PendingWorkSource>>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) buffer: Mutex<StagingBuffer>,
    pub(crate) admission: AdmissionController,
    pub(crate) phase: watch::Sender<ReconcileState>,
    /// Written only by the dispatch task.
    pub(crate) next_reconciliation_at: AtomicI64,
    /// Held by the fetch loop from pop until the units are staged.
    pub(crate) fetch_gate: Mutex<()>,
    /// Wakes the dispatch loop: new staged work or a released slot.
    pub(crate) wake: Arc<Notify>,
    pub(crate) shutdown: watch::Sender<bool>,
    pub(crate) counters: Counters,
    pub(crate) dropped_tx: broadcast::Sender<DroppedWork>,
}

impl Shared {
    pub(crate) fn is_running(&self) -> bool {
        !*self.shutdown.borrow()
    }

    /// Resolves once shutdown has been requested.
    pub(crate) async fn stopped(&self) {
        let mut rx = self.shutdown.subscribe();
        let _ = rx.wait_for(|stopped| *stopped).await;
    }

    pub(crate) fn reconcile_state(&self) -> ReconcileState {
        *self.phase.borrow()
    }

    /// Sleep for `wait`, or just yield when it is zero. Cut short by
    /// shutdown.
    pub(crate) async fn pause(&self, wait: Duration) {
        if wait.is_zero() {
            tokio::task::yield_now().await;
            return;
        }
        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            _ = self.stopped() => {}
        }
    }

    fn idle_poll_interval(&self) -> Duration {
        Duration::from_millis(self.config.idle_poll_interval_ms)
    }

    /// Move every overdue unit from the durable queue into the staging
    /// buffer. Returns how many were moved.
    async fn fetch_once(&self) -> Result<usize, StorageError> {
        let namespace = self.config.namespace.as_str();
        let _gate = self.fetch_gate.lock().await;
        if self.reconcile_state() != ReconcileState::Normal {
            return Ok(0);
        }

        // One timestamp for both the read and the delete.
        let now = self.clock.now_ms();
        let units = self.store.pop_all_overdue(namespace, now).await?;
        let count = units.len();
        if count > 0 {
            debug!(namespace, count, "staging overdue work units");
            self.buffer.lock().await.extend(units);
            self.counters.add(Counter::UnitsFetched, count as u64, namespace);
            self.wake.notify_one();
        }
        Ok(count)
    }

    /// Start one attempt if there is staged work and a free slot.
    async fn dispatch_one(self: &Arc<Self>) -> bool {
        let (unit, permit) = {
            let mut buffer = self.buffer.lock().await;
            if buffer.is_empty() {
                return false;
            }
            let Some(permit) = self.admission.try_acquire() else {
                return false;
            };
            let Some(unit) = buffer.pop() else {
                return false;
            };
            (unit, permit)
        };

        let namespace = self.config.namespace.as_str();
        self.counters.inc(Counter::AttemptsStarted, namespace);
        trace!(namespace, value = ?unit.value, scheduled_time = unit.scheduled_time, "starting attempt");
        tokio::spawn(run_attempt(self.clone(), unit, permit));
        true
    }

    /// Latch a reconciliation if one is due. Only called from the dispatch
    /// task.
    fn latch_reconciliation(&self) -> bool {
        if self.source.is_none() || self.reconcile_state() != ReconcileState::Normal {
            return false;
        }
        let now = self.clock.now_ms();
        if now <= self.next_reconciliation_at.load(Ordering::SeqCst) {
            return false;
        }
        let interval = i64::try_from(self.config.reconciliation_interval_ms).unwrap_or(i64::MAX);
        self.next_reconciliation_at
            .store(now.saturating_add(interval), Ordering::SeqCst);
        self.phase.send_replace(ReconcileState::Draining);
        true
    }
}

async fn fetch_loop(shared: Arc<Shared>) {
    let namespace = shared.config.namespace.clone();
    let mut phase = shared.phase.subscribe();
    let mut failures = 0u32;

    while shared.is_running() {
        // Idle, without touching the store, while reconciling.
        let normal = tokio::select! {
            res = phase.wait_for(|state| *state == ReconcileState::Normal) => res.is_ok(),
            _ = shared.stopped() => false,
        };
        if !normal {
            break;
        }

        let wait = match shared.fetch_once().await {
            Ok(0) => {
                failures = 0;
                shared.idle_poll_interval()
            }
            Ok(_) => {
                failures = 0;
                Duration::ZERO
            }
            Err(err) => {
                failures = failures.saturating_add(1);
                shared.counters.inc(Counter::FetchErrors, &namespace);
                warn!(namespace = %namespace, failures, error = %err, "failed to fetch work from the durable queue");
                shared.config.fetch_backoff.delay_for(failures)
            }
        };
        shared.pause(wait).await;
    }

    debug!(namespace = %namespace, "fetch loop stopped");
}

async fn dispatch_loop(shared: Arc<Shared>) {
    let namespace = shared.config.namespace.clone();

    // Attempters start out reconciling so stale durable content is never
    // fetched before the first rebuild.
    if shared.reconcile_state() != ReconcileState::Normal && !shared.reconcile().await {
        return;
    }

    let idle = shared.idle_poll_interval().max(Duration::from_millis(1));
    while shared.is_running() {
        let dispatched = shared.dispatch_one().await;

        if shared.latch_reconciliation() {
            // Staged units stay put until the rebuild is done.
            if !shared.reconcile().await {
                break;
            }
            continue;
        }

        if !dispatched {
            tokio::select! {
                _ = shared.wake.notified() => {}
                _ = tokio::time::sleep(idle) => {}
                _ = shared.stopped() => break,
            }
        }
    }

    debug!(namespace = %namespace, "dispatch loop stopped");
}

/// Builder for an [`Attempter`]; the store and attempt action are required.
pub struct AttempterBuilder {
    config: AttempterConfig,
    store: Option<Arc<dyn PriorityQueueStore>>,
    action: Option<Arc<dyn AttemptAction>>,
    source: Option<Arc<dyn PendingWorkSource>>,
    clock: Arc<dyn Clock>,
}

impl AttempterBuilder {
    pub fn store<S: PriorityQueueStore + 'static>(mut self, store: Arc<S>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn attempt(mut self, action: impl AttemptAction + 'static) -> Self {
        self.action = Some(Arc::new(action));
        self
    }

    /// Enables reconciliation against `source`.
    pub fn pending_work(mut self, source: impl PendingWorkSource + 'static) -> Self {
        self.source = Some(Arc::new(source));
        self
    }

    pub fn clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Validate the configuration and spawn the loops on the current tokio
    /// runtime.
    pub fn start(self) -> Result<Attempter, ConfigError> {
        self.config.validate()?;
        let store = self.store.ok_or(ConfigError::MissingStore)?;
        let action = self.action.ok_or(ConfigError::MissingAttemptAction)?;

        let initial_phase = if self.source.is_some() {
            ReconcileState::Draining
        } else {
            ReconcileState::Normal
        };
        let interval = i64::try_from(self.config.reconciliation_interval_ms).unwrap_or(i64::MAX);
        let next_reconciliation_at = self.clock.now_ms().saturating_add(interval);

        let wake = Arc::new(Notify::new());
        let (phase, _) = watch::channel(initial_phase);
        let (shutdown, _) = watch::channel(false);
        let (dropped_tx, _) = broadcast::channel(DROPPED_CHANNEL_CAPACITY);

        let shared = Arc::new(Shared {
            admission: AdmissionController::new(self.config.max_active_attempts, wake.clone()),
            config: self.config,
            store,
            action,
            source: self.source,
            clock: self.clock,
            buffer: Mutex::new(StagingBuffer::new()),
            phase,
            next_reconciliation_at: AtomicI64::new(next_reconciliation_at),
            fetch_gate: Mutex::new(()),
            wake,
            shutdown,
            counters: Counters::default(),
            dropped_tx,
        });

        info!(
            namespace = %shared.config.namespace,
            max_active_attempts = shared.config.max_active_attempts,
            reconciling = shared.source.is_some(),
            "attempter started"
        );

        let handles = vec![
            tokio::spawn(fetch_loop(shared.clone())),
            tokio::spawn(dispatch_loop(shared.clone())),
        ];

        Ok(Attempter { shared, handles })
    }
}

/// Pulls due work from a durable queue and feeds it to an attempt action
/// under a concurrency cap, retrying failures after a delay.
///
/// The loops run until [`Attempter::shutdown`] is called or the handle is
/// dropped.
pub struct Attempter {
    shared: Arc<Shared>,
    handles: Vec<JoinHandle<()>>,
}

impl Attempter {
    pub fn builder(config: AttempterConfig) -> AttempterBuilder {
        AttempterBuilder {
            config,
            store: None,
            action: None,
            source: None,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.shared.config.namespace
    }

    pub fn is_admission_saturated(&self) -> bool {
        self.shared.admission.is_saturated()
    }

    pub fn active_attempts(&self) -> usize {
        self.shared.admission.active()
    }

    pub fn reconcile_state(&self) -> ReconcileState {
        self.shared.reconcile_state()
    }

    pub fn subscribe_reconcile_state(&self) -> watch::Receiver<ReconcileState> {
        self.shared.phase.subscribe()
    }

    /// Number of units pulled from the durable queue but not yet dispatched.
    pub async fn staged_len(&self) -> usize {
        self.shared.buffer.lock().await.len()
    }

    pub fn stats(&self) -> AttempterStats {
        self.shared.counters.snapshot()
    }

    /// Receive every unit dropped because its re-enqueue failed.
    pub fn subscribe_dropped(&self) -> broadcast::Receiver<DroppedWork> {
        self.shared.dropped_tx.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.shared.is_running()
    }

    /// Stop fetching and dispatching. In-flight attempts are left to finish
    /// on their own.
    pub async fn shutdown(&mut self) {
        self.shared.shutdown.send_replace(true);
        for handle in self.handles.drain(..) {
            let _ = handle.await;
        }
        info!(namespace = %self.shared.config.namespace, "attempter stopped");
    }
}

impl Drop for Attempter {
    fn drop(&mut self) {
        self.shared.shutdown.send_replace(true);
    }
}
