#![allow(dead_code)]

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use attempter::{
    attempt_fn, AttemptAction, AttemptFailure, InMemoryPriorityQueue, PriorityQueueStore,
    StorageError, WorkUnit, WorkValue,
};
use tokio::sync::Semaphore;

/// A fake downstream service.
///
/// Requests are accepted or rejected depending on `accepting`. While gated,
/// each request waits for a permit from `release` before answering.
pub struct MockService {
    accepting: AtomicBool,
    gated: AtomicBool,
    gate: Semaphore,
    opened: AtomicUsize,
    accepted: AtomicUsize,
    rejected: AtomicUsize,
    per_value: Mutex<HashMap<WorkValue, usize>>,
}

impl MockService {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            accepting: AtomicBool::new(true),
            gated: AtomicBool::new(false),
            gate: Semaphore::new(0),
            opened: AtomicUsize::new(0),
            accepted: AtomicUsize::new(0),
            rejected: AtomicUsize::new(0),
            per_value: Mutex::new(HashMap::new()),
        })
    }

    pub fn rejecting() -> Arc<Self> {
        let service = Self::new();
        service.set_accepting(false);
        service
    }

    pub fn gated() -> Arc<Self> {
        let service = Self::new();
        service.gated.store(true, Ordering::SeqCst);
        service
    }

    pub fn set_accepting(&self, accepting: bool) {
        self.accepting.store(accepting, Ordering::SeqCst);
    }

    /// Let `n` held requests answer.
    pub fn release(&self, n: usize) {
        self.gate.add_permits(n);
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }

    pub fn rejected(&self) -> usize {
        self.rejected.load(Ordering::SeqCst)
    }

    pub fn count_for(&self, value: &WorkValue) -> usize {
        self.per_value.lock().unwrap().get(value).copied().unwrap_or(0)
    }

    pub fn seen(&self) -> HashMap<WorkValue, usize> {
        self.per_value.lock().unwrap().clone()
    }

    async fn handle(&self, value: WorkValue) -> Result<(), AttemptFailure> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        *self.per_value.lock().unwrap().entry(value.clone()).or_insert(0) += 1;

        if self.gated.load(Ordering::SeqCst) {
            self.gate.acquire().await.unwrap().forget();
        }

        if self.accepting.load(Ordering::SeqCst) {
            self.accepted.fetch_add(1, Ordering::SeqCst);
            Ok(())
        } else {
            self.rejected.fetch_add(1, Ordering::SeqCst);
            Err(AttemptFailure::new(format!("rejected for testing: {:?}", value)))
        }
    }

    pub fn action(self: &Arc<Self>) -> impl AttemptAction + 'static {
        let service = self.clone();
        attempt_fn(move |value| {
            let service = service.clone();
            async move { service.handle(value).await }
        })
    }
}

/// Wraps the in-memory store with switchable failures.
pub struct FlakyStore {
    pub inner: InMemoryPriorityQueue,
    fail_adds: AtomicBool,
    pop_failures: AtomicUsize,
    clear_failures: AtomicUsize,
    pub pops: AtomicUsize,
}

impl FlakyStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: InMemoryPriorityQueue::new(),
            fail_adds: AtomicBool::new(false),
            pop_failures: AtomicUsize::new(0),
            clear_failures: AtomicUsize::new(0),
            pops: AtomicUsize::new(0),
        })
    }

    pub fn fail_adds(&self, fail: bool) {
        self.fail_adds.store(fail, Ordering::SeqCst);
    }

    pub fn fail_next_pops(&self, n: usize) {
        self.pop_failures.store(n, Ordering::SeqCst);
    }

    pub fn fail_next_clears(&self, n: usize) {
        self.clear_failures.store(n, Ordering::SeqCst);
    }

    fn take_failure(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl PriorityQueueStore for FlakyStore {
    async fn pop_all_overdue(
        &self,
        namespace: &str,
        now_ms: i64,
    ) -> Result<Vec<WorkUnit>, StorageError> {
        self.pops.fetch_add(1, Ordering::SeqCst);
        if Self::take_failure(&self.pop_failures) {
            return Err(StorageError::Backend("connection reset".to_string()));
        }
        self.inner.pop_all_overdue(namespace, now_ms).await
    }

    async fn add(&self, namespace: &str, value: &WorkValue, score: i64) -> Result<(), StorageError> {
        if self.fail_adds.load(Ordering::SeqCst) {
            return Err(StorageError::Backend("read-only replica".to_string()));
        }
        self.inner.add(namespace, value, score).await
    }

    async fn add_many(&self, namespace: &str, units: &[WorkUnit]) -> Result<(), StorageError> {
        self.inner.add_many(namespace, units).await
    }

    async fn clear(&self, namespace: &str) -> Result<(), StorageError> {
        if Self::take_failure(&self.clear_failures) {
            return Err(StorageError::Backend("connection reset".to_string()));
        }
        self.inner.clear(namespace).await
    }
}

/// Seed `count` integer values `0..count`, all scheduled in the distant past.
pub fn past_units(count: i64) -> Vec<WorkUnit> {
    (0..count).map(|i| WorkUnit::new(i, 0)).collect()
}

/// Poll `condition` until it holds, panicking after `timeout`.
pub async fn eventually<F>(timeout: Duration, what: &str, mut condition: F)
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while !condition() {
        if tokio::time::Instant::now() >= deadline {
            panic!("timed out waiting for: {}", what);
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Async flavor of [`eventually`].
pub async fn eventually_async<F, Fut>(timeout: Duration, what: &str, mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while !condition().await {
        if tokio::time::Instant::now() >= deadline {
            panic!("timed out waiting for: {}", what);
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
