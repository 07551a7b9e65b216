use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};

/// Bounds the number of attempts in flight.
///
/// A slot is held from the moment an attempt starts until the attempt and
/// any re-enqueue that follows a failure have both settled.
pub struct AdmissionController {
    semaphore: Arc<Semaphore>,
    max: usize,
    in_flight: Arc<InFlight>,
    released: Arc<Notify>,
}

/// Count of held slots, plus a wake-up for when it drops to zero.
#[derive(Default)]
struct InFlight {
    count: AtomicUsize,
    idle: Notify,
}

/// One admitted attempt. Dropping it releases the slot.
#[must_use = "the slot is released as soon as the permit is dropped"]
pub struct AdmissionPermit {
    permit: Option<OwnedSemaphorePermit>,
    in_flight: Arc<InFlight>,
    released: Arc<Notify>,
}

impl Drop for AdmissionPermit {
    fn drop(&mut self) {
        // Uncount before the semaphore slot is returned, so the count never
        // exceeds the slots actually held.
        if self.in_flight.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.in_flight.idle.notify_waiters();
        }
        // Return the slot before waking anyone, so a woken dispatcher can
        // immediately take it.
        drop(self.permit.take());
        self.released.notify_one();
    }
}

impl AdmissionController {
    /// `released` is notified every time a slot is given back.
    pub fn new(max: usize, released: Arc<Notify>) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max)),
            max,
            in_flight: Arc::new(InFlight::default()),
            released,
        }
    }

    /// Take a slot if one is free.
    pub fn try_acquire(&self) -> Option<AdmissionPermit> {
        let permit = self.semaphore.clone().try_acquire_owned().ok()?;
        self.in_flight.count.fetch_add(1, Ordering::SeqCst);
        Some(AdmissionPermit {
            permit: Some(permit),
            in_flight: self.in_flight.clone(),
            released: self.released.clone(),
        })
    }

    pub fn active(&self) -> usize {
        self.in_flight.count.load(Ordering::SeqCst)
    }

    pub fn max(&self) -> usize {
        self.max
    }

    pub fn is_saturated(&self) -> bool {
        self.active() >= self.max
    }

    /// Wait until no slot is held.
    ///
    /// Callers must stop handing out new slots first, otherwise this may
    /// never resolve.
    pub async fn wait_idle(&self) {
        loop {
            let idle = self.in_flight.idle.notified();
            tokio::pin!(idle);
            // Register before checking, so a release in between is not missed.
            idle.as_mut().enable();
            if self.active() == 0 {
                return;
            }
            idle.await;
        }
    }
}
