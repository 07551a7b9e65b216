//! A bounded-concurrency retry scheduler.
//!
//! An [`Attempter`] pulls overdue work units from a durable, score-ordered
//! queue, stages them in memory, and hands each one to an attempt action
//! while never exceeding a fixed number of attempts in flight. Failed
//! units are written back to the durable queue with a delay. Periodically
//! (and always at startup) the attempter drains, clears the durable queue
//! and rebuilds it from an authoritative pending-work source.
//!
//! ## Guarantees
//! - Bounded concurrency, including the re-enqueue after a failure
//! - At-least-once dispatch of durable work, with delayed retry
//! - No work fetched from the durable queue before the first rebuild
//!
//! ## Non-Guarantees
//! - Exactly-once delivery
//! - Distributed coordination between attempters
//! - Retry of a unit whose attempt *and* re-enqueue both failed. Such
//!   units are counted and published via [`Attempter::subscribe_dropped`].
//!
//! The durable queue is pluggable through [`PriorityQueueStore`]; a Redis
//! sorted-set backend is available with the `redis` feature.

mod admission;
mod backoff;
mod buffer;
mod clock;
mod codec;
mod dispatcher;
mod error;
mod reconcile;
mod stats;
mod storage;
mod types;
mod worker;

#[cfg(feature = "redis")]
mod storage_redis;

pub use admission::{AdmissionController, AdmissionPermit};
pub use backoff::BackoffPolicy;
pub use buffer::StagingBuffer;
pub use clock::{Clock, ManualClock, SystemClock};
pub use codec::{decode_member, encode_member};
pub use dispatcher::{Attempter, AttempterBuilder, AttempterConfig};
pub use error::{AttemptFailure, ConfigError, SourceError, StorageError};
pub use reconcile::{pending_work_fn, FnPendingWork, PendingWorkSource, ReconcileState};
pub use stats::{AttempterStats, DroppedWork};
pub use storage::{InMemoryPriorityQueue, PriorityQueueStore};
pub use types::{WorkUnit, WorkValue};
pub use worker::{attempt_fn, AttemptAction, FnAttempt};

#[cfg(feature = "redis")]
pub use storage_redis::RedisPriorityQueue;
