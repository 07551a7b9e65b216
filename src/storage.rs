use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::codec::{decode_member, encode_member};
use crate::error::StorageError;
use crate::types::{WorkUnit, WorkValue};

/// A durable, score-ordered set of work units, partitioned by namespace.
///
/// Each distinct value (by its encoded member form) has at most one entry
/// per namespace; adding it again overwrites the score. Scores are epoch
/// milliseconds. Implementations never retry: every failure is returned to
/// the caller.
#[async_trait]
pub trait PriorityQueueStore: Send + Sync {
    /// Remove and return every entry scored strictly before `now_ms`,
    /// ascending by score.
    ///
    /// The read and the delete must both use `now_ms` as the bound. Entries
    /// scored exactly `now_ms` are left in place: a unit added for the
    /// current millisecond while the pop is in progress would otherwise be
    /// deleted without ever being returned.
    async fn pop_all_overdue(
        &self,
        namespace: &str,
        now_ms: i64,
    ) -> Result<Vec<WorkUnit>, StorageError>;

    /// Insert or re-score a single value.
    async fn add(&self, namespace: &str, value: &WorkValue, score: i64) -> Result<(), StorageError>;

    /// Insert or re-score many values in one round trip.
    async fn add_many(&self, namespace: &str, units: &[WorkUnit]) -> Result<(), StorageError>;

    /// Remove every entry in the namespace.
    async fn clear(&self, namespace: &str) -> Result<(), StorageError>;
}

#[derive(Debug, Default)]
struct SortedSet {
    scores: HashMap<String, i64>,
    ordered: BTreeSet<(i64, String)>,
}

impl SortedSet {
    fn insert(&mut self, member: String, score: i64) {
        if let Some(previous) = self.scores.insert(member.clone(), score) {
            self.ordered.remove(&(previous, member.clone()));
        }
        self.ordered.insert((score, member));
    }

    /// Remove every member scored in `[min, bound)`, ascending.
    fn pop_range(&mut self, min: i64, bound: i64) -> Vec<(i64, String)> {
        if bound <= min {
            return Vec::new();
        }
        let mut popped = self.ordered.split_off(&(min, String::new()));
        let mut upper = popped.split_off(&(bound, String::new()));
        self.ordered.append(&mut upper);
        for (_, member) in &popped {
            self.scores.remove(member);
        }
        popped.into_iter().collect()
    }
}

/// In-process store for tests and lightweight embedding.
///
/// Behaves like the Redis backend: members are canonically encoded, so
/// values that encode identically share one entry.
#[derive(Default)]
pub struct InMemoryPriorityQueue {
    sets: Mutex<HashMap<String, SortedSet>>,
}

impl InMemoryPriorityQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries currently stored under `namespace`.
    pub async fn len(&self, namespace: &str) -> usize {
        let guard = self.sets.lock().await;
        guard.get(namespace).map(|set| set.scores.len()).unwrap_or(0)
    }

    pub async fn is_empty(&self, namespace: &str) -> bool {
        self.len(namespace).await == 0
    }

    /// Current score of `value`, if it is stored under `namespace`.
    pub async fn score_of(&self, namespace: &str, value: &WorkValue) -> Option<i64> {
        let member = encode_member(value).ok()?;
        let guard = self.sets.lock().await;
        guard.get(namespace)?.scores.get(&member).copied()
    }
}

#[async_trait]
impl PriorityQueueStore for InMemoryPriorityQueue {
    async fn pop_all_overdue(
        &self,
        namespace: &str,
        now_ms: i64,
    ) -> Result<Vec<WorkUnit>, StorageError> {
        let mut guard = self.sets.lock().await;
        let Some(set) = guard.get_mut(namespace) else {
            return Ok(Vec::new());
        };
        // Same [0, now - 1] window as the Redis backend.
        let popped = set
            .pop_range(0, now_ms)
            .into_iter()
            .map(|(score, member)| WorkUnit {
                value: decode_member(&member),
                scheduled_time: score,
            })
            .collect();
        Ok(popped)
    }

    async fn add(&self, namespace: &str, value: &WorkValue, score: i64) -> Result<(), StorageError> {
        let member = encode_member(value)?;
        let mut guard = self.sets.lock().await;
        guard.entry(namespace.to_string()).or_default().insert(member, score);
        Ok(())
    }

    async fn add_many(&self, namespace: &str, units: &[WorkUnit]) -> Result<(), StorageError> {
        let members = units
            .iter()
            .map(|unit| Ok((encode_member(&unit.value)?, unit.scheduled_time)))
            .collect::<Result<Vec<_>, StorageError>>()?;

        let mut guard = self.sets.lock().await;
        let set = guard.entry(namespace.to_string()).or_default();
        for (member, score) in members {
            set.insert(member, score);
        }
        Ok(())
    }

    async fn clear(&self, namespace: &str) -> Result<(), StorageError> {
        self.sets.lock().await.remove(namespace);
        Ok(())
    }
}
