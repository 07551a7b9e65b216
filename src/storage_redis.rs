use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use crate::codec::{decode_member, encode_member};
use crate::error::StorageError;
use crate::storage::PriorityQueueStore;
use crate::types::{WorkUnit, WorkValue};

/// Durable queue backed by one Redis sorted set per namespace.
///
/// The set lives at `"{namespace}_pq"`; scores are epoch milliseconds.
#[derive(Clone)]
pub struct RedisPriorityQueue {
    conn: ConnectionManager,
}

impl RedisPriorityQueue {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    /// Open a managed connection to the server at `url`.
    pub async fn connect(url: &str) -> Result<Self, StorageError> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self::new(conn))
    }

    pub fn key(namespace: &str) -> String {
        format!("{}_pq", namespace)
    }
}

#[async_trait]
impl PriorityQueueStore for RedisPriorityQueue {
    async fn pop_all_overdue(
        &self,
        namespace: &str,
        now_ms: i64,
    ) -> Result<Vec<WorkUnit>, StorageError> {
        let key = Self::key(namespace);
        let upper = now_ms - 1;
        if upper < 0 {
            return Ok(Vec::new());
        }

        let mut conn = self.conn.clone();
        let (members,): (Vec<(String, f64)>,) = redis::pipe()
            .atomic()
            .zrangebyscore_withscores(&key, 0, upper)
            .zrembyscore(&key, 0, upper)
            .ignore()
            .query_async(&mut conn)
            .await?;

        Ok(members
            .into_iter()
            .map(|(member, score)| WorkUnit {
                value: decode_member(&member),
                scheduled_time: score as i64,
            })
            .collect())
    }

    async fn add(&self, namespace: &str, value: &WorkValue, score: i64) -> Result<(), StorageError> {
        let member = encode_member(value)?;
        let mut conn = self.conn.clone();
        let _: () = conn.zadd(Self::key(namespace), member, score).await?;
        Ok(())
    }

    async fn add_many(&self, namespace: &str, units: &[WorkUnit]) -> Result<(), StorageError> {
        if units.is_empty() {
            return Ok(());
        }
        let items = units
            .iter()
            .map(|unit| Ok((unit.scheduled_time, encode_member(&unit.value)?)))
            .collect::<Result<Vec<(i64, String)>, StorageError>>()?;

        let mut conn = self.conn.clone();
        let _: () = conn.zadd_multiple(Self::key(namespace), &items).await?;
        Ok(())
    }

    async fn clear(&self, namespace: &str) -> Result<(), StorageError> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(Self::key(namespace)).await?;
        Ok(())
    }
}
