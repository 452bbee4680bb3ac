use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::RedisResult;
use tracing::{debug, info};

use super::{escape_glob, SharedStore, StoreError};

/// Upper bound for a single round trip. Past this the store is treated as unavailable.
const OPERATION_TIMEOUT: Duration = Duration::from_secs(2);
/// Prefix deletion walks the keyspace and gets a longer budget.
const SCAN_TIMEOUT: Duration = Duration::from_secs(30);
const SCAN_BATCH: u32 = 200;

/// Redis-backed `SharedStore`. Cloning shares the underlying multiplexed connection.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
}

impl RedisStore {
    pub async fn connect(redis_url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(redis_url)?;
        let conn = tokio::time::timeout(OPERATION_TIMEOUT * 5, ConnectionManager::new(client))
            .await
            .map_err(|_| StoreError::Unavailable("timed out connecting to Redis".to_string()))??;
        info!("Redis connection manager established");
        Ok(Self { conn })
    }

    async fn bounded<T, F>(budget: Duration, op: F) -> Result<T, StoreError>
    where
        F: Future<Output = RedisResult<T>>,
    {
        match tokio::time::timeout(budget, op).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(StoreError::Unavailable(format!(
                "operation timed out after {}ms",
                budget.as_millis()
            ))),
        }
    }
}

#[async_trait]
impl SharedStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn.clone();
        Self::bounded(OPERATION_TIMEOUT, async move {
            redis::cmd("GET")
                .arg(key)
                .query_async::<_, Option<String>>(&mut conn)
                .await
        })
        .await
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let seconds = ttl.as_secs().max(1);
        Self::bounded(OPERATION_TIMEOUT, async move {
            redis::cmd("SET")
                .arg(key)
                .arg(value)
                .arg("EX")
                .arg(seconds)
                .query_async::<_, ()>(&mut conn)
                .await
        })
        .await
    }

    async fn increment(&self, key: &str, retain_for: Duration) -> Result<i64, StoreError> {
        let mut conn = self.conn.clone();
        let seconds = retain_for.as_secs().max(1);
        // INCR and EXPIRE travel in one MULTI/EXEC round trip; INCR itself is the
        // atomic step, so concurrent consumers never lose an update.
        let (count,): (i64,) = Self::bounded(OPERATION_TIMEOUT, async move {
            redis::pipe()
                .atomic()
                .cmd("INCR")
                .arg(key)
                .cmd("EXPIRE")
                .arg(key)
                .arg(seconds)
                .ignore()
                .query_async(&mut conn)
                .await
        })
        .await?;
        Ok(count)
    }

    async fn delete(&self, keys: &[String]) -> Result<(), StoreError> {
        if keys.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.clone();
        Self::bounded(OPERATION_TIMEOUT, async move {
            redis::cmd("DEL")
                .arg(keys)
                .query_async::<_, i64>(&mut conn)
                .await
        })
        .await?;
        Ok(())
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<u64, StoreError> {
        let mut conn = self.conn.clone();
        let pattern = format!("{}*", escape_glob(prefix));
        let removed = Self::bounded(SCAN_TIMEOUT, async move {
            let mut cursor: u64 = 0;
            let mut removed: u64 = 0;
            loop {
                let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                    .arg(cursor)
                    .arg("MATCH")
                    .arg(&pattern)
                    .arg("COUNT")
                    .arg(SCAN_BATCH)
                    .query_async(&mut conn)
                    .await?;
                if !keys.is_empty() {
                    let deleted: u64 = redis::cmd("DEL").arg(&keys).query_async(&mut conn).await?;
                    removed += deleted;
                }
                if next == 0 {
                    break;
                }
                cursor = next;
            }
            Ok::<u64, redis::RedisError>(removed)
        })
        .await?;
        debug!("Deleted {removed} keys under prefix '{prefix}'");
        Ok(removed)
    }
}
