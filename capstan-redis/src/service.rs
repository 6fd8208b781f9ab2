//! Redis service: the pooled client the rest of the workspace talks to.

use std::collections::HashSet;

use redis::aio::PubSub;
use redis::{AsyncCommands, ConnectionInfo};
use tracing::debug;

use crate::{
    pool::{RedisConnection, RedisPool, RedisPoolBuilder},
    RedisConfig, RedisError, Result,
};

/// Page size hint passed to SCAN.
const SCAN_COUNT: usize = 100;

/// Cursor value marking the start (and end) of a SCAN iteration.
const SCAN_CURSOR_START: u64 = 0;

/// Redis service providing a bounded connection pool, scan-based key
/// enumeration and deletion, and pub/sub access.
///
/// One instance per process is the intended lifecycle: construct it once the
/// configuration is final, share it behind an `Arc`, and drop it on shutdown.
///
/// # Examples
///
/// ```rust,ignore
/// use capstan_redis::{RedisConfig, RedisService};
///
/// let config = RedisConfig::from_env().build();
/// let redis = RedisService::new(config).await?;
/// let mut conn = redis.get().await?;
/// ```
pub struct RedisService {
    config: RedisConfig,
    target: ConnectionInfo,
    pool: RedisPool,
}

impl RedisService {
    /// Create a new Redis service, resolving the target endpoint (directly
    /// or through sentinel) and validating an initial connection.
    pub async fn new(config: RedisConfig) -> Result<Self> {
        config.validate()?;
        let target = RedisPoolBuilder::resolve_target(&config).await?;
        let pool = RedisPoolBuilder::new(config.clone()).build().await?;
        Ok(Self {
            config,
            target,
            pool,
        })
    }

    /// Get the configuration.
    pub fn config(&self) -> &RedisConfig {
        &self.config
    }

    /// Get a connection from the pool.
    ///
    /// The returned guard hands the connection back on drop, so it is
    /// returned to the pool on every exit path.
    pub async fn get(&self) -> Result<RedisConnection<'_>> {
        let conn = self.pool.get().await?;
        Ok(RedisConnection::new(conn))
    }

    /// Check if the connection is healthy.
    pub async fn health_check(&self) -> Result<()> {
        let mut conn = self.get().await?;
        let _: String = redis::cmd("PING")
            .query_async(&mut *conn)
            .await
            .map_err(|e| RedisError::Connection(e.to_string()))?;
        Ok(())
    }

    /// Extract the keys that match a glob pattern, optionally restricted to
    /// a value type (`string`, `list`, `set`, `zset`, `hash`, `stream`).
    ///
    /// Iterates the keyspace with cursor-based SCAN until the cursor returns
    /// to its start sentinel, accumulating pages. Offers no consistency
    /// beyond SCAN's own guarantees for keys added or removed mid-iteration.
    pub async fn keys(&self, pattern: &str, value_type: Option<&str>) -> Result<HashSet<String>> {
        let mut conn = self.get().await?;
        let mut keys = HashSet::new();
        let mut cursor = SCAN_CURSOR_START;

        loop {
            let (next, page) = scan_page(&mut conn, cursor, pattern, value_type).await?;
            keys.extend(page);
            cursor = next;
            if cursor == SCAN_CURSOR_START {
                break;
            }
        }

        Ok(keys)
    }

    /// Delete the keys that match a glob pattern, optionally restricted to a
    /// value type.
    ///
    /// Each SCAN page's matches are deleted immediately rather than
    /// accumulated, bounding memory for large key spaces.
    pub async fn del(&self, pattern: &str, value_type: Option<&str>) -> Result<()> {
        let mut conn = self.get().await?;
        let mut cursor = SCAN_CURSOR_START;

        loop {
            let (next, page) = scan_page(&mut conn, cursor, pattern, value_type).await?;
            if !page.is_empty() {
                let _: () = conn.del(&page).await?;
            }
            cursor = next;
            if cursor == SCAN_CURSOR_START {
                break;
            }
        }

        Ok(())
    }

    /// Publish a message to a channel, returning the receiver count.
    pub async fn publish(&self, channel: &str, message: &str) -> Result<u32> {
        let mut conn = self.get().await?;
        let receivers: u32 = conn
            .publish(channel, message)
            .await
            .map_err(|e| RedisError::Command(e.to_string()))?;

        debug!(channel = %channel, receivers = receivers, "published message");
        Ok(receivers)
    }

    /// Open a dedicated pub/sub connection.
    ///
    /// Subscriptions monopolize their connection, so this is never drawn
    /// from the pool. Message consumption blocks the owning task; run it on
    /// a dedicated background task, never on a request path.
    pub async fn pubsub(&self) -> Result<PubSub> {
        let client = redis::Client::open(self.target.clone())
            .map_err(|e| RedisError::Connection(e.to_string()))?;
        client
            .get_async_pubsub()
            .await
            .map_err(|e| RedisError::PubSub(e.to_string()))
    }

    /// Get pool statistics.
    pub fn pool_stats(&self) -> PoolStats {
        let state = self.pool.state();
        PoolStats {
            connections: state.connections,
            idle_connections: state.idle_connections,
        }
    }
}

/// One SCAN page: `SCAN cursor MATCH pattern COUNT n [TYPE t]`.
async fn scan_page(
    conn: &mut RedisConnection<'_>,
    cursor: u64,
    pattern: &str,
    value_type: Option<&str>,
) -> Result<(u64, Vec<String>)> {
    let mut cmd = redis::cmd("SCAN");
    cmd.arg(cursor).arg("MATCH").arg(pattern).arg("COUNT").arg(SCAN_COUNT);
    if let Some(t) = value_type {
        cmd.arg("TYPE").arg(t);
    }

    let (next, page): (u64, Vec<String>) = cmd
        .query_async(&mut **conn)
        .await
        .map_err(|e| RedisError::Command(e.to_string()))?;
    Ok((next, page))
}

/// Connection pool statistics.
#[derive(Debug, Clone)]
pub struct PoolStats {
    /// Total connections.
    pub connections: u32,
    /// Idle connections.
    pub idle_connections: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    #[ignore = "requires Redis"]
    async fn scan_based_enumeration_and_deletion() {
        let config = RedisConfig::builder().url("redis://localhost:6379").build();
        let redis = RedisService::new(config).await.unwrap();

        {
            let mut conn = redis.get().await.unwrap();
            for i in 0..5 {
                let _: () = conn
                    .set(format!("capstan-test:scan:{i}"), "x")
                    .await
                    .unwrap();
            }
        }

        let keys = redis.keys("capstan-test:scan:*", Some("string")).await.unwrap();
        assert_eq!(keys.len(), 5);

        redis.del("capstan-test:scan:*", Some("string")).await.unwrap();
        let keys = redis.keys("capstan-test:scan:*", None).await.unwrap();
        assert!(keys.is_empty());
    }

    #[tokio::test]
    #[ignore = "requires Redis"]
    async fn health_check_pings() {
        let config = RedisConfig::builder().url("redis://localhost:6379").build();
        let redis = RedisService::new(config).await.unwrap();
        redis.health_check().await.unwrap();
    }
}
