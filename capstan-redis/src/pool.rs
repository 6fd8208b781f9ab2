//! Redis connection pool.

use bb8::{Pool, PooledConnection};
use bb8_redis::RedisConnectionManager;
use redis::aio::MultiplexedConnection;
use redis::sentinel::{Sentinel, SentinelNodeConnectionInfo};
use redis::{ConnectionInfo, IntoConnectionInfo, RedisConnectionInfo};
use std::ops::{Deref, DerefMut};
use tracing::{debug, info};

use crate::{RedisConfig, RedisError, Result};

/// Type alias for the connection pool.
pub type RedisPool = Pool<RedisConnectionManager>;

/// A pooled Redis connection.
///
/// The pool slot is released when this guard drops, on every exit path.
pub struct RedisConnection<'a> {
    conn: PooledConnection<'a, RedisConnectionManager>,
}

impl<'a> RedisConnection<'a> {
    /// Create a new connection wrapper.
    pub fn new(conn: PooledConnection<'a, RedisConnectionManager>) -> Self {
        Self { conn }
    }
}

impl<'a> Deref for RedisConnection<'a> {
    type Target = MultiplexedConnection;

    fn deref(&self) -> &Self::Target {
        &self.conn
    }
}

impl<'a> DerefMut for RedisConnection<'a> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.conn
    }
}

/// Builder for creating Redis connection pools.
pub struct RedisPoolBuilder {
    config: RedisConfig,
}

impl RedisPoolBuilder {
    /// Create a new pool builder.
    pub fn new(config: RedisConfig) -> Self {
        Self { config }
    }

    /// Resolve the endpoint this pool should target.
    ///
    /// A configured sentinel master group takes precedence over the plain
    /// URL; the sentinels report the currently elected master.
    pub async fn resolve_target(config: &RedisConfig) -> Result<ConnectionInfo> {
        let Some(master) = &config.sentinel_master else {
            return config
                .connection_url()
                .as_str()
                .into_connection_info()
                .map_err(|e| RedisError::Config(e.to_string()));
        };

        if config.sentinel_urls.is_empty() {
            return Err(RedisError::Config(
                "sentinel master set but no sentinel URLs configured".to_string(),
            ));
        }

        let nodes: Vec<&str> = config.sentinel_urls.iter().map(String::as_str).collect();
        let mut sentinel =
            Sentinel::build(nodes).map_err(|e| RedisError::Sentinel(e.to_string()))?;

        let mut redis_connection_info =
            RedisConnectionInfo::default().set_db(config.database.unwrap_or(0) as i64);
        if let Some(username) = &config.username {
            redis_connection_info = redis_connection_info.set_username(username);
        }
        if let Some(password) = &config.password {
            redis_connection_info = redis_connection_info.set_password(password);
        }
        let node_info = SentinelNodeConnectionInfo::default()
            .set_redis_connection_info(redis_connection_info);

        let client = sentinel
            .async_master_for(master, Some(&node_info))
            .await
            .map_err(|e| RedisError::Sentinel(e.to_string()))?;

        let info = client.get_connection_info().clone();
        debug!(master = %master, addr = %info.addr(), "resolved sentinel master");
        Ok(info)
    }

    /// Build the connection pool.
    ///
    /// Connections are validated with PING both on creation and on borrow;
    /// idle connections are retired after the configured idle timeout.
    pub async fn build(self) -> Result<RedisPool> {
        let target = Self::resolve_target(&self.config).await?;

        let manager = RedisConnectionManager::new(target)
            .map_err(|e| RedisError::Connection(e.to_string()))?;

        let pool = Pool::builder()
            .max_size(self.config.pool_size)
            .min_idle(self.config.min_idle)
            .idle_timeout(Some(self.config.idle_timeout))
            .connection_timeout(self.config.connection_timeout)
            .test_on_check_out(true)
            .build(manager)
            .await
            .map_err(|e| RedisError::Pool(e.to_string()))?;

        // Validate up front in a scope so the connection is back in the pool
        // before returning.
        {
            let mut conn = pool
                .get()
                .await
                .map_err(|e| RedisError::Pool(e.to_string()))?;
            let _: String = redis::cmd("PING")
                .query_async(&mut *conn)
                .await
                .map_err(|e| RedisError::Connection(e.to_string()))?;
        }

        info!(
            pool_size = self.config.pool_size,
            url = %self.config.url,
            sentinel = self.config.uses_sentinel(),
            "Redis connection pool created"
        );

        Ok(pool)
    }
}
