//! # Capstan Redis
//!
//! Redis plumbing for the Capstan session store: connection pooling,
//! scan-based key enumeration, and the session-drain pub/sub channel.
//!
//! ## Features
//!
//! - **Connection Pooling**: bounded bb8 pool, validated on creation and on
//!   borrow, idle connections retired on a timer
//! - **Sentinel Resolution**: point the pool at a sentinel master group
//!   instead of a fixed endpoint
//! - **Scan Helpers**: cursor-based key enumeration and bulk deletion by
//!   pattern and value type
//! - **Drain Channel**: one long-lived subscription per process, fanning
//!   session-drain requests out to registered listeners
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use capstan_redis::{RedisConfig, RedisService};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = RedisConfig::builder()
//!         .url("redis://localhost:6379")
//!         .pool_size(10)
//!         .build();
//!
//!     let redis = RedisService::new(config).await?;
//!
//!     // Borrow a pooled connection
//!     let mut conn = redis.get().await?;
//!     redis::cmd("SET")
//!         .arg("key")
//!         .arg("value")
//!         .query_async::<()>(&mut *conn)
//!         .await?;
//!
//!     // Enumerate by pattern without KEYS
//!     let keys = redis.keys("myapp:*", Some("string")).await?;
//!
//!     Ok(())
//! }
//! ```

mod config;
mod error;
mod pool;
mod service;
mod subscriber;

pub use config::{RedisConfig, RedisConfigBuilder};
pub use error::{RedisError, Result};
pub use pool::{RedisConnection, RedisPool, RedisPoolBuilder};
pub use service::{PoolStats, RedisService};
pub use subscriber::{
    DrainListener, DrainSubscriber, DrainSubscriberManager, SubscriberState,
    SESSION_DRAIN_CHANNEL,
};

// Re-export redis crate for convenience
pub use redis;
pub use redis::{AsyncCommands, RedisResult, Value};

/// Prelude for common imports.
///
/// ```
/// use capstan_redis::prelude::*;
/// ```
pub mod prelude {
    pub use crate::config::{RedisConfig, RedisConfigBuilder};
    pub use crate::error::{RedisError, Result};
    pub use crate::pool::{RedisConnection, RedisPool};
    pub use crate::service::RedisService;
    pub use crate::subscriber::{DrainListener, DrainSubscriberManager, SubscriberState};
    pub use redis::AsyncCommands;
}
