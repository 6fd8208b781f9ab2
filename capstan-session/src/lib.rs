//! Distributed session storage for clustered web applications.
//!
//! Sessions live in Redis so that any node can serve any request. What sets
//! this store apart from a plain key-value session cache is the **drain
//! protocol**: when a node is asked to load a session it does not have, it
//! broadcasts a request on a shared channel, and whichever node still holds
//! that session in memory persists it, invalidates its own copy, and
//! signals completion through a short-lived response marker. Ownership of a
//! session follows the traffic.
//!
//! # Architecture
//!
//! - [`RedisSessionStore`] - save/load/remove/enumerate/expire plus both
//!   sides of the drain protocol
//! - [`DrainableSession`] / [`SessionRegistry`] / [`SessionCodec`] - the
//!   boundary an embedding container implements
//! - [`LocalSession`] / [`LocalSessionRegistry`] / [`JsonSessionCodec`] -
//!   bundled implementations for standalone use
//!
//! # Examples
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use capstan_redis::{DrainSubscriberManager, RedisConfig, RedisService};
//! use capstan_session::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), SessionError> {
//!     let redis = Arc::new(RedisService::new(RedisConfig::from_env().build()).await?);
//!     let drain = Arc::new(DrainSubscriberManager::new(Arc::clone(&redis)));
//!     let registry = LocalSessionRegistry::new();
//!
//!     let store = Arc::new(RedisSessionStore::new(
//!         redis,
//!         drain,
//!         registry.clone(),
//!         JsonSessionCodec,
//!         SessionStoreConfig::from_env()?,
//!     ));
//!     store.start();
//!
//!     let session = Arc::new(LocalSession::generate());
//!     session.set("user_id", 42)?;
//!     registry.insert(Arc::clone(&session));
//!     store.save(session.as_ref()).await?;
//!
//!     // Possibly on another node, possibly still in this node's memory:
//!     // either way the session comes back.
//!     let restored = store.load(session.id()).await;
//!
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod local;
pub mod store;
pub mod traits;

pub use config::{Activation, SessionStoreConfig, ENABLED_ENV};
pub use error::{SessionError, SessionResult};
pub use local::{JsonSessionCodec, LocalSession, LocalSessionRegistry};
pub use store::RedisSessionStore;
pub use traits::{generate_session_id, DrainableSession, SessionCodec, SessionRegistry};

/// Re-export commonly used types.
pub mod prelude {
    pub use crate::config::{Activation, SessionStoreConfig};
    pub use crate::error::{SessionError, SessionResult};
    pub use crate::local::{JsonSessionCodec, LocalSession, LocalSessionRegistry};
    pub use crate::store::RedisSessionStore;
    pub use crate::traits::{
        generate_session_id, DrainableSession, SessionCodec, SessionRegistry,
    };
}
