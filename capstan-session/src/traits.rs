//! The boundary between the store and its embedding container.
//!
//! The store neither knows nor cares what a session *is*. It needs three
//! capabilities from whoever embeds it: turn a session into bytes and back
//! ([`SessionCodec`]), look up the sessions this node currently holds in
//! memory ([`SessionRegistry`]), and a handful of per-session hooks
//! ([`DrainableSession`]). The bundled implementations in [`crate::local`]
//! cover the standalone case.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

use crate::error::SessionResult;

/// A live session as the store needs to see it.
pub trait DrainableSession: Send + Sync + 'static {
    /// Unique session identifier.
    fn id(&self) -> &str;

    /// Last access instant.
    fn last_accessed_at(&self) -> DateTime<Utc>;

    /// Inactivity interval after which the session expires.
    fn max_inactive_interval(&self) -> Duration;

    /// Whether the session is still valid.
    fn is_valid(&self) -> bool;

    /// Whether an in-flight request is currently using the session. A drain
    /// must not persist the session while this is set.
    fn is_processing(&self) -> bool;

    /// Hook invoked before the session is serialized, so attached listeners
    /// can prepare.
    fn passivate(&self);

    /// Invalidate the session locally so this node's own session table no
    /// longer owns it.
    fn invalidate(&self);

    /// Absolute expiration instant: last access plus the inactivity
    /// interval.
    fn expires_at(&self) -> DateTime<Utc> {
        self.last_accessed_at()
            + chrono::Duration::from_std(self.max_inactive_interval()).unwrap_or_default()
    }
}

/// Lookup of the live, in-memory sessions this node holds.
///
/// The drain responder goes through this, never through the store's own
/// `load`, which would broadcast another drain request and loop.
#[async_trait]
pub trait SessionRegistry: Send + Sync {
    /// The session type this registry manages.
    type Session: DrainableSession;

    /// Find a live session by id, or `None` when this node does not hold
    /// it.
    async fn find_by_id(&self, session_id: &str) -> Option<Arc<Self::Session>>;
}

/// Session payload encoding.
///
/// Payloads are opaque to the store: whatever `encode` produces is stored
/// byte-for-byte and later handed back to `decode`.
pub trait SessionCodec: Send + Sync {
    /// The session type this codec understands.
    type Session: DrainableSession;

    /// Encode a session into its payload bytes.
    fn encode(&self, session: &Self::Session) -> SessionResult<Vec<u8>>;

    /// Decode payload bytes back into a live session.
    fn decode(&self, bytes: &[u8]) -> SessionResult<Arc<Self::Session>>;
}

/// Generate a new unique session id.
pub fn generate_session_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Expiration instant in epoch milliseconds, the unit used for index scores
/// and key TTLs.
pub(crate) fn expiration_millis(session: &impl DrainableSession) -> i64 {
    session.expires_at().timestamp_millis()
}
