//! Bundled collaborator implementations for standalone use.
//!
//! Embedding containers bring their own session type, registry, and codec;
//! these cover the case where there is no container: a JSON-attribute
//! session, an in-memory registry, and a `serde_json` codec.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use crate::error::{SessionError, SessionResult};
use crate::traits::{generate_session_id, DrainableSession, SessionCodec, SessionRegistry};

const DEFAULT_MAX_INACTIVE: Duration = Duration::from_secs(30 * 60);

struct SessionState {
    attributes: HashMap<String, serde_json::Value>,
    last_accessed_at: DateTime<Utc>,
    max_inactive_interval: Duration,
}

/// A self-contained session with a JSON attribute map.
pub struct LocalSession {
    id: String,
    created_at: DateTime<Utc>,
    state: RwLock<SessionState>,
    valid: AtomicBool,
    processing: AtomicBool,
    registry: RwLock<Weak<LocalSessionRegistry>>,
}

impl LocalSession {
    /// Create a session with the given id and inactivity interval.
    pub fn new(id: impl Into<String>, max_inactive_interval: Duration) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            created_at: now,
            state: RwLock::new(SessionState {
                attributes: HashMap::new(),
                last_accessed_at: now,
                max_inactive_interval,
            }),
            valid: AtomicBool::new(true),
            processing: AtomicBool::new(false),
            registry: RwLock::new(Weak::new()),
        }
    }

    /// Create a session with a generated id and the default half-hour
    /// inactivity interval.
    pub fn generate() -> Self {
        Self::new(generate_session_id(), DEFAULT_MAX_INACTIVE)
    }

    /// Creation instant.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Get an attribute.
    pub fn get<T: for<'de> Deserialize<'de>>(&self, key: &str) -> Option<T> {
        self.state
            .read()
            .attributes
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Set an attribute.
    pub fn set<T: Serialize>(&self, key: &str, value: T) -> SessionResult<()> {
        let value =
            serde_json::to_value(value).map_err(|e| SessionError::Codec(e.to_string()))?;
        self.state.write().attributes.insert(key.to_string(), value);
        Ok(())
    }

    /// Remove an attribute.
    pub fn remove(&self, key: &str) -> Option<serde_json::Value> {
        self.state.write().attributes.remove(key)
    }

    /// Update the last-accessed instant.
    pub fn touch(&self) {
        self.state.write().last_accessed_at = Utc::now();
    }

    /// Change the inactivity interval.
    pub fn set_max_inactive_interval(&self, interval: Duration) {
        self.state.write().max_inactive_interval = interval;
    }

    /// Flag the session as used (or released) by an in-flight request.
    pub fn set_processing(&self, processing: bool) {
        self.processing.store(processing, Ordering::SeqCst);
    }

    fn attach(&self, registry: &Arc<LocalSessionRegistry>) {
        *self.registry.write() = Arc::downgrade(registry);
    }

    fn snapshot(&self) -> SessionSnapshot {
        let state = self.state.read();
        SessionSnapshot {
            id: self.id.clone(),
            created_at: self.created_at,
            last_accessed_at: state.last_accessed_at,
            max_inactive_ms: state.max_inactive_interval.as_millis() as u64,
            attributes: state.attributes.clone(),
        }
    }

    fn from_snapshot(snapshot: SessionSnapshot) -> Self {
        Self {
            id: snapshot.id,
            created_at: snapshot.created_at,
            state: RwLock::new(SessionState {
                attributes: snapshot.attributes,
                last_accessed_at: snapshot.last_accessed_at,
                max_inactive_interval: Duration::from_millis(snapshot.max_inactive_ms),
            }),
            valid: AtomicBool::new(true),
            processing: AtomicBool::new(false),
            registry: RwLock::new(Weak::new()),
        }
    }
}

impl DrainableSession for LocalSession {
    fn id(&self) -> &str {
        &self.id
    }

    fn last_accessed_at(&self) -> DateTime<Utc> {
        self.state.read().last_accessed_at
    }

    fn max_inactive_interval(&self) -> Duration {
        self.state.read().max_inactive_interval
    }

    fn is_valid(&self) -> bool {
        self.valid.load(Ordering::SeqCst)
    }

    fn is_processing(&self) -> bool {
        self.processing.load(Ordering::SeqCst)
    }

    fn passivate(&self) {
        // No attached listeners to notify.
    }

    fn invalidate(&self) {
        self.valid.store(false, Ordering::SeqCst);
        self.state.write().attributes.clear();
        if let Some(registry) = self.registry.read().upgrade() {
            registry.remove(&self.id);
        }
    }
}

/// Wire form of a [`LocalSession`].
#[derive(Serialize, Deserialize)]
struct SessionSnapshot {
    id: String,
    created_at: DateTime<Utc>,
    last_accessed_at: DateTime<Utc>,
    max_inactive_ms: u64,
    attributes: HashMap<String, serde_json::Value>,
}

/// In-memory table of the sessions this node holds.
#[derive(Default)]
pub struct LocalSessionRegistry {
    sessions: RwLock<HashMap<String, Arc<LocalSession>>>,
}

impl LocalSessionRegistry {
    /// Create an empty registry.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Insert a session, binding it to this registry so `invalidate`
    /// removes it again.
    pub fn insert(self: &Arc<Self>, session: Arc<LocalSession>) {
        session.attach(self);
        self.sessions
            .write()
            .insert(session.id().to_string(), session);
    }

    /// Remove a session by id.
    pub fn remove(&self, session_id: &str) -> Option<Arc<LocalSession>> {
        self.sessions.write().remove(session_id)
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }
}

#[async_trait]
impl SessionRegistry for LocalSessionRegistry {
    type Session = LocalSession;

    async fn find_by_id(&self, session_id: &str) -> Option<Arc<LocalSession>> {
        self.sessions.read().get(session_id).cloned()
    }
}

/// `serde_json` codec for [`LocalSession`].
#[derive(Default, Clone, Copy)]
pub struct JsonSessionCodec;

impl SessionCodec for JsonSessionCodec {
    type Session = LocalSession;

    fn encode(&self, session: &LocalSession) -> SessionResult<Vec<u8>> {
        serde_json::to_vec(&session.snapshot()).map_err(|e| SessionError::Codec(e.to_string()))
    }

    fn decode(&self, bytes: &[u8]) -> SessionResult<Arc<LocalSession>> {
        let snapshot: SessionSnapshot =
            serde_json::from_slice(bytes).map_err(|e| SessionError::Codec(e.to_string()))?;
        Ok(Arc::new(LocalSession::from_snapshot(snapshot)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attributes_round_trip() {
        let session = LocalSession::new("s1", Duration::from_secs(60));
        session.set("user_id", 42).unwrap();
        session.set("name", "alice").unwrap();

        assert_eq!(session.get::<i32>("user_id"), Some(42));
        assert_eq!(session.get::<String>("name"), Some("alice".to_string()));
        assert_eq!(session.get::<i32>("missing"), None);

        session.remove("user_id");
        assert_eq!(session.get::<i32>("user_id"), None);
    }

    #[test]
    fn expiry_follows_last_access() {
        let session = LocalSession::new("s1", Duration::from_secs(60));
        let before = session.expires_at();
        std::thread::sleep(Duration::from_millis(20));
        session.touch();
        assert!(session.expires_at() > before);
    }

    #[test]
    fn codec_round_trips_byte_for_byte() {
        let session = LocalSession::new("s1", Duration::from_secs(60));
        session.set("k", "v").unwrap();

        let codec = JsonSessionCodec;
        let bytes = codec.encode(&session).unwrap();
        let restored = codec.decode(&bytes).unwrap();

        assert_eq!(restored.id(), "s1");
        assert_eq!(restored.get::<String>("k"), Some("v".to_string()));
        assert!(restored.is_valid());
        assert!(!restored.is_processing());
        assert_eq!(codec.encode(&restored).unwrap(), bytes);
    }

    #[tokio::test]
    async fn invalidate_removes_from_registry() {
        let registry = LocalSessionRegistry::new();
        let session = Arc::new(LocalSession::new("s1", Duration::from_secs(60)));
        registry.insert(Arc::clone(&session));

        assert!(registry.find_by_id("s1").await.is_some());

        session.invalidate();
        assert!(!session.is_valid());
        assert!(registry.find_by_id("s1").await.is_none());
        assert!(registry.is_empty());
    }
}
