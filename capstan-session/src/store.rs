//! Redis-backed session store with cluster-wide session draining.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use capstan_redis::{AsyncCommands, DrainListener, DrainSubscriberManager, RedisService};
use chrono::Utc;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::config::SessionStoreConfig;
use crate::error::{SessionError, SessionResult};
use crate::traits::{expiration_millis, DrainableSession, SessionCodec, SessionRegistry};

/// Initial backoff while waiting out a session's in-flight request.
const PROCESSING_BACKOFF_FLOOR: Duration = Duration::from_millis(1);

/// Stores serialized sessions in Redis, keyed by session id, with a sorted
/// secondary index on expiration instant. Sessions held in another node's
/// memory are pulled over with the drain request protocol.
///
/// # Key layout
///
/// - `{prefix}:session:{id}` - one string entry per persisted session
/// - `{prefix}:sessions` - sorted set, id scored by expiration epoch millis
/// - `{prefix}:session:{id}:request` - short-lived drain response marker
///
/// The index and the primary keys are kept in step inside MULTI/EXEC
/// transactions: an id is in the index exactly when its entry exists.
///
/// # Examples
///
/// ```rust,ignore
/// use std::sync::Arc;
/// use capstan_redis::{DrainSubscriberManager, RedisConfig, RedisService};
/// use capstan_session::{
///     JsonSessionCodec, LocalSession, LocalSessionRegistry, RedisSessionStore,
///     SessionStoreConfig,
/// };
///
/// let redis = Arc::new(RedisService::new(RedisConfig::from_env().build()).await?);
/// let drain = Arc::new(DrainSubscriberManager::new(Arc::clone(&redis)));
/// let registry = LocalSessionRegistry::new();
///
/// let store = Arc::new(RedisSessionStore::new(
///     redis,
///     drain,
///     registry.clone(),
///     JsonSessionCodec,
///     SessionStoreConfig::default(),
/// ));
/// store.start();
///
/// let session = Arc::new(LocalSession::generate());
/// registry.insert(Arc::clone(&session));
/// store.save(session.as_ref()).await?;
/// ```
pub struct RedisSessionStore<C: SessionCodec> {
    service: Arc<RedisService>,
    drain: Arc<DrainSubscriberManager>,
    registry: Arc<dyn SessionRegistry<Session = C::Session>>,
    codec: C,
    config: SessionStoreConfig,
    enabled: bool,
    owner: String,
    drained: Mutex<HashSet<String>>,
}

impl<C: SessionCodec + 'static> RedisSessionStore<C> {
    /// Create a store.
    ///
    /// Activation is resolved here, once; a disabled store refuses `save`
    /// and never subscribes to drain requests.
    pub fn new(
        service: Arc<RedisService>,
        drain: Arc<DrainSubscriberManager>,
        registry: Arc<dyn SessionRegistry<Session = C::Session>>,
        codec: C,
        config: SessionStoreConfig,
    ) -> Self {
        let enabled = config.resolve_enabled();
        Self {
            service,
            drain,
            registry,
            codec,
            config,
            enabled,
            owner: format!("session-store-{}", uuid::Uuid::new_v4()),
            drained: Mutex::new(HashSet::new()),
        }
    }

    /// The configuration this store was built with.
    pub fn config(&self) -> &SessionStoreConfig {
        &self.config
    }

    /// Whether the store is active.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Start serving drain requests.
    ///
    /// Call after the embedder has finished configuring connections.
    /// Returns whether the store is active; on `false` the embedder should
    /// disable its own idle-swap behavior, since `save` will refuse every
    /// session.
    pub fn start(self: &Arc<Self>) -> bool {
        if !self.enabled {
            info!("session store disabled; not subscribing to drain requests");
            return false;
        }
        self.subscribe_to_drain_requests();
        true
    }

    /// Unregister from the drain channel and stop the subscriber.
    pub fn stop(&self) {
        self.drain.unsubscribe(&self.owner);
        self.drain.stop();
    }

    /// Register this store as a drain-request responder.
    pub fn subscribe_to_drain_requests(self: &Arc<Self>) {
        let store = Arc::downgrade(self);
        let listener: DrainListener = Arc::new(move |session_id: String| -> BoxFuture<'static, ()> {
            let store = store.clone();
            Box::pin(async move {
                if let Some(store) = store.upgrade() {
                    store.on_drain_request(&session_id).await;
                }
            })
        });
        self.drain.subscribe(&self.owner, listener);
    }

    /// Number of sessions currently persisted; 0 when Redis is unreachable.
    pub async fn size(&self) -> usize {
        match self.count_sessions().await {
            Ok(count) => count,
            Err(e) => {
                debug!(error = %e, "error counting sessions");
                0
            }
        }
    }

    /// All persisted session ids, in expiration order; empty on error.
    pub async fn keys(&self) -> Vec<String> {
        match self.list_sessions().await {
            Ok(ids) => ids,
            Err(e) => {
                debug!(error = %e, "error listing sessions");
                Vec::new()
            }
        }
    }

    /// Ids whose expiration instant has passed; empty on error.
    pub async fn expired_keys(&self) -> Vec<String> {
        match self.list_expired_sessions().await {
            Ok(ids) => ids,
            Err(e) => {
                debug!(error = %e, "error listing sessions");
                Vec::new()
            }
        }
    }

    /// Delete every session under this store's prefix; best-effort.
    pub async fn clear(&self) {
        if let Err(e) = self.delete_all().await {
            debug!(error = %e, "error deleting sessions");
        }
    }

    /// Persist a session.
    ///
    /// One transaction writes the payload, sets its TTL, and upserts the
    /// expiration index. An already-expired session gets a non-positive TTL
    /// and is evicted by Redis almost immediately; that is deliberate.
    ///
    /// # Errors
    ///
    /// [`SessionError::NotSerializable`] when the store is disabled or the
    /// codec rejects the session; [`SessionError::Redis`] when the write
    /// fails.
    pub async fn save(&self, session: &C::Session) -> SessionResult<()> {
        if !self.enabled {
            return Err(SessionError::NotSerializable("store not enabled".to_string()));
        }

        let payload = self
            .codec
            .encode(session)
            .map_err(|e| SessionError::NotSerializable(e.to_string()))?;

        let id = session.id().to_string();
        let key = self.config.session_key(&id);
        let expire_at = expiration_millis(session);
        let ttl = expire_at - Utc::now().timestamp_millis();

        let mut conn = self.service.get().await?;
        let _: () = redis::pipe()
            .atomic()
            .set(&key, payload)
            .ignore()
            .cmd("PEXPIRE")
            .arg(&key)
            .arg(ttl)
            .ignore()
            .zadd(self.config.index_key(), &id, expire_at)
            .ignore()
            .query_async(&mut *conn)
            .await?;

        debug!(session_id = %id, expire_at = expire_at, "session saved");
        Ok(())
    }

    /// Remove a session; best-effort, and a no-op for ids this node already
    /// drained (the entry may have been re-created by its new owner).
    pub async fn remove(&self, session_id: &str) {
        if self.is_drained(session_id) {
            return;
        }

        if let Err(e) = self.delete_session(session_id).await {
            debug!(error = %e, session_id = %session_id, "error removing session");
        }
    }

    /// Load a session, consuming its persisted entry.
    ///
    /// When the entry is absent the id may still live in another node's
    /// memory, so the cluster is asked to drain it: a request is broadcast
    /// and the response marker polled for [`SessionStoreConfig::drain_timeout`].
    /// Silence means `None`. An answer means some node is persisting the
    /// session right now, so storage is polled until the payload appears or
    /// [`SessionStoreConfig::await_timeout`] elapses.
    ///
    /// Every failure degrades to `None`.
    pub async fn load(&self, session_id: &str) -> Option<Arc<C::Session>> {
        match self.try_load(session_id).await {
            Ok(session) => session,
            Err(e) => {
                debug!(error = %e, session_id = %session_id, "error loading session");
                None
            }
        }
    }

    async fn try_load(&self, session_id: &str) -> SessionResult<Option<Arc<C::Session>>> {
        if let Some(raw) = self.take_payload(session_id).await? {
            return Ok(Some(self.codec.decode(&raw)?));
        }

        if !self.ask_for_session_draining(session_id).await? {
            return Ok(None);
        }

        match self.await_drained_payload(session_id).await? {
            Some(raw) => Ok(Some(self.codec.decode(&raw)?)),
            None => Ok(None),
        }
    }

    /// Respond to a drain request broadcast on the shared channel.
    ///
    /// Runs on every node for every request, including the requester
    /// itself, so the absent case returns immediately and writes nothing:
    /// silence is the correct answer when this node does not hold the
    /// session. When it does, the response marker is written first, both
    /// answering the requester and fencing out duplicate drains, then the
    /// session is persisted and invalidated once no request is using it.
    pub async fn on_drain_request(&self, session_id: &str) {
        let Some(session) = self.registry.find_by_id(session_id).await else {
            return;
        };

        if let Err(e) = self.write_drain_marker(session_id).await {
            debug!(error = %e, session_id = %session_id, "error answering drain request");
            return;
        }

        self.await_processing_end(session.as_ref()).await;

        session.passivate();
        if let Err(e) = self.save(session.as_ref()).await {
            debug!(error = %e, session_id = %session_id, "error draining session");
            return;
        }
        self.mark_drained(session_id);
        session.invalidate();
        debug!(session_id = %session_id, "session drained");
    }

    /// Broadcast a drain request and poll for an answer until the drain
    /// timeout. Returns whether some node answered; silence and "nobody
    /// holds it" are indistinguishable.
    async fn ask_for_session_draining(&self, session_id: &str) -> SessionResult<bool> {
        let deadline = Instant::now() + self.config.drain_timeout;
        let mut first_attempt = true;

        loop {
            if Instant::now() > deadline {
                return Ok(false);
            }
            if first_attempt {
                self.send_drain_request(session_id).await?;
                first_attempt = false;
            }
            if self.someone_answered(session_id).await? {
                return Ok(true);
            }
            tokio::time::sleep(self.config.drain_poll_interval).await;
        }
    }

    async fn send_drain_request(&self, session_id: &str) -> SessionResult<()> {
        self.service
            .publish(self.drain.channel(), session_id)
            .await?;
        Ok(())
    }

    /// Consume the response marker; a non-nil prior value is an answer.
    async fn someone_answered(&self, session_id: &str) -> SessionResult<bool> {
        let key = self.config.request_key(session_id);
        let mut conn = self.service.get().await?;
        let (answer,): (Option<String>,) = redis::pipe()
            .atomic()
            .get(&key)
            .del(&key)
            .ignore()
            .query_async(&mut *conn)
            .await?;
        Ok(answer.is_some())
    }

    /// After an answered drain, poll storage until the payload lands.
    async fn await_drained_payload(&self, session_id: &str) -> SessionResult<Option<Vec<u8>>> {
        let deadline = Instant::now() + self.config.await_timeout;

        loop {
            if Instant::now() > deadline {
                return Ok(None);
            }
            if let Some(raw) = self.take_payload(session_id).await? {
                return Ok(Some(raw));
            }
            tokio::time::sleep(self.config.await_poll_interval).await;
        }
    }

    /// Atomically read and evict one session: GET + DEL + index removal in
    /// a single transaction.
    async fn take_payload(&self, session_id: &str) -> SessionResult<Option<Vec<u8>>> {
        let key = self.config.session_key(session_id);
        let mut conn = self.service.get().await?;
        let (payload,): (Option<Vec<u8>>,) = redis::pipe()
            .atomic()
            .get(&key)
            .del(&key)
            .ignore()
            .zrem(self.config.index_key(), session_id)
            .ignore()
            .query_async(&mut *conn)
            .await?;
        Ok(payload)
    }

    async fn write_drain_marker(&self, session_id: &str) -> SessionResult<()> {
        let mut conn = self.service.get().await?;
        let ttl = self.config.marker_ttl.as_secs().max(1);
        let _: () = conn
            .set_ex(self.config.request_key(session_id), "true", ttl)
            .await?;
        Ok(())
    }

    /// Wait for an in-flight request to release the session. Only this
    /// session's flag is inspected; unrelated sessions stay available.
    async fn await_processing_end(&self, session: &C::Session) {
        let mut backoff = PROCESSING_BACKOFF_FLOOR;
        while session.is_processing() {
            tokio::time::sleep(backoff).await;
            backoff = (backoff * 2).min(self.config.processing_backoff_cap);
        }
    }

    async fn count_sessions(&self) -> SessionResult<usize> {
        let mut conn = self.service.get().await?;
        let count: u64 = conn
            .zcount(self.config.index_key(), "-inf", "+inf")
            .await?;
        Ok(count as usize)
    }

    async fn list_sessions(&self) -> SessionResult<Vec<String>> {
        let mut conn = self.service.get().await?;
        let ids: Vec<String> = conn.zrange(self.config.index_key(), 0, -1).await?;
        Ok(ids)
    }

    async fn list_expired_sessions(&self) -> SessionResult<Vec<String>> {
        let now = Utc::now().timestamp_millis();
        let mut conn = self.service.get().await?;
        let ids: Vec<String> = conn
            .zrangebyscore(self.config.index_key(), 0, now)
            .await?;
        Ok(ids)
    }

    async fn delete_all(&self) -> SessionResult<()> {
        self.service
            .del(&self.config.session_key("*"), Some("string"))
            .await?;
        let mut conn = self.service.get().await?;
        let _: () = conn.del(self.config.index_key()).await?;
        Ok(())
    }

    async fn delete_session(&self, session_id: &str) -> SessionResult<()> {
        let mut conn = self.service.get().await?;
        let _: () = redis::pipe()
            .atomic()
            .del(self.config.session_key(session_id))
            .ignore()
            .zrem(self.config.index_key(), session_id)
            .ignore()
            .query_async(&mut *conn)
            .await?;
        Ok(())
    }

    fn mark_drained(&self, session_id: &str) {
        self.drained.lock().insert(session_id.to_string());
    }

    fn is_drained(&self, session_id: &str) -> bool {
        self.drained.lock().contains(session_id)
    }
}
