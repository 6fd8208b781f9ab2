//! Session-drain broadcast channel: subscriber and its lifecycle manager.
//!
//! One process runs at most one [`DrainSubscriber`], owned by a
//! [`DrainSubscriberManager`]. The subscriber holds a single long-lived
//! subscription to the shared drain channel and fans every received session
//! id out to the registered listeners, in arrival order, on a dedicated
//! background task.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::StreamExt;
use parking_lot::{Mutex, RwLock};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::RedisService;

/// Broadcast channel carrying session-drain requests.
///
/// Requesters and responders both take the name from the manager so it is
/// never hard-coded twice.
pub const SESSION_DRAIN_CHANNEL: &str = "capstan:session-drain";

/// Callback invoked with each drained session id.
pub type DrainListener = Arc<dyn Fn(String) -> BoxFuture<'static, ()> + Send + Sync>;

/// Subscriber lifecycle. `Stopped` is terminal: a stopped subscriber is
/// replaced, never restarted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriberState {
    /// Constructed, background task not yet running.
    Created,
    /// Background task holds the channel subscription.
    Running,
    /// Subscription ended; the task has completed.
    Stopped,
}

/// Listener registry keyed by owner. Registration is idempotent per owner.
#[derive(Default)]
struct ListenerRegistry {
    inner: RwLock<HashMap<String, DrainListener>>,
}

impl ListenerRegistry {
    fn insert(&self, owner: &str, listener: DrainListener) {
        self.inner
            .write()
            .entry(owner.to_string())
            .or_insert(listener);
    }

    fn remove(&self, owner: &str) {
        self.inner.write().remove(owner);
    }

    fn clear(&self) {
        self.inner.write().clear();
    }

    fn snapshot(&self) -> Vec<DrainListener> {
        self.inner.read().values().cloned().collect()
    }

    fn len(&self) -> usize {
        self.inner.read().len()
    }
}

/// The single long-lived subscription to the drain channel.
///
/// Every message received while `Running` is delivered sequentially to every
/// registered listener: best-effort, at-most-once, no back-pressure. A slow
/// listener delays delivery to the others but never loses it.
pub struct DrainSubscriber {
    service: Arc<RedisService>,
    channel: String,
    listeners: ListenerRegistry,
    state: Mutex<SubscriberState>,
    shutdown: Notify,
}

impl DrainSubscriber {
    fn new(service: Arc<RedisService>, channel: String) -> Self {
        Self {
            service,
            channel,
            listeners: ListenerRegistry::default(),
            state: Mutex::new(SubscriberState::Created),
            shutdown: Notify::new(),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SubscriberState {
        *self.state.lock()
    }

    /// The channel this subscriber listens on.
    pub fn channel(&self) -> &str {
        &self.channel
    }

    fn subscribe(&self, owner: &str, listener: DrainListener) {
        self.listeners.insert(owner, listener);
    }

    fn unsubscribe(&self, owner: &str) {
        self.listeners.remove(owner);
    }

    /// Remove every listener and ask the consumption loop to end.
    fn unsubscribe_all(&self) {
        self.listeners.clear();
        self.shutdown.notify_one();
    }

    fn set_state(&self, state: SubscriberState) {
        *self.state.lock() = state;
    }

    /// Background task body: subscribe, then consume until told to stop.
    async fn run(self: Arc<Self>) {
        self.set_state(SubscriberState::Running);

        let mut pubsub = match self.service.pubsub().await {
            Ok(pubsub) => pubsub,
            Err(e) => {
                error!(error = %e, "failed to open drain subscription connection");
                self.set_state(SubscriberState::Stopped);
                return;
            }
        };

        if let Err(e) = pubsub.subscribe(&self.channel).await {
            error!(error = %e, channel = %self.channel, "failed to subscribe to drain channel");
            self.set_state(SubscriberState::Stopped);
            return;
        }

        info!(channel = %self.channel, "subscribed to session drain channel");

        {
            let mut stream = Box::pin(pubsub.on_message());
            loop {
                tokio::select! {
                    _ = self.shutdown.notified() => break,
                    msg = stream.next() => {
                        let Some(msg) = msg else { break };
                        let session_id: String = match msg.get_payload() {
                            Ok(payload) => payload,
                            Err(e) => {
                                error!(error = %e, "failed to read drain message payload");
                                continue;
                            }
                        };
                        self.dispatch(&session_id).await;
                    }
                }
            }
        }

        let _ = pubsub.unsubscribe(&self.channel).await;
        self.set_state(SubscriberState::Stopped);
        debug!(channel = %self.channel, "drain subscriber stopped");
    }

    /// Deliver one session id to every registered listener, in order.
    async fn dispatch(&self, session_id: &str) {
        let listeners = self.listeners.snapshot();
        debug!(session_id = %session_id, listeners = listeners.len(), "drain request received");
        for listener in listeners {
            listener(session_id.to_string()).await;
        }
    }
}

/// Owns the process's one [`DrainSubscriber`].
///
/// Construct one instance per process and share it explicitly; the
/// background task starts lazily on the first listener registration.
/// [`stop`](Self::stop) removes all listeners and cancels the task; a
/// stopped manager is not reusable, construct a fresh one instead.
pub struct DrainSubscriberManager {
    subscriber: Arc<DrainSubscriber>,
    task: Mutex<Option<JoinHandle<()>>>,
    stopped: AtomicBool,
}

impl DrainSubscriberManager {
    /// Create a manager for the default drain channel.
    pub fn new(service: Arc<RedisService>) -> Self {
        Self::with_channel(service, SESSION_DRAIN_CHANNEL)
    }

    /// Create a manager subscribing to a custom channel name.
    pub fn with_channel(service: Arc<RedisService>, channel: impl Into<String>) -> Self {
        Self {
            subscriber: Arc::new(DrainSubscriber::new(service, channel.into())),
            task: Mutex::new(None),
            stopped: AtomicBool::new(false),
        }
    }

    /// The channel name requesters publish to and responders listen on.
    pub fn channel(&self) -> &str {
        self.subscriber.channel()
    }

    /// Current subscriber state.
    pub fn state(&self) -> SubscriberState {
        self.subscriber.state()
    }

    /// Number of registered listeners.
    pub fn listener_count(&self) -> usize {
        self.subscriber.listeners.len()
    }

    /// Register a listener under an owner key (idempotent per owner) and
    /// start the subscriber task if it is not running yet.
    pub fn subscribe(&self, owner: &str, listener: DrainListener) {
        if self.stopped.load(Ordering::SeqCst) {
            warn!(owner = %owner, "subscribe after stop ignored; manager is not reusable");
            return;
        }
        self.subscriber.subscribe(owner, listener);
        self.ensure_started();
    }

    /// Remove a single owner's listener.
    pub fn unsubscribe(&self, owner: &str) {
        self.subscriber.unsubscribe(owner);
    }

    /// Remove all listeners, end the subscription, and cancel the
    /// background task.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }

        self.subscriber.unsubscribe_all();
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
        self.subscriber.set_state(SubscriberState::Stopped);
    }

    fn ensure_started(&self) {
        let mut task = self.task.lock();
        if task.is_none() && !self.stopped.load(Ordering::SeqCst) {
            *task = Some(tokio::spawn(Arc::clone(&self.subscriber).run()));
        }
    }
}

impl Drop for DrainSubscriberManager {
    fn drop(&mut self) {
        self.stop();
    }
}
