//! Integration tests for capstan-session
//!
//! The tests below require a local Redis: cargo test -- --ignored

use std::sync::Arc;
use std::time::{Duration, Instant};

use capstan_redis::{DrainSubscriberManager, RedisConfig, RedisService};
use capstan_session::prelude::*;

/// One emulated cluster node: a store plus its in-memory session table.
struct Node {
    store: Arc<RedisSessionStore<JsonSessionCodec>>,
    registry: Arc<LocalSessionRegistry>,
}

async fn node(prefix: &str) -> Node {
    let config = RedisConfig::builder().url("redis://localhost:6379").build();
    let service = Arc::new(RedisService::new(config).await.unwrap());
    let drain = Arc::new(DrainSubscriberManager::new(Arc::clone(&service)));
    let registry = LocalSessionRegistry::new();
    let store = Arc::new(RedisSessionStore::new(
        service,
        drain,
        registry.clone(),
        JsonSessionCodec,
        SessionStoreConfig::default().with_prefix(prefix),
    ));
    Node { store, registry }
}

fn unique_prefix() -> String {
    format!("capstan-test-{}", generate_session_id())
}

fn session(id: &str, max_inactive: Duration) -> Arc<LocalSession> {
    Arc::new(LocalSession::new(id, max_inactive))
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn save_then_load_round_trips() {
    let node = node(&unique_prefix()).await;

    let s1 = session("s1", Duration::from_secs(60));
    s1.set("who", "alice").unwrap();
    node.store.save(s1.as_ref()).await.unwrap();

    let restored = node.store.load("s1").await.expect("session should load");
    assert_eq!(restored.id(), "s1");
    assert_eq!(restored.get::<String>("who"), Some("alice".to_string()));

    // load consumed the entry
    assert_eq!(node.store.size().await, 0);
    node.store.clear().await;
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn size_matches_keys() {
    let node = node(&unique_prefix()).await;

    for id in ["s1", "s2", "s3"] {
        node.store
            .save(session(id, Duration::from_secs(60)).as_ref())
            .await
            .unwrap();
    }

    let keys = node.store.keys().await;
    assert_eq!(node.store.size().await, keys.len());
    assert_eq!(keys.len(), 3);
    for id in ["s1", "s2", "s3"] {
        assert!(keys.iter().any(|k| k == id));
    }

    node.store.remove("s2").await;
    assert_eq!(node.store.size().await, 2);
    assert_eq!(node.store.keys().await.len(), 2);
    node.store.clear().await;
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn clear_empties_the_store() {
    let node = node(&unique_prefix()).await;

    node.store
        .save(session("s1", Duration::from_secs(60)).as_ref())
        .await
        .unwrap();
    node.store
        .save(session("s2", Duration::from_secs(60)).as_ref())
        .await
        .unwrap();
    assert_eq!(node.store.size().await, 2);

    node.store.clear().await;
    assert_eq!(node.store.size().await, 0);
    assert!(node.store.keys().await.is_empty());
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn expired_keys_reports_expired_session() {
    let node = node(&unique_prefix()).await;

    node.store
        .save(session("stale", Duration::from_secs(1)).as_ref())
        .await
        .unwrap();
    node.store
        .save(session("fresh", Duration::from_secs(60)).as_ref())
        .await
        .unwrap();

    assert!(node.store.expired_keys().await.is_empty());

    tokio::time::sleep(Duration::from_secs(2)).await;

    let expired = node.store.expired_keys().await;
    assert_eq!(expired, vec!["stale".to_string()]);
    node.store.clear().await;
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn disabled_store_refuses_save() {
    let config = RedisConfig::builder().url("redis://localhost:6379").build();
    let service = Arc::new(RedisService::new(config).await.unwrap());
    let drain = Arc::new(DrainSubscriberManager::new(Arc::clone(&service)));
    let store: Arc<RedisSessionStore<JsonSessionCodec>> = Arc::new(RedisSessionStore::new(
        service,
        drain,
        LocalSessionRegistry::new(),
        JsonSessionCodec,
        SessionStoreConfig::default()
            .with_prefix(&unique_prefix())
            .with_activation(Activation::Manual),
    ));

    // CAPSTAN_SESSION_ENABLED is not set, so a manual store stays inactive.
    assert!(!store.is_enabled());
    assert!(!store.start());

    let result = store.save(session("s1", Duration::from_secs(60)).as_ref()).await;
    assert!(matches!(result, Err(SessionError::NotSerializable(_))));
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn load_unknown_returns_none_within_drain_timeout() {
    let node = node(&unique_prefix()).await;

    let start = Instant::now();
    let loaded = node.store.load("unknown").await;
    let elapsed = start.elapsed();

    assert!(loaded.is_none());
    // Bounded by the 1 s drain timeout: not immediate, not the 5 min ceiling.
    assert!(elapsed >= Duration::from_millis(1000), "returned too early: {elapsed:?}");
    assert!(elapsed <= Duration::from_millis(1600), "returned too late: {elapsed:?}");
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn drain_moves_session_between_nodes() {
    let prefix = unique_prefix();
    let holder = node(&prefix).await;
    let requester = node(&prefix).await;

    assert!(holder.store.start());
    assert!(requester.store.start());
    tokio::time::sleep(Duration::from_millis(200)).await;

    // The session lives only in the holder's memory; nothing is persisted.
    let live = session("s4", Duration::from_secs(60));
    live.set("who", "alice").unwrap();
    holder.registry.insert(Arc::clone(&live));
    assert_eq!(requester.store.size().await, 0);

    let start = Instant::now();
    let drained = requester
        .store
        .load("s4")
        .await
        .expect("drained session should load");
    let elapsed = start.elapsed();

    assert_eq!(drained.id(), "s4");
    assert_eq!(drained.get::<String>("who"), Some("alice".to_string()));
    assert!(elapsed <= Duration::from_secs(2), "drain took {elapsed:?}");

    // The holder no longer owns the session.
    assert!(!live.is_valid());
    assert!(holder.registry.is_empty());

    // The requester now owns it: a remove on the holder's store must not
    // delete the entry the new owner writes.
    requester.store.save(drained.as_ref()).await.unwrap();
    holder.store.remove("s4").await;
    assert_eq!(requester.store.size().await, 1);

    requester.store.clear().await;
    holder.store.stop();
    requester.store.stop();
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn drain_waits_for_in_flight_processing() {
    let node = node(&unique_prefix()).await;

    let busy = session("busy", Duration::from_secs(60));
    busy.set_processing(true);
    node.registry.insert(Arc::clone(&busy));

    let release = Arc::clone(&busy);
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        release.set_processing(false);
    });

    let start = Instant::now();
    node.store.on_drain_request("busy").await;
    let elapsed = start.elapsed();

    // The drain must not have completed before the flag cleared.
    assert!(elapsed >= Duration::from_millis(300), "drained too early: {elapsed:?}");
    assert!(!busy.is_valid());
    assert_eq!(node.store.size().await, 1);
    node.store.clear().await;
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn drain_request_for_unknown_session_writes_nothing() {
    let node = node(&unique_prefix()).await;

    node.store.on_drain_request("unknown").await;

    // Silence is the correct answer: no marker, no payload, no index entry.
    assert_eq!(node.store.size().await, 0);
    assert!(node.store.load("unknown").await.is_none());
}
