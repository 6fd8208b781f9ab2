//! Integration tests for capstan-redis

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use capstan_redis::*;

#[test]
fn config_defaults() {
    let config = RedisConfig::default();
    assert_eq!(config.url, "redis://localhost:6379");
    assert_eq!(config.pool_size, 10);
    assert_eq!(config.min_idle, Some(1));
    assert_eq!(config.idle_timeout, Duration::from_secs(10));
    assert!(!config.uses_sentinel());
}

#[test]
fn config_builder_options() {
    let config = RedisConfig::builder()
        .url("redis://cache:6379")
        .pool_size(4)
        .min_idle(2)
        .connection_timeout(Duration::from_millis(250))
        .database(3)
        .build();

    assert_eq!(config.url, "redis://cache:6379");
    assert_eq!(config.pool_size, 4);
    assert_eq!(config.min_idle, Some(2));
    assert_eq!(config.connection_timeout, Duration::from_millis(250));
    assert_eq!(config.connection_url(), "redis://cache:6379/3");
}

#[test]
fn error_display() {
    let err = RedisError::Connection("refused".to_string());
    assert!(format!("{}", err).contains("refused"));
    assert!(err.is_retryable());

    let err = RedisError::Command("bad arity".to_string());
    assert!(!err.is_retryable());
}

// The tests below require a local Redis: cargo test -- --ignored

#[tokio::test]
#[ignore = "requires Redis"]
async fn pool_validates_on_build() {
    let config = RedisConfig::builder().url("redis://localhost:6379").build();
    let redis = RedisService::new(config).await.unwrap();

    let stats = redis.pool_stats();
    assert!(stats.connections >= 1);
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn publish_reaches_subscriber_listeners() {
    let config = RedisConfig::builder().url("redis://localhost:6379").build();
    let redis = Arc::new(RedisService::new(config).await.unwrap());

    let manager = DrainSubscriberManager::with_channel(Arc::clone(&redis), "capstan-test:drain");
    let hits = Arc::new(AtomicUsize::new(0));

    let listener_hits = Arc::clone(&hits);
    manager.subscribe(
        "test-owner",
        Arc::new(move |id: String| {
            let hits = Arc::clone(&listener_hits);
            Box::pin(async move {
                assert_eq!(id, "s1");
                hits.fetch_add(1, Ordering::SeqCst);
            })
        }),
    );

    // Give the background task time to establish the subscription.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(manager.state(), SubscriberState::Running);

    redis.publish(manager.channel(), "s1").await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    manager.stop();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(manager.state(), SubscriberState::Stopped);

    // A stopped manager ignores new registrations.
    manager.subscribe(
        "test-owner",
        Arc::new(|_| Box::pin(async {})),
    );
    assert_eq!(manager.listener_count(), 0);
}
