//! Integration tests for the two-tier cache on a real database file.

use std::sync::Arc;
use std::time::Duration;

use archive_core::cache::{CacheLookup, Outcome};
use archive_core::{CachePayload, CacheSettings, Clock, ManualClock, PutOptions, TwoTierCache};
use bytes::Bytes;
use serde_json::json;
use tempfile::TempDir;

fn settings(dir: &TempDir) -> CacheSettings {
    CacheSettings {
        path: Some(dir.path().join("nested").join("cache.db")),
        ..CacheSettings::default()
    }
}

fn payload(text: &str) -> CachePayload {
    CachePayload::Bytes(Bytes::from(text.to_string()))
}

async fn open(settings: &CacheSettings, clock: &Arc<ManualClock>) -> TwoTierCache {
    let clock: Arc<dyn Clock> = clock.clone();
    TwoTierCache::open(settings.clone(), clock).await.unwrap()
}

#[tokio::test]
async fn test_entries_of_every_kind_survive_restart() {
    let dir = TempDir::new().unwrap();
    let settings = settings(&dir);
    let clock = Arc::new(ManualClock::new());

    let cache = open(&settings, &clock).await;
    cache.put(
        "metadata:mario",
        CachePayload::Metadata(json!({"metadata": {"identifier": "mario"}})),
        PutOptions::positive(),
    );
    cache.put("metadata:wario", CachePayload::Absent, PutOptions::negative());
    cache.put("thumb:mario", payload("png"), PutOptions::pinned());
    cache.flush().await;
    drop(cache);

    let reopened = open(&settings, &clock).await;
    let meta = reopened.get("metadata:mario").await.into_entry().unwrap();
    assert_eq!(
        meta.payload,
        CachePayload::Metadata(json!({"metadata": {"identifier": "mario"}}))
    );

    let absent = reopened.get("metadata:wario").await.into_entry().unwrap();
    assert_eq!(absent.outcome, Outcome::Negative);
    assert_eq!(absent.payload, CachePayload::Absent);

    let thumb = reopened.get("thumb:mario").await.into_entry().unwrap();
    assert!(thumb.pinned);
    assert_eq!(thumb.payload, payload("png"));

    let stats = reopened.stats().await;
    assert_eq!(stats.persistent_hits, 3);
    assert_eq!(stats.persistent.unwrap().items, 3);
}

#[tokio::test]
async fn test_memory_eviction_is_backed_by_disk() {
    let dir = TempDir::new().unwrap();
    let settings = CacheSettings {
        memory_max_items: 2,
        ..settings(&dir)
    };
    let clock = Arc::new(ManualClock::new());
    let cache = open(&settings, &clock).await;

    for i in 0..5 {
        cache.put(&format!("k{i}"), payload("v"), PutOptions::default());
    }
    cache.flush().await;

    let stats = cache.stats().await;
    assert_eq!(stats.memory.items, 2);
    assert_eq!(stats.persistent.unwrap().items, 5);

    assert!(cache.get("k0").await.is_hit());
    assert_eq!(cache.stats().await.persistent_hits, 1);
}

#[tokio::test]
async fn test_disk_bound_evicts_oldest_rows() {
    let dir = TempDir::new().unwrap();
    let settings = CacheSettings {
        disk_max_items: 3,
        ..settings(&dir)
    };
    let clock = Arc::new(ManualClock::new());
    let cache = open(&settings, &clock).await;

    for i in 0..5 {
        cache.put(&format!("k{i}"), payload("v"), PutOptions::default());
        clock.advance(Duration::from_secs(1));
    }
    cache.flush().await;
    assert_eq!(cache.stats().await.persistent.unwrap().items, 3);
    drop(cache);

    let reopened = open(&settings, &clock).await;
    assert!(matches!(reopened.get("k0").await, CacheLookup::Miss));
    assert!(matches!(reopened.get("k1").await, CacheLookup::Miss));
    assert!(reopened.get("k4").await.is_hit());
}

#[tokio::test]
async fn test_pinned_rows_survive_disk_pressure_and_expiry() {
    let dir = TempDir::new().unwrap();
    let settings = CacheSettings {
        disk_max_items: 2,
        ..settings(&dir)
    };
    let clock = Arc::new(ManualClock::new());
    let cache = open(&settings, &clock).await;

    cache.put(
        "keep",
        payload("pinned"),
        PutOptions::pinned().with_ttl(Duration::from_secs(1)),
    );
    for i in 0..4 {
        clock.advance(Duration::from_secs(1));
        cache.put(&format!("k{i}"), payload("v"), PutOptions::default());
    }
    cache.flush().await;

    clock.advance(Duration::from_secs(3600));
    let summary = cache.purge_expired().await;
    assert_eq!(summary.persistent, 0);
    drop(cache);

    let reopened = open(&settings, &clock).await;
    assert!(reopened.get("keep").await.is_hit());
    assert!(reopened.get("k3").await.is_hit());
}

#[tokio::test]
async fn test_expired_rows_purged_from_both_tiers() {
    let dir = TempDir::new().unwrap();
    let settings = settings(&dir);
    let clock = Arc::new(ManualClock::new());
    let cache = open(&settings, &clock).await;

    cache.put(
        "short",
        payload("v"),
        PutOptions::default().with_ttl(Duration::from_secs(60)),
    );
    cache.put("long", payload("v"), PutOptions::default());
    cache.flush().await;

    clock.advance(Duration::from_secs(61));
    let summary = cache.purge_expired().await;
    assert_eq!(summary.memory, 1);
    assert_eq!(summary.persistent, 1);
    assert!(cache.get("long").await.is_hit());
    assert!(!cache.get("short").await.is_hit());
}

#[tokio::test]
async fn test_cache_only_serves_expired_rows_after_restart() {
    let dir = TempDir::new().unwrap();
    let settings = settings(&dir);
    let clock = Arc::new(ManualClock::new());

    let cache = open(&settings, &clock).await;
    cache.put("metadata:old", CachePayload::Absent, PutOptions::negative());
    cache.flush().await;
    drop(cache);

    clock.advance(Duration::from_secs(2 * 3600));
    let reopened = open(&settings, &clock).await;
    reopened.set_cache_only(true);
    let entry = reopened.get("metadata:old").await.into_entry().unwrap();
    assert_eq!(entry.outcome, Outcome::Negative);

    reopened.set_cache_only(false);
    reopened.remove("metadata:old").await;
    assert!(!reopened.get("metadata:old").await.is_hit());
}

#[tokio::test]
async fn test_clear_empties_disk() {
    let dir = TempDir::new().unwrap();
    let settings = settings(&dir);
    let clock = Arc::new(ManualClock::new());
    let cache = open(&settings, &clock).await;

    cache.put("a", payload("1"), PutOptions::pinned());
    cache.put("b", payload("2"), PutOptions::default());
    cache.clear().await;

    let stats = cache.stats().await;
    assert_eq!(stats.memory.items, 0);
    assert_eq!(stats.persistent.unwrap().items, 0);
}
