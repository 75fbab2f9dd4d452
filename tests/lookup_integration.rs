//! Integration tests for lookups through a fully wired session.
//!
//! The session points at a mock archive and keeps its cache in a temp dir,
//! so these tests observe exactly which requests a lookup makes.

use std::sync::Arc;

use archive_core::lookup::{metadata_key, thumbnail_key};
use archive_core::{
    AccessConfig, ArchiveSession, CachePayload, Intensity, LookupError, ManualClock, PutOptions,
    Thumbnail,
};
use bytes::Bytes;
use serde_json::json;
use tempfile::TempDir;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config(server: &MockServer, dir: &TempDir, intensity: Intensity) -> AccessConfig {
    let mut config = AccessConfig::default();
    config.intensity = intensity;
    config.endpoints.base_url = server.uri();
    config.cache.path = Some(dir.path().join("cache.db"));
    config.retry.max_attempts = 2;
    config
}

async fn session(server: &MockServer, dir: &TempDir, intensity: Intensity) -> ArchiveSession {
    ArchiveSession::open_with_clock(
        config(server, dir, intensity),
        Arc::new(ManualClock::new()),
    )
    .await
    .unwrap()
}

async fn request_count(server: &MockServer) -> usize {
    server.received_requests().await.unwrap().len()
}

fn item(identifier: &str) -> serde_json::Value {
    json!({
        "metadata": {"identifier": identifier, "title": "Super Mario", "mediatype": "software"},
        "files": [{"name": "rom.zip", "format": "ZIP", "size": "1024"}]
    })
}

#[tokio::test]
async fn test_negative_entries_skip_variants_without_requests() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    Mock::given(method("GET"))
        .and(path("/metadata/Super_Mario"))
        .respond_with(ResponseTemplate::new(200).set_body_json(item("Super_Mario")))
        .expect(1)
        .mount(&server)
        .await;

    let session = session(&server, &dir, Intensity::Standard).await;
    for known_absent in ["Super-Mario", "super-mario"] {
        session.cache().put(
            &metadata_key(known_absent),
            CachePayload::Absent,
            PutOptions::negative(),
        );
    }

    let found = session.lookup().resolve("Super Mario").await.unwrap();
    assert_eq!(found.identifier, "Super_Mario");
    assert_eq!(found.files.len(), 1);
    assert_eq!(found.files[0].size, Some(1024));

    assert_eq!(request_count(&server).await, 1);
    let metrics = session.lookup().metrics();
    assert_eq!(metrics.negative_cache_hits, 2);
    assert_eq!(metrics.network_lookups, 1);
}

#[tokio::test]
async fn test_absent_variants_are_remembered() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let session = session(&server, &dir, Intensity::Standard).await;
    let error = session.lookup().resolve("Mario").await.unwrap_err();
    assert!(error.is_not_found());
    // "Mario" and "mario" were each tried once.
    assert_eq!(request_count(&server).await, 2);

    let again = session.lookup().resolve("Mario").await.unwrap_err();
    assert!(again.is_not_found());
    assert_eq!(request_count(&server).await, 2);
}

#[tokio::test]
async fn test_cache_only_makes_zero_requests() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(item("mario")))
        .expect(0)
        .mount(&server)
        .await;

    let session = session(&server, &dir, Intensity::CacheOnly).await;
    let error = session.lookup().resolve("mario").await.unwrap_err();
    assert!(matches!(error, LookupError::CacheOnlyViolation { .. }));

    let error = session.lookup().search("mario").await.unwrap_err();
    assert!(matches!(error, LookupError::CacheOnlyViolation { .. }));

    let thumbs = session
        .lookup()
        .prefetch_thumbnails(&["mario".to_string()])
        .await;
    assert!(thumbs[0].is_placeholder());
    assert_eq!(session.client().metrics().requests, 0);
}

#[tokio::test]
async fn test_resolved_item_served_offline_after_restart() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    Mock::given(method("GET"))
        .and(path("/metadata/mario64"))
        .respond_with(ResponseTemplate::new(200).set_body_json(item("mario64")))
        .expect(1)
        .mount(&server)
        .await;

    let online = session(&server, &dir, Intensity::Full).await;
    online.lookup().resolve("mario64").await.unwrap();
    online.flush().await;
    drop(online);

    let offline = session(&server, &dir, Intensity::CacheOnly).await;
    let item = offline.lookup().resolve("mario64").await.unwrap();
    assert_eq!(item.title.as_deref(), Some("Super Mario"));
    assert_eq!(offline.lookup().metrics().positive_cache_hits, 1);
}

#[tokio::test]
async fn test_search_with_thumbnails_degrades_to_placeholders() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    Mock::given(method("GET"))
        .and(path("/advancedsearch.php"))
        .and(query_param("q", "mario"))
        .and(query_param("rows", "50"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "response": {"docs": [
                {"identifier": "mario-a", "title": "A", "mediatype": "software"},
                {"identifier": "mario-b", "title": "B"},
                {"title": "no identifier"}
            ]}
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/services/img/mario-a"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"\x89PNG".to_vec()))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/services/img/mario-b"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let session = session(&server, &dir, Intensity::Standard).await;
    let hits = session.lookup().search("  mario ").await.unwrap();
    assert_eq!(hits.len(), 2);

    let ids: Vec<String> = hits.iter().map(|hit| hit.identifier.clone()).collect();
    let thumbs = session.lookup().prefetch_thumbnails(&ids).await;
    assert_eq!(
        thumbs[0],
        Thumbnail::Image {
            identifier: "mario-a".to_string(),
            bytes: Bytes::from_static(b"\x89PNG"),
        }
    );
    assert!(thumbs[1].is_placeholder());

    // Second round is served from the cache, including the known-missing image.
    let again = session.lookup().search("mario").await.unwrap();
    assert_eq!(again, hits);
    let thumbs = session.lookup().prefetch_thumbnails(&ids).await;
    assert!(!thumbs[0].is_placeholder());
    assert!(thumbs[1].is_placeholder());
    assert!(session.cache().get(&thumbnail_key("mario-b")).await.is_hit());
}

#[tokio::test]
async fn test_minimal_intensity_never_fetches_thumbnails() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    let session = session(&server, &dir, Intensity::Minimal).await;

    let thumbs = session
        .lookup()
        .prefetch_thumbnails(&["a1".to_string(), "b2".to_string()])
        .await;
    assert!(thumbs.iter().all(Thumbnail::is_placeholder));
    assert_eq!(request_count(&server).await, 0);
}
