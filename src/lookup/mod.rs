//! Identifier resolution against the archive, cache first.
//!
//! [`LookupOrchestrator::resolve`] walks the candidate spellings produced by
//! [`search_strategy`] one at a time. Each candidate is answered from the
//! cache when possible; otherwise exactly one metadata request is made and
//! its outcome, found or absent, is cached before moving on. A candidate
//! known to be absent therefore costs nothing the next time.
//!
//! # Example
//!
//! ```no_run
//! use archive_core::{AccessConfig, ArchiveSession};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let session = ArchiveSession::open(AccessConfig::default()).await?;
//! let item = session.lookup().resolve("Super Mario").await?;
//! println!("{} - {:?}", item.identifier, item.title);
//! # Ok(())
//! # }
//! ```

mod api;
mod metadata;

use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use futures_util::future::join_all;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

pub use api::{ArchiveEndpoints, DEFAULT_BASE_URL};
pub use metadata::{ItemFile, ItemMetadata, SearchHit, Thumbnail, parse_search_results};

use crate::cache::{CacheLookup, CachePayload, PutOptions, TwoTierCache};
use crate::config::Intensity;
use crate::http::{FetchError, RequestKind, ResilientClient};
use crate::identifier::{NormalizationError, search_strategy};

/// Errors from lookups.
#[derive(Debug, Error)]
pub enum LookupError {
    /// The input cannot be turned into any identifier.
    #[error("cannot derive an identifier from {input:?}")]
    InvalidIdentifier {
        /// The input as supplied.
        input: String,
        /// Why normalization failed.
        errors: Vec<NormalizationError>,
    },

    /// Every candidate identifier is absent upstream.
    #[error("no item found for {identifier:?} (tried {})", .variants.join(", "))]
    NotFound {
        /// The input as supplied.
        identifier: String,
        /// Candidates tried, in order.
        variants: Vec<String>,
        /// Last HTTP status seen, if any request was made.
        last_status: Option<u16>,
        /// Network attempts made across all candidates.
        attempts: u32,
    },

    /// Cache-only mode and nothing is cached for a candidate.
    #[error("{identifier:?} is not cached ({key}) and cache-only mode forbids network access")]
    CacheOnlyViolation {
        /// The input as supplied.
        identifier: String,
        /// Cache key that missed.
        key: String,
    },

    /// An empty search query.
    #[error("search query is empty")]
    EmptyQuery,

    /// The server answered with something that is not the expected JSON.
    #[error("malformed response from {url}: {reason}")]
    MalformedResponse {
        /// Requested URL.
        url: String,
        /// What was wrong.
        reason: String,
    },

    /// A request failed for a reason other than absence.
    #[error(transparent)]
    Fetch(#[from] FetchError),
}

impl LookupError {
    fn malformed(url: &str, reason: impl ToString) -> Self {
        Self::MalformedResponse {
            url: url.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Returns `true` for [`LookupError::NotFound`].
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Snapshot of orchestrator activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct LookupMetrics {
    /// `resolve` calls.
    pub resolves: u64,
    /// `resolve` calls that found an item.
    pub resolved: u64,
    /// `resolve` calls that ended in `NotFound`.
    pub not_found: u64,
    /// Candidates answered by a positive cache entry.
    pub positive_cache_hits: u64,
    /// Candidates skipped because of a negative cache entry.
    pub negative_cache_hits: u64,
    /// Metadata, search and thumbnail requests sent.
    pub network_lookups: u64,
    /// Lookups refused in cache-only mode.
    pub cache_only_violations: u64,
    /// `search` calls.
    pub searches: u64,
    /// Thumbnails delivered as images.
    pub thumbnails: u64,
    /// Thumbnails replaced by placeholders.
    pub placeholders: u64,
}

#[derive(Debug, Default)]
struct LookupCounters {
    resolves: AtomicU64,
    resolved: AtomicU64,
    not_found: AtomicU64,
    positive_cache_hits: AtomicU64,
    negative_cache_hits: AtomicU64,
    network_lookups: AtomicU64,
    cache_only_violations: AtomicU64,
    searches: AtomicU64,
    thumbnails: AtomicU64,
    placeholders: AtomicU64,
}

impl LookupCounters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::SeqCst);
    }
}

/// Cache key for an item's metadata.
#[must_use]
pub fn metadata_key(identifier: &str) -> String {
    format!("metadata:{identifier}")
}

/// Cache key for a search at one intensity.
#[must_use]
pub fn search_key(intensity: Intensity, query: &str) -> String {
    format!("search:{}:{query}", intensity.as_str())
}

/// Cache key for an item's thumbnail.
#[must_use]
pub fn thumbnail_key(identifier: &str) -> String {
    format!("thumbnail:{identifier}")
}

/// Resolves user input to archive items with minimal network cost.
#[derive(Debug)]
pub struct LookupOrchestrator {
    client: Arc<ResilientClient>,
    cache: Arc<TwoTierCache>,
    endpoints: ArchiveEndpoints,
    intensity: Mutex<Intensity>,
    counters: LookupCounters,
}

impl LookupOrchestrator {
    /// Creates an orchestrator over shared client and cache.
    #[must_use]
    pub fn new(
        client: Arc<ResilientClient>,
        cache: Arc<TwoTierCache>,
        endpoints: ArchiveEndpoints,
        intensity: Intensity,
    ) -> Self {
        Self {
            client,
            cache,
            endpoints,
            intensity: Mutex::new(intensity),
            counters: LookupCounters::default(),
        }
    }

    /// Current intensity level.
    #[must_use]
    pub fn intensity(&self) -> Intensity {
        *self.intensity.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Changes the intensity level. Does not touch the cache's mode.
    pub fn set_intensity(&self, intensity: Intensity) {
        *self.intensity.lock().unwrap_or_else(PoisonError::into_inner) = intensity;
    }

    fn cache_only(&self) -> bool {
        self.cache.is_cache_only() || self.intensity().is_cache_only()
    }

    /// Endpoints requests are sent to.
    #[must_use]
    pub fn endpoints(&self) -> &ArchiveEndpoints {
        &self.endpoints
    }

    /// Resolves `raw` to item metadata.
    ///
    /// # Errors
    ///
    /// - [`LookupError::InvalidIdentifier`] if no candidate can be derived
    /// - [`LookupError::CacheOnlyViolation`] in cache-only mode when no
    ///   candidate is cached positive and at least one is not cached at all
    /// - [`LookupError::NotFound`] if every candidate is absent
    /// - [`LookupError::Fetch`] for transient or unexpected failures (not cached)
    pub async fn resolve(&self, raw: &str) -> Result<ItemMetadata, LookupError> {
        self.resolve_with_cancel(raw, &CancellationToken::new())
            .await
    }

    /// [`resolve`](Self::resolve) with caller-controlled cancellation.
    ///
    /// # Errors
    ///
    /// See [`resolve`](Self::resolve).
    #[instrument(skip(self, cancel), fields(input = %raw))]
    pub async fn resolve_with_cancel(
        &self,
        raw: &str,
        cancel: &CancellationToken,
    ) -> Result<ItemMetadata, LookupError> {
        LookupCounters::bump(&self.counters.resolves);

        let strategy = search_strategy(raw);
        if strategy.is_empty() {
            debug!(errors = ?strategy.errors, "input cannot be normalized");
            return Err(LookupError::InvalidIdentifier {
                input: raw.to_string(),
                errors: strategy.errors,
            });
        }

        let cache_only = self.cache_only();
        let mut uncached = None;
        let mut last_status = None;
        let mut attempts = 0;

        for variant in &strategy.variants {
            let key = metadata_key(variant);

            if let CacheLookup::Hit(entry) = self.cache.get(&key).await {
                if !entry.is_positive() {
                    LookupCounters::bump(&self.counters.negative_cache_hits);
                    debug!(variant = %variant, "known absent, skipping");
                    continue;
                }
                if let CachePayload::Metadata(doc) = entry.payload
                    && let Some(item) = ItemMetadata::from_document(variant, doc)
                {
                    LookupCounters::bump(&self.counters.positive_cache_hits);
                    LookupCounters::bump(&self.counters.resolved);
                    debug!(variant = %variant, "resolved from cache");
                    return Ok(item);
                }
                warn!(key = %key, "unusable cached metadata, refetching");
            }

            // A later variant may still be cached.
            if cache_only {
                uncached.get_or_insert(key);
                continue;
            }

            let url = self.endpoints.metadata(variant);
            LookupCounters::bump(&self.counters.network_lookups);
            match self.client.request(&url, RequestKind::Metadata, cancel).await {
                Ok(response) => {
                    attempts += response.attempts;
                    last_status = Some(response.status);
                    let doc: Value = serde_json::from_slice(&response.body)
                        .map_err(|e| LookupError::malformed(&url, e))?;
                    if let Some(item) = ItemMetadata::from_document(variant, doc.clone()) {
                        self.cache
                            .put(&key, CachePayload::Metadata(doc), PutOptions::positive());
                        LookupCounters::bump(&self.counters.resolved);
                        info!(variant = %variant, identifier = %item.identifier, "resolved");
                        return Ok(item);
                    }
                    debug!(variant = %variant, "empty metadata document");
                    self.cache
                        .put(&key, CachePayload::Absent, PutOptions::negative());
                }
                Err(error) if error.is_not_found() => {
                    attempts += error.attempts();
                    last_status = error.last_status();
                    debug!(variant = %variant, status = ?last_status, "not found");
                    self.cache
                        .put(&key, CachePayload::Absent, PutOptions::negative());
                }
                Err(error) => return Err(LookupError::Fetch(error)),
            }
        }

        if let Some(key) = uncached {
            LookupCounters::bump(&self.counters.cache_only_violations);
            return Err(LookupError::CacheOnlyViolation {
                identifier: raw.to_string(),
                key,
            });
        }

        LookupCounters::bump(&self.counters.not_found);
        Err(LookupError::NotFound {
            identifier: raw.to_string(),
            variants: strategy.variants,
            last_status,
            attempts,
        })
    }

    /// Searches the archive.
    ///
    /// Row count and fields follow the current intensity. Results are cached
    /// per intensity; in cache-only mode the richest cached result wins.
    ///
    /// # Errors
    ///
    /// - [`LookupError::EmptyQuery`] for a blank query
    /// - [`LookupError::CacheOnlyViolation`] on a miss in cache-only mode
    /// - [`LookupError::MalformedResponse`] if the response is not a result set
    /// - [`LookupError::Fetch`] if the request fails
    #[instrument(skip(self), fields(intensity = %self.intensity()))]
    pub async fn search(&self, query: &str) -> Result<Vec<SearchHit>, LookupError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(LookupError::EmptyQuery);
        }
        LookupCounters::bump(&self.counters.searches);

        let intensity = self.intensity();
        let cache_only = self.cache_only();
        let candidates: &[Intensity] = if cache_only {
            &[Intensity::Full, Intensity::Standard, Intensity::Minimal]
        } else {
            std::slice::from_ref(&intensity)
        };

        for level in candidates {
            let key = search_key(*level, query);
            if let CacheLookup::Hit(entry) = self.cache.get(&key).await
                && let CachePayload::Metadata(doc) = entry.payload
                && let Ok(hits) = parse_search_results(&doc)
            {
                LookupCounters::bump(&self.counters.positive_cache_hits);
                return Ok(hits);
            }
        }

        if cache_only {
            LookupCounters::bump(&self.counters.cache_only_violations);
            return Err(LookupError::CacheOnlyViolation {
                identifier: query.to_string(),
                key: search_key(intensity, query),
            });
        }

        let url = self
            .endpoints
            .search(query, intensity.search_fields(), intensity.search_rows());
        LookupCounters::bump(&self.counters.network_lookups);
        let response = self
            .client
            .request(&url, RequestKind::Metadata, &CancellationToken::new())
            .await?;
        let doc: Value =
            serde_json::from_slice(&response.body).map_err(|e| LookupError::malformed(&url, e))?;
        let hits = parse_search_results(&doc).map_err(|e| LookupError::malformed(&url, e))?;

        self.cache.put(
            &search_key(intensity, query),
            CachePayload::Metadata(doc),
            PutOptions::positive(),
        );
        debug!(hits = hits.len(), "search complete");
        Ok(hits)
    }

    /// Fetches thumbnails for `identifiers` concurrently.
    ///
    /// Never fails: any problem yields a [`Thumbnail::Placeholder`]. At
    /// minimal intensity nothing is fetched; in cache-only mode only cached
    /// images are returned. Results keep the input order.
    #[instrument(skip(self, identifiers), fields(count = identifiers.len()))]
    pub async fn prefetch_thumbnails(&self, identifiers: &[String]) -> Vec<Thumbnail> {
        let intensity = self.intensity();
        let cache_only = self.cache_only();

        if !cache_only && !intensity.prefetches_thumbnails() {
            self.counters
                .placeholders
                .fetch_add(identifiers.len() as u64, Ordering::SeqCst);
            return identifiers
                .iter()
                .map(|identifier| Thumbnail::Placeholder {
                    identifier: identifier.clone(),
                })
                .collect();
        }

        join_all(
            identifiers
                .iter()
                .map(|identifier| self.thumbnail(identifier, cache_only)),
        )
        .await
    }

    async fn thumbnail(&self, identifier: &str, cache_only: bool) -> Thumbnail {
        let key = thumbnail_key(identifier);
        let placeholder = || Thumbnail::Placeholder {
            identifier: identifier.to_string(),
        };

        if let CacheLookup::Hit(entry) = self.cache.get(&key).await {
            if entry.is_positive()
                && let CachePayload::Bytes(bytes) = entry.payload
            {
                LookupCounters::bump(&self.counters.thumbnails);
                return Thumbnail::Image {
                    identifier: identifier.to_string(),
                    bytes,
                };
            }
            LookupCounters::bump(&self.counters.placeholders);
            return placeholder();
        }

        if cache_only {
            LookupCounters::bump(&self.counters.placeholders);
            return placeholder();
        }

        let url = self.endpoints.thumbnail(identifier);
        LookupCounters::bump(&self.counters.network_lookups);
        match self
            .client
            .request(&url, RequestKind::Transfer, &CancellationToken::new())
            .await
        {
            Ok(response) => {
                self.cache.put(
                    &key,
                    CachePayload::Bytes(response.body.clone()),
                    PutOptions::positive(),
                );
                LookupCounters::bump(&self.counters.thumbnails);
                Thumbnail::Image {
                    identifier: identifier.to_string(),
                    bytes: response.body,
                }
            }
            Err(error) => {
                if error.is_not_found() {
                    self.cache
                        .put(&key, CachePayload::Absent, PutOptions::negative());
                }
                warn!(identifier, %error, "thumbnail unavailable, using placeholder");
                LookupCounters::bump(&self.counters.placeholders);
                placeholder()
            }
        }
    }

    /// Returns a snapshot of lookup activity.
    #[must_use]
    pub fn metrics(&self) -> LookupMetrics {
        let c = &self.counters;
        LookupMetrics {
            resolves: c.resolves.load(Ordering::SeqCst),
            resolved: c.resolved.load(Ordering::SeqCst),
            not_found: c.not_found.load(Ordering::SeqCst),
            positive_cache_hits: c.positive_cache_hits.load(Ordering::SeqCst),
            negative_cache_hits: c.negative_cache_hits.load(Ordering::SeqCst),
            network_lookups: c.network_lookups.load(Ordering::SeqCst),
            cache_only_violations: c.cache_only_violations.load(Ordering::SeqCst),
            searches: c.searches.load(Ordering::SeqCst),
            thumbnails: c.thumbnails.load(Ordering::SeqCst),
            placeholders: c.placeholders.load(Ordering::SeqCst),
        }
    }

    /// Renders the metrics as a short report.
    #[must_use]
    pub fn formatted_statistics(&self) -> String {
        let m = self.metrics();
        let mut out = String::new();
        let _ = writeln!(
            out,
            "Lookups: {} resolves ({} found, {} not found), {} searches, intensity {}",
            m.resolves,
            m.resolved,
            m.not_found,
            m.searches,
            self.intensity()
        );
        let _ = write!(
            out,
            "  {} positive / {} negative cache hits, {} network lookups, {} cache-only refusals, {} thumbnails, {} placeholders",
            m.positive_cache_hits,
            m.negative_cache_hits,
            m.network_lookups,
            m.cache_only_violations,
            m.thumbnails,
            m.placeholders
        );
        out
    }

    /// Zeroes counters.
    pub fn reset_metrics(&self) {
        let c = &self.counters;
        for counter in [
            &c.resolves,
            &c.resolved,
            &c.not_found,
            &c.positive_cache_hits,
            &c.negative_cache_hits,
            &c.network_lookups,
            &c.cache_only_violations,
            &c.searches,
            &c.thumbnails,
            &c.placeholders,
        ] {
            counter.store(0, Ordering::SeqCst);
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::cache::CacheSettings;
    use crate::clock::{Clock, ManualClock};
    use crate::http::{BandwidthThrottle, ClientSettings, RateLimiter, RetryPolicy};

    struct Harness {
        server: MockServer,
        cache: Arc<TwoTierCache>,
        lookup: LookupOrchestrator,
    }

    async fn harness(intensity: Intensity) -> Harness {
        let server = MockServer::start().await;
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new());
        let cache = Arc::new(TwoTierCache::memory_only(
            CacheSettings::default(),
            Arc::clone(&clock),
        ));
        let client = ResilientClient::new(
            Arc::new(RateLimiter::new(4)),
            Arc::new(BandwidthThrottle::unbounded(Arc::clone(&clock))),
            clock,
            RetryPolicy::with_max_attempts(2),
            ClientSettings {
                metadata_timeout: Duration::from_secs(5),
                ..ClientSettings::default()
            },
        )
        .unwrap();
        let lookup = LookupOrchestrator::new(
            Arc::new(client),
            Arc::clone(&cache),
            ArchiveEndpoints::new(&server.uri()).unwrap(),
            intensity,
        );
        Harness {
            server,
            cache,
            lookup,
        }
    }

    fn item(identifier: &str) -> serde_json::Value {
        json!({"metadata": {"identifier": identifier, "title": "Title"}})
    }

    // ==================== Resolve Tests ====================

    #[tokio::test]
    async fn test_resolve_first_variant_found() {
        let h = harness(Intensity::Standard).await;
        Mock::given(method("GET"))
            .and(path("/metadata/Mario"))
            .respond_with(ResponseTemplate::new(200).set_body_json(item("Mario")))
            .expect(1)
            .mount(&h.server)
            .await;

        let found = h.lookup.resolve("Mario").await.unwrap();
        assert_eq!(found.identifier, "Mario");

        // Second resolve is answered from the cache.
        let again = h.lookup.resolve("Mario").await.unwrap();
        assert_eq!(again.identifier, "Mario");
        assert_eq!(h.lookup.metrics().positive_cache_hits, 1);
    }

    #[tokio::test]
    async fn test_resolve_falls_back_to_strict_variant() {
        let h = harness(Intensity::Standard).await;
        Mock::given(method("GET"))
            .and(path("/metadata/Super-Mario"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(&h.server)
            .await;
        Mock::given(method("GET"))
            .and(path("/metadata/super-mario"))
            .respond_with(ResponseTemplate::new(200).set_body_json(item("super-mario")))
            .expect(1)
            .mount(&h.server)
            .await;

        let found = h.lookup.resolve("Super Mario").await.unwrap();
        assert_eq!(found.identifier, "super-mario");

        let negative = h.cache.get("metadata:Super-Mario").await.into_entry().unwrap();
        assert!(!negative.is_positive());
    }

    #[tokio::test]
    async fn test_resolve_all_absent_is_not_found() {
        let h = harness(Intensity::Standard).await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&h.server)
            .await;

        let error = h.lookup.resolve("Mario").await.unwrap_err();
        let LookupError::NotFound {
            variants,
            last_status,
            attempts,
            ..
        } = error
        else {
            panic!("expected NotFound, got {error:?}");
        };
        assert_eq!(variants, vec!["Mario", "mario"]);
        assert_eq!(last_status, Some(404));
        assert_eq!(attempts, 2);

        // Both negatives are cached: no further requests.
        let before = h.server.received_requests().await.unwrap().len();
        assert!(h.lookup.resolve("Mario").await.unwrap_err().is_not_found());
        assert_eq!(h.server.received_requests().await.unwrap().len(), before);
        assert_eq!(h.lookup.metrics().negative_cache_hits, 2);
    }

    #[tokio::test]
    async fn test_resolve_invalid_input_makes_no_requests() {
        let h = harness(Intensity::Standard).await;
        let error = h.lookup.resolve("ab").await.unwrap_err();
        assert!(matches!(error, LookupError::InvalidIdentifier { .. }));
        assert!(h.server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_transient_failure_propagates_uncached() {
        let h = harness(Intensity::Standard).await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&h.server)
            .await;

        let error = h.lookup.resolve("Mario").await.unwrap_err();
        assert!(matches!(
            error,
            LookupError::Fetch(FetchError::ServerError { .. })
        ));
        assert_eq!(h.cache.get("metadata:Mario").await, CacheLookup::Miss);
    }

    #[tokio::test]
    async fn test_non_json_body_is_malformed() {
        let h = harness(Intensity::Standard).await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&h.server)
            .await;

        let error = h.lookup.resolve("Mario").await.unwrap_err();
        assert!(matches!(error, LookupError::MalformedResponse { .. }));
    }

    #[tokio::test]
    async fn test_cache_only_miss_is_violation() {
        let h = harness(Intensity::Standard).await;
        h.cache.set_cache_only(true);

        let error = h.lookup.resolve("Mario").await.unwrap_err();
        let LookupError::CacheOnlyViolation { key, .. } = error else {
            panic!("expected CacheOnlyViolation, got {error:?}");
        };
        assert_eq!(key, "metadata:Mario");
        assert!(h.server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cache_only_finds_later_cached_variant() {
        let h = harness(Intensity::Standard).await;
        h.cache.put(
            "metadata:mario",
            CachePayload::Metadata(item("mario")),
            PutOptions::positive(),
        );
        h.cache.set_cache_only(true);

        // "Mario" is uncached but the strict variant is there.
        let found = h.lookup.resolve("Mario").await.unwrap();
        assert_eq!(found.identifier, "mario");
        assert_eq!(h.lookup.metrics().cache_only_violations, 0);
        assert!(h.server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cache_only_reports_first_uncached_after_negatives() {
        let h = harness(Intensity::Standard).await;
        h.cache.put("metadata:Mario", CachePayload::Absent, PutOptions::negative());
        h.cache.set_cache_only(true);

        let error = h.lookup.resolve("Mario").await.unwrap_err();
        let LookupError::CacheOnlyViolation { key, .. } = error else {
            panic!("expected CacheOnlyViolation, got {error:?}");
        };
        assert_eq!(key, "metadata:mario");
        assert_eq!(h.lookup.metrics().cache_only_violations, 1);
    }

    // ==================== Search Tests ====================

    #[tokio::test]
    async fn test_search_uses_intensity_rows_and_caches() {
        let h = harness(Intensity::Minimal).await;
        Mock::given(method("GET"))
            .and(path("/advancedsearch.php"))
            .and(query_param("q", "mario"))
            .and(query_param("rows", "20"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "response": {"numFound": 1, "docs": [{"identifier": "mario", "title": "M"}]}
            })))
            .expect(1)
            .mount(&h.server)
            .await;

        let hits = h.lookup.search("  mario ").await.unwrap();
        assert_eq!(hits.len(), 1);
        assert!(h.cache.get("search:minimal:mario").await.is_hit());

        // Cache-only serves the cached minimal result.
        h.cache.set_cache_only(true);
        assert_eq!(h.lookup.search("mario").await.unwrap().len(), 1);
        assert!(matches!(
            h.lookup.search("luigi").await.unwrap_err(),
            LookupError::CacheOnlyViolation { .. }
        ));
    }

    #[tokio::test]
    async fn test_empty_search_query_rejected() {
        let h = harness(Intensity::Standard).await;
        assert!(matches!(
            h.lookup.search("   ").await.unwrap_err(),
            LookupError::EmptyQuery
        ));
    }

    // ==================== Thumbnail Tests ====================

    #[tokio::test]
    async fn test_prefetch_degrades_failures_to_placeholders() {
        let h = harness(Intensity::Standard).await;
        Mock::given(method("GET"))
            .and(path("/services/img/good"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"png".to_vec()))
            .mount(&h.server)
            .await;
        Mock::given(method("GET"))
            .and(path("/services/img/missing"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&h.server)
            .await;
        Mock::given(method("GET"))
            .and(path("/services/img/broken"))
            .respond_with(ResponseTemplate::new(400))
            .mount(&h.server)
            .await;

        let ids = vec!["good".to_string(), "missing".to_string(), "broken".to_string()];
        let thumbs = h.lookup.prefetch_thumbnails(&ids).await;

        assert_eq!(thumbs.len(), 3);
        assert_eq!(thumbs[0].identifier(), "good");
        assert!(!thumbs[0].is_placeholder());
        assert!(thumbs[1].is_placeholder());
        assert!(thumbs[2].is_placeholder());
        assert!(h.cache.get("thumbnail:good").await.is_hit());

        let metrics = h.lookup.metrics();
        assert_eq!(metrics.thumbnails, 1);
        assert_eq!(metrics.placeholders, 2);
    }

    #[tokio::test]
    async fn test_minimal_intensity_skips_prefetch() {
        let h = harness(Intensity::Minimal).await;
        let thumbs = h.lookup.prefetch_thumbnails(&["a".to_string()]).await;
        assert!(thumbs[0].is_placeholder());
        assert!(h.server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_metrics_report_and_reset() {
        let h = harness(Intensity::Standard).await;
        let _ = h.lookup.resolve("ab").await;
        assert_eq!(h.lookup.metrics().resolves, 1);
        assert!(h.lookup.formatted_statistics().contains("1 resolves"));
        h.lookup.reset_metrics();
        assert_eq!(h.lookup.metrics(), LookupMetrics::default());
    }
}
