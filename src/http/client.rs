//! Resilient HTTP client for the archive API.
//!
//! [`ResilientClient`] turns one logical request into as many attempts as the
//! [`RetryPolicy`] allows. Each attempt:
//!
//! 1. waits for a [`RateLimiter`] permit,
//! 2. sends the request (conditional on a stored ETag when one is known),
//! 3. releases the permit as soon as the response head arrives,
//! 4. streams the body through the shared [`BandwidthThrottle`].
//!
//! Backoff sleeps go through the injected [`Clock`]. Cancellation is checked
//! while queued, in flight, streaming, and backing off.

use std::fmt::Write as _;
use std::future::Future;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures_util::StreamExt;
use lru::LruCache;
use reqwest::Client;
use reqwest::header::{ETAG, IF_NONE_MATCH, RETRY_AFTER};
use serde::Serialize;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use url::Url;

use super::constants::{
    CONNECT_TIMEOUT_SECS, ETAG_STORE_CAPACITY, MAX_ETAG_BODY_BYTES, METADATA_TIMEOUT_SECS,
    TRANSFER_TIMEOUT_SECS,
};
use super::error::FetchError;
use super::rate_limiter::RateLimiter;
use super::retry::{
    FailureType, RetryDecision, RetryMachine, RetryPolicy, classify_http_status,
    parse_retry_after,
};
use super::throttle::{BandwidthThrottle, TokenBucket};
use crate::cache::{CacheLookup, CachePayload, PutOptions, TwoTierCache};
use crate::clock::Clock;
use crate::user_agent;

/// Which timeout budget a request gets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    /// Small JSON documents: metadata, search.
    #[default]
    Metadata,
    /// File bodies: thumbnails, downloads.
    Transfer,
}

/// Connection settings for [`ResilientClient`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSettings {
    /// TCP/TLS connect timeout.
    pub connect_timeout: Duration,
    /// Whole-request timeout for [`RequestKind::Metadata`].
    pub metadata_timeout: Duration,
    /// Whole-request timeout for [`RequestKind::Transfer`].
    pub transfer_timeout: Duration,
    /// User-Agent header value.
    pub user_agent: String,
    /// How many URLs keep an ETag and body for conditional requests.
    pub etag_capacity: usize,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(CONNECT_TIMEOUT_SECS),
            metadata_timeout: Duration::from_secs(METADATA_TIMEOUT_SECS),
            transfer_timeout: Duration::from_secs(TRANSFER_TIMEOUT_SECS),
            user_agent: user_agent::default_user_agent(),
            etag_capacity: ETAG_STORE_CAPACITY,
        }
    }
}

impl ClientSettings {
    fn timeout_for(&self, kind: RequestKind) -> Duration {
        match kind {
            RequestKind::Metadata => self.metadata_timeout,
            RequestKind::Transfer => self.transfer_timeout,
        }
    }
}

/// A successful response with its body fully read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResponse {
    /// Requested URL.
    pub url: String,
    /// Status of the final attempt (200-class, or 304).
    pub status: u16,
    /// Response body; for 304 the body stored with the ETag.
    pub body: Bytes,
    /// ETag returned by the server, if any.
    pub etag: Option<String>,
    /// `true` when the server answered 304.
    pub not_modified: bool,
    /// Attempts it took.
    pub attempts: u32,
}

/// Options for [`ResilientClient::fetch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchOptions {
    /// Consult and populate the cache.
    pub use_cache: bool,
    /// Skip a cached value and go to the network (ignored in cache-only mode).
    pub force_refresh: bool,
    /// Timeout budget.
    pub kind: RequestKind,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            use_cache: true,
            force_refresh: false,
            kind: RequestKind::Metadata,
        }
    }
}

/// Options for [`ResilientClient::download`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DownloadOptions {
    /// Extra per-download cap applied on top of the shared throttle.
    pub max_bytes_per_second: Option<u64>,
}

/// Result of a completed download.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DownloadReport {
    /// Downloaded URL.
    pub url: String,
    /// Bytes written to the sink.
    pub bytes_written: u64,
    /// Content-Length advertised by the server.
    pub content_length: Option<u64>,
    /// Attempts it took to get a response head.
    pub attempts: u32,
    /// Time spent sleeping for bandwidth.
    pub throttle_delay: Duration,
}

/// Point-in-time client metrics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClientMetrics {
    /// Attempts sent to the network.
    pub requests: u64,
    /// Retries scheduled.
    pub retries: u64,
    /// Logical requests that ended in an error.
    pub failures: u64,
    /// 429/503 responses received.
    pub rate_limit_hits: u64,
    /// 304 responses served from the ETag store.
    pub not_modified: u64,
    /// Body bytes received.
    pub bytes_transferred: u64,
    /// Logical requests cancelled by the caller.
    pub cancelled: u64,
    /// `fetch` calls answered by the cache.
    pub cache_hits: u64,
    /// URLs with a stored ETag.
    pub stored_etags: usize,
}

#[derive(Debug, Default)]
struct ClientCounters {
    requests: AtomicU64,
    retries: AtomicU64,
    failures: AtomicU64,
    rate_limit_hits: AtomicU64,
    not_modified: AtomicU64,
    bytes: AtomicU64,
    cancelled: AtomicU64,
    cache_hits: AtomicU64,
}

impl ClientCounters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone)]
struct StoredEtag {
    etag: String,
    body: Bytes,
}

/// Why one attempt failed.
#[derive(Debug)]
enum AttemptError {
    Status {
        status: u16,
        retry_after: Option<Duration>,
    },
    Timeout {
        status: Option<u16>,
    },
    Network {
        status: Option<u16>,
        source: reqwest::Error,
    },
    Fatal(FetchError),
}

impl AttemptError {
    fn from_reqwest(error: reqwest::Error, status: Option<u16>) -> Self {
        if error.is_timeout() {
            Self::Timeout { status }
        } else {
            Self::Network {
                status,
                source: error,
            }
        }
    }

    fn failure_type(&self) -> FailureType {
        match self {
            Self::Status { status, .. } => classify_http_status(*status),
            Self::Timeout { .. } | Self::Network { .. } => FailureType::Transient,
            Self::Fatal(_) => FailureType::Permanent,
        }
    }

    fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::Timeout { status } | Self::Network { status, .. } => *status,
            Self::Fatal(error) => error.last_status(),
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Status { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    fn into_fetch_error(self, url: &str, attempts: u32) -> FetchError {
        match self {
            Self::Status {
                status,
                retry_after,
            } => FetchError::from_status(url, status, attempts, retry_after),
            Self::Timeout { status } => FetchError::Timeout {
                url: url.to_string(),
                last_status: status,
                attempts,
            },
            Self::Network { status, source } => FetchError::NetworkError {
                url: url.to_string(),
                last_status: status,
                attempts,
                source,
            },
            Self::Fatal(error) => error,
        }
    }
}

/// Response head of a successful attempt.
enum Head {
    Fresh(reqwest::Response),
    NotModified { status: u16, stored: StoredEtag },
}

/// Concurrency-bounded, retrying, throttled HTTP client.
///
/// Cheap to share behind `Arc`; every collaborator is injected.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use archive_core::clock::TokioClock;
/// use archive_core::http::{
///     BandwidthThrottle, ClientSettings, FetchOptions, RateLimiter, ResilientClient, RetryPolicy,
/// };
///
/// # async fn example() -> Result<(), archive_core::http::FetchError> {
/// let clock = Arc::new(TokioClock);
/// let client = ResilientClient::new(
///     Arc::new(RateLimiter::new(4)),
///     Arc::new(BandwidthThrottle::unbounded(clock.clone())),
///     clock,
///     RetryPolicy::default(),
///     ClientSettings::default(),
/// )?;
/// let body = client
///     .fetch("https://archive.org/metadata/nasa", FetchOptions::default())
///     .await?;
/// println!("{} bytes", body.len());
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct ResilientClient {
    http: Client,
    limiter: Arc<RateLimiter>,
    throttle: Arc<BandwidthThrottle>,
    clock: Arc<dyn Clock>,
    policy: RetryPolicy,
    settings: ClientSettings,
    etags: Mutex<LruCache<String, StoredEtag>>,
    cache: Option<Arc<TwoTierCache>>,
    counters: ClientCounters,
}

impl ResilientClient {
    /// Builds a client around its collaborators.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::ClientBuild`] if the HTTP client cannot be built.
    #[instrument(level = "debug", skip(limiter, throttle, clock))]
    pub fn new(
        limiter: Arc<RateLimiter>,
        throttle: Arc<BandwidthThrottle>,
        clock: Arc<dyn Clock>,
        policy: RetryPolicy,
        settings: ClientSettings,
    ) -> Result<Self, FetchError> {
        let http = build_http_client(&settings).map_err(FetchError::ClientBuild)?;
        let etag_capacity = NonZeroUsize::new(settings.etag_capacity).unwrap_or(NonZeroUsize::MIN);
        Ok(Self {
            http,
            limiter,
            throttle,
            clock,
            policy,
            settings,
            etags: Mutex::new(LruCache::new(etag_capacity)),
            cache: None,
            counters: ClientCounters::default(),
        })
    }

    /// Attaches the cache used by [`fetch`](Self::fetch).
    #[must_use]
    pub fn with_cache(mut self, cache: Arc<TwoTierCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// The admission limiter shared by this client.
    #[must_use]
    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// The bandwidth throttle shared by this client.
    #[must_use]
    pub fn throttle(&self) -> &Arc<BandwidthThrottle> {
        &self.throttle
    }

    /// Issues one logical GET and reads the whole body.
    ///
    /// # Errors
    ///
    /// Returns a [`FetchError`] once the request fails terminally, the retry
    /// budget is exhausted, or `cancel` fires.
    #[instrument(skip(self, cancel), fields(url = %url))]
    pub async fn request(
        &self,
        url: &str,
        kind: RequestKind,
        cancel: &CancellationToken,
    ) -> Result<FetchResponse, FetchError> {
        let parsed = Url::parse(url).map_err(|e| FetchError::invalid_url(url, e))?;
        let target = &parsed;
        let (mut response, attempts) = self
            .run_attempts(url, cancel, move |_| self.buffered_attempt(target, kind))
            .await?;
        response.attempts = attempts;
        Ok(response)
    }

    /// Returns the body at `url`, consulting the cache first.
    ///
    /// Bodies are cached under `url:<url>`; a 404/410 is cached negatively.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::CacheOnlyViolation`] on a miss in cache-only
    /// mode, or any error from [`request`](Self::request).
    pub async fn fetch(&self, url: &str, options: FetchOptions) -> Result<Bytes, FetchError> {
        self.fetch_with_cancel(url, options, &CancellationToken::new())
            .await
    }

    /// [`fetch`](Self::fetch) with caller-controlled cancellation.
    ///
    /// # Errors
    ///
    /// See [`fetch`](Self::fetch).
    #[instrument(skip(self, cancel), fields(url = %url))]
    pub async fn fetch_with_cancel(
        &self,
        url: &str,
        options: FetchOptions,
        cancel: &CancellationToken,
    ) -> Result<Bytes, FetchError> {
        let cache = self.cache.as_ref().filter(|_| options.use_cache);
        let key = format!("url:{url}");

        if let Some(cache) = cache {
            let cache_only = cache.is_cache_only();
            if !options.force_refresh || cache_only {
                if let CacheLookup::Hit(entry) = cache.get(&key).await {
                    ClientCounters::bump(&self.counters.cache_hits);
                    return match entry.payload {
                        CachePayload::Bytes(body) => Ok(body),
                        CachePayload::Metadata(value) => Ok(Bytes::from(value.to_string())),
                        CachePayload::Absent => Err(FetchError::NotFound {
                            url: url.to_string(),
                            status: 404,
                            attempts: 0,
                        }),
                    };
                }
                if cache_only {
                    debug!("cache-only miss");
                    return Err(FetchError::cache_only(url));
                }
            }
        }

        match self.request(url, options.kind, cancel).await {
            Ok(response) => {
                if let Some(cache) = cache {
                    cache.put(
                        &key,
                        CachePayload::Bytes(response.body.clone()),
                        PutOptions::default(),
                    );
                }
                Ok(response.body)
            }
            Err(error) => {
                if let (Some(cache), true) = (cache, error.is_not_found()) {
                    cache.put(&key, CachePayload::Absent, PutOptions::negative());
                }
                Err(error)
            }
        }
    }

    /// Streams the body at `url` into `sink`.
    ///
    /// Attempts are retried until a response head arrives; once bytes reach
    /// the sink, a failure is terminal.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Truncated`] when fewer bytes than the advertised
    /// Content-Length arrive, [`FetchError::Io`] when the sink fails, or any
    /// error from the attempt loop.
    #[instrument(skip(self, sink, cancel), fields(url = %url))]
    pub async fn download<W>(
        &self,
        url: &str,
        sink: &mut W,
        options: DownloadOptions,
        cancel: &CancellationToken,
    ) -> Result<DownloadReport, FetchError>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let parsed = Url::parse(url).map_err(|e| FetchError::invalid_url(url, e))?;
        let target = &parsed;
        let (response, attempts) = self
            .run_attempts(url, cancel, move |_| async move {
                match self.send_head(target, RequestKind::Transfer, false).await? {
                    Head::Fresh(response) => Ok(response),
                    Head::NotModified { status, .. } => Err(AttemptError::Fatal(
                        FetchError::from_status(url, status, 1, None),
                    )),
                }
            })
            .await?;

        let status = response.status().as_u16();
        let content_length = response.content_length();
        let mut private = options
            .max_bytes_per_second
            .map(|rate| TokenBucket::new(Some(rate), rate, self.clock.now()));

        let mut stream = response.bytes_stream();
        let mut bytes_written: u64 = 0;
        let mut throttle_delay = Duration::ZERO;

        loop {
            let next = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(self.cancelled(url, attempts)),
                next = stream.next() => next,
            };
            let Some(chunk) = next else { break };
            let chunk = chunk.map_err(|e| {
                ClientCounters::bump(&self.counters.failures);
                AttemptError::from_reqwest(e, Some(status)).into_fetch_error(url, attempts)
            })?;

            let delay = self.pace(chunk.len(), private.as_mut());
            if !delay.is_zero() {
                throttle_delay += delay;
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => return Err(self.cancelled(url, attempts)),
                    () = self.clock.sleep(delay) => {}
                }
            }

            sink.write_all(&chunk)
                .await
                .map_err(|e| FetchError::io(url, e))?;
            bytes_written += chunk.len() as u64;
        }

        sink.flush().await.map_err(|e| FetchError::io(url, e))?;

        if let Some(expected) = content_length
            && expected != bytes_written
        {
            ClientCounters::bump(&self.counters.failures);
            warn!(expected, bytes_written, "download body shorter than Content-Length");
            return Err(FetchError::truncated(url, expected, bytes_written));
        }

        info!(bytes_written, attempts, "download complete");
        Ok(DownloadReport {
            url: url.to_string(),
            bytes_written,
            content_length,
            attempts,
            throttle_delay,
        })
    }

    /// Returns a snapshot of client activity.
    #[must_use]
    pub fn metrics(&self) -> ClientMetrics {
        let c = &self.counters;
        ClientMetrics {
            requests: c.requests.load(Ordering::SeqCst),
            retries: c.retries.load(Ordering::SeqCst),
            failures: c.failures.load(Ordering::SeqCst),
            rate_limit_hits: c.rate_limit_hits.load(Ordering::SeqCst),
            not_modified: c.not_modified.load(Ordering::SeqCst),
            bytes_transferred: c.bytes.load(Ordering::SeqCst),
            cancelled: c.cancelled.load(Ordering::SeqCst),
            cache_hits: c.cache_hits.load(Ordering::SeqCst),
            stored_etags: self.etag_store().len(),
        }
    }

    /// Renders the metrics as a short human-readable report.
    #[must_use]
    pub fn formatted_statistics(&self) -> String {
        let m = self.metrics();
        let mut out = String::new();
        let _ = writeln!(
            out,
            "HTTP client: {} requests, {} retries, {} failures, {} cancelled",
            m.requests, m.retries, m.failures, m.cancelled
        );
        let _ = write!(
            out,
            "  {} rate-limit hits, {} not-modified, {} cache hits, {} bytes, {} ETags",
            m.rate_limit_hits, m.not_modified, m.cache_hits, m.bytes_transferred, m.stored_etags
        );
        out
    }

    /// Zeroes counters.
    pub fn reset_metrics(&self) {
        let c = &self.counters;
        for counter in [
            &c.requests,
            &c.retries,
            &c.failures,
            &c.rate_limit_hits,
            &c.not_modified,
            &c.bytes,
            &c.cancelled,
            &c.cache_hits,
        ] {
            counter.store(0, Ordering::SeqCst);
        }
    }

    /// Zeroes counters and forgets every stored ETag.
    pub fn reset(&self) {
        self.reset_metrics();
        self.etag_store().clear();
        debug!("client state reset");
    }

    /// Drives `attempt` through the retry state machine.
    async fn run_attempts<T, F, Fut>(
        &self,
        url: &str,
        cancel: &CancellationToken,
        mut attempt: F,
    ) -> Result<(T, u32), FetchError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, AttemptError>>,
    {
        let mut machine = RetryMachine::new(self.policy.clone(), url);

        while let Some(number) = machine.begin_attempt() {
            ClientCounters::bump(&self.counters.requests);
            let outcome = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(self.cancelled(url, number)),
                outcome = attempt(number) => outcome,
            };

            let failure = match outcome {
                Ok(value) => {
                    machine.succeed(None);
                    return Ok((value, number));
                }
                Err(AttemptError::Fatal(error)) => {
                    ClientCounters::bump(&self.counters.failures);
                    return Err(error);
                }
                Err(failure) => failure,
            };

            let failure_type = failure.failure_type();
            if failure_type == FailureType::RateLimited {
                ClientCounters::bump(&self.counters.rate_limit_hits);
            }

            match machine.fail(failure_type, failure.status(), failure.retry_after()) {
                RetryDecision::Retry { delay, attempt } => {
                    ClientCounters::bump(&self.counters.retries);
                    debug!(
                        next_attempt = attempt,
                        delay_ms = delay.as_millis(),
                        status = failure.status(),
                        "attempt failed, backing off"
                    );
                    tokio::select! {
                        biased;
                        () = cancel.cancelled() => return Err(self.cancelled(url, number)),
                        () = self.clock.sleep(delay) => {}
                    }
                }
                RetryDecision::DoNotRetry { reason } => {
                    ClientCounters::bump(&self.counters.failures);
                    debug!(%reason, attempts = number, "giving up");
                    return Err(failure.into_fetch_error(url, number));
                }
            }
        }

        // Terminal states return from inside the loop.
        let record = machine.record();
        Err(match record.last_status {
            Some(status) => FetchError::from_status(url, status, record.attempt, None),
            None => FetchError::Timeout {
                url: url.to_string(),
                last_status: None,
                attempts: record.attempt,
            },
        })
    }

    /// One attempt that reads the full body.
    async fn buffered_attempt(
        &self,
        url: &Url,
        kind: RequestKind,
    ) -> Result<FetchResponse, AttemptError> {
        let response = match self.send_head(url, kind, true).await? {
            Head::Fresh(response) => response,
            Head::NotModified { status, stored } => {
                ClientCounters::bump(&self.counters.not_modified);
                debug!("not modified, serving stored body");
                return Ok(FetchResponse {
                    url: url.to_string(),
                    status,
                    body: stored.body,
                    etag: Some(stored.etag),
                    not_modified: true,
                    attempts: 1,
                });
            }
        };

        let status = response.status().as_u16();
        let etag = response
            .headers()
            .get(ETAG)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let mut body = BytesMut::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| AttemptError::from_reqwest(e, Some(status)))?;
            let delay = self.pace(chunk.len(), None);
            self.clock.sleep(delay).await;
            body.extend_from_slice(&chunk);
        }
        let body = body.freeze();

        if let Some(etag) = &etag
            && body.len() <= MAX_ETAG_BODY_BYTES
        {
            self.etag_store().put(
                url.to_string(),
                StoredEtag {
                    etag: etag.clone(),
                    body: body.clone(),
                },
            );
        }

        Ok(FetchResponse {
            url: url.to_string(),
            status,
            body,
            etag,
            not_modified: false,
            attempts: 1,
        })
    }

    /// Sends one request and returns once the head arrives.
    ///
    /// The permit is held only until then.
    async fn send_head(
        &self,
        url: &Url,
        kind: RequestKind,
        conditional: bool,
    ) -> Result<Head, AttemptError> {
        let stored = if conditional {
            self.etag_store().get(url.as_str()).cloned()
        } else {
            None
        };

        let permit = self
            .limiter
            .acquire(None)
            .await
            .map_err(|_| AttemptError::Fatal(FetchError::LimiterClosed { url: url.to_string() }))?;

        let mut request = self
            .http
            .get(url.clone())
            .timeout(self.settings.timeout_for(kind));
        if let Some(stored) = &stored {
            request = request.header(IF_NONE_MATCH, stored.etag.as_str());
        }

        let sent = request.send().await;
        self.limiter.release(permit);
        let response = sent.map_err(|e| AttemptError::from_reqwest(e, None))?;

        let status = response.status().as_u16();
        if status == 304 {
            return match stored {
                Some(stored) => Ok(Head::NotModified { status, stored }),
                None => Err(AttemptError::Fatal(FetchError::from_status(
                    url.as_str(),
                    status,
                    1,
                    None,
                ))),
            };
        }

        if !response.status().is_success() {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| parse_retry_after(v, self.clock.system_time()));
            debug!(status, ?retry_after, "non-success response");
            return Err(AttemptError::Status {
                status,
                retry_after,
            });
        }

        Ok(Head::Fresh(response))
    }

    fn etag_store(&self) -> MutexGuard<'_, LruCache<String, StoredEtag>> {
        self.etags.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Debits the throttles for `bytes` and returns the longest wait.
    fn pace(&self, bytes: usize, private: Option<&mut TokenBucket>) -> Duration {
        let bytes = bytes as u64;
        self.counters.bytes.fetch_add(bytes, Ordering::SeqCst);
        let shared = self.throttle.consume(bytes);
        let own = private.map_or(Duration::ZERO, |bucket| {
            bucket.consume(bytes, self.clock.now())
        });
        shared.max(own)
    }

    fn cancelled(&self, url: &str, attempts: u32) -> FetchError {
        ClientCounters::bump(&self.counters.cancelled);
        debug!(url, attempts, "request cancelled");
        FetchError::cancelled(url, attempts)
    }
}

fn build_http_client(settings: &ClientSettings) -> Result<Client, reqwest::Error> {
    Client::builder()
        .connect_timeout(settings.connect_timeout)
        .gzip(true)
        .user_agent(settings.user_agent.clone())
        .build()
}
