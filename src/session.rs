//! Wiring of every component into one session.
//!
//! An [`ArchiveSession`] owns the shared rate limiter, bandwidth throttle,
//! cache, HTTP client and lookup orchestrator built from one
//! [`AccessConfig`]. Components are shared through `Arc`; nothing is global.

use std::fmt::Write as _;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::cache::{CacheStats, TwoTierCache};
use crate::clock::{Clock, TokioClock};
use crate::config::{AccessConfig, ConfigError, Intensity, default_cache_path};
use crate::http::{
    BandwidthThrottle, ClientMetrics, FetchError, RateLimiter, RateLimiterMetrics,
    ResilientClient, ThrottleMetrics,
};
use crate::lookup::{ArchiveEndpoints, LookupMetrics, LookupOrchestrator};

/// Errors from building a session.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The configuration failed validation.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The HTTP client could not be built.
    #[error(transparent)]
    Client(#[from] FetchError),

    /// The endpoint base URL is not a URL.
    #[error("invalid endpoint base URL {url}: {source}")]
    Endpoint {
        /// Configured base URL.
        url: String,
        /// Parse failure.
        #[source]
        source: url::ParseError,
    },
}

/// Combined metrics of every component.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionStats {
    /// Admission control.
    pub rate_limiter: RateLimiterMetrics,
    /// Aggregate bandwidth.
    pub throttle: ThrottleMetrics,
    /// HTTP client.
    pub client: ClientMetrics,
    /// Cache tiers.
    pub cache: CacheStats,
    /// Lookup orchestrator.
    pub lookup: LookupMetrics,
}

/// One configured access layer.
#[derive(Debug)]
pub struct ArchiveSession {
    config: AccessConfig,
    limiter: Arc<RateLimiter>,
    throttle: Arc<BandwidthThrottle>,
    cache: Arc<TwoTierCache>,
    client: Arc<ResilientClient>,
    lookup: LookupOrchestrator,
}

impl ArchiveSession {
    /// Builds a session on the Tokio clock.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] if the configuration is invalid or the HTTP
    /// client cannot be built. A cache database that cannot be opened is not
    /// an error; the session falls back to a memory-only cache.
    pub async fn open(config: AccessConfig) -> Result<Self, SessionError> {
        Self::open_with_clock(config, Arc::new(TokioClock)).await
    }

    /// Builds a session on the given clock.
    ///
    /// # Errors
    ///
    /// See [`open`](Self::open).
    #[instrument(skip_all, fields(intensity = %config.intensity))]
    pub async fn open_with_clock(
        config: AccessConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, SessionError> {
        config.validate()?;

        let endpoints =
            ArchiveEndpoints::new(&config.endpoints.base_url).map_err(|source| {
                SessionError::Endpoint {
                    url: config.endpoints.base_url.clone(),
                    source,
                }
            })?;

        let limiter = Arc::new(RateLimiter::new(config.max_concurrent_requests));
        let throttle = Arc::new(BandwidthThrottle::new(
            config.bandwidth_limit(),
            config.bandwidth.burst_bytes,
            Arc::clone(&clock),
        ));

        let mut cache_settings = config.cache_settings();
        if cache_settings.path.is_none() {
            cache_settings.path = default_cache_path();
        }
        let cache = match TwoTierCache::open(cache_settings.clone(), Arc::clone(&clock)).await {
            Ok(cache) => cache,
            Err(error) => {
                warn!(%error, "persistent cache unavailable, using memory only");
                TwoTierCache::memory_only(cache_settings, Arc::clone(&clock))
            }
        };
        cache.set_cache_only(config.intensity.is_cache_only());
        let cache = Arc::new(cache);

        let client = Arc::new(
            ResilientClient::new(
                Arc::clone(&limiter),
                Arc::clone(&throttle),
                clock,
                config.retry.policy(),
                config.client_settings(),
            )?
            .with_cache(Arc::clone(&cache)),
        );

        let lookup = LookupOrchestrator::new(
            Arc::clone(&client),
            Arc::clone(&cache),
            endpoints,
            config.intensity,
        );

        info!(
            concurrency = limiter.max_permits(),
            bandwidth = ?throttle.rate(),
            persistent = cache.is_persistent(),
            "session ready"
        );

        Ok(Self {
            config,
            limiter,
            throttle,
            cache,
            client,
            lookup,
        })
    }

    /// Configuration the session was built from.
    #[must_use]
    pub fn config(&self) -> &AccessConfig {
        &self.config
    }

    /// Shared admission limiter.
    #[must_use]
    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// Shared bandwidth throttle.
    #[must_use]
    pub fn throttle(&self) -> &Arc<BandwidthThrottle> {
        &self.throttle
    }

    /// Shared cache.
    #[must_use]
    pub fn cache(&self) -> &Arc<TwoTierCache> {
        &self.cache
    }

    /// Shared HTTP client.
    #[must_use]
    pub fn client(&self) -> &Arc<ResilientClient> {
        &self.client
    }

    /// Lookup orchestrator.
    #[must_use]
    pub fn lookup(&self) -> &LookupOrchestrator {
        &self.lookup
    }

    /// Switches intensity, entering or leaving cache-only mode to match.
    pub fn set_intensity(&self, intensity: Intensity) {
        self.lookup.set_intensity(intensity);
        self.cache.set_cache_only(intensity.is_cache_only());
    }

    /// Changes the aggregate bandwidth cap; `None` removes it.
    pub fn set_bandwidth_limit(&self, max_bytes_per_second: Option<u64>) {
        self.throttle.set_rate(max_bytes_per_second);
    }

    /// Drops every cached entry.
    pub async fn clear(&self) {
        self.cache.clear().await;
    }

    /// Zeroes all metrics, forgets ETags and refills the bandwidth bucket.
    pub fn reset(&self) {
        self.limiter.reset_metrics();
        self.throttle.reset();
        self.throttle.reset_metrics();
        self.client.reset();
        self.cache.reset_metrics();
        self.lookup.reset_metrics();
        info!("session state reset");
    }

    /// Waits for pending cache writes.
    pub async fn flush(&self) {
        self.cache.flush().await;
    }

    /// Metrics of every component.
    pub async fn stats(&self) -> SessionStats {
        SessionStats {
            rate_limiter: self.limiter.metrics(),
            throttle: self.throttle.metrics(),
            client: self.client.metrics(),
            cache: self.cache.stats().await,
            lookup: self.lookup.metrics(),
        }
    }

    /// Every component's report, one after another.
    pub async fn formatted_statistics(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "{}", self.limiter.formatted_statistics());
        let _ = writeln!(out, "{}", self.throttle.formatted_statistics());
        let _ = writeln!(out, "{}", self.client.formatted_statistics());
        let _ = writeln!(out, "{}", self.cache.formatted_statistics().await);
        let _ = write!(out, "{}", self.lookup.formatted_statistics());
        out
    }
}
