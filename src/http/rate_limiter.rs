//! Concurrency limiting for outbound archive requests.
//!
//! This module provides the [`RateLimiter`] struct, a counting semaphore that
//! bounds how many network operations are in flight at once, so the client
//! stays polite towards the archive no matter how many lookups callers start.
//!
//! # Overview
//!
//! - A free permit is granted immediately.
//! - Otherwise the caller joins a strict FIFO queue (Tokio's semaphore is
//!   fair), optionally bounded by a timeout.
//! - A [`Permit`] returns itself on drop, so every exit path releases it.
//!
//! The limiter bounds active network operations only; any number of logical
//! lookups may be waiting in the queue.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use archive_core::http::RateLimiter;
//!
//! # async fn example() -> Result<(), archive_core::http::AcquireError> {
//! let limiter = Arc::new(RateLimiter::new(4));
//!
//! let permit = limiter.acquire(None).await?;
//! // ... perform the request
//! limiter.release(permit);
//! # Ok(())
//! # }
//! ```

use std::fmt::Write as _;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

use super::constants::{
    DEFAULT_MAX_CONCURRENT_REQUESTS, MAX_CONCURRENT_REQUESTS, SLOW_ACQUIRE_WARNING_THRESHOLD,
};

/// Upper bounds (inclusive, milliseconds) of the queue-wait histogram buckets.
/// A final overflow bucket catches everything slower.
const WAIT_BUCKET_BOUNDS_MS: [u64; 5] = [1, 10, 100, 1_000, 10_000];

/// Errors from [`RateLimiter::acquire`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AcquireError {
    /// No permit became free before the caller's deadline.
    #[error("timed out after {waited:?} waiting for a request permit")]
    Timeout {
        /// How long the caller waited.
        waited: Duration,
    },

    /// The limiter was closed while waiting.
    #[error("rate limiter closed")]
    Closed,
}

/// Grant to perform one outbound network operation.
///
/// Dropping the permit releases it and wakes the longest-waiting caller.
#[derive(Debug)]
#[must_use = "dropping a permit releases it immediately"]
pub struct Permit {
    _permit: OwnedSemaphorePermit,
    counters: Arc<LimiterCounters>,
}

impl Drop for Permit {
    fn drop(&mut self) {
        self.counters.releases.fetch_add(1, Ordering::SeqCst);
    }
}

/// Point-in-time view of limiter activity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RateLimiterMetrics {
    /// Configured permit ceiling.
    pub max_permits: usize,
    /// Permits currently free.
    pub available_permits: usize,
    /// Total `acquire` calls.
    pub total_acquires: u64,
    /// Acquires granted without queueing.
    pub immediate_grants: u64,
    /// Acquires granted after waiting in the queue.
    pub queued_grants: u64,
    /// Permits returned.
    pub releases: u64,
    /// Acquires that gave up on their timeout.
    pub timeouts: u64,
    /// Callers waiting right now.
    pub current_queue_depth: usize,
    /// Largest queue observed.
    pub peak_queue_depth: usize,
    /// Queue-wait distribution.
    pub wait_buckets: Vec<WaitBucket>,
    /// Sum of all queue waits in milliseconds.
    pub total_wait_ms: u64,
    /// Longest single queue wait in milliseconds.
    pub max_wait_ms: u64,
}

/// One bucket of the queue-wait histogram.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WaitBucket {
    /// Inclusive upper bound in milliseconds, `None` for the overflow bucket.
    pub le_ms: Option<u64>,
    /// Number of grants whose wait fell in this bucket.
    pub count: u64,
}

#[derive(Debug, Default)]
struct LimiterCounters {
    acquires: AtomicU64,
    immediate: AtomicU64,
    queued: AtomicU64,
    releases: AtomicU64,
    timeouts: AtomicU64,
    waiting: AtomicUsize,
    peak_waiting: AtomicUsize,
    wait_buckets: [AtomicU64; WAIT_BUCKET_BOUNDS_MS.len() + 1],
    total_wait_us: AtomicU64,
    max_wait_us: AtomicU64,
}

impl LimiterCounters {
    #[allow(clippy::cast_possible_truncation)]
    fn record_wait(&self, waited: Duration) {
        let waited_ms = waited.as_millis() as u64;
        let index = WAIT_BUCKET_BOUNDS_MS
            .iter()
            .position(|bound| waited_ms <= *bound)
            .unwrap_or(WAIT_BUCKET_BOUNDS_MS.len());
        self.wait_buckets[index].fetch_add(1, Ordering::SeqCst);

        let waited_us = waited.as_micros() as u64;
        self.total_wait_us.fetch_add(waited_us, Ordering::SeqCst);
        self.max_wait_us.fetch_max(waited_us, Ordering::SeqCst);
    }

    fn reset(&self) {
        for counter in [
            &self.acquires,
            &self.immediate,
            &self.queued,
            &self.releases,
            &self.timeouts,
            &self.total_wait_us,
            &self.max_wait_us,
        ] {
            counter.store(0, Ordering::SeqCst);
        }
        for bucket in &self.wait_buckets {
            bucket.store(0, Ordering::SeqCst);
        }
        self.peak_waiting
            .store(self.waiting.load(Ordering::SeqCst), Ordering::SeqCst);
    }
}

/// Decrements the waiting count however the queued acquire ends.
struct QueueSlot<'a>(&'a LimiterCounters);

impl Drop for QueueSlot<'_> {
    fn drop(&mut self) {
        self.0.waiting.fetch_sub(1, Ordering::SeqCst);
    }
}

/// FIFO counting semaphore for outbound requests.
///
/// Designed to be wrapped in `Arc` and shared by the client and every task
/// issuing requests through it.
#[derive(Debug)]
pub struct RateLimiter {
    semaphore: Arc<Semaphore>,
    max_permits: usize,
    counters: Arc<LimiterCounters>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CONCURRENT_REQUESTS)
    }
}

impl RateLimiter {
    /// Creates a limiter with `max_permits` concurrent slots.
    ///
    /// The value is clamped to `1..=16`.
    #[must_use]
    #[instrument(level = "debug")]
    pub fn new(max_permits: usize) -> Self {
        let max_permits = max_permits.clamp(1, MAX_CONCURRENT_REQUESTS);
        debug!(max_permits, "creating rate limiter");
        Self {
            semaphore: Arc::new(Semaphore::new(max_permits)),
            max_permits,
            counters: Arc::new(LimiterCounters::default()),
        }
    }

    /// Returns the configured permit ceiling.
    #[must_use]
    pub fn max_permits(&self) -> usize {
        self.max_permits
    }

    /// Returns how many permits are free right now.
    #[must_use]
    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Returns how many permits are currently held.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.max_permits - self.available_permits()
    }

    /// Returns how many callers are waiting in the queue.
    #[must_use]
    pub fn queue_depth(&self) -> usize {
        self.counters.waiting.load(Ordering::SeqCst)
    }

    /// Acquires a permit, waiting in FIFO order if none is free.
    ///
    /// # Errors
    ///
    /// Returns [`AcquireError::Timeout`] if `timeout` elapses first,
    /// or [`AcquireError::Closed`] if the limiter was closed.
    #[instrument(skip(self), fields(available = self.available_permits()))]
    pub async fn acquire(&self, timeout: Option<Duration>) -> Result<Permit, AcquireError> {
        self.counters.acquires.fetch_add(1, Ordering::SeqCst);

        match Arc::clone(&self.semaphore).try_acquire_owned() {
            Ok(permit) => {
                self.counters.immediate.fetch_add(1, Ordering::SeqCst);
                self.counters.record_wait(Duration::ZERO);
                return Ok(self.wrap(permit));
            }
            Err(TryAcquireError::Closed) => return Err(AcquireError::Closed),
            Err(TryAcquireError::NoPermits) => {}
        }

        let depth = self.counters.waiting.fetch_add(1, Ordering::SeqCst) + 1;
        self.counters.peak_waiting.fetch_max(depth, Ordering::SeqCst);
        let _slot = QueueSlot(&self.counters);
        debug!(queue_depth = depth, "no free permit - queued");

        let started = Instant::now();
        let waiting = Arc::clone(&self.semaphore).acquire_owned();
        let acquired = match timeout {
            Some(limit) => match tokio::time::timeout(limit, waiting).await {
                Ok(result) => result,
                Err(_) => {
                    self.counters.timeouts.fetch_add(1, Ordering::SeqCst);
                    let waited = started.elapsed();
                    debug!(waited_ms = waited.as_millis(), "permit acquire timed out");
                    return Err(AcquireError::Timeout { waited });
                }
            },
            None => waiting.await,
        };
        let permit = acquired.map_err(|_| AcquireError::Closed)?;

        let waited = started.elapsed();
        self.counters.queued.fetch_add(1, Ordering::SeqCst);
        self.counters.record_wait(waited);
        if waited >= SLOW_ACQUIRE_WARNING_THRESHOLD {
            warn!(
                waited_secs = waited.as_secs(),
                max_permits = self.max_permits,
                "long wait for request permit - consider raising max concurrent requests"
            );
        } else {
            debug!(waited_ms = waited.as_millis(), "permit granted from queue");
        }

        Ok(self.wrap(permit))
    }

    /// Returns a permit, waking the head of the queue.
    ///
    /// Equivalent to dropping the permit.
    pub fn release(&self, permit: Permit) {
        drop(permit);
    }

    /// Stops granting permits; queued and future acquires fail with `Closed`.
    pub fn close(&self) {
        self.semaphore.close();
    }

    /// Returns a snapshot of limiter activity.
    #[must_use]
    pub fn metrics(&self) -> RateLimiterMetrics {
        let c = &self.counters;
        let wait_buckets = c
            .wait_buckets
            .iter()
            .enumerate()
            .map(|(index, count)| WaitBucket {
                le_ms: WAIT_BUCKET_BOUNDS_MS.get(index).copied(),
                count: count.load(Ordering::SeqCst),
            })
            .collect();

        RateLimiterMetrics {
            max_permits: self.max_permits,
            available_permits: self.available_permits(),
            total_acquires: c.acquires.load(Ordering::SeqCst),
            immediate_grants: c.immediate.load(Ordering::SeqCst),
            queued_grants: c.queued.load(Ordering::SeqCst),
            releases: c.releases.load(Ordering::SeqCst),
            timeouts: c.timeouts.load(Ordering::SeqCst),
            current_queue_depth: c.waiting.load(Ordering::SeqCst),
            peak_queue_depth: c.peak_waiting.load(Ordering::SeqCst),
            wait_buckets,
            total_wait_ms: c.total_wait_us.load(Ordering::SeqCst) / 1_000,
            max_wait_ms: c.max_wait_us.load(Ordering::SeqCst) / 1_000,
        }
    }

    /// Renders the metrics as a short human-readable report.
    #[must_use]
    pub fn formatted_statistics(&self) -> String {
        let m = self.metrics();
        let mut out = String::new();
        let _ = writeln!(
            out,
            "Rate limiter: {}/{} permits in use, queue {} (peak {})",
            m.max_permits - m.available_permits,
            m.max_permits,
            m.current_queue_depth,
            m.peak_queue_depth
        );
        let _ = writeln!(
            out,
            "  acquires {} (immediate {}, queued {}), releases {}, timeouts {}",
            m.total_acquires, m.immediate_grants, m.queued_grants, m.releases, m.timeouts
        );
        let _ = write!(
            out,
            "  queue wait: total {}ms, max {}ms",
            m.total_wait_ms, m.max_wait_ms
        );
        out
    }

    /// Zeroes counters; permits and the queue are untouched.
    pub fn reset_metrics(&self) {
        self.counters.reset();
    }

    fn wrap(&self, permit: OwnedSemaphorePermit) -> Permit {
        Permit {
            _permit: permit,
            counters: Arc::clone(&self.counters),
        }
    }
}
