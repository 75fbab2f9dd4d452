//! Polite HTTP access to the archive.
//!
//! - [`RateLimiter`] bounds concurrent outbound requests (FIFO permits)
//! - [`BandwidthThrottle`] bounds aggregate bytes per second (token bucket)
//! - [`RetryPolicy`] / [`RetryMachine`] schedule retries and backoff
//! - [`ResilientClient`] ties them together with ETag revalidation,
//!   cancellation and streaming downloads

mod client;
mod constants;
mod error;
mod rate_limiter;
mod retry;
mod throttle;

pub use client::{
    ClientMetrics, ClientSettings, DownloadOptions, DownloadReport, FetchOptions, FetchResponse,
    RequestKind, ResilientClient,
};
pub use constants::{
    CONNECT_TIMEOUT_SECS, DEFAULT_BURST_BYTES, DEFAULT_MAX_CONCURRENT_REQUESTS,
    ETAG_STORE_CAPACITY, MAX_CONCURRENT_REQUESTS, MAX_ETAG_BODY_BYTES, MAX_RETRY_AFTER,
    METADATA_TIMEOUT_SECS, TRANSFER_TIMEOUT_SECS,
};
pub use error::FetchError;
pub use rate_limiter::{AcquireError, Permit, RateLimiter, RateLimiterMetrics, WaitBucket};
pub use retry::{
    DEFAULT_BACKOFF_MULTIPLIER, DEFAULT_BASE_DELAY, DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_DELAY,
    FailureType, HttpAttempt, RetryDecision, RetryMachine, RetryPolicy, RetryState,
    classify_http_status, parse_retry_after,
};
pub use throttle::{BandwidthThrottle, ThrottleMetrics, TokenBucket};
