//! Archive Access Core Library
//!
//! A polite, cache-first client access layer for a public archive's HTTP
//! API: it turns loose user input into archive identifiers, resolves them
//! with as few requests as possible, and keeps every request within
//! concurrency, bandwidth and retry limits.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`identifier`] - Identifier normalization and search variants
//! - [`clock`] - Time source shared by backoff, throttling and TTLs
//! - [`http`] - Rate limiter, bandwidth throttle, retry policy, resilient client
//! - [`cache`] - Two-tier (memory + `SQLite`) cache with LRU, TTL and pinning
//! - [`db`] - Database connection and schema management
//! - [`lookup`] - Lookup orchestrator, search and thumbnail prefetch
//! - [`config`] - TOML configuration
//! - [`session`] - Wiring of all of the above

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cache;
pub mod clock;
pub mod config;
pub mod db;
pub mod http;
pub mod identifier;
pub mod lookup;
pub mod session;
pub mod user_agent;

// Re-export commonly used types
pub use cache::{CacheLookup, CachePayload, CacheSettings, CacheStats, PutOptions, TwoTierCache};
pub use clock::{Clock, ManualClock, TokioClock};
pub use config::{AccessConfig, ConfigError, Intensity, load_config, load_default_config};
pub use db::{Database, DbError};
pub use http::{
    AcquireError, BandwidthThrottle, DownloadOptions, FetchError, FetchOptions, RateLimiter,
    RequestKind, ResilientClient, RetryPolicy,
};
pub use identifier::{
    NormalizationLevel, NormalizationResult, SearchStrategy, normalize, search_strategy,
    search_variants,
};
pub use lookup::{ItemMetadata, LookupError, LookupOrchestrator, SearchHit, Thumbnail};
pub use session::{ArchiveSession, SessionError, SessionStats};
