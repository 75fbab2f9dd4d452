//! Configuration loading.
//!
//! Settings come from a TOML file (every key optional) and are overridden by
//! command-line flags. [`AccessConfig::validate`] reports every out-of-range
//! value at once.
//!
//! ```toml
//! intensity = "standard"
//! max_concurrent_requests = 4
//!
//! [bandwidth]
//! max_bytes_per_second = 524288
//!
//! [cache]
//! path = "/var/cache/archive-access/cache.db"
//! ```

use std::env;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::cache::{
    CacheSettings, DEFAULT_DISK_MAX_BYTES, DEFAULT_DISK_MAX_ITEMS, DEFAULT_MEMORY_MAX_BYTES,
    DEFAULT_MEMORY_MAX_ITEMS, DEFAULT_NEGATIVE_TTL, DEFAULT_POSITIVE_TTL, MAX_TTL,
};
use crate::http::{
    CONNECT_TIMEOUT_SECS, ClientSettings, DEFAULT_BACKOFF_MULTIPLIER, DEFAULT_BASE_DELAY,
    DEFAULT_BURST_BYTES, DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_CONCURRENT_REQUESTS, DEFAULT_MAX_DELAY,
    MAX_CONCURRENT_REQUESTS, METADATA_TIMEOUT_SECS, RetryPolicy, TRANSFER_TIMEOUT_SECS,
};
use crate::lookup::DEFAULT_BASE_URL;
use crate::user_agent::default_user_agent;

/// Directory name under the XDG config home.
const CONFIG_DIR_NAME: &str = "archive-access";

/// Errors from loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("failed to read config {path}: {source}")]
    Io {
        /// File that was read.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The config file is not valid TOML for this schema.
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// One or more values are out of range.
    #[error("invalid configuration: {}", .0.join("; "))]
    Invalid(Vec<String>),
}

/// How much network traffic lookups may generate.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, ValueEnum,
)]
#[serde(rename_all = "camelCase")]
pub enum Intensity {
    /// No network at all; only cached data is served.
    #[value(name = "cacheOnly", alias = "cache-only")]
    CacheOnly,
    /// Small searches, no thumbnail prefetch.
    Minimal,
    /// Normal searches with thumbnail prefetch.
    #[default]
    Standard,
    /// Large searches with every field and thumbnail prefetch.
    Full,
}

impl Intensity {
    /// Returns the stable string label.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CacheOnly => "cacheOnly",
            Self::Minimal => "minimal",
            Self::Standard => "standard",
            Self::Full => "full",
        }
    }

    /// Returns `true` for [`Intensity::CacheOnly`].
    #[must_use]
    pub fn is_cache_only(self) -> bool {
        self == Self::CacheOnly
    }

    /// Rows requested per search.
    #[must_use]
    pub fn search_rows(self) -> u32 {
        match self {
            Self::CacheOnly | Self::Minimal => 20,
            Self::Standard => 50,
            Self::Full => 100,
        }
    }

    /// Fields requested per search row.
    #[must_use]
    pub fn search_fields(self) -> &'static [&'static str] {
        match self {
            Self::CacheOnly | Self::Minimal => &["identifier", "title"],
            Self::Standard => &["identifier", "title", "mediatype", "date"],
            Self::Full => &[
                "identifier",
                "title",
                "mediatype",
                "date",
                "creator",
                "description",
                "downloads",
            ],
        }
    }

    /// Whether thumbnails are fetched ahead of display.
    #[must_use]
    pub fn prefetches_thumbnails(self) -> bool {
        matches!(self, Self::Standard | Self::Full)
    }
}

impl fmt::Display for Intensity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Intensity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cacheOnly" | "cache-only" => Ok(Self::CacheOnly),
            "minimal" => Ok(Self::Minimal),
            "standard" => Ok(Self::Standard),
            "full" => Ok(Self::Full),
            _ => Err(format!("invalid intensity: {s}")),
        }
    }
}

/// Bandwidth limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BandwidthConfig {
    /// Aggregate cap; `None` or 0 is unbounded.
    pub max_bytes_per_second: Option<u64>,
    /// Burst allowance in bytes.
    pub burst_bytes: u64,
}

impl Default for BandwidthConfig {
    fn default() -> Self {
        Self {
            max_bytes_per_second: None,
            burst_bytes: DEFAULT_BURST_BYTES,
        }
    }
}

/// Retry schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Attempts per logical request, first included.
    pub max_attempts: u32,
    /// First backoff delay.
    pub base_delay_ms: u64,
    /// Backoff ceiling.
    pub max_delay_ms: u64,
    /// Growth factor between attempts.
    pub backoff_multiplier: f32,
    /// Random extra delay per attempt.
    pub max_jitter_ms: u64,
}

impl Default for RetryConfig {
    #[allow(clippy::cast_possible_truncation)]
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay_ms: DEFAULT_BASE_DELAY.as_millis() as u64,
            max_delay_ms: DEFAULT_MAX_DELAY.as_millis() as u64,
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
            max_jitter_ms: 0,
        }
    }
}

impl RetryConfig {
    /// Builds the policy these values describe.
    #[must_use]
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_attempts,
            Duration::from_millis(self.base_delay_ms),
            Duration::from_millis(self.max_delay_ms),
            self.backoff_multiplier,
        )
        .with_jitter(Duration::from_millis(self.max_jitter_ms))
    }
}

/// Request timeouts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// TCP/TLS connect timeout.
    pub connect_secs: u64,
    /// Metadata and search requests.
    pub metadata_secs: u64,
    /// Thumbnails and downloads.
    pub transfer_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: CONNECT_TIMEOUT_SECS,
            metadata_secs: METADATA_TIMEOUT_SECS,
            transfer_secs: TRANSFER_TIMEOUT_SECS,
        }
    }
}

/// Cache bounds, lifetimes and location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Non-pinned entries kept in memory.
    pub memory_max_items: usize,
    /// Bytes kept in memory.
    pub memory_max_bytes: u64,
    /// Non-pinned rows kept on disk.
    pub disk_max_items: u64,
    /// Bytes kept on disk.
    pub disk_max_bytes: u64,
    /// Lifetime of positive entries.
    pub positive_ttl_secs: u64,
    /// Lifetime of negative entries.
    pub negative_ttl_secs: u64,
    /// Database file; defaults to the XDG cache directory.
    pub path: Option<PathBuf>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            memory_max_items: DEFAULT_MEMORY_MAX_ITEMS,
            memory_max_bytes: DEFAULT_MEMORY_MAX_BYTES,
            disk_max_items: DEFAULT_DISK_MAX_ITEMS,
            disk_max_bytes: DEFAULT_DISK_MAX_BYTES,
            positive_ttl_secs: DEFAULT_POSITIVE_TTL.as_secs(),
            negative_ttl_secs: DEFAULT_NEGATIVE_TTL.as_secs(),
            path: None,
        }
    }
}

/// Upstream location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    /// Root of the archive API.
    pub base_url: String,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }
}

/// Complete configuration of an [`ArchiveSession`](crate::ArchiveSession).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccessConfig {
    /// Network intensity level.
    pub intensity: Intensity,
    /// Concurrent outbound requests.
    pub max_concurrent_requests: usize,
    /// `[bandwidth]`
    pub bandwidth: BandwidthConfig,
    /// `[retry]`
    pub retry: RetryConfig,
    /// `[timeouts]`
    pub timeouts: TimeoutConfig,
    /// `[cache]`
    pub cache: CacheConfig,
    /// `[endpoints]`
    pub endpoints: EndpointConfig,
}

impl Default for AccessConfig {
    fn default() -> Self {
        Self {
            intensity: Intensity::default(),
            max_concurrent_requests: DEFAULT_MAX_CONCURRENT_REQUESTS,
            bandwidth: BandwidthConfig::default(),
            retry: RetryConfig::default(),
            timeouts: TimeoutConfig::default(),
            cache: CacheConfig::default(),
            endpoints: EndpointConfig::default(),
        }
    }
}

impl AccessConfig {
    /// Parses TOML text. Missing keys take their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed TOML or wrong types.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Checks every value against its accepted range.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] listing each violation.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut problems = Vec::new();

        if !(1..=MAX_CONCURRENT_REQUESTS).contains(&self.max_concurrent_requests) {
            problems.push(format!(
                "max_concurrent_requests must be 1..={MAX_CONCURRENT_REQUESTS}, got {}",
                self.max_concurrent_requests
            ));
        }
        if self.bandwidth.burst_bytes == 0 {
            problems.push("bandwidth.burst_bytes must be positive".to_string());
        }
        if !(1..=20).contains(&self.retry.max_attempts) {
            problems.push(format!(
                "retry.max_attempts must be 1..=20, got {}",
                self.retry.max_attempts
            ));
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            problems.push(format!(
                "retry.base_delay_ms ({}) exceeds retry.max_delay_ms ({})",
                self.retry.base_delay_ms, self.retry.max_delay_ms
            ));
        }
        if !(1.0..=10.0).contains(&self.retry.backoff_multiplier) {
            problems.push(format!(
                "retry.backoff_multiplier must be 1.0..=10.0, got {}",
                self.retry.backoff_multiplier
            ));
        }
        for (field, value) in [
            ("timeouts.connect_secs", self.timeouts.connect_secs),
            ("timeouts.metadata_secs", self.timeouts.metadata_secs),
            ("timeouts.transfer_secs", self.timeouts.transfer_secs),
        ] {
            if !(1..=3600).contains(&value) {
                problems.push(format!("{field} must be 1..=3600, got {value}"));
            }
        }
        if self.cache.memory_max_items == 0 || self.cache.disk_max_items == 0 {
            problems.push("cache item bounds must be positive".to_string());
        }
        if self.cache.negative_ttl_secs == 0 || self.cache.positive_ttl_secs == 0 {
            problems.push("cache TTLs must be positive".to_string());
        }
        if self.cache.positive_ttl_secs > MAX_TTL.as_secs() {
            problems.push(format!(
                "cache.positive_ttl_secs must be at most {}, got {}",
                MAX_TTL.as_secs(),
                self.cache.positive_ttl_secs
            ));
        }
        if self.cache.negative_ttl_secs > self.cache.positive_ttl_secs {
            problems.push(format!(
                "cache.negative_ttl_secs ({}) exceeds cache.positive_ttl_secs ({})",
                self.cache.negative_ttl_secs, self.cache.positive_ttl_secs
            ));
        }
        if let Err(error) = url::Url::parse(&self.endpoints.base_url) {
            problems.push(format!(
                "endpoints.base_url {:?} is not a URL: {error}",
                self.endpoints.base_url
            ));
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(problems))
        }
    }

    /// Bandwidth cap with 0 folded into `None`.
    #[must_use]
    pub fn bandwidth_limit(&self) -> Option<u64> {
        self.bandwidth.max_bytes_per_second.filter(|rate| *rate > 0)
    }

    /// HTTP client settings these values describe.
    #[must_use]
    pub fn client_settings(&self) -> ClientSettings {
        ClientSettings {
            connect_timeout: Duration::from_secs(self.timeouts.connect_secs),
            metadata_timeout: Duration::from_secs(self.timeouts.metadata_secs),
            transfer_timeout: Duration::from_secs(self.timeouts.transfer_secs),
            user_agent: default_user_agent(),
            ..ClientSettings::default()
        }
    }

    /// Cache settings these values describe.
    #[must_use]
    pub fn cache_settings(&self) -> CacheSettings {
        CacheSettings {
            memory_max_items: self.cache.memory_max_items,
            memory_max_bytes: self.cache.memory_max_bytes,
            disk_max_items: self.cache.disk_max_items,
            disk_max_bytes: self.cache.disk_max_bytes,
            positive_ttl: Duration::from_secs(self.cache.positive_ttl_secs),
            negative_ttl: Duration::from_secs(self.cache.negative_ttl_secs),
            path: self.cache.path.clone(),
        }
    }
}

/// Reads and validates the config file at `path`.
///
/// # Errors
///
/// Returns [`ConfigError`] if the file cannot be read, parsed or validated.
pub fn load_config(path: &Path) -> Result<AccessConfig, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let config = AccessConfig::from_toml_str(&text)?;
    config.validate()?;
    debug!(path = %path.display(), "loaded config");
    Ok(config)
}

/// Loads the default config file when it exists, else defaults.
///
/// # Errors
///
/// Returns [`ConfigError`] if an existing file is unreadable or invalid.
pub fn load_default_config() -> Result<AccessConfig, ConfigError> {
    match default_config_path() {
        Some(path) if path.exists() => load_config(&path),
        _ => Ok(AccessConfig::default()),
    }
}

/// Resolves the default config path.
///
/// Priority:
/// 1. `$XDG_CONFIG_HOME/archive-access/config.toml`
/// 2. `$HOME/.config/archive-access/config.toml`
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    if let Some(config_home) = env_var_non_empty_os("XDG_CONFIG_HOME") {
        return Some(
            PathBuf::from(config_home)
                .join(CONFIG_DIR_NAME)
                .join("config.toml"),
        );
    }
    let home = env_var_non_empty_os("HOME")?;
    Some(
        PathBuf::from(home)
            .join(".config")
            .join(CONFIG_DIR_NAME)
            .join("config.toml"),
    )
}

/// Resolves the default cache database path.
///
/// Priority:
/// 1. `$XDG_CACHE_HOME/archive-access/cache.db`
/// 2. `$HOME/.cache/archive-access/cache.db`
#[must_use]
pub fn default_cache_path() -> Option<PathBuf> {
    if let Some(cache_home) = env_var_non_empty_os("XDG_CACHE_HOME") {
        return Some(PathBuf::from(cache_home).join(CONFIG_DIR_NAME).join("cache.db"));
    }
    let home = env_var_non_empty_os("HOME")?;
    Some(
        PathBuf::from(home)
            .join(".cache")
            .join(CONFIG_DIR_NAME)
            .join("cache.db"),
    )
}

fn env_var_non_empty_os(name: &str) -> Option<std::ffi::OsString> {
    let value = env::var_os(name)?;
    if value.is_empty() { None } else { Some(value) }
}
