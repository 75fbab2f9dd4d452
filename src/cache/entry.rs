//! Cache entry types shared by both tiers.

use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use super::error::CacheError;

/// Whether an entry records a found resource or a confirmed absence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// The resource exists; the payload holds it.
    Positive,
    /// The resource is confirmed absent upstream.
    Negative,
}

impl Outcome {
    /// Returns the database string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Positive => "positive",
            Self::Negative => "negative",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Outcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "positive" => Ok(Self::Positive),
            "negative" => Ok(Self::Negative),
            _ => Err(format!("invalid cache outcome: {s}")),
        }
    }
}

/// What a cache entry stores.
#[derive(Debug, Clone, PartialEq)]
pub enum CachePayload {
    /// A JSON document (item metadata, search results).
    Metadata(serde_json::Value),
    /// Raw bytes (thumbnails, fetched bodies).
    Bytes(Bytes),
    /// Nothing; used by negative entries.
    Absent,
}

impl CachePayload {
    /// Returns the database string representation of the payload kind.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Metadata(_) => "metadata",
            Self::Bytes(_) => "bytes",
            Self::Absent => "absent",
        }
    }

    /// Serialized form stored in the persistent tier.
    #[must_use]
    pub fn to_blob(&self) -> Vec<u8> {
        match self {
            Self::Metadata(value) => value.to_string().into_bytes(),
            Self::Bytes(bytes) => bytes.to_vec(),
            Self::Absent => Vec::new(),
        }
    }

    /// Rebuilds a payload from its persistent form.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::CorruptPayload`] for an unknown kind or
    /// unparseable JSON.
    pub fn from_blob(key: &str, kind: &str, blob: Vec<u8>) -> Result<Self, CacheError> {
        match kind {
            "metadata" => serde_json::from_slice(&blob)
                .map(Self::Metadata)
                .map_err(|e| CacheError::corrupt(key, e)),
            "bytes" => Ok(Self::Bytes(Bytes::from(blob))),
            "absent" => Ok(Self::Absent),
            other => Err(CacheError::corrupt(key, format!("unknown payload kind {other}"))),
        }
    }

    /// Size charged against tier byte bounds.
    #[must_use]
    pub fn size_bytes(&self) -> u64 {
        match self {
            Self::Metadata(value) => value.to_string().len() as u64,
            Self::Bytes(bytes) => bytes.len() as u64,
            Self::Absent => 0,
        }
    }
}

/// One cached value with its bookkeeping.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    /// Lookup key, e.g. `metadata:<identifier>`.
    pub key: String,
    /// Stored value.
    pub payload: CachePayload,
    /// Found or confirmed absent.
    pub outcome: Outcome,
    /// When the entry was written.
    pub inserted_at: SystemTime,
    /// When the entry was last read.
    pub last_access: SystemTime,
    /// Lifetime from `inserted_at`.
    pub ttl: Duration,
    /// Bytes charged against tier bounds.
    pub size_bytes: u64,
    /// Pinned entries are never evicted by pressure and never expire.
    pub pinned: bool,
}

impl CacheEntry {
    /// Creates an entry inserted at `now`.
    #[must_use]
    pub fn new(
        key: impl Into<String>,
        payload: CachePayload,
        outcome: Outcome,
        ttl: Duration,
        pinned: bool,
        now: SystemTime,
    ) -> Self {
        let size_bytes = payload.size_bytes();
        Self {
            key: key.into(),
            payload,
            outcome,
            inserted_at: now,
            last_access: now,
            ttl,
            size_bytes,
            pinned,
        }
    }

    /// When the TTL runs out, `None` if that lies beyond what `SystemTime`
    /// can represent.
    #[must_use]
    pub fn expires_at(&self) -> Option<SystemTime> {
        self.inserted_at.checked_add(self.ttl)
    }

    /// Returns `true` once the TTL has run out; pinned entries never expire.
    #[must_use]
    pub fn is_expired(&self, now: SystemTime) -> bool {
        !self.pinned && self.expires_at().is_some_and(|at| now >= at)
    }

    /// Returns `true` for positive entries.
    #[must_use]
    pub fn is_positive(&self) -> bool {
        self.outcome == Outcome::Positive
    }
}

/// Result of [`TwoTierCache::get`](super::TwoTierCache::get).
#[derive(Debug, Clone, PartialEq)]
pub enum CacheLookup {
    /// A live entry (or any entry, in cache-only mode).
    Hit(CacheEntry),
    /// Nothing usable is cached.
    Miss,
}

impl CacheLookup {
    /// Returns `true` for a hit.
    #[must_use]
    pub fn is_hit(&self) -> bool {
        matches!(self, Self::Hit(_))
    }

    /// Returns the entry of a hit.
    #[must_use]
    pub fn into_entry(self) -> Option<CacheEntry> {
        match self {
            Self::Hit(entry) => Some(entry),
            Self::Miss => None,
        }
    }
}

/// Options for [`TwoTierCache::put`](super::TwoTierCache::put).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PutOptions {
    /// Exempt the entry from pressure eviction and expiry. `false` leaves an
    /// existing pin in place; use `unpin` to clear it.
    pub pinned: bool,
    /// Found or confirmed absent.
    pub outcome: Outcome,
    /// Overrides the tier default TTL for the outcome.
    pub ttl: Option<Duration>,
}

impl Default for PutOptions {
    fn default() -> Self {
        Self::positive()
    }
}

impl PutOptions {
    /// Positive, unpinned, default TTL.
    #[must_use]
    pub fn positive() -> Self {
        Self {
            pinned: false,
            outcome: Outcome::Positive,
            ttl: None,
        }
    }

    /// Negative, unpinned, default negative TTL.
    #[must_use]
    pub fn negative() -> Self {
        Self {
            outcome: Outcome::Negative,
            ..Self::positive()
        }
    }

    /// Positive and pinned.
    #[must_use]
    pub fn pinned() -> Self {
        Self {
            pinned: true,
            ..Self::positive()
        }
    }

    /// Sets an explicit TTL.
    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }
}

/// Milliseconds since the Unix epoch, saturating.
pub(crate) fn to_millis(time: SystemTime) -> i64 {
    time.duration_since(UNIX_EPOCH)
        .map_or(0, |d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
}

/// Inverse of [`to_millis`]; negative values clamp to the epoch.
pub(crate) fn from_millis(millis: i64) -> SystemTime {
    UNIX_EPOCH + Duration::from_millis(u64::try_from(millis).unwrap_or(0))
}
