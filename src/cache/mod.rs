//! Two-tier cache for archive responses.
//!
//! Lookups hit a bounded in-memory LRU tier first and fall back to a
//! `SQLite` tier that survives restarts. Writes land in memory immediately
//! and are persisted by a single background task that applies every
//! persistent operation in submission order, so a `get` issued after a
//! `put` always observes it.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use archive_core::cache::{CachePayload, CacheSettings, PutOptions, TwoTierCache};
//! use archive_core::clock::TokioClock;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let cache = TwoTierCache::open(CacheSettings::default(), Arc::new(TokioClock)).await?;
//! cache.put("thumbnail:mario", CachePayload::Bytes("png".into()), PutOptions::default());
//! assert!(cache.get("thumbnail:mario").await.is_hit());
//! # Ok(())
//! # }
//! ```

mod entry;
mod error;
mod memory;
mod persistent;

use std::fmt::Write as _;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime};

use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, instrument, warn};

pub use entry::{CacheEntry, CacheLookup, CachePayload, Outcome, PutOptions};
pub use error::CacheError;
pub use memory::{MemoryTier, MemoryUsage};
pub use persistent::{PersistentTier, PersistentUsage};

use crate::clock::Clock;
use crate::db::Database;

/// Default item bound of the memory tier.
pub const DEFAULT_MEMORY_MAX_ITEMS: usize = 1_000;
/// Default byte bound of the memory tier.
pub const DEFAULT_MEMORY_MAX_BYTES: u64 = 64 * 1024 * 1024;
/// Default item bound of the persistent tier.
pub const DEFAULT_DISK_MAX_ITEMS: u64 = 10_000;
/// Default byte bound of the persistent tier.
pub const DEFAULT_DISK_MAX_BYTES: u64 = 512 * 1024 * 1024;
/// Default lifetime of positive entries.
pub const DEFAULT_POSITIVE_TTL: Duration = Duration::from_secs(24 * 60 * 60);
/// Default lifetime of negative entries.
pub const DEFAULT_NEGATIVE_TTL: Duration = Duration::from_secs(30 * 60);
/// Longest lifetime a configuration may give any entry (ten years).
pub const MAX_TTL: Duration = Duration::from_secs(10 * 365 * 24 * 60 * 60);

/// Bounds, lifetimes and location of the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheSettings {
    /// Non-pinned entries kept in memory.
    pub memory_max_items: usize,
    /// Bytes of non-pinned entries kept in memory.
    pub memory_max_bytes: u64,
    /// Non-pinned rows kept on disk.
    pub disk_max_items: u64,
    /// Bytes of non-pinned rows kept on disk.
    pub disk_max_bytes: u64,
    /// Lifetime of positive entries.
    pub positive_ttl: Duration,
    /// Lifetime of negative entries.
    pub negative_ttl: Duration,
    /// Database file; `None` keeps the persistent tier in memory.
    pub path: Option<PathBuf>,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            memory_max_items: DEFAULT_MEMORY_MAX_ITEMS,
            memory_max_bytes: DEFAULT_MEMORY_MAX_BYTES,
            disk_max_items: DEFAULT_DISK_MAX_ITEMS,
            disk_max_bytes: DEFAULT_DISK_MAX_BYTES,
            positive_ttl: DEFAULT_POSITIVE_TTL,
            negative_ttl: DEFAULT_NEGATIVE_TTL,
            path: None,
        }
    }
}

/// Snapshot of cache occupancy and activity.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct CacheStats {
    /// Memory tier occupancy.
    pub memory: MemoryUsage,
    /// Persistent tier occupancy; `None` when memory-only or unreadable.
    pub persistent: Option<PersistentUsage>,
    /// Hits answered by the memory tier.
    pub memory_hits: u64,
    /// Hits answered by the persistent tier (and promoted).
    pub persistent_hits: u64,
    /// Lookups that found nothing usable.
    pub misses: u64,
    /// Expired entries dropped on lookup.
    pub expired: u64,
    /// Entries written.
    pub puts: u64,
    /// Entries evicted from memory by pressure.
    pub memory_evictions: u64,
    /// Persistent tier operations that failed.
    pub persistent_errors: u64,
    /// Whether cache-only mode is on.
    pub cache_only: bool,
}

impl CacheStats {
    /// Fraction of lookups that hit, in `0.0..=1.0`.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn hit_ratio(&self) -> f64 {
        let hits = self.memory_hits + self.persistent_hits;
        let total = hits + self.misses;
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }
}

/// Entries dropped by [`TwoTierCache::purge_expired`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct PurgeSummary {
    /// Dropped from memory.
    pub memory: usize,
    /// Deleted from disk.
    pub persistent: u64,
}

#[derive(Debug, Default)]
struct CacheCounters {
    memory_hits: AtomicU64,
    persistent_hits: AtomicU64,
    misses: AtomicU64,
    expired: AtomicU64,
    puts: AtomicU64,
    memory_evictions: AtomicU64,
    persistent_errors: AtomicU64,
}

impl CacheCounters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::SeqCst);
    }
}

type Reply<T> = oneshot::Sender<Result<T, CacheError>>;

/// Work for the persistent writer task.
#[derive(Debug)]
enum PersistOp {
    Store(CacheEntry),
    Touch { key: String, at: SystemTime },
    Remove { key: String, reply: Reply<bool> },
    SetPinned { key: String, pinned: bool, reply: Reply<bool> },
    Clear(Reply<u64>),
    PurgeExpired { now: SystemTime, reply: Reply<u64> },
    Load { key: String, reply: Reply<Option<CacheEntry>> },
    Usage(Reply<PersistentUsage>),
    Flush(oneshot::Sender<()>),
}

/// Memory + persistent cache with LRU, TTL and pinning.
#[derive(Debug)]
pub struct TwoTierCache {
    memory: Mutex<MemoryTier>,
    writer: Option<mpsc::UnboundedSender<PersistOp>>,
    clock: Arc<dyn Clock>,
    settings: CacheSettings,
    cache_only: AtomicBool,
    counters: Arc<CacheCounters>,
}

impl TwoTierCache {
    /// Opens the persistent tier described by `settings` and starts its
    /// writer task. Must be called inside a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Database`] if the database cannot be opened.
    #[instrument(skip(settings, clock), fields(path = ?settings.path))]
    pub async fn open(settings: CacheSettings, clock: Arc<dyn Clock>) -> Result<Self, CacheError> {
        let db = match &settings.path {
            Some(path) => Database::new(path).await?,
            None => Database::new_in_memory().await?,
        };
        let tier = PersistentTier::new(db, settings.disk_max_items, settings.disk_max_bytes);
        let counters = Arc::new(CacheCounters::default());

        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_writer(tier, rx, Arc::clone(&counters)));
        info!("cache opened");

        Ok(Self {
            memory: Mutex::new(MemoryTier::new(
                settings.memory_max_items,
                settings.memory_max_bytes,
            )),
            writer: Some(tx),
            clock,
            settings,
            cache_only: AtomicBool::new(false),
            counters,
        })
    }

    /// Creates a cache without a persistent tier.
    #[must_use]
    pub fn memory_only(settings: CacheSettings, clock: Arc<dyn Clock>) -> Self {
        Self {
            memory: Mutex::new(MemoryTier::new(
                settings.memory_max_items,
                settings.memory_max_bytes,
            )),
            writer: None,
            clock,
            settings,
            cache_only: AtomicBool::new(false),
            counters: Arc::new(CacheCounters::default()),
        }
    }

    /// Returns `true` if entries are also persisted.
    #[must_use]
    pub fn is_persistent(&self) -> bool {
        self.writer.is_some()
    }

    /// Settings the cache was built with.
    #[must_use]
    pub fn settings(&self) -> &CacheSettings {
        &self.settings
    }

    /// Turns cache-only mode on or off.
    ///
    /// In cache-only mode every stored entry is served, expired or not, and
    /// callers treat a miss as terminal.
    pub fn set_cache_only(&self, enabled: bool) {
        self.cache_only.store(enabled, Ordering::SeqCst);
        info!(enabled, "cache-only mode changed");
    }

    /// Returns `true` in cache-only mode.
    #[must_use]
    pub fn is_cache_only(&self) -> bool {
        self.cache_only.load(Ordering::SeqCst)
    }

    /// Looks up `key`, memory first, then disk.
    ///
    /// A disk hit is promoted to memory. Outside cache-only mode an expired
    /// entry is deleted from both tiers and reported as a miss.
    #[instrument(level = "debug", skip(self))]
    pub async fn get(&self, key: &str) -> CacheLookup {
        let now = self.clock.system_time();
        let serve_stale = self.is_cache_only();

        let cached = self.memory_lock().get(key, now);
        if let Some(entry) = cached {
            if entry.is_expired(now) && !serve_stale {
                self.drop_expired(key);
                return CacheLookup::Miss;
            }
            CacheCounters::bump(&self.counters.memory_hits);
            return CacheLookup::Hit(entry);
        }

        let loaded = self
            .persistent(|reply| PersistOp::Load {
                key: key.to_string(),
                reply,
            })
            .await
            .flatten();

        let Some(mut entry) = loaded else {
            CacheCounters::bump(&self.counters.misses);
            return CacheLookup::Miss;
        };

        if entry.is_expired(now) && !serve_stale {
            self.drop_expired(key);
            return CacheLookup::Miss;
        }

        entry.last_access = now;
        self.admit(entry.clone());
        self.enqueue(PersistOp::Touch {
            key: key.to_string(),
            at: now,
        });
        CacheCounters::bump(&self.counters.persistent_hits);
        debug!("promoted persistent hit to memory");
        CacheLookup::Hit(entry)
    }

    /// Stores `payload` under `key`.
    ///
    /// The memory tier is updated before returning; the persistent write is
    /// queued behind earlier operations.
    pub fn put(&self, key: &str, payload: CachePayload, options: PutOptions) {
        let ttl = options.ttl.unwrap_or(match options.outcome {
            Outcome::Positive => self.settings.positive_ttl,
            Outcome::Negative => self.settings.negative_ttl,
        });
        let entry = CacheEntry::new(
            key,
            payload,
            options.outcome,
            ttl,
            options.pinned,
            self.clock.system_time(),
        );
        debug!(key, outcome = %entry.outcome, size = entry.size_bytes, "cache put");

        CacheCounters::bump(&self.counters.puts);
        self.admit(entry.clone());
        self.enqueue(PersistOp::Store(entry));
    }

    /// Pins `key` in both tiers. Returns `false` if neither tier has it.
    pub async fn pin(&self, key: &str) -> bool {
        self.set_pinned(key, true).await
    }

    /// Unpins `key`, returning it to normal eviction and expiry.
    pub async fn unpin(&self, key: &str) -> bool {
        self.set_pinned(key, false).await
    }

    /// Deletes `key` from both tiers. Returns `true` if either had it.
    pub async fn remove(&self, key: &str) -> bool {
        let in_memory = self.memory_lock().remove(key).is_some();
        let on_disk = self
            .persistent(|reply| PersistOp::Remove {
                key: key.to_string(),
                reply,
            })
            .await
            .unwrap_or(false);
        in_memory || on_disk
    }

    /// Drops every entry, pinned ones included, from both tiers.
    #[instrument(skip(self))]
    pub async fn clear(&self) {
        self.memory_lock().clear();
        if let Some(rows) = self.persistent(PersistOp::Clear).await {
            info!(rows, "cache cleared");
        }
    }

    /// Deletes expired non-pinned entries from both tiers.
    #[instrument(skip(self))]
    pub async fn purge_expired(&self) -> PurgeSummary {
        let now = self.clock.system_time();
        let memory = self.memory_lock().purge_expired(now);
        let persistent = self
            .persistent(|reply| PersistOp::PurgeExpired { now, reply })
            .await
            .unwrap_or(0);
        debug!(memory, persistent, "purged expired entries");
        PurgeSummary { memory, persistent }
    }

    /// Waits until every queued persistent operation has been applied.
    pub async fn flush(&self) {
        let Some(writer) = &self.writer else {
            return;
        };
        let (tx, rx) = oneshot::channel();
        if writer.send(PersistOp::Flush(tx)).is_ok() {
            let _ = rx.await;
        }
    }

    /// Returns occupancy and activity counters.
    pub async fn stats(&self) -> CacheStats {
        let memory = self.memory_lock().usage();
        let persistent = self.persistent(PersistOp::Usage).await;
        let c = &self.counters;
        CacheStats {
            memory,
            persistent,
            memory_hits: c.memory_hits.load(Ordering::SeqCst),
            persistent_hits: c.persistent_hits.load(Ordering::SeqCst),
            misses: c.misses.load(Ordering::SeqCst),
            expired: c.expired.load(Ordering::SeqCst),
            puts: c.puts.load(Ordering::SeqCst),
            memory_evictions: c.memory_evictions.load(Ordering::SeqCst),
            persistent_errors: c.persistent_errors.load(Ordering::SeqCst),
            cache_only: self.is_cache_only(),
        }
    }

    /// Renders [`stats`](Self::stats) as a short report.
    pub async fn formatted_statistics(&self) -> String {
        let s = self.stats().await;
        let mut out = String::new();
        let _ = writeln!(
            out,
            "Cache: {} memory hits, {} disk hits, {} misses ({:.1}% hit ratio), {} expired",
            s.memory_hits,
            s.persistent_hits,
            s.misses,
            s.hit_ratio() * 100.0,
            s.expired
        );
        let _ = writeln!(
            out,
            "  memory: {} items ({} pinned), {} bytes, {} evictions",
            s.memory.items, s.memory.pinned_items, s.memory.bytes, s.memory_evictions
        );
        match s.persistent {
            Some(disk) => {
                let _ = write!(
                    out,
                    "  disk: {} items ({} pinned), {} bytes, {} errors",
                    disk.items, disk.pinned_items, disk.bytes, s.persistent_errors
                );
            }
            None => {
                let _ = write!(out, "  disk: unavailable");
            }
        }
        if s.cache_only {
            out.push_str("\n  cache-only mode");
        }
        out
    }

    /// Zeroes activity counters.
    pub fn reset_metrics(&self) {
        let c = &self.counters;
        for counter in [
            &c.memory_hits,
            &c.persistent_hits,
            &c.misses,
            &c.expired,
            &c.puts,
            &c.memory_evictions,
            &c.persistent_errors,
        ] {
            counter.store(0, Ordering::SeqCst);
        }
    }

    async fn set_pinned(&self, key: &str, pinned: bool) -> bool {
        let (in_memory, evicted) = self.memory_lock().set_pinned(key, pinned);
        self.count_evictions(&evicted);
        let on_disk = self
            .persistent(|reply| PersistOp::SetPinned {
                key: key.to_string(),
                pinned,
                reply,
            })
            .await
            .unwrap_or(false);
        in_memory || on_disk
    }

    fn admit(&self, entry: CacheEntry) {
        let evicted = self.memory_lock().insert(entry);
        self.count_evictions(&evicted);
    }

    fn count_evictions(&self, evicted: &[String]) {
        if !evicted.is_empty() {
            self.counters
                .memory_evictions
                .fetch_add(evicted.len() as u64, Ordering::SeqCst);
            debug!(count = evicted.len(), "memory tier evicted entries");
        }
    }

    fn drop_expired(&self, key: &str) {
        self.memory_lock().remove(key);
        if let Some(writer) = &self.writer {
            let (reply, _) = oneshot::channel();
            let _ = writer.send(PersistOp::Remove {
                key: key.to_string(),
                reply,
            });
        }
        CacheCounters::bump(&self.counters.expired);
        CacheCounters::bump(&self.counters.misses);
        debug!(key, "expired entry dropped");
    }

    fn enqueue(&self, op: PersistOp) {
        if let Some(writer) = &self.writer
            && writer.send(op).is_err()
        {
            CacheCounters::bump(&self.counters.persistent_errors);
            warn!(error = %CacheError::WriterUnavailable, "persistent write dropped");
        }
    }

    /// Runs a persistent operation and waits for its result.
    ///
    /// Returns `None` for memory-only caches and on failure (logged).
    async fn persistent<T>(&self, make: impl FnOnce(Reply<T>) -> PersistOp) -> Option<T> {
        let writer = self.writer.as_ref()?;
        let (tx, rx) = oneshot::channel();
        let result = if writer.send(make(tx)).is_err() {
            Err(CacheError::WriterUnavailable)
        } else {
            rx.await.unwrap_or(Err(CacheError::WriterUnavailable))
        };
        match result {
            Ok(value) => Some(value),
            Err(error) => {
                CacheCounters::bump(&self.counters.persistent_errors);
                warn!(%error, "persistent cache unavailable, serving from memory");
                None
            }
        }
    }

    fn memory_lock(&self) -> MutexGuard<'_, MemoryTier> {
        self.memory.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Applies persistent operations one at a time, in arrival order.
async fn run_writer(
    tier: PersistentTier,
    mut rx: mpsc::UnboundedReceiver<PersistOp>,
    counters: Arc<CacheCounters>,
) {
    while let Some(op) = rx.recv().await {
        match op {
            PersistOp::Store(entry) => {
                if let Err(error) = tier.store(&entry).await {
                    CacheCounters::bump(&counters.persistent_errors);
                    warn!(key = %entry.key, %error, "persistent cache write failed");
                }
            }
            PersistOp::Touch { key, at } => {
                if let Err(error) = tier.touch(&key, at).await {
                    CacheCounters::bump(&counters.persistent_errors);
                    warn!(%key, %error, "persistent cache touch failed");
                }
            }
            PersistOp::Remove { key, reply } => {
                let _ = reply.send(tier.remove(&key).await);
            }
            PersistOp::SetPinned { key, pinned, reply } => {
                let _ = reply.send(tier.set_pinned(&key, pinned).await);
            }
            PersistOp::Clear(reply) => {
                let _ = reply.send(tier.clear().await);
            }
            PersistOp::PurgeExpired { now, reply } => {
                let _ = reply.send(tier.purge_expired(now).await);
            }
            PersistOp::Load { key, reply } => {
                let _ = reply.send(tier.load(&key).await);
            }
            PersistOp::Usage(reply) => {
                let _ = reply.send(tier.usage().await);
            }
            PersistOp::Flush(reply) => {
                let _ = reply.send(());
            }
        }
    }
    debug!("persistent cache writer stopped");
}
