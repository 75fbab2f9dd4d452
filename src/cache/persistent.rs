//! `SQLite`-backed persistent cache tier.
//!
//! Bounded by item count and total bytes of non-pinned rows; pressure evicts
//! the oldest rows by insertion time.

use std::time::{Duration, SystemTime};

use serde::Serialize;
use sqlx::FromRow;
use tracing::{debug, instrument};

use super::entry::{CacheEntry, CachePayload, Outcome, from_millis, to_millis};
use super::error::CacheError;
use crate::db::Database;

/// Occupancy of the persistent tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct PersistentUsage {
    /// All rows, pinned included.
    pub items: u64,
    /// Bytes of all rows, pinned included.
    pub bytes: u64,
    /// Pinned rows.
    pub pinned_items: u64,
}

#[derive(Debug, FromRow)]
struct CacheRow {
    key: String,
    payload_kind: String,
    payload: Vec<u8>,
    outcome: String,
    inserted_at_ms: i64,
    last_access_ms: i64,
    ttl_ms: i64,
    size_bytes: i64,
    pinned: bool,
}

impl TryFrom<CacheRow> for CacheEntry {
    type Error = CacheError;

    fn try_from(row: CacheRow) -> Result<Self, Self::Error> {
        let outcome: Outcome = row
            .outcome
            .parse()
            .map_err(|e: String| CacheError::corrupt(&row.key, e))?;
        let payload = CachePayload::from_blob(&row.key, &row.payload_kind, row.payload)?;
        Ok(Self {
            key: row.key,
            payload,
            outcome,
            inserted_at: from_millis(row.inserted_at_ms),
            last_access: from_millis(row.last_access_ms),
            ttl: Duration::from_millis(u64::try_from(row.ttl_ms).unwrap_or(0)),
            size_bytes: u64::try_from(row.size_bytes).unwrap_or(0),
            pinned: row.pinned,
        })
    }
}

/// Persistent tier over a [`Database`].
#[derive(Debug, Clone)]
pub struct PersistentTier {
    db: Database,
    max_items: u64,
    max_bytes: u64,
}

impl PersistentTier {
    /// Wraps `db`, bounding non-pinned rows by `max_items` and `max_bytes`.
    #[must_use]
    pub fn new(db: Database, max_items: u64, max_bytes: u64) -> Self {
        Self {
            db,
            max_items: max_items.max(1),
            max_bytes,
        }
    }

    /// Loads the row for `key`.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError`] if the query fails or the row is corrupt.
    #[instrument(level = "debug", skip(self))]
    pub async fn load(&self, key: &str) -> Result<Option<CacheEntry>, CacheError> {
        let row = sqlx::query_as::<_, CacheRow>(
            r"SELECT key, payload_kind, payload, outcome, inserted_at_ms, last_access_ms,
                     ttl_ms, size_bytes, pinned
              FROM cache_entries WHERE key = ?",
        )
        .bind(key)
        .fetch_optional(self.db.pool())
        .await?;

        row.map(CacheEntry::try_from).transpose()
    }

    /// Inserts or replaces `entry`, then evicts down to the bounds.
    ///
    /// A row that was pinned stays pinned. Returns how many rows were evicted.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Query`] if a statement fails.
    #[instrument(level = "debug", skip(self, entry), fields(key = %entry.key))]
    pub async fn store(&self, entry: &CacheEntry) -> Result<u64, CacheError> {
        sqlx::query(
            r"INSERT INTO cache_entries
                (key, payload_kind, payload, outcome, inserted_at_ms, last_access_ms,
                 ttl_ms, size_bytes, pinned)
              VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
              ON CONFLICT (key) DO UPDATE SET
                payload_kind = excluded.payload_kind,
                payload = excluded.payload,
                outcome = excluded.outcome,
                inserted_at_ms = excluded.inserted_at_ms,
                last_access_ms = excluded.last_access_ms,
                ttl_ms = excluded.ttl_ms,
                size_bytes = excluded.size_bytes,
                pinned = MAX(cache_entries.pinned, excluded.pinned)",
        )
        .bind(&entry.key)
        .bind(entry.payload.kind())
        .bind(entry.payload.to_blob())
        .bind(entry.outcome.as_str())
        .bind(to_millis(entry.inserted_at))
        .bind(to_millis(entry.last_access))
        .bind(i64::try_from(entry.ttl.as_millis()).unwrap_or(i64::MAX))
        .bind(i64::try_from(entry.size_bytes).unwrap_or(i64::MAX))
        .bind(entry.pinned)
        .execute(self.db.pool())
        .await?;

        self.evict_over_bounds().await
    }

    /// Records a read of `key`.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Query`] if the update fails.
    pub async fn touch(&self, key: &str, at: SystemTime) -> Result<(), CacheError> {
        sqlx::query("UPDATE cache_entries SET last_access_ms = ? WHERE key = ?")
            .bind(to_millis(at))
            .bind(key)
            .execute(self.db.pool())
            .await?;
        Ok(())
    }

    /// Deletes `key`. Returns `true` if a row was removed.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Query`] if the delete fails.
    pub async fn remove(&self, key: &str) -> Result<bool, CacheError> {
        let result = sqlx::query("DELETE FROM cache_entries WHERE key = ?")
            .bind(key)
            .execute(self.db.pool())
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Sets the pin flag of `key`. Returns `true` if the row exists.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Query`] if a statement fails.
    pub async fn set_pinned(&self, key: &str, pinned: bool) -> Result<bool, CacheError> {
        let result = sqlx::query("UPDATE cache_entries SET pinned = ? WHERE key = ?")
            .bind(pinned)
            .bind(key)
            .execute(self.db.pool())
            .await?;
        if !pinned {
            self.evict_over_bounds().await?;
        }
        Ok(result.rows_affected() > 0)
    }

    /// Deletes every row. Returns how many were removed.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Query`] if the delete fails.
    #[instrument(level = "debug", skip(self))]
    pub async fn clear(&self) -> Result<u64, CacheError> {
        let result = sqlx::query("DELETE FROM cache_entries")
            .execute(self.db.pool())
            .await?;
        Ok(result.rows_affected())
    }

    /// Deletes non-pinned rows whose TTL has run out at `now`.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Query`] if the delete fails.
    pub async fn purge_expired(&self, now: SystemTime) -> Result<u64, CacheError> {
        let result = sqlx::query(
            "DELETE FROM cache_entries WHERE pinned = 0 AND inserted_at_ms + ttl_ms <= ?",
        )
        .bind(to_millis(now))
        .execute(self.db.pool())
        .await?;
        Ok(result.rows_affected())
    }

    /// Current occupancy.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Query`] if the query fails.
    pub async fn usage(&self) -> Result<PersistentUsage, CacheError> {
        let (items, bytes, pinned): (i64, i64, i64) = sqlx::query_as(
            "SELECT COUNT(*), COALESCE(SUM(size_bytes), 0), COALESCE(SUM(pinned), 0) \
             FROM cache_entries",
        )
        .fetch_one(self.db.pool())
        .await?;
        Ok(PersistentUsage {
            items: u64::try_from(items).unwrap_or(0),
            bytes: u64::try_from(bytes).unwrap_or(0),
            pinned_items: u64::try_from(pinned).unwrap_or(0),
        })
    }

    async fn evict_over_bounds(&self) -> Result<u64, CacheError> {
        let mut evicted = 0;
        loop {
            let (count, bytes): (i64, i64) = sqlx::query_as(
                "SELECT COUNT(*), COALESCE(SUM(size_bytes), 0) FROM cache_entries WHERE pinned = 0",
            )
            .fetch_one(self.db.pool())
            .await?;

            let count = u64::try_from(count).unwrap_or(0);
            let bytes = u64::try_from(bytes).unwrap_or(0);
            if count <= self.max_items && bytes <= self.max_bytes {
                break;
            }

            let removed = sqlx::query(
                r"DELETE FROM cache_entries WHERE key = (
                    SELECT key FROM cache_entries WHERE pinned = 0
                    ORDER BY inserted_at_ms ASC, key ASC LIMIT 1
                  )",
            )
            .execute(self.db.pool())
            .await?;
            if removed.rows_affected() == 0 {
                break;
            }
            evicted += 1;
        }
        if evicted > 0 {
            debug!(evicted, "persistent tier evicted oldest entries");
        }
        Ok(evicted)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use bytes::Bytes;

    use super::*;

    async fn tier(max_items: u64, max_bytes: u64) -> PersistentTier {
        let db = Database::new_in_memory().await.unwrap();
        PersistentTier::new(db, max_items, max_bytes)
    }

    fn entry(key: &str, size: usize, pinned: bool, at: SystemTime) -> CacheEntry {
        CacheEntry::new(
            key,
            CachePayload::Bytes(Bytes::from(vec![1_u8; size])),
            Outcome::Positive,
            Duration::from_secs(60),
            pinned,
            at,
        )
    }

    #[tokio::test]
    async fn test_store_and_load_round_trip() {
        let tier = tier(10, 1_000).await;
        let now = from_millis(to_millis(SystemTime::now()));
        let original = CacheEntry::new(
            "metadata:mario",
            CachePayload::Metadata(serde_json::json!({"metadata": {"identifier": "mario"}})),
            Outcome::Positive,
            Duration::from_secs(86_400),
            false,
            now,
        );

        tier.store(&original).await.unwrap();
        let loaded = tier.load("metadata:mario").await.unwrap().unwrap();

        assert_eq!(loaded, original);
        assert!(tier.load("metadata:luigi").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_eviction_removes_oldest_non_pinned() {
        let tier = tier(2, 1_000).await;
        let base = SystemTime::now();
        tier.store(&entry("pinned", 1, true, base)).await.unwrap();
        tier.store(&entry("old", 1, false, base + Duration::from_secs(1)))
            .await
            .unwrap();
        tier.store(&entry("mid", 1, false, base + Duration::from_secs(2)))
            .await
            .unwrap();
        let evicted = tier
            .store(&entry("new", 1, false, base + Duration::from_secs(3)))
            .await
            .unwrap();

        assert_eq!(evicted, 1);
        assert!(tier.load("old").await.unwrap().is_none());
        assert!(tier.load("pinned").await.unwrap().is_some());
        assert_eq!(tier.usage().await.unwrap().items, 3);
    }

    #[tokio::test]
    async fn test_byte_bound_eviction() {
        let tier = tier(100, 10).await;
        let base = SystemTime::now();
        tier.store(&entry("a", 6, false, base)).await.unwrap();
        tier.store(&entry("b", 6, false, base + Duration::from_secs(1)))
            .await
            .unwrap();

        assert!(tier.load("a").await.unwrap().is_none());
        assert_eq!(tier.usage().await.unwrap().bytes, 6);
    }

    #[tokio::test]
    async fn test_pin_remove_and_clear() {
        let tier = tier(10, 1_000).await;
        let now = SystemTime::now();
        tier.store(&entry("a", 1, false, now)).await.unwrap();
        tier.store(&entry("b", 1, false, now)).await.unwrap();

        assert!(tier.set_pinned("a", true).await.unwrap());
        assert!(!tier.set_pinned("zzz", true).await.unwrap());
        assert_eq!(tier.usage().await.unwrap().pinned_items, 1);

        assert!(tier.remove("b").await.unwrap());
        assert!(!tier.remove("b").await.unwrap());

        assert_eq!(tier.clear().await.unwrap(), 1);
        assert_eq!(tier.usage().await.unwrap(), PersistentUsage::default());
    }

    #[tokio::test]
    async fn test_store_over_pinned_row_keeps_pin() {
        let tier = tier(10, 1_000).await;
        let now = SystemTime::now();
        tier.store(&entry("a", 1, true, now)).await.unwrap();
        tier.store(&entry("a", 5, false, now)).await.unwrap();

        let loaded = tier.load("a").await.unwrap().unwrap();
        assert!(loaded.pinned);
        assert_eq!(loaded.size_bytes, 5);

        assert!(tier.set_pinned("a", false).await.unwrap());
        tier.store(&entry("a", 5, false, now)).await.unwrap();
        assert!(!tier.load("a").await.unwrap().unwrap().pinned);
    }

    #[tokio::test]
    async fn test_purge_expired_keeps_pinned_and_fresh() {
        let tier = tier(10, 1_000).await;
        let now = SystemTime::now();
        tier.store(&entry("stale", 1, false, now)).await.unwrap();
        tier.store(&entry("pinned", 1, true, now)).await.unwrap();
        tier.store(&entry("fresh", 1, false, now + Duration::from_secs(100)))
            .await
            .unwrap();

        let purged = tier
            .purge_expired(now + Duration::from_secs(61))
            .await
            .unwrap();
        assert_eq!(purged, 1);
        assert!(tier.load("pinned").await.unwrap().is_some());
        assert!(tier.load("fresh").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_corrupt_row_is_reported() {
        let tier = tier(10, 1_000).await;
        sqlx::query(
            "INSERT INTO cache_entries \
             (key, payload_kind, payload, outcome, inserted_at_ms, last_access_ms, ttl_ms, size_bytes) \
             VALUES ('bad', 'metadata', x'7b7b', 'positive', 0, 0, 1000, 2)",
        )
        .execute(tier.db.pool())
        .await
        .unwrap();

        let error = tier.load("bad").await.unwrap_err();
        assert!(matches!(error, CacheError::CorruptPayload { .. }));
    }
}
