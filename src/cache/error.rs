//! Error types for cache operations.

use thiserror::Error;

use crate::db::DbError;

/// Errors from the persistent cache tier.
///
/// The two-tier cache never surfaces these to lookups; they are logged and
/// the cache degrades to memory-only behaviour.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Opening the backing database failed.
    #[error(transparent)]
    Database(#[from] DbError),

    /// A query against the backing database failed.
    #[error("cache query failed: {0}")]
    Query(#[from] sqlx::Error),

    /// A stored row could not be decoded.
    #[error("corrupt cache entry {key}: {reason}")]
    CorruptPayload {
        /// Key of the offending row.
        key: String,
        /// What was wrong with it.
        reason: String,
    },

    /// The background writer has stopped.
    #[error("persistent cache writer is not running")]
    WriterUnavailable,
}

impl CacheError {
    /// Creates a corrupt-payload error.
    pub fn corrupt(key: impl Into<String>, reason: impl ToString) -> Self {
        Self::CorruptPayload {
            key: key.into(),
            reason: reason.to_string(),
        }
    }
}
