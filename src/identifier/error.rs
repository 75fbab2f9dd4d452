//! Error types for identifier normalization.

use serde::Serialize;
use thiserror::Error;

/// Reasons a raw input cannot become a valid identifier.
///
/// These never reach the network layer: an input that fails at both
/// normalization levels yields an empty variant list.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NormalizationError {
    /// Nothing remained after trimming whitespace.
    #[error("input is empty")]
    EmptyInput,

    /// Cleanup left fewer characters than the archive accepts.
    #[error("identifier too short ({length} chars, min {min})")]
    TooShort {
        /// Length after cleanup.
        length: usize,
        /// Minimum accepted length.
        min: usize,
    },

    /// No letters or digits survived the charset filter.
    #[error("input has no usable alphanumeric content")]
    Unrecoverable,
}
