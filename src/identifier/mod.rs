//! Identifier normalization and search-variant generation.
//!
//! User-entered text rarely matches an archive identifier exactly. This module
//! turns it into an ordered list of candidate identifiers ("variants") so the
//! lookup layer can try the most likely spelling first.
//!
//! - [`normalize`] - run the cleanup pipeline at one [`NormalizationLevel`]
//! - [`search_variants`] - deduplicated candidates, standard level first
//! - [`search_strategy`] - the same candidates plus primary/fallback picks
//!
//! Everything here is pure: no I/O, no clocks, no randomness.

mod error;
mod normalize;
mod variants;

pub use error::NormalizationError;
pub use normalize::{
    MAX_IDENTIFIER_LENGTH, MIN_IDENTIFIER_LENGTH, NormalizationChange, NormalizationLevel,
    NormalizationResult, is_separator, is_valid_identifier, normalize,
};
pub use variants::{SearchStrategy, search_strategy, search_variants};
