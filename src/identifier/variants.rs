//! Ordered search variants built from both normalization levels.

use std::collections::HashSet;

use serde::Serialize;
use tracing::{debug, instrument};

use super::error::NormalizationError;
use super::normalize::{NormalizationLevel, normalize};

/// Candidate identifiers for one raw input, in lookup order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchStrategy {
    /// The input exactly as supplied.
    pub original: String,
    /// Standard-level normalized form.
    pub primary: Option<String>,
    /// Strict-level normalized form. May equal `primary`.
    pub fallback: Option<String>,
    /// All candidates, duplicates removed, discovery order kept.
    pub variants: Vec<String>,
    /// Why normalization failed when `variants` is empty.
    pub errors: Vec<NormalizationError>,
}

impl SearchStrategy {
    /// Returns `true` when no candidate identifier could be produced.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.variants.is_empty()
    }
}

/// Returns deduplicated lookup candidates for `input`.
///
/// Order: standard result, strict result, standard alternatives, strict
/// alternatives. An unnormalizable input yields an empty list.
///
/// # Example
///
/// ```
/// use archive_core::identifier::search_variants;
///
/// assert_eq!(search_variants("Mario"), vec!["Mario", "mario"]);
/// assert!(search_variants("ab").is_empty());
/// ```
#[must_use]
pub fn search_variants(input: &str) -> Vec<String> {
    search_strategy(input).variants
}

/// Builds the full [`SearchStrategy`] for `input`.
///
/// # Example
///
/// ```
/// use archive_core::identifier::search_strategy;
///
/// let strategy = search_strategy("Super Mario");
/// assert_eq!(strategy.primary.as_deref(), Some("Super-Mario"));
/// assert_eq!(strategy.fallback.as_deref(), Some("super-mario"));
/// ```
#[must_use]
#[instrument(level = "debug", skip(input), fields(input_len = input.len()))]
pub fn search_strategy(input: &str) -> SearchStrategy {
    let standard = normalize(input, NormalizationLevel::Standard);
    let strict = normalize(input, NormalizationLevel::Strict);

    let candidates = standard
        .normalized
        .iter()
        .chain(strict.normalized.iter())
        .chain(standard.alternatives.iter())
        .chain(strict.alternatives.iter());

    let mut seen = HashSet::new();
    let mut variants = Vec::new();
    for candidate in candidates {
        if seen.insert(candidate.as_str()) {
            variants.push(candidate.clone());
        }
    }

    let errors = if variants.is_empty() {
        standard.errors.clone()
    } else {
        Vec::new()
    };

    debug!(variant_count = variants.len(), "built search strategy");

    SearchStrategy {
        original: input.to_string(),
        primary: standard.normalized,
        fallback: strict.normalized,
        variants,
        errors,
    }
}
