//! Identifier normalization pipeline.
//!
//! Raw user text (a pasted title, a half-remembered item name, a URL slug) is
//! turned into a candidate archive identifier by a fixed sequence of cleanup
//! steps. The same pipeline runs at two levels:
//!
//! - [`NormalizationLevel::Standard`] keeps the original letter case
//! - [`NormalizationLevel::Strict`] lowercases before anything else
//!
//! Every step that actually changes the text is recorded as a
//! [`NormalizationChange`], which also drives the confidence score.
//!
//! # Example
//!
//! ```
//! use archive_core::identifier::{NormalizationLevel, normalize};
//!
//! let result = normalize("Super Mario", NormalizationLevel::Standard);
//! assert_eq!(result.normalized.as_deref(), Some("Super-Mario"));
//!
//! let strict = normalize("Super Mario", NormalizationLevel::Strict);
//! assert_eq!(strict.normalized.as_deref(), Some("super-mario"));
//! ```

use serde::Serialize;
use tracing::{instrument, trace};

use super::error::NormalizationError;

/// Minimum identifier length accepted by the archive.
pub const MIN_IDENTIFIER_LENGTH: usize = 3;

/// Maximum identifier length accepted by the archive.
pub const MAX_IDENTIFIER_LENGTH: usize = 100;

/// Confidence never drops below this for a successful normalization.
const MIN_CONFIDENCE: f32 = 0.1;

/// Which character set and casing rules the pipeline applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NormalizationLevel {
    /// `[A-Za-z0-9._-]`, case preserved.
    Standard,
    /// `[a-z0-9._-]`, input lowercased first.
    Strict,
}

impl NormalizationLevel {
    /// Returns whether `c` belongs to the identifier charset of this level.
    #[must_use]
    pub fn allows(self, c: char) -> bool {
        match self {
            Self::Standard => c.is_ascii_alphanumeric() || is_separator(c),
            Self::Strict => {
                c.is_ascii_lowercase() || c.is_ascii_digit() || is_separator(c)
            }
        }
    }
}

/// A transformation the pipeline applied to the input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NormalizationChange {
    /// Leading or trailing whitespace was removed.
    Trimmed,
    /// Uppercase letters were lowercased (strict level only).
    Lowercased,
    /// Whitespace runs were replaced with a hyphen.
    WhitespaceReplaced,
    /// Em-dashes, en-dashes and similar punctuation became hyphens.
    DashesNormalized,
    /// Characters outside the level's charset were dropped.
    InvalidCharactersRemoved {
        /// How many characters were dropped.
        count: usize,
    },
    /// Runs of separator characters were collapsed into one hyphen.
    SeparatorsCollapsed,
    /// Separators at either end were removed.
    EdgeSeparatorsTrimmed,
    /// The text was cut down to the maximum identifier length.
    Truncated {
        /// Length before truncation.
        original_length: usize,
    },
}

impl NormalizationChange {
    /// Confidence penalty for this category of change.
    fn penalty(&self) -> f32 {
        match self {
            Self::Trimmed | Self::DashesNormalized | Self::EdgeSeparatorsTrimmed => 0.05,
            Self::Lowercased | Self::WhitespaceReplaced | Self::SeparatorsCollapsed => 0.1,
            Self::InvalidCharactersRemoved { .. } | Self::Truncated { .. } => 0.25,
        }
    }
}

/// Outcome of normalizing one input at one level.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NormalizationResult {
    /// The input exactly as supplied.
    pub original: String,
    /// The normalized identifier, `None` when validation failed.
    pub normalized: Option<String>,
    /// Level the pipeline ran at.
    pub level: NormalizationLevel,
    /// Transformations applied, in pipeline order.
    pub changes: Vec<NormalizationChange>,
    /// Alternative spellings worth trying as lookups.
    pub alternatives: Vec<String>,
    /// Validation failures; empty on success.
    pub errors: Vec<NormalizationError>,
    /// 1.0 when the input was already a valid identifier.
    pub confidence: f32,
}

impl NormalizationResult {
    /// Returns `true` when a normalized identifier was produced.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.normalized.is_some()
    }

    /// Returns the first validation error, if any.
    #[must_use]
    pub fn first_error(&self) -> Option<&NormalizationError> {
        self.errors.first()
    }

    fn failed(
        original: &str,
        level: NormalizationLevel,
        changes: Vec<NormalizationChange>,
        error: NormalizationError,
    ) -> Self {
        trace!(error = %error, "normalization failed");
        Self {
            original: original.to_string(),
            normalized: None,
            level,
            changes,
            alternatives: Vec::new(),
            errors: vec![error],
            confidence: 0.0,
        }
    }
}

/// Normalizes raw text into an archive identifier at the given level.
///
/// Pure and deterministic. Never panics; validation problems are reported in
/// [`NormalizationResult::errors`] with `normalized` left as `None`.
#[must_use]
#[instrument(level = "trace", skip(input), fields(input_len = input.len()))]
pub fn normalize(input: &str, level: NormalizationLevel) -> NormalizationResult {
    let mut changes = Vec::new();

    let trimmed = input.trim();
    if trimmed.len() != input.len() {
        changes.push(NormalizationChange::Trimmed);
    }
    if trimmed.is_empty() {
        return NormalizationResult::failed(input, level, changes, NormalizationError::EmptyInput);
    }

    let mut text = trimmed.to_string();

    if level == NormalizationLevel::Strict {
        let lowered = text.to_lowercase();
        if lowered != text {
            changes.push(NormalizationChange::Lowercased);
            text = lowered;
        }
    }

    let replaced = replace_whitespace_runs(&text);
    if replaced != text {
        changes.push(NormalizationChange::WhitespaceReplaced);
        text = replaced;
    }

    let dashed: String = text
        .chars()
        .map(|c| if is_dash_punctuation(c) { '-' } else { c })
        .collect();
    if dashed != text {
        changes.push(NormalizationChange::DashesNormalized);
        text = dashed;
    }

    let before = text.chars().count();
    let kept: String = text.chars().filter(|c| level.allows(*c)).collect();
    let removed = before - kept.chars().count();
    if removed > 0 {
        changes.push(NormalizationChange::InvalidCharactersRemoved { count: removed });
    }
    text = kept;

    if !text.chars().any(|c| c.is_ascii_alphanumeric()) {
        return NormalizationResult::failed(
            input,
            level,
            changes,
            NormalizationError::Unrecoverable,
        );
    }

    let collapsed = collapse_separator_runs(&text);
    if collapsed != text {
        changes.push(NormalizationChange::SeparatorsCollapsed);
        text = collapsed;
    }

    let edged = text.trim_matches(is_separator);
    if edged.len() != text.len() {
        changes.push(NormalizationChange::EdgeSeparatorsTrimmed);
        text = edged.to_string();
    }

    // Only ASCII survives the charset filter, so byte offsets are char offsets.
    if text.len() > MAX_IDENTIFIER_LENGTH {
        let original_length = text.len();
        text.truncate(MAX_IDENTIFIER_LENGTH);
        let cut = text.trim_end_matches(is_separator).len();
        text.truncate(cut);
        changes.push(NormalizationChange::Truncated { original_length });
    }

    if text.len() < MIN_IDENTIFIER_LENGTH {
        return NormalizationResult::failed(
            input,
            level,
            changes,
            NormalizationError::TooShort {
                length: text.len(),
                min: MIN_IDENTIFIER_LENGTH,
            },
        );
    }

    let confidence = confidence_for(&changes);
    let alternatives = alternative_forms(&text);

    NormalizationResult {
        original: input.to_string(),
        normalized: Some(text),
        level,
        changes,
        alternatives,
        errors: Vec::new(),
        confidence,
    }
}

/// Returns whether `candidate` already satisfies the identifier grammar.
#[must_use]
pub fn is_valid_identifier(candidate: &str, level: NormalizationLevel) -> bool {
    let length_ok = (MIN_IDENTIFIER_LENGTH..=MAX_IDENTIFIER_LENGTH).contains(&candidate.len());
    let charset_ok = candidate.chars().all(|c| level.allows(c));
    let edges_ok = !candidate.starts_with(is_separator) && !candidate.ends_with(is_separator);
    let runs_ok = !candidate
        .as_bytes()
        .windows(2)
        .any(|pair| is_separator(pair[0] as char) && is_separator(pair[1] as char));
    length_ok && charset_ok && edges_ok && runs_ok
}

/// Separator characters of the identifier grammar.
#[must_use]
pub fn is_separator(c: char) -> bool {
    matches!(c, '-' | '_' | '.')
}

fn is_dash_punctuation(c: char) -> bool {
    matches!(
        c,
        '\u{2010}' | '\u{2011}' | '\u{2012}' | '\u{2013}' | '\u{2014}' | '\u{2015}' | '\u{2212}'
    )
}

fn replace_whitespace_runs(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_run = false;
    for c in text.chars() {
        if c.is_whitespace() {
            if !in_run {
                out.push('-');
            }
            in_run = true;
        } else {
            out.push(c);
            in_run = false;
        }
    }
    out
}

/// Runs of two or more separators become a single hyphen; lone separators stay.
fn collapse_separator_runs(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut run = String::new();
    for c in text.chars() {
        if is_separator(c) {
            run.push(c);
            continue;
        }
        flush_separator_run(&mut out, &mut run);
        out.push(c);
    }
    flush_separator_run(&mut out, &mut run);
    out
}

fn flush_separator_run(out: &mut String, run: &mut String) {
    match run.len() {
        0 => {}
        1 => out.push_str(run),
        _ => out.push('-'),
    }
    run.clear();
}

fn confidence_for(changes: &[NormalizationChange]) -> f32 {
    let penalty: f32 = changes.iter().map(NormalizationChange::penalty).sum();
    (1.0 - penalty).max(MIN_CONFIDENCE)
}

fn alternative_forms(normalized: &str) -> Vec<String> {
    let underscored = normalized.replace('-', "_");
    let concatenated: String = normalized.chars().filter(|c| !matches!(c, '-' | '_')).collect();

    let mut alternatives = Vec::new();
    for candidate in [underscored, concatenated] {
        if candidate != normalized
            && candidate.len() >= MIN_IDENTIFIER_LENGTH
            && !alternatives.contains(&candidate)
        {
            alternatives.push(candidate);
        }
    }
    alternatives
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    // ==================== Pipeline Tests ====================

    #[test]
    fn test_normalize_plain_identifier_is_unchanged() {
        let result = normalize("Mario", NormalizationLevel::Standard);
        assert_eq!(result.normalized.as_deref(), Some("Mario"));
        assert!(result.changes.is_empty());
        assert!((result.confidence - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_normalize_strict_lowercases() {
        let result = normalize("Mario", NormalizationLevel::Strict);
        assert_eq!(result.normalized.as_deref(), Some("mario"));
        assert_eq!(result.changes, vec![NormalizationChange::Lowercased]);
    }

    #[test]
    fn test_normalize_whitespace_runs_become_single_hyphen() {
        let result = normalize("Super   Mario\tWorld", NormalizationLevel::Standard);
        assert_eq!(result.normalized.as_deref(), Some("Super-Mario-World"));
        assert!(result.changes.contains(&NormalizationChange::WhitespaceReplaced));
    }

    #[test]
    fn test_normalize_trims_outer_whitespace() {
        let result = normalize("  mario64  ", NormalizationLevel::Standard);
        assert_eq!(result.normalized.as_deref(), Some("mario64"));
        assert_eq!(result.changes, vec![NormalizationChange::Trimmed]);
    }

    #[test]
    fn test_normalize_em_and_en_dashes() {
        let result = normalize("mario\u{2014}bros\u{2013}64", NormalizationLevel::Strict);
        assert_eq!(result.normalized.as_deref(), Some("mario-bros-64"));
        assert!(result.changes.contains(&NormalizationChange::DashesNormalized));
    }

    #[test]
    fn test_normalize_strips_invalid_characters() {
        let result = normalize("mario!bros?", NormalizationLevel::Standard);
        assert_eq!(result.normalized.as_deref(), Some("mariobros"));
        assert!(
            result
                .changes
                .contains(&NormalizationChange::InvalidCharactersRemoved { count: 2 })
        );
    }

    #[test]
    fn test_normalize_collapses_consecutive_separators() {
        let result = normalize("mario--bros__64", NormalizationLevel::Strict);
        assert_eq!(result.normalized.as_deref(), Some("mario-bros-64"));
        assert!(result.changes.contains(&NormalizationChange::SeparatorsCollapsed));
    }

    #[test]
    fn test_normalize_keeps_single_underscore_and_dot() {
        let result = normalize("mario_bros.v2", NormalizationLevel::Strict);
        assert_eq!(result.normalized.as_deref(), Some("mario_bros.v2"));
        assert!(result.changes.is_empty());
    }

    #[test]
    fn test_normalize_trims_edge_separators() {
        let result = normalize("--mario--", NormalizationLevel::Standard);
        assert_eq!(result.normalized.as_deref(), Some("mario"));
        assert!(
            result
                .changes
                .contains(&NormalizationChange::EdgeSeparatorsTrimmed)
        );
    }

    #[test]
    fn test_normalize_truncates_at_max_length() {
        let long = "a".repeat(150);
        let result = normalize(&long, NormalizationLevel::Standard);
        assert_eq!(result.normalized.as_ref().unwrap().len(), MAX_IDENTIFIER_LENGTH);
        assert!(
            result
                .changes
                .contains(&NormalizationChange::Truncated { original_length: 150 })
        );
    }

    #[test]
    fn test_normalize_truncation_does_not_leave_trailing_separator() {
        let input = format!("{}-{}", "a".repeat(99), "b".repeat(20));
        let result = normalize(&input, NormalizationLevel::Standard);
        let normalized = result.normalized.unwrap();
        assert_eq!(normalized.len(), 99);
        assert!(!normalized.ends_with('-'));
    }

    // ==================== Failure Tests ====================

    #[test]
    fn test_normalize_empty_input() {
        let result = normalize("   ", NormalizationLevel::Standard);
        assert!(result.normalized.is_none());
        assert_eq!(result.first_error(), Some(&NormalizationError::EmptyInput));
    }

    #[test]
    fn test_normalize_too_short_at_both_levels() {
        for level in [NormalizationLevel::Standard, NormalizationLevel::Strict] {
            let result = normalize("ab", level);
            assert!(result.normalized.is_none());
            assert!(matches!(
                result.first_error(),
                Some(NormalizationError::TooShort { length: 2, .. })
            ));
        }
    }

    #[test]
    fn test_normalize_no_alphanumeric_is_unrecoverable() {
        let result = normalize("!!! ---", NormalizationLevel::Standard);
        assert_eq!(result.first_error(), Some(&NormalizationError::Unrecoverable));
        assert!((result.confidence - 0.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_normalize_non_ascii_only_is_unrecoverable() {
        let result = normalize("日本語", NormalizationLevel::Strict);
        assert_eq!(result.first_error(), Some(&NormalizationError::Unrecoverable));
    }

    // ==================== Confidence & Alternatives Tests ====================

    #[test]
    fn test_confidence_decreases_with_changes() {
        let clean = normalize("mario-bros", NormalizationLevel::Strict);
        let messy = normalize("  Mario!! -- Bros  ", NormalizationLevel::Strict);
        assert!(messy.confidence < clean.confidence);
        assert!(messy.confidence >= MIN_CONFIDENCE);
    }

    #[test]
    fn test_alternatives_underscore_and_concatenation() {
        let result = normalize("super-mario", NormalizationLevel::Strict);
        assert_eq!(result.alternatives, vec!["super_mario", "supermario"]);
    }

    #[test]
    fn test_alternatives_skip_identical_forms() {
        let result = normalize("mario", NormalizationLevel::Strict);
        assert!(result.alternatives.is_empty());
    }

    #[test]
    fn test_alternatives_skip_too_short_concatenation() {
        let result = normalize("a-b", NormalizationLevel::Strict);
        assert_eq!(result.alternatives, vec!["a_b"]);
    }

    #[test]
    fn test_is_valid_identifier_grammar() {
        assert!(is_valid_identifier("mario-bros", NormalizationLevel::Strict));
        assert!(!is_valid_identifier("Mario", NormalizationLevel::Strict));
        assert!(is_valid_identifier("Mario", NormalizationLevel::Standard));
        assert!(!is_valid_identifier("-mario", NormalizationLevel::Standard));
        assert!(!is_valid_identifier("ma--rio", NormalizationLevel::Standard));
        assert!(!is_valid_identifier("ab", NormalizationLevel::Standard));
    }

    #[test]
    fn test_normalized_output_satisfies_grammar() {
        for input in ["  Hello,   World! ", "x__y..z--w", "Ünïcödé Títle 2024", "a.b"] {
            for level in [NormalizationLevel::Standard, NormalizationLevel::Strict] {
                if let Some(normalized) = normalize(input, level).normalized {
                    assert!(
                        is_valid_identifier(&normalized, level),
                        "{normalized:?} violates grammar at {level:?}"
                    );
                }
            }
        }
    }
}
