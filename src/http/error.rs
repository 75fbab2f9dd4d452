//! Error types for the HTTP access layer.
//!
//! Every terminal failure carries the URL it was attempted against, the last
//! HTTP status observed (when any), and how many attempts were made.

use std::time::Duration;

use thiserror::Error;

use super::retry::FailureType;

/// Terminal failure of one logical request.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Every attempt timed out.
    #[error("timeout fetching {url} after {attempts} attempt(s)")]
    Timeout {
        /// The URL that timed out.
        url: String,
        /// Last HTTP status seen before the final timeout, if any.
        last_status: Option<u16>,
        /// Attempts made.
        attempts: u32,
    },

    /// The server kept answering 429/503 until the retry budget ran out.
    #[error("rate limited by server fetching {url} (HTTP {status}) after {attempts} attempt(s)")]
    RateLimited {
        /// The URL that was throttled.
        url: String,
        /// The final 429 or 503 status.
        status: u16,
        /// Last Retry-After hint received, already capped.
        retry_after: Option<Duration>,
        /// Attempts made.
        attempts: u32,
    },

    /// The server kept returning 5xx until the retry budget ran out.
    #[error("server error HTTP {status} fetching {url} after {attempts} attempt(s)")]
    ServerError {
        /// The URL that failed.
        url: String,
        /// The final 5xx status.
        status: u16,
        /// Attempts made.
        attempts: u32,
    },

    /// Connection-level failure (DNS, refused, reset, body interrupted).
    #[error("network error fetching {url} after {attempts} attempt(s): {source}")]
    NetworkError {
        /// The URL that failed.
        url: String,
        /// Last HTTP status seen, if the failure happened mid-body.
        last_status: Option<u16>,
        /// Attempts made.
        attempts: u32,
        /// The final underlying error.
        #[source]
        source: reqwest::Error,
    },

    /// The caller cancelled the request.
    #[error("request to {url} cancelled")]
    Cancelled {
        /// The URL being fetched.
        url: String,
        /// Attempts started before cancellation.
        attempts: u32,
    },

    /// The resource does not exist (404 or 410).
    #[error("not found: {url} (HTTP {status})")]
    NotFound {
        /// The URL that was not found.
        url: String,
        /// 404 or 410.
        status: u16,
        /// Attempts made.
        attempts: u32,
    },

    /// Any other non-retryable status.
    #[error("HTTP {status} fetching {url}")]
    HttpStatus {
        /// The URL that failed.
        url: String,
        /// The status returned.
        status: u16,
        /// Attempts made.
        attempts: u32,
    },

    /// The URL could not be parsed or built.
    #[error("invalid URL {url}: {reason}")]
    InvalidUrl {
        /// The offending URL text.
        url: String,
        /// Parser message.
        reason: String,
    },

    /// Cache-only mode is active and the resource is not cached.
    #[error("{url} is not cached and network access is disabled")]
    CacheOnlyViolation {
        /// The URL that would have been fetched.
        url: String,
    },

    /// Writing to the download sink failed.
    #[error("IO error writing {url}: {source}")]
    Io {
        /// The URL being downloaded.
        url: String,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The body ended before the advertised Content-Length.
    #[error("truncated body for {url}: expected {expected_bytes} bytes, got {actual_bytes}")]
    Truncated {
        /// The URL being downloaded.
        url: String,
        /// Content-Length advertised by the server.
        expected_bytes: u64,
        /// Bytes actually received.
        actual_bytes: u64,
    },

    /// The rate limiter was shut down.
    #[error("request admission closed for {url}")]
    LimiterClosed {
        /// The URL being fetched.
        url: String,
    },

    /// The underlying HTTP client could not be constructed.
    #[error("failed to build HTTP client: {0}")]
    ClientBuild(#[source] reqwest::Error),
}

impl FetchError {
    /// Creates an invalid URL error.
    pub fn invalid_url(url: impl Into<String>, reason: impl ToString) -> Self {
        Self::InvalidUrl {
            url: url.into(),
            reason: reason.to_string(),
        }
    }

    /// Creates a cache-only violation.
    pub fn cache_only(url: impl Into<String>) -> Self {
        Self::CacheOnlyViolation { url: url.into() }
    }

    /// Creates a cancellation error.
    pub fn cancelled(url: impl Into<String>, attempts: u32) -> Self {
        Self::Cancelled {
            url: url.into(),
            attempts,
        }
    }

    /// Creates a sink IO error.
    pub fn io(url: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            url: url.into(),
            source,
        }
    }

    /// Creates a truncation error.
    pub fn truncated(url: impl Into<String>, expected_bytes: u64, actual_bytes: u64) -> Self {
        Self::Truncated {
            url: url.into(),
            expected_bytes,
            actual_bytes,
        }
    }

    /// Maps a terminal non-success status to the matching variant.
    pub fn from_status(
        url: impl Into<String>,
        status: u16,
        attempts: u32,
        retry_after: Option<Duration>,
    ) -> Self {
        let url = url.into();
        match super::retry::classify_http_status(status) {
            FailureType::NotFound => Self::NotFound {
                url,
                status,
                attempts,
            },
            FailureType::RateLimited => Self::RateLimited {
                url,
                status,
                retry_after,
                attempts,
            },
            FailureType::Transient if (500..600).contains(&status) => Self::ServerError {
                url,
                status,
                attempts,
            },
            FailureType::Transient | FailureType::Permanent => Self::HttpStatus {
                url,
                status,
                attempts,
            },
        }
    }

    /// The URL this error refers to, when one exists.
    #[must_use]
    pub fn url(&self) -> Option<&str> {
        match self {
            Self::Timeout { url, .. }
            | Self::RateLimited { url, .. }
            | Self::ServerError { url, .. }
            | Self::NetworkError { url, .. }
            | Self::Cancelled { url, .. }
            | Self::NotFound { url, .. }
            | Self::HttpStatus { url, .. }
            | Self::InvalidUrl { url, .. }
            | Self::CacheOnlyViolation { url }
            | Self::Io { url, .. }
            | Self::Truncated { url, .. }
            | Self::LimiterClosed { url } => Some(url),
            Self::ClientBuild(_) => None,
        }
    }

    /// The last HTTP status observed, if any.
    #[must_use]
    pub fn last_status(&self) -> Option<u16> {
        match self {
            Self::RateLimited { status, .. }
            | Self::ServerError { status, .. }
            | Self::NotFound { status, .. }
            | Self::HttpStatus { status, .. } => Some(*status),
            Self::Timeout { last_status, .. } | Self::NetworkError { last_status, .. } => {
                *last_status
            }
            _ => None,
        }
    }

    /// Number of attempts made before giving up.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Timeout { attempts, .. }
            | Self::RateLimited { attempts, .. }
            | Self::ServerError { attempts, .. }
            | Self::NetworkError { attempts, .. }
            | Self::Cancelled { attempts, .. }
            | Self::NotFound { attempts, .. }
            | Self::HttpStatus { attempts, .. } => *attempts,
            _ => 0,
        }
    }

    /// Returns `true` for failures that another attempt later might fix.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. }
                | Self::RateLimited { .. }
                | Self::ServerError { .. }
                | Self::NetworkError { .. }
        )
    }

    /// Returns `true` when the resource is confirmed absent upstream.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_status_maps_not_found() {
        let error = FetchError::from_status("https://archive.org/metadata/x", 404, 1, None);
        assert!(error.is_not_found());
        assert_eq!(error.last_status(), Some(404));

        let gone = FetchError::from_status("https://archive.org/metadata/x", 410, 1, None);
        assert!(gone.is_not_found());
    }

    #[test]
    fn test_from_status_maps_rate_limited_and_server_errors() {
        let limited = FetchError::from_status("u", 429, 5, Some(Duration::from_secs(3)));
        assert!(matches!(limited, FetchError::RateLimited { attempts: 5, .. }));

        let unavailable = FetchError::from_status("u", 503, 5, None);
        assert!(matches!(unavailable, FetchError::RateLimited { status: 503, .. }));

        let server = FetchError::from_status("u", 502, 5, None);
        assert!(matches!(server, FetchError::ServerError { status: 502, .. }));
        assert!(server.is_transient());
    }

    #[test]
    fn test_from_status_other_client_errors_are_terminal() {
        let error = FetchError::from_status("u", 400, 1, None);
        assert!(matches!(error, FetchError::HttpStatus { status: 400, .. }));
        assert!(!error.is_transient());
    }

    #[test]
    fn test_error_context_accessors() {
        let error = FetchError::from_status("https://archive.org/x", 500, 3, None);
        assert_eq!(error.url(), Some("https://archive.org/x"));
        assert_eq!(error.attempts(), 3);
        assert!(error.to_string().contains("HTTP 500"));

        let cancelled = FetchError::cancelled("https://archive.org/y", 1);
        assert_eq!(cancelled.last_status(), None);
        assert!(!cancelled.is_transient());
    }

    #[test]
    fn test_truncated_display_includes_sizes() {
        let error = FetchError::truncated("https://archive.org/z", 100, 42);
        let msg = error.to_string();
        assert!(msg.contains("100"));
        assert!(msg.contains("42"));
    }
}
