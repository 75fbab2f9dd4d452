//! Backoff scheduling and the per-request retry lifecycle.
//!
//! [`RetryPolicy`] turns a failed attempt into a [`RetryDecision`].
//! [`RetryMachine`] tracks one logical request through its states so the
//! client never has to count attempts or sum backoff itself:
//!
//! ```text
//! Idle -> Attempting -> Succeeded
//!            |  ^
//!            v  |
//!         BackingOff -> Exhausted
//! ```
//!
//! HTTP outcomes are sorted into a [`FailureType`] first. Only transient and
//! rate-limited failures are retried; a rate-limited failure waits for the
//! server's `Retry-After` hint when one was sent.
//!
//! ```
//! use std::time::Duration;
//! use archive_core::http::{FailureType, RetryDecision, RetryMachine, RetryPolicy};
//!
//! let mut machine = RetryMachine::new(RetryPolicy::default(), "https://archive.org/metadata/x");
//! machine.begin_attempt();
//! let decision = machine.fail(FailureType::RateLimited, Some(429), Some(Duration::from_secs(4)));
//! assert_eq!(decision, RetryDecision::Retry { delay: Duration::from_secs(4), attempt: 2 });
//! ```

use std::time::{Duration, SystemTime};

use rand::Rng;
use serde::Serialize;
use tracing::{debug, instrument, warn};

use super::constants::MAX_RETRY_AFTER;

/// Attempts per logical request, the first one included.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Wait before the first retry.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);

/// Longest computed backoff.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(60);

/// Growth factor between consecutive backoffs.
pub const DEFAULT_BACKOFF_MULTIPLIER: f32 = 2.0;

/// How a failed attempt is treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureType {
    /// Timeouts, dropped connections, 408 and 5xx other than 503.
    Transient,

    /// 429 or 503. Retried after `Retry-After` when the server sent one.
    RateLimited,

    /// 404 or 410. Terminal, and cacheable as a negative result.
    NotFound,

    /// Any other client error. Terminal.
    Permanent,
}

impl FailureType {
    /// Returns `true` when another attempt may succeed.
    #[must_use]
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Transient | Self::RateLimited)
    }
}

/// What the caller does after a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Sleep `delay`, then send attempt number `attempt`.
    Retry {
        /// Backoff before the next attempt.
        delay: Duration,
        /// Number of the next attempt; the first retry is 2.
        attempt: u32,
    },

    /// Stop and report the failure.
    DoNotRetry {
        /// Logged with the final error.
        reason: String,
    },
}

/// Exponential backoff schedule with an attempt budget.
///
/// The n-th retry waits `base * multiplier^(n-1)`, capped at the maximum
/// delay, plus up to `max_jitter` of random slack. The defaults give
/// 1s, 2s, 4s and 8s across a budget of five attempts.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    attempt_budget: u32,
    first_backoff: Duration,
    backoff_cap: Duration,
    growth: f32,
    jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(
            DEFAULT_MAX_ATTEMPTS,
            DEFAULT_BASE_DELAY,
            DEFAULT_MAX_DELAY,
            DEFAULT_BACKOFF_MULTIPLIER,
        )
    }
}

impl RetryPolicy {
    /// Builds a schedule without jitter.
    ///
    /// The budget is at least one attempt and the growth factor at least 1.0.
    #[must_use]
    pub fn new(attempts: u32, first_backoff: Duration, backoff_cap: Duration, growth: f32) -> Self {
        Self {
            attempt_budget: attempts.max(1),
            first_backoff,
            backoff_cap,
            growth: growth.max(1.0),
            jitter: Duration::ZERO,
        }
    }

    /// The default schedule with a different attempt budget.
    #[must_use]
    pub fn with_max_attempts(attempts: u32) -> Self {
        Self {
            attempt_budget: attempts.max(1),
            ..Self::default()
        }
    }

    /// Adds up to `max_jitter` of random delay to every computed backoff.
    #[must_use]
    pub fn with_jitter(mut self, max_jitter: Duration) -> Self {
        self.jitter = max_jitter;
        self
    }

    /// Attempt budget, the first attempt included.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.attempt_budget
    }

    /// Decides what follows failed attempt number `attempt`.
    ///
    /// `retry_after` replaces the computed backoff for rate-limited failures
    /// only, capped at one hour.
    #[instrument(skip(self), fields(budget = self.attempt_budget))]
    pub fn should_retry(
        &self,
        failure_type: FailureType,
        attempt: u32,
        retry_after: Option<Duration>,
    ) -> RetryDecision {
        let stop = |reason: String| RetryDecision::DoNotRetry { reason };
        match failure_type {
            FailureType::NotFound => return stop("not found".to_string()),
            FailureType::Permanent => return stop("client error is not retryable".to_string()),
            FailureType::Transient | FailureType::RateLimited => {}
        }
        if attempt >= self.attempt_budget {
            debug!(attempt, "attempt budget spent");
            return stop(format!("all {} attempts used", self.attempt_budget));
        }

        let delay = match (failure_type, retry_after) {
            (FailureType::RateLimited, Some(hint)) => hint.min(MAX_RETRY_AFTER),
            _ => self.backoff(attempt) + self.random_slack(),
        };
        debug!(
            attempt,
            delay_ms = delay.as_millis(),
            ?failure_type,
            "scheduling retry"
        );
        RetryDecision::Retry {
            delay,
            attempt: attempt + 1,
        }
    }

    /// Backoff after failed attempt `attempt`, before jitter.
    fn backoff(&self, attempt: u32) -> Duration {
        let steps = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let factor = f64::from(self.growth).powi(steps);
        Duration::try_from_secs_f64(self.first_backoff.as_secs_f64() * factor)
            .map_or(self.backoff_cap, |delay| delay.min(self.backoff_cap))
    }

    fn random_slack(&self) -> Duration {
        if self.jitter.is_zero() {
            Duration::ZERO
        } else {
            rand::thread_rng().gen_range(Duration::ZERO..=self.jitter)
        }
    }
}

/// Sorts an HTTP status into a [`FailureType`].
///
/// 404 and 410 are absence; 429 and 503 are throttling; 408 and the other
/// 5xx codes are transient; everything else is permanent.
#[must_use]
pub fn classify_http_status(status: u16) -> FailureType {
    match status {
        404 | 410 => FailureType::NotFound,
        429 | 503 => FailureType::RateLimited,
        408 | 500..=599 => FailureType::Transient,
        _ => FailureType::Permanent,
    }
}

/// Parses a `Retry-After` header value relative to `now`.
///
/// Accepts integer seconds or an RFC 7231 HTTP-date. Values above one hour
/// are capped; a date in the past yields zero; negative or unparseable
/// values yield `None`.
///
/// # Example
///
/// ```
/// use std::time::{Duration, SystemTime};
/// use archive_core::http::parse_retry_after;
///
/// let now = SystemTime::now();
/// assert_eq!(parse_retry_after("120", now), Some(Duration::from_secs(120)));
/// assert_eq!(parse_retry_after("-1", now), None);
/// ```
#[must_use]
pub fn parse_retry_after(header_value: &str, now: SystemTime) -> Option<Duration> {
    let header_value = header_value.trim();

    if let Ok(seconds) = header_value.parse::<i64>() {
        if seconds < 0 {
            debug!(seconds, "negative Retry-After value, ignoring");
            return None;
        }

        #[allow(clippy::cast_sign_loss)]
        let duration = Duration::from_secs(seconds as u64);
        return Some(cap_retry_after(duration));
    }

    if let Ok(datetime) = httpdate::parse_http_date(header_value) {
        if let Ok(duration) = datetime.duration_since(now) {
            Some(cap_retry_after(duration))
        } else {
            debug!(header_value, "Retry-After date is in the past, returning zero");
            Some(Duration::ZERO)
        }
    } else {
        debug!(header_value, "unparseable Retry-After value");
        None
    }
}

fn cap_retry_after(duration: Duration) -> Duration {
    if duration > MAX_RETRY_AFTER {
        warn!(
            delay_secs = duration.as_secs(),
            max_secs = MAX_RETRY_AFTER.as_secs(),
            "Retry-After exceeds maximum, capping at 1 hour"
        );
        MAX_RETRY_AFTER
    } else {
        duration
    }
}

/// Position of one logical request in its retry lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RetryState {
    /// No attempt started yet.
    Idle,
    /// Attempt `attempt` is in flight.
    Attempting {
        /// 1-indexed attempt number.
        attempt: u32,
    },
    /// Attempt `attempt` failed; waiting `delay` before the next one.
    BackingOff {
        /// The attempt that failed.
        attempt: u32,
        /// Scheduled wait.
        delay: Duration,
    },
    /// An attempt produced a usable response.
    Succeeded {
        /// Attempts made, including the successful one.
        attempts: u32,
    },
    /// The request failed terminally.
    Exhausted {
        /// Attempts made.
        attempts: u32,
        /// Classification of the final failure.
        failure: FailureType,
    },
}

impl RetryState {
    /// Returns `true` for `Succeeded` and `Exhausted`.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded { .. } | Self::Exhausted { .. })
    }
}

/// Snapshot of one logical request's progress, for logs and diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HttpAttempt {
    /// Target URL.
    pub url: String,
    /// Current or final attempt number.
    pub attempt: u32,
    /// Total time spent backing off so far.
    pub elapsed_backoff: Duration,
    /// Last HTTP status received.
    pub last_status: Option<u16>,
    /// Classification of the last failure.
    pub last_failure: Option<FailureType>,
}

/// Drives [`RetryPolicy`] through the request lifecycle.
///
/// The machine decides; the caller performs the attempts and the sleeps.
#[derive(Debug, Clone)]
pub struct RetryMachine {
    policy: RetryPolicy,
    state: RetryState,
    record: HttpAttempt,
}

impl RetryMachine {
    /// Creates an idle machine for `url`.
    #[must_use]
    pub fn new(policy: RetryPolicy, url: impl Into<String>) -> Self {
        Self {
            policy,
            state: RetryState::Idle,
            record: HttpAttempt {
                url: url.into(),
                attempt: 0,
                elapsed_backoff: Duration::ZERO,
                last_status: None,
                last_failure: None,
            },
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> &RetryState {
        &self.state
    }

    /// Progress record for diagnostics.
    #[must_use]
    pub fn record(&self) -> &HttpAttempt {
        &self.record
    }

    /// Attempts started so far.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.record.attempt
    }

    /// Starts the next attempt and returns its number.
    ///
    /// Returns `None` once the machine is terminal.
    pub fn begin_attempt(&mut self) -> Option<u32> {
        match self.state {
            RetryState::Idle => {
                self.record.attempt = 1;
            }
            RetryState::BackingOff { attempt, delay } => {
                self.record.attempt = attempt + 1;
                self.record.elapsed_backoff += delay;
            }
            RetryState::Attempting { attempt } => return Some(attempt),
            RetryState::Succeeded { .. } | RetryState::Exhausted { .. } => return None,
        }
        self.state = RetryState::Attempting {
            attempt: self.record.attempt,
        };
        Some(self.record.attempt)
    }

    /// Marks the in-flight attempt as successful.
    pub fn succeed(&mut self, status: Option<u16>) {
        self.record.last_status = status.or(self.record.last_status);
        self.state = RetryState::Succeeded {
            attempts: self.record.attempt,
        };
    }

    /// Records a failed attempt and returns the next step.
    ///
    /// On `Retry` the machine is `BackingOff` and the caller sleeps the
    /// returned delay before calling [`begin_attempt`](Self::begin_attempt).
    pub fn fail(
        &mut self,
        failure: FailureType,
        status: Option<u16>,
        retry_after: Option<Duration>,
    ) -> RetryDecision {
        if status.is_some() {
            self.record.last_status = status;
        }
        self.record.last_failure = Some(failure);

        let attempt = self.record.attempt.max(1);
        let decision = self.policy.should_retry(failure, attempt, retry_after);
        self.state = match &decision {
            RetryDecision::Retry { delay, .. } => RetryState::BackingOff {
                attempt,
                delay: *delay,
            },
            RetryDecision::DoNotRetry { .. } => RetryState::Exhausted {
                attempts: attempt,
                failure,
            },
        };
        decision
    }
}
