//! Time source and sleep abstraction.
//!
//! Backoff waits, throttle delays and cache TTLs all read time through a
//! [`Clock`] so they can be driven deterministically in tests.
//!
//! - [`TokioClock`] - production clock backed by `tokio::time` (honours
//!   `tokio::time::pause()` in tests)
//! - [`ManualClock`] - test clock whose `sleep` returns immediately after
//!   advancing virtual time and recording the requested duration

use std::fmt::Debug;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use tokio::time::Instant;

/// Source of monotonic time, wall-clock time, and sleeps.
#[async_trait]
pub trait Clock: Debug + Send + Sync {
    /// Monotonic now, used for refill and wait measurements.
    fn now(&self) -> Instant;

    /// Wall-clock now, used for persisted timestamps and TTLs.
    fn system_time(&self) -> SystemTime;

    /// Suspends the caller for `duration`.
    async fn sleep(&self, duration: Duration);
}

/// Clock backed by the Tokio timer.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn system_time(&self) -> SystemTime {
        SystemTime::now()
    }

    async fn sleep(&self, duration: Duration) {
        if !duration.is_zero() {
            tokio::time::sleep(duration).await;
        }
    }
}

/// Virtual clock for tests.
///
/// Time only moves through [`advance`](Self::advance) or
/// [`Clock::sleep`]; every non-zero sleep is recorded.
#[derive(Debug)]
pub struct ManualClock {
    base_instant: Instant,
    base_system: SystemTime,
    state: Mutex<ManualState>,
}

#[derive(Debug, Default)]
struct ManualState {
    offset: Duration,
    sleeps: Vec<Duration>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualClock {
    /// Creates a clock frozen at the current instant.
    #[must_use]
    pub fn new() -> Self {
        Self {
            base_instant: Instant::now(),
            base_system: SystemTime::now(),
            state: Mutex::new(ManualState::default()),
        }
    }

    /// Moves virtual time forward without recording a sleep.
    pub fn advance(&self, duration: Duration) {
        self.lock().offset += duration;
    }

    /// Total virtual time elapsed since creation.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.lock().offset
    }

    /// Durations passed to `sleep`, in call order.
    #[must_use]
    pub fn sleeps(&self) -> Vec<Duration> {
        self.lock().sleeps.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ManualState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.base_instant + self.lock().offset
    }

    fn system_time(&self) -> SystemTime {
        self.base_system + self.lock().offset
    }

    async fn sleep(&self, duration: Duration) {
        if duration.is_zero() {
            return;
        }
        let mut state = self.lock();
        state.offset += duration;
        state.sleeps.push(duration);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_manual_clock_sleep_advances_and_records() {
        let clock = ManualClock::new();
        let start = clock.now();

        clock.sleep(Duration::from_secs(2)).await;
        clock.sleep(Duration::ZERO).await;
        clock.sleep(Duration::from_millis(500)).await;

        assert_eq!(clock.now() - start, Duration::from_millis(2500));
        assert_eq!(
            clock.sleeps(),
            vec![Duration::from_secs(2), Duration::from_millis(500)]
        );
    }

    #[test]
    fn test_manual_clock_advance_moves_both_timelines() {
        let clock = ManualClock::new();
        let wall = clock.system_time();
        clock.advance(Duration::from_secs(60));
        assert_eq!(
            clock.system_time().duration_since(wall).ok(),
            Some(Duration::from_secs(60))
        );
        assert!(clock.sleeps().is_empty());
    }

    #[tokio::test]
    async fn test_tokio_clock_honours_paused_time() {
        tokio::time::pause();
        let clock = TokioClock;
        let start = clock.now();
        clock.sleep(Duration::from_secs(30)).await;
        assert!(clock.now() - start >= Duration::from_secs(30));
    }
}
