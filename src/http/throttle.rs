//! Token-bucket bandwidth throttling.
//!
//! [`TokenBucket`] is the pure accounting core: it never sleeps and takes the
//! current instant as an argument. [`BandwidthThrottle`] wraps one bucket in a
//! mutex, reads time from the injected [`Clock`], and keeps metrics.
//!
//! Consuming more tokens than are available never makes the balance
//! negative. The balance drops to zero and the refill clock is pushed into
//! the future by the returned delay, so bytes in flight are paid for by
//! tokens that have not accrued yet. A caller arriving while that debt is
//! outstanding waits for it too, which keeps concurrent streams under one
//! aggregate rate.

use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tracing::debug;

use super::constants::DEFAULT_BURST_BYTES;
use crate::clock::Clock;

/// Byte-denominated token bucket.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    capacity: u64,
    tokens: f64,
    rate: Option<u64>,
    last_refill: Instant,
    paused_at: Option<Instant>,
}

impl TokenBucket {
    /// Creates a full bucket.
    ///
    /// `rate` is in bytes per second; `None` (or zero) disables throttling.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn new(rate: Option<u64>, capacity: u64, now: Instant) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            tokens: capacity as f64,
            rate: rate.filter(|r| *r > 0),
            last_refill: now,
            paused_at: None,
        }
    }

    /// Bucket size in bytes.
    #[must_use]
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Refill rate in bytes per second, `None` when unbounded.
    #[must_use]
    pub fn rate(&self) -> Option<u64> {
        self.rate
    }

    /// Returns `true` while accrual is frozen.
    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.paused_at.is_some()
    }

    /// Tokens available at `now`.
    pub fn available(&mut self, now: Instant) -> f64 {
        self.refill(now);
        self.tokens
    }

    /// Debits `bytes` and returns how long the caller must wait.
    ///
    /// Zero when enough tokens were available or the bucket is unbounded.
    #[allow(clippy::cast_precision_loss)]
    pub fn consume(&mut self, bytes: u64, now: Instant) -> Duration {
        let Some(rate) = self.rate else {
            return Duration::ZERO;
        };
        self.refill(now);

        let wanted = bytes as f64;
        if self.tokens >= wanted {
            self.tokens -= wanted;
            return Duration::ZERO;
        }

        // Debt already owed to earlier callers is paid before this one.
        let owed = self.last_refill.saturating_duration_since(now);
        let shortfall = wanted - self.tokens;
        let wait = Duration::from_secs_f64(shortfall / rate as f64);
        self.tokens = 0.0;
        self.last_refill += wait;
        owed + wait
    }

    /// Freezes accrual at `now`.
    pub fn pause(&mut self, now: Instant) {
        if self.paused_at.is_none() {
            self.refill(now);
            self.paused_at = Some(now);
        }
    }

    /// Resumes accrual; the paused interval earns no tokens.
    pub fn resume(&mut self, now: Instant) {
        if let Some(paused_at) = self.paused_at.take() {
            self.last_refill += now.saturating_duration_since(paused_at);
        }
    }

    /// Restores full capacity and clears any pre-debited balance.
    #[allow(clippy::cast_precision_loss)]
    pub fn reset(&mut self, now: Instant) {
        self.tokens = self.capacity as f64;
        self.last_refill = now;
        if self.paused_at.is_some() {
            self.paused_at = Some(now);
        }
    }

    /// Changes the refill rate, settling accrual at the old rate first.
    pub fn set_rate(&mut self, rate: Option<u64>, now: Instant) {
        self.refill(now);
        self.rate = rate.filter(|r| *r > 0);
    }

    #[allow(clippy::cast_precision_loss)]
    fn refill(&mut self, now: Instant) {
        let effective = self.paused_at.unwrap_or(now);
        if effective <= self.last_refill {
            return;
        }
        let elapsed = effective - self.last_refill;
        self.last_refill = effective;

        let Some(rate) = self.rate else {
            self.tokens = self.capacity as f64;
            return;
        };
        let accrued = elapsed.as_secs_f64() * rate as f64;
        self.tokens = (self.tokens + accrued).min(self.capacity as f64);
    }
}

/// Point-in-time throttle metrics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThrottleMetrics {
    /// Configured rate in bytes per second, `None` when unbounded.
    pub rate: Option<u64>,
    /// Bucket capacity in bytes.
    pub capacity: u64,
    /// Tokens available now.
    pub available_tokens: f64,
    /// Whether accrual is paused.
    pub paused: bool,
    /// Total bytes passed through `consume`.
    pub bytes_consumed: u64,
    /// `consume` calls that required a wait.
    pub throttle_events: u64,
    /// `consume` calls that passed without waiting.
    pub immediate_passes: u64,
    /// Sum of all returned delays in milliseconds.
    pub cumulative_delay_ms: u64,
}

#[derive(Debug, Default)]
struct ThrottleCounters {
    bytes: AtomicU64,
    throttled: AtomicU64,
    immediate: AtomicU64,
    delay_us: AtomicU64,
}

/// Shared bandwidth throttle.
///
/// The throttle only computes delays; callers sleep them through their own
/// [`Clock`].
#[derive(Debug)]
pub struct BandwidthThrottle {
    bucket: Mutex<TokenBucket>,
    clock: Arc<dyn Clock>,
    counters: ThrottleCounters,
}

impl BandwidthThrottle {
    /// Creates a throttle limited to `rate` bytes per second with a burst of
    /// `capacity` bytes.
    #[must_use]
    pub fn new(rate: Option<u64>, capacity: u64, clock: Arc<dyn Clock>) -> Self {
        let bucket = TokenBucket::new(rate, capacity, clock.now());
        debug!(?rate, capacity, "creating bandwidth throttle");
        Self {
            bucket: Mutex::new(bucket),
            clock,
            counters: ThrottleCounters::default(),
        }
    }

    /// Creates a throttle that never delays.
    #[must_use]
    pub fn unbounded(clock: Arc<dyn Clock>) -> Self {
        Self::new(None, DEFAULT_BURST_BYTES, clock)
    }

    /// Debits `bytes` and returns the delay the caller must sleep.
    #[allow(clippy::cast_possible_truncation)]
    pub fn consume(&self, bytes: u64) -> Duration {
        let delay = self.lock().consume(bytes, self.clock.now());

        self.counters.bytes.fetch_add(bytes, Ordering::SeqCst);
        if delay.is_zero() {
            self.counters.immediate.fetch_add(1, Ordering::SeqCst);
        } else {
            self.counters.throttled.fetch_add(1, Ordering::SeqCst);
            self.counters
                .delay_us
                .fetch_add(delay.as_micros() as u64, Ordering::SeqCst);
            debug!(bytes, delay_ms = delay.as_millis(), "bandwidth throttled");
        }
        delay
    }

    /// Freezes token accrual.
    pub fn pause(&self) {
        self.lock().pause(self.clock.now());
    }

    /// Resumes token accrual.
    pub fn resume(&self) {
        self.lock().resume(self.clock.now());
    }

    /// Refills the bucket to capacity.
    pub fn reset(&self) {
        self.lock().reset(self.clock.now());
    }

    /// Changes the byte rate; `None` removes the cap.
    pub fn set_rate(&self, rate: Option<u64>) {
        debug!(?rate, "bandwidth rate changed");
        self.lock().set_rate(rate, self.clock.now());
    }

    /// Current rate in bytes per second.
    #[must_use]
    pub fn rate(&self) -> Option<u64> {
        self.lock().rate()
    }

    /// Returns `true` while accrual is paused.
    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.lock().is_paused()
    }

    /// Returns a snapshot of throttle activity.
    #[must_use]
    pub fn metrics(&self) -> ThrottleMetrics {
        let (rate, capacity, available_tokens, paused) = {
            let mut bucket = self.lock();
            let available = bucket.available(self.clock.now());
            (bucket.rate(), bucket.capacity(), available, bucket.is_paused())
        };
        ThrottleMetrics {
            rate,
            capacity,
            available_tokens,
            paused,
            bytes_consumed: self.counters.bytes.load(Ordering::SeqCst),
            throttle_events: self.counters.throttled.load(Ordering::SeqCst),
            immediate_passes: self.counters.immediate.load(Ordering::SeqCst),
            cumulative_delay_ms: self.counters.delay_us.load(Ordering::SeqCst) / 1_000,
        }
    }

    /// Renders the metrics as a short human-readable report.
    #[must_use]
    pub fn formatted_statistics(&self) -> String {
        let m = self.metrics();
        let rate = m
            .rate
            .map_or_else(|| "unbounded".to_string(), |r| format!("{r} B/s"));
        let mut out = String::new();
        let _ = writeln!(
            out,
            "Bandwidth throttle: {rate}, burst {} B{}",
            m.capacity,
            if m.paused { " (paused)" } else { "" }
        );
        let _ = write!(
            out,
            "  {} bytes, {} immediate, {} throttled, {}ms total delay",
            m.bytes_consumed, m.immediate_passes, m.throttle_events, m.cumulative_delay_ms
        );
        out
    }

    /// Zeroes counters; the bucket is untouched.
    pub fn reset_metrics(&self) {
        self.counters.bytes.store(0, Ordering::SeqCst);
        self.counters.throttled.store(0, Ordering::SeqCst);
        self.counters.immediate.store(0, Ordering::SeqCst);
        self.counters.delay_us.store(0, Ordering::SeqCst);
    }

    fn lock(&self) -> MutexGuard<'_, TokenBucket> {
        self.bucket.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    const RATE: u64 = 1_000;
    const CAPACITY: u64 = 4_000;

    fn throttle() -> (Arc<ManualClock>, BandwidthThrottle) {
        let clock = Arc::new(ManualClock::new());
        let throttle = BandwidthThrottle::new(Some(RATE), CAPACITY, clock.clone());
        (clock, throttle)
    }

    // ==================== TokenBucket Tests ====================

    #[test]
    fn test_consume_capacity_after_reset_is_free() {
        let (_clock, throttle) = throttle();
        throttle.reset();
        assert_eq!(throttle.consume(CAPACITY), Duration::ZERO);
    }

    #[test]
    fn test_consume_capacity_plus_one_waits_one_token() {
        let (_clock, throttle) = throttle();
        throttle.reset();
        assert_eq!(throttle.consume(CAPACITY + 1), Duration::from_millis(1));
    }

    #[test]
    fn test_overdraft_never_goes_negative() {
        let now = Instant::now();
        let mut bucket = TokenBucket::new(Some(RATE), CAPACITY, now);

        let delay = bucket.consume(CAPACITY * 2, now);
        assert_eq!(delay, Duration::from_secs(4));
        assert!(bucket.available(now) >= 0.0);

        // The pre-debited interval earns nothing.
        assert!(bucket.available(now + Duration::from_secs(4)).abs() < f64::EPSILON);
        let later = bucket.available(now + Duration::from_secs(5));
        assert!((later - 1_000.0).abs() < 1e-6);
    }

    #[test]
    fn test_same_instant_consumers_queue_behind_debt() {
        let now = Instant::now();
        let mut bucket = TokenBucket::new(Some(RATE), 1_000, now);

        let delays: Vec<Duration> = (0..3).map(|_| bucket.consume(1_000, now)).collect();
        assert_eq!(
            delays,
            vec![Duration::ZERO, Duration::from_secs(1), Duration::from_secs(2)]
        );
    }

    #[test]
    fn test_debt_shrinks_as_time_passes() {
        let now = Instant::now();
        let mut bucket = TokenBucket::new(Some(RATE), 1_000, now);
        bucket.consume(1_000, now);
        assert_eq!(bucket.consume(2_000, now), Duration::from_secs(2));

        // Half a second later, 1.5s of the earlier debt remains.
        let later = now + Duration::from_millis(500);
        assert_eq!(bucket.consume(1_000, later), Duration::from_millis(2_500));
    }

    #[test]
    fn test_refill_is_capped_at_capacity() {
        let now = Instant::now();
        let mut bucket = TokenBucket::new(Some(RATE), CAPACITY, now);
        bucket.consume(1_000, now);
        let tokens = bucket.available(now + Duration::from_secs(3_600));
        assert!((tokens - CAPACITY as f64).abs() < 1e-6);
    }

    #[test]
    fn test_unbounded_bucket_never_delays() {
        let now = Instant::now();
        let mut bucket = TokenBucket::new(None, 10, now);
        assert_eq!(bucket.consume(1_000_000, now), Duration::ZERO);

        let mut zero_rate = TokenBucket::new(Some(0), 10, now);
        assert_eq!(zero_rate.rate(), None);
        assert_eq!(zero_rate.consume(1_000_000, now), Duration::ZERO);
    }

    #[test]
    fn test_paused_interval_earns_nothing() {
        let now = Instant::now();
        let mut bucket = TokenBucket::new(Some(RATE), CAPACITY, now);
        bucket.consume(CAPACITY, now);

        bucket.pause(now + Duration::from_secs(1));
        assert!(bucket.is_paused());
        let during = bucket.available(now + Duration::from_secs(3));
        assert!((during - 1_000.0).abs() < 1e-6);

        bucket.resume(now + Duration::from_secs(3));
        let after = bucket.available(now + Duration::from_secs(4));
        assert!((after - 2_000.0).abs() < 1e-6);
    }

    #[test]
    fn test_set_rate_settles_previous_accrual() {
        let now = Instant::now();
        let mut bucket = TokenBucket::new(Some(RATE), CAPACITY, now);
        bucket.consume(CAPACITY, now);
        bucket.set_rate(Some(2 * RATE), now + Duration::from_secs(1));
        let tokens = bucket.available(now + Duration::from_secs(2));
        assert!((tokens - 3_000.0).abs() < 1e-6);
    }

    // ==================== BandwidthThrottle Tests ====================

    #[test]
    fn test_throttle_refills_with_clock() {
        let (clock, throttle) = throttle();
        assert_eq!(throttle.consume(CAPACITY), Duration::ZERO);
        assert_eq!(throttle.consume(500), Duration::from_millis(500));

        clock.advance(Duration::from_millis(1_500));
        assert_eq!(throttle.consume(1_000), Duration::ZERO);
    }

    #[test]
    fn test_concurrent_streams_share_one_rate() {
        let (_clock, throttle) = throttle();
        throttle.consume(CAPACITY);

        // Three streams asking for a second's worth each finish after 3s total.
        let delays: Vec<Duration> = (0..3).map(|_| throttle.consume(RATE)).collect();
        assert_eq!(delays.iter().max(), Some(&Duration::from_secs(3)));
        assert_eq!(throttle.metrics().throttle_events, 3);
    }

    #[test]
    fn test_throttle_metrics_track_events() {
        let (_clock, throttle) = throttle();
        throttle.consume(CAPACITY);
        throttle.consume(2_000);

        let metrics = throttle.metrics();
        assert_eq!(metrics.bytes_consumed, CAPACITY + 2_000);
        assert_eq!(metrics.immediate_passes, 1);
        assert_eq!(metrics.throttle_events, 1);
        assert_eq!(metrics.cumulative_delay_ms, 2_000);

        throttle.reset_metrics();
        assert_eq!(throttle.metrics().bytes_consumed, 0);
    }

    #[test]
    fn test_throttle_set_rate_to_unbounded() {
        let (_clock, throttle) = throttle();
        throttle.set_rate(None);
        assert_eq!(throttle.consume(CAPACITY * 10), Duration::ZERO);
        assert!(throttle.formatted_statistics().contains("unbounded"));
    }

    #[test]
    fn test_throttle_pause_and_resume() {
        let (clock, throttle) = throttle();
        throttle.consume(CAPACITY);
        throttle.pause();
        assert!(throttle.is_paused());
        clock.advance(Duration::from_secs(10));
        assert!(throttle.metrics().available_tokens.abs() < f64::EPSILON);

        throttle.resume();
        clock.advance(Duration::from_secs(1));
        assert!((throttle.metrics().available_tokens - 1_000.0).abs() < 1e-6);
    }
}
