//! Failure-isolation circuit breaker, shared by archive source strategies and
//! extraction tiers.
//!
//! State machine: Closed → Open → HalfOpen → Closed. While open, calls are
//! rejected without invoking the operation until the reopen deadline passes;
//! half-open admits exactly one probe at a time. The reopen timeout doubles
//! each consecutive open cycle up to `max_timeout`.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half_open"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures (or failures within the sliding window) that trip
    /// the breaker open.
    pub failure_threshold: u32,
    /// Consecutive half-open probe successes required to close.
    pub success_threshold: u32,
    /// Reopen timeout for the first open cycle.
    pub base_timeout: Duration,
    /// Cap for the doubled reopen timeout.
    pub max_timeout: Duration,
    /// Double the reopen timeout each consecutive open cycle.
    pub exponential_backoff: bool,
    /// 0 disables the window and uses consecutive-failure counting.
    pub sliding_window_size: usize,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            base_timeout: Duration::from_secs(30),
            max_timeout: Duration::from_secs(600),
            exponential_backoff: true,
            sliding_window_size: 0,
        }
    }
}

/// Monotonic time source. Injectable so breaker tests never sleep.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Manually advanced clock for tests.
pub struct ManualClock {
    start: Instant,
    offset: Mutex<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }

    pub fn advance(&self, by: Duration) {
        *self.offset.lock().unwrap() += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.start + *self.offset.lock().unwrap()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CircuitStatus {
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub next_probe_at: Option<DateTime<Utc>>,
}

struct Inner {
    state: CircuitState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    window: VecDeque<bool>,
    /// Consecutive open cycles without an intervening close; drives doubling.
    open_cycles: u32,
    reopen_deadline: Option<Instant>,
    probe_in_flight: bool,
    last_failure_at: Option<DateTime<Utc>>,
    next_probe_at: Option<DateTime<Utc>>,
}

/// Shared breaker state. Clone-cheap via `Arc`, safe under concurrent access.
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
    inner: Mutex<Inner>,
}

/// Admission token returned by [`CircuitBreaker::acquire`]. Record the outcome
/// with [`Permit::record`]; dropping an unresolved probe permit releases the
/// half-open slot without counting either way (cancellation path).
pub struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    probe: bool,
    resolved: bool,
}

impl Permit<'_> {
    pub fn record(mut self, success: bool) {
        self.resolved = true;
        if success {
            self.breaker.on_success(self.probe);
        } else {
            self.breaker.on_failure(self.probe);
        }
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if !self.resolved && self.probe {
            let mut inner = self.breaker.inner.lock().unwrap();
            inner.probe_in_flight = false;
        }
    }
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self::with_clock(name, config, Arc::new(SystemClock))
    }

    pub fn with_clock(
        name: impl Into<String>,
        config: CircuitBreakerConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            name: name.into(),
            config,
            clock,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                consecutive_successes: 0,
                window: VecDeque::new(),
                open_cycles: 0,
                reopen_deadline: None,
                probe_in_flight: false,
                last_failure_at: None,
                next_probe_at: None,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Admit a call, or refuse because the circuit is open (or a half-open
    /// probe is already in flight).
    pub fn acquire(&self) -> Result<Permit<'_>, ()> {
        let now = self.clock.now();
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            CircuitState::Closed => Ok(Permit {
                breaker: self,
                probe: false,
                resolved: false,
            }),
            CircuitState::Open => {
                let deadline = inner.reopen_deadline.expect("open circuit has a deadline");
                if now < deadline {
                    return Err(());
                }
                inner.state = CircuitState::HalfOpen;
                inner.probe_in_flight = true;
                inner.consecutive_successes = 0;
                tracing::debug!(breaker = %self.name, "Circuit half-open, admitting probe");
                Ok(Permit {
                    breaker: self,
                    probe: true,
                    resolved: false,
                })
            }
            CircuitState::HalfOpen => {
                if inner.probe_in_flight {
                    return Err(());
                }
                inner.probe_in_flight = true;
                Ok(Permit {
                    breaker: self,
                    probe: true,
                    resolved: false,
                })
            }
        }
    }

    /// Run `op` under the breaker. `counts_as_failure` decides which errors
    /// feed failure accounting; other errors (and cancellations, by dropping
    /// the permit) leave the breaker state untouched.
    pub async fn execute<T, E, Fut>(
        &self,
        op: Fut,
        counts_as_failure: impl Fn(&E) -> bool,
    ) -> Result<Result<T, E>, ()>
    where
        Fut: Future<Output = Result<T, E>>,
    {
        let permit = self.acquire()?;
        let result = op.await;
        match &result {
            Ok(_) => permit.record(true),
            Err(e) if counts_as_failure(e) => permit.record(false),
            Err(_) => permit.record(true),
        }
        Ok(result)
    }

    pub fn status(&self) -> CircuitStatus {
        let inner = self.inner.lock().unwrap();
        CircuitStatus {
            state: inner.state,
            failure_count: inner.consecutive_failures,
            success_count: inner.consecutive_successes,
            last_failure_at: inner.last_failure_at,
            next_probe_at: inner.next_probe_at,
        }
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().unwrap().state
    }

    /// Force closed and clear all accounting.
    pub fn reset(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.state = CircuitState::Closed;
        inner.consecutive_failures = 0;
        inner.consecutive_successes = 0;
        inner.window.clear();
        inner.open_cycles = 0;
        inner.reopen_deadline = None;
        inner.probe_in_flight = false;
        inner.next_probe_at = None;
    }

    fn on_success(&self, probe: bool) {
        let mut inner = self.inner.lock().unwrap();
        if probe {
            inner.probe_in_flight = false;
            inner.consecutive_successes += 1;
            if inner.consecutive_successes >= self.config.success_threshold {
                tracing::info!(breaker = %self.name, "Circuit closed after successful probes");
                inner.state = CircuitState::Closed;
                inner.consecutive_failures = 0;
                inner.consecutive_successes = 0;
                inner.window.clear();
                inner.open_cycles = 0;
                inner.reopen_deadline = None;
                inner.next_probe_at = None;
            }
            return;
        }
        inner.consecutive_failures = 0;
        self.push_outcome(&mut inner, true);
    }

    fn on_failure(&self, probe: bool) {
        let now = self.clock.now();
        let mut inner = self.inner.lock().unwrap();
        inner.last_failure_at = Some(Utc::now());
        if probe {
            inner.probe_in_flight = false;
            inner.consecutive_successes = 0;
            self.open(&mut inner, now);
            return;
        }
        inner.consecutive_failures += 1;
        self.push_outcome(&mut inner, false);
        if self.tripped(&inner) {
            self.open(&mut inner, now);
        }
    }

    fn push_outcome(&self, inner: &mut Inner, success: bool) {
        if self.config.sliding_window_size == 0 {
            return;
        }
        inner.window.push_back(success);
        while inner.window.len() > self.config.sliding_window_size {
            inner.window.pop_front();
        }
    }

    fn tripped(&self, inner: &Inner) -> bool {
        if self.config.sliding_window_size > 0 {
            let failures = inner.window.iter().filter(|ok| !**ok).count() as u32;
            inner.window.len() >= self.config.sliding_window_size
                && failures >= self.config.failure_threshold
        } else {
            inner.consecutive_failures >= self.config.failure_threshold
        }
    }

    fn open(&self, inner: &mut Inner, now: Instant) {
        inner.open_cycles += 1;
        let timeout = self.reopen_timeout(inner.open_cycles);
        inner.state = CircuitState::Open;
        inner.reopen_deadline = Some(now + timeout);
        inner.next_probe_at =
            Some(Utc::now() + chrono::Duration::from_std(timeout).unwrap_or_default());
        tracing::warn!(
            breaker = %self.name,
            open_cycle = inner.open_cycles,
            timeout_secs = timeout.as_secs_f64(),
            "Circuit opened"
        );
    }

    fn reopen_timeout(&self, open_cycle: u32) -> Duration {
        if !self.config.exponential_backoff || open_cycle <= 1 {
            return self.config.base_timeout.min(self.config.max_timeout);
        }
        let factor = 2u32.saturating_pow(open_cycle.saturating_sub(1).min(16));
        (self.config.base_timeout * factor).min(self.config.max_timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(clock: Arc<ManualClock>) -> CircuitBreaker {
        CircuitBreaker::with_clock(
            "test",
            CircuitBreakerConfig {
                failure_threshold: 3,
                success_threshold: 2,
                base_timeout: Duration::from_secs(10),
                max_timeout: Duration::from_secs(40),
                exponential_backoff: true,
                sliding_window_size: 0,
            },
            clock,
        )
    }

    fn fail(cb: &CircuitBreaker) {
        cb.acquire().expect("admitted").record(false);
    }

    fn succeed(cb: &CircuitBreaker) {
        cb.acquire().expect("admitted").record(true);
    }

    #[test]
    fn opens_after_threshold_and_blocks_without_invoking() {
        let clock = Arc::new(ManualClock::new());
        let cb = breaker(clock.clone());

        fail(&cb);
        fail(&cb);
        assert_eq!(cb.state(), CircuitState::Closed);
        fail(&cb);
        assert_eq!(cb.state(), CircuitState::Open);

        // Within base_timeout: rejected, no permit issued.
        clock.advance(Duration::from_secs(5));
        assert!(cb.acquire().is_err());
    }

    #[test]
    fn admits_exactly_one_probe_after_timeout() {
        let clock = Arc::new(ManualClock::new());
        let cb = breaker(clock.clone());
        for _ in 0..3 {
            fail(&cb);
        }

        clock.advance(Duration::from_secs(10));
        let probe = cb.acquire().expect("probe admitted");
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        // Concurrent probe rejected.
        assert!(cb.acquire().is_err());
        probe.record(true);

        // success_threshold=2: still half-open, next probe allowed.
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        succeed(&cb);
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn reopen_timeout_doubles_per_cycle_up_to_max() {
        let clock = Arc::new(ManualClock::new());
        let cb = breaker(clock.clone());

        // Cycle 1: base_timeout = 10s.
        for _ in 0..3 {
            fail(&cb);
        }
        clock.advance(Duration::from_secs(10));
        cb.acquire().expect("probe").record(false);
        assert_eq!(cb.state(), CircuitState::Open);

        // Cycle 2: 20s. Not yet reopened at 10s.
        clock.advance(Duration::from_secs(10));
        assert!(cb.acquire().is_err());
        clock.advance(Duration::from_secs(10));
        cb.acquire().expect("probe").record(false);

        // Cycle 3: 40s (capped). Cycle 4 would also be 40s.
        clock.advance(Duration::from_secs(39));
        assert!(cb.acquire().is_err());
        clock.advance(Duration::from_secs(1));
        cb.acquire().expect("probe").record(false);
        clock.advance(Duration::from_secs(40));
        assert!(cb.acquire().is_ok());
    }

    #[test]
    fn dropped_probe_releases_slot_without_counting() {
        let clock = Arc::new(ManualClock::new());
        let cb = breaker(clock.clone());
        for _ in 0..3 {
            fail(&cb);
        }
        clock.advance(Duration::from_secs(10));

        {
            let _probe = cb.acquire().expect("probe");
            // Cancelled mid-flight: dropped unresolved.
        }
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        // Slot is free again.
        assert!(cb.acquire().is_ok());
    }

    #[test]
    fn success_resets_consecutive_failures() {
        let clock = Arc::new(ManualClock::new());
        let cb = breaker(clock);
        fail(&cb);
        fail(&cb);
        succeed(&cb);
        fail(&cb);
        fail(&cb);
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn sliding_window_rate_trips() {
        let clock = Arc::new(ManualClock::new());
        let cb = CircuitBreaker::with_clock(
            "windowed",
            CircuitBreakerConfig {
                failure_threshold: 3,
                success_threshold: 1,
                base_timeout: Duration::from_secs(10),
                max_timeout: Duration::from_secs(40),
                exponential_backoff: false,
                sliding_window_size: 5,
            },
            clock,
        );
        // Interleaved failures never consecutive, but 3-of-5 trips.
        fail(&cb);
        succeed(&cb);
        fail(&cb);
        succeed(&cb);
        fail(&cb);
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[test]
    fn reset_forces_closed() {
        let clock = Arc::new(ManualClock::new());
        let cb = breaker(clock);
        for _ in 0..3 {
            fail(&cb);
        }
        assert_eq!(cb.state(), CircuitState::Open);
        cb.reset();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.acquire().is_ok());
    }
}
