//! Circuit breaker for the completion endpoint
//!
//! After a run of consecutive failures the breaker opens and rejects calls
//! immediately instead of hammering a struggling service. Once the cooldown
//! elapses it lets one probe through (half-open); a success closes it again.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    /// Normal operation
    Closed,
    /// Rejecting calls until the cooldown elapses
    Open,
    /// Cooldown elapsed, one probe call allowed
    HalfOpen,
}

/// Consecutive-failure circuit breaker
///
/// State is held per gateway client, not process-wide.
pub struct CircuitBreaker {
    consecutive_failures: AtomicU32,
    last_failure_ms: AtomicU64,
    threshold: u32,
    cooldown: Duration,
}

const DEFAULT_THRESHOLD: u32 = 3;
const DEFAULT_COOLDOWN_SECS: u64 = 60;

impl CircuitBreaker {
    /// `threshold` consecutive failures open the circuit for `cooldown_secs`
    pub fn new(threshold: u32, cooldown_secs: u64) -> Self {
        Self {
            consecutive_failures: AtomicU32::new(0),
            last_failure_ms: AtomicU64::new(0),
            threshold,
            cooldown: Duration::from_secs(cooldown_secs),
        }
    }

    pub fn state(&self) -> BreakerState {
        if self.consecutive_failures.load(Ordering::Relaxed) < self.threshold {
            return BreakerState::Closed;
        }
        if self.elapsed_since_failure() >= self.cooldown {
            BreakerState::HalfOpen
        } else {
            BreakerState::Open
        }
    }

    /// Whether a call may proceed right now
    pub fn allow(&self) -> bool {
        self.state() != BreakerState::Open
    }

    /// Milliseconds until the next probe is allowed (0 if allowed now)
    pub fn retry_after_ms(&self) -> u64 {
        match self.state() {
            BreakerState::Open => {
                let elapsed = self.elapsed_since_failure();
                self.cooldown.as_millis().saturating_sub(elapsed.as_millis()) as u64
            }
            _ => 0,
        }
    }

    pub fn on_success(&self) {
        self.consecutive_failures.store(0, Ordering::Relaxed);
    }

    pub fn on_failure(&self) {
        self.consecutive_failures.fetch_add(1, Ordering::Relaxed);
        self.last_failure_ms.store(now_ms(), Ordering::Relaxed);
    }

    pub fn failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Relaxed)
    }

    fn elapsed_since_failure(&self) -> Duration {
        let last = self.last_failure_ms.load(Ordering::Relaxed);
        Duration::from_millis(now_ms().saturating_sub(last))
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(DEFAULT_THRESHOLD, DEFAULT_COOLDOWN_SECS)
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
