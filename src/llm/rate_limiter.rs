//! Dual fixed-window quota for model calls.
//!
//! Two counters (requests and tokens) refill to full capacity once the window
//! has elapsed since their last reset. There is no proportional refill, so a
//! caller can spend a full window's quota just before the boundary and another
//! full quota just after it.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// Default admitted requests per window.
pub const DEFAULT_REQUESTS_PER_MINUTE: u32 = 60;
/// Default admitted estimated tokens per window.
pub const DEFAULT_TOKENS_PER_MINUTE: u64 = 90_000;
/// Default window length.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60);

/// Quota configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub requests_per_minute: u32,
    pub tokens_per_minute: u64,
    pub window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: DEFAULT_REQUESTS_PER_MINUTE,
            tokens_per_minute: DEFAULT_TOKENS_PER_MINUTE,
            window: DEFAULT_WINDOW,
        }
    }
}

impl RateLimitConfig {
    pub fn new(requests_per_minute: u32, tokens_per_minute: u64) -> Self {
        Self {
            requests_per_minute,
            tokens_per_minute,
            window: DEFAULT_WINDOW,
        }
    }

    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }
}

/// One fixed-window counter. `remaining` stays within `[0, capacity]`.
#[derive(Debug)]
struct Quota {
    capacity: u64,
    remaining: u64,
    last_reset: Instant,
}

impl Quota {
    fn new(capacity: u64, now: Instant) -> Self {
        Self {
            capacity,
            remaining: capacity,
            last_reset: now,
        }
    }

    fn maybe_reset(&mut self, window: Duration, now: Instant) {
        if now.saturating_duration_since(self.last_reset) >= window {
            self.remaining = self.capacity;
            self.last_reset = now;
        }
    }

    fn until_reset(&self, window: Duration, now: Instant) -> Duration {
        window.saturating_sub(now.saturating_duration_since(self.last_reset))
    }
}

#[derive(Debug)]
struct LimiterState {
    requests: Quota,
    tokens: Quota,
}

impl LimiterState {
    fn maybe_reset(&mut self, window: Duration, now: Instant) {
        self.requests.maybe_reset(window, now);
        self.tokens.maybe_reset(window, now);
    }
}

/// Point-in-time view of the limiter's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateLimitSnapshot {
    pub requests_remaining: u64,
    pub tokens_remaining: u64,
    pub requests_capacity: u64,
    pub tokens_capacity: u64,
}

/// Admission control shared by every run using the same adapter.
///
/// The check-and-decrement of both counters happens under one lock, so
/// concurrent callers can never overdraw either quota.
#[derive(Debug)]
pub struct RateLimiter {
    window: Duration,
    state: Mutex<LimiterState>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self::new_at(config, Instant::now())
    }

    /// Creates a limiter whose first window starts at `now`.
    pub fn new_at(config: RateLimitConfig, now: Instant) -> Self {
        Self {
            window: config.window,
            state: Mutex::new(LimiterState {
                requests: Quota::new(u64::from(config.requests_per_minute), now),
                tokens: Quota::new(config.tokens_per_minute, now),
            }),
        }
    }

    /// Admits one request costing `token_cost` tokens, or denies it.
    ///
    /// On admission both quotas are decremented; on denial neither is.
    pub fn can_proceed(&self, token_cost: u64) -> bool {
        self.can_proceed_at(token_cost, Instant::now())
    }

    /// [`can_proceed`](Self::can_proceed) evaluated at an explicit instant.
    pub fn can_proceed_at(&self, token_cost: u64, now: Instant) -> bool {
        let mut state = self.state.lock().expect("rate limiter lock poisoned");
        state.maybe_reset(self.window, now);

        if state.requests.remaining >= 1 && state.tokens.remaining >= token_cost {
            state.requests.remaining -= 1;
            state.tokens.remaining -= token_cost;
            true
        } else {
            tracing::debug!(
                token_cost = token_cost,
                requests_remaining = state.requests.remaining,
                tokens_remaining = state.tokens.remaining,
                "Rate limit denied request"
            );
            false
        }
    }

    /// Zero while a request slot is available, otherwise the time left until
    /// the request window resets.
    pub fn wait_time(&self) -> Duration {
        self.wait_time_at(Instant::now())
    }

    /// [`wait_time`](Self::wait_time) evaluated at an explicit instant.
    pub fn wait_time_at(&self, now: Instant) -> Duration {
        let mut state = self.state.lock().expect("rate limiter lock poisoned");
        state.maybe_reset(self.window, now);
        if state.requests.remaining >= 1 {
            Duration::ZERO
        } else {
            state.requests.until_reset(self.window, now)
        }
    }

    /// Time until a request costing `token_cost` could be admitted, taking
    /// the token quota into account as well as the request quota.
    ///
    /// A cost above the token capacity is never admitted; the full window is
    /// reported for it.
    pub fn wait_time_for(&self, token_cost: u64) -> Duration {
        let now = Instant::now();
        let mut state = self.state.lock().expect("rate limiter lock poisoned");
        state.maybe_reset(self.window, now);

        if token_cost > state.tokens.capacity {
            return self.window;
        }
        let request_wait = if state.requests.remaining >= 1 {
            Duration::ZERO
        } else {
            state.requests.until_reset(self.window, now)
        };
        let token_wait = if state.tokens.remaining >= token_cost {
            Duration::ZERO
        } else {
            state.tokens.until_reset(self.window, now)
        };
        request_wait.max(token_wait)
    }

    pub fn snapshot(&self) -> RateLimitSnapshot {
        let state = self.state.lock().expect("rate limiter lock poisoned");
        RateLimitSnapshot {
            requests_remaining: state.requests.remaining,
            tokens_remaining: state.tokens.remaining,
            requests_capacity: state.requests.capacity,
            tokens_capacity: state.tokens.capacity,
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RateLimitConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_request_quota_exhaustion() {
        let limiter = RateLimiter::new(RateLimitConfig::new(3, 1_000));
        assert!(limiter.can_proceed(10));
        assert!(limiter.can_proceed(10));
        assert!(limiter.can_proceed(10));
        assert!(!limiter.can_proceed(0));
        assert!(limiter.wait_time() > Duration::ZERO);
        assert!(limiter.wait_time() <= DEFAULT_WINDOW);
    }

    #[test]
    fn test_denial_decrements_nothing() {
        let limiter = RateLimiter::new(RateLimitConfig::new(5, 100));
        assert!(limiter.can_proceed(60));
        assert!(!limiter.can_proceed(50));

        let snapshot = limiter.snapshot();
        assert_eq!(snapshot.requests_remaining, 4);
        assert_eq!(snapshot.tokens_remaining, 40);
        assert!(limiter.can_proceed(40));
    }

    #[test]
    fn test_wait_time_zero_when_slot_available() {
        let limiter = RateLimiter::default();
        assert_eq!(limiter.wait_time(), Duration::ZERO);
        assert_eq!(limiter.wait_time_for(100), Duration::ZERO);
    }

    #[test]
    fn test_cost_above_capacity_never_admitted() {
        let limiter = RateLimiter::new(RateLimitConfig::new(10, 100));
        assert!(!limiter.can_proceed(101));
        assert_eq!(limiter.wait_time_for(101), DEFAULT_WINDOW);
    }

    #[test]
    fn test_window_boundary_allows_burst_then_full_reset() {
        let window = Duration::from_secs(60);
        let start = Instant::now();
        let limiter =
            RateLimiter::new_at(RateLimitConfig::new(2, 1_000).with_window(window), start);

        // t=0:00 and t=0:59 both land in the first window
        assert!(limiter.can_proceed_at(1, start));
        assert!(limiter.can_proceed_at(1, start + Duration::from_secs(59)));
        assert!(!limiter.can_proceed_at(1, start + Duration::from_secs(59)));
        assert_eq!(
            limiter.wait_time_at(start + Duration::from_secs(59)),
            Duration::from_secs(1)
        );

        // t=1:00 resets both quotas to exactly their capacity
        let boundary = start + window;
        assert_eq!(limiter.wait_time_at(boundary), Duration::ZERO);
        let snapshot = limiter.snapshot();
        assert_eq!(snapshot.requests_remaining, 2);
        assert_eq!(snapshot.tokens_remaining, 1_000);

        assert!(limiter.can_proceed_at(1, boundary));
        assert!(limiter.can_proceed_at(1, boundary));
        assert!(!limiter.can_proceed_at(1, boundary));
    }

    #[test]
    fn test_idle_windows_do_not_accumulate() {
        let window = Duration::from_secs(60);
        let limiter = RateLimiter::new(RateLimitConfig::new(2, 1_000).with_window(window));
        let later = Instant::now() + window * 5;
        assert!(limiter.can_proceed_at(0, later));
        assert!(limiter.can_proceed_at(0, later));
        assert!(!limiter.can_proceed_at(0, later));
    }

    #[test]
    fn test_concurrent_admission_never_overdraws() {
        let limiter = Arc::new(RateLimiter::new(RateLimitConfig::new(10, 1_000_000)));
        let handles: Vec<_> = (0..32)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                std::thread::spawn(move || limiter.can_proceed(1))
            })
            .collect();

        let admitted = handles
            .into_iter()
            .map(|h| h.join().expect("thread panicked"))
            .filter(|admitted| *admitted)
            .count();
        assert_eq!(admitted, 10);
        assert_eq!(limiter.snapshot().requests_remaining, 0);
    }
}
