//! Per-client token-bucket rate limiter.
//!
//! Pure in-memory computation over caller-supplied instants, so the exact
//! refill and cooldown arithmetic is testable against a virtual clock. The
//! one internal mutex is never held across an await (there are none).
//!
//! Semantics per request: refill first (clamped to capacity), then consume
//! one token if available; otherwise start a cooldown and reject. While the
//! cooldown runs, requests are rejected outright without refilling, so a
//! client hammering the socket cannot earn tokens back early.

use std::collections::HashMap;
use std::ops::{Add, Sub};
use std::sync::Mutex;
use std::time::Duration;

use crate::error::IpcError;

/// Rate limiter tunables.
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimiterConfig {
    /// Sustained budget: requests allowed per window.
    pub max_requests_per_window: u32,
    /// Window length.
    pub window: Duration,
    /// Extra burst capacity on top of the sustained budget.
    pub burst_allowance: u32,
    /// Cooldown imposed when the bucket runs dry.
    pub cooldown: Duration,
}

impl RateLimiterConfig {
    /// Production defaults: 60/min sustained, small burst, 5 s cooldown.
    #[must_use]
    pub fn production() -> Self {
        Self {
            max_requests_per_window: 60,
            window: Duration::from_secs(60),
            burst_allowance: 10,
            cooldown: Duration::from_secs(5),
        }
    }

    /// Development defaults: generous budget, 1 s cooldown.
    #[must_use]
    pub fn development() -> Self {
        Self {
            max_requests_per_window: 600,
            window: Duration::from_secs(60),
            burst_allowance: 100,
            cooldown: Duration::from_secs(1),
        }
    }

    fn capacity(&self) -> f64 {
        f64::from(self.max_requests_per_window) + f64::from(self.burst_allowance)
    }

    fn refill_per_second(&self) -> f64 {
        f64::from(self.max_requests_per_window) / self.window.as_secs_f64()
    }
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self::production()
    }
}

/// Counters exposed for observability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimiterMetrics {
    /// Clients with a live bucket.
    pub active_clients: usize,
    /// Clients currently serving a cooldown.
    pub clients_in_cooldown: usize,
}

struct Bucket<I> {
    tokens: f64,
    last_refill: I,
    cooldown_until: Option<I>,
}

/// Token-bucket limiter keyed by client id.
///
/// Generic over the instant type; production passes `Environment::now()`
/// values, tests pass virtual instants.
pub struct RateLimiter<I> {
    config: RateLimiterConfig,
    buckets: Mutex<HashMap<u64, Bucket<I>>>,
}

impl<I> RateLimiter<I>
where
    I: Copy + Ord + Sub<Output = Duration> + Add<Duration, Output = I>,
{
    /// Limiter with the given tunables.
    #[must_use]
    pub fn new(config: RateLimiterConfig) -> Self {
        Self { config, buckets: Mutex::new(HashMap::new()) }
    }

    /// Admit or reject one request from `client` at time `now`.
    ///
    /// # Errors
    ///
    /// - [`IpcError::Throttled`] with a positive `retry_after` when the
    ///   bucket is dry or a cooldown is running.
    pub fn check_request(&self, client: u64, now: I) -> Result<(), IpcError> {
        let mut buckets = self.lock();
        let bucket = buckets.entry(client).or_insert_with(|| Bucket {
            tokens: self.config.capacity(),
            last_refill: now,
            cooldown_until: None,
        });

        if let Some(until) = bucket.cooldown_until {
            if now < until {
                // No refill while cooling down.
                return Err(IpcError::Throttled { retry_after: until - now });
            }
            // Cooldown served: grant a single probe token so the client can
            // resume right away instead of waiting out a full refill
            // interval on top of the cooldown.
            bucket.cooldown_until = None;
            bucket.tokens = bucket.tokens.max(1.0);
            bucket.last_refill = now;
        }

        // Refill first, clamped to capacity.
        let elapsed = now - bucket.last_refill;
        bucket.tokens = (bucket.tokens + elapsed.as_secs_f64() * self.config.refill_per_second())
            .min(self.config.capacity());
        bucket.last_refill = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            Ok(())
        } else {
            bucket.cooldown_until = Some(now + self.config.cooldown);
            tracing::debug!(client, cooldown_secs = self.config.cooldown.as_secs_f64(), "client throttled");
            Err(IpcError::Throttled { retry_after: self.config.cooldown })
        }
    }

    /// Observability counters at time `now`.
    #[must_use]
    pub fn metrics(&self, now: I) -> RateLimiterMetrics {
        let buckets = self.lock();
        RateLimiterMetrics {
            active_clients: buckets.len(),
            clients_in_cooldown: buckets
                .values()
                .filter(|b| b.cooldown_until.is_some_and(|until| until > now))
                .count(),
        }
    }

    /// Drop buckets idle for longer than `older_than`.
    pub fn prune_stale_clients(&self, older_than: Duration, now: I) {
        let mut buckets = self.lock();
        buckets.retain(|_, bucket| now - bucket.last_refill <= older_than);
    }

    /// Forget one client entirely (connection closed).
    pub fn remove_client(&self, client: u64) {
        self.lock().remove(&client);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<u64, Bucket<I>>> {
        #[allow(clippy::expect_used)]
        self.buckets.lock().expect("rate limiter lock poisoned")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Virtual instant: nanoseconds from an arbitrary origin.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
    struct TestInstant(u64);

    impl Sub for TestInstant {
        type Output = Duration;

        fn sub(self, rhs: Self) -> Duration {
            Duration::from_nanos(self.0 - rhs.0)
        }
    }

    impl Add<Duration> for TestInstant {
        type Output = Self;

        fn add(self, rhs: Duration) -> Self {
            Self(self.0 + rhs.subsec_nanos() as u64 + rhs.as_secs() * 1_000_000_000)
        }
    }

    fn t(seconds: f64) -> TestInstant {
        TestInstant((seconds * 1e9) as u64)
    }

    fn scenario_config() -> RateLimiterConfig {
        RateLimiterConfig {
            max_requests_per_window: 3,
            window: Duration::from_secs(60),
            burst_allowance: 2,
            cooldown: Duration::from_secs(1),
        }
    }

    #[test]
    fn burst_capacity_then_throttle() {
        let limiter = RateLimiter::new(scenario_config());

        // Capacity = max + burst = 5 instant requests.
        for i in 0..5 {
            limiter.check_request(1, t(0.0)).unwrap_or_else(|e| panic!("request {i}: {e}"));
        }

        let err = limiter.check_request(1, t(0.0)).unwrap_err();
        match err {
            IpcError::Throttled { retry_after } => {
                assert!(retry_after > Duration::ZERO);
                assert_eq!(retry_after, Duration::from_secs(1));
            },
            other => panic!("expected Throttled, got {other:?}"),
        }
    }

    #[test]
    fn recovery_after_cooldown() {
        let limiter = RateLimiter::new(scenario_config());

        for _ in 0..5 {
            limiter.check_request(1, t(0.0)).unwrap();
        }
        assert!(limiter.check_request(1, t(0.0)).is_err());

        // 1.1 s later the cooldown has been served; the probe token lets
        // the client resume immediately.
        limiter.check_request(1, t(1.1)).unwrap();

        // The probe is one token, not a refilled bucket.
        assert!(limiter.check_request(1, t(1.1)).is_err());
    }

    #[test]
    fn sleeping_out_the_refill_interval_succeeds_immediately() {
        let limiter = RateLimiter::new(scenario_config());
        for _ in 0..5 {
            limiter.check_request(1, t(0.0)).unwrap();
        }
        assert!(limiter.check_request(1, t(0.0)).is_err());

        // One token refills every window/max = 20 s.
        limiter.check_request(1, t(21.0)).unwrap();
    }

    #[test]
    fn cooldown_rejects_without_refilling() {
        let limiter = RateLimiter::new(scenario_config());
        for _ in 0..5 {
            limiter.check_request(1, t(0.0)).unwrap();
        }
        assert!(limiter.check_request(1, t(0.0)).is_err());

        // Mid-cooldown requests are rejected with the remaining time.
        let err = limiter.check_request(1, t(0.5)).unwrap_err();
        assert_eq!(err, IpcError::Throttled { retry_after: Duration::from_millis(500) });
    }

    #[test]
    fn clients_are_isolated() {
        let limiter = RateLimiter::new(scenario_config());
        for _ in 0..5 {
            limiter.check_request(1, t(0.0)).unwrap();
        }
        assert!(limiter.check_request(1, t(0.0)).is_err());

        // A different client still has a full bucket.
        limiter.check_request(2, t(0.0)).unwrap();
    }

    #[test]
    fn refill_clamps_at_capacity() {
        let limiter = RateLimiter::new(scenario_config());
        limiter.check_request(1, t(0.0)).unwrap();

        // An hour later the bucket is full again, not overflowing: exactly
        // capacity instant requests succeed.
        for _ in 0..5 {
            limiter.check_request(1, t(3600.0)).unwrap();
        }
        assert!(limiter.check_request(1, t(3600.0)).is_err());
    }

    #[test]
    fn metrics_report_active_and_cooling() {
        let limiter = RateLimiter::new(scenario_config());
        limiter.check_request(1, t(0.0)).unwrap();
        for _ in 0..5 {
            let _ = limiter.check_request(2, t(0.0));
        }
        let _ = limiter.check_request(2, t(0.0)); // trips cooldown

        let metrics = limiter.metrics(t(0.5));
        assert_eq!(metrics.active_clients, 2);
        assert_eq!(metrics.clients_in_cooldown, 1);

        // After the cooldown has passed it is no longer counted.
        let metrics = limiter.metrics(t(10.0));
        assert_eq!(metrics.clients_in_cooldown, 0);
    }

    #[test]
    fn prune_drops_idle_buckets() {
        let limiter = RateLimiter::new(scenario_config());
        limiter.check_request(1, t(0.0)).unwrap();
        limiter.check_request(2, t(100.0)).unwrap();

        limiter.prune_stale_clients(Duration::from_secs(60), t(120.0));

        let metrics = limiter.metrics(t(120.0));
        assert_eq!(metrics.active_clients, 1);
    }

    #[test]
    fn token_accounting_is_exact() {
        let limiter = RateLimiter::new(scenario_config());

        // Each success consumes exactly one token: after capacity - 1
        // successes at t=0, one remains; a request at the same instant
        // still succeeds, the next fails.
        for _ in 0..4 {
            limiter.check_request(1, t(0.0)).unwrap();
        }
        limiter.check_request(1, t(0.0)).unwrap();
        assert!(limiter.check_request(1, t(0.0)).is_err());
    }
}
