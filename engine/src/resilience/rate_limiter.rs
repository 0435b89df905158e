//! Sliding-window rate limiting
//!
//! Tracks calls per dependency and enforces at most `max_calls` within any
//! `window`. A limit of zero disables limiting. Old timestamps are pruned on
//! every check, so memory stays bounded by `max_calls` per dependency.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Rate limiter for tracking and enforcing call limits
#[derive(Debug)]
pub struct RateLimiter {
    max_calls: u32,
    window: Duration,
    calls: HashMap<String, VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(max_calls: u32, window: Duration) -> Self {
        Self {
            max_calls,
            window,
            calls: HashMap::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.max_calls > 0 && !self.window.is_zero()
    }

    /// Check whether a call to `dependency` is allowed at `now`
    ///
    /// Returns how long to wait when the window is full. Does not record the
    /// call; see [`RateLimiter::record_at`].
    pub fn check_at(&mut self, dependency: &str, now: Instant) -> Result<(), Duration> {
        if !self.is_enabled() {
            return Ok(());
        }

        let window = self.window;
        let Some(calls) = self.calls.get_mut(dependency) else {
            return Ok(());
        };
        while calls
            .front()
            .is_some_and(|t| now.saturating_duration_since(*t) >= window)
        {
            calls.pop_front();
        }

        debug!(
            "Rate limit check for {}: {}/{} calls in window",
            dependency,
            calls.len(),
            self.max_calls
        );

        if calls.len() >= self.max_calls as usize {
            let oldest = calls.front().copied().unwrap_or(now);
            let wait = window.saturating_sub(now.saturating_duration_since(oldest));
            warn!(
                "Rate limit exceeded for {}: {}/{} calls, next slot in {:?}",
                dependency,
                calls.len(),
                self.max_calls,
                wait
            );
            return Err(wait);
        }
        Ok(())
    }

    /// Record a call to `dependency` made at `now`
    pub fn record_at(&mut self, dependency: &str, now: Instant) {
        if !self.is_enabled() {
            return;
        }
        self.calls
            .entry(dependency.to_string())
            .or_default()
            .push_back(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_limiter_allows_everything() {
        let mut limiter = RateLimiter::new(0, Duration::from_secs(60));
        let now = Instant::now();
        for _ in 0..1000 {
            assert!(limiter.check_at("svc", now).is_ok());
            limiter.record_at("svc", now);
        }
    }

    #[test]
    fn test_limit_enforced_within_window() {
        let mut limiter = RateLimiter::new(2, Duration::from_secs(60));
        let now = Instant::now();
        limiter.record_at("svc", now);
        limiter.record_at("svc", now + Duration::from_secs(10));

        let wait = limiter
            .check_at("svc", now + Duration::from_secs(20))
            .unwrap_err();
        assert_eq!(wait, Duration::from_secs(40));

        // Other dependencies are tracked separately
        assert!(limiter.check_at("other", now).is_ok());
    }

    #[test]
    fn test_window_slides() {
        let mut limiter = RateLimiter::new(1, Duration::from_secs(60));
        let now = Instant::now();
        limiter.record_at("svc", now);
        assert!(limiter.check_at("svc", now + Duration::from_secs(59)).is_err());
        assert!(limiter.check_at("svc", now + Duration::from_secs(60)).is_ok());
    }
}
