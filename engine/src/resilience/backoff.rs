//! Jittered exponential backoff
//!
//! The ceiling for retry `n` (1-based) is `min(max, base * 2^(n-1))`. The
//! actual delay is drawn uniformly from a band just below the ceiling whose
//! width is `jitter` times the gap to the previous ceiling. Because the band
//! for retry `n + 1` never reaches below the ceiling of retry `n`, successive
//! delays never decrease, and they strictly increase until the cap is hit
//! whenever `jitter < 1`.

use rand::Rng;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    jitter: f64,
}

impl Backoff {
    /// `jitter` is clamped to `[0, 1]`; zero gives deterministic delays
    pub fn new(base: Duration, max: Duration, jitter: f64) -> Self {
        let jitter = if jitter.is_finite() {
            jitter.clamp(0.0, 1.0)
        } else {
            0.0
        };
        Self { base, max, jitter }
    }

    pub fn base(&self) -> Duration {
        self.base
    }

    pub fn max(&self) -> Duration {
        self.max
    }

    /// Upper bound of the delay before retry `attempt`
    pub fn ceiling(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.ceiling_ms(attempt))
    }

    /// Lower bound of the delay before retry `attempt`
    pub fn floor(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.floor_ms(attempt))
    }

    /// Delay before retry `attempt`, using the thread-local RNG
    pub fn delay(&self, attempt: u32) -> Duration {
        self.delay_with(attempt, &mut rand::thread_rng())
    }

    /// Delay before retry `attempt`, using the given RNG
    pub fn delay_with<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        let high = self.ceiling_ms(attempt);
        let low = self.floor_ms(attempt);
        if low >= high {
            return Duration::from_millis(high);
        }
        Duration::from_millis(rng.gen_range(low..=high))
    }

    fn ceiling_ms(&self, attempt: u32) -> u64 {
        let max_ms = self.max.as_millis() as u64;
        let base_ms = self.base.as_millis() as u64;
        if attempt == 0 {
            return self.ceiling_ms(1) / 2;
        }
        let factor = 1u64.checked_shl(attempt - 1).unwrap_or(u64::MAX);
        base_ms.saturating_mul(factor).min(max_ms)
    }

    fn floor_ms(&self, attempt: u32) -> u64 {
        let high = self.ceiling_ms(attempt);
        let previous = self.ceiling_ms(attempt.saturating_sub(1)).min(high);
        let band = ((high - previous) as f64 * self.jitter).round() as u64;
        high - band.min(high - previous)
    }
}
