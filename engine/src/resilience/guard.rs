//! Dependency guard
//!
//! One shared gate in front of every external dependency: a circuit breaker
//! per dependency name plus an optional sliding-window rate limit. The guard
//! is `Sync` and meant to be shared across concurrent plan executions, so a
//! dependency that trips during one task stays tripped for the next.

use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use super::breaker::{Admission, BreakerState, BreakerTransition, CircuitBreaker};
use super::category::ErrorCategory;
use super::rate_limiter::RateLimiter;
use crate::config::{BreakerConfig, RateLimitConfig};
use crate::events::{EventBus, LoopEvent};

/// Why a call was not admitted
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    CircuitOpen {
        dependency: String,
        retry_in: Duration,
    },
    RateLimited {
        dependency: String,
        retry_after: Duration,
    },
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::CircuitOpen {
                dependency,
                retry_in,
            } => write!(
                f,
                "circuit open for '{}', retry in {}ms",
                dependency,
                retry_in.as_millis()
            ),
            Rejection::RateLimited {
                dependency,
                retry_after,
            } => write!(
                f,
                "rate limit reached for '{}', next slot in {}ms",
                dependency,
                retry_after.as_millis()
            ),
        }
    }
}

/// Point-in-time view of one breaker
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BreakerSnapshot {
    pub dependency: String,
    pub state: BreakerState,
    pub consecutive_failures: u32,
}

/// Admission to make one call
///
/// Settle it with [`CallPermit::succeeded`] or [`CallPermit::failed`]. A
/// half-open probe permit dropped unsettled (its call was cancelled) re-opens
/// the circuit, so the probe slot is never held forever.
#[must_use = "an unsettled probe permit re-opens the circuit"]
pub struct CallPermit<'a> {
    guard: &'a DependencyGuard,
    dependency: String,
    admission: Admission,
    admitted_at: Instant,
    settled: bool,
}

impl CallPermit<'_> {
    pub fn admission(&self) -> Admission {
        self.admission
    }

    pub fn is_probe(&self) -> bool {
        self.admission == Admission::Probe
    }

    pub fn succeeded(mut self) {
        self.settled = true;
        self.guard.record_success(&self.dependency);
    }

    pub fn failed(self, category: ErrorCategory) {
        self.failed_at(category, Instant::now());
    }

    pub fn failed_at(mut self, category: ErrorCategory, now: Instant) {
        self.settled = true;
        self.guard.record_failure_at(&self.dependency, category, now);
    }
}

impl Drop for CallPermit<'_> {
    fn drop(&mut self) {
        if !self.settled && self.is_probe() {
            let now = Instant::now().max(self.admitted_at);
            self.guard.abandon_probe(&self.dependency, now);
        }
    }
}

impl fmt::Debug for CallPermit<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallPermit")
            .field("dependency", &self.dependency)
            .field("admission", &self.admission)
            .field("settled", &self.settled)
            .finish()
    }
}

struct GuardState {
    breakers: HashMap<String, CircuitBreaker>,
    limiter: RateLimiter,
}

pub struct DependencyGuard {
    failure_threshold: u32,
    cooldown: Duration,
    state: Mutex<GuardState>,
    events: Option<Arc<EventBus>>,
}

impl DependencyGuard {
    pub fn new(breaker: &BreakerConfig, rate_limit: &RateLimitConfig) -> Self {
        Self {
            failure_threshold: breaker.failure_threshold,
            cooldown: Duration::from_millis(breaker.cooldown_ms),
            state: Mutex::new(GuardState {
                breakers: HashMap::new(),
                limiter: RateLimiter::new(
                    rate_limit.max_calls,
                    Duration::from_millis(rate_limit.window_ms),
                ),
            }),
            events: None,
        }
    }

    /// Publish breaker transitions on `bus`
    pub fn with_events(mut self, bus: Arc<EventBus>) -> Self {
        self.events = Some(bus);
        self
    }

    pub fn acquire(&self, dependency: &str) -> Result<CallPermit<'_>, Rejection> {
        self.acquire_at(dependency, Instant::now())
    }

    /// Ask to call `dependency` at `now`
    ///
    /// The rate limit is checked before the breaker so a rejected call never
    /// consumes the half-open probe.
    pub fn acquire_at(&self, dependency: &str, now: Instant) -> Result<CallPermit<'_>, Rejection> {
        let (result, transition) = {
            let mut state = self.state.lock();
            if let Err(wait) = state.limiter.check_at(dependency, now) {
                return Err(Rejection::RateLimited {
                    dependency: dependency.to_string(),
                    retry_after: wait,
                });
            }

            let breaker = self.breaker_mut(&mut state, dependency);
            let (admission, transition) = breaker.try_acquire_at(now);
            let result = match admission {
                Admission::Rejected { retry_in } => Err(Rejection::CircuitOpen {
                    dependency: dependency.to_string(),
                    retry_in,
                }),
                admitted => {
                    state.limiter.record_at(dependency, now);
                    Ok(admitted)
                }
            };
            (result, transition)
        };

        if let Some(transition) = transition {
            self.report(dependency, transition);
        }
        result.map(|admission| CallPermit {
            guard: self,
            dependency: dependency.to_string(),
            admission,
            admitted_at: now,
            settled: false,
        })
    }

    pub fn record_success(&self, dependency: &str) {
        let transition = {
            let mut state = self.state.lock();
            self.breaker_mut(&mut state, dependency).record_success()
        };
        if let Some(transition) = transition {
            self.report(dependency, transition);
        }
    }

    pub fn record_failure(&self, dependency: &str, category: ErrorCategory) {
        self.record_failure_at(dependency, category, Instant::now());
    }

    /// Record a failed call
    ///
    /// Only categories that reflect the dependency's health count toward the
    /// breaker. Any other failure still proves the dependency answered, so it
    /// resolves a pending probe as a success.
    pub fn record_failure_at(&self, dependency: &str, category: ErrorCategory, now: Instant) {
        let transition = {
            let mut state = self.state.lock();
            let breaker = self.breaker_mut(&mut state, dependency);
            if category.trips_breaker() {
                breaker.record_failure_at(now)
            } else {
                breaker.record_success()
            }
        };
        if let Some(transition) = transition {
            self.report(dependency, transition);
        }
    }

    fn abandon_probe(&self, dependency: &str, now: Instant) {
        let transition = {
            let mut state = self.state.lock();
            self.breaker_mut(&mut state, dependency)
                .abandon_probe_at(now)
        };
        if let Some(transition) = transition {
            warn!("Probe call to '{}' was abandoned; circuit re-opened", dependency);
            self.report(dependency, transition);
        }
    }

    pub fn breaker_state(&self, dependency: &str) -> BreakerState {
        self.state
            .lock()
            .breakers
            .get(dependency)
            .map(|b| b.state())
            .unwrap_or(BreakerState::Closed)
    }

    /// Every known breaker, sorted by dependency name
    pub fn snapshot(&self) -> Vec<BreakerSnapshot> {
        let state = self.state.lock();
        let mut snapshot: Vec<BreakerSnapshot> = state
            .breakers
            .iter()
            .map(|(name, breaker)| BreakerSnapshot {
                dependency: name.clone(),
                state: breaker.state(),
                consecutive_failures: breaker.consecutive_failures(),
            })
            .collect();
        snapshot.sort_by(|a, b| a.dependency.cmp(&b.dependency));
        snapshot
    }

    fn breaker_mut<'a>(
        &self,
        state: &'a mut GuardState,
        dependency: &str,
    ) -> &'a mut CircuitBreaker {
        state
            .breakers
            .entry(dependency.to_string())
            .or_insert_with(|| CircuitBreaker::new(self.failure_threshold, self.cooldown))
    }

    fn report(&self, dependency: &str, transition: BreakerTransition) {
        match transition.to {
            BreakerState::Open => warn!(
                "Circuit breaker for '{}' opened ({} -> {})",
                dependency, transition.from, transition.to
            ),
            _ => info!(
                "Circuit breaker for '{}' moved {} -> {}",
                dependency, transition.from, transition.to
            ),
        }

        if let Some(bus) = &self.events {
            bus.publish(LoopEvent::BreakerStateChanged {
                dependency: dependency.to_string(),
                from: transition.from,
                to: transition.to,
                at: Utc::now(),
            });
        }
    }
}
