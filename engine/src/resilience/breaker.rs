//! Per-dependency circuit breaker
//!
//! Closed → Open after `failure_threshold` consecutive counted failures.
//! Open rejects every call until `cooldown` has elapsed, then admits exactly
//! one probe (HalfOpen). The probe's result closes or re-opens the circuit;
//! a probe that never reports back re-opens it as well.
//!
//! All methods take the current instant explicitly so the state machine is
//! deterministic under test.

use serde::Serialize;
use std::fmt;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for BreakerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BreakerState::Closed => "closed",
            BreakerState::Open => "open",
            BreakerState::HalfOpen => "half_open",
        };
        f.write_str(s)
    }
}

/// A state change, reported so callers can log and publish it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerTransition {
    pub from: BreakerState,
    pub to: BreakerState,
}

/// Whether a call may proceed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Allowed,
    /// The single trial call of the half-open state
    Probe,
    Rejected {
        retry_in: Duration,
    },
}

#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    failure_threshold: u32,
    cooldown: Duration,
    state: BreakerState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            failure_threshold: failure_threshold.max(1),
            cooldown,
            state: BreakerState::Closed,
            consecutive_failures: 0,
            opened_at: None,
            probe_in_flight: false,
        }
    }

    pub fn state(&self) -> BreakerState {
        self.state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Ask to make a call at `now`
    pub fn try_acquire_at(&mut self, now: Instant) -> (Admission, Option<BreakerTransition>) {
        match self.state {
            BreakerState::Closed => (Admission::Allowed, None),
            BreakerState::Open => {
                let opened_at = self.opened_at.unwrap_or(now);
                let elapsed = now.saturating_duration_since(opened_at);
                if elapsed >= self.cooldown {
                    self.probe_in_flight = true;
                    let transition = self.move_to(BreakerState::HalfOpen);
                    (Admission::Probe, transition)
                } else {
                    (
                        Admission::Rejected {
                            retry_in: self.cooldown - elapsed,
                        },
                        None,
                    )
                }
            }
            BreakerState::HalfOpen => {
                if self.probe_in_flight {
                    (
                        Admission::Rejected {
                            retry_in: Duration::ZERO,
                        },
                        None,
                    )
                } else {
                    self.probe_in_flight = true;
                    (Admission::Probe, None)
                }
            }
        }
    }

    pub fn record_success(&mut self) -> Option<BreakerTransition> {
        self.consecutive_failures = 0;
        match self.state {
            BreakerState::HalfOpen => {
                self.probe_in_flight = false;
                self.opened_at = None;
                self.move_to(BreakerState::Closed)
            }
            // A late success from a call admitted before the circuit opened
            // does not shorten the cooldown.
            BreakerState::Closed | BreakerState::Open => None,
        }
    }

    pub fn record_failure_at(&mut self, now: Instant) -> Option<BreakerTransition> {
        match self.state {
            BreakerState::Closed => {
                self.consecutive_failures = self.consecutive_failures.saturating_add(1);
                if self.consecutive_failures >= self.failure_threshold {
                    self.opened_at = Some(now);
                    self.move_to(BreakerState::Open)
                } else {
                    None
                }
            }
            BreakerState::HalfOpen => {
                self.probe_in_flight = false;
                self.consecutive_failures = self.consecutive_failures.saturating_add(1);
                self.opened_at = Some(now);
                self.move_to(BreakerState::Open)
            }
            BreakerState::Open => None,
        }
    }

    /// The probe admitted in half-open never reported back (its call was
    /// cancelled). Re-open with a fresh cooldown so a later call can probe.
    pub fn abandon_probe_at(&mut self, now: Instant) -> Option<BreakerTransition> {
        if self.state != BreakerState::HalfOpen || !self.probe_in_flight {
            return None;
        }
        self.probe_in_flight = false;
        self.opened_at = Some(now);
        self.move_to(BreakerState::Open)
    }

    fn move_to(&mut self, to: BreakerState) -> Option<BreakerTransition> {
        let from = self.state;
        if from == to {
            return None;
        }
        self.state = to;
        Some(BreakerTransition { from, to })
    }
}
