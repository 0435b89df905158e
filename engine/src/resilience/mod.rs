//! Resilience primitives
//!
//! Shared by the execution stage and by anything else that calls out to an
//! unreliable dependency:
//!
//! - [`category`]: the failure taxonomy and the single classification function
//! - [`backoff`]: jittered exponential delays between retries
//! - [`breaker`]: the per-dependency circuit breaker state machine
//! - [`rate_limiter`]: sliding-window call limits
//! - [`guard`]: the shared gate combining breakers and rate limits

pub mod backoff;
pub mod breaker;
pub mod category;
pub mod guard;
pub mod rate_limiter;

pub use backoff::Backoff;
pub use breaker::{Admission, BreakerState, BreakerTransition, CircuitBreaker};
pub use category::{classify, ClassifiedError, ErrorCategory, RetryProfile};
pub use guard::{BreakerSnapshot, CallPermit, DependencyGuard, Rejection};
pub use rate_limiter::RateLimiter;
