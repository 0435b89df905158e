//! Failure taxonomy
//!
//! Every error a collaborator raises is mapped onto exactly one
//! [`ErrorCategory`] by [`classify`]. The category alone decides whether the
//! failure is retried, how many attempts are allowed, the base backoff delay
//! and whether the failure counts against the dependency's circuit breaker.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;
use std::time::Duration;
use weave_sdk::errors::DependencyError;

/// Closed set of failure classes
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Transient,
    Permanent,
    RateLimit,
    Authentication,
    Network,
    Validation,
    Resource,
    Service,
    Configuration,
    Unknown,
}

impl ErrorCategory {
    pub const ALL: [ErrorCategory; 10] = [
        ErrorCategory::Transient,
        ErrorCategory::Permanent,
        ErrorCategory::RateLimit,
        ErrorCategory::Authentication,
        ErrorCategory::Network,
        ErrorCategory::Validation,
        ErrorCategory::Resource,
        ErrorCategory::Service,
        ErrorCategory::Configuration,
        ErrorCategory::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Transient => "transient",
            ErrorCategory::Permanent => "permanent",
            ErrorCategory::RateLimit => "rate_limit",
            ErrorCategory::Authentication => "authentication",
            ErrorCategory::Network => "network",
            ErrorCategory::Validation => "validation",
            ErrorCategory::Resource => "resource",
            ErrorCategory::Service => "service",
            ErrorCategory::Configuration => "configuration",
            ErrorCategory::Unknown => "unknown",
        }
    }

    /// Built-in retry behavior for this category
    pub fn default_profile(&self) -> RetryProfile {
        let (retryable, max_attempts, base_ms) = match self {
            ErrorCategory::Transient => (true, 3, 1_000),
            ErrorCategory::RateLimit => (true, 5, 5_000),
            ErrorCategory::Network => (true, 3, 1_000),
            ErrorCategory::Service => (true, 3, 2_000),
            ErrorCategory::Resource => (true, 2, 5_000),
            ErrorCategory::Unknown => (true, 2, 1_000),
            ErrorCategory::Permanent
            | ErrorCategory::Authentication
            | ErrorCategory::Validation
            | ErrorCategory::Configuration => (false, 1, 0),
        };
        RetryProfile {
            retryable,
            max_attempts,
            base_delay: Duration::from_millis(base_ms),
        }
    }

    /// Whether a failure of this kind says something about the dependency's
    /// health. Caller-side mistakes do not.
    pub fn trips_breaker(&self) -> bool {
        matches!(
            self,
            ErrorCategory::Transient
                | ErrorCategory::Network
                | ErrorCategory::Service
                | ErrorCategory::RateLimit
                | ErrorCategory::Resource
                | ErrorCategory::Unknown
        )
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Retry behavior attached to a category
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryProfile {
    pub retryable: bool,
    /// Total attempts including the first
    pub max_attempts: u32,
    pub base_delay: Duration,
}

/// An error after classification
#[derive(Debug, Clone, PartialEq)]
pub struct ClassifiedError {
    pub category: ErrorCategory,
    pub message: String,
    /// Server-provided wait hint, only for rate limits
    pub retry_after: Option<Duration>,
}

impl fmt::Display for ClassifiedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.category, self.message)
    }
}

/// Map a collaborator error onto the taxonomy
///
/// This is the only place categories are decided. Typed variants map
/// directly; free-form `Other` messages are matched against known patterns
/// and fall back to `Unknown`.
pub fn classify(error: &DependencyError) -> ClassifiedError {
    let category = match error {
        DependencyError::Timeout(_) | DependencyError::Transient(_) => ErrorCategory::Transient,
        DependencyError::RateLimited { .. } => ErrorCategory::RateLimit,
        DependencyError::Unauthorized(_) => ErrorCategory::Authentication,
        DependencyError::Network(_) => ErrorCategory::Network,
        DependencyError::Invalid(_) => ErrorCategory::Validation,
        DependencyError::ResourceExhausted(_) => ErrorCategory::Resource,
        DependencyError::Unavailable(_) => ErrorCategory::Service,
        DependencyError::Misconfigured(_) => ErrorCategory::Configuration,
        DependencyError::Rejected(_) => ErrorCategory::Permanent,
        DependencyError::Other(message) => classify_message(message),
    };

    let retry_after = match error {
        DependencyError::RateLimited {
            retry_after_ms: Some(ms),
            ..
        } => Some(Duration::from_millis(*ms)),
        _ => None,
    };

    ClassifiedError {
        category,
        message: error.message().to_string(),
        retry_after,
    }
}

fn message_patterns() -> &'static [(Regex, ErrorCategory)] {
    static PATTERNS: OnceLock<Vec<(Regex, ErrorCategory)>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        // Order matters: the first matching pattern wins.
        [
            (
                r"\b429\b|rate.?limit|too many requests|quota",
                ErrorCategory::RateLimit,
            ),
            (
                r"\b40[13]\b|unauthori[sz]ed|forbidden|api key|authenticat|expired token",
                ErrorCategory::Authentication,
            ),
            (
                r"timed? ?out|etimedout|deadline exceeded|temporar",
                ErrorCategory::Transient,
            ),
            (
                r"connection (reset|refused|closed)|econn|enotfound|dns|network|socket|broken pipe",
                ErrorCategory::Network,
            ),
            (
                r"\b50[0234]\b|unavailable|bad gateway|internal server error|overloaded",
                ErrorCategory::Service,
            ),
            (
                r"out of memory|enomem|no space|disk full|too large|resource",
                ErrorCategory::Resource,
            ),
            (
                r"\b400\b|\b422\b|invalid|validation|malformed|bad request|schema",
                ErrorCategory::Validation,
            ),
            (
                r"not configured|missing (config|setting|env)|configuration",
                ErrorCategory::Configuration,
            ),
            (
                r"\b404\b|not found|unsupported|permission denied|not allowed",
                ErrorCategory::Permanent,
            ),
        ]
        .into_iter()
        .filter_map(|(pattern, category)| {
            Regex::new(&format!("(?i){}", pattern))
                .ok()
                .map(|re| (re, category))
        })
        .collect()
    })
}

fn classify_message(message: &str) -> ErrorCategory {
    message_patterns()
        .iter()
        .find(|(re, _)| re.is_match(message))
        .map(|(_, category)| *category)
        .unwrap_or(ErrorCategory::Unknown)
}
