//! Error types and handling
//!
//! This module provides the error types raised by collaborators the loop
//! calls into: context sources, step executors and memory stores. They are
//! deliberately coarse; the engine maps each one onto its own failure
//! taxonomy through a single classification function, so collaborators only
//! need to pick the closest variant.
//!
//! All errors implement the `WeaveErrorExt` trait which provides user-friendly
//! hints and indicates whether errors are recoverable.

use thiserror::Error;

/// Trait for Weave error extensions
///
/// This trait provides additional context for errors, including user-friendly
/// hints and recoverability information.
pub trait WeaveErrorExt {
    /// Returns a user-friendly hint for the error
    fn user_hint(&self) -> &str;

    /// Returns whether the error is recoverable
    ///
    /// Recoverable errors can be retried or worked around. Non-recoverable
    /// errors typically require a change of input or configuration.
    fn is_recoverable(&self) -> bool;
}

/// Error raised by an injected collaborator (step executor, context source)
///
/// # Examples
///
/// ```
/// use weave_sdk::errors::{DependencyError, WeaveErrorExt};
///
/// let error = DependencyError::Network("connection reset".to_string());
/// assert!(error.is_recoverable());
///
/// let fatal = DependencyError::Unauthorized("token revoked".to_string());
/// assert!(!fatal.is_recoverable());
/// ```
#[derive(Debug, Clone, Error, PartialEq)]
pub enum DependencyError {
    #[error("Operation timed out: {0}")]
    Timeout(String),

    #[error("Rate limited: {message}")]
    RateLimited {
        message: String,
        retry_after_ms: Option<u64>,
    },

    #[error("Authentication failed: {0}")]
    Unauthorized(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid input: {0}")]
    Invalid(String),

    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Misconfigured: {0}")]
    Misconfigured(String),

    #[error("Rejected: {0}")]
    Rejected(String),

    #[error("Transient failure: {0}")]
    Transient(String),

    #[error("{0}")]
    Other(String),
}

impl DependencyError {
    /// Create a rate-limit error without a retry hint
    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::RateLimited {
            message: message.into(),
            retry_after_ms: None,
        }
    }

    /// The raw message, without the variant prefix
    pub fn message(&self) -> &str {
        match self {
            Self::Timeout(m)
            | Self::Unauthorized(m)
            | Self::Network(m)
            | Self::Invalid(m)
            | Self::ResourceExhausted(m)
            | Self::Unavailable(m)
            | Self::Misconfigured(m)
            | Self::Rejected(m)
            | Self::Transient(m)
            | Self::Other(m) => m,
            Self::RateLimited { message, .. } => message,
        }
    }
}

impl WeaveErrorExt for DependencyError {
    fn user_hint(&self) -> &str {
        match self {
            Self::Timeout(_) => "The operation took too long. It will be retried",
            Self::RateLimited { .. } => "Rate limit reached. Backing off before retrying",
            Self::Unauthorized(_) => "Credentials were rejected. Check your API keys",
            Self::Network(_) => "Network operation failed. Check your connection",
            Self::Invalid(_) => "The request was invalid and will not be retried",
            Self::ResourceExhausted(_) => "A resource limit was hit. Free resources and retry",
            Self::Unavailable(_) => "The service is unavailable. Try again later",
            Self::Misconfigured(_) => "Check your config.toml for errors",
            Self::Rejected(_) => "The operation was rejected permanently",
            Self::Transient(_) => "A temporary failure occurred. It will be retried",
            Self::Other(_) => "An unexpected error occurred",
        }
    }

    fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            Self::Unauthorized(_) | Self::Invalid(_) | Self::Misconfigured(_) | Self::Rejected(_)
        )
    }
}

/// Error raised by a memory store backend
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Storage backend error: {0}")]
    Backend(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Record already exists: {0}")]
    DuplicateKey(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

impl WeaveErrorExt for StoreError {
    fn user_hint(&self) -> &str {
        match self {
            Self::Backend(_) => "Memory store operation failed. Check the data directory",
            Self::Serialization(_) => "A stored record could not be encoded or decoded",
            Self::DuplicateKey(_) => "Stored records are append-only and cannot be replaced",
        }
    }

    fn is_recoverable(&self) -> bool {
        matches!(self, Self::Backend(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_strips_variant_prefix() {
        let err = DependencyError::Network("connection reset by peer".to_string());
        assert_eq!(err.message(), "connection reset by peer");
        assert_eq!(err.to_string(), "Network error: connection reset by peer");

        let err = DependencyError::rate_limited("429 Too Many Requests");
        assert_eq!(err.message(), "429 Too Many Requests");
    }

    #[test]
    fn test_recoverability() {
        assert!(DependencyError::Timeout("slow".into()).is_recoverable());
        assert!(DependencyError::Transient("blip".into()).is_recoverable());
        assert!(!DependencyError::Invalid("bad".into()).is_recoverable());
        assert!(!DependencyError::Rejected("no".into()).is_recoverable());

        assert!(StoreError::Backend("disk".into()).is_recoverable());
        assert!(!StoreError::DuplicateKey("k".into()).is_recoverable());
    }

    #[test]
    fn test_all_hints_non_empty() {
        let errors = vec![
            DependencyError::Timeout(String::new()),
            DependencyError::rate_limited(""),
            DependencyError::Unauthorized(String::new()),
            DependencyError::Network(String::new()),
            DependencyError::Invalid(String::new()),
            DependencyError::ResourceExhausted(String::new()),
            DependencyError::Unavailable(String::new()),
            DependencyError::Misconfigured(String::new()),
            DependencyError::Rejected(String::new()),
            DependencyError::Transient(String::new()),
            DependencyError::Other(String::new()),
        ];
        for err in errors {
            assert!(!err.user_hint().is_empty(), "missing hint for {:?}", err);
        }
    }
}
