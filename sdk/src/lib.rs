//! Weave SDK
//!
//! Shared library providing the loop's data model, the traits implemented by
//! injected collaborators, and the errors those collaborators raise.
//! This crate is used by the engine and by anything plugged into it.

/// Collaborator traits
pub mod interfaces;

/// Error types and handling
pub mod errors;

/// Loop data model
pub mod types;

// Re-export commonly used types
pub use errors::{DependencyError, StoreError, WeaveErrorExt};
pub use interfaces::{searchable_text, ContextSource, MemoryRecord, MemoryStore, StepExecutor};
pub use types::{
    Context, ContextItem, Experience, FallbackAction, Impact, Lesson, LessonType, LogEntry,
    LogLevel, Outcome, OutcomeMetrics, Plan, PlanStep, Priority, RiskLevel, SourceKind,
    SourceResult, Task,
};
