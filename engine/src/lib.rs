//! Weave Engine Library
//!
//! The autonomous task loop: perception, reasoning, execution, reflection
//! and memory, sequenced by the orchestrator. Used by both the `weave`
//! binary and integration tests.

/// Configuration management module
pub mod config;

/// Tracing subscriber setup
pub mod telemetry;

/// Event bus for loop progress
pub mod events;

/// LLM completion clients
pub mod llm;

/// Token-set text similarity
pub mod similarity;

/// Error classification, backoff, circuit breakers and rate limits
pub mod resilience;

/// Multi-source context gathering
pub mod perception;

/// Candidate plan generation, scoring and tree exploration
pub mod reasoning;

/// Fault-tolerant plan execution
pub mod execution;

/// Lesson extraction and pattern analysis
pub mod reflection;

/// Long-term experience memory
pub mod memory;

/// Database persistence module
pub mod db;

/// Loop state machine and orchestrator
pub mod orchestrator;

/// CLI interface module
pub mod cli;

/// Command handlers module
pub mod handlers;
