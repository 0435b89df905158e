//! Configuration management
//!
//! This module handles loading, validation, and management of the Weave configuration.
//! Configuration is stored in TOML format at ~/.weave/config.toml.
//!
//! # Configuration Sections
//!
//! - **core**: Log level, data directory
//! - **llm**: LLM provider settings
//! - **perception**: Source timeouts, item limits and weights
//! - **reasoning**: Candidate count, confidence threshold, scoring weights
//! - **tree**: Tree-structured exploration settings
//! - **execution**: Timeouts, retry policy, circuit breaker and rate limits
//! - **reflection**: Lesson extraction settings
//! - **memory**: Namespace, retention and backend
//!
//! Every section is optional; missing sections and fields take their defaults,
//! so a partial file loads.
//!
//! # Examples
//!
//! ```no_run
//! use weave_engine::config::Config;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load configuration from default location
//! let config = Config::load_or_create()?;
//!
//! println!("Data dir: {:?}", config.core.data_dir);
//! println!("Candidates per task: {}", config.reasoning.candidate_count);
//! # Ok(())
//! # }
//! ```

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use weave_sdk::errors::WeaveErrorExt;

use crate::resilience::{ErrorCategory, RetryProfile};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Read(String),

    #[error("Failed to parse config: {0}")]
    Parse(String),

    #[error("Failed to write config: {0}")]
    Write(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Could not determine home directory")]
    NoHomeDir,
}

impl WeaveErrorExt for ConfigError {
    fn user_hint(&self) -> &str {
        match self {
            Self::Read(_) => "Check that the config file exists and is readable",
            Self::Parse(_) => "Check your config.toml for syntax errors",
            Self::Write(_) => "Check permissions on the config directory",
            Self::Invalid(_) => "Fix the reported value in config.toml",
            Self::NoHomeDir => "Set HOME or pass --config explicitly",
        }
    }

    fn is_recoverable(&self) -> bool {
        false
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub core: CoreConfig,

    #[serde(default)]
    pub llm: LlmConfig,

    #[serde(default)]
    pub perception: PerceptionConfig,

    #[serde(default)]
    pub reasoning: ReasoningConfig,

    #[serde(default)]
    pub tree: TreeConfig,

    #[serde(default)]
    pub execution: ExecutionConfig,

    #[serde(default)]
    pub reflection: ReflectionConfig,

    #[serde(default)]
    pub memory: MemoryConfig,
}

/// Core engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Data directory path (supports ~ expansion)
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            data_dir: default_data_dir(),
        }
    }
}

/// LLM provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Provider name; only "ollama" is built in
    #[serde(default = "default_provider")]
    pub provider: String,

    /// Sampling temperature for plan generation
    #[serde(default = "default_temperature")]
    pub temperature: f64,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    #[serde(default)]
    pub ollama: OllamaConfig,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            temperature: default_temperature(),
            request_timeout_secs: default_request_timeout_secs(),
            ollama: OllamaConfig::default(),
        }
    }
}

/// Ollama provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OllamaConfig {
    /// Base URL for Ollama API
    #[serde(default = "default_ollama_base_url")]
    pub base_url: String,

    /// Model name
    #[serde(default = "default_ollama_model")]
    pub model: String,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: default_ollama_base_url(),
            model: default_ollama_model(),
        }
    }
}

/// Perception stage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerceptionConfig {
    /// Per-source gather timeout
    #[serde(default = "default_source_timeout_ms")]
    pub source_timeout_ms: u64,

    #[serde(default = "default_max_items_per_source")]
    pub max_items_per_source: usize,

    /// Confidence weight per source name; unlisted sources weigh 1.0
    #[serde(default)]
    pub source_weights: HashMap<String, f64>,
}

impl PerceptionConfig {
    pub fn source_timeout(&self) -> Duration {
        Duration::from_millis(self.source_timeout_ms)
    }

    pub fn weight_for(&self, source: &str) -> f64 {
        self.source_weights.get(source).copied().unwrap_or(1.0)
    }
}

impl Default for PerceptionConfig {
    fn default() -> Self {
        Self {
            source_timeout_ms: default_source_timeout_ms(),
            max_items_per_source: default_max_items_per_source(),
            source_weights: HashMap::new(),
        }
    }
}

/// Reasoning stage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReasoningConfig {
    /// Plans generated per task
    #[serde(default = "default_candidate_count")]
    pub candidate_count: usize,

    /// Plans whose self-reported confidence is below this are only kept as
    /// alternatives
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,

    /// Effort at which the complexity penalty saturates
    #[serde(default = "default_max_effort")]
    pub max_effort: f64,

    /// Base seed for plan generation; candidate `i` uses `seed + i`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,

    #[serde(default)]
    pub weights: ScoringWeights,
}

impl Default for ReasoningConfig {
    fn default() -> Self {
        Self {
            candidate_count: default_candidate_count(),
            min_confidence: default_min_confidence(),
            max_effort: default_max_effort(),
            seed: None,
            weights: ScoringWeights::default(),
        }
    }
}

/// Relative weights of the plan score terms
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoringWeights {
    #[serde(default = "default_alignment_weight")]
    pub alignment: f64,
    #[serde(default = "default_complexity_weight")]
    pub complexity: f64,
    #[serde(default = "default_confidence_weight")]
    pub confidence: f64,
    #[serde(default = "default_risk_weight")]
    pub risk: f64,
}

impl ScoringWeights {
    /// Weights scaled to sum to one
    pub fn normalized(&self) -> Self {
        let total = self.alignment + self.complexity + self.confidence + self.risk;
        if total <= 0.0 || !total.is_finite() {
            return Self::default();
        }
        Self {
            alignment: self.alignment / total,
            complexity: self.complexity / total,
            confidence: self.confidence / total,
            risk: self.risk / total,
        }
    }
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            alignment: default_alignment_weight(),
            complexity: default_complexity_weight(),
            confidence: default_confidence_weight(),
            risk: default_risk_weight(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TreeMode {
    /// Explore when the task asks for it or context confidence is low
    #[default]
    Auto,
    Always,
    Never,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyKind {
    #[default]
    Value,
    Vote,
    Comparison,
    Ensemble,
}

/// Tree-structured exploration configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeConfig {
    #[serde(default)]
    pub mode: TreeMode,

    /// In auto mode, explore when context confidence is below this
    #[serde(default = "default_auto_below_confidence")]
    pub auto_below_confidence: f64,

    #[serde(default = "default_max_depth")]
    pub max_depth: usize,

    #[serde(default = "default_branching")]
    pub branching: usize,

    #[serde(default = "default_prune_threshold")]
    pub prune_threshold: f64,

    #[serde(default = "default_true")]
    pub prune: bool,

    #[serde(default)]
    pub strategy: StrategyKind,

    /// Score subtracted per level by the value strategy
    #[serde(default = "default_depth_penalty")]
    pub depth_penalty: f64,

    /// Independent judgments averaged by the vote strategy
    #[serde(default = "default_vote_samples")]
    pub vote_samples: usize,

    #[serde(default)]
    pub ensemble: EnsembleWeights,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            mode: TreeMode::default(),
            auto_below_confidence: default_auto_below_confidence(),
            max_depth: default_max_depth(),
            branching: default_branching(),
            prune_threshold: default_prune_threshold(),
            prune: true,
            strategy: StrategyKind::default(),
            depth_penalty: default_depth_penalty(),
            vote_samples: default_vote_samples(),
            ensemble: EnsembleWeights::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EnsembleWeights {
    #[serde(default = "default_ensemble_value")]
    pub value: f64,
    #[serde(default = "default_ensemble_vote")]
    pub vote: f64,
    #[serde(default = "default_ensemble_comparison")]
    pub comparison: f64,
}

impl Default for EnsembleWeights {
    fn default() -> Self {
        Self {
            value: default_ensemble_value(),
            vote: default_ensemble_vote(),
            comparison: default_ensemble_comparison(),
        }
    }
}

/// Execution stage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Wall-clock limit for a whole plan
    #[serde(default = "default_execution_timeout_secs")]
    pub timeout_secs: u64,

    /// Limit for a single attempt of a single action
    #[serde(default = "default_step_timeout_ms")]
    pub step_timeout_ms: u64,

    /// Breaker key for steps that name no service
    #[serde(default = "default_dependency")]
    pub default_dependency: String,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub breaker: BreakerConfig,

    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

impl ExecutionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn step_timeout(&self) -> Duration {
        Duration::from_millis(self.step_timeout_ms)
    }
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_execution_timeout_secs(),
            step_timeout_ms: default_step_timeout_ms(),
            default_dependency: default_dependency(),
            retry: RetryConfig::default(),
            breaker: BreakerConfig::default(),
            rate_limit: RateLimitConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Upper bound for any single backoff delay
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Width of the random band below each delay ceiling, `[0, 1]`
    #[serde(default = "default_jitter")]
    pub jitter: f64,

    /// Per-category overrides keyed by category name (e.g. "network")
    #[serde(default)]
    pub overrides: BTreeMap<String, RetryOverride>,
}

impl RetryConfig {
    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    /// Effective retry profile for `category`
    pub fn profile(&self, category: ErrorCategory) -> RetryProfile {
        let mut profile = category.default_profile();
        if let Some(o) = self.overrides.get(category.as_str()) {
            if let Some(max_attempts) = o.max_attempts {
                profile.max_attempts = max_attempts.max(1);
                profile.retryable = profile.max_attempts > 1;
            }
            if let Some(base_delay_ms) = o.base_delay_ms {
                profile.base_delay = Duration::from_millis(base_delay_ms);
            }
        }
        profile
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_delay_ms: default_max_delay_ms(),
            jitter: default_jitter(),
            overrides: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetryOverride {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_delay_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakerConfig {
    /// Consecutive counted failures that open the circuit
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            cooldown_ms: default_cooldown_ms(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Calls allowed per window and dependency; 0 disables limiting
    #[serde(default)]
    pub max_calls: u32,

    #[serde(default = "default_window_ms")]
    pub window_ms: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_calls: 0,
            window_ms: default_window_ms(),
        }
    }
}

/// Reflection stage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReflectionConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_reflection_timeout_secs")]
    pub timeout_secs: u64,
}

impl ReflectionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for ReflectionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout_secs: default_reflection_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryBackend {
    #[default]
    Sqlite,
    Memory,
}

/// Memory configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Namespace experiences are stored under
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Days before a stored experience expires; 0 keeps forever
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,

    /// Compress experiences before storing
    #[serde(default = "default_true")]
    pub compress: bool,

    /// Experiences returned to perception per task
    #[serde(default = "default_query_limit")]
    pub query_limit: usize,

    #[serde(default)]
    pub backend: MemoryBackend,
}

impl MemoryConfig {
    pub fn retention(&self) -> Option<Duration> {
        match self.retention_days {
            0 => None,
            days => Some(Duration::from_secs(u64::from(days) * 24 * 60 * 60)),
        }
    }
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            retention_days: default_retention_days(),
            compress: true,
            query_limit: default_query_limit(),
            backend: MemoryBackend::default(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("~/.weave")
}

fn default_provider() -> String {
    "ollama".to_string()
}

fn default_temperature() -> f64 {
    0.7
}

fn default_request_timeout_secs() -> u64 {
    120
}

fn default_ollama_base_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_ollama_model() -> String {
    "llama3.1:8b".to_string()
}

fn default_source_timeout_ms() -> u64 {
    5_000
}

fn default_max_items_per_source() -> usize {
    10
}

fn default_candidate_count() -> usize {
    3
}

fn default_min_confidence() -> f64 {
    0.3
}

fn default_max_effort() -> f64 {
    40.0
}

fn default_alignment_weight() -> f64 {
    0.3
}

fn default_complexity_weight() -> f64 {
    0.2
}

fn default_confidence_weight() -> f64 {
    0.3
}

fn default_risk_weight() -> f64 {
    0.2
}

fn default_auto_below_confidence() -> f64 {
    0.4
}

fn default_max_depth() -> usize {
    2
}

fn default_branching() -> usize {
    3
}

fn default_prune_threshold() -> f64 {
    0.3
}

fn default_depth_penalty() -> f64 {
    0.05
}

fn default_vote_samples() -> usize {
    3
}

fn default_ensemble_value() -> f64 {
    0.4
}

fn default_ensemble_vote() -> f64 {
    0.3
}

fn default_ensemble_comparison() -> f64 {
    0.3
}

fn default_execution_timeout_secs() -> u64 {
    300
}

fn default_step_timeout_ms() -> u64 {
    30_000
}

fn default_dependency() -> String {
    "step-executor".to_string()
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_jitter() -> f64 {
    0.5
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_cooldown_ms() -> u64 {
    30_000
}

fn default_window_ms() -> u64 {
    60_000
}

fn default_reflection_timeout_secs() -> u64 {
    60
}

fn default_namespace() -> String {
    "experiences".to_string()
}

fn default_retention_days() -> u32 {
    90
}

fn default_query_limit() -> usize {
    5
}

impl Config {
    /// Load configuration from the default location (~/.weave/config.toml)
    ///
    /// If the configuration file doesn't exist, creates a default configuration.
    /// Validates the configuration after loading and returns descriptive errors
    /// if validation fails.
    pub fn load_or_create() -> Result<Self, ConfigError> {
        let config_path = Self::default_config_path()?;

        if config_path.exists() {
            Self::load_from_path(&config_path)
        } else {
            Self::create_default(&config_path)
        }
    }

    /// Load configuration from a specific path
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - File cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|e| ConfigError::Read(e.to_string()))?;
        Self::from_toml_str(&contents)
    }

    /// Parse and validate configuration text
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let mut config: Config =
            toml::from_str(contents).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate_and_process()?;
        Ok(config)
    }

    /// Create default configuration and save to path
    fn create_default(path: &Path) -> Result<Self, ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                ConfigError::Write(format!("Failed to create config directory: {}", e))
            })?;
        }

        // Serialize before processing so the file keeps the portable "~" path
        let toml_string = toml::to_string_pretty(&Config::default())
            .map_err(|e| ConfigError::Write(format!("Failed to serialize config: {}", e)))?;
        fs::write(path, toml_string).map_err(|e| ConfigError::Write(e.to_string()))?;

        let mut config = Config::default();
        config.validate_and_process()?;
        Ok(config)
    }

    /// The default configuration file path (~/.weave/config.toml)
    pub fn default_config_path() -> Result<PathBuf, ConfigError> {
        let home = dirs::home_dir().ok_or(ConfigError::NoHomeDir)?;
        Ok(home.join(".weave").join("config.toml"))
    }

    /// SQLite database location inside the data directory
    pub fn database_path(&self) -> PathBuf {
        self.core.data_dir.join("weave.db")
    }

    /// Validate and process configuration
    ///
    /// Checks ranges and enumerations, expands `~` in the data directory and
    /// creates it if missing.
    fn validate_and_process(&mut self) -> Result<(), ConfigError> {
        let valid_log_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_log_levels.contains(&self.core.log_level.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.core.log_level,
                valid_log_levels.join(", ")
            )));
        }

        if self.llm.provider != "ollama" {
            return Err(ConfigError::Invalid(format!(
                "Unsupported LLM provider '{}'. Must be: ollama",
                self.llm.provider
            )));
        }

        check_unit_range("reasoning.min_confidence", self.reasoning.min_confidence)?;
        check_unit_range(
            "tree.auto_below_confidence",
            self.tree.auto_below_confidence,
        )?;
        check_unit_range("tree.prune_threshold", self.tree.prune_threshold)?;
        check_unit_range("execution.retry.jitter", self.execution.retry.jitter)?;

        if self.reasoning.candidate_count == 0 {
            return Err(ConfigError::Invalid(
                "reasoning.candidate_count must be at least 1".to_string(),
            ));
        }
        if self.reasoning.max_effort <= 0.0 {
            return Err(ConfigError::Invalid(
                "reasoning.max_effort must be positive".to_string(),
            ));
        }
        if self.tree.max_depth == 0 || self.tree.branching == 0 {
            return Err(ConfigError::Invalid(
                "tree.max_depth and tree.branching must be at least 1".to_string(),
            ));
        }
        if self.execution.breaker.failure_threshold == 0 {
            return Err(ConfigError::Invalid(
                "execution.breaker.failure_threshold must be at least 1".to_string(),
            ));
        }
        if self.perception.source_weights.values().any(|w| *w < 0.0) {
            return Err(ConfigError::Invalid(
                "perception.source_weights must not be negative".to_string(),
            ));
        }

        for key in self.execution.retry.overrides.keys() {
            if !ErrorCategory::ALL.iter().any(|c| c.as_str() == key) {
                return Err(ConfigError::Invalid(format!(
                    "Unknown error category '{}' in execution.retry.overrides",
                    key
                )));
            }
        }

        self.core.data_dir = expand_path(&self.core.data_dir)?;
        if !self.core.data_dir.exists() {
            fs::create_dir_all(&self.core.data_dir).map_err(|e| {
                ConfigError::Write(format!("Failed to create data directory: {}", e))
            })?;
        }

        Ok(())
    }
}

fn check_unit_range(name: &str, value: f64) -> Result<(), ConfigError> {
    if !(0.0..=1.0).contains(&value) {
        return Err(ConfigError::Invalid(format!(
            "{} must be between 0.0 and 1.0",
            name
        )));
    }
    Ok(())
}

/// Expand ~ in path to user's home directory
fn expand_path(path: &Path) -> Result<PathBuf, ConfigError> {
    let path_str = path
        .to_str()
        .ok_or_else(|| ConfigError::Invalid("Invalid UTF-8 in path".to_string()))?;

    if let Some(rest) = path_str.strip_prefix("~/") {
        let home = dirs::home_dir().ok_or(ConfigError::NoHomeDir)?;
        Ok(home.join(rest))
    } else if path_str == "~" {
        dirs::home_dir().ok_or(ConfigError::NoHomeDir)
    } else {
        Ok(path.to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_values() {
        let config = Config::default();

        assert_eq!(config.core.log_level, "info");
        assert_eq!(config.llm.provider, "ollama");
        assert_eq!(config.reasoning.candidate_count, 3);
        assert_eq!(config.execution.timeout_secs, 300);
        assert_eq!(config.execution.breaker.failure_threshold, 5);
        assert_eq!(config.memory.backend, MemoryBackend::Sqlite);
        assert!(config.tree.prune);
    }

    #[test]
    fn test_expand_path_with_tilde() {
        let path = PathBuf::from("~/test");
        let expanded = expand_path(&path).unwrap();

        let home = dirs::home_dir().unwrap();
        assert_eq!(expanded, home.join("test"));
    }

    #[test]
    fn test_expand_path_without_tilde() {
        let path = PathBuf::from("/absolute/path");
        assert_eq!(expand_path(&path).unwrap(), path);
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();
        let toml_string = toml::to_string(&config).unwrap();

        let deserialized: Config = toml::from_str(&toml_string).unwrap();
        assert_eq!(config.core.log_level, deserialized.core.log_level);
        assert_eq!(config.tree.strategy, deserialized.tree.strategy);
        assert_eq!(
            config.reasoning.weights,
            deserialized.reasoning.weights
        );
    }

    #[test]
    fn test_empty_file_takes_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.perception.max_items_per_source, 10);
        assert_eq!(config.execution.retry.max_delay_ms, 30_000);
    }

    #[test]
    fn test_weights_normalized() {
        let weights = ScoringWeights {
            alignment: 2.0,
            complexity: 1.0,
            confidence: 1.0,
            risk: 0.0,
        }
        .normalized();
        assert!((weights.alignment - 0.5).abs() < 1e-9);
        let sum = weights.alignment + weights.complexity + weights.confidence + weights.risk;
        assert!((sum - 1.0).abs() < 1e-9);

        let zero = ScoringWeights {
            alignment: 0.0,
            complexity: 0.0,
            confidence: 0.0,
            risk: 0.0,
        };
        assert_eq!(zero.normalized(), ScoringWeights::default());
    }

    #[test]
    fn test_retry_overrides_apply() {
        let mut retry = RetryConfig::default();
        retry.overrides.insert(
            "network".to_string(),
            RetryOverride {
                max_attempts: Some(6),
                base_delay_ms: Some(250),
            },
        );

        let network = retry.profile(ErrorCategory::Network);
        assert_eq!(network.max_attempts, 6);
        assert_eq!(network.base_delay, Duration::from_millis(250));
        assert_eq!(
            retry.profile(ErrorCategory::Service),
            ErrorCategory::Service.default_profile()
        );
    }

    #[test]
    fn test_memory_retention() {
        let mut memory = MemoryConfig::default();
        assert_eq!(
            memory.retention(),
            Some(Duration::from_secs(90 * 24 * 60 * 60))
        );
        memory.retention_days = 0;
        assert_eq!(memory.retention(), None);
    }
}
