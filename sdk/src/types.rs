//! Loop data model
//!
//! Records that flow between the stages of the loop and across the
//! collaborator boundary. Every record is produced once by a single stage and
//! then only read; later stages receive clones or shared references.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Priority of a task
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

/// A unit of work submitted to the loop
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub description: String,
    pub domain: String,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Task {
    /// Create a new task with a random id and normal priority
    pub fn new(description: impl Into<String>, domain: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            description: description.into(),
            domain: domain.into(),
            priority: Priority::Normal,
            metadata: HashMap::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Read a boolean metadata flag, defaulting to false
    pub fn flag(&self, key: &str) -> bool {
        self.metadata
            .get(key)
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }
}

/// Which bucket of the context a source contributes to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// Previously stored experiences
    Experience,
    /// Documents and notes from a knowledge vault
    Note,
    /// External knowledge such as web search results
    External,
}

/// A single piece of gathered knowledge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextItem {
    pub source: String,
    pub kind: SourceKind,
    pub id: String,
    pub title: String,
    pub content: String,
    /// Relevance to the task in `[0, 1]`
    pub relevance: f64,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl ContextItem {
    pub fn new(
        source: impl Into<String>,
        kind: SourceKind,
        id: impl Into<String>,
        title: impl Into<String>,
        content: impl Into<String>,
        relevance: f64,
    ) -> Self {
        Self {
            source: source.into(),
            kind,
            id: id.into(),
            title: title.into(),
            content: content.into(),
            relevance: relevance.clamp(0.0, 1.0),
            metadata: serde_json::Value::Null,
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// What a context source returned for one task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceResult {
    pub source: String,
    pub kind: SourceKind,
    pub items: Vec<ContextItem>,
}

impl SourceResult {
    pub fn new(source: impl Into<String>, kind: SourceKind) -> Self {
        Self {
            source: source.into(),
            kind,
            items: Vec::new(),
        }
    }

    pub fn with_items(mut self, items: Vec<ContextItem>) -> Self {
        self.items = items;
        self
    }
}

/// Fused snapshot of everything known about a task before planning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Context {
    pub task: Task,
    pub past_experiences: Vec<ContextItem>,
    pub related_notes: Vec<ContextItem>,
    pub external_knowledge: Vec<ContextItem>,
    /// Confidence in the gathered context, `[0, 1]`
    pub confidence: f64,
    pub timestamp: DateTime<Utc>,
}

impl Context {
    /// An empty context for a task, confidence zero
    pub fn empty(task: Task) -> Self {
        Self {
            task,
            past_experiences: Vec::new(),
            related_notes: Vec::new(),
            external_knowledge: Vec::new(),
            confidence: 0.0,
            timestamp: Utc::now(),
        }
    }

    /// Iterate over every item regardless of bucket
    pub fn items(&self) -> impl Iterator<Item = &ContextItem> {
        self.past_experiences
            .iter()
            .chain(self.related_notes.iter())
            .chain(self.external_knowledge.iter())
    }

    pub fn item_count(&self) -> usize {
        self.past_experiences.len() + self.related_notes.len() + self.external_knowledge.len()
    }
}

/// Self-assessed risk of a plan
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    #[default]
    Medium,
    High,
}

impl RiskLevel {
    /// Numeric risk used by plan scoring
    pub fn value(&self) -> f64 {
        match self {
            RiskLevel::Low => 0.1,
            RiskLevel::Medium => 0.5,
            RiskLevel::High => 0.9,
        }
    }

    /// Lenient parse for model output; unknown strings map to medium
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "low" | "minimal" => RiskLevel::Low,
            "high" | "critical" | "severe" => RiskLevel::High,
            _ => RiskLevel::Medium,
        }
    }
}

/// Alternative action tried when a step's primary action fails
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FallbackAction {
    pub action: String,
    /// Lower values are tried first
    #[serde(default)]
    pub priority: u32,
}

/// One step of a plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanStep {
    pub id: String,
    pub description: String,
    /// Primary action handed to the step executor
    pub action: String,
    /// Ids of steps that must complete first
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub expected_outcome: String,
    /// External service this step calls; keys its circuit breaker
    #[serde(default)]
    pub service: Option<String>,
    #[serde(default)]
    pub fallbacks: Vec<FallbackAction>,
    /// Terminal value used when every action fails
    #[serde(default)]
    pub degradation: Option<serde_json::Value>,
}

impl PlanStep {
    /// Create a step whose action is its description
    pub fn new(id: impl Into<String>, description: impl Into<String>) -> Self {
        let description = description.into();
        Self {
            id: id.into(),
            action: description.clone(),
            description,
            dependencies: Vec::new(),
            expected_outcome: String::new(),
            service: None,
            fallbacks: Vec::new(),
            degradation: None,
        }
    }

    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.action = action.into();
        self
    }

    pub fn depends_on(mut self, step_id: impl Into<String>) -> Self {
        self.dependencies.push(step_id.into());
        self
    }

    pub fn with_service(mut self, service: impl Into<String>) -> Self {
        self.service = Some(service.into());
        self
    }

    pub fn with_fallback(mut self, action: impl Into<String>, priority: u32) -> Self {
        self.fallbacks.push(FallbackAction {
            action: action.into(),
            priority,
        });
        self
    }

    pub fn with_degradation(mut self, value: serde_json::Value) -> Self {
        self.degradation = Some(value);
        self
    }
}

/// A candidate course of action for a task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub id: String,
    pub task_id: String,
    pub steps: Vec<PlanStep>,
    /// Self-reported confidence, `[0, 1]`
    pub confidence: f64,
    /// Estimated effort in abstract units (roughly minutes of work)
    pub estimated_effort: f64,
    pub reasoning_path: String,
    pub risk_level: RiskLevel,
    #[serde(default)]
    pub rationale: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// A timestamped execution log line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    #[serde(default)]
    pub step_id: Option<String>,
    pub message: String,
}

/// Step counters accumulated during execution
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeMetrics {
    pub steps_attempted: u32,
    pub steps_completed: u32,
    pub steps_failed: u32,
    #[serde(default)]
    pub retries: u32,
    #[serde(default)]
    pub fallbacks_used: u32,
    /// Number of log lines, kept after compression drops the lines themselves
    #[serde(default)]
    pub log_entries: u32,
}

/// Result of executing a plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    pub success: bool,
    pub data: serde_json::Value,
    pub duration_ms: u64,
    pub metrics: OutcomeMetrics,
    pub logs: Vec<LogEntry>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LessonType {
    Success,
    Failure,
    Optimization,
    Error,
}

impl LessonType {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "success" => Some(LessonType::Success),
            "failure" => Some(LessonType::Failure),
            "optimization" | "optimisation" => Some(LessonType::Optimization),
            "error" => Some(LessonType::Error),
            _ => None,
        }
    }
}

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Impact {
    Low,
    #[default]
    Medium,
    High,
}

impl Impact {
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "low" => Impact::Low,
            "high" | "critical" => Impact::High,
            _ => Impact::Medium,
        }
    }
}

/// A reusable insight extracted from one outcome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lesson {
    #[serde(rename = "type")]
    pub lesson_type: LessonType,
    pub description: String,
    #[serde(default)]
    pub actions: Vec<String>,
    #[serde(default)]
    pub impact: Impact,
    #[serde(default)]
    pub applicable_domains: Vec<String>,
}

/// Complete record of one loop iteration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Experience {
    pub id: String,
    pub task: Task,
    pub context: Context,
    /// The selected plan
    pub plan: Plan,
    pub outcome: Outcome,
    pub success: bool,
    pub lessons: Vec<Lesson>,
    pub timestamp: DateTime<Utc>,
    pub domain: String,
    #[serde(default)]
    pub compressed: bool,
}

impl Experience {
    pub fn new(
        task: Task,
        context: Context,
        plan: Plan,
        outcome: Outcome,
        lessons: Vec<Lesson>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            domain: task.domain.clone(),
            success: outcome.success,
            task,
            context,
            plan,
            outcome,
            lessons,
            timestamp: Utc::now(),
            compressed: false,
        }
    }

    /// Text that approximate search should match against
    pub fn summary_text(&self) -> String {
        let mut parts = vec![self.task.description.clone(), self.domain.clone()];
        parts.extend(self.plan.steps.iter().map(|s| s.description.clone()));
        parts.extend(self.lessons.iter().map(|l| l.description.clone()));
        parts.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_builder() {
        let task = Task::new("Summarize the release notes", "docs")
            .with_priority(Priority::High)
            .with_metadata("deep", serde_json::json!(true));

        assert_eq!(task.domain, "docs");
        assert_eq!(task.priority, Priority::High);
        assert!(task.flag("deep"));
        assert!(!task.flag("missing"));
        assert!(!task.id.is_empty());
    }

    #[test]
    fn test_risk_ordering_and_parse() {
        assert!(RiskLevel::Low < RiskLevel::Medium);
        assert!(RiskLevel::Medium < RiskLevel::High);
        assert_eq!(RiskLevel::parse(" HIGH "), RiskLevel::High);
        assert_eq!(RiskLevel::parse("whatever"), RiskLevel::Medium);
        assert!(RiskLevel::Low.value() < RiskLevel::High.value());
    }

    #[test]
    fn test_context_item_relevance_clamped() {
        let item = ContextItem::new("vault", SourceKind::Note, "n1", "t", "c", 1.7);
        assert_eq!(item.relevance, 1.0);
        let item = ContextItem::new("vault", SourceKind::Note, "n1", "t", "c", -0.2);
        assert_eq!(item.relevance, 0.0);
    }

    #[test]
    fn test_lesson_type_field_renamed() {
        let lesson = Lesson {
            lesson_type: LessonType::Optimization,
            description: "cache the index".to_string(),
            actions: vec![],
            impact: Impact::High,
            applicable_domains: vec!["search".to_string()],
        };
        let json = serde_json::to_value(&lesson).unwrap();
        assert_eq!(json["type"], "optimization");
        assert_eq!(json["impact"], "high");
    }

    #[test]
    fn test_plan_step_defaults_from_json() {
        let step: PlanStep =
            serde_json::from_str(r#"{"id": "s1", "description": "d", "action": "a"}"#).unwrap();
        assert!(step.dependencies.is_empty());
        assert!(step.fallbacks.is_empty());
        assert!(step.service.is_none());
        assert!(step.degradation.is_none());
    }
}
