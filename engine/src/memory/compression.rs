//! Lossy experience compression
//!
//! Keeps the task, the selected plan, the outcome summary and the lessons;
//! drops what is only useful while debugging a single run. The operation is a
//! fixed point: compressing a compressed experience returns it unchanged.

use serde_json::json;
use weave_sdk::types::{ContextItem, Experience};

/// Outcome data larger than this (serialized) is replaced by a marker
pub const MAX_DATA_BYTES: usize = 2 * 1024;

/// Past-experience excerpts kept in the stored context are cut to this many
/// characters
pub const MAX_EXCERPT_CHARS: usize = 280;

/// Compress an experience
pub fn compress(mut experience: Experience) -> Experience {
    let outcome = &mut experience.outcome;
    if !outcome.logs.is_empty() {
        let count = u32::try_from(outcome.logs.len()).unwrap_or(u32::MAX);
        outcome.metrics.log_entries = outcome.metrics.log_entries.max(count);
        outcome.logs = Vec::new();
    }

    let data_bytes = serde_json::to_string(&outcome.data)
        .map(|s| s.len())
        .unwrap_or(0);
    if data_bytes > MAX_DATA_BYTES {
        outcome.data = json!({ "omitted": true, "original_bytes": data_bytes });
    }

    let context = &mut experience.context;
    context.related_notes.iter_mut().for_each(strip_body);
    context.external_knowledge.iter_mut().for_each(strip_body);
    context.past_experiences.iter_mut().for_each(truncate_body);

    experience.compressed = true;
    experience
}

fn strip_body(item: &mut ContextItem) {
    item.content.clear();
    item.metadata = serde_json::Value::Null;
}

fn truncate_body(item: &mut ContextItem) {
    if item.content.chars().count() > MAX_EXCERPT_CHARS {
        item.content = item.content.chars().take(MAX_EXCERPT_CHARS).collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use weave_sdk::types::{
        Context, LogEntry, LogLevel, Outcome, OutcomeMetrics, Plan, RiskLevel, SourceKind, Task,
    };

    fn experience() -> Experience {
        let task = Task::new("publish docs", "docs");
        let mut context = Context::empty(task.clone());
        context.related_notes.push(ContextItem::new(
            "vault",
            SourceKind::Note,
            "n1",
            "Docs style guide",
            "a very long body ".repeat(100),
            0.8,
        ));
        context.past_experiences.push(ContextItem::new(
            "experiences",
            SourceKind::Experience,
            "e0",
            "earlier publish",
            "x".repeat(1000),
            0.6,
        ));
        let plan = Plan {
            id: "p1".into(),
            task_id: task.id.clone(),
            steps: vec![],
            confidence: 0.8,
            estimated_effort: 5.0,
            reasoning_path: "direct".into(),
            risk_level: RiskLevel::Low,
            rationale: String::new(),
        };
        let outcome = Outcome {
            success: true,
            data: json!({ "blob": "y".repeat(4096) }),
            duration_ms: 10,
            metrics: OutcomeMetrics {
                steps_attempted: 1,
                steps_completed: 1,
                ..Default::default()
            },
            logs: (0..3)
                .map(|i| LogEntry {
                    timestamp: Utc::now(),
                    level: LogLevel::Info,
                    step_id: None,
                    message: format!("line {}", i),
                })
                .collect(),
            error: None,
        };
        Experience::new(task, context, plan, outcome, vec![])
    }

    #[test]
    fn test_compress_strips_verbose_fields() {
        let original = experience();
        let compressed = compress(original.clone());

        assert!(compressed.compressed);
        assert!(compressed.outcome.logs.is_empty());
        assert_eq!(compressed.outcome.metrics.log_entries, 3);
        assert_eq!(compressed.outcome.data["omitted"], true);
        assert_eq!(compressed.context.related_notes[0].title, "Docs style guide");
        assert!(compressed.context.related_notes[0].content.is_empty());
        assert_eq!(
            compressed.context.past_experiences[0].content.chars().count(),
            MAX_EXCERPT_CHARS
        );

        // What matters for later retrieval is untouched
        assert_eq!(compressed.task, original.task);
        assert_eq!(compressed.plan, original.plan);
        assert_eq!(compressed.outcome.success, original.outcome.success);
        assert_eq!(compressed.lessons, original.lessons);

        let before = serde_json::to_string(&original).unwrap().len();
        let after = serde_json::to_string(&compressed).unwrap().len();
        assert!(after * 2 < before);
    }

    #[test]
    fn test_compress_is_idempotent() {
        let once = compress(experience());
        let twice = compress(once.clone());
        assert_eq!(once, twice);
    }

    #[test]
    fn test_small_data_kept() {
        let mut e = experience();
        e.outcome.data = json!({"result": "ok"});
        assert_eq!(compress(e).outcome.data, json!({"result": "ok"}));
    }
}
