//! Command handlers for CLI operations
//!
//! This module implements the handlers for all CLI commands:
//! - run: Execute a task through the full loop
//! - history: Show recently stored experiences
//! - patterns: Batch pattern analysis over stored experiences
//! - evict: Delete expired experiences
//! - config show / path: Inspect configuration

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use weave_sdk::errors::DependencyError;
use weave_sdk::interfaces::{MemoryStore, StepExecutor};
use weave_sdk::types::{PlanStep, Priority, Task};

use crate::config::{Config, MemoryBackend};
use crate::db::Database;
use crate::llm::{extract_json, CompletionOptions, LlmClient, OllamaClient, Purpose};
use crate::memory::{InMemoryStore, MemorySystem};
use crate::orchestrator::{LoopReport, Orchestrator};
use crate::reasoning::DEEP_FLAG;

/// Output format for command results
#[derive(Debug, Clone, Copy)]
pub enum OutputFormat {
    /// Human-readable text output
    Text,
    /// JSON output for machine consumption
    Json,
}

/// Step executor that asks the model to carry out each step
///
/// The model answers with `{"status": "done" | "failed", "result": ..., "error": ...}`.
/// Anything that is not JSON counts as a plain-text result.
pub struct LlmStepExecutor {
    llm: Arc<dyn LlmClient>,
    task: String,
}

impl LlmStepExecutor {
    pub fn new(llm: Arc<dyn LlmClient>, task: impl Into<String>) -> Self {
        Self {
            llm,
            task: task.into(),
        }
    }

    fn prompt(&self, step: &PlanStep, action: &str) -> String {
        format!(
            "You are carrying out one step of a larger task.\n\n\
             Task: {}\nStep: {}\nAction: {}\n\n\
             Do the action and respond with JSON only:\n\
             {{\"status\": \"done\" or \"failed\", \"result\": <any>, \"error\": \"reason if failed\"}}",
            self.task, step.description, action
        )
    }
}

/// Interpret a step response
pub fn parse_step_response(content: &str) -> Result<Value, DependencyError> {
    let Some(value) = extract_json(content) else {
        return Ok(Value::String(content.trim().to_string()));
    };
    let status = value
        .get("status")
        .and_then(Value::as_str)
        .unwrap_or("done")
        .to_lowercase();
    if status == "failed" || status == "error" {
        let reason = value
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or("step reported failure");
        return Err(DependencyError::Other(reason.to_string()));
    }
    Ok(value.get("result").cloned().unwrap_or(value))
}

#[async_trait]
impl StepExecutor for LlmStepExecutor {
    async fn execute_step(&self, step: &PlanStep, action: &str) -> Result<Value, DependencyError> {
        let options = CompletionOptions::new(Purpose::StepExecution).with_temperature(0.2);
        let content = self.llm.complete(&self.prompt(step, action), &options).await?;
        parse_step_response(&content)
    }
}

fn build_llm(config: &Config) -> Result<Arc<dyn LlmClient>> {
    match config.llm.provider.as_str() {
        "ollama" => {
            let client = OllamaClient::new(
                config.llm.ollama.base_url.clone(),
                config.llm.ollama.model.clone(),
                std::time::Duration::from_secs(config.llm.request_timeout_secs),
            )?;
            Ok(Arc::new(client))
        }
        other => Err(anyhow::anyhow!(
            "Unsupported LLM provider '{}'. Only 'ollama' is built in",
            other
        )),
    }
}

/// The memory system, plus the database behind it when the backend is SQLite
async fn open_memory(config: &Config) -> Result<(Arc<MemorySystem>, Option<Database>)> {
    let (store, database): (Arc<dyn MemoryStore>, Option<Database>) = match config.memory.backend {
        MemoryBackend::Sqlite => {
            let database = Database::new(&config.database_path())
                .await
                .context("Failed to open database")?;
            let store: Arc<dyn MemoryStore> = Arc::new(database.memory_store());
            (store, Some(database))
        }
        MemoryBackend::Memory => (Arc::new(InMemoryStore::new()) as Arc<dyn MemoryStore>, None),
    };
    Ok((
        Arc::new(MemorySystem::new(store, config.memory.clone())),
        database,
    ))
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Run a task through the full loop
pub async fn handle_run(
    description: String,
    domain: String,
    priority: Priority,
    deep: bool,
    config: &Config,
    format: OutputFormat,
) -> Result<()> {
    let llm = build_llm(config)?;
    let (memory, _database) = open_memory(config).await?;
    let executor = Arc::new(LlmStepExecutor::new(Arc::clone(&llm), description.clone()));
    let orchestrator = Orchestrator::from_config(config, llm, executor, memory);

    let mut task = Task::new(description, domain).with_priority(priority);
    if deep {
        task = task.with_metadata(DEEP_FLAG, json!(true));
    }

    if let OutputFormat::Text = format {
        println!("Executing task: {}", task.description);
        println!();
    }

    match orchestrator.run(task).await {
        Ok(report) => {
            match format {
                OutputFormat::Text => print_report(&report),
                OutputFormat::Json => print_json(&report)?,
            }
            if report.outcome.success {
                Ok(())
            } else {
                Err(anyhow::anyhow!(
                    "Task failed: {}",
                    report.outcome.error.as_deref().unwrap_or("unknown error")
                ))
            }
        }
        Err(e) => {
            match format {
                OutputFormat::Text => println!("✗ Task failed in {} stage: {}", e.stage, e.cause),
                OutputFormat::Json => print_json(&json!({
                    "status": "failed",
                    "stage": e.stage,
                    "error": e.cause.to_string(),
                }))?,
            }
            Err(e.into())
        }
    }
}

fn print_report(report: &LoopReport) {
    let outcome = &report.outcome;
    if outcome.success {
        println!("✓ Task completed successfully");
    } else {
        println!(
            "✗ Task failed: {}",
            outcome.error.as_deref().unwrap_or("unknown error")
        );
    }
    println!("  Plan: {} ({})", report.selected_plan.id, report.reasoning_path);
    println!(
        "  Confidence: {:.2}{}",
        report.reasoning_confidence,
        if report.low_confidence { " (low)" } else { "" }
    );
    println!(
        "  Steps: {}/{} completed, {} retries, {} fallbacks",
        outcome.metrics.steps_completed,
        report.selected_plan.steps.len(),
        outcome.metrics.retries,
        outcome.metrics.fallbacks_used
    );
    println!("  Duration: {}ms", outcome.duration_ms);
    if let Some(stats) = &report.tree_stats {
        println!(
            "  Tree: {} nodes, {} pruned, depth {}",
            stats.nodes_visited, stats.nodes_pruned, stats.max_depth_reached
        );
    }

    if !report.lessons.is_empty() {
        println!();
        println!("Lessons:");
        for lesson in &report.lessons {
            println!("  [{:?}] {}", lesson.lesson_type, lesson.description);
        }
    }
    if !report.recommendations.is_empty() {
        println!();
        println!("Recommendations:");
        for rec in &report.recommendations {
            println!("  - {}", rec);
        }
    }
    for warning in &report.warnings {
        println!("  ! {}", warning);
    }
}

/// Show recently stored experiences
pub async fn handle_history(limit: usize, config: &Config, format: OutputFormat) -> Result<()> {
    let (memory, database) = open_memory(config).await?;
    let experiences = memory
        .recent(limit)
        .await
        .context("Failed to fetch experience history")?;
    let stats = match &database {
        Some(db) => Some(db.stats(memory.namespace()).await?),
        None => None,
    };

    match format {
        OutputFormat::Text => {
            if experiences.is_empty() {
                println!("No experiences in memory");
                return Ok(());
            }

            match stats {
                Some(stats) => println!(
                    "Experience History (last {} of {}):",
                    experiences.len(),
                    stats.records
                ),
                None => println!("Experience History (last {}):", limit),
            }
            println!();
            for e in &experiences {
                println!("Experience: {}", e.id);
                println!("  Task: {}", e.task.description);
                println!("  Domain: {}", e.domain);
                println!("  Success: {}", e.success);
                println!("  Steps: {}", e.plan.steps.len());
                println!("  Lessons: {}", e.lessons.len());
                println!("  Stored: {}", e.timestamp.format("%Y-%m-%d %H:%M:%S"));
                println!();
            }
        }
        OutputFormat::Json => print_json(&json!({
            "experiences": experiences,
            "count": experiences.len(),
            "limit": limit,
            "stats": stats,
        }))?,
    }
    Ok(())
}

/// Analyze recurring lessons
pub async fn handle_patterns(limit: usize, config: &Config, format: OutputFormat) -> Result<()> {
    let (memory, _database) = open_memory(config).await?;
    let experiences = memory.recent(limit).await?;
    let analysis = crate::reflection::analyze_patterns(&experiences);

    match format {
        OutputFormat::Text => {
            println!(
                "Analyzed {} experience(s)",
                analysis.experiences_analyzed
            );
            if !analysis.recurring.is_empty() {
                println!();
                println!("Recurring lessons:");
                for p in &analysis.recurring {
                    println!(
                        "  [{:?}] x{} {} ({})",
                        p.lesson_type,
                        p.occurrences,
                        p.description,
                        p.domains.join(", ")
                    );
                }
            }
            if !analysis.domains.is_empty() {
                println!();
                println!("Success rate by domain:");
                for d in &analysis.domains {
                    println!(
                        "  {}: {:.0}% ({}/{})",
                        d.domain,
                        d.success_rate * 100.0,
                        d.successes,
                        d.total
                    );
                }
            }
            if !analysis.top_actions.is_empty() {
                println!();
                println!("Most recommended actions:");
                for a in &analysis.top_actions {
                    println!("  {} x{}", a.action, a.count);
                }
            }
        }
        OutputFormat::Json => print_json(&analysis)?,
    }
    Ok(())
}

/// Delete expired experiences
pub async fn handle_evict(config: &Config, format: OutputFormat) -> Result<()> {
    let (memory, database) = open_memory(config).await?;
    let evicted = memory.evict_expired().await?;
    let remaining = match database {
        Some(db) => {
            let stats = db.stats(memory.namespace()).await?;
            db.close().await?;
            Some(stats.records)
        }
        None => None,
    };

    match format {
        OutputFormat::Text => {
            println!("Evicted {} expired experience(s)", evicted);
            if let Some(remaining) = remaining {
                println!("{} experience(s) remain", remaining);
            }
        }
        OutputFormat::Json => print_json(&json!({
            "evicted": evicted,
            "remaining": remaining,
        }))?,
    }
    Ok(())
}

pub fn handle_config_show(config: &Config, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Text => {
            let text = toml::to_string_pretty(config).context("Failed to render configuration")?;
            println!("{}", text);
        }
        OutputFormat::Json => print_json(config)?,
    }
    Ok(())
}

pub fn handle_config_path(path: &Path, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Text => println!("{}", path.display()),
        OutputFormat::Json => print_json(&json!({ "path": path }))?,
    }
    Ok(())
}
