//! Built-in context sources
//!
//! [`ExperienceSource`] closes the feedback edge of the loop by reading
//! previously stored experiences back through the [`MemorySystem`].
//! [`StaticSource`] serves a fixed document set and is handy for seeding a
//! run with reference notes.

use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use weave_sdk::errors::{DependencyError, StoreError};
use weave_sdk::interfaces::ContextSource;
use weave_sdk::types::{ContextItem, SourceKind, SourceResult, Task};

use crate::memory::{MemoryError, MemorySystem, QueryFilters};
use crate::similarity;

/// Past experiences relevant to the task
pub struct ExperienceSource {
    memory: Arc<MemorySystem>,
    name: String,
}

impl ExperienceSource {
    pub fn new(memory: Arc<MemorySystem>) -> Self {
        Self {
            memory,
            name: "experiences".to_string(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

fn to_dependency_error(e: MemoryError) -> DependencyError {
    match e {
        MemoryError::Store(StoreError::Backend(msg)) => DependencyError::Unavailable(msg),
        other => DependencyError::Other(other.to_string()),
    }
}

#[async_trait]
impl ContextSource for ExperienceSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Experience
    }

    async fn gather(&self, task: &Task, limit: usize) -> Result<SourceResult, DependencyError> {
        let hits = self
            .memory
            .query(&task.description, &QueryFilters::limit(limit))
            .await
            .map_err(to_dependency_error)?;

        let items = hits
            .into_iter()
            .map(|hit| {
                let e = hit.experience;
                let steps: Vec<&str> = e.plan.steps.iter().map(|s| s.description.as_str()).collect();
                let lessons: Vec<&str> = e.lessons.iter().map(|l| l.description.as_str()).collect();
                let mut content = format!(
                    "Task: {}\nResult: {}\nSteps: {}",
                    e.task.description,
                    if e.success { "succeeded" } else { "failed" },
                    steps.join("; ")
                );
                if !lessons.is_empty() {
                    content.push_str(&format!("\nLessons: {}", lessons.join("; ")));
                }
                let metadata = json!({
                    "success": e.success,
                    "domain": e.domain,
                    "steps": steps,
                    "lessons": lessons,
                });
                ContextItem::new(
                    self.name.as_str(),
                    SourceKind::Experience,
                    e.id.as_str(),
                    e.task.description.as_str(),
                    content,
                    hit.relevance,
                )
                .with_metadata(metadata)
            })
            .collect();

        Ok(SourceResult::new(self.name.as_str(), SourceKind::Experience).with_items(items))
    }
}

/// A fixed set of documents ranked by token relevance
pub struct StaticSource {
    name: String,
    kind: SourceKind,
    documents: Vec<(String, String)>,
}

impl StaticSource {
    pub fn new(name: impl Into<String>, kind: SourceKind) -> Self {
        Self {
            name: name.into(),
            kind,
            documents: Vec::new(),
        }
    }

    pub fn with_document(mut self, title: impl Into<String>, body: impl Into<String>) -> Self {
        self.documents.push((title.into(), body.into()));
        self
    }
}

#[async_trait]
impl ContextSource for StaticSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> SourceKind {
        self.kind
    }

    async fn gather(&self, task: &Task, limit: usize) -> Result<SourceResult, DependencyError> {
        let mut items: Vec<ContextItem> = self
            .documents
            .iter()
            .enumerate()
            .filter_map(|(i, (title, body))| {
                let score = similarity::relevance(&task.description, &format!("{} {}", title, body));
                (score > 0.0).then(|| {
                    ContextItem::new(
                        self.name.as_str(),
                        self.kind,
                        format!("doc-{}", i),
                        title.as_str(),
                        body.as_str(),
                        score,
                    )
                })
            })
            .collect();
        items.sort_by(|a, b| b.relevance.total_cmp(&a.relevance).then(a.id.cmp(&b.id)));
        items.truncate(limit);
        Ok(SourceResult::new(self.name.as_str(), self.kind).with_items(items))
    }
}
