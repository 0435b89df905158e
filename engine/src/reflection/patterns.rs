//! Cross-experience pattern analysis
//!
//! Batch pass over stored experiences. Groups lessons whose descriptions are
//! near-duplicates to surface recurring failure modes, and tallies success
//! rates per domain and the actions lessons recommend most often.

use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use weave_sdk::types::{Experience, LessonType};

use crate::similarity::{jaccard, tokenize};

/// Minimum description similarity for two lessons to share a group
pub const GROUP_SIMILARITY: f64 = 0.6;
/// Minimum group size to be reported
pub const MIN_OCCURRENCES: usize = 2;
const TOP_ACTIONS: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LessonPattern {
    pub lesson_type: LessonType,
    /// Description of the first lesson in the group
    pub description: String,
    pub occurrences: usize,
    pub domains: Vec<String>,
    pub experience_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DomainStats {
    pub domain: String,
    pub total: usize,
    pub successes: usize,
    pub success_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActionCount {
    pub action: String,
    pub count: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PatternAnalysis {
    pub experiences_analyzed: usize,
    /// Failure and error groups first, then by size
    pub recurring: Vec<LessonPattern>,
    /// Sorted by domain name
    pub domains: Vec<DomainStats>,
    pub top_actions: Vec<ActionCount>,
}

struct Group {
    lesson_type: LessonType,
    description: String,
    tokens: HashSet<String>,
    domains: Vec<String>,
    experience_ids: Vec<String>,
    occurrences: usize,
    first_seen: usize,
}

fn severity(lesson_type: LessonType) -> u8 {
    match lesson_type {
        LessonType::Failure | LessonType::Error => 0,
        LessonType::Optimization => 1,
        LessonType::Success => 2,
    }
}

fn push_unique(list: &mut Vec<String>, value: &str) {
    if !list.iter().any(|v| v == value) {
        list.push(value.to_string());
    }
}

pub fn analyze_patterns(experiences: &[Experience]) -> PatternAnalysis {
    let mut groups: Vec<Group> = Vec::new();
    let mut domains: BTreeMap<&str, (usize, usize)> = BTreeMap::new();
    let mut actions: HashMap<String, usize> = HashMap::new();
    let mut seen = 0usize;

    for experience in experiences {
        let entry = domains.entry(experience.domain.as_str()).or_default();
        entry.0 += 1;
        if experience.success {
            entry.1 += 1;
        }

        for lesson in &experience.lessons {
            seen += 1;
            let tokens = tokenize(&lesson.description);

            let target = groups.iter_mut().find(|g| {
                g.lesson_type == lesson.lesson_type && jaccard(&g.tokens, &tokens) >= GROUP_SIMILARITY
            });
            match target {
                Some(group) => {
                    group.occurrences += 1;
                    push_unique(&mut group.domains, &experience.domain);
                    push_unique(&mut group.experience_ids, &experience.id);
                }
                None => groups.push(Group {
                    lesson_type: lesson.lesson_type,
                    description: lesson.description.clone(),
                    tokens,
                    domains: vec![experience.domain.clone()],
                    experience_ids: vec![experience.id.clone()],
                    occurrences: 1,
                    first_seen: seen,
                }),
            }

            for action in &lesson.actions {
                let normalized = action.trim().to_lowercase();
                if !normalized.is_empty() {
                    *actions.entry(normalized).or_default() += 1;
                }
            }
        }
    }

    let mut recurring: Vec<Group> = groups
        .into_iter()
        .filter(|g| g.occurrences >= MIN_OCCURRENCES)
        .collect();
    recurring.sort_by(|a, b| {
        severity(a.lesson_type)
            .cmp(&severity(b.lesson_type))
            .then(b.occurrences.cmp(&a.occurrences))
            .then(a.first_seen.cmp(&b.first_seen))
    });

    let mut top_actions: Vec<ActionCount> = actions
        .into_iter()
        .map(|(action, count)| ActionCount { action, count })
        .collect();
    top_actions.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.action.cmp(&b.action)));
    top_actions.truncate(TOP_ACTIONS);

    PatternAnalysis {
        experiences_analyzed: experiences.len(),
        recurring: recurring
            .into_iter()
            .map(|g| LessonPattern {
                lesson_type: g.lesson_type,
                description: g.description,
                occurrences: g.occurrences,
                domains: g.domains,
                experience_ids: g.experience_ids,
            })
            .collect(),
        domains: domains
            .into_iter()
            .map(|(domain, (total, successes))| DomainStats {
                domain: domain.to_string(),
                total,
                successes,
                success_rate: successes as f64 / total as f64,
            })
            .collect(),
        top_actions,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;
    use weave_sdk::types::{
        Context, Impact, Lesson, Outcome, OutcomeMetrics, Plan, RiskLevel, Task,
    };

    fn lesson(lesson_type: LessonType, description: &str, actions: &[&str]) -> Lesson {
        Lesson {
            lesson_type,
            description: description.to_string(),
            actions: actions.iter().map(|a| a.to_string()).collect(),
            impact: Impact::Medium,
            applicable_domains: vec![],
        }
    }

    fn experience(domain: &str, success: bool, lessons: Vec<Lesson>) -> Experience {
        let task = Task::new("task", domain);
        let plan = Plan {
            id: "p".into(),
            task_id: task.id.clone(),
            steps: vec![],
            confidence: 0.5,
            estimated_effort: 1.0,
            reasoning_path: "direct/0".into(),
            risk_level: RiskLevel::Low,
            rationale: String::new(),
        };
        let outcome = Outcome {
            success,
            data: Value::Null,
            duration_ms: 1,
            metrics: OutcomeMetrics::default(),
            logs: vec![],
            error: None,
        };
        Experience::new(task.clone(), Context::empty(task), plan, outcome, lessons)
    }

    #[test]
    fn test_recurring_failures_come_first() {
        let experiences = vec![
            experience(
                "ops",
                true,
                vec![lesson(LessonType::Success, "Caching build artifacts speeds deploys", &["cache artifacts"])],
            ),
            experience(
                "ops",
                false,
                vec![lesson(LessonType::Failure, "Registry push timed out during deploy", &["Retry push"])],
            ),
            experience(
                "docs",
                true,
                vec![
                    lesson(LessonType::Success, "Caching build artifacts speeds deploys", &["cache artifacts"]),
                    lesson(LessonType::Failure, "Registry push timed out during deploy", &["retry push "]),
                ],
            ),
        ];

        let analysis = analyze_patterns(&experiences);
        assert_eq!(analysis.experiences_analyzed, 3);
        assert_eq!(analysis.recurring.len(), 2);
        assert_eq!(analysis.recurring[0].lesson_type, LessonType::Failure);
        assert_eq!(analysis.recurring[0].occurrences, 2);
        assert_eq!(analysis.recurring[0].domains, vec!["ops", "docs"]);
        assert_eq!(analysis.recurring[1].lesson_type, LessonType::Success);

        assert_eq!(analysis.domains.len(), 2);
        assert_eq!(analysis.domains[0].domain, "docs");
        assert_eq!(analysis.domains[1].total, 2);
        assert!((analysis.domains[1].success_rate - 0.5).abs() < 1e-9);

        assert_eq!(analysis.top_actions[0].count, 2);
        assert_eq!(analysis.top_actions[0].action, "cache artifacts");
        assert_eq!(analysis.top_actions[1].action, "retry push");
    }

    #[test]
    fn test_singletons_and_type_mismatches_are_not_recurring() {
        let experiences = vec![
            experience(
                "ops",
                false,
                vec![lesson(LessonType::Failure, "Disk quota exceeded on runner", &[])],
            ),
            experience(
                "ops",
                false,
                vec![lesson(LessonType::Optimization, "Disk quota exceeded on runner", &[])],
            ),
        ];
        let analysis = analyze_patterns(&experiences);
        assert!(analysis.recurring.is_empty());
        assert!(analysis.top_actions.is_empty());
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(analyze_patterns(&[]), PatternAnalysis::default());
    }
}
