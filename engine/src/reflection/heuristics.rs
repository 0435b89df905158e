//! Outcome log heuristics
//!
//! Scans execution logs for the footprints the failure policy leaves behind
//! (retries, open breakers, timeouts, fallbacks, degraded steps, failed
//! steps) and turns them into findings and plain-text recommendations. The
//! findings also go into the lesson prompt so the model does not have to
//! rediscover them.

use regex::Regex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::OnceLock;
use weave_sdk::types::LogEntry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingKind {
    Retry,
    CircuitOpen,
    Timeout,
    Fallback,
    Degraded,
    StepFailed,
}

impl fmt::Display for FindingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Retry => "retry",
            Self::CircuitOpen => "circuit_open",
            Self::Timeout => "timeout",
            Self::Fallback => "fallback",
            Self::Degraded => "degraded",
            Self::StepFailed => "step_failed",
        };
        f.write_str(s)
    }
}

/// One pattern hit, aggregated per step
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Finding {
    pub kind: FindingKind,
    pub step_id: Option<String>,
    pub occurrences: u32,
    /// First captured detail (category, action name, delay)
    pub detail: Option<String>,
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} x{} on step {}",
            self.kind,
            self.occurrences,
            self.step_id.as_deref().unwrap_or("-")
        )?;
        if let Some(detail) = &self.detail {
            write!(f, " ({})", detail)?;
        }
        Ok(())
    }
}

static PATTERNS: OnceLock<Vec<(FindingKind, Regex)>> = OnceLock::new();

fn patterns() -> &'static [(FindingKind, Regex)] {
    PATTERNS.get_or_init(|| {
        [
            (FindingKind::Retry, r"failed \[(\w+)\].*; retrying in \d+ms"),
            (FindingKind::CircuitOpen, r"Circuit open, skipping action '([^']*)'"),
            (FindingKind::Timeout, r"(?i)timed out after (\d+)ms"),
            (FindingKind::Fallback, r"Falling back to '([^']*)'"),
            (FindingKind::Degraded, r"degraded to configured value"),
            (FindingKind::StepFailed, r"^Step failed \[(\w+)\]"),
        ]
        .into_iter()
        .filter_map(|(kind, pattern)| Regex::new(pattern).ok().map(|re| (kind, re)))
        .collect()
    })
}

/// Scan `logs` in order; each line may produce several findings
pub fn scan_logs(logs: &[LogEntry]) -> Vec<Finding> {
    let mut merged: BTreeMap<(FindingKind, Option<String>), Finding> = BTreeMap::new();

    for entry in logs {
        for (kind, re) in patterns() {
            let Some(caps) = re.captures(&entry.message) else {
                continue;
            };
            let detail = caps.get(1).map(|m| m.as_str().to_string());
            merged
                .entry((*kind, entry.step_id.clone()))
                .and_modify(|f| f.occurrences += 1)
                .or_insert_with(|| Finding {
                    kind: *kind,
                    step_id: entry.step_id.clone(),
                    occurrences: 1,
                    detail,
                });
        }
    }

    merged.into_values().collect()
}

/// One recommendation per finding, in finding order
pub fn recommendations(findings: &[Finding]) -> Vec<String> {
    findings
        .iter()
        .map(|f| {
            let step = f.step_id.as_deref().unwrap_or("(plan)");
            let detail = f.detail.as_deref().unwrap_or("unknown");
            match f.kind {
                FindingKind::Retry => format!(
                    "Step '{}' needed {} retr{} for {} errors; consider a longer base delay or a fallback action",
                    step,
                    f.occurrences,
                    if f.occurrences == 1 { "y" } else { "ies" },
                    detail
                ),
                FindingKind::CircuitOpen => format!(
                    "The dependency behind step '{}' had an open circuit; give the step a fallback that avoids it",
                    step
                ),
                FindingKind::Timeout => format!(
                    "Step '{}' hit a {}ms timeout; split the step or raise the limit",
                    step, detail
                ),
                FindingKind::Fallback => format!(
                    "Step '{}' relied on fallback '{}'; consider promoting it to the primary action",
                    step, detail
                ),
                FindingKind::Degraded => format!(
                    "Step '{}' returned its degradation value; the primary path needs attention",
                    step
                ),
                FindingKind::StepFailed => format!(
                    "Step '{}' failed with a {} error; address it before re-running the task",
                    step, detail
                ),
            }
        })
        .collect()
}
