//! Tree-structured plan exploration
//!
//! Depth 1 holds `branching` plans generated from the context; each deeper
//! level holds `branching` refinements of every expanded parent. Nodes are
//! scored per sibling group by a [`NodeStrategy`].
//!
//! A node is viable when it and all of its ancestors score at least
//! `prune_threshold`. The result is the best viable node, or the best node
//! overall when nothing is viable. Descendants of a non-viable node can never
//! be viable, so skipping their expansion (pruning) saves LLM calls without
//! changing the result.

use futures::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};
use weave_sdk::types::{Context, Plan};

use super::planner::{CandidateError, PlanGenerator};
use super::scoring::{preference, PlanScorer, ScoreBreakdown};
use super::strategies::{NodeStrategy, NodeView};
use super::ReasoningError;
use crate::config::TreeConfig;

#[derive(Debug, Clone, Serialize)]
pub struct TreeNode {
    /// Position in the tree, e.g. `"0.2.1"`
    pub id: String,
    pub parent: Option<usize>,
    pub depth: usize,
    pub plan: Plan,
    pub heuristic: ScoreBreakdown,
    /// Strategy score
    pub score: f64,
    pub viable: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TreeStats {
    pub nodes_visited: usize,
    pub nodes_pruned: usize,
    pub max_depth_reached: usize,
    pub avg_branching_factor: f64,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone)]
pub struct Exploration {
    /// Nodes in generation order
    pub nodes: Vec<TreeNode>,
    /// Index of the selected node
    pub best: usize,
    pub stats: TreeStats,
}

impl Exploration {
    pub fn best_node(&self) -> &TreeNode {
        &self.nodes[self.best]
    }
}

pub struct TreeExplorer {
    generator: Arc<PlanGenerator>,
    scorer: PlanScorer,
    strategy: Box<dyn NodeStrategy>,
    config: TreeConfig,
    seed: Option<u64>,
}

/// Stable 64-bit FNV-1a hash, used to derive per-node seeds
fn path_hash(path: &str) -> u64 {
    path.bytes().fold(0xcbf2_9ce4_8422_2325, |hash, b| {
        (hash ^ u64::from(b)).wrapping_mul(0x0000_0100_0000_01b3)
    })
}

impl TreeExplorer {
    pub fn new(
        generator: Arc<PlanGenerator>,
        scorer: PlanScorer,
        strategy: Box<dyn NodeStrategy>,
        config: TreeConfig,
        seed: Option<u64>,
    ) -> Self {
        Self {
            generator,
            scorer,
            strategy,
            config,
            seed,
        }
    }

    fn node_seed(&self, id: &str) -> Option<u64> {
        self.seed.map(|s| s.wrapping_add(path_hash(id)))
    }

    pub async fn explore(&self, context: &Context) -> Result<Exploration, ReasoningError> {
        let start = Instant::now();
        let branching = self.config.branching.max(1);
        let max_depth = self.config.max_depth.max(1);

        let mut nodes: Vec<TreeNode> = Vec::new();
        let mut failures: Vec<String> = Vec::new();
        let mut frontier: Vec<Option<usize>> = vec![None];
        let mut expanded = 0usize;
        let mut pruned = 0usize;

        for depth in 1..=max_depth {
            if frontier.is_empty() {
                break;
            }
            expanded += frontier.len();

            let generated = self
                .expand(context, &nodes, &frontier, branching, depth)
                .await;

            let level_start = nodes.len();
            for (parent, children) in generated {
                let mut group: Vec<(String, Plan)> = Vec::new();
                for (id, result) in children {
                    match result {
                        Ok(plan) => group.push((id, plan)),
                        Err(e) => {
                            warn!(node = %id, "Plan generation failed: {}", e);
                            failures.push(format!("{}: {}", id, e));
                        }
                    }
                }
                if group.is_empty() {
                    continue;
                }
                self.score_group(context, &mut nodes, parent, depth, group)
                    .await;
            }

            let level: Vec<usize> = (level_start..nodes.len()).collect();
            frontier = if depth < max_depth {
                if self.config.prune {
                    pruned += level.iter().filter(|&&i| !nodes[i].viable).count();
                    level
                        .into_iter()
                        .filter(|&i| nodes[i].viable)
                        .map(Some)
                        .collect()
                } else {
                    level.into_iter().map(Some).collect()
                }
            } else {
                Vec::new()
            };
        }

        if nodes.is_empty() {
            return Err(ReasoningError::NoPlans { failures });
        }

        let viable: Vec<usize> = (0..nodes.len()).filter(|&i| nodes[i].viable).collect();
        let pool: Vec<usize> = if viable.is_empty() {
            warn!("No viable plan in tree; selecting best overall");
            (0..nodes.len()).collect()
        } else {
            viable
        };
        let best = pool
            .into_iter()
            .min_by(|&a, &b| {
                preference(
                    (&nodes[a].plan, nodes[a].score, a),
                    (&nodes[b].plan, nodes[b].score, b),
                )
            })
            .unwrap_or(0);

        let children = nodes.len();
        let stats = TreeStats {
            nodes_visited: children,
            nodes_pruned: pruned,
            max_depth_reached: nodes.iter().map(|n| n.depth).max().unwrap_or(0),
            avg_branching_factor: if expanded > 0 {
                children as f64 / expanded as f64
            } else {
                0.0
            },
            elapsed_ms: start.elapsed().as_millis() as u64,
        };

        info!(
            strategy = self.strategy.name(),
            nodes = stats.nodes_visited,
            pruned = stats.nodes_pruned,
            depth = stats.max_depth_reached,
            best = %nodes[best].id,
            "Tree exploration complete"
        );

        Ok(Exploration { nodes, best, stats })
    }

    /// Generate `branching` children for every parent in `frontier`
    #[allow(clippy::type_complexity)]
    async fn expand(
        &self,
        context: &Context,
        nodes: &[TreeNode],
        frontier: &[Option<usize>],
        branching: usize,
        depth: usize,
    ) -> Vec<(Option<usize>, Vec<(String, Result<Plan, CandidateError>)>)> {
        let per_parent = frontier.iter().map(|&parent| async move {
            let children = (0..branching).map(|b| {
                let id = match parent {
                    Some(p) => format!("{}.{}", nodes[p].id, b),
                    None => b.to_string(),
                };
                let seed = self.node_seed(&id);
                let path = format!("tree/{}", id);
                async move {
                    let result = match parent {
                        Some(p) => {
                            self.generator
                                .refine(context, &nodes[p].plan, b, seed, &path)
                                .await
                        }
                        None => {
                            self.generator
                                .generate(context, b, branching, seed, &path)
                                .await
                        }
                    };
                    (id, result)
                }
            });
            (parent, join_all(children).await)
        });

        debug!(depth, parents = frontier.len(), "Expanding tree level");
        join_all(per_parent).await
    }

    /// Score one sibling group and append it to the tree
    async fn score_group(
        &self,
        context: &Context,
        nodes: &mut Vec<TreeNode>,
        parent: Option<usize>,
        depth: usize,
        group: Vec<(String, Plan)>,
    ) {
        let heuristics: Vec<ScoreBreakdown> = group
            .iter()
            .map(|(_, plan)| self.scorer.score(plan, context))
            .collect();
        let scores = {
            let views: Vec<NodeView<'_>> = group
                .iter()
                .zip(&heuristics)
                .map(|((id, plan), h)| NodeView {
                    plan,
                    heuristic: h.total,
                    depth,
                    seed: self.node_seed(id),
                })
                .collect();
            self.strategy.score(context, &views).await
        };

        let parent_viable = parent.map_or(true, |p| nodes[p].viable);
        for (((id, plan), heuristic), score) in group.into_iter().zip(heuristics).zip(scores) {
            let score = score.clamp(0.0, 1.0);
            nodes.push(TreeNode {
                viable: parent_viable && score >= self.config.prune_threshold,
                id,
                parent,
                depth,
                plan,
                heuristic,
                score,
            });
        }
    }
}
