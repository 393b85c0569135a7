//! Status-driven scheduler.
//!
//! The scheduler inspects the tree and the out-of-band judgments and decides
//! which logical step runs next, and on which node. It is a pure read-only
//! function: it never mutates the tree, the store, or the cursor, so two
//! consecutive calls over the same state return the same decision. Callers
//! perform the indicated step through a collaborator, write the results back
//! through the tree manager, and consult the scheduler again.
//!
//! Per-node dependency order: linking before analysis, analysis before query
//! generation, a complex node's children before its own combining query, and
//! evaluation before any revision verdict. The whole task is complete when
//! every node has executed successfully with an acceptable judgment (or has
//! exhausted its generation attempts).

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{AppResult, TreeError};
use crate::judgment::{JudgmentStore, QualityJudgment, ResultQuality, RevisionAspect};
use crate::tree::{QueryTreeManager, TreeSnapshot};
use crate::types::{NodeStatus, QueryNode};

/// Thresholds the scheduler judges resolution against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerLimits {
    /// Minimum quality for a judgment to count as acceptable.
    pub quality_threshold: ResultQuality,
    /// Generation attempts after which a node counts as resolved even
    /// without an acceptable judgment.
    pub max_generation_attempts: u32,
}

impl Default for SchedulerLimits {
    fn default() -> Self {
        Self {
            quality_threshold: ResultQuality::Good,
            max_generation_attempts: 3,
        }
    }
}

/// Why a node is being sent back for revision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevisionReason {
    /// Which aspect the judgment blames.
    pub aspect: RevisionAspect,
    /// Human-readable detail, usually the evaluator's summary.
    pub detail: String,
}

/// The scheduler's verdict: the next logical step and its target node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum Decision {
    /// The node has no data-source mapping yet.
    NeedsLinking {
        /// Target node.
        node_id: String,
    },
    /// The node has a mapping but no recorded intent analysis.
    NeedsAnalysis {
        /// Target node.
        node_id: String,
    },
    /// The node needs query text generated (or regenerated).
    NeedsQuery {
        /// Target node.
        node_id: String,
    },
    /// The node's current query has no stored judgment yet; execute it if
    /// needed and evaluate the result.
    NeedsEvaluation {
        /// Target node.
        node_id: String,
    },
    /// The node's judgment is bad; revise the blamed aspect.
    NeedsRevision {
        /// Target node.
        node_id: String,
        /// Why, and where revision re-enters the pipeline.
        reason: RevisionReason,
    },
    /// Every node is resolved; the task is done.
    Complete,
    /// The tree is unusable for scheduling.
    Error {
        /// What went wrong.
        reason: String,
    },
}

impl Decision {
    /// The node the decision targets, when it targets one.
    pub fn target_node(&self) -> Option<&str> {
        match self {
            Decision::NeedsLinking { node_id }
            | Decision::NeedsAnalysis { node_id }
            | Decision::NeedsQuery { node_id }
            | Decision::NeedsEvaluation { node_id }
            | Decision::NeedsRevision { node_id, .. } => Some(node_id),
            Decision::Complete | Decision::Error { .. } => None,
        }
    }

    /// Whether the decision ends the control loop.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Decision::Complete | Decision::Error { .. })
    }
}

/// Decide the next step for the given tree and judgment snapshot.
///
/// Pure and deterministic: the result depends only on the arguments.
pub fn decide(
    snapshot: &TreeSnapshot,
    judgments: &HashMap<String, QualityJudgment>,
    limits: &SchedulerLimits,
) -> Decision {
    if snapshot.nodes.is_empty() {
        return Decision::Error {
            reason: "query tree has no nodes".to_string(),
        };
    }
    if !snapshot.contains(&snapshot.root_id) {
        return Decision::Error {
            reason: format!("root node {} is missing from the tree", snapshot.root_id),
        };
    }

    let resolved: HashMap<&str, bool> = snapshot
        .nodes
        .values()
        .map(|node| {
            (
                node.node_id.as_str(),
                is_resolved(node, judgments.get(&node.node_id), limits),
            )
        })
        .collect();

    // Completion is a property of the whole tree, not just the cursor.
    if resolved.values().all(|done| *done) {
        return Decision::Complete;
    }

    let target_id = match select_target(snapshot, &resolved) {
        Some(id) => id,
        None => {
            return Decision::Error {
                reason: "no schedulable node found in an unresolved tree".to_string(),
            }
        }
    };
    let Some(target) = snapshot.get(&target_id) else {
        return Decision::Error {
            reason: format!("target node {} is missing from the tree", target_id),
        };
    };

    let decision = decide_for_node(target, judgments.get(&target_id), limits);
    debug!(node_id = %target_id, ?decision, "Scheduler decision");
    decision
}

/// A node is resolved when it executed successfully with an acceptable
/// judgment for its current query, or when its generation attempts are
/// exhausted.
fn is_resolved(
    node: &QueryNode,
    judgment: Option<&QualityJudgment>,
    limits: &SchedulerLimits,
) -> bool {
    if limits.max_generation_attempts > 0
        && node.generation_attempts >= limits.max_generation_attempts
    {
        return true;
    }
    node.status == NodeStatus::ExecutedSuccess
        && current_judgment(node, judgment)
            .map(|j| j.is_acceptable(limits.quality_threshold))
            .unwrap_or(false)
}

/// A judgment only counts for the query text it was produced against.
fn current_judgment<'a>(
    node: &QueryNode,
    judgment: Option<&'a QualityJudgment>,
) -> Option<&'a QualityJudgment> {
    let judgment = judgment?;
    let query = node.query.as_deref()?;
    (judgment.query == query).then_some(judgment)
}

/// Walk from the cursor (root when missing or stale) to the node to work on:
/// descend into the first child subtree that still holds unresolved work,
/// process a node only once its children are done, and climb past fully
/// resolved subtrees. Bounded by the node count, so malformed pointers
/// cannot loop the walk.
fn select_target(snapshot: &TreeSnapshot, resolved: &HashMap<&str, bool>) -> Option<String> {
    let has_unresolved = subtree_unresolved_map(snapshot, resolved);

    let mut current = snapshot
        .current_node_id
        .as_deref()
        .filter(|id| snapshot.contains(id))
        .unwrap_or(snapshot.root_id.as_str());

    // Each tree edge is crossed at most twice (one descent, one climb).
    for _ in 0..=2 * snapshot.nodes.len() {
        let node = snapshot.get(current)?;

        if let Some(child) = node
            .child_ids
            .iter()
            .find(|child| has_unresolved.get(child.as_str()).copied().unwrap_or(false))
        {
            current = child;
            continue;
        }
        if !resolved.get(current).copied().unwrap_or(true) {
            return Some(current.to_string());
        }
        match node.parent_id.as_deref() {
            Some(parent) if snapshot.contains(parent) => current = parent,
            _ => break,
        }
    }

    // The cursor's component is fully resolved; fall back to the first
    // unresolved node in deterministic id order.
    let mut unresolved: Vec<&str> = resolved
        .iter()
        .filter(|(_, done)| !**done)
        .map(|(id, _)| *id)
        .collect();
    unresolved.sort_unstable();
    unresolved.first().map(|id| id.to_string())
}

/// For every node, whether its subtree (itself included) holds unresolved
/// work. Visited-bounded against back-references.
fn subtree_unresolved_map<'a>(
    snapshot: &'a TreeSnapshot,
    resolved: &HashMap<&str, bool>,
) -> HashMap<&'a str, bool> {
    let mut map: HashMap<&str, bool> = HashMap::new();
    for node_id in snapshot.nodes.keys() {
        let mut visited = HashSet::new();
        let unresolved = subtree_unresolved(snapshot, resolved, node_id, &mut visited);
        map.insert(node_id.as_str(), unresolved);
    }
    map
}

fn subtree_unresolved(
    snapshot: &TreeSnapshot,
    resolved: &HashMap<&str, bool>,
    node_id: &str,
    visited: &mut HashSet<String>,
) -> bool {
    if !visited.insert(node_id.to_string()) {
        return false;
    }
    let Some(node) = snapshot.get(node_id) else {
        return false;
    };
    if !resolved.get(node_id).copied().unwrap_or(true) {
        return true;
    }
    node.child_ids
        .iter()
        .any(|child| subtree_unresolved(snapshot, resolved, child, visited))
}

/// Apply the per-node dependency rules to the selected target.
fn decide_for_node(
    node: &QueryNode,
    judgment: Option<&QualityJudgment>,
    limits: &SchedulerLimits,
) -> Decision {
    let node_id = node.node_id.clone();

    if !node.has_mapping() {
        return Decision::NeedsLinking { node_id };
    }
    if node.analysis.is_none() {
        return Decision::NeedsAnalysis { node_id };
    }
    if node.query.is_none() {
        return Decision::NeedsQuery { node_id };
    }
    // A generated query that has not been executed yet always needs the
    // execute-and-evaluate step, even when an identical earlier query was
    // already judged; the judgment belongs to the previous pass.
    if !node.status.is_executed() {
        return Decision::NeedsEvaluation { node_id };
    }

    let judgment = current_judgment(node, judgment);
    match judgment {
        None => Decision::NeedsEvaluation { node_id },
        Some(judgment) => {
            let acceptable = judgment.is_acceptable(limits.quality_threshold)
                && node.status == NodeStatus::ExecutedSuccess;
            if acceptable {
                // Navigation only targets unresolved nodes; reaching a
                // resolved one means the tree and judgments disagree.
                Decision::Error {
                    reason: format!("node {} is already resolved", node_id),
                }
            } else {
                let aspect = judgment.blames.unwrap_or_default();
                let detail = if judgment.summary.is_empty() {
                    format!("result quality {} below threshold", judgment.quality)
                } else {
                    judgment.summary.clone()
                };
                Decision::NeedsRevision {
                    node_id,
                    reason: RevisionReason { aspect, detail },
                }
            }
        }
    }
}

/// Store-reading convenience wrapper around [`decide`].
///
/// Gathers one consistent tree snapshot plus the judgment set and runs the
/// pure decision function. Still mutation-free: moving the cursor after a
/// decision is the caller's job.
#[derive(Debug, Clone)]
pub struct TaskScheduler {
    tree: QueryTreeManager,
    judgments: JudgmentStore,
    limits: SchedulerLimits,
}

impl TaskScheduler {
    /// Create a scheduler over the given managers
    pub fn new(tree: QueryTreeManager, judgments: JudgmentStore, limits: SchedulerLimits) -> Self {
        Self {
            tree,
            judgments,
            limits,
        }
    }

    /// Decide the next step for the current tree state.
    pub async fn next_step(&self) -> AppResult<Decision> {
        let snapshot = match self.tree.snapshot().await {
            Ok(snapshot) => snapshot,
            Err(TreeError::TreeUninitialized) => {
                return Ok(Decision::Error {
                    reason: "query tree is not initialized".to_string(),
                })
            }
            Err(e) => return Err(e.into()),
        };
        let judgments = self.judgments.all().await?;
        Ok(decide(&snapshot, &judgments, &self.limits))
    }

    /// The limits this scheduler judges against.
    pub fn limits(&self) -> &SchedulerLimits {
        &self.limits
    }
}
