//! Out-of-band quality judgments for query nodes.
//!
//! The evaluation collaborator inspects a node's intent, query, and execution
//! result and produces a [`QualityJudgment`]. Judgments are stored keyed by
//! node id, outside the node itself, and consulted by the scheduler. A
//! judgment is only valid for the query text it was produced against; once
//! the node's query changes, the old judgment counts as missing.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::store::{KeyValueStore, RecordQuery};

fn judgment_record_name(node_id: &str) -> String {
    format!("evaluation:{}", node_id)
}

/// Graded verdict on a node's result quality.
///
/// Ordered from worst to best so a configured threshold can be compared
/// directly.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ResultQuality {
    /// The result is wrong or unusable.
    Poor,
    /// The result is usable but flawed.
    Acceptable,
    /// The result answers the intent well.
    Good,
    /// The result is exactly right.
    Excellent,
}

impl ResultQuality {
    /// Whether this quality meets the given threshold.
    pub fn meets(&self, threshold: ResultQuality) -> bool {
        *self >= threshold
    }
}

impl std::fmt::Display for ResultQuality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResultQuality::Poor => write!(f, "poor"),
            ResultQuality::Acceptable => write!(f, "acceptable"),
            ResultQuality::Good => write!(f, "good"),
            ResultQuality::Excellent => write!(f, "excellent"),
        }
    }
}

impl std::str::FromStr for ResultQuality {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "poor" => Ok(ResultQuality::Poor),
            "acceptable" => Ok(ResultQuality::Acceptable),
            "good" => Ok(ResultQuality::Good),
            "excellent" => Ok(ResultQuality::Excellent),
            _ => Err(format!("Unknown result quality: {}", s)),
        }
    }
}

/// Which pipeline aspect a bad judgment blames, steering where revision
/// re-enters the per-node lifecycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RevisionAspect {
    /// The data-source mapping is wrong; relink the schema.
    Linking,
    /// The decomposition or direct-generation call was wrong; re-analyze.
    Analysis,
    /// The query itself is wrong; regenerate it.
    #[default]
    Generation,
}

impl std::fmt::Display for RevisionAspect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RevisionAspect::Linking => write!(f, "linking"),
            RevisionAspect::Analysis => write!(f, "analysis"),
            RevisionAspect::Generation => write!(f, "generation"),
        }
    }
}

impl std::str::FromStr for RevisionAspect {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "linking" => Ok(RevisionAspect::Linking),
            "analysis" => Ok(RevisionAspect::Analysis),
            "generation" => Ok(RevisionAspect::Generation),
            _ => Err(format!("Unknown revision aspect: {}", s)),
        }
    }
}

/// External verdict on whether a node's result answers its intent and at
/// what quality.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QualityJudgment {
    /// The query text this judgment was produced for.
    pub query: String,
    /// Whether the result answers the node's intent.
    pub answers_intent: bool,
    /// Graded quality of the result.
    pub quality: ResultQuality,
    /// Free-text explanation from the evaluator.
    #[serde(default)]
    pub summary: String,
    /// Which aspect to revise when the judgment is bad.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blames: Option<RevisionAspect>,
}

impl QualityJudgment {
    /// Create a new judgment for the given query text
    pub fn new(
        query: impl Into<String>,
        answers_intent: bool,
        quality: ResultQuality,
        summary: impl Into<String>,
    ) -> Self {
        Self {
            query: query.into(),
            answers_intent,
            quality,
            summary: summary.into(),
            blames: None,
        }
    }

    /// Set the blamed aspect
    pub fn with_blame(mut self, aspect: RevisionAspect) -> Self {
        self.blames = Some(aspect);
        self
    }

    /// Whether the judgment is acceptable at the given quality threshold.
    pub fn is_acceptable(&self, threshold: ResultQuality) -> bool {
        self.answers_intent && self.quality.meets(threshold)
    }
}

/// Store-backed map of node id to latest judgment.
#[derive(Debug, Clone)]
pub struct JudgmentStore {
    store: KeyValueStore,
}

impl JudgmentStore {
    /// Create a judgment store over the given store
    pub fn new(store: KeyValueStore) -> Self {
        Self { store }
    }

    /// Record a judgment for a node, superseding any earlier one.
    pub async fn put(&self, node_id: &str, judgment: &QualityJudgment) -> StoreResult<()> {
        let mut attributes = HashMap::new();
        attributes.insert("nodeId".to_string(), node_id.to_string());
        attributes.insert("entity".to_string(), "nodeEvaluation".to_string());
        self.store
            .set_json_with(judgment_record_name(node_id), judgment, attributes)
            .await?;
        debug!(node_id, quality = %judgment.quality, "Stored judgment");
        Ok(())
    }

    /// The latest judgment for a node, if any.
    pub async fn get(&self, node_id: &str) -> StoreResult<Option<QualityJudgment>> {
        self.store.get_json(&judgment_record_name(node_id)).await
    }

    /// Latest judgment per node, across all judged nodes.
    pub async fn all(&self) -> StoreResult<HashMap<String, QualityJudgment>> {
        let records = self
            .store
            .query(RecordQuery::attribute("entity", "nodeEvaluation"))
            .await?;

        // Store order is insertion order, so later records supersede earlier
        // ones for the same node.
        let mut judgments = HashMap::new();
        for record in records {
            let Some(node_id) = record.attributes.get("nodeId").cloned() else {
                continue;
            };
            let judgment: QualityJudgment =
                serde_json::from_value(record.value).map_err(|e| StoreError::Corrupt {
                    expected: "QualityJudgment".to_string(),
                    message: e.to_string(),
                })?;
            judgments.insert(node_id, judgment);
        }
        Ok(judgments)
    }
}
