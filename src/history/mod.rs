//! Operation ledger: an append-only journal of every node mutation.
//!
//! Each create / generate-query / execute / revise / delete event is recorded
//! as its own store record and never mutated or deleted afterwards — the
//! audit trail survives subtree deletion. Queries against a node with no
//! history return empty sequences, never a fault.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::store::{KeyValueStore, RecordQuery};
use crate::types::{CombineStrategy, NodeOperation, OperationKind, QueryMapping};

/// Store record name shared by every ledger entry; entries are told apart by
/// their `nodeId` and `operation` attributes.
const LEDGER_KEY: &str = "nodeHistory";

/// Derived lifecycle of a single node, folded from its operations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeLifecycle {
    /// The node id.
    pub node_id: String,
    /// When the node was created, if recorded.
    pub created: Option<DateTime<Utc>>,
    /// When a query was last generated, if ever.
    pub query_generated: Option<DateTime<Utc>>,
    /// When the node was last executed, if ever.
    pub executed: Option<DateTime<Utc>>,
    /// How many times the node was revised.
    pub revised_count: usize,
    /// When the node was deleted, if it was.
    pub deleted: Option<DateTime<Utc>>,
    /// Total operations recorded for the node.
    pub total_operations: usize,
}

/// One revision event, parsed from a revise operation's payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevisionEntry {
    /// When the revision happened.
    pub timestamp: DateTime<Utc>,
    /// Query text before the revision, when it changed.
    pub previous_query: Option<String>,
    /// Query text after the revision, when it changed.
    pub new_query: Option<String>,
    /// Why the node was revised.
    pub reason: Option<String>,
}

/// Aggregate statistics over the whole ledger.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistorySummary {
    /// Total operations recorded.
    pub total_operations: usize,
    /// Number of distinct nodes that appear in the ledger.
    pub unique_nodes: usize,
    /// Operation counts per kind.
    pub operation_counts: HashMap<String, usize>,
    /// Executions whose payload carried an error.
    pub failed_executions: usize,
    /// Nodes with a recorded delete operation.
    pub deleted_nodes: usize,
}

/// Append-only ledger of node operations in a task-scoped store.
#[derive(Debug, Clone)]
pub struct OperationHistory {
    store: KeyValueStore,
}

impl OperationHistory {
    /// Create a ledger over the given store
    pub fn new(store: KeyValueStore) -> Self {
        Self { store }
    }

    /// Append an operation unconditionally.
    pub async fn record(&self, operation: NodeOperation) -> StoreResult<()> {
        let mut attributes = HashMap::new();
        attributes.insert("nodeId".to_string(), operation.node_id.clone());
        attributes.insert("operation".to_string(), operation.kind.to_string());
        self.store
            .set_json_with(LEDGER_KEY, &operation, attributes)
            .await?;
        debug!(node_id = %operation.node_id, kind = %operation.kind, "Recorded operation");
        Ok(())
    }

    /// Record a node creation.
    pub async fn record_create(
        &self,
        node_id: &str,
        intent: &str,
        mapping: Option<&QueryMapping>,
        combine_strategy: Option<&CombineStrategy>,
    ) -> StoreResult<()> {
        let mut data = json!({ "intent": intent });
        if let Some(mapping) = mapping {
            data["mapping"] = serde_json::to_value(mapping).unwrap_or_default();
        }
        if let Some(strategy) = combine_strategy {
            data["combineStrategy"] = serde_json::to_value(strategy).unwrap_or_default();
        }
        self.record(NodeOperation::new(node_id, OperationKind::Create, data))
            .await
    }

    /// Record query generation for a node.
    pub async fn record_generate_query(&self, node_id: &str, query: &str) -> StoreResult<()> {
        self.record(NodeOperation::new(
            node_id,
            OperationKind::GenerateQuery,
            json!({ "query": query }),
        ))
        .await
    }

    /// Record an execution of a node's query.
    pub async fn record_execute(
        &self,
        node_id: &str,
        query: &str,
        row_count: u64,
        error: Option<&str>,
    ) -> StoreResult<()> {
        let mut data = json!({ "query": query, "rowCount": row_count });
        if let Some(error) = error {
            data["error"] = json!(error);
        }
        self.record(NodeOperation::new(node_id, OperationKind::Execute, data))
            .await
    }

    /// Record a revision, carrying the previous and new query text when they
    /// changed.
    pub async fn record_revise(
        &self,
        node_id: &str,
        previous_query: Option<&str>,
        new_query: Option<&str>,
        reason: &str,
    ) -> StoreResult<()> {
        let mut data = json!({ "reason": reason });
        if let Some(previous) = previous_query {
            data["previousQuery"] = json!(previous);
        }
        if let Some(new) = new_query {
            data["newQuery"] = json!(new);
        }
        self.record(NodeOperation::new(node_id, OperationKind::Revise, data))
            .await
    }

    /// Record a node deletion.
    pub async fn record_delete(&self, node_id: &str, reason: Option<&str>) -> StoreResult<()> {
        let data = match reason {
            Some(reason) => json!({ "reason": reason }),
            None => json!({}),
        };
        self.record(NodeOperation::new(node_id, OperationKind::Delete, data))
            .await
    }

    /// All operations, in the order they were recorded.
    pub async fn all_operations(&self) -> StoreResult<Vec<NodeOperation>> {
        let records = self
            .store
            .query(RecordQuery::attribute("name", LEDGER_KEY))
            .await?;
        records
            .into_iter()
            .map(|record| {
                serde_json::from_value(record.value).map_err(|e| StoreError::Corrupt {
                    expected: "NodeOperation".to_string(),
                    message: e.to_string(),
                })
            })
            .collect()
    }

    /// All operations for one node, in recording order.
    pub async fn operations_for(&self, node_id: &str) -> StoreResult<Vec<NodeOperation>> {
        let records = self
            .store
            .query(RecordQuery::attributes([
                ("name", LEDGER_KEY),
                ("nodeId", node_id),
            ]))
            .await?;
        records
            .into_iter()
            .map(|record| {
                serde_json::from_value(record.value).map_err(|e| StoreError::Corrupt {
                    expected: "NodeOperation".to_string(),
                    message: e.to_string(),
                })
            })
            .collect()
    }

    /// All operations of one kind, in recording order.
    pub async fn operations_of_kind(&self, kind: OperationKind) -> StoreResult<Vec<NodeOperation>> {
        let records = self
            .store
            .query(RecordQuery::attributes([
                ("name", LEDGER_KEY),
                ("operation", kind.as_str()),
            ]))
            .await?;
        records
            .into_iter()
            .map(|record| {
                serde_json::from_value(record.value).map_err(|e| StoreError::Corrupt {
                    expected: "NodeOperation".to_string(),
                    message: e.to_string(),
                })
            })
            .collect()
    }

    /// The most recent operation for a node, optionally restricted to a kind.
    pub async fn latest_operation(
        &self,
        node_id: &str,
        kind: Option<OperationKind>,
    ) -> StoreResult<Option<NodeOperation>> {
        let operations = self.operations_for(node_id).await?;
        Ok(operations
            .into_iter()
            .rev()
            .find(|op| kind.map(|k| op.kind == k).unwrap_or(true)))
    }

    /// Fold a node's operations into its derived lifecycle.
    pub async fn lifecycle_of(&self, node_id: &str) -> StoreResult<NodeLifecycle> {
        let operations = self.operations_for(node_id).await?;
        let mut lifecycle = NodeLifecycle {
            node_id: node_id.to_string(),
            total_operations: operations.len(),
            ..Default::default()
        };

        for op in operations {
            match op.kind {
                OperationKind::Create => lifecycle.created = Some(op.timestamp),
                OperationKind::GenerateQuery => lifecycle.query_generated = Some(op.timestamp),
                OperationKind::Execute => lifecycle.executed = Some(op.timestamp),
                OperationKind::Revise => lifecycle.revised_count += 1,
                OperationKind::Delete => lifecycle.deleted = Some(op.timestamp),
            }
        }
        Ok(lifecycle)
    }

    /// Executions whose payload carries a non-empty error.
    pub async fn failed_executions(&self) -> StoreResult<Vec<NodeOperation>> {
        let executions = self.operations_of_kind(OperationKind::Execute).await?;
        Ok(executions
            .into_iter()
            .filter(|op| {
                op.data
                    .get("error")
                    .and_then(|e| e.as_str())
                    .map(|e| !e.is_empty())
                    .unwrap_or(false)
            })
            .collect())
    }

    /// Operations whose timestamp falls within `[start, end]`.
    pub async fn operations_in_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> StoreResult<Vec<NodeOperation>> {
        let operations = self.all_operations().await?;
        Ok(operations
            .into_iter()
            .filter(|op| op.timestamp >= start && op.timestamp <= end)
            .collect())
    }

    /// The revision history of a node, parsed from its revise payloads.
    pub async fn revision_history(&self, node_id: &str) -> StoreResult<Vec<RevisionEntry>> {
        let operations = self.operations_for(node_id).await?;
        Ok(operations
            .into_iter()
            .filter(|op| op.kind == OperationKind::Revise)
            .map(|op| RevisionEntry {
                timestamp: op.timestamp,
                previous_query: op
                    .data
                    .get("previousQuery")
                    .and_then(|v| v.as_str())
                    .map(String::from),
                new_query: op
                    .data
                    .get("newQuery")
                    .and_then(|v| v.as_str())
                    .map(String::from),
                reason: op
                    .data
                    .get("reason")
                    .and_then(|v| v.as_str())
                    .map(String::from),
            })
            .collect())
    }

    /// Ids of all nodes with a recorded delete operation.
    pub async fn deleted_nodes(&self) -> StoreResult<Vec<String>> {
        let deletes = self.operations_of_kind(OperationKind::Delete).await?;
        Ok(deletes.into_iter().map(|op| op.node_id).collect())
    }

    /// Aggregate counts over the whole ledger.
    pub async fn summary(&self) -> StoreResult<HistorySummary> {
        let operations = self.all_operations().await?;

        let mut operation_counts: HashMap<String, usize> = OperationKind::ALL
            .iter()
            .map(|kind| (kind.to_string(), 0))
            .collect();
        let mut unique_nodes: HashSet<String> = HashSet::new();
        let mut failed_executions = 0;

        for op in &operations {
            *operation_counts.entry(op.kind.to_string()).or_insert(0) += 1;
            unique_nodes.insert(op.node_id.clone());
            if op.kind == OperationKind::Execute
                && op
                    .data
                    .get("error")
                    .and_then(|e| e.as_str())
                    .map(|e| !e.is_empty())
                    .unwrap_or(false)
            {
                failed_executions += 1;
            }
        }

        let deleted_nodes = operation_counts
            .get(OperationKind::Delete.as_str())
            .copied()
            .unwrap_or(0);

        Ok(HistorySummary {
            total_operations: operations.len(),
            unique_nodes: unique_nodes.len(),
            operation_counts,
            failed_executions,
            deleted_nodes,
        })
    }
}
