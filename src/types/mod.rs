//! Shared data model for the decomposition-tree workflow.
//!
//! This module defines the entities passed between the tree manager, the
//! operation ledger, the scheduler, and the external collaborators: task
//! context, query nodes, data-source mappings, combine strategies, execution
//! results, and node operations.
//!
//! Every type serializes to JSON with stable camelCase field names; unknown
//! fields are ignored on read so forward-compatible collaborators can attach
//! extra data without breaking the engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Status of the overall task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Task context has been created but processing has not started.
    #[default]
    Initializing,
    /// The workflow loop is running.
    Processing,
    /// Every node resolved with an acceptable result.
    Completed,
    /// The task was aborted by a fatal error or step exhaustion.
    Failed,
}

impl TaskStatus {
    /// Whether the task has reached a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    /// Whether a transition to `next` is allowed.
    ///
    /// Transitions are monotonic: initializing -> processing -> completed or
    /// failed. Re-initialization is an explicit reset handled by the context
    /// manager, not a transition.
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        match (self, next) {
            (TaskStatus::Initializing, TaskStatus::Processing) => true,
            (TaskStatus::Initializing, TaskStatus::Failed) => true,
            (TaskStatus::Processing, TaskStatus::Completed) => true,
            (TaskStatus::Processing, TaskStatus::Failed) => true,
            (a, b) => *a == b,
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Initializing => write!(f, "initializing"),
            TaskStatus::Processing => write!(f, "processing"),
            TaskStatus::Completed => write!(f, "completed"),
            TaskStatus::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "initializing" => Ok(TaskStatus::Initializing),
            "processing" => Ok(TaskStatus::Processing),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            _ => Err(format!("Unknown task status: {}", s)),
        }
    }
}

/// Status of a query node.
///
/// The per-node state machine is
/// `created -> query_generated -> {executed_success | executed_failed} ->
/// revised -> query_generated -> ...`; a node may cycle through generation,
/// failure, and revision arbitrarily many times.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    /// Node exists but no query has been generated yet.
    #[default]
    Created,
    /// A query has been generated and is awaiting execution.
    QueryGenerated,
    /// The query executed without an execution-level error.
    ExecutedSuccess,
    /// The query execution reported an error.
    ExecutedFailed,
    /// The node was sent back for another generation pass.
    Revised,
}

impl NodeStatus {
    /// Whether the node has been executed, successfully or not.
    pub fn is_executed(&self) -> bool {
        matches!(self, NodeStatus::ExecutedSuccess | NodeStatus::ExecutedFailed)
    }
}

impl std::fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeStatus::Created => write!(f, "created"),
            NodeStatus::QueryGenerated => write!(f, "query_generated"),
            NodeStatus::ExecutedSuccess => write!(f, "executed_success"),
            NodeStatus::ExecutedFailed => write!(f, "executed_failed"),
            NodeStatus::Revised => write!(f, "revised"),
        }
    }
}

impl std::str::FromStr for NodeStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "created" => Ok(NodeStatus::Created),
            "query_generated" => Ok(NodeStatus::QueryGenerated),
            "executed_success" => Ok(NodeStatus::ExecutedSuccess),
            "executed_failed" => Ok(NodeStatus::ExecutedFailed),
            "revised" => Ok(NodeStatus::Revised),
            _ => Err(format!("Unknown node status: {}", s)),
        }
    }
}

/// Kind of operation recorded in the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    /// A node was created.
    Create,
    /// A query was generated for a node.
    GenerateQuery,
    /// A node's query was executed.
    Execute,
    /// A node was revised after a bad judgment.
    Revise,
    /// A node was deleted.
    Delete,
}

impl OperationKind {
    /// All operation kinds, in ledger-summary order.
    pub const ALL: [OperationKind; 5] = [
        OperationKind::Create,
        OperationKind::GenerateQuery,
        OperationKind::Execute,
        OperationKind::Revise,
        OperationKind::Delete,
    ];

    /// Get the kind name as a string
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Create => "create",
            OperationKind::GenerateQuery => "generate_query",
            OperationKind::Execute => "execute",
            OperationKind::Revise => "revise",
            OperationKind::Delete => "delete",
        }
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for OperationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "create" => Ok(OperationKind::Create),
            "generate_query" => Ok(OperationKind::GenerateQuery),
            "execute" => Ok(OperationKind::Execute),
            "revise" => Ok(OperationKind::Revise),
            "delete" => Ok(OperationKind::Delete),
            _ => Err(format!("Unknown operation kind: {}", s)),
        }
    }
}

/// A table selected for a node's query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableMapping {
    /// Table name in the data source.
    pub name: String,
    /// Optional alias used in the generated query.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    /// What the table contributes to the query.
    #[serde(default)]
    pub purpose: String,
}

/// A column selected for a node's query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnMapping {
    /// Owning table name.
    pub table: String,
    /// Column name.
    pub column: String,
    /// How the column is used (select, filter, join, groupBy, orderBy).
    pub used_for: String,
    /// Exact literal value for filters, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exact_value: Option<String>,
    /// Data type of the column, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_type: Option<String>,
}

/// A join relationship between two mapped tables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinMapping {
    /// Left-hand table.
    #[serde(rename = "from")]
    pub from_table: String,
    /// Right-hand table.
    pub to: String,
    /// Join condition.
    pub on: String,
}

/// Data-source elements linked to a node: tables, columns, and joins.
///
/// Opaque to the engine beyond existence checks; the linking collaborator
/// owns its contents.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryMapping {
    /// Tables relevant to the node.
    #[serde(default)]
    pub tables: Vec<TableMapping>,
    /// Columns relevant to the node.
    #[serde(default)]
    pub columns: Vec<ColumnMapping>,
    /// Join relationships, when more than one table is involved.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub joins: Option<Vec<JoinMapping>>,
}

impl QueryMapping {
    /// Whether no data-source elements have been linked yet.
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty() && self.columns.is_empty()
    }
}

/// Join kind for a [`CombineStrategy::Join`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum JoinType {
    /// Inner join.
    #[default]
    Inner,
    /// Left outer join.
    Left,
    /// Right outer join.
    Right,
    /// Full outer join.
    Full,
}

impl std::fmt::Display for JoinType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JoinType::Inner => write!(f, "INNER"),
            JoinType::Left => write!(f, "LEFT"),
            JoinType::Right => write!(f, "RIGHT"),
            JoinType::Full => write!(f, "FULL"),
        }
    }
}

/// How a parent node synthesizes its own result from its children.
///
/// Matched exhaustively wherever a combining query is produced, so adding a
/// strategy is a compile-time visible change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum CombineStrategy {
    /// Stack child results vertically.
    Union {
        /// Keep duplicates (`UNION ALL`) instead of deduplicating.
        #[serde(default)]
        union_all: bool,
    },
    /// Join child results on shared columns.
    Join {
        /// Columns to join on.
        join_on: Vec<String>,
        /// Join kind.
        #[serde(default)]
        join_type: JoinType,
    },
    /// Aggregate over the combined child results.
    Aggregate {
        /// Aggregate function (SUM, COUNT, AVG, ...).
        function: String,
        /// Grouping columns, if any.
        #[serde(default)]
        group_by: Vec<String>,
    },
    /// Filter one child's result by a predicate over another's.
    Filter {
        /// Filter predicate.
        condition: String,
    },
    /// Free-form combination template.
    Custom {
        /// Template text interpreted by the query-generation collaborator.
        template: String,
    },
}

/// Result of the intent-analysis step for a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum AnalysisOutcome {
    /// The intent is simple enough to generate a query directly.
    Direct,
    /// The intent decomposes into child sub-queries.
    Decompose {
        /// Intents for the child nodes, in decomposition order.
        child_intents: Vec<String>,
        /// How the parent combines the children's results.
        combine_strategy: CombineStrategy,
    },
}

/// Result from executing a node's query.
///
/// Execution failure is data, not a fault: an error here marks the node
/// `executed_failed` but never aborts the workflow.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    /// Row data, opaque to the engine.
    #[serde(default)]
    pub rows: serde_json::Value,
    /// Number of rows returned.
    #[serde(default)]
    pub row_count: u64,
    /// Execution-level error, when the query failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExecutionResult {
    /// Create a successful result with the given rows.
    pub fn new(rows: serde_json::Value, row_count: u64) -> Self {
        Self {
            rows,
            row_count,
            error: None,
        }
    }

    /// Create a failed result carrying an execution error.
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            rows: serde_json::Value::Array(Vec::new()),
            row_count: 0,
            error: Some(error.into()),
        }
    }

    /// Whether the execution finished without an error.
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// One sub-query in the decomposition tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryNode {
    /// Unique node identifier, generated at creation.
    pub node_id: String,
    /// The natural-language goal this node must satisfy.
    pub intent: String,
    /// Linked data-source elements.
    #[serde(default)]
    pub mapping: QueryMapping,
    /// Child node ids, in decomposition order.
    #[serde(default)]
    pub child_ids: Vec<String>,
    /// Current lifecycle status.
    #[serde(default)]
    pub status: NodeStatus,
    /// Generated query text, once the generation step ran.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    /// Execution result, once the execution step ran.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<ExecutionResult>,
    /// Parent node id; `None` only for the root.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    /// How this node combines child results; required before a complex node
    /// generates its own query.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub combine_strategy: Option<CombineStrategy>,
    /// Free-text hint for this node.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evidence: Option<String>,
    /// Recorded intent analysis.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analysis: Option<AnalysisOutcome>,
    /// Number of query-generation attempts so far.
    #[serde(default)]
    pub generation_attempts: u32,
}

impl QueryNode {
    /// Create a new node with a generated id and the given intent
    pub fn new(intent: impl Into<String>) -> Self {
        Self {
            node_id: Uuid::new_v4().to_string(),
            intent: intent.into(),
            mapping: QueryMapping::default(),
            child_ids: Vec::new(),
            status: NodeStatus::Created,
            query: None,
            result: None,
            parent_id: None,
            combine_strategy: None,
            evidence: None,
            analysis: None,
            generation_attempts: 0,
        }
    }

    /// Set the parent id
    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    /// Set the mapping
    pub fn with_mapping(mut self, mapping: QueryMapping) -> Self {
        self.mapping = mapping;
        self
    }

    /// Set the evidence hint
    pub fn with_evidence(mut self, evidence: impl Into<String>) -> Self {
        self.evidence = Some(evidence.into());
        self
    }

    /// Set the combine strategy
    pub fn with_combine_strategy(mut self, strategy: CombineStrategy) -> Self {
        self.combine_strategy = Some(strategy);
        self
    }

    /// Whether the node has no children.
    pub fn is_leaf(&self) -> bool {
        self.child_ids.is_empty()
    }

    /// Whether the node is complex, i.e. has been decomposed into children
    /// and must eventually combine their results.
    pub fn is_complex(&self) -> bool {
        !self.child_ids.is_empty()
    }

    /// Whether data-source elements have been linked to the node.
    pub fn has_mapping(&self) -> bool {
        !self.mapping.is_empty()
    }
}

/// An immutable record of one operation performed on a node.
///
/// Ledger entries are never mutated or deleted, even when the referenced node
/// is later removed; the audit trail survives subtree deletion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeOperation {
    /// When the operation happened.
    pub timestamp: DateTime<Utc>,
    /// The node the operation applied to.
    pub node_id: String,
    /// What kind of operation it was.
    #[serde(rename = "operation")]
    pub kind: OperationKind,
    /// Kind-specific payload (e.g. previous/new query text for a revision).
    #[serde(default)]
    pub data: serde_json::Value,
}

impl NodeOperation {
    /// Create a new operation record stamped with the current time
    pub fn new(node_id: impl Into<String>, kind: OperationKind, data: serde_json::Value) -> Self {
        Self {
            timestamp: Utc::now(),
            node_id: node_id.into(),
            kind,
            data,
        }
    }
}

/// Context information for one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskContext {
    /// Unique task identifier.
    pub task_id: String,
    /// The original natural-language question.
    pub original_query: String,
    /// Identifier of the data source the task runs against.
    pub data_source_name: String,
    /// When the task started.
    pub start_time: DateTime<Utc>,
    /// Current task status.
    pub status: TaskStatus,
    /// Free-text hint accompanying the question.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evidence: Option<String>,
}

impl TaskContext {
    /// Create a new task context in the initializing state
    pub fn new(original_query: impl Into<String>, data_source_name: impl Into<String>) -> Self {
        Self {
            task_id: Uuid::new_v4().to_string(),
            original_query: original_query.into(),
            data_source_name: data_source_name.into(),
            start_time: Utc::now(),
            status: TaskStatus::Initializing,
            evidence: None,
        }
    }

    /// Set the evidence hint
    pub fn with_evidence(mut self, evidence: impl Into<String>) -> Self {
        self.evidence = Some(evidence.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_node_status_display_round_trip() {
        for status in [
            NodeStatus::Created,
            NodeStatus::QueryGenerated,
            NodeStatus::ExecutedSuccess,
            NodeStatus::ExecutedFailed,
            NodeStatus::Revised,
        ] {
            let parsed: NodeStatus = status.to_string().parse().unwrap();
            assert_eq!(parsed, status);
        }
    }

    #[test]
    fn test_node_status_from_str_invalid() {
        let result = "pending".parse::<NodeStatus>();
        assert!(result.is_err());
        assert_eq!(result.unwrap_err(), "Unknown node status: pending");
    }

    #[test]
    fn test_operation_kind_round_trip() {
        for kind in OperationKind::ALL {
            let parsed: OperationKind = kind.as_str().parse().unwrap();
            assert_eq!(parsed, kind);
        }
    }

    #[test]
    fn test_task_status_transitions() {
        assert!(TaskStatus::Initializing.can_transition_to(TaskStatus::Processing));
        assert!(TaskStatus::Processing.can_transition_to(TaskStatus::Completed));
        assert!(TaskStatus::Processing.can_transition_to(TaskStatus::Failed));
        assert!(!TaskStatus::Completed.can_transition_to(TaskStatus::Processing));
        assert!(!TaskStatus::Failed.can_transition_to(TaskStatus::Processing));
        assert!(!TaskStatus::Processing.can_transition_to(TaskStatus::Initializing));
    }

    #[test]
    fn test_query_mapping_is_empty() {
        assert!(QueryMapping::default().is_empty());

        let mapping = QueryMapping {
            tables: vec![TableMapping {
                name: "orders".to_string(),
                alias: None,
                purpose: "row source".to_string(),
            }],
            ..Default::default()
        };
        assert!(!mapping.is_empty());
    }

    #[test]
    fn test_query_node_serde_round_trip() {
        let node = QueryNode::new("count all orders")
            .with_parent("parent-1")
            .with_evidence("orders live in the orders table")
            .with_combine_strategy(CombineStrategy::Union { union_all: true });

        let json = serde_json::to_string(&node).unwrap();
        let back: QueryNode = serde_json::from_str(&json).unwrap();
        assert_eq!(back, node);
    }

    #[test]
    fn test_query_node_serde_field_names() {
        let node = QueryNode::new("q").with_parent("p");
        let value = serde_json::to_value(&node).unwrap();

        assert!(value.get("nodeId").is_some());
        assert!(value.get("parentId").is_some());
        assert!(value.get("childIds").is_some());
        assert!(value.get("generationAttempts").is_some());
        // Unset options are omitted entirely
        assert!(value.get("query").is_none());
        assert!(value.get("combineStrategy").is_none());
    }

    #[test]
    fn test_query_node_ignores_unknown_fields() {
        let json = r#"{
            "nodeId": "n1",
            "intent": "count rows",
            "status": "created",
            "futureField": {"anything": true}
        }"#;
        let node: QueryNode = serde_json::from_str(json).unwrap();
        assert_eq!(node.node_id, "n1");
        assert_eq!(node.status, NodeStatus::Created);
    }

    #[test]
    fn test_combine_strategy_tagged_serialization() {
        let strategy = CombineStrategy::Join {
            join_on: vec!["customer_id".to_string()],
            join_type: JoinType::Left,
        };
        let value = serde_json::to_value(&strategy).unwrap();
        assert_eq!(value["type"], "join");
        assert_eq!(value["joinType"], "LEFT");
        assert_eq!(value["joinOn"][0], "customer_id");

        let back: CombineStrategy = serde_json::from_value(value).unwrap();
        assert_eq!(back, strategy);
    }

    #[test]
    fn test_combine_strategy_all_variants_round_trip() {
        let strategies = vec![
            CombineStrategy::Union { union_all: false },
            CombineStrategy::Join {
                join_on: vec!["id".to_string()],
                join_type: JoinType::Inner,
            },
            CombineStrategy::Aggregate {
                function: "SUM".to_string(),
                group_by: vec!["region".to_string()],
            },
            CombineStrategy::Filter {
                condition: "total > 100".to_string(),
            },
            CombineStrategy::Custom {
                template: "SELECT * FROM ({child_0})".to_string(),
            },
        ];
        for strategy in strategies {
            let json = serde_json::to_string(&strategy).unwrap();
            let back: CombineStrategy = serde_json::from_str(&json).unwrap();
            assert_eq!(back, strategy);
        }
    }

    #[test]
    fn test_analysis_outcome_round_trip() {
        let outcome = AnalysisOutcome::Decompose {
            child_intents: vec!["count a".to_string(), "count b".to_string()],
            combine_strategy: CombineStrategy::Union { union_all: false },
        };
        let value = serde_json::to_value(&outcome).unwrap();
        assert_eq!(value["kind"], "decompose");
        assert_eq!(value["childIntents"][1], "count b");

        let back: AnalysisOutcome = serde_json::from_value(value).unwrap();
        assert_eq!(back, outcome);
    }

    #[test]
    fn test_execution_result_success_and_failure() {
        let ok = ExecutionResult::new(serde_json::json!([[1], [2]]), 2);
        assert!(ok.is_success());
        assert_eq!(ok.row_count, 2);

        let failed = ExecutionResult::failure("syntax error");
        assert!(!failed.is_success());
        assert_eq!(failed.row_count, 0);
        assert_eq!(failed.error.as_deref(), Some("syntax error"));
    }

    #[test]
    fn test_node_operation_serde() {
        let op = NodeOperation::new(
            "node-1",
            OperationKind::GenerateQuery,
            serde_json::json!({"query": "SELECT 1"}),
        );
        let value = serde_json::to_value(&op).unwrap();
        assert_eq!(value["operation"], "generate_query");
        assert_eq!(value["nodeId"], "node-1");

        let back: NodeOperation = serde_json::from_value(value).unwrap();
        assert_eq!(back, op);
    }

    #[test]
    fn test_task_context_new() {
        let ctx = TaskContext::new("how many birds", "wildlife").with_evidence("bird table");
        assert_eq!(ctx.status, TaskStatus::Initializing);
        assert_eq!(ctx.data_source_name, "wildlife");
        assert!(!ctx.task_id.is_empty());
        assert_eq!(ctx.evidence.as_deref(), Some("bird table"));
    }

    #[test]
    fn test_query_node_helpers() {
        let mut node = QueryNode::new("total sales");
        assert!(node.is_leaf());
        assert!(!node.is_complex());
        assert!(!node.has_mapping());

        node.child_ids.push("c1".to_string());
        assert!(node.is_complex());
    }
}
