//! End-to-end workflow tests with scripted stand-in collaborators.
//!
//! The stubs below answer deterministically from the node's intent, which is
//! enough to drive the full loop: link -> analyze -> generate -> execute ->
//! evaluate, with decomposition and revision paths covered.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use query_tree_orchestrator::config::LimitsConfig;
use query_tree_orchestrator::error::AppResult;
use query_tree_orchestrator::judgment::{QualityJudgment, ResultQuality, RevisionAspect};
use query_tree_orchestrator::store::KeyValueStore;
use query_tree_orchestrator::types::{
    AnalysisOutcome, CombineStrategy, ExecutionResult, NodeStatus, QueryMapping, QueryNode,
    TableMapping, TaskContext, TaskStatus,
};
use query_tree_orchestrator::workflow::{
    Collaborators, IntentAnalyzer, QueryExecutor, QueryGenerator, ResultEvaluator, SchemaLinker,
    WorkflowDriver,
};

struct StubLinker;

#[async_trait]
impl SchemaLinker for StubLinker {
    async fn link(&self, _node: &QueryNode, _context: &TaskContext) -> AppResult<QueryMapping> {
        Ok(QueryMapping {
            tables: vec![TableMapping {
                name: "orders".to_string(),
                alias: None,
                purpose: "row source".to_string(),
            }],
            ..Default::default()
        })
    }
}

/// Decomposes any intent containing "and" into two halves; everything else
/// generates directly.
struct SplittingAnalyzer;

#[async_trait]
impl IntentAnalyzer for SplittingAnalyzer {
    async fn analyze(&self, node: &QueryNode, _context: &TaskContext) -> AppResult<AnalysisOutcome> {
        match node.intent.split_once(" and ") {
            Some((left, right)) if node.parent_id.is_none() => Ok(AnalysisOutcome::Decompose {
                child_intents: vec![left.to_string(), right.to_string()],
                combine_strategy: CombineStrategy::Union { union_all: true },
            }),
            _ => Ok(AnalysisOutcome::Direct),
        }
    }
}

struct StubGenerator;

#[async_trait]
impl QueryGenerator for StubGenerator {
    async fn generate(
        &self,
        node: &QueryNode,
        children: &[QueryNode],
        _context: &TaskContext,
    ) -> AppResult<String> {
        if children.is_empty() {
            Ok(format!("SELECT COUNT(*) FROM orders /* {} */", node.intent))
        } else {
            let parts: Vec<String> = children
                .iter()
                .filter_map(|child| child.query.clone())
                .collect();
            Ok(parts.join(" UNION ALL "))
        }
    }
}

struct StubExecutor;

#[async_trait]
impl QueryExecutor for StubExecutor {
    async fn execute(&self, _query: &str, _data_source: &str) -> AppResult<ExecutionResult> {
        Ok(ExecutionResult::new(serde_json::json!([[3]]), 1))
    }
}

struct ApprovingEvaluator;

#[async_trait]
impl ResultEvaluator for ApprovingEvaluator {
    async fn evaluate(
        &self,
        node: &QueryNode,
        _context: &TaskContext,
    ) -> AppResult<QualityJudgment> {
        Ok(QualityJudgment::new(
            node.query.clone().unwrap_or_default(),
            true,
            ResultQuality::Good,
            "looks right",
        ))
    }
}

/// Rejects the root's first query, blaming generation; approves after that.
struct OnceRejectingEvaluator {
    rejections: AtomicU32,
}

#[async_trait]
impl ResultEvaluator for OnceRejectingEvaluator {
    async fn evaluate(
        &self,
        node: &QueryNode,
        _context: &TaskContext,
    ) -> AppResult<QualityJudgment> {
        let query = node.query.clone().unwrap_or_default();
        if self.rejections.fetch_add(1, Ordering::SeqCst) == 0 {
            Ok(
                QualityJudgment::new(query, false, ResultQuality::Poor, "misses a filter")
                    .with_blame(RevisionAspect::Generation),
            )
        } else {
            Ok(QualityJudgment::new(
                query,
                true,
                ResultQuality::Excellent,
                "correct now",
            ))
        }
    }
}

fn collaborators(evaluator: Arc<dyn ResultEvaluator>) -> Collaborators {
    Collaborators {
        linker: Arc::new(StubLinker),
        analyzer: Arc::new(SplittingAnalyzer),
        generator: Arc::new(StubGenerator),
        executor: Arc::new(StubExecutor),
        evaluator,
    }
}

#[tokio::test]
async fn test_simple_question_end_to_end() {
    let driver = WorkflowDriver::new(
        KeyValueStore::new(),
        collaborators(Arc::new(ApprovingEvaluator)),
        LimitsConfig::default(),
    );

    let outcome = driver
        .run("how many orders were placed", "shop", None)
        .await
        .unwrap();

    assert_eq!(outcome.status, TaskStatus::Completed);
    assert_eq!(outcome.stats.total_nodes, 1);
    assert_eq!(outcome.nodes.len(), 1);
    assert_eq!(outcome.nodes[0].status, NodeStatus::ExecutedSuccess);
    assert_eq!(outcome.final_result.unwrap().row_count, 1);
}

#[tokio::test]
async fn test_decomposed_question_combines_children() {
    let driver = WorkflowDriver::new(
        KeyValueStore::new(),
        collaborators(Arc::new(ApprovingEvaluator)),
        LimitsConfig::default(),
    );

    let outcome = driver
        .run("count shipped orders and count cancelled orders", "shop", None)
        .await
        .unwrap();

    assert_eq!(outcome.status, TaskStatus::Completed);
    assert_eq!(outcome.stats.total_nodes, 3);
    assert_eq!(outcome.stats.leaf_nodes, 2);

    // The root's combining query is stitched from both child queries.
    let root = &outcome.nodes[0];
    let query = root.query.as_deref().unwrap();
    assert!(query.contains("count shipped orders"));
    assert!(query.contains("count cancelled orders"));
    assert!(query.contains("UNION ALL"));
}

#[tokio::test]
async fn test_rejected_query_is_revised_and_run_again() {
    let driver = WorkflowDriver::new(
        KeyValueStore::new(),
        collaborators(Arc::new(OnceRejectingEvaluator {
            rejections: AtomicU32::new(0),
        })),
        LimitsConfig::default(),
    );

    let outcome = driver
        .run("how many orders were placed", "shop", None)
        .await
        .unwrap();

    assert_eq!(outcome.status, TaskStatus::Completed);

    let root_id = driver.tree().root_id().await.unwrap().unwrap();
    let lifecycle = driver.history().lifecycle_of(&root_id).await.unwrap();
    assert_eq!(lifecycle.revised_count, 1);

    // Two generations and two executions are on the ledger.
    let summary = driver.history().summary().await.unwrap();
    assert_eq!(summary.operation_counts["generate_query"], 2);
    assert_eq!(summary.operation_counts["execute"], 2);

    // The node itself carries only the final state.
    let root = driver.tree().get_node(&root_id).await.unwrap().unwrap();
    assert_eq!(root.status, NodeStatus::ExecutedSuccess);
    assert_eq!(root.generation_attempts, 2);
}

#[tokio::test]
async fn test_evidence_is_carried_on_the_task_context() {
    let driver = WorkflowDriver::new(
        KeyValueStore::new(),
        collaborators(Arc::new(ApprovingEvaluator)),
        LimitsConfig::default(),
    );

    let outcome = driver
        .run(
            "how many orders were placed",
            "shop",
            Some("orders are in the orders table".to_string()),
        )
        .await
        .unwrap();

    assert_eq!(outcome.status, TaskStatus::Completed);
}
