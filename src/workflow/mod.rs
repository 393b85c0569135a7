//! Reference workflow driver and collaborator contracts.
//!
//! The engine itself never talks to a language model or a data source; it
//! consumes external collaborators through the narrow traits defined here.
//! [`WorkflowDriver`] is the single-threaded control loop that alternates
//! "ask scheduler" -> "run collaborator" -> "write result" until the
//! scheduler reports completion or failure. The collaborator call is the
//! only suspend point.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::LimitsConfig;
use crate::context::TaskContextManager;
use crate::error::{AppError, AppResult, WorkflowError};
use crate::history::OperationHistory;
use crate::judgment::{JudgmentStore, QualityJudgment};
use crate::scheduler::{Decision, TaskScheduler};
use crate::store::KeyValueStore;
use crate::tree::{QueryTreeManager, TreeStats};
use crate::types::{
    AnalysisOutcome, ExecutionResult, NodeStatus, QueryMapping, QueryNode, TaskContext, TaskStatus,
};

/// Selects the data-source elements relevant to a node's intent.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SchemaLinker: Send + Sync {
    /// Produce a mapping for the node, given the task context.
    async fn link(&self, node: &QueryNode, context: &TaskContext) -> AppResult<QueryMapping>;
}

/// Decides whether a node's intent is answered directly or decomposed.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait IntentAnalyzer: Send + Sync {
    /// Analyze the node's intent against its mapping.
    async fn analyze(&self, node: &QueryNode, context: &TaskContext) -> AppResult<AnalysisOutcome>;
}

/// Produces query text for a node.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait QueryGenerator: Send + Sync {
    /// Generate query text. For a complex node, `children` carries the
    /// already-resolved child nodes whose results the query must combine.
    async fn generate(
        &self,
        node: &QueryNode,
        children: &[QueryNode],
        context: &TaskContext,
    ) -> AppResult<String>;
}

/// Runs query text against a data source.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    /// Execute the query. Execution-level failures are reported inside the
    /// result, not as errors; an `Err` here means the executor itself broke.
    async fn execute(&self, query: &str, data_source: &str) -> AppResult<ExecutionResult>;
}

/// Judges whether a node's result answers its intent and at what quality.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ResultEvaluator: Send + Sync {
    /// Evaluate the node's current query and result.
    async fn evaluate(&self, node: &QueryNode, context: &TaskContext)
        -> AppResult<QualityJudgment>;
}

/// The full set of collaborators a workflow needs.
#[derive(Clone)]
pub struct Collaborators {
    /// Schema linking collaborator.
    pub linker: Arc<dyn SchemaLinker>,
    /// Intent analysis collaborator.
    pub analyzer: Arc<dyn IntentAnalyzer>,
    /// Query generation collaborator.
    pub generator: Arc<dyn QueryGenerator>,
    /// Execution collaborator.
    pub executor: Arc<dyn QueryExecutor>,
    /// Evaluation collaborator.
    pub evaluator: Arc<dyn ResultEvaluator>,
}

/// Per-node summary included in a workflow outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeOutcome {
    /// The node id.
    pub node_id: String,
    /// The node's intent.
    pub intent: String,
    /// Final status.
    pub status: NodeStatus,
    /// Final query text, when one was generated.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    /// Rows returned by the final execution, when one ran.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub row_count: Option<u64>,
}

/// Result of driving a task to a terminal state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowOutcome {
    /// Final task status.
    pub status: TaskStatus,
    /// The root node's execution result — the task's final answer.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_result: Option<ExecutionResult>,
    /// Why the task failed, when it did.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
    /// Tree statistics at the end of the run.
    pub stats: TreeStats,
    /// Per-node summaries, root first.
    pub nodes: Vec<NodeOutcome>,
    /// How many scheduler-directed steps ran.
    pub steps: u32,
}

/// Single-threaded control loop driving one task to completion.
pub struct WorkflowDriver {
    context: TaskContextManager,
    tree: QueryTreeManager,
    history: OperationHistory,
    judgments: JudgmentStore,
    scheduler: TaskScheduler,
    collaborators: Collaborators,
    limits: LimitsConfig,
}

impl WorkflowDriver {
    /// Create a driver over a task-scoped store
    pub fn new(store: KeyValueStore, collaborators: Collaborators, limits: LimitsConfig) -> Self {
        let tree = QueryTreeManager::new(store.clone());
        let judgments = JudgmentStore::new(store.clone());
        let scheduler = TaskScheduler::new(tree.clone(), judgments.clone(), limits.scheduler_limits());
        Self {
            context: TaskContextManager::new(store.clone()),
            tree,
            history: OperationHistory::new(store),
            judgments,
            scheduler,
            collaborators,
            limits,
        }
    }

    /// The tree manager this driver writes through.
    pub fn tree(&self) -> &QueryTreeManager {
        &self.tree
    }

    /// The operation ledger this driver records into.
    pub fn history(&self) -> &OperationHistory {
        &self.history
    }

    /// Drive a question to a terminal state.
    pub async fn run(
        &self,
        question: &str,
        data_source: &str,
        evidence: Option<String>,
    ) -> AppResult<WorkflowOutcome> {
        let context = self
            .context
            .initialize(question, data_source, evidence)
            .await?;
        let root_id = self.tree.initialize(question).await?;
        self.history
            .record_create(&root_id, question, None, None)
            .await?;
        self.context.mark_processing().await?;

        info!(task_id = %context.task_id, root_id = %root_id, "Workflow started");

        let mut steps: u32 = 0;
        let failure = loop {
            let decision = self.scheduler.next_step().await?;
            match decision {
                Decision::Complete => {
                    self.context.mark_completed().await?;
                    break None;
                }
                Decision::Error { reason } => {
                    warn!(reason = %reason, "Scheduler reported an error; failing task");
                    self.context.mark_failed().await?;
                    break Some(reason);
                }
                step => {
                    steps += 1;
                    if steps > self.limits.max_workflow_steps {
                        self.context.mark_failed().await?;
                        return Err(WorkflowError::StepLimitExceeded {
                            limit: self.limits.max_workflow_steps,
                        }
                        .into());
                    }
                    self.perform_step(&step, &context).await?;
                }
            }
        };

        self.collect_outcome(&root_id, steps, failure).await
    }

    /// Perform one scheduler-directed step and write its results back.
    async fn perform_step(&self, decision: &Decision, context: &TaskContext) -> AppResult<()> {
        match decision {
            Decision::NeedsLinking { node_id } => {
                self.tree.set_current_node(node_id).await?;
                let node = self.require_node(node_id).await?;
                let mapping = self
                    .collaborators
                    .linker
                    .link(&node, context)
                    .await
                    .map_err(|e| collaborator_error("schema linking", e))?;
                self.tree.update_mapping(node_id, mapping).await?;
            }
            Decision::NeedsAnalysis { node_id } => {
                self.tree.set_current_node(node_id).await?;
                let node = self.require_node(node_id).await?;
                let outcome = self
                    .collaborators
                    .analyzer
                    .analyze(&node, context)
                    .await
                    .map_err(|e| collaborator_error("intent analysis", e))?;
                self.tree.update_analysis(node_id, outcome.clone()).await?;

                if let AnalysisOutcome::Decompose {
                    child_intents,
                    combine_strategy,
                } = outcome
                {
                    for intent in child_intents {
                        let child = QueryNode::new(intent);
                        let child_id = child.node_id.clone();
                        let child_intent = child.intent.clone();
                        self.tree.add_node(child, Some(node_id)).await?;
                        self.history
                            .record_create(&child_id, &child_intent, None, None)
                            .await?;
                    }
                    self.tree
                        .update_combine_strategy(node_id, combine_strategy)
                        .await?;
                }
            }
            Decision::NeedsQuery { node_id } => {
                self.tree.set_current_node(node_id).await?;
                let node = self.require_node(node_id).await?;
                let children = self.tree.children(node_id).await?;
                let query = self
                    .collaborators
                    .generator
                    .generate(&node, &children, context)
                    .await
                    .map_err(|e| collaborator_error("query generation", e))?;
                self.tree.update_query(node_id, &query).await?;
                self.history.record_generate_query(node_id, &query).await?;
            }
            Decision::NeedsEvaluation { node_id } => {
                self.tree.set_current_node(node_id).await?;
                let node = self.require_node(node_id).await?;

                // Execute first when the current query has not run yet;
                // execution failure is data on the node, never a fault.
                if !node.status.is_executed() {
                    let query = node.query.clone().ok_or_else(|| AppError::Internal {
                        message: format!("node {} scheduled for evaluation without a query", node_id),
                    })?;
                    let result = self
                        .collaborators
                        .executor
                        .execute(&query, &context.data_source_name)
                        .await
                        .map_err(|e| collaborator_error("execution", e))?;
                    let success = result.is_success();
                    self.history
                        .record_execute(node_id, &query, result.row_count, result.error.as_deref())
                        .await?;
                    self.tree.update_result(node_id, result, success).await?;
                }

                let node = self.require_node(node_id).await?;
                let judgment = self
                    .collaborators
                    .evaluator
                    .evaluate(&node, context)
                    .await
                    .map_err(|e| collaborator_error("evaluation", e))?;
                self.judgments.put(node_id, &judgment).await?;
            }
            Decision::NeedsRevision { node_id, reason } => {
                self.tree.set_current_node(node_id).await?;
                let node = self.require_node(node_id).await?;
                self.history
                    .record_revise(node_id, node.query.as_deref(), None, &reason.detail)
                    .await?;
                self.tree.revise_node(node_id, reason.aspect).await?;
            }
            Decision::Complete | Decision::Error { .. } => {
                // Terminal decisions are handled by the loop, not here.
            }
        }
        Ok(())
    }

    async fn require_node(&self, node_id: &str) -> AppResult<QueryNode> {
        self.tree
            .get_node(node_id)
            .await?
            .ok_or_else(|| crate::error::TreeError::NodeNotFound {
                node_id: node_id.to_string(),
            })
            .map_err(AppError::from)
    }

    async fn collect_outcome(
        &self,
        root_id: &str,
        steps: u32,
        failure: Option<String>,
    ) -> AppResult<WorkflowOutcome> {
        let context = self.context.get().await?.ok_or(AppError::Internal {
            message: "task context disappeared mid-run".to_string(),
        })?;
        let stats = self.tree.stats().await?;

        let mut nodes = Vec::new();
        let mut final_result = None;
        if let Ok(snapshot) = self.tree.snapshot().await {
            final_result = snapshot.get(root_id).and_then(|root| root.result.clone());

            let mut queue = vec![root_id.to_string()];
            while let Some(id) = queue.pop() {
                if let Some(node) = snapshot.get(&id) {
                    nodes.push(NodeOutcome {
                        node_id: node.node_id.clone(),
                        intent: node.intent.clone(),
                        status: node.status,
                        query: node.query.clone(),
                        row_count: node.result.as_ref().map(|r| r.row_count),
                    });
                    for child in node.child_ids.iter().rev() {
                        queue.push(child.clone());
                    }
                }
            }
        }

        info!(
            status = %context.status,
            steps,
            total_nodes = stats.total_nodes,
            "Workflow finished"
        );

        Ok(WorkflowOutcome {
            status: context.status,
            final_result,
            failure,
            stats,
            nodes,
            steps,
        })
    }
}

fn collaborator_error(step: &str, error: AppError) -> AppError {
    WorkflowError::Collaborator {
        step: step.to_string(),
        message: error.to_string(),
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::judgment::ResultQuality;
    use crate::types::{CombineStrategy, TableMapping};
    use mockall::predicate::always;

    fn test_mapping() -> QueryMapping {
        QueryMapping {
            tables: vec![TableMapping {
                name: "orders".to_string(),
                alias: None,
                purpose: "row source".to_string(),
            }],
            ..Default::default()
        }
    }

    fn happy_collaborators() -> Collaborators {
        let mut linker = MockSchemaLinker::new();
        linker
            .expect_link()
            .returning(|_, _| Ok(test_mapping()));

        let mut analyzer = MockIntentAnalyzer::new();
        analyzer
            .expect_analyze()
            .returning(|_, _| Ok(AnalysisOutcome::Direct));

        let mut generator = MockQueryGenerator::new();
        generator
            .expect_generate()
            .returning(|node, _, _| Ok(format!("SELECT /* {} */ COUNT(*) FROM orders", node.intent)));

        let mut executor = MockQueryExecutor::new();
        executor
            .expect_execute()
            .returning(|_, _| Ok(ExecutionResult::new(serde_json::json!([[42]]), 1)));

        let mut evaluator = MockResultEvaluator::new();
        evaluator.expect_evaluate().returning(|node, _| {
            Ok(QualityJudgment::new(
                node.query.clone().unwrap_or_default(),
                true,
                ResultQuality::Excellent,
                "answers the intent",
            ))
        });

        Collaborators {
            linker: Arc::new(linker),
            analyzer: Arc::new(analyzer),
            generator: Arc::new(generator),
            executor: Arc::new(executor),
            evaluator: Arc::new(evaluator),
        }
    }

    #[tokio::test]
    async fn test_direct_flow_completes() {
        let driver = WorkflowDriver::new(
            KeyValueStore::new(),
            happy_collaborators(),
            LimitsConfig::default(),
        );

        let outcome = driver
            .run("how many orders are there", "shop", None)
            .await
            .unwrap();

        assert_eq!(outcome.status, TaskStatus::Completed);
        assert_eq!(outcome.stats.total_nodes, 1);
        assert_eq!(outcome.final_result.unwrap().row_count, 1);
        assert!(outcome.failure.is_none());
        // link, analyze, generate, execute+evaluate
        assert_eq!(outcome.steps, 4);

        // Ledger recorded the full lifecycle of the root.
        let summary = driver.history().summary().await.unwrap();
        assert_eq!(summary.operation_counts["create"], 1);
        assert_eq!(summary.operation_counts["generate_query"], 1);
        assert_eq!(summary.operation_counts["execute"], 1);
    }

    #[tokio::test]
    async fn test_decomposed_flow_resolves_children_before_parent() {
        let mut analyzer = MockIntentAnalyzer::new();
        analyzer.expect_analyze().returning(|node, _| {
            if node.parent_id.is_none() {
                Ok(AnalysisOutcome::Decompose {
                    child_intents: vec![
                        "count male customers".to_string(),
                        "count female customers".to_string(),
                    ],
                    combine_strategy: CombineStrategy::Union { union_all: false },
                })
            } else {
                Ok(AnalysisOutcome::Direct)
            }
        });

        let mut collaborators = happy_collaborators();
        collaborators.analyzer = Arc::new(analyzer);

        let driver =
            WorkflowDriver::new(KeyValueStore::new(), collaborators, LimitsConfig::default());
        let outcome = driver
            .run("count customers by gender", "shop", None)
            .await
            .unwrap();

        assert_eq!(outcome.status, TaskStatus::Completed);
        assert_eq!(outcome.stats.total_nodes, 3);
        assert_eq!(outcome.stats.max_depth, 1);
        assert!(outcome.final_result.is_some());

        // Root first, then the children in decomposition order.
        assert_eq!(outcome.nodes.len(), 3);
        assert_eq!(outcome.nodes[0].intent, "count customers by gender");
        assert_eq!(outcome.nodes[1].intent, "count male customers");
        assert_eq!(outcome.nodes[2].intent, "count female customers");
        for node in &outcome.nodes {
            assert_eq!(node.status, NodeStatus::ExecutedSuccess);
        }
    }

    #[tokio::test]
    async fn test_bad_judgment_triggers_revision_then_completes() {
        use std::sync::atomic::{AtomicU32, Ordering};

        let calls = Arc::new(AtomicU32::new(0));
        let calls_in_mock = calls.clone();

        let mut evaluator = MockResultEvaluator::new();
        evaluator.expect_evaluate().returning(move |node, _| {
            let call = calls_in_mock.fetch_add(1, Ordering::SeqCst);
            let query = node.query.clone().unwrap_or_default();
            if call == 0 {
                Ok(
                    QualityJudgment::new(query, false, ResultQuality::Poor, "wrong aggregate")
                        .with_blame(crate::judgment::RevisionAspect::Generation),
                )
            } else {
                Ok(QualityJudgment::new(
                    query,
                    true,
                    ResultQuality::Good,
                    "fixed",
                ))
            }
        });

        let mut collaborators = happy_collaborators();
        collaborators.evaluator = Arc::new(evaluator);

        let driver =
            WorkflowDriver::new(KeyValueStore::new(), collaborators, LimitsConfig::default());
        let outcome = driver.run("sum of totals", "shop", None).await.unwrap();

        assert_eq!(outcome.status, TaskStatus::Completed);
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        // The revise operation is on the ledger with the evaluator's reason.
        let root_id = driver.tree().root_id().await.unwrap().unwrap();
        let revisions = driver.history().revision_history(&root_id).await.unwrap();
        assert_eq!(revisions.len(), 1);
        assert_eq!(revisions[0].reason.as_deref(), Some("wrong aggregate"));

        let lifecycle = driver.history().lifecycle_of(&root_id).await.unwrap();
        assert_eq!(lifecycle.revised_count, 1);
    }

    #[tokio::test]
    async fn test_execution_failure_is_data_then_revised() {
        use std::sync::atomic::{AtomicU32, Ordering};

        let exec_calls = Arc::new(AtomicU32::new(0));
        let exec_calls_in_mock = exec_calls.clone();

        let mut executor = MockQueryExecutor::new();
        executor.expect_execute().returning(move |_, _| {
            let call = exec_calls_in_mock.fetch_add(1, Ordering::SeqCst);
            if call == 0 {
                Ok(ExecutionResult::failure("no such table: order"))
            } else {
                Ok(ExecutionResult::new(serde_json::json!([[7]]), 1))
            }
        });

        let mut evaluator = MockResultEvaluator::new();
        evaluator.expect_evaluate().returning(|node, _| {
            let query = node.query.clone().unwrap_or_default();
            match node.status {
                NodeStatus::ExecutedFailed => Ok(QualityJudgment::new(
                    query,
                    false,
                    ResultQuality::Poor,
                    "query does not run",
                )),
                _ => Ok(QualityJudgment::new(
                    query,
                    true,
                    ResultQuality::Good,
                    "runs and answers",
                )),
            }
        });

        let mut collaborators = happy_collaborators();
        collaborators.executor = Arc::new(executor);
        collaborators.evaluator = Arc::new(evaluator);

        let driver =
            WorkflowDriver::new(KeyValueStore::new(), collaborators, LimitsConfig::default());
        let outcome = driver.run("count orders", "shop", None).await.unwrap();

        assert_eq!(outcome.status, TaskStatus::Completed);

        let failed = driver.history().failed_executions().await.unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].data["error"], "no such table: order");
    }

    #[tokio::test]
    async fn test_step_limit_exceeded_fails_task() {
        // Evaluator that never accepts, with a generous attempt cap, starves
        // the loop into the step limit.
        let mut evaluator = MockResultEvaluator::new();
        evaluator.expect_evaluate().returning(|node, _| {
            Ok(QualityJudgment::new(
                node.query.clone().unwrap_or_default(),
                false,
                ResultQuality::Poor,
                "never good enough",
            ))
        });

        let mut collaborators = happy_collaborators();
        collaborators.evaluator = Arc::new(evaluator);

        let limits = LimitsConfig {
            max_generation_attempts: 1_000,
            max_workflow_steps: 10,
            ..Default::default()
        };

        let driver = WorkflowDriver::new(KeyValueStore::new(), collaborators, limits);
        let err = driver.run("count orders", "shop", None).await.unwrap_err();
        assert!(matches!(
            err,
            AppError::Workflow(WorkflowError::StepLimitExceeded { limit: 10 })
        ));
    }

    #[tokio::test]
    async fn test_collaborator_failure_carries_step_name() {
        let mut linker = MockSchemaLinker::new();
        linker.expect_link().with(always(), always()).returning(|_, _| {
            Err(AppError::Internal {
                message: "model unavailable".to_string(),
            })
        });

        let mut collaborators = happy_collaborators();
        collaborators.linker = Arc::new(linker);

        let driver =
            WorkflowDriver::new(KeyValueStore::new(), collaborators, LimitsConfig::default());
        let err = driver.run("count orders", "shop", None).await.unwrap_err();
        assert!(err.to_string().contains("schema linking"));
        assert!(err.to_string().contains("model unavailable"));
    }
}
