//! Decomposition tree manager.
//!
//! Owns the tree's structural invariants on top of the versioned store:
//! exactly one root, every non-root node has exactly one parent, parent and
//! child pointers stay mutually consistent, node ids are unique, and no
//! attachment may form a cycle.
//!
//! The tree is persisted as an arena: one store record per node plus an index
//! record holding the root id, the cursor, and the live node-id list, so a
//! mutation rewrites only the records it touches. Membership is defined by
//! the index — superseded records for deleted nodes stay in the append-only
//! store (queryable by attribute for audit) but are unreachable through the
//! manager.

use std::collections::{HashMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{TreeError, TreeResult};
use crate::judgment::RevisionAspect;
use crate::store::KeyValueStore;
use crate::types::{
    AnalysisOutcome, CombineStrategy, ExecutionResult, NodeStatus, QueryMapping, QueryNode,
};

/// Store record name for the tree index.
const TREE_INDEX_KEY: &str = "queryTree";

fn node_record_name(node_id: &str) -> String {
    format!("queryTree:node:{}", node_id)
}

/// Index record: root, cursor, and the set of live nodes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TreeIndex {
    root_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    current_node_id: Option<String>,
    node_ids: Vec<String>,
}

/// A typed partial update applied to a node by [`QueryTreeManager::update_node`].
///
/// Only the set fields are merged; everything else is left untouched.
#[derive(Debug, Clone, Default)]
pub struct NodeUpdate {
    /// Replace the intent.
    pub intent: Option<String>,
    /// Replace the data-source mapping.
    pub mapping: Option<QueryMapping>,
    /// Replace the status.
    pub status: Option<NodeStatus>,
    /// Replace the generated query text.
    pub query: Option<String>,
    /// Replace the execution result.
    pub result: Option<ExecutionResult>,
    /// Replace the combine strategy.
    pub combine_strategy: Option<CombineStrategy>,
    /// Replace the evidence hint.
    pub evidence: Option<String>,
    /// Replace the recorded analysis.
    pub analysis: Option<AnalysisOutcome>,
    /// Replace the generation-attempt counter.
    pub generation_attempts: Option<u32>,
}

impl NodeUpdate {
    /// Create an empty update
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the intent
    pub fn intent(mut self, intent: impl Into<String>) -> Self {
        self.intent = Some(intent.into());
        self
    }

    /// Set the mapping
    pub fn mapping(mut self, mapping: QueryMapping) -> Self {
        self.mapping = Some(mapping);
        self
    }

    /// Set the status
    pub fn status(mut self, status: NodeStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Set the query text
    pub fn query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }

    /// Set the combine strategy
    pub fn combine_strategy(mut self, strategy: CombineStrategy) -> Self {
        self.combine_strategy = Some(strategy);
        self
    }

    /// Set the analysis outcome
    pub fn analysis(mut self, analysis: AnalysisOutcome) -> Self {
        self.analysis = Some(analysis);
        self
    }

    fn apply(self, node: &mut QueryNode) {
        if let Some(intent) = self.intent {
            node.intent = intent;
        }
        if let Some(mapping) = self.mapping {
            node.mapping = mapping;
        }
        if let Some(status) = self.status {
            node.status = status;
        }
        if let Some(query) = self.query {
            node.query = Some(query);
        }
        if let Some(result) = self.result {
            node.result = Some(result);
        }
        if let Some(strategy) = self.combine_strategy {
            node.combine_strategy = Some(strategy);
        }
        if let Some(evidence) = self.evidence {
            node.evidence = Some(evidence);
        }
        if let Some(analysis) = self.analysis {
            node.analysis = Some(analysis);
        }
        if let Some(attempts) = self.generation_attempts {
            node.generation_attempts = attempts;
        }
    }
}

/// Aggregate statistics over the tree.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeStats {
    /// Number of live nodes.
    pub total_nodes: usize,
    /// Longest root-to-leaf edge count.
    pub max_depth: usize,
    /// Number of leaves.
    pub leaf_nodes: usize,
    /// Nodes executed, successfully or not.
    pub executed_nodes: usize,
    /// Nodes whose last execution failed.
    pub failed_nodes: usize,
}

/// An immutable copy of the whole tree, for pure reads.
///
/// The scheduler operates on snapshots so that its decisions are a function
/// of one consistent state, independent of concurrent tree access.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeSnapshot {
    /// The root node id.
    pub root_id: String,
    /// The cursor, when set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_node_id: Option<String>,
    /// All live nodes by id.
    pub nodes: HashMap<String, QueryNode>,
}

impl TreeSnapshot {
    /// Look up a node by id.
    pub fn get(&self, node_id: &str) -> Option<&QueryNode> {
        self.nodes.get(node_id)
    }

    /// Whether the snapshot contains the node.
    pub fn contains(&self, node_id: &str) -> bool {
        self.nodes.contains_key(node_id)
    }

    /// Max root-to-leaf edge count in the subtree rooted at `node_id`.
    ///
    /// Returns `None` for an unknown id. Every node is visited at most once,
    /// so a malformed back-reference cannot loop.
    pub fn depth(&self, node_id: &str) -> Option<usize> {
        if !self.nodes.contains_key(node_id) {
            return None;
        }
        let mut visited = HashSet::new();
        Some(self.depth_inner(node_id, &mut visited))
    }

    fn depth_inner(&self, node_id: &str, visited: &mut HashSet<String>) -> usize {
        if !visited.insert(node_id.to_string()) {
            warn!(node_id, "Back-reference encountered during depth computation");
            return 0;
        }
        let Some(node) = self.nodes.get(node_id) else {
            return 0;
        };
        node.child_ids
            .iter()
            .map(|child| 1 + self.depth_inner(child, visited))
            .max()
            .unwrap_or(0)
    }
}

/// Manages the decomposition tree stored in a task-scoped [`KeyValueStore`].
#[derive(Debug, Clone)]
pub struct QueryTreeManager {
    store: KeyValueStore,
}

impl QueryTreeManager {
    /// Create a manager over the given store
    pub fn new(store: KeyValueStore) -> Self {
        Self { store }
    }

    /// Create a fresh tree with one root node in the `created` state.
    ///
    /// Returns the root node id. Any previous tree in the same store is
    /// superseded.
    pub async fn initialize(&self, root_intent: impl Into<String>) -> TreeResult<String> {
        let root = QueryNode::new(root_intent);
        let root_id = root.node_id.clone();

        let index = TreeIndex {
            root_id: root_id.clone(),
            current_node_id: Some(root_id.clone()),
            node_ids: vec![root_id.clone()],
        };
        self.save_node(&root).await?;
        self.save_index(&index).await?;

        info!(root_id = %root_id, "Initialized query tree");
        Ok(root_id)
    }

    /// The root node id, if the tree is initialized.
    pub async fn root_id(&self) -> TreeResult<Option<String>> {
        Ok(self.load_index().await?.map(|index| index.root_id))
    }

    /// The cursor: which node is currently in focus.
    pub async fn current_node_id(&self) -> TreeResult<Option<String>> {
        Ok(self
            .load_index()
            .await?
            .and_then(|index| index.current_node_id))
    }

    /// Move the cursor to `node_id`.
    pub async fn set_current_node(&self, node_id: &str) -> TreeResult<()> {
        let mut index = self.require_index().await?;
        if !index.node_ids.iter().any(|id| id == node_id) {
            return Err(TreeError::NodeNotFound {
                node_id: node_id.to_string(),
            });
        }
        index.current_node_id = Some(node_id.to_string());
        self.save_index(&index).await?;
        debug!(node_id, "Moved cursor");
        Ok(())
    }

    /// Look up a node by id. Deleted and unknown ids return `None`.
    pub async fn get_node(&self, node_id: &str) -> TreeResult<Option<QueryNode>> {
        let Some(index) = self.load_index().await? else {
            return Ok(None);
        };
        self.load_node(&index, node_id).await
    }

    /// Add a node to the tree, attached under `parent_id` when given.
    ///
    /// Fails with [`TreeError::ParentNotFound`] for an unknown parent,
    /// [`TreeError::DuplicateNode`] for an id already in the tree, and
    /// [`TreeError::CycleDetected`] when the attachment would make the node
    /// its own ancestor. An omitted parent inserts the node unattached,
    /// which is meaningful for the root only.
    pub async fn add_node(&self, mut node: QueryNode, parent_id: Option<&str>) -> TreeResult<()> {
        let mut index = self.require_index().await?;

        if index.node_ids.iter().any(|id| id == &node.node_id) {
            return Err(TreeError::DuplicateNode {
                node_id: node.node_id.clone(),
            });
        }

        if let Some(parent_id) = parent_id {
            let mut parent =
                self.load_node(&index, parent_id)
                    .await?
                    .ok_or_else(|| TreeError::ParentNotFound {
                        parent_id: parent_id.to_string(),
                    })?;

            self.check_no_cycle(&index, &node, parent_id).await?;

            parent.child_ids.push(node.node_id.clone());
            node.parent_id = Some(parent_id.to_string());
            self.save_node(&parent).await?;
        }

        index.node_ids.push(node.node_id.clone());
        self.save_node(&node).await?;
        self.save_index(&index).await?;

        info!(node_id = %node.node_id, parent_id = ?parent_id, "Added node");
        Ok(())
    }

    /// Walk the parent chain from `parent_id` upward; reject the attachment
    /// if the new node (or any node it already claims as a child) appears in
    /// that chain. Each node is visited at most once, so a malformed tree
    /// cannot loop the walk.
    async fn check_no_cycle(
        &self,
        index: &TreeIndex,
        node: &QueryNode,
        parent_id: &str,
    ) -> TreeResult<()> {
        let mut visited: HashSet<String> = HashSet::new();
        let mut cursor = Some(parent_id.to_string());
        while let Some(current) = cursor {
            if !visited.insert(current.clone()) {
                break;
            }
            cursor = match self.load_node(index, &current).await? {
                Some(ancestor) => ancestor.parent_id,
                None => None,
            };
        }

        let forms_cycle = visited.contains(&node.node_id)
            || node.child_ids.iter().any(|child| visited.contains(child));
        if forms_cycle {
            return Err(TreeError::CycleDetected {
                node_id: node.node_id.clone(),
                parent_id: parent_id.to_string(),
            });
        }
        Ok(())
    }

    /// Merge a typed partial update into a node.
    pub async fn update_node(&self, node_id: &str, update: NodeUpdate) -> TreeResult<()> {
        let index = self.require_index().await?;
        let mut node =
            self.load_node(&index, node_id)
                .await?
                .ok_or_else(|| TreeError::NodeNotFound {
                    node_id: node_id.to_string(),
                })?;

        update.apply(&mut node);
        self.save_node(&node).await?;
        debug!(node_id, "Updated node");
        Ok(())
    }

    /// Set a node's query text, bump its generation-attempt counter, and
    /// transition it to `query_generated`.
    pub async fn update_query(&self, node_id: &str, query: impl Into<String>) -> TreeResult<()> {
        let index = self.require_index().await?;
        let mut node =
            self.load_node(&index, node_id)
                .await?
                .ok_or_else(|| TreeError::NodeNotFound {
                    node_id: node_id.to_string(),
                })?;

        node.query = Some(query.into());
        node.status = NodeStatus::QueryGenerated;
        node.generation_attempts += 1;
        self.save_node(&node).await?;
        debug!(node_id, attempts = node.generation_attempts, "Set node query");
        Ok(())
    }

    /// Record a node's execution result and transition its status.
    ///
    /// `success` reflects the absence of an execution-level error only;
    /// result quality is a downstream judgment the tree does not hold.
    pub async fn update_result(
        &self,
        node_id: &str,
        result: ExecutionResult,
        success: bool,
    ) -> TreeResult<()> {
        let status = if success {
            NodeStatus::ExecutedSuccess
        } else {
            NodeStatus::ExecutedFailed
        };
        let index = self.require_index().await?;
        let mut node =
            self.load_node(&index, node_id)
                .await?
                .ok_or_else(|| TreeError::NodeNotFound {
                    node_id: node_id.to_string(),
                })?;

        node.result = Some(result);
        node.status = status;
        self.save_node(&node).await?;
        debug!(node_id, status = %status, "Recorded execution result");
        Ok(())
    }

    /// Set a node's data-source mapping.
    pub async fn update_mapping(&self, node_id: &str, mapping: QueryMapping) -> TreeResult<()> {
        self.update_node(node_id, NodeUpdate::new().mapping(mapping))
            .await
    }

    /// Record a node's intent analysis.
    pub async fn update_analysis(&self, node_id: &str, analysis: AnalysisOutcome) -> TreeResult<()> {
        self.update_node(node_id, NodeUpdate::new().analysis(analysis))
            .await
    }

    /// Set a node's combine strategy.
    pub async fn update_combine_strategy(
        &self,
        node_id: &str,
        strategy: CombineStrategy,
    ) -> TreeResult<()> {
        self.update_node(node_id, NodeUpdate::new().combine_strategy(strategy))
            .await
    }

    /// Send a node back for another pass, clearing the blamed aspect.
    ///
    /// Linking blame also discards the recorded analysis and query; analysis
    /// blame discards the query; generation blame discards the query alone.
    /// The execution result is dropped and the node re-enters the lifecycle
    /// in the `revised` state, from which the next query generation runs.
    pub async fn revise_node(
        &self,
        node_id: &str,
        aspect: RevisionAspect,
    ) -> TreeResult<QueryNode> {
        let index = self.require_index().await?;
        let mut node =
            self.load_node(&index, node_id)
                .await?
                .ok_or_else(|| TreeError::NodeNotFound {
                    node_id: node_id.to_string(),
                })?;

        match aspect {
            RevisionAspect::Linking => {
                node.mapping = QueryMapping::default();
                node.analysis = None;
                node.query = None;
            }
            RevisionAspect::Analysis => {
                node.analysis = None;
                node.query = None;
            }
            RevisionAspect::Generation => {
                node.query = None;
            }
        }
        node.result = None;
        node.status = NodeStatus::Revised;
        self.save_node(&node).await?;
        info!(node_id, aspect = %aspect, "Revised node");
        Ok(node)
    }

    /// Delete a node and its whole subtree.
    ///
    /// The descendant set is computed breadth-first with a visited set, so
    /// each node is removed at most once even if a malformed tree contains
    /// back-references. Deleting a missing id, or deleting from an
    /// uninitialized tree, is a safe no-op. Returns the ids that were
    /// removed, deletion root first.
    pub async fn delete_subtree(&self, node_id: &str) -> TreeResult<Vec<String>> {
        let Some(mut index) = self.load_index().await? else {
            return Ok(Vec::new());
        };
        if !index.node_ids.iter().any(|id| id == node_id) {
            return Ok(Vec::new());
        }

        // Breadth-first descendant collection, visited-bounded.
        let mut to_delete: Vec<String> = Vec::new();
        let mut visited: HashSet<String> = HashSet::new();
        let mut queue: VecDeque<String> = VecDeque::new();
        queue.push_back(node_id.to_string());
        while let Some(current) = queue.pop_front() {
            if !visited.insert(current.clone()) {
                continue;
            }
            if let Some(node) = self.load_node(&index, &current).await? {
                for child in &node.child_ids {
                    queue.push_back(child.clone());
                }
            }
            to_delete.push(current);
        }

        // Detach the deletion root from its former parent.
        if let Some(root_of_deletion) = self.load_node(&index, node_id).await? {
            if let Some(parent_id) = &root_of_deletion.parent_id {
                if !visited.contains(parent_id) {
                    if let Some(mut parent) = self.load_node(&index, parent_id).await? {
                        parent.child_ids.retain(|id| id != node_id);
                        self.save_node(&parent).await?;
                    }
                }
            }
        }

        index.node_ids.retain(|id| !visited.contains(id));

        if visited.contains(&index.root_id) {
            // The whole tree went away; mark it uninitialized.
            self.store
                .set(TREE_INDEX_KEY, serde_json::Value::Null)
                .await?;
        } else {
            if index
                .current_node_id
                .as_ref()
                .map(|id| visited.contains(id))
                .unwrap_or(false)
            {
                index.current_node_id = Some(index.root_id.clone());
            }
            self.save_index(&index).await?;
        }

        info!(
            node_id,
            descendants = to_delete.len() - 1,
            "Deleted subtree"
        );
        Ok(to_delete)
    }

    /// Child nodes of `node_id`, in decomposition order.
    pub async fn children(&self, node_id: &str) -> TreeResult<Vec<QueryNode>> {
        let Some(index) = self.load_index().await? else {
            return Ok(Vec::new());
        };
        let Some(node) = self.load_node(&index, node_id).await? else {
            return Ok(Vec::new());
        };
        let mut children = Vec::with_capacity(node.child_ids.len());
        for child_id in &node.child_ids {
            if let Some(child) = self.load_node(&index, child_id).await? {
                children.push(child);
            }
        }
        Ok(children)
    }

    /// Parent node of `node_id`, if it has one.
    pub async fn parent(&self, node_id: &str) -> TreeResult<Option<QueryNode>> {
        let Some(index) = self.load_index().await? else {
            return Ok(None);
        };
        let Some(node) = self.load_node(&index, node_id).await? else {
            return Ok(None);
        };
        match node.parent_id {
            Some(parent_id) => self.load_node(&index, &parent_id).await,
            None => Ok(None),
        }
    }

    /// The parent's other children, i.e. this node's siblings.
    pub async fn siblings(&self, node_id: &str) -> TreeResult<Vec<QueryNode>> {
        let Some(parent) = self.parent(node_id).await? else {
            return Ok(Vec::new());
        };
        let index = self.require_index().await?;
        let mut siblings = Vec::new();
        for child_id in &parent.child_ids {
            if child_id != node_id {
                if let Some(sibling) = self.load_node(&index, child_id).await? {
                    siblings.push(sibling);
                }
            }
        }
        Ok(siblings)
    }

    /// Ancestors of `node_id`, nearest first, root last.
    ///
    /// The walk is visited-bounded so a malformed parent chain terminates.
    pub async fn ancestors(&self, node_id: &str) -> TreeResult<Vec<QueryNode>> {
        let Some(index) = self.load_index().await? else {
            return Ok(Vec::new());
        };
        let mut ancestors = Vec::new();
        let mut visited: HashSet<String> = HashSet::new();
        visited.insert(node_id.to_string());

        let mut cursor = match self.load_node(&index, node_id).await? {
            Some(node) => node.parent_id,
            None => None,
        };
        while let Some(parent_id) = cursor {
            if !visited.insert(parent_id.clone()) {
                warn!(node_id, "Back-reference encountered in ancestor walk");
                break;
            }
            match self.load_node(&index, &parent_id).await? {
                Some(parent) => {
                    cursor = parent.parent_id.clone();
                    ancestors.push(parent);
                }
                None => break,
            }
        }
        Ok(ancestors)
    }

    /// Node ids from the root down to `node_id`, root first, `node_id` last.
    pub async fn path_to_root(&self, node_id: &str) -> TreeResult<Vec<String>> {
        let Some(index) = self.load_index().await? else {
            return Ok(Vec::new());
        };
        if self.load_node(&index, node_id).await?.is_none() {
            return Ok(Vec::new());
        }
        let mut path: Vec<String> = self
            .ancestors(node_id)
            .await?
            .into_iter()
            .map(|node| node.node_id)
            .collect();
        path.reverse();
        path.push(node_id.to_string());
        Ok(path)
    }

    /// Max root-to-leaf edge count in the subtree rooted at `node_id`.
    ///
    /// Every leaf has depth zero.
    pub async fn depth(&self, node_id: &str) -> TreeResult<usize> {
        let snapshot = self.snapshot().await?;
        snapshot.depth(node_id).ok_or_else(|| TreeError::NodeNotFound {
            node_id: node_id.to_string(),
        })
    }

    /// All nodes with no children.
    pub async fn leaves(&self) -> TreeResult<Vec<QueryNode>> {
        Ok(self
            .all_nodes()
            .await?
            .into_iter()
            .filter(QueryNode::is_leaf)
            .collect())
    }

    /// Nodes whose intent contains `pattern`, case-insensitively.
    pub async fn find_by_intent(&self, pattern: &str) -> TreeResult<Vec<QueryNode>> {
        let needle = pattern.to_lowercase();
        Ok(self
            .all_nodes()
            .await?
            .into_iter()
            .filter(|node| node.intent.to_lowercase().contains(&needle))
            .collect())
    }

    /// Nodes that have a query generated but not yet executed.
    pub async fn executable_nodes(&self) -> TreeResult<Vec<QueryNode>> {
        Ok(self
            .all_nodes()
            .await?
            .into_iter()
            .filter(|node| node.query.is_some() && node.status == NodeStatus::QueryGenerated)
            .collect())
    }

    /// Nodes whose last execution failed.
    pub async fn failed_nodes(&self) -> TreeResult<Vec<QueryNode>> {
        Ok(self
            .all_nodes()
            .await?
            .into_iter()
            .filter(|node| node.status == NodeStatus::ExecutedFailed)
            .collect())
    }

    /// Nodes whose last execution succeeded.
    pub async fn successful_nodes(&self) -> TreeResult<Vec<QueryNode>> {
        Ok(self
            .all_nodes()
            .await?
            .into_iter()
            .filter(|node| node.status == NodeStatus::ExecutedSuccess)
            .collect())
    }

    /// Aggregate statistics over the tree.
    pub async fn stats(&self) -> TreeResult<TreeStats> {
        let Some(index) = self.load_index().await? else {
            return Ok(TreeStats::default());
        };
        let snapshot = self.snapshot().await?;

        let total_nodes = snapshot.nodes.len();
        let leaf_nodes = snapshot.nodes.values().filter(|n| n.is_leaf()).count();
        let executed_nodes = snapshot
            .nodes
            .values()
            .filter(|n| n.status.is_executed())
            .count();
        let failed_nodes = snapshot
            .nodes
            .values()
            .filter(|n| n.status == NodeStatus::ExecutedFailed)
            .count();
        let max_depth = snapshot.depth(&index.root_id).unwrap_or(0);

        Ok(TreeStats {
            total_nodes,
            max_depth,
            leaf_nodes,
            executed_nodes,
            failed_nodes,
        })
    }

    /// Take an immutable copy of the whole tree.
    pub async fn snapshot(&self) -> TreeResult<TreeSnapshot> {
        let index = self.require_index().await?;
        let mut nodes = HashMap::with_capacity(index.node_ids.len());
        for node_id in &index.node_ids {
            if let Some(node) = self.load_node(&index, node_id).await? {
                nodes.insert(node_id.clone(), node);
            }
        }
        Ok(TreeSnapshot {
            root_id: index.root_id,
            current_node_id: index.current_node_id,
            nodes,
        })
    }

    async fn all_nodes(&self) -> TreeResult<Vec<QueryNode>> {
        let Some(index) = self.load_index().await? else {
            return Ok(Vec::new());
        };
        let mut nodes = Vec::with_capacity(index.node_ids.len());
        for node_id in &index.node_ids {
            if let Some(node) = self.load_node(&index, node_id).await? {
                nodes.push(node);
            }
        }
        Ok(nodes)
    }

    async fn load_index(&self) -> TreeResult<Option<TreeIndex>> {
        match self.store.get(TREE_INDEX_KEY).await? {
            None | Some(serde_json::Value::Null) => Ok(None),
            Some(value) => {
                let index: TreeIndex =
                    serde_json::from_value(value).map_err(|e| crate::error::StoreError::Corrupt {
                        expected: "TreeIndex".to_string(),
                        message: e.to_string(),
                    })?;
                Ok(Some(index))
            }
        }
    }

    async fn require_index(&self) -> TreeResult<TreeIndex> {
        self.load_index().await?.ok_or(TreeError::TreeUninitialized)
    }

    async fn save_index(&self, index: &TreeIndex) -> TreeResult<()> {
        self.store.set_json(TREE_INDEX_KEY, index).await?;
        Ok(())
    }

    async fn load_node(&self, index: &TreeIndex, node_id: &str) -> TreeResult<Option<QueryNode>> {
        if !index.node_ids.iter().any(|id| id == node_id) {
            return Ok(None);
        }
        Ok(self.store.get_json(&node_record_name(node_id)).await?)
    }

    async fn save_node(&self, node: &QueryNode) -> TreeResult<()> {
        let mut attributes = HashMap::new();
        attributes.insert("nodeId".to_string(), node.node_id.clone());
        self.store
            .set_json_with(node_record_name(&node.node_id), node, attributes)
            .await?;
        Ok(())
    }
}
