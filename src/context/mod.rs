//! Task context lifecycle.
//!
//! One [`TaskContext`] exists per task. It is created at task start and its
//! status only moves forward (initializing -> processing -> completed or
//! failed); the single exception is an explicit re-initialize, which starts a
//! fresh context.

use serde::Serialize;
use tracing::{debug, info};

use crate::error::{ContextError, ContextResult};
use crate::store::KeyValueStore;
use crate::types::{TaskContext, TaskStatus};

/// Store record name for the task context.
const CONTEXT_KEY: &str = "taskContext";

/// Manages the task context stored in a task-scoped [`KeyValueStore`].
#[derive(Debug, Clone)]
pub struct TaskContextManager {
    store: KeyValueStore,
}

impl TaskContextManager {
    /// Create a manager over the given store
    pub fn new(store: KeyValueStore) -> Self {
        Self { store }
    }

    /// Start a fresh task context in the initializing state.
    ///
    /// Any previous context in the same store is superseded; this is the
    /// explicit reset that escapes the monotonic status rule.
    pub async fn initialize(
        &self,
        original_query: impl Into<String>,
        data_source_name: impl Into<String>,
        evidence: Option<String>,
    ) -> ContextResult<TaskContext> {
        let mut context = TaskContext::new(original_query, data_source_name);
        if let Some(evidence) = evidence {
            context = context.with_evidence(evidence);
        }
        self.save(&context).await?;
        info!(task_id = %context.task_id, "Initialized task context");
        Ok(context)
    }

    /// The current task context, if one has been initialized.
    pub async fn get(&self) -> ContextResult<Option<TaskContext>> {
        Ok(self.store.get_json(CONTEXT_KEY).await?)
    }

    /// Transition the task to `status`.
    ///
    /// Rejects non-monotonic transitions with
    /// [`ContextError::InvalidTransition`]; setting the current status again
    /// is a no-op.
    pub async fn set_status(&self, status: TaskStatus) -> ContextResult<TaskContext> {
        let mut context = self.get().await?.ok_or(ContextError::NotInitialized)?;
        if !context.status.can_transition_to(status) {
            return Err(ContextError::InvalidTransition {
                from: context.status.to_string(),
                to: status.to_string(),
            });
        }
        if context.status != status {
            debug!(from = %context.status, to = %status, "Task status transition");
            context.status = status;
            self.save(&context).await?;
        }
        Ok(context)
    }

    /// Mark the task as processing.
    pub async fn mark_processing(&self) -> ContextResult<TaskContext> {
        self.set_status(TaskStatus::Processing).await
    }

    /// Mark the task as completed.
    pub async fn mark_completed(&self) -> ContextResult<TaskContext> {
        self.set_status(TaskStatus::Completed).await
    }

    /// Mark the task as failed.
    pub async fn mark_failed(&self) -> ContextResult<TaskContext> {
        self.set_status(TaskStatus::Failed).await
    }

    /// Whether the task has reached a terminal status.
    pub async fn is_terminal(&self) -> ContextResult<bool> {
        Ok(self
            .get()
            .await?
            .map(|context| context.status.is_terminal())
            .unwrap_or(false))
    }

    async fn save<T: Serialize>(&self, context: &T) -> ContextResult<()> {
        self.store.set_json(CONTEXT_KEY, context).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn manager() -> TaskContextManager {
        TaskContextManager::new(KeyValueStore::new())
    }

    #[tokio::test]
    async fn test_initialize_and_get() {
        let manager = manager();
        let created = manager
            .initialize("how many birds", "wildlife", Some("see birds table".to_string()))
            .await
            .unwrap();

        let fetched = manager.get().await.unwrap().unwrap();
        assert_eq!(fetched, created);
        assert_eq!(fetched.status, TaskStatus::Initializing);
        assert_eq!(fetched.evidence.as_deref(), Some("see birds table"));
    }

    #[tokio::test]
    async fn test_get_before_initialize() {
        let manager = manager();
        assert!(manager.get().await.unwrap().is_none());
        assert!(!manager.is_terminal().await.unwrap());
    }

    #[tokio::test]
    async fn test_status_before_initialize_fails() {
        let manager = manager();
        let err = manager.mark_processing().await.unwrap_err();
        assert!(matches!(err, ContextError::NotInitialized));
    }

    #[tokio::test]
    async fn test_monotonic_transitions() {
        let manager = manager();
        manager.initialize("q", "db", None).await.unwrap();

        manager.mark_processing().await.unwrap();
        manager.mark_completed().await.unwrap();
        assert!(manager.is_terminal().await.unwrap());

        // Completed cannot move back to processing.
        let err = manager.mark_processing().await.unwrap_err();
        assert!(matches!(err, ContextError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn test_failure_from_initializing() {
        let manager = manager();
        manager.initialize("q", "db", None).await.unwrap();
        let context = manager.mark_failed().await.unwrap();
        assert_eq!(context.status, TaskStatus::Failed);
    }

    #[tokio::test]
    async fn test_reinitialize_resets_status() {
        let manager = manager();
        manager.initialize("q1", "db", None).await.unwrap();
        manager.mark_processing().await.unwrap();
        manager.mark_failed().await.unwrap();

        // Explicit reset: a new context starts over.
        let fresh = manager.initialize("q2", "db", None).await.unwrap();
        assert_eq!(fresh.status, TaskStatus::Initializing);
        assert_eq!(manager.get().await.unwrap().unwrap().original_query, "q2");
    }

    #[tokio::test]
    async fn test_setting_same_status_is_noop() {
        let manager = manager();
        manager.initialize("q", "db", None).await.unwrap();
        manager.mark_processing().await.unwrap();
        let context = manager.mark_processing().await.unwrap();
        assert_eq!(context.status, TaskStatus::Processing);
    }
}
