use thiserror::Error;

/// Application-level errors
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Tree error: {0}")]
    Tree(#[from] TreeError),

    #[error("Context error: {0}")]
    Context(#[from] ContextError),

    #[error("Workflow error: {0}")]
    Workflow(#[from] WorkflowError),

    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Versioned store errors
///
/// An unavailable store is fatal for the current task and is not retried by
/// the engine; retry policy, if any, belongs to the caller.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Store unavailable: {message}")]
    Unavailable { message: String },

    #[error("Record is not a valid {expected}: {message}")]
    Corrupt { expected: String, message: String },
}

/// Structural errors raised by the decomposition tree manager
#[derive(Debug, Error)]
pub enum TreeError {
    #[error("Node not found: {node_id}")]
    NodeNotFound { node_id: String },

    #[error("Parent node not found: {parent_id}")]
    ParentNotFound { parent_id: String },

    #[error("Query tree is not initialized")]
    TreeUninitialized,

    #[error("Node already exists: {node_id}")]
    DuplicateNode { node_id: String },

    #[error("Attaching {node_id} under {parent_id} would form a cycle")]
    CycleDetected { node_id: String, parent_id: String },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Task context errors
#[derive(Debug, Error)]
pub enum ContextError {
    #[error("Task context is not initialized")]
    NotInitialized,

    #[error("Invalid task status transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Workflow driver errors
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("{step} collaborator failed: {message}")]
    Collaborator { step: String, message: String },

    #[error("Workflow exceeded {limit} steps without completing")]
    StepLimitExceeded { limit: u32 },

    #[error("Scheduler error: {reason}")]
    Scheduler { reason: String },
}

/// Result type alias for application errors
pub type AppResult<T> = Result<T, AppError>;

/// Result type alias for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Result type alias for tree operations
pub type TreeResult<T> = Result<T, TreeError>;

/// Result type alias for context operations
pub type ContextResult<T> = Result<T, ContextError>;
