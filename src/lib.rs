//! # Query Tree Orchestrator
//!
//! A decomposition-tree orchestration engine for natural-language query
//! workflows. A question is split into a tree of sub-queries; each sub-query
//! moves through a fixed lifecycle (link data source -> analyze intent ->
//! generate query -> execute -> evaluate) driven by external collaborators,
//! and parent nodes combine their children's results.
//!
//! ## Features
//!
//! - **Versioned Store**: append-only key-value log with latest-wins lookup
//!   and attribute/content pattern queries, scoped to one task
//! - **Decomposition Tree**: arena-backed tree with structural invariants,
//!   typed partial updates, subtree deletion, and a full navigation suite
//! - **Operation Ledger**: immutable journal of every node mutation with
//!   lifecycle derivation and aggregate summaries
//! - **Status-Driven Scheduler**: pure, deterministic decision function
//!   mapping tree + judgment state to the next logical step
//! - **Workflow Driver**: the reference control loop wiring collaborators to
//!   the engine through narrow async traits
//!
//! ## Architecture
//!
//! ```text
//! WorkflowDriver -> TaskScheduler -> collaborator (external)
//!        |               |                 |
//!        +--- QueryTreeManager / OperationHistory / JudgmentStore
//!                        |
//!                  KeyValueStore (task-scoped)
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use query_tree_orchestrator::{
//!     Collaborators, Config, KeyValueStore, WorkflowDriver,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_env()?;
//!     let store = KeyValueStore::new();
//!     let collaborators: Collaborators = build_collaborators()?;
//!     let driver = WorkflowDriver::new(store, collaborators, config.limits);
//!     let outcome = driver
//!         .run("How many customers ordered twice?", "shop", None)
//!         .await?;
//!     println!("{:?}", outcome.final_result);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]

/// Configuration management for the engine.
pub mod config;
/// Task context lifecycle.
pub mod context;
/// Error types and result aliases.
pub mod error;
/// Operation ledger for node mutations.
pub mod history;
/// Out-of-band quality judgments.
pub mod judgment;
/// Status-driven scheduling decisions.
pub mod scheduler;
/// Versioned key-value store.
pub mod store;
/// Decomposition tree management.
pub mod tree;
/// Shared data model.
pub mod types;
/// Collaborator traits and the reference control loop.
pub mod workflow;

pub use config::Config;
pub use error::{AppError, AppResult};
pub use scheduler::{Decision, TaskScheduler};
pub use store::{CancellationToken, KeyValueStore};
pub use tree::QueryTreeManager;
pub use workflow::{Collaborators, WorkflowDriver, WorkflowOutcome};
