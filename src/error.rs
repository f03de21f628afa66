//! Error types for the coordination substrate
//!
//! Every registry, mailbox and task queue operation returns
//! `Result<T, SubstrateError>`. An empty result is always `Ok`, so callers
//! can tell "nothing to do" apart from "store unreachable".

use crate::models::TaskStatus;
use thiserror::Error;

/// Substrate-level error types
#[derive(Error, Debug)]
pub enum SubstrateError {
    /// The store rejected or failed a statement
    #[error("Store error while trying to {context}: {source}")]
    Store {
        /// What the substrate was doing when the store failed
        context: &'static str,
        /// Underlying driver error
        #[source]
        source: sqlx::Error,
    },

    /// A payload or result could not be (de)serialized
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// No registry row exists for the agent
    #[error("Agent not found: {0}")]
    AgentNotFound(String),

    /// No task row exists for the public task id
    #[error("Task not found: {0}")]
    TaskNotFound(String),

    /// The requested task status change would move the lifecycle backwards
    /// or skip a step
    #[error("Invalid task transition for {task_id}: {from} -> {to}")]
    InvalidTransition {
        /// Public task id
        task_id: String,
        /// Status currently stored
        from: TaskStatus,
        /// Status that was requested
        to: TaskStatus,
    },

    /// A status string read from the store is not one we know
    #[error("Invalid status value: {0}")]
    InvalidStatus(String),

    /// Catch-all for unexpected errors
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl SubstrateError {
    /// Wrap a driver error with the operation that produced it
    pub fn store(context: &'static str, source: sqlx::Error) -> Self {
        SubstrateError::Store { context, source }
    }
}

/// Result alias used across the crate
pub type Result<T> = std::result::Result<T, SubstrateError>;
