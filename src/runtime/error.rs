//! Runtime-specific error types
//!
//! Handler outcomes are explicit values: the runtime inspects them to decide
//! which task status to write and whether the cycle failed.

use crate::error::SubstrateError;
use serde_json::{json, Value};
use thiserror::Error;

/// Errors a message, task or periodic handler can report
#[derive(Error, Debug)]
pub enum HandlerError {
    /// Business logic failed
    #[error("Handler failed: {0}")]
    Failed(String),

    /// The payload is missing fields or has the wrong shape
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    /// No handler is registered for the task's `type`
    #[error("No handler registered for task type: {0}")]
    UnknownTaskType(String),

    /// A substrate call made by the handler failed
    #[error(transparent)]
    Substrate(#[from] SubstrateError),
}

impl HandlerError {
    /// Short machine-readable kind, stored with failed tasks
    pub fn kind(&self) -> &'static str {
        match self {
            HandlerError::Failed(_) => "failed",
            HandlerError::MalformedPayload(_) => "malformed_payload",
            HandlerError::UnknownTaskType(_) => "unknown_task_type",
            HandlerError::Substrate(_) => "substrate",
        }
    }

    /// Result value written to a task that this error failed
    pub fn to_result_value(&self) -> Value {
        json!({
            "error": self.to_string(),
            "kind": self.kind(),
        })
    }
}

/// Result alias for handlers
pub type HandlerResult<T> = std::result::Result<T, HandlerError>;

/// Why a polling cycle ended early
#[derive(Error, Debug)]
pub enum CycleError {
    /// The store failed while draining the mailbox or task queue
    #[error(transparent)]
    Substrate(#[from] SubstrateError),

    /// A message handler failed
    #[error("Message {message_id} ({message_type}) failed: {source}")]
    Message {
        /// Message id
        message_id: i64,
        /// Message type that was dispatched
        message_type: String,
        /// Handler error
        #[source]
        source: HandlerError,
    },

    /// A task handler failed; the task has been marked failed
    #[error("Task {task_id} failed: {source}")]
    Task {
        /// Public task id
        task_id: String,
        /// Handler error
        #[source]
        source: HandlerError,
    },

    /// The periodic action failed
    #[error("Periodic action failed: {0}")]
    Periodic(#[source] HandlerError),
}
