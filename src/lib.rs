//! Agent Coordination Substrate
//!
//! Lets independent long-running agents coordinate through a shared store:
//! a registry of agent status, point-to-point mailboxes, a prioritized task
//! queue, and the polling runtime every agent runs.

pub mod config;
pub mod error;
pub mod mailbox;
pub mod models;
pub mod registry;
pub mod runtime;
pub mod store;
pub mod task_queue;

pub use config::{Config, RuntimeConfig, StoreConfig};
pub use error::SubstrateError;
pub use mailbox::Mailbox;
pub use models::{
    AgentIdentity, AgentRecord, AgentStatus, Message, Task, TaskCounts, TaskStatus,
    DEFAULT_TASK_PRIORITY,
};
pub use registry::Registry;
pub use runtime::{AgentContext, AgentRuntime, HandlerError, HandlerTable};
pub use store::Store;
pub use task_queue::TaskQueue;
