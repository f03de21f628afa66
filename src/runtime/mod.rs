//! Agent runtime module
//!
//! Hosts the polling loop every agent shares, with pluggable handlers for
//! messages, tasks and periodic work.

pub mod agent;
pub mod error;
pub mod handlers;

pub use agent::{AgentRuntime, CycleReport, RuntimeState, CONFIGURATION_MESSAGE, POLL_INTERVAL_KEY};
pub use error::{CycleError, HandlerError, HandlerResult};
pub use handlers::{AgentContext, HandlerTable, MessageHandler, PeriodicAction, TaskHandler};
