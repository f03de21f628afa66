//! Pluggable agent handlers
//!
//! Concrete agents supply message handlers keyed by `message_type`, task
//! handlers keyed by the payload's `type` field, and optionally a periodic
//! action run on cycles with no pending tasks.

use crate::error::Result;
use crate::mailbox::Mailbox;
use crate::models::{AgentIdentity, Message, Task};
use crate::registry::Registry;
use crate::runtime::error::HandlerResult;
use crate::store::Store;
use crate::task_queue::TaskQueue;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// What a handler can see and use: its own identity and the substrate
#[derive(Debug, Clone)]
pub struct AgentContext {
    identity: AgentIdentity,
    registry: Registry,
    mailbox: Mailbox,
    tasks: TaskQueue,
}

impl AgentContext {
    /// Create a context for `identity` on the shared store
    pub fn new(store: &Store, identity: AgentIdentity) -> Self {
        Self {
            identity,
            registry: Registry::new(store),
            mailbox: Mailbox::new(store),
            tasks: TaskQueue::new(store),
        }
    }

    /// This agent's id
    pub fn agent_id(&self) -> &str {
        &self.identity.id
    }

    /// This agent's type
    pub fn agent_type(&self) -> &str {
        &self.identity.agent_type
    }

    /// Registry handle
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Mailbox handle
    pub fn mailbox(&self) -> &Mailbox {
        &self.mailbox
    }

    /// Task queue handle
    pub fn tasks(&self) -> &TaskQueue {
        &self.tasks
    }

    /// Send a message from this agent
    pub async fn send(&self, recipient_id: &str, message_type: &str, payload: &Value) -> Result<i64> {
        self.mailbox
            .send(&self.identity.id, recipient_id, message_type, payload)
            .await
    }

    /// Hand a task to another agent (or to this one)
    pub async fn create_task(&self, owner_agent_id: &str, payload: &Value, priority: i64) -> Result<String> {
        self.tasks.create(owner_agent_id, payload, priority).await
    }
}

/// Handles one kind of message
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Process a received message
    async fn handle(&self, ctx: &AgentContext, message: &Message) -> HandlerResult<()>;
}

/// Handles one kind of task
#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// Execute a claimed task and return the value stored as its result
    async fn handle(&self, ctx: &AgentContext, task: &Task) -> HandlerResult<Value>;
}

/// Agent-specific work done on cycles with no pending tasks
#[async_trait]
pub trait PeriodicAction: Send + Sync {
    /// Run the action once
    async fn run(&self, ctx: &AgentContext) -> HandlerResult<()>;
}

/// Handler lookup table for one agent
#[derive(Default, Clone)]
pub struct HandlerTable {
    messages: HashMap<String, Arc<dyn MessageHandler>>,
    tasks: HashMap<String, Arc<dyn TaskHandler>>,
    periodic: Option<Arc<dyn PeriodicAction>>,
}

impl HandlerTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the handler for `message_type`, replacing any previous one
    pub fn on_message(
        mut self,
        message_type: impl Into<String>,
        handler: impl MessageHandler + 'static,
    ) -> Self {
        self.messages.insert(message_type.into(), Arc::new(handler));
        self
    }

    /// Register the handler for tasks whose payload `type` is `task_type`
    pub fn on_task(mut self, task_type: impl Into<String>, handler: impl TaskHandler + 'static) -> Self {
        self.tasks.insert(task_type.into(), Arc::new(handler));
        self
    }

    /// Set the periodic action
    pub fn periodic(mut self, action: impl PeriodicAction + 'static) -> Self {
        self.periodic = Some(Arc::new(action));
        self
    }

    /// Handler for `message_type`, if any
    pub fn message_handler(&self, message_type: &str) -> Option<Arc<dyn MessageHandler>> {
        self.messages.get(message_type).cloned()
    }

    /// Handler for `task_type`, if any
    pub fn task_handler(&self, task_type: &str) -> Option<Arc<dyn TaskHandler>> {
        self.tasks.get(task_type).cloned()
    }

    /// The periodic action, if any
    pub fn periodic_action(&self) -> Option<Arc<dyn PeriodicAction>> {
        self.periodic.clone()
    }
}

impl fmt::Debug for HandlerTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut message_types: Vec<&String> = self.messages.keys().collect();
        message_types.sort();
        let mut task_types: Vec<&String> = self.tasks.keys().collect();
        task_types.sort();
        f.debug_struct("HandlerTable")
            .field("messages", &message_types)
            .field("tasks", &task_types)
            .field("periodic", &self.periodic.is_some())
            .finish()
    }
}
