//! Agent polling loop
//!
//! Every agent runs the same cycle: drain its mailbox, drain its pending
//! tasks, run its periodic action when there was nothing queued, then sleep.
//! A failed cycle marks the agent `error` in the registry, sleeps a fixed
//! backoff and resumes. The loop only stops when its cancellation token fires.

use crate::config::RuntimeConfig;
use crate::error::SubstrateError;
use crate::models::{AgentIdentity, AgentStatus, Message, Task, TaskStatus};
use crate::runtime::error::{CycleError, HandlerError, HandlerResult};
use crate::runtime::handlers::{AgentContext, HandlerTable};
use crate::store::Store;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Message type the runtime interprets itself
pub const CONFIGURATION_MESSAGE: &str = "configuration";

/// Payload key of a configuration message that changes the polling interval
pub const POLL_INTERVAL_KEY: &str = "poll_interval_secs";

/// Lifecycle state of a runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeState {
    /// Not yet registered
    Starting,
    /// Polling normally
    Active,
    /// Last cycle failed; waiting out the backoff
    Error,
}

/// What one successful cycle did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Messages taken from the mailbox
    pub messages_received: usize,
    /// Messages dispatched to a handler or applied as configuration
    pub messages_handled: usize,
    /// Messages with no handler
    pub messages_skipped: usize,
    /// Tasks completed
    pub tasks_completed: usize,
    /// Tasks that were no longer pending when this agent tried to claim them
    pub tasks_skipped: usize,
    /// Whether the periodic action ran
    pub periodic_ran: bool,
}

/// Hosts the polling loop for one agent
#[derive(Debug)]
pub struct AgentRuntime {
    ctx: AgentContext,
    handlers: HandlerTable,
    config: RuntimeConfig,
    state: RuntimeState,
}

impl AgentRuntime {
    /// Create a runtime for `identity` with its handlers
    pub fn new(
        store: &Store,
        identity: AgentIdentity,
        handlers: HandlerTable,
        config: RuntimeConfig,
    ) -> Self {
        Self {
            ctx: AgentContext::new(store, identity),
            handlers,
            config,
            state: RuntimeState::Starting,
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> RuntimeState {
        self.state
    }

    /// The context handed to handlers
    pub fn context(&self) -> &AgentContext {
        &self.ctx
    }

    /// Current polling interval
    pub fn poll_interval(&self) -> Duration {
        self.config.poll_interval
    }

    /// Register the agent and mark it active
    pub async fn start(&mut self) -> Result<(), SubstrateError> {
        self.ctx
            .registry()
            .register(self.ctx.agent_id(), self.ctx.agent_type())
            .await?;
        self.activate().await
    }

    /// Run the loop until `cancel` fires, then mark the agent inactive
    pub async fn run(mut self, cancel: CancellationToken) {
        info!(
            agent_id = %self.ctx.agent_id(),
            agent_type = %self.ctx.agent_type(),
            "Agent runtime starting"
        );

        while !cancel.is_cancelled() {
            let delay = match self.step().await {
                Ok(report) => {
                    debug!(agent_id = %self.ctx.agent_id(), ?report, "Cycle completed");
                    self.config.poll_interval
                }
                Err(e) => {
                    self.enter_error(&e).await;
                    self.config.error_backoff
                }
            };

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        self.shutdown().await;
    }

    /// Run a single cycle: mailbox, then tasks, then the periodic action
    ///
    /// Does not register the agent or touch its registry status; use
    /// [`AgentRuntime::start`] first, or [`AgentRuntime::run`] for the
    /// whole loop.
    pub async fn run_cycle(&mut self) -> Result<CycleReport, CycleError> {
        let mut report = CycleReport::default();

        let messages = self
            .ctx
            .mailbox()
            .receive(self.ctx.agent_id(), true)
            .await?;
        report.messages_received = messages.len();

        // Received messages are already consumed, so dispatch all of them
        // before reporting the first failure
        let mut first_failure = None;
        for message in &messages {
            match self.dispatch_message(message).await {
                Ok(true) => report.messages_handled += 1,
                Ok(false) => report.messages_skipped += 1,
                Err(source) => {
                    error!(
                        agent_id = %self.ctx.agent_id(),
                        message_id = message.id,
                        message_type = %message.message_type,
                        error = %source,
                        "Message handler failed"
                    );
                    if first_failure.is_none() {
                        first_failure = Some(CycleError::Message {
                            message_id: message.id,
                            message_type: message.message_type.clone(),
                            source,
                        });
                    }
                }
            }
        }
        if let Some(failure) = first_failure {
            return Err(failure);
        }

        let tasks = self.ctx.tasks().fetch_pending(self.ctx.agent_id()).await?;
        for task in &tasks {
            self.process_task(task, &mut report).await?;
        }

        if tasks.is_empty() {
            if let Some(action) = self.handlers.periodic_action() {
                action.run(&self.ctx).await.map_err(CycleError::Periodic)?;
                report.periodic_ran = true;
            }
        }

        Ok(report)
    }

    async fn step(&mut self) -> Result<CycleReport, CycleError> {
        match self.state {
            RuntimeState::Starting => self.start().await?,
            RuntimeState::Error => self.activate().await?,
            RuntimeState::Active => {}
        }
        self.run_cycle().await
    }

    async fn activate(&mut self) -> Result<(), SubstrateError> {
        self.ctx
            .registry()
            .update_status(self.ctx.agent_id(), AgentStatus::Active)
            .await?;
        self.state = RuntimeState::Active;
        Ok(())
    }

    async fn enter_error(&mut self, cause: &CycleError) {
        error!(
            agent_id = %self.ctx.agent_id(),
            error = %cause,
            backoff_secs = self.config.error_backoff.as_secs(),
            "Agent cycle failed, backing off"
        );

        // Never registered: there is no row to mark, retry from the top
        if self.state == RuntimeState::Starting {
            return;
        }
        self.state = RuntimeState::Error;

        if let Err(e) = self
            .ctx
            .registry()
            .update_status(self.ctx.agent_id(), AgentStatus::Error)
            .await
        {
            warn!(agent_id = %self.ctx.agent_id(), error = %e, "Failed to publish error status");
        }
    }

    async fn shutdown(&mut self) {
        if self.state != RuntimeState::Starting {
            if let Err(e) = self
                .ctx
                .registry()
                .update_status(self.ctx.agent_id(), AgentStatus::Inactive)
                .await
            {
                warn!(agent_id = %self.ctx.agent_id(), error = %e, "Failed to publish inactive status");
            }
        }
        info!(agent_id = %self.ctx.agent_id(), "Agent runtime stopped");
    }

    /// Returns whether the message was handled
    async fn dispatch_message(&mut self, message: &Message) -> HandlerResult<bool> {
        if let Some(error) = &message.payload_error {
            return Err(HandlerError::MalformedPayload(format!(
                "message payload is not valid JSON: {error}"
            )));
        }

        // A registered configuration handler sees the message even when the
        // runtime settings in it are rejected
        let configured = if message.message_type == CONFIGURATION_MESSAGE {
            self.apply_configuration(message)
        } else {
            Ok(false)
        };

        let mut handled = false;
        if let Some(handler) = self.handlers.message_handler(&message.message_type) {
            handler.handle(&self.ctx, message).await?;
            handled = true;
        }
        handled |= configured?;

        if !handled {
            warn!(
                agent_id = %self.ctx.agent_id(),
                message_id = message.id,
                message_type = %message.message_type,
                "No handler for message type, skipping"
            );
        }
        Ok(handled)
    }

    /// Apply runtime settings carried by a configuration message
    ///
    /// Returns whether any setting was applied.
    fn apply_configuration(&mut self, message: &Message) -> HandlerResult<bool> {
        let Some(raw) = message.payload.get(POLL_INTERVAL_KEY) else {
            return Ok(false);
        };

        let secs = raw.as_u64().filter(|secs| *secs > 0).ok_or_else(|| {
            HandlerError::MalformedPayload(format!(
                "{} must be a positive integer, got {}",
                POLL_INTERVAL_KEY, raw
            ))
        })?;

        self.config.poll_interval = Duration::from_secs(secs);
        info!(
            agent_id = %self.ctx.agent_id(),
            poll_interval_secs = secs,
            "Updated polling interval"
        );
        Ok(true)
    }

    async fn process_task(&mut self, task: &Task, report: &mut CycleReport) -> Result<(), CycleError> {
        let queue = self.ctx.tasks().clone();

        match queue
            .update_status(&task.task_id, TaskStatus::InProgress, None)
            .await
        {
            Ok(()) => {}
            Err(SubstrateError::InvalidTransition { from, .. }) => {
                warn!(
                    agent_id = %self.ctx.agent_id(),
                    task_id = %task.task_id,
                    status = %from,
                    "Task already claimed, skipping"
                );
                report.tasks_skipped += 1;
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        }

        let outcome = match (&task.payload_error, task.task_type()) {
            (Some(error), _) => Err(HandlerError::MalformedPayload(format!(
                "task payload is not valid JSON: {error}"
            ))),
            (None, None) => Err(HandlerError::MalformedPayload(
                "task payload has no string `type` field".to_string(),
            )),
            (None, Some(task_type)) => match self.handlers.task_handler(task_type) {
                Some(handler) => handler.handle(&self.ctx, task).await,
                None => Err(HandlerError::UnknownTaskType(task_type.to_string())),
            },
        };

        match outcome {
            Ok(result) => {
                queue
                    .update_status(&task.task_id, TaskStatus::Completed, Some(&result))
                    .await?;
                report.tasks_completed += 1;
                Ok(())
            }
            Err(source) => {
                if let Err(e) = queue
                    .update_status(&task.task_id, TaskStatus::Failed, Some(&source.to_result_value()))
                    .await
                {
                    error!(
                        agent_id = %self.ctx.agent_id(),
                        task_id = %task.task_id,
                        handler_error = %source,
                        error = %e,
                        "Failed to record task failure"
                    );
                    return Err(e.into());
                }
                Err(CycleError::Task {
                    task_id: task.task_id.clone(),
                    source,
                })
            }
        }
    }
}
