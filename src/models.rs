//! Coordination data models
//!
//! Defines agent records, messages and tasks, plus the row shapes they are
//! read from. Statuses are stored as lowercase strings; timestamps are Unix
//! epoch milliseconds.

use crate::error::SubstrateError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Unique identifier for an agent
pub type AgentId = String;

/// Default priority for new tasks
pub const DEFAULT_TASK_PRIORITY: i64 = 5;

/// SQL expression for the store's current time as Unix epoch milliseconds
///
/// Every writer stamps rows with the store's clock, never its own.
pub const STORE_NOW_MILLIS: &str =
    "CAST((julianday('now') - 2440587.5) * 86400000.0 AS INTEGER)";

/// Decode a stored JSON payload, keeping the raw text when it is not JSON
///
/// Returns the payload and, for undecodable text, the parse error.
fn decode_payload(raw: String) -> (Value, Option<String>) {
    match serde_json::from_str(&raw) {
        Ok(value) => (value, None),
        Err(e) => (Value::String(raw), Some(e.to_string())),
    }
}

fn millis_to_datetime(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap_or_else(Utc::now)
}

/// Agent status as published in the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    /// Registered but not polling
    Inactive,
    /// Polling loop is running
    Active,
    /// Last cycle failed, agent is backing off
    Error,
}

impl AgentStatus {
    /// Convert the status to its stored representation
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentStatus::Inactive => "inactive",
            AgentStatus::Active => "active",
            AgentStatus::Error => "error",
        }
    }
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentStatus {
    type Err = SubstrateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "inactive" => Ok(AgentStatus::Inactive),
            "active" => Ok(AgentStatus::Active),
            "error" => Ok(AgentStatus::Error),
            other => Err(SubstrateError::InvalidStatus(other.to_string())),
        }
    }
}

/// Task lifecycle status
///
/// Transitions only move forward: `pending -> in_progress -> {completed, failed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting for its owner to pick it up
    Pending,
    /// Claimed by its owner
    InProgress,
    /// Finished successfully
    Completed,
    /// Finished with an error
    Failed,
}

impl TaskStatus {
    /// Convert the status to its stored representation
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }

    /// Whether no further transition is allowed
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    /// The only status a task may be in right before entering `self`
    ///
    /// `None` for `Pending`, which is only ever the initial status.
    pub fn required_predecessor(&self) -> Option<TaskStatus> {
        match self {
            TaskStatus::Pending => None,
            TaskStatus::InProgress => Some(TaskStatus::Pending),
            TaskStatus::Completed | TaskStatus::Failed => Some(TaskStatus::InProgress),
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = SubstrateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "in_progress" => Ok(TaskStatus::InProgress),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            other => Err(SubstrateError::InvalidStatus(other.to_string())),
        }
    }
}

/// Identity an agent registers under
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentIdentity {
    /// Stable agent id
    pub id: AgentId,
    /// Agent type, e.g. "alert" or "reporting"
    pub agent_type: String,
}

impl AgentIdentity {
    /// Create an identity, generating `"{agent_type}_{uuid}"` when no id is given
    pub fn new(agent_type: impl Into<String>, agent_id: Option<AgentId>) -> Self {
        let agent_type = agent_type.into();
        let id = agent_id.unwrap_or_else(|| format!("{}_{}", agent_type, Uuid::new_v4()));
        Self { id, agent_type }
    }
}

/// Registry row
#[derive(Debug, Clone, FromRow)]
pub(crate) struct AgentRow {
    pub agent_id: String,
    pub agent_type: String,
    pub status: String,
    pub last_active: i64,
}

/// Current registry entry for an agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRecord {
    /// Agent id (primary key)
    pub id: AgentId,
    /// Agent type
    pub agent_type: String,
    /// Last published status
    pub status: AgentStatus,
    /// Last registration or status change (Unix ms)
    pub last_active: i64,
}

impl AgentRecord {
    /// Get last_active as DateTime
    pub fn last_active_datetime(&self) -> DateTime<Utc> {
        millis_to_datetime(self.last_active)
    }
}

impl TryFrom<AgentRow> for AgentRecord {
    type Error = SubstrateError;

    fn try_from(row: AgentRow) -> Result<Self, Self::Error> {
        Ok(Self {
            status: row.status.parse()?,
            id: row.agent_id,
            agent_type: row.agent_type,
            last_active: row.last_active,
        })
    }
}

/// Mailbox row
#[derive(Debug, Clone, FromRow)]
pub(crate) struct MessageRow {
    pub id: i64,
    pub sender_id: String,
    pub recipient_id: String,
    pub message_type: String,
    pub content: String,
    pub created_at: i64,
    pub is_read: bool,
}

/// A point-to-point message between agents
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Auto-increment id, also the tie-breaker for equal timestamps
    pub id: i64,
    /// Sending agent
    pub sender_id: AgentId,
    /// Receiving agent
    pub recipient_id: AgentId,
    /// Handler key
    pub message_type: String,
    /// Opaque payload; the raw stored text when it is not JSON
    pub payload: Value,
    /// Why the stored payload could not be decoded, if it could not
    pub payload_error: Option<String>,
    /// When the message was sent (Unix ms)
    pub created_at: i64,
    /// Whether the recipient has received it
    pub read: bool,
}

impl Message {
    /// Get created_at as DateTime
    pub fn created_at_datetime(&self) -> DateTime<Utc> {
        millis_to_datetime(self.created_at)
    }
}

impl From<MessageRow> for Message {
    fn from(row: MessageRow) -> Self {
        let (payload, payload_error) = decode_payload(row.content);
        Self {
            payload,
            payload_error,
            id: row.id,
            sender_id: row.sender_id,
            recipient_id: row.recipient_id,
            message_type: row.message_type,
            created_at: row.created_at,
            read: row.is_read,
        }
    }
}

/// Task queue row
#[derive(Debug, Clone, FromRow)]
pub(crate) struct TaskRow {
    pub id: i64,
    pub task_id: String,
    pub agent_id: String,
    pub status: String,
    pub priority: i64,
    pub task_data: String,
    pub result: Option<String>,
    pub created_at: i64,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
}

/// A unit of work owned by one agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Internal auto-increment id
    pub row_id: i64,
    /// Public id, safe to log and reference across systems
    pub task_id: String,
    /// Agent that owns (and will execute) the task
    pub owner_agent_id: AgentId,
    /// Lifecycle status
    pub status: TaskStatus,
    /// Higher is more urgent
    pub priority: i64,
    /// Opaque payload; its `type` field selects the handler. Holds the raw
    /// stored text when it is not JSON
    pub payload: Value,
    /// Why the stored payload could not be decoded, if it could not
    pub payload_error: Option<String>,
    /// Created (Unix ms)
    pub created_at: i64,
    /// Set once on entry to `in_progress`
    pub started_at: Option<i64>,
    /// Set once on entry to a terminal status
    pub completed_at: Option<i64>,
    /// Set only on terminal transitions; raw text when it is not JSON
    pub result: Option<Value>,
}

impl Task {
    /// The `type` field of the payload, used for handler dispatch
    pub fn task_type(&self) -> Option<&str> {
        self.payload.get("type").and_then(Value::as_str)
    }

    /// Generate a new public task id
    pub fn generate_id() -> String {
        format!("task_{}", Uuid::new_v4())
    }
}

impl TryFrom<TaskRow> for Task {
    type Error = SubstrateError;

    fn try_from(row: TaskRow) -> Result<Self, Self::Error> {
        let result = row.result.map(|raw| decode_payload(raw).0);
        let (payload, payload_error) = decode_payload(row.task_data);
        Ok(Self {
            status: row.status.parse()?,
            payload,
            payload_error,
            row_id: row.id,
            task_id: row.task_id,
            owner_agent_id: row.agent_id,
            priority: row.priority,
            created_at: row.created_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
            result,
        })
    }
}

/// Number of tasks per status for one owner
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskCounts {
    /// Waiting
    pub pending: i64,
    /// Claimed
    pub in_progress: i64,
    /// Finished successfully
    pub completed: i64,
    /// Finished with an error
    pub failed: i64,
}
