//! Task queue
//!
//! Prioritized, persisted units of work, each owned by one agent. A task only
//! ever moves forward through `pending -> in_progress -> {completed, failed}`.
//! Every transition is a compare-and-swap on the current status, so a
//! request that would move a task backwards, skip a step, or leave a terminal
//! status is rejected and the row stays as it was.

use crate::error::{Result, SubstrateError};
use crate::models::{Task, TaskCounts, TaskRow, TaskStatus, STORE_NOW_MILLIS};
use crate::store::Store;
use serde_json::Value;
use sqlx::SqlitePool;
use tracing::{debug, info, warn};

const TASK_COLUMNS: &str = "id, task_id, agent_id, status, priority, task_data, result, \
                            created_at, started_at, completed_at";

/// Persisted, priority-ordered work queue
#[derive(Debug, Clone)]
pub struct TaskQueue {
    pool: SqlitePool,
}

impl TaskQueue {
    /// Create a task queue handle on the shared store
    pub fn new(store: &Store) -> Self {
        Self {
            pool: store.pool().clone(),
        }
    }

    /// Create a `pending` task for `owner_agent_id` and return its public id
    ///
    /// Use [`crate::models::DEFAULT_TASK_PRIORITY`] when the caller has no
    /// preference; higher values are more urgent.
    pub async fn create(&self, owner_agent_id: &str, payload: &Value, priority: i64) -> Result<String> {
        let task_id = Task::generate_id();
        let task_data = serde_json::to_string(payload)?;

        sqlx::query(&format!(
            "INSERT INTO agent_tasks (task_id, agent_id, status, priority, task_data, created_at) \
             VALUES (?, ?, ?, ?, ?, {STORE_NOW_MILLIS})"
        ))
        .bind(&task_id)
        .bind(owner_agent_id)
        .bind(TaskStatus::Pending.as_str())
        .bind(priority)
        .bind(&task_data)
        .execute(&self.pool)
        .await
        .map_err(|e| SubstrateError::store("create task", e))?;

        info!(
            task_id = %task_id,
            owner = %owner_agent_id,
            priority = priority,
            "Task created"
        );
        Ok(task_id)
    }

    /// Pending tasks for `owner_agent_id`, most urgent first, oldest first
    /// within a priority
    ///
    /// A task whose stored payload is not JSON is still returned, with its
    /// raw text and `payload_error` set, so it can be claimed and failed.
    pub async fn fetch_pending(&self, owner_agent_id: &str) -> Result<Vec<Task>> {
        let rows = sqlx::query_as::<_, TaskRow>(&format!(
            "SELECT {TASK_COLUMNS} FROM agent_tasks WHERE agent_id = ? AND status = ? \
             ORDER BY priority DESC, created_at ASC, id ASC"
        ))
        .bind(owner_agent_id)
        .bind(TaskStatus::Pending.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| SubstrateError::store("fetch pending tasks", e))?;

        rows.into_iter().map(Task::try_from).collect()
    }

    /// Move a task to `status`
    ///
    /// Entering `in_progress` stamps `started_at`. Entering `completed` or
    /// `failed` stamps `completed_at` and stores `result`. `result` is
    /// ignored for non-terminal statuses.
    pub async fn update_status(
        &self,
        task_id: &str,
        status: TaskStatus,
        result: Option<&Value>,
    ) -> Result<()> {
        let Some(predecessor) = status.required_predecessor() else {
            return Err(self.rejection(task_id, status).await);
        };

        let executed = if status.is_terminal() {
            let result = result.map(serde_json::to_string).transpose()?;
            sqlx::query(&format!(
                "UPDATE agent_tasks SET status = ?, completed_at = {STORE_NOW_MILLIS}, result = ? \
                 WHERE task_id = ? AND status = ?"
            ))
            .bind(status.as_str())
            .bind(result)
            .bind(task_id)
            .bind(predecessor.as_str())
            .execute(&self.pool)
            .await
        } else {
            if result.is_some() {
                debug!(task_id = %task_id, status = %status, "Ignoring result on non-terminal transition");
            }
            sqlx::query(&format!(
                "UPDATE agent_tasks SET status = ?, started_at = {STORE_NOW_MILLIS} \
                 WHERE task_id = ? AND status = ?"
            ))
            .bind(status.as_str())
            .bind(task_id)
            .bind(predecessor.as_str())
            .execute(&self.pool)
            .await
        };
        let outcome = executed.map_err(|e| SubstrateError::store("update task status", e))?;

        if outcome.rows_affected() == 0 {
            return Err(self.rejection(task_id, status).await);
        }

        info!(task_id = %task_id, status = %status, "Task status updated");
        Ok(())
    }

    /// Get a task by its public id
    pub async fn get(&self, task_id: &str) -> Result<Option<Task>> {
        let row = sqlx::query_as::<_, TaskRow>(&format!(
            "SELECT {TASK_COLUMNS} FROM agent_tasks WHERE task_id = ?"
        ))
        .bind(task_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| SubstrateError::store("fetch task", e))?;

        row.map(Task::try_from).transpose()
    }

    /// Count `owner_agent_id`'s tasks per status
    pub async fn status_counts(&self, owner_agent_id: &str) -> Result<TaskCounts> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT status, COUNT(*) FROM agent_tasks WHERE agent_id = ? GROUP BY status",
        )
        .bind(owner_agent_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| SubstrateError::store("count tasks", e))?;

        let mut counts = TaskCounts::default();
        for (status, count) in rows {
            match status.parse::<TaskStatus>()? {
                TaskStatus::Pending => counts.pending = count,
                TaskStatus::InProgress => counts.in_progress = count,
                TaskStatus::Completed => counts.completed = count,
                TaskStatus::Failed => counts.failed = count,
            }
        }
        Ok(counts)
    }

    /// Build the error for a transition the current row does not allow
    async fn rejection(&self, task_id: &str, to: TaskStatus) -> SubstrateError {
        let current: std::result::Result<Option<(String,)>, sqlx::Error> =
            sqlx::query_as("SELECT status FROM agent_tasks WHERE task_id = ?")
                .bind(task_id)
                .fetch_optional(&self.pool)
                .await;

        match current {
            Ok(None) => SubstrateError::TaskNotFound(task_id.to_string()),
            Ok(Some((from,))) => match from.parse::<TaskStatus>() {
                Ok(from) => {
                    warn!(task_id = %task_id, from = %from, to = %to, "Rejected task transition");
                    SubstrateError::InvalidTransition {
                        task_id: task_id.to_string(),
                        from,
                        to,
                    }
                }
                Err(e) => e,
            },
            Err(e) => SubstrateError::store("read task status", e),
        }
    }
}
