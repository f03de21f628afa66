//! Agent registry
//!
//! One row per agent holding its type, current status and last activity.
//! Registration is an upsert, so it is safe to call on every restart.

use crate::error::{Result, SubstrateError};
use crate::models::{AgentRecord, AgentRow, AgentStatus, STORE_NOW_MILLIS};
use crate::store::Store;
use sqlx::SqlitePool;
use tracing::{debug, info};

/// Registry of agent identities and status
#[derive(Debug, Clone)]
pub struct Registry {
    pool: SqlitePool,
}

impl Registry {
    /// Create a registry handle on the shared store
    pub fn new(store: &Store) -> Self {
        Self {
            pool: store.pool().clone(),
        }
    }

    /// Register an agent
    ///
    /// New agents start `inactive`. For an existing agent only `last_active`
    /// is refreshed; its status is left untouched.
    pub async fn register(&self, agent_id: &str, agent_type: &str) -> Result<()> {
        sqlx::query(&format!(
            "INSERT INTO agent_registry (agent_id, agent_type, status, last_active) \
             VALUES (?, ?, ?, {STORE_NOW_MILLIS}) \
             ON CONFLICT (agent_id) DO UPDATE SET last_active = excluded.last_active"
        ))
        .bind(agent_id)
        .bind(agent_type)
        .bind(AgentStatus::Inactive.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| SubstrateError::store("register agent", e))?;

        info!(agent_id = %agent_id, agent_type = %agent_type, "Agent registered");
        Ok(())
    }

    /// Set an agent's status and refresh `last_active`
    ///
    /// Any status may follow any other. Fails with `AgentNotFound` when the
    /// agent was never registered.
    pub async fn update_status(&self, agent_id: &str, status: AgentStatus) -> Result<()> {
        let outcome = sqlx::query(&format!(
            "UPDATE agent_registry SET status = ?, last_active = {STORE_NOW_MILLIS} WHERE agent_id = ?"
        ))
        .bind(status.as_str())
        .bind(agent_id)
        .execute(&self.pool)
        .await
        .map_err(|e| SubstrateError::store("update agent status", e))?;

        if outcome.rows_affected() == 0 {
            return Err(SubstrateError::AgentNotFound(agent_id.to_string()));
        }

        info!(agent_id = %agent_id, status = %status, "Agent status updated");
        Ok(())
    }

    /// Get an agent's registry entry
    pub async fn get(&self, agent_id: &str) -> Result<Option<AgentRecord>> {
        let row = sqlx::query_as::<_, AgentRow>(
            "SELECT agent_id, agent_type, status, last_active FROM agent_registry WHERE agent_id = ?",
        )
        .bind(agent_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| SubstrateError::store("fetch agent", e))?;

        row.map(AgentRecord::try_from).transpose()
    }

    /// List every registered agent, ordered by id
    pub async fn list(&self) -> Result<Vec<AgentRecord>> {
        let rows = sqlx::query_as::<_, AgentRow>(
            "SELECT agent_id, agent_type, status, last_active FROM agent_registry ORDER BY agent_id ASC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| SubstrateError::store("list agents", e))?;

        debug!(count = rows.len(), "Listed registered agents");
        rows.into_iter().map(AgentRecord::try_from).collect()
    }
}
