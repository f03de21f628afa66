//! Store connection and schema bootstrap
//!
//! Wraps the SQLite pool every registry, mailbox and task queue handle shares.

use crate::config::StoreConfig;
use crate::error::{Result, SubstrateError};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Database connection pool shared by all substrate components
#[derive(Debug, Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Connect to the store and make sure the coordination tables exist
    ///
    /// # Arguments
    /// * `database_url` - Path to the SQLite file, with or without a `sqlite:` prefix
    /// * `max_connections` - Pool size
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let connection_string = if database_url.starts_with("sqlite:") {
            database_url.to_string()
        } else {
            // Ensure parent directory exists
            if let Some(parent) = PathBuf::from(database_url).parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent).map_err(|e| {
                        SubstrateError::Internal(anyhow::anyhow!(
                            "Failed to create db directory: {}",
                            e
                        ))
                    })?;
                }
            }
            format!("sqlite:{}", database_url)
        };

        let options = SqliteConnectOptions::from_str(&connection_string)
            .map_err(|e| SubstrateError::store("parse the database url", e))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(BUSY_TIMEOUT);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(options)
            .await
            .map_err(|e| SubstrateError::store("connect to the database", e))?;

        info!(database_url = %database_url, "Connected to agent store");

        let store = Self { pool };
        store.run_migrations().await?;

        Ok(store)
    }

    /// Connect using a [`StoreConfig`]
    pub async fn from_config(config: &StoreConfig) -> Result<Self> {
        Self::connect(&config.database_url, config.max_connections).await
    }

    /// Create the registry, mailbox and task tables if they are missing
    pub async fn run_migrations(&self) -> Result<()> {
        debug!("Running agent store migrations");

        let migration_sql = include_str!("../../migrations/001_create_agent_tables.sql");

        for statement in split_statements(migration_sql) {
            sqlx::query(&statement)
                .execute(&self.pool)
                .await
                .map_err(|e| SubstrateError::store("apply the schema migration", e))?;
        }

        info!("Agent store schema is up to date");
        Ok(())
    }

    /// Get the database pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close every pooled connection
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// Strip `--` comments and split a migration script into single statements
fn split_statements(sql: &str) -> Vec<String> {
    let mut cleaned = String::new();
    for line in sql.lines() {
        let code = match line.find("--") {
            Some(pos) => &line[..pos],
            None => line,
        };
        let code = code.trim();
        if code.is_empty() {
            continue;
        }
        cleaned.push_str(code);
        cleaned.push(' ');
    }

    cleaned
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
