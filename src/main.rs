//! Agent Substrate inventory
//!
//! Connects to the shared agent store (creating the coordination tables if
//! needed) and logs every registered agent with its status, task counts and
//! unread mail.

use agent_substrate::{Config, Mailbox, Registry, Store, TaskQueue};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Load configuration
    let config = Config::from_env();
    info!("Configuration loaded: {:?}", config);

    let store = Store::from_config(&config.store).await?;
    let registry = Registry::new(&store);
    let mailbox = Mailbox::new(&store);
    let tasks = TaskQueue::new(&store);

    let agents = registry.list().await?;
    if agents.is_empty() {
        warn!("No agents registered");
    }

    for agent in &agents {
        let counts = tasks.status_counts(&agent.id).await?;
        let unread = mailbox.unread_count(&agent.id).await?;
        info!(
            agent_id = %agent.id,
            agent_type = %agent.agent_type,
            status = %agent.status,
            last_active = %agent.last_active_datetime().to_rfc3339(),
            pending = counts.pending,
            in_progress = counts.in_progress,
            completed = counts.completed,
            failed = counts.failed,
            unread_messages = unread,
            "Agent"
        );
    }

    info!(count = agents.len(), "Inventory complete");
    store.close().await;
    Ok(())
}
