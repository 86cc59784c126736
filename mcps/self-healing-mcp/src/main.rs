//! Self-Healing MCP Server binary entry point

use anyhow::Context;
use rmcp::{transport::io::stdio, ServiceExt};
use self_healing_mcp::store::{spawn_retention, RetentionPolicy};
use self_healing_mcp::telemetry::init_tracing;
use self_healing_mcp::{SelfHealingMcpServer, ServerConfig, Services, SqliteStore};
use std::time::Duration;
use tokio::sync::watch;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::load()?;
    init_tracing(&config.logging.level)?;

    tracing::info!("Starting Self-Healing MCP server");

    let db_path = config.database_path();
    tracing::info!("Opening database at: {}", db_path.display());
    let store = SqliteStore::open(&db_path)
        .with_context(|| format!("Failed to open database at {}", db_path.display()))?
        .with_poll_batch(config.storage.poll_batch);

    let services = Services::build(&config, store.clone())?;
    let mut supervisor = services.supervisor(&config);
    supervisor.start();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let retention = spawn_retention(
        store,
        RetentionPolicy::from(&config.storage),
        Duration::from_secs(config.engine.loops.cleanup_interval_secs),
        shutdown_rx,
    );

    let server = SelfHealingMcpServer::new(services);
    let service = server.serve(stdio()).await?;

    tracing::info!("Self-Healing MCP server running");

    service.waiting().await?;

    let _ = shutdown_tx.send(true);
    supervisor.shutdown().await;
    if let Err(e) = retention.await {
        tracing::warn!("Retention task ended abnormally: {}", e);
    }

    tracing::info!("Self-Healing MCP server stopped");

    Ok(())
}
