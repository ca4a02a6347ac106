//! anisync - catalog sync daemon
//!
//! Replays the packet journal, then drives the protocol engine on the send
//! cadence until Ctrl+C. The catalog is flushed to disk periodically and on
//! exit.

use anisync_client::{Config, SyncClient};
use anisync_core::PacketStore;
use anisync_storage::{JournalPacketStore, JsonCatalogStore};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Load configuration (from file if ANISYNC_CONFIG is set, then env overrides)
    let config_path = std::env::var("ANISYNC_CONFIG").ok();
    let mut config = match Config::load() {
        Ok(c) => {
            if let Some(path) = &config_path {
                tracing::info!("Loaded config from {}", path);
            }
            c
        }
        Err(e) => {
            // If a config file was explicitly specified, fail on error
            if config_path.is_some() {
                tracing::error!("Failed to load config: {}", e);
                return Err(e.into());
            }
            tracing::info!("Using default configuration");
            Config::from_env()
        }
    };

    if let Err(e) = config.load_secrets() {
        tracing::error!("Failed to load auth secrets: {}", e);
        return Err(e.into());
    }
    if let Err(e) = config.validate() {
        tracing::error!("Configuration error: {}", e);
        return Err(e.into());
    }

    tracing::info!("Starting anisync");
    tracing::info!("  Server: {}", config.server.addr());
    tracing::info!("  Data directory: {}", config.storage.data_dir.display());
    match &config.auth.user {
        Some(user) => tracing::info!("  Account: {}", user),
        None => tracing::info!("  Account: none (session commands will wait)"),
    }

    std::fs::create_dir_all(&config.storage.data_dir)?;

    // Packet journal
    let mut journal =
        JournalPacketStore::open(config.storage.journal_path(), config.storage.sync_on_write)?;
    if config.storage.compact_on_start {
        let result = journal.compact()?;
        tracing::info!(
            "  Journal compacted: {} packets dropped, {} bytes reclaimed",
            result.packets_dropped,
            result.bytes_reclaimed()
        );
    }
    tracing::info!(
        "  Journal: {} ({} packets, {} awaiting a reply, next tag {})",
        journal.path().display(),
        journal.len(),
        journal.pending_len(),
        journal.memory().next_tag()
    );

    // Catalog
    let catalog = Arc::new(JsonCatalogStore::open(config.storage.catalog_dir())?);
    tracing::info!(
        "  Catalog: {} ({} records)",
        catalog.dir().display(),
        catalog.len()
    );

    let mut client = SyncClient::connect(&config.connection(), journal, catalog.clone()).await?;

    // Spawn periodic catalog flush
    let flush_handle = {
        let catalog = catalog.clone();
        let period = config.storage.flush_interval();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                match catalog.flush() {
                    Ok(0) => {}
                    Ok(n) => tracing::debug!("Catalog flushed ({} records)", n),
                    Err(e) => tracing::error!("Catalog flush failed: {}", e),
                }
            }
        })
    };

    // Spawn shutdown signal handler
    let shutdown = client.shutdown_handle();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        tracing::info!("Received shutdown signal, stopping...");
        shutdown.shutdown();
    });

    // Run sync loop (blocks until shutdown or ban)
    let result = client.run().await;

    flush_handle.abort();
    if let Err(e) = catalog.flush() {
        tracing::error!("Failed to flush catalog on shutdown: {}", e);
    }
    if let Err(e) = client.engine_mut().packet_store_mut().sync() {
        tracing::error!("Failed to sync journal on shutdown: {}", e);
    }

    result?;
    tracing::info!("Stopped");
    Ok(())
}
