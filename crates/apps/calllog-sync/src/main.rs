//! calllog-sync - Keeps a local SQLite copy of the PBX call log
//!
//! Runs the optional historical backfill, then polls the reporting API
//! until interrupted with Ctrl-C.

use anyhow::{Context, Result};
use calllog::{
    PageSource, PageWalker, PbxAuthenticator, PbxClient, SchedulerOptions, Settings,
    SqliteRecordStore, SyncScheduler, TokenCache, cancel_pair, http_agent,
};
use chrono::Utc;
use log::{error, info, warn};
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    // Bootstrap config and data directories
    if let Err(e) = config::init() {
        warn!("Failed to initialize config directory: {}", e);
    }

    let settings = Settings::load().context("Failed to load settings")?;
    settings.validate().context("Invalid settings")?;

    let db_path = settings.database_path()?;
    let store = SqliteRecordStore::open(&db_path)
        .with_context(|| format!("Failed to open database at {}", db_path.display()))?;
    info!("Storing call logs in {}", db_path.display());

    let api = &settings.api;
    let agent = http_agent(api.request_timeout());
    let tokens = Arc::new(TokenCache::new(PbxAuthenticator::new(api, agent.clone())));
    let client: Arc<dyn PageSource> = Arc::new(PbxClient::new(api, agent, tokens));

    let mut scheduler = SyncScheduler::new(
        PageWalker::new(client),
        Arc::new(store),
        SchedulerOptions::from_settings(api, Utc::now()),
    );

    let (handle, token) = cancel_pair();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Shutdown requested");
                handle.cancel();
            }
            Err(e) => error!("Failed to listen for Ctrl-C: {}", e),
        }
    });

    info!("Starting call log sync against {}", api.base_url);
    scheduler.run(&token).await;
    Ok(())
}
