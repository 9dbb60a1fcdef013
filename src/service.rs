//! Process host for the lifecycle bridge: wires the production collaborators
//! together and plays the supervisor role in the foreground.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tracing::{info, warn};

use crate::config::Config;
use crate::db::{ArchiveStore, MessageArchive};
use crate::discord::DiscordConnector;
use crate::error::ArchivistError;
use crate::lifecycle::{LifecycleBridge, LifecycleState, StopOutcome};
use crate::notify::WebhookNotifier;
use crate::router::format_query_reply;
use crate::worker::{ArchiveService, WorkerSettings};

pub fn build_bridge(config: &Config) -> Result<LifecycleBridge, ArchivistError> {
    let store = ArchiveStore::new(&config.data_dir)?;
    info!("Archive database at {}", store.db_path().display());
    let settings = WorkerSettings::from_config(config)?;
    if settings.operators.is_empty() {
        warn!("No operators configured; shutdown and query commands are disabled");
    }
    let service = ArchiveService::new(
        DiscordConnector::new(config.discord_bot_token.clone()),
        Arc::new(store),
        Arc::new(WebhookNotifier::new(config.webhook_url.clone())),
        settings,
    );
    Ok(LifecycleBridge::new(Arc::new(service)))
}

/// Start the bridge and block until the worker exits or Ctrl-C arrives.
pub async fn run_foreground(bridge: Arc<LifecycleBridge>, grace: Duration) -> anyhow::Result<()> {
    bridge.start()?;

    let (stopped_tx, stopped_rx) = oneshot::channel();
    {
        let bridge = bridge.clone();
        // A plain thread: an abandoned worker must not hold up process exit.
        std::thread::Builder::new()
            .name("archivist-waiter".into())
            .spawn(move || {
                bridge.wait_stopped();
                let _ = stopped_tx.send(());
            })?;
    }

    tokio::select! {
        _ = stopped_rx => info!("Worker exited"),
        signal = tokio::signal::ctrl_c() => {
            signal?;
            info!("Ctrl-C received, stopping (grace {}s)", grace.as_secs());
            let bridge = bridge.clone();
            let outcome = tokio::task::spawn_blocking(move || bridge.stop(grace)).await?;
            match outcome {
                StopOutcome::Stopped => info!("Stopped cleanly"),
                StopOutcome::TimedOut => warn!("Exiting with the worker still running"),
                StopOutcome::NotRunning(LifecycleState::Starting) => {
                    warn!("Interrupted while connecting; exiting without a graceful stop")
                }
                StopOutcome::NotRunning(_) => {}
            }
        }
    }
    Ok(())
}

/// Run one ad-hoc statement against the local archive and format it like a chat reply.
pub async fn run_local_query(config: &Config, sql: &str) -> Result<String, ArchivistError> {
    let store = ArchiveStore::new(&config.data_dir)?;
    let result = store.query(sql.trim().to_string()).await;
    Ok(format_query_reply(&result))
}
