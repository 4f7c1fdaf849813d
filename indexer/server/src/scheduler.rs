use crate::app_env::AppEnv;
use indexer::SyncError;
use std::sync::Arc;
use tokio::{
    task::JoinHandle,
    time::{interval, MissedTickBehavior},
};
use tracing::{debug, error, info};

/// Runs a sync immediately and then every `sync_interval`. Failures are
/// logged and the next tick retries from the stored cursor.
pub fn spawn(env: Arc<AppEnv>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(env.sync_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match env.engine.run().await {
                Ok(report) if report.caught_up() => debug!("Nothing to sync"),
                Ok(report) => info!(
                    "Synced blocks {}..={} ({} events, {} skipped, {} gaps)",
                    report.from_block + 1,
                    report.synced_to,
                    report.events_applied,
                    report.logs_skipped,
                    report.consistency_gaps
                ),
                Err(SyncError::AlreadyRunning) => debug!("Sync already running, skipping tick"),
                Err(err) => error!("Scheduled sync failed: {:#}", err),
            }
        }
    })
}
