//! Background maintenance: the dead-letter replay sweep and the processed-
//! event ledger pruning. Both honor the shutdown signal by finishing the
//! current batch and not starting another.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::repos;
use crate::services::replay;
use crate::AppState;

const PRUNE_INTERVAL: Duration = Duration::from_secs(3600);

pub fn spawn_replay_task(
    state: Arc<AppState>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    let period = Duration::from_secs(state.config.replay_interval_minutes * 60);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = replay::replay_due(&state).await {
                        tracing::error!(error = %e, "replay sweep failed");
                    }
                }
                _ = shutdown.changed() => {
                    tracing::info!("replay task stopping");
                    break;
                }
            }
        }
    })
}

pub fn spawn_prune_task(
    state: Arc<AppState>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(PRUNE_INTERVAL);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    prune_processed_events(&state);
                }
                _ = shutdown.changed() => {
                    tracing::info!("prune task stopping");
                    break;
                }
            }
        }
    })
}

fn prune_processed_events(state: &AppState) {
    let cutoff = Utc::now()
        - chrono::Duration::days(state.config.processed_event_retention_days);
    let mut conn = match state.db.get() {
        Ok(conn) => conn,
        Err(e) => {
            tracing::error!(error = %e, "prune: failed to get db connection");
            return;
        }
    };
    match repos::processed::prune_older_than(&mut conn, cutoff) {
        Ok(0) => {}
        Ok(pruned) => {
            tracing::info!(pruned = pruned, "pruned processed-event ledger");
        }
        Err(e) => {
            tracing::error!(error = %e, "prune: delete failed");
        }
    }
}
