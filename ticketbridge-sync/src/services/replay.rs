//! Dead-letter replay: failed events re-enter the pipeline at the
//! idempotency guard. Signature verification is not repeated; entries were
//! authenticated on first admission.

use std::time::Duration;

use chrono::Utc;
use diesel::Connection;
use serde::Serialize;
use ticketbridge_shared::{AppError, AppResult};

use crate::metrics;
use crate::models::{DeadLetter, Outcome};
use crate::records::{InboundEvent, Provider};
use crate::repos;
use crate::repos::processed::Claim;
use crate::services::orchestrator;
use crate::AppState;

/// First wait after an event is dead-lettered, and the base of the doubling
/// replay schedule.
pub const REPLAY_BACKOFF_BASE: Duration = Duration::from_millis(250);

/// Ceiling on the replay backoff.
pub const REPLAY_BACKOFF_CAP: Duration = Duration::from_secs(3600);

#[derive(Debug, Default, Clone, Copy, Serialize)]
pub struct ReplaySummary {
    pub attempted: usize,
    pub succeeded: usize,
}

/// Backoff before the next replay of an entry that has failed `attempts`
/// times: doubles per failure, capped at one hour.
pub fn replay_backoff(attempts: i32) -> Duration {
    let shift = attempts.clamp(0, 24) as u32;
    let delay = REPLAY_BACKOFF_BASE.saturating_mul(1u32 << shift.min(24));
    delay.min(REPLAY_BACKOFF_CAP)
}

/// One replay sweep: due entries in arrival order, up to the configured
/// batch size.
pub async fn replay_due(state: &AppState) -> AppResult<ReplaySummary> {
    let due = {
        let mut conn = db_conn(state)?;
        repos::deadletter::due(&mut conn, Utc::now(), state.config.replay_batch_size)?
    };

    let mut summary = ReplaySummary::default();
    for entry in due {
        summary.attempted += 1;
        match replay_entry(state, &entry).await {
            Ok(true) => summary.succeeded += 1,
            Ok(false) => {}
            Err(err) => {
                tracing::error!(
                    deadletter_id = %entry.id,
                    error = %err,
                    "replay bookkeeping failed"
                );
            }
        }
    }

    refresh_deadletter_gauges(state)?;
    tracing::info!(
        attempted = summary.attempted,
        succeeded = summary.succeeded,
        "dead-letter replay sweep finished"
    );
    Ok(summary)
}

/// Replay one entry. `Ok(true)` means the entry was resolved and deleted.
async fn replay_entry(state: &AppState, entry: &DeadLetter) -> AppResult<bool> {
    let provider = Provider::parse(&entry.provider)
        .ok_or_else(|| AppError::internal(format!("unknown provider {}", entry.provider)))?;
    let event = InboundEvent::from_payload(
        provider,
        entry.event_kind.clone(),
        None,
        entry.raw_payload.clone(),
        Utc::now(),
    )
    .map_err(|e| AppError::invalid_payload(format!("stored payload: {e}")))?;

    // Re-enter at the idempotency guard with the original fingerprint.
    let claim = {
        let mut conn = db_conn(state)?;
        conn.transaction(|conn| repos::processed::try_claim(conn, &entry.fingerprint, Utc::now()))?
    };
    match claim {
        Claim::DuplicateInFlight => Ok(false),
        Claim::AlreadyProcessed(_) => {
            // Resolved by another path; the entry is stale.
            let mut conn = db_conn(state)?;
            repos::deadletter::delete(&mut conn, entry.id)?;
            Ok(true)
        }
        Claim::Fresh => {
            let deadline = Duration::from_secs(state.config.sync_deadline_secs);
            let run = tokio::time::timeout(
                deadline,
                orchestrator::process_event(state, &event, &entry.fingerprint),
            )
            .await;

            match run {
                Ok(Ok(_outcome)) => {
                    let mut conn = db_conn(state)?;
                    repos::deadletter::delete(&mut conn, entry.id)?;
                    Ok(true)
                }
                Ok(Err(err)) => {
                    record_replay_failure(state, entry, &err.to_string())?;
                    Ok(false)
                }
                Err(_elapsed) => {
                    record_replay_failure(state, entry, "sync deadline exceeded")?;
                    Ok(false)
                }
            }
        }
    }
}

fn record_replay_failure(state: &AppState, entry: &DeadLetter, reason: &str) -> AppResult<()> {
    let attempts_after = entry.attempts + 1;
    let archived = attempts_after >= state.config.replay_max_attempts;
    let next_attempt_at = Utc::now()
        + chrono::Duration::from_std(replay_backoff(attempts_after))
            .unwrap_or_else(|_| chrono::Duration::seconds(3600));

    let mut conn = db_conn(state)?;
    conn.transaction(|conn| {
        repos::processed::set_outcome(conn, &entry.fingerprint, Outcome::Failed)?;
        repos::deadletter::record_failure(conn, entry.id, reason, next_attempt_at, archived)
    })?;

    if archived {
        tracing::error!(
            deadletter_id = %entry.id,
            fingerprint = %entry.fingerprint,
            attempts = attempts_after,
            "dead-letter entry archived after exhausting replay attempts"
        );
    }
    Ok(())
}

/// Recompute the two dead-letter gauges from the table.
pub fn refresh_deadletter_gauges(state: &AppState) -> AppResult<()> {
    let mut conn = db_conn(state)?;
    let total = repos::deadletter::count_unarchived(&mut conn)?;
    let by_provider = repos::deadletter::counts_by_provider(&mut conn)?;
    metrics::set_deadletter_gauges(total, &by_provider);
    Ok(())
}

fn db_conn(
    state: &AppState,
) -> AppResult<diesel::r2d2::PooledConnection<diesel::r2d2::ConnectionManager<diesel::PgConnection>>>
{
    state
        .db
        .get()
        .map_err(|e| AppError::internal(format!("db pool error: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_per_attempt() {
        assert_eq!(replay_backoff(0), Duration::from_millis(250));
        assert_eq!(replay_backoff(1), Duration::from_millis(500));
        assert_eq!(replay_backoff(4), Duration::from_secs(4));
        assert_eq!(replay_backoff(10), Duration::from_secs(256));
    }

    #[test]
    fn backoff_caps_at_one_hour() {
        assert_eq!(replay_backoff(14), Duration::from_secs(3600));
        assert_eq!(replay_backoff(24), Duration::from_secs(3600));
        assert_eq!(replay_backoff(1000), Duration::from_secs(3600));
    }
}
