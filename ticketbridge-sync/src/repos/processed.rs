use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::PgConnection;

use crate::models::{NewProcessedEvent, Outcome, ProcessedEvent};
use crate::schema::processed_event;

/// Result of the idempotency admission for one fingerprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Claim {
    /// This caller owns the fingerprint and must drive it to a terminal
    /// outcome (fresh insert, or re-claim after a failure).
    Fresh,
    /// Another worker holds the fingerprint right now.
    DuplicateInFlight,
    /// The fingerprint already reached `ok` or `skipped`.
    AlreadyProcessed(Outcome),
}

/// Insert-or-read-existing. The uniqueness constraint on `fingerprint` is
/// the single serialization point for duplicate detection: under concurrent
/// equal fingerprints exactly one caller sees `Fresh`.
pub fn try_claim(
    conn: &mut PgConnection,
    fingerprint: &str,
    now: DateTime<Utc>,
) -> QueryResult<Claim> {
    let inserted = diesel::insert_into(processed_event::table)
        .values(&NewProcessedEvent {
            fingerprint: fingerprint.to_string(),
            first_seen_at: now,
            outcome: Outcome::InProgress.as_str().to_string(),
            attempts: 0,
        })
        .on_conflict_do_nothing()
        .execute(conn)?;
    if inserted == 1 {
        return Ok(Claim::Fresh);
    }

    let existing: ProcessedEvent = processed_event::table.find(fingerprint).first(conn)?;
    match Outcome::parse(&existing.outcome) {
        Some(Outcome::InProgress) => Ok(Claim::DuplicateInFlight),
        Some(Outcome::Ok) => Ok(Claim::AlreadyProcessed(Outcome::Ok)),
        Some(Outcome::Skipped) => Ok(Claim::AlreadyProcessed(Outcome::Skipped)),
        // A failed event is retryable; the guarded update below is the
        // tie-break when several replayers race for the same row.
        Some(Outcome::Failed) | None => {
            let reclaimed = diesel::update(
                processed_event::table
                    .find(fingerprint)
                    .filter(processed_event::outcome.eq(Outcome::Failed.as_str())),
            )
            .set((
                processed_event::outcome.eq(Outcome::InProgress.as_str()),
                processed_event::attempts.eq(processed_event::attempts + 1),
            ))
            .execute(conn)?;
            if reclaimed == 1 {
                Ok(Claim::Fresh)
            } else {
                Ok(Claim::DuplicateInFlight)
            }
        }
    }
}

pub fn set_outcome(
    conn: &mut PgConnection,
    fingerprint: &str,
    outcome: Outcome,
) -> QueryResult<usize> {
    diesel::update(processed_event::table.find(fingerprint))
        .set(processed_event::outcome.eq(outcome.as_str()))
        .execute(conn)
}

/// Drop ledger rows older than the retention window. Returns the number of
/// pruned rows.
pub fn prune_older_than(conn: &mut PgConnection, cutoff: DateTime<Utc>) -> QueryResult<usize> {
    diesel::delete(processed_event::table.filter(processed_event::first_seen_at.lt(cutoff)))
        .execute(conn)
}
