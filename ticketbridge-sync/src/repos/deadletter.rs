use chrono::{DateTime, Utc};
use diesel::dsl::count_star;
use diesel::prelude::*;
use diesel::PgConnection;
use uuid::Uuid;

use crate::models::{DeadLetter, NewDeadLetter};
use crate::schema::deadletter;

pub fn insert(conn: &mut PgConnection, new: &NewDeadLetter) -> QueryResult<DeadLetter> {
    diesel::insert_into(deadletter::table)
        .values(new)
        .get_result(conn)
}

/// Entries ready for replay, oldest first.
pub fn due(
    conn: &mut PgConnection,
    now: DateTime<Utc>,
    limit: i64,
) -> QueryResult<Vec<DeadLetter>> {
    deadletter::table
        .filter(deadletter::archived.eq(false))
        .filter(deadletter::next_attempt_at.le(now))
        .order(deadletter::created_at.asc())
        .limit(limit)
        .load(conn)
}

pub fn find_unarchived_by_fingerprint(
    conn: &mut PgConnection,
    fingerprint: &str,
) -> QueryResult<Option<DeadLetter>> {
    deadletter::table
        .filter(deadletter::archived.eq(false))
        .filter(deadletter::fingerprint.eq(fingerprint))
        .first(conn)
        .optional()
}

pub fn delete(conn: &mut PgConnection, id: Uuid) -> QueryResult<usize> {
    diesel::delete(deadletter::table.find(id)).execute(conn)
}

/// Record a failed replay attempt: bump the counter, push out the next
/// attempt, archive once the attempt limit is reached.
pub fn record_failure(
    conn: &mut PgConnection,
    id: Uuid,
    failure_reason: &str,
    next_attempt_at: DateTime<Utc>,
    archived: bool,
) -> QueryResult<usize> {
    diesel::update(deadletter::table.find(id))
        .set((
            deadletter::attempts.eq(deadletter::attempts + 1),
            deadletter::failure_reason.eq(failure_reason),
            deadletter::next_attempt_at.eq(next_attempt_at),
            deadletter::archived.eq(archived),
        ))
        .execute(conn)
}

pub fn count_unarchived(conn: &mut PgConnection) -> QueryResult<i64> {
    deadletter::table
        .filter(deadletter::archived.eq(false))
        .select(count_star())
        .get_result(conn)
}

pub fn counts_by_provider(conn: &mut PgConnection) -> QueryResult<Vec<(String, i64)>> {
    deadletter::table
        .filter(deadletter::archived.eq(false))
        .group_by(deadletter::provider)
        .select((deadletter::provider, count_star()))
        .load(conn)
}
