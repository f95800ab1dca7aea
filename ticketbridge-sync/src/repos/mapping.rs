use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::PgConnection;

use crate::models::{Mapping, NewMapping, SyncDirection};
use crate::schema::mapping;

pub fn find_by_issue(
    conn: &mut PgConnection,
    src_repo: &str,
    src_number: i64,
) -> QueryResult<Option<Mapping>> {
    mapping::table
        .find((src_repo, src_number))
        .first(conn)
        .optional()
}

pub fn find_by_page(conn: &mut PgConnection, page_id: &str) -> QueryResult<Option<Mapping>> {
    mapping::table
        .filter(mapping::page_id.eq(page_id))
        .first(conn)
        .optional()
}

pub fn insert(conn: &mut PgConnection, new: &NewMapping) -> QueryResult<Mapping> {
    diesel::insert_into(mapping::table)
        .values(new)
        .get_result(conn)
}

/// Record a successful SRC→TGT write: stamp the inbound source hash and the
/// hash of the page content the write produced, bump the version. The row
/// update takes the row lock that serializes concurrent events for the same
/// key.
pub fn record_src_write(
    conn: &mut PgConnection,
    src_repo: &str,
    src_number: i64,
    src_hash: &str,
    written_tgt_hash: &str,
    now: DateTime<Utc>,
) -> QueryResult<usize> {
    diesel::update(mapping::table.find((src_repo, src_number)))
        .set((
            mapping::last_src_hash.eq(src_hash),
            mapping::last_tgt_hash.eq(written_tgt_hash),
            mapping::last_sync_direction.eq(SyncDirection::SrcToTgt.as_str()),
            mapping::last_sync_at.eq(now),
            mapping::version.eq(mapping::version + 1),
        ))
        .execute(conn)
}

/// Record a successful TGT→SRC write; mirror of [`record_src_write`].
pub fn record_tgt_write(
    conn: &mut PgConnection,
    src_repo: &str,
    src_number: i64,
    tgt_hash: &str,
    written_src_hash: &str,
    now: DateTime<Utc>,
) -> QueryResult<usize> {
    diesel::update(mapping::table.find((src_repo, src_number)))
        .set((
            mapping::last_tgt_hash.eq(tgt_hash),
            mapping::last_src_hash.eq(written_src_hash),
            mapping::last_sync_direction.eq(SyncDirection::TgtToSrc.as_str()),
            mapping::last_sync_at.eq(now),
            mapping::version.eq(mapping::version + 1),
        ))
        .execute(conn)
}

/// Mark a mapping whose page has vanished on the target side.
pub fn mark_orphaned(conn: &mut PgConnection, src_repo: &str, src_number: i64) -> QueryResult<usize> {
    diesel::update(mapping::table.find((src_repo, src_number)))
        .set(mapping::orphaned.eq(true))
        .execute(conn)
}
