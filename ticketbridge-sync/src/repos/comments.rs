use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::PgConnection;

use crate::models::{CommentMapping, NewCommentMapping};
use crate::records::Provider;
use crate::schema::comment_mapping;

pub fn find(
    conn: &mut PgConnection,
    side: Provider,
    remote_id: &str,
) -> QueryResult<Option<CommentMapping>> {
    comment_mapping::table
        .find((side.as_str(), remote_id))
        .first(conn)
        .optional()
}

/// Store the coupling in both directions so either side's echo is a single
/// primary-key lookup.
pub fn insert_pair(
    conn: &mut PgConnection,
    side: Provider,
    remote_id: &str,
    other_remote_id: &str,
    now: DateTime<Utc>,
) -> QueryResult<usize> {
    let rows = vec![
        NewCommentMapping {
            side: side.as_str().to_string(),
            remote_id: remote_id.to_string(),
            other_side: side.other().as_str().to_string(),
            other_remote_id: other_remote_id.to_string(),
            created_at: now,
        },
        NewCommentMapping {
            side: side.other().as_str().to_string(),
            remote_id: other_remote_id.to_string(),
            other_side: side.as_str().to_string(),
            other_remote_id: remote_id.to_string(),
            created_at: now,
        },
    ];
    diesel::insert_into(comment_mapping::table)
        .values(&rows)
        .on_conflict_do_nothing()
        .execute(conn)
}
