use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::Serialize;
use uuid::Uuid;

use crate::schema::{comment_mapping, deadletter, mapping, processed_event};

/// Direction of the most recent successful write on a mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncDirection {
    SrcToTgt,
    TgtToSrc,
    None,
}

impl SyncDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SrcToTgt => "src_to_tgt",
            Self::TgtToSrc => "tgt_to_src",
            Self::None => "none",
        }
    }
}

/// Terminal (and in-flight) states of a processed event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    InProgress,
    Ok,
    Skipped,
    Failed,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InProgress => "in_progress",
            Self::Ok => "ok",
            Self::Skipped => "skipped",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "in_progress" => Some(Self::InProgress),
            "ok" => Some(Self::Ok),
            "skipped" => Some(Self::Skipped),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::InProgress)
    }
}

// --- Mapping ---

#[derive(Debug, Queryable, Identifiable, Serialize, Clone)]
#[diesel(table_name = mapping, primary_key(src_repo, src_number))]
pub struct Mapping {
    pub src_repo: String,
    pub src_number: i64,
    pub page_id: String,
    pub last_src_hash: Option<String>,
    pub last_tgt_hash: Option<String>,
    pub last_sync_direction: String,
    pub orphaned: bool,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub version: i64,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = mapping)]
pub struct NewMapping {
    pub src_repo: String,
    pub src_number: i64,
    pub page_id: String,
    pub last_src_hash: Option<String>,
    pub last_tgt_hash: Option<String>,
    pub last_sync_direction: String,
    pub orphaned: bool,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub version: i64,
}

// --- ProcessedEvent ---

#[derive(Debug, Queryable, Identifiable, Serialize, Clone)]
#[diesel(table_name = processed_event, primary_key(fingerprint))]
pub struct ProcessedEvent {
    pub fingerprint: String,
    pub first_seen_at: DateTime<Utc>,
    pub outcome: String,
    pub attempts: i32,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = processed_event)]
pub struct NewProcessedEvent {
    pub fingerprint: String,
    pub first_seen_at: DateTime<Utc>,
    pub outcome: String,
    pub attempts: i32,
}

// --- DeadLetter ---

#[derive(Debug, Queryable, Identifiable, Serialize, Clone)]
#[diesel(table_name = deadletter)]
pub struct DeadLetter {
    pub id: Uuid,
    pub fingerprint: String,
    pub provider: String,
    pub event_kind: String,
    #[serde(skip_serializing)]
    pub raw_payload: Vec<u8>,
    pub failure_reason: String,
    pub attempts: i32,
    pub archived: bool,
    pub next_attempt_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = deadletter)]
pub struct NewDeadLetter {
    pub id: Uuid,
    pub fingerprint: String,
    pub provider: String,
    pub event_kind: String,
    pub raw_payload: Vec<u8>,
    pub failure_reason: String,
    pub attempts: i32,
    pub archived: bool,
    pub next_attempt_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

// --- CommentMapping ---

#[derive(Debug, Queryable, Identifiable, Serialize, Clone)]
#[diesel(table_name = comment_mapping, primary_key(side, remote_id))]
pub struct CommentMapping {
    pub side: String,
    pub remote_id: String,
    pub other_side: String,
    pub other_remote_id: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = comment_mapping)]
pub struct NewCommentMapping {
    pub side: String,
    pub remote_id: String,
    pub other_side: String,
    pub other_remote_id: String,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_round_trips_through_storage_form() {
        for outcome in [Outcome::InProgress, Outcome::Ok, Outcome::Skipped, Outcome::Failed] {
            assert_eq!(Outcome::parse(outcome.as_str()), Some(outcome));
        }
        assert_eq!(Outcome::parse("bogus"), None);
    }

    #[test]
    fn only_in_progress_is_non_terminal() {
        assert!(!Outcome::InProgress.is_terminal());
        assert!(Outcome::Ok.is_terminal());
        assert!(Outcome::Skipped.is_terminal());
        assert!(Outcome::Failed.is_terminal());
    }
}
