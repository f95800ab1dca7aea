//! Sync orchestration: one admitted event in, at most one outbound write out.
//!
//! Outbound HTTP always happens outside any database transaction; the final
//! transaction only commits the result (mapping write + ledger outcome
//! together, so both land or neither does).

use chrono::Utc;
use diesel::Connection;
use ticketbridge_shared::{AppError, AppResult, ErrorCode};

use crate::clients::policy::ApiError;
use crate::clients::target;
use crate::decode::{self, SrcEvent};
use crate::mapper::{self, MapperWarning};
use crate::metrics;
use crate::models::{NewMapping, Outcome, SyncDirection};
use crate::records::{CommentRecord, InboundEvent, IssueRecord, PageRecord, Provider};
use crate::repos;
use crate::AppState;

/// Terminal result of one admitted event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncOutcome {
    pub outcome: Outcome,
    pub reason: &'static str,
}

impl SyncOutcome {
    fn ok(reason: &'static str) -> Self {
        Self {
            outcome: Outcome::Ok,
            reason,
        }
    }

    fn skipped(reason: &'static str) -> Self {
        Self {
            outcome: Outcome::Skipped,
            reason,
        }
    }
}

/// Run one admitted event through the pipeline. On `Ok` the ledger outcome
/// has been committed (together with any mapping write); on `Err` the caller
/// owns recording the failure and dead-lettering.
pub async fn process_event(
    state: &AppState,
    event: &InboundEvent,
    fingerprint: &str,
) -> AppResult<SyncOutcome> {
    let direction = match event.provider {
        Provider::Src => SyncDirection::SrcToTgt,
        Provider::Tgt => SyncDirection::TgtToSrc,
    };
    let result = match event.provider {
        Provider::Src => sync_src(state, event, fingerprint).await,
        Provider::Tgt => sync_tgt(state, event, fingerprint).await,
    };
    match &result {
        Ok(outcome) => {
            metrics::sync_event(direction.as_str(), outcome.outcome.as_str());
            tracing::info!(
                direction = direction.as_str(),
                fingerprint = fingerprint,
                outcome = outcome.outcome.as_str(),
                reason = outcome.reason,
                "sync completed"
            );
        }
        Err(err) => {
            metrics::sync_event(direction.as_str(), Outcome::Failed.as_str());
            tracing::warn!(
                direction = direction.as_str(),
                fingerprint = fingerprint,
                error = %err,
                "sync failed"
            );
        }
    }
    result
}

type PooledConn = diesel::r2d2::PooledConnection<
    diesel::r2d2::ConnectionManager<diesel::PgConnection>,
>;

fn conn(state: &AppState) -> AppResult<PooledConn> {
    state
        .db
        .get()
        .map_err(|e| AppError::internal(format!("db pool error: {e}")))
}

fn skip(state: &AppState, fingerprint: &str, reason: &'static str) -> AppResult<SyncOutcome> {
    let mut conn = conn(state)?;
    repos::processed::set_outcome(&mut conn, fingerprint, Outcome::Skipped)?;
    Ok(SyncOutcome::skipped(reason))
}

fn record_warnings(state: &AppState, warnings: &[MapperWarning]) {
    for warning in warnings {
        metrics::mapper_warning(warning.kind);
        if warning.kind == "unknown_property" {
            let mut seen = state
                .unknown_properties_seen
                .lock()
                .expect("unknown-property set poisoned");
            if seen.insert(warning.property.clone()) {
                tracing::warn!(
                    property = %warning.property,
                    "page property not in mapping registry; ignoring"
                );
            }
        } else {
            tracing::warn!(
                property = %warning.property,
                kind = warning.kind,
                "field mapper fell back to a default"
            );
        }
    }
}

async fn pace(state: &AppState) {
    let delay = state.registry.sync_options.rate_limit_delay_ms;
    if delay > 0 {
        tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
    }
}

// --- SRC → TGT ---

async fn sync_src(
    state: &AppState,
    event: &InboundEvent,
    fingerprint: &str,
) -> AppResult<SyncOutcome> {
    let src_event = decode::decode_src_event(&event.raw_payload)
        .map_err(|e| AppError::invalid_payload(format!("source payload: {e}")))?;

    let registry = &state.registry;
    if registry.provider_ignored(Provider::Src.as_str()) {
        return skip(state, fingerprint, "provider_ignored");
    }

    let issue = &src_event.issue;
    if registry.filters.ignore_bots && issue.author.ends_with("[bot]") {
        return skip(state, fingerprint, "bot_author");
    }
    if issue
        .labels
        .iter()
        .any(|label| registry.filters.ignored_labels.contains(label))
    {
        return skip(state, fingerprint, "ignored_label");
    }

    if let Some(comment) = &src_event.comment {
        return sync_src_comment(state, &src_event, comment, fingerprint).await;
    }
    sync_src_issue(state, issue, fingerprint).await
}

async fn sync_src_issue(
    state: &AppState,
    issue: &IssueRecord,
    fingerprint: &str,
) -> AppResult<SyncOutcome> {
    let src_hash = issue.content_hash();
    let existing = {
        let mut conn = conn(state)?;
        repos::mapping::find_by_issue(&mut conn, &issue.src_repo, issue.src_number)?
    };

    if let Some(mapping) = &existing {
        if mapping.last_src_hash.as_deref() == Some(src_hash.as_str()) {
            return skip(state, fingerprint, "self_echo");
        }
        if mapping.orphaned {
            return skip(state, fingerprint, "mapping_orphaned");
        }
    }

    let mapped = mapper::issue_to_properties(&state.registry, issue);
    record_warnings(state, &mapped.warnings);

    match existing {
        Some(mapping) => {
            let page = match state
                .tgt_client
                .update_page(&mapping.page_id, &mapped.properties)
                .await
            {
                Ok(page) => page,
                Err(ApiError::NotFound { .. }) => {
                    // The mapped page was deleted upstream: orphan the
                    // mapping and let the caller dead-letter the event.
                    let mut conn = conn(state)?;
                    conn.transaction(|conn| {
                        repos::mapping::mark_orphaned(conn, &issue.src_repo, issue.src_number)
                    })?;
                    return Err(AppError::new(
                        ErrorCode::MappingOrphaned,
                        format!("page {} deleted upstream", mapping.page_id),
                    ));
                }
                Err(err) => return Err(err.into()),
            };

            let written_tgt_hash = page.content_hash();
            let now = Utc::now();
            let mut conn = conn(state)?;
            conn.transaction(|conn| {
                repos::mapping::record_src_write(
                    conn,
                    &issue.src_repo,
                    issue.src_number,
                    &src_hash,
                    &written_tgt_hash,
                    now,
                )?;
                repos::processed::set_outcome(conn, fingerprint, Outcome::Ok)
            })?;
            Ok(SyncOutcome::ok("page_updated"))
        }
        None => {
            // A half-completed earlier sync may have created the page
            // without committing the mapping; adopt it instead of creating
            // a duplicate when the registry maps the issue number.
            let adopted = match state.registry.number_property() {
                Some(property) => {
                    let filter = serde_json::json!({
                        "property": property,
                        "number": { "equals": issue.src_number },
                    });
                    let mut pages = state
                        .tgt_client
                        .query_database(
                            &state.config.tgt_database_id,
                            filter,
                            state.registry.sync_options.batch_size,
                        )
                        .await
                        .map_err(AppError::from)?;
                    if !pages.is_empty() {
                        pace(state).await;
                    }
                    let first = pages.drain(..).next();
                    first
                }
                None => None,
            };

            let page = match adopted {
                Some(page) => {
                    state
                        .tgt_client
                        .update_page(&page.page_id, &mapped.properties)
                        .await?
                }
                None => {
                    state
                        .tgt_client
                        .create_page(&state.config.tgt_database_id, &mapped.properties)
                        .await?
                }
            };

            let now = Utc::now();
            let new = NewMapping {
                src_repo: issue.src_repo.clone(),
                src_number: issue.src_number,
                page_id: page.page_id.clone(),
                last_src_hash: Some(src_hash),
                last_tgt_hash: Some(page.content_hash()),
                last_sync_direction: SyncDirection::SrcToTgt.as_str().to_string(),
                orphaned: false,
                last_sync_at: Some(now),
                version: 1,
            };
            let mut conn = conn(state)?;
            // A concurrent create for the same key loses on the uniqueness
            // constraint here; the failed event is dead-lettered and heals
            // through the update path on replay.
            conn.transaction(|conn| {
                repos::mapping::insert(conn, &new)?;
                repos::processed::set_outcome(conn, fingerprint, Outcome::Ok)
            })?;
            Ok(SyncOutcome::ok("page_created"))
        }
    }
}

async fn sync_src_comment(
    state: &AppState,
    src_event: &SrcEvent,
    comment: &CommentRecord,
    fingerprint: &str,
) -> AppResult<SyncOutcome> {
    if !state.registry.sync_options.sync_comments {
        return skip(state, fingerprint, "comments_disabled");
    }
    if src_event.action != "created" {
        return skip(state, fingerprint, "unsupported_comment_action");
    }

    let issue = &src_event.issue;
    let mapping = {
        let mut conn = conn(state)?;
        repos::mapping::find_by_issue(&mut conn, &issue.src_repo, issue.src_number)?
    };
    let Some(mapping) = mapping else {
        return skip(state, fingerprint, "unmapped_issue");
    };
    if mapping.orphaned {
        return skip(state, fingerprint, "mapping_orphaned");
    }

    let echo = {
        let mut conn = conn(state)?;
        repos::comments::find(&mut conn, Provider::Src, &comment.remote_id)?
    };
    if echo.is_some() {
        return skip(state, fingerprint, "comment_echo");
    }

    let block = target::paragraph_block(&comment.author, &comment.body);
    let block_ids = state
        .tgt_client
        .append_block_children(&mapping.page_id, vec![block])
        .await
        .map_err(AppError::from)?;
    let other_id = block_ids
        .into_iter()
        .next()
        .ok_or_else(|| AppError::internal("append_block_children returned no block id"))?;

    let now = Utc::now();
    let mut conn = conn(state)?;
    conn.transaction(|conn| {
        repos::comments::insert_pair(conn, Provider::Src, &comment.remote_id, &other_id, now)?;
        repos::processed::set_outcome(conn, fingerprint, Outcome::Ok)
    })?;
    Ok(SyncOutcome::ok("comment_synced"))
}

// --- TGT → SRC ---

async fn sync_tgt(
    state: &AppState,
    event: &InboundEvent,
    fingerprint: &str,
) -> AppResult<SyncOutcome> {
    let tgt_event = decode::decode_tgt_event(&event.raw_payload)
        .map_err(|e| AppError::invalid_payload(format!("target payload: {e}")))?;

    if state.registry.provider_ignored(Provider::Tgt.as_str()) {
        return skip(state, fingerprint, "provider_ignored");
    }

    if let Some(comment) = &tgt_event.comment {
        return sync_tgt_comment(state, &tgt_event.page.page_id, comment, fingerprint).await;
    }
    sync_tgt_page(state, &tgt_event.page, fingerprint).await
}

async fn sync_tgt_page(
    state: &AppState,
    page: &PageRecord,
    fingerprint: &str,
) -> AppResult<SyncOutcome> {
    if !state.registry.sync_options.bidirectional {
        return skip(state, fingerprint, "unidirectional");
    }

    let mapping = {
        let mut conn = conn(state)?;
        repos::mapping::find_by_page(&mut conn, &page.page_id)?
    };
    // A page outside the mapping table is not ours to touch.
    let Some(mapping) = mapping else {
        return skip(state, fingerprint, "unmapped_page");
    };
    if mapping.orphaned {
        return skip(state, fingerprint, "mapping_orphaned");
    }

    let tgt_hash = page.content_hash();
    if mapping.last_tgt_hash.as_deref() == Some(tgt_hash.as_str()) {
        return skip(state, fingerprint, "self_echo");
    }

    let current = state
        .src_client
        .get_issue(&mapping.src_repo, mapping.src_number)
        .await
        .map_err(AppError::from)?;

    let (update, warnings) = mapper::page_to_issue_update(&state.registry, page, &current);
    record_warnings(state, &warnings);

    // Disallowed transitions (e.g. closing an already-closed issue) diff to
    // nothing against the current issue and land here as soft successes.
    if update.is_empty() {
        return skip(state, fingerprint, "no_changes");
    }

    pace(state).await;
    let updated = state
        .src_client
        .update_issue(&mapping.src_repo, mapping.src_number, &update)
        .await
        .map_err(AppError::from)?;

    let written_src_hash = updated.content_hash();
    let now = Utc::now();
    let mut conn = conn(state)?;
    conn.transaction(|conn| {
        repos::mapping::record_tgt_write(
            conn,
            &mapping.src_repo,
            mapping.src_number,
            &tgt_hash,
            &written_src_hash,
            now,
        )?;
        repos::processed::set_outcome(conn, fingerprint, Outcome::Ok)
    })?;
    Ok(SyncOutcome::ok("issue_updated"))
}

async fn sync_tgt_comment(
    state: &AppState,
    page_id: &str,
    comment: &CommentRecord,
    fingerprint: &str,
) -> AppResult<SyncOutcome> {
    if !state.registry.sync_options.sync_comments {
        return skip(state, fingerprint, "comments_disabled");
    }

    let mapping = {
        let mut conn = conn(state)?;
        repos::mapping::find_by_page(&mut conn, page_id)?
    };
    let Some(mapping) = mapping else {
        return skip(state, fingerprint, "unmapped_page");
    };
    if mapping.orphaned {
        return skip(state, fingerprint, "mapping_orphaned");
    }

    let echo = {
        let mut conn = conn(state)?;
        repos::comments::find(&mut conn, Provider::Tgt, &comment.remote_id)?
    };
    if echo.is_some() {
        return skip(state, fingerprint, "comment_echo");
    }

    let text = if comment.author.is_empty() {
        comment.body.clone()
    } else {
        format!("{}: {}", comment.author, comment.body)
    };
    let created = state
        .src_client
        .create_comment(&mapping.src_repo, mapping.src_number, &text)
        .await
        .map_err(AppError::from)?;

    let now = Utc::now();
    let mut conn = conn(state)?;
    conn.transaction(|conn| {
        repos::comments::insert_pair(conn, Provider::Tgt, &comment.remote_id, &created.remote_id, now)?;
        repos::processed::set_outcome(conn, fingerprint, Outcome::Ok)
    })?;
    Ok(SyncOutcome::ok("comment_synced"))
}
