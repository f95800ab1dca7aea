//! Webhook admission: size ceiling, rate limit, signature, decode,
//! idempotency, then orchestration under a bounded deadline.
//!
//! Providers retry on non-2xx, so every rejection maps to a precise status:
//! 400 invalid_payload, 403 invalid_signature, 413 request_too_large,
//! 429 rate_limited. Duplicates and dead-lettered events answer 202.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use diesel::Connection;
use serde::Serialize;
use ticketbridge_shared::{ApiResponse, AppError, AppResult, ErrorCode};
use uuid::Uuid;

use crate::metrics;
use crate::models::{NewDeadLetter, Outcome};
use crate::records::{InboundEvent, Provider};
use crate::repos;
use crate::services::replay::{replay_backoff, REPLAY_BACKOFF_BASE};
use crate::services::{idempotency, orchestrator};
use crate::signature;
use crate::AppState;

pub const SIGNATURE_HEADER: &str = "x-webhook-signature";
pub const EVENT_HEADER: &str = "x-webhook-event";
pub const DELIVERY_HEADER: &str = "x-webhook-delivery";
pub const TIMESTAMP_HEADER: &str = "x-webhook-timestamp";

#[derive(Debug, Serialize)]
pub struct WebhookAck {
    pub fingerprint: String,
    pub outcome: String,
}

pub async fn src_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    handle(state, Provider::Src, headers, body).await
}

pub async fn tgt_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    handle(state, Provider::Tgt, headers, body).await
}

async fn handle(
    state: Arc<AppState>,
    provider: Provider,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    match admit_and_run(&state, provider, &headers, body).await {
        Ok(response) => response,
        Err(err) => {
            let kind = err.code().kind();
            metrics::webhook_error(provider.as_str(), kind);
            tracing::warn!(
                provider = provider.as_str(),
                kind = kind,
                error = %err,
                "webhook rejected"
            );
            err.into_response()
        }
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

async fn admit_and_run(
    state: &Arc<AppState>,
    provider: Provider,
    headers: &HeaderMap,
    body: Bytes,
) -> AppResult<Response> {
    // 1. Size ceiling.
    if body.len() > state.config.max_request_bytes {
        return Err(AppError::new(
            ErrorCode::RequestTooLarge,
            format!("payload of {} bytes exceeds the limit", body.len()),
        ));
    }

    // 2. Inbound rate limit, per provider.
    let path = match provider {
        Provider::Src => "/webhook/src",
        Provider::Tgt => "/webhook/tgt",
    };
    if let Some(bucket) = state.inbound_bucket(provider) {
        if !bucket.try_acquire() {
            metrics::rate_limit_hit(path);
            return Err(AppError::new(ErrorCode::RateLimited, "rate limit exceeded"));
        }
    }

    // 3. Signature over the raw body, exactly as received.
    let secret = match provider {
        Provider::Src => &state.config.src_secret,
        Provider::Tgt => &state.config.tgt_secret,
    };
    let prefix = match provider {
        Provider::Src => signature::SRC_SIGNATURE_PREFIX,
        Provider::Tgt => "",
    };
    let sig = header_str(headers, SIGNATURE_HEADER)
        .ok_or_else(|| AppError::new(ErrorCode::InvalidSignature, "missing signature header"))?;
    if !signature::verify(secret, &body, sig, prefix) {
        return Err(AppError::new(ErrorCode::InvalidSignature, "signature mismatch"));
    }

    // 4. Optional timestamp window.
    let verify_ts = match provider {
        Provider::Src => state.config.src_verify_timestamp,
        Provider::Tgt => state.config.tgt_verify_timestamp,
    };
    if verify_ts {
        let ts = header_str(headers, TIMESTAMP_HEADER).unwrap_or("");
        if !signature::verify_timestamp(ts, Utc::now()) {
            return Err(AppError::new(
                ErrorCode::InvalidSignature,
                "timestamp outside the allowed window",
            ));
        }
    }

    // 5. Decode enough to fingerprint.
    let event_kind = header_str(headers, EVENT_HEADER)
        .ok_or_else(|| AppError::invalid_payload("missing event header"))?
        .to_string();
    let delivery_id = header_str(headers, DELIVERY_HEADER).map(str::to_string);
    let event = InboundEvent::from_payload(
        provider,
        event_kind,
        delivery_id,
        body.to_vec(),
        Utc::now(),
    )
    .map_err(|e| AppError::invalid_payload(format!("malformed JSON: {e}")))?;
    let fingerprint = event.fingerprint();

    tracing::info!(
        provider = provider.as_str(),
        event_kind = %event.event_kind,
        delivery_id = event.delivery_id.as_deref().unwrap_or(""),
        fingerprint = %fingerprint,
        "webhook admitted"
    );

    // 6. Idempotency guard.
    match idempotency::admit(state, &fingerprint)? {
        idempotency::Admission::Execute => {}
        duplicate => {
            let kind = duplicate
                .duplicate_kind()
                .map(|c| c.kind())
                .unwrap_or("duplicate");
            return Ok(accepted(&fingerprint, kind));
        }
    }

    // 7. Orchestrate under the sync deadline, on a detached task: a client
    // that drops the connection must not cancel the in-flight sync, and a
    // claimed fingerprint always reaches a terminal outcome.
    let deadline = Duration::from_secs(state.config.sync_deadline_secs);
    let mut run = tokio::spawn({
        let state = state.clone();
        let event = event.clone();
        let fingerprint = fingerprint.clone();
        async move { orchestrator::process_event(&state, &event, &fingerprint).await }
    });
    match tokio::time::timeout(deadline, &mut run).await {
        Ok(Ok(Ok(outcome))) => Ok(accepted(&fingerprint, outcome.outcome.as_str())),
        Ok(Ok(Err(err))) => dispose_failure(state, &event, &fingerprint, err),
        Ok(Err(join_err)) => {
            record_failed(state, &fingerprint)?;
            Err(AppError::internal(format!("sync task failed: {join_err}")))
        }
        // The task keeps running past the deadline; the dead-letter replay
        // reconciles with whatever outcome it eventually commits.
        Err(_elapsed) => dispose_failure(
            state,
            &event,
            &fingerprint,
            AppError::timeout("sync deadline exceeded"),
        ),
    }
}

fn accepted(fingerprint: &str, outcome: &str) -> Response {
    (
        StatusCode::ACCEPTED,
        Json(ApiResponse::ok(WebhookAck {
            fingerprint: fingerprint.to_string(),
            outcome: outcome.to_string(),
        })),
    )
        .into_response()
}

/// Route a pipeline failure: transient kinds are dead-lettered and the
/// provider sees 202 once the row commits; permanent business failures are
/// recorded and also answer 202 so providers don't retry; everything else
/// keeps its taxonomy status.
fn dispose_failure(
    state: &Arc<AppState>,
    event: &InboundEvent,
    fingerprint: &str,
    err: AppError,
) -> AppResult<Response> {
    match err.code() {
        ErrorCode::UpstreamTransient | ErrorCode::Timeout | ErrorCode::MappingOrphaned => {
            enqueue_deadletter(state, event, fingerprint, &err.to_string())?;
            Ok(accepted(fingerprint, "queued"))
        }
        ErrorCode::UpstreamPermanent => {
            record_failed(state, fingerprint)?;
            Ok(accepted(fingerprint, Outcome::Failed.as_str()))
        }
        _ => {
            record_failed(state, fingerprint)?;
            Err(err)
        }
    }
}

fn record_failed(state: &Arc<AppState>, fingerprint: &str) -> AppResult<()> {
    let mut conn = state
        .db
        .get()
        .map_err(|e| AppError::internal(format!("db pool error: {e}")))?;
    repos::processed::set_outcome(&mut conn, fingerprint, Outcome::Failed)?;
    Ok(())
}

/// Commit the failed outcome and the dead-letter row together. Redeliveries
/// of an already-dead-lettered fingerprint fold into the existing row.
fn enqueue_deadletter(
    state: &Arc<AppState>,
    event: &InboundEvent,
    fingerprint: &str,
    reason: &str,
) -> AppResult<()> {
    let now = Utc::now();
    let mut conn = state
        .db
        .get()
        .map_err(|e| AppError::internal(format!("db pool error: {e}")))?;

    conn.transaction(|conn| {
        repos::processed::set_outcome(conn, fingerprint, Outcome::Failed)?;
        match repos::deadletter::find_unarchived_by_fingerprint(conn, fingerprint)? {
            Some(existing) => {
                let attempts_after = existing.attempts + 1;
                let archived = attempts_after >= state.config.replay_max_attempts;
                let next = now
                    + chrono::Duration::from_std(replay_backoff(attempts_after))
                        .unwrap_or_else(|_| chrono::Duration::seconds(3600));
                repos::deadletter::record_failure(conn, existing.id, reason, next, archived)?;
            }
            None => {
                let next = now
                    + chrono::Duration::from_std(REPLAY_BACKOFF_BASE)
                        .unwrap_or_else(|_| chrono::Duration::seconds(1));
                repos::deadletter::insert(
                    conn,
                    &NewDeadLetter {
                        id: Uuid::new_v4(),
                        fingerprint: fingerprint.to_string(),
                        provider: event.provider.as_str().to_string(),
                        event_kind: event.event_kind.clone(),
                        raw_payload: event.raw_payload.clone(),
                        failure_reason: reason.to_string(),
                        attempts: 1,
                        archived: false,
                        next_attempt_at: next,
                        created_at: now,
                    },
                )?;
            }
        }
        diesel::QueryResult::Ok(())
    })?;

    tracing::warn!(
        provider = event.provider.as_str(),
        fingerprint = fingerprint,
        reason = reason,
        "event dead-lettered"
    );
    Ok(())
}
