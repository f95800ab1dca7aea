//! Admin trigger for an immediate dead-letter replay sweep.

use std::sync::Arc;

use axum::extract::{FromRequestParts, State};
use axum::http::request::Parts;
use axum::http::HeaderMap;
use axum::Json;
use ticketbridge_shared::{AppError, AppResult};

use crate::services::replay::{self, ReplaySummary};
use crate::AppState;

/// Bearer-token guard for the admin surface. The token is distinct from the
/// webhook secrets; an empty configuration disables the endpoint entirely.
pub struct AdminToken;

#[axum::async_trait]
impl FromRequestParts<Arc<AppState>> for AdminToken {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let configured = &state.config.admin_token;
        if configured.is_empty() {
            return Err(AppError::unauthorized("admin endpoint disabled"));
        }
        let provided = extract_bearer_token(&parts.headers)?;
        if !constant_time_eq(provided.as_bytes(), configured.as_bytes()) {
            return Err(AppError::unauthorized("invalid admin token"));
        }
        Ok(Self)
    }
}

fn extract_bearer_token(headers: &HeaderMap) -> Result<String, AppError> {
    let auth_header = headers
        .get("Authorization")
        .ok_or_else(|| AppError::unauthorized("missing authorization header"))?
        .to_str()
        .map_err(|_| AppError::unauthorized("invalid authorization header"))?;

    if !auth_header.starts_with("Bearer ") {
        return Err(AppError::unauthorized(
            "authorization header must use Bearer scheme",
        ));
    }

    Ok(auth_header[7..].to_string())
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

pub async fn replay_deadletters(
    State(state): State<Arc<AppState>>,
    _admin: AdminToken,
) -> AppResult<Json<ReplaySummary>> {
    let summary = replay::replay_due(&state).await?;
    Ok(Json(summary))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_time_eq_basics() {
        assert!(constant_time_eq(b"token", b"token"));
        assert!(!constant_time_eq(b"token", b"token2"));
        assert!(!constant_time_eq(b"token", b"tokeX"));
        assert!(!constant_time_eq(b"", b"x"));
    }

    #[test]
    fn bearer_extraction() {
        let mut headers = HeaderMap::new();
        headers.insert("Authorization", "Bearer abc123".parse().unwrap());
        assert_eq!(extract_bearer_token(&headers).unwrap(), "abc123");

        headers.insert("Authorization", "Basic abc123".parse().unwrap());
        assert!(extract_bearer_token(&headers).is_err());

        assert!(extract_bearer_token(&HeaderMap::new()).is_err());
    }
}
