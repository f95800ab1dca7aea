//! Health and metrics surface.
//!
//! `/health` probes everything, including both outbound APIs. `/health/ci`
//! intentionally covers only db + disk + self, so a test lane without API
//! credentials doesn't go red.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::Json;
use diesel::RunQueryDsl;
use ticketbridge_shared::{HealthCheck, HealthResponse};

use crate::AppState;

const PROBE_TIMEOUT: Duration = Duration::from_secs(3);

pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let mut resp = base_checks(&state);
    resp = resp.with_check(
        "src_api",
        probe_api(&state, &state.config.src_api_base).await,
    );
    resp = resp.with_check(
        "tgt_api",
        probe_api(&state, &state.config.tgt_api_base).await,
    );
    Json(resp)
}

pub async fn health_ci(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(base_checks(&state))
}

pub async fn metrics_endpoint(State(state): State<Arc<AppState>>) -> String {
    state.metrics_handle.render()
}

fn base_checks(state: &AppState) -> HealthResponse {
    HealthResponse::new(&state.config.environment)
        .with_check("self", HealthCheck::healthy())
        .with_check("db", check_db(state))
        .with_check("disk", check_disk())
}

fn check_db(state: &AppState) -> HealthCheck {
    let mut conn = match state.db.get() {
        Ok(conn) => conn,
        Err(e) => return HealthCheck::error(format!("pool: {e}")),
    };
    match diesel::sql_query("SELECT 1").execute(&mut conn) {
        Ok(_) => HealthCheck::healthy(),
        Err(e) => HealthCheck::error(format!("query: {e}")),
    }
}

fn check_disk() -> HealthCheck {
    let probe = std::env::temp_dir().join(".ticketbridge-disk-probe");
    match std::fs::write(&probe, b"ok") {
        Ok(()) => {
            let _ = std::fs::remove_file(&probe);
            HealthCheck::healthy()
        }
        Err(e) => HealthCheck::error(format!("write: {e}")),
    }
}

/// An outbound API is degraded (not an error) when unreachable: the service
/// still accepts webhooks and dead-letters what it cannot deliver.
async fn probe_api(state: &AppState, base: &str) -> HealthCheck {
    match state
        .http_client
        .get(base)
        .timeout(PROBE_TIMEOUT)
        .send()
        .await
    {
        Ok(resp) if resp.status().as_u16() < 500 => HealthCheck::healthy(),
        Ok(resp) => HealthCheck::degraded(format!("status {}", resp.status())),
        Err(e) => HealthCheck::degraded(format!("{e}")),
    }
}
