//! Health and liveness endpoints.

use crate::AppState;
use api_shared::envelope::HealthRes;
use api_shared::health::{HealthService, Probe};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Json;

const IDENTITY_SERVICE: &str = "AppID";
const LEDGER_SERVICE: &str = "Ledger";

#[utoipa::path(
    get,
    path = "/api/v1/health",
    responses(
        (status = 200, description = "Every dependency is reachable", body = HealthRes),
        (status = 500, description = "A dependency is unreachable", body = HealthRes)
    )
)]
/// Probe the identity service and the ledger.
#[axum::debug_handler]
pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthRes>) {
    let identity = state.identity.ping().await;
    let ledger = state.consent.ping().await;
    let probes = [
        Probe::new(IDENTITY_SERVICE, &identity),
        Probe::new(LEDGER_SERVICE, &ledger),
    ];
    respond(HealthService::check_health(&probes, "Consent gateway health is OK"))
}

#[utoipa::path(
    get,
    path = "/api/v1/live",
    responses(
        (status = 200, description = "Ledger is reachable", body = HealthRes),
        (status = 500, description = "Ledger is unreachable", body = HealthRes)
    )
)]
/// Probe the ledger only.
#[axum::debug_handler]
pub async fn live(State(state): State<AppState>) -> (StatusCode, Json<HealthRes>) {
    let ledger = state.consent.ping().await;
    let probes = [Probe::new(LEDGER_SERVICE, &ledger)];
    respond(HealthService::check_health(&probes, "Consent gateway liveness is OK"))
}

fn respond(outcome: Result<HealthRes, HealthRes>) -> (StatusCode, Json<HealthRes>) {
    match outcome {
        Ok(res) => (StatusCode::OK, Json(res)),
        Err(res) => (StatusCode::INTERNAL_SERVER_ERROR, Json(res)),
    }
}
