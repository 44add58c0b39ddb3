//! Patient demographics lookup through the caller tenant's patient-access service.

use crate::consent::header_value;
use crate::context::RequestContext;
use crate::{authorize, message, AppState};
use api_shared::auth::Scope;
use api_shared::envelope::{MessageRes, PatientProfileRes, PatientRes};
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use consent_core::constants::PATIENT_ID_HEADER;
use fhir::{PatientLookup, PatientProfile};

#[utoipa::path(
    get,
    path = "/api/v1/consent/patient",
    params(
        ("x-cm-patientid" = String, Header, description = "Patient to look up")
    ),
    responses(
        (status = 200, description = "Patient profile", body = PatientRes),
        (status = 204, description = "Patient not found"),
        (status = 400, description = "Missing identifiers or tenant not onboarded", body = MessageRes),
        (status = 401, description = "Missing or invalid token", body = MessageRes),
        (status = 403, description = "Missing patient.read scope", body = MessageRes)
    )
)]
/// Look up a patient's display profile.
///
/// Upstream failures keep their status; failures without one are reported as 400.
#[axum::debug_handler]
pub async fn query_patient(
    State(state): State<AppState>,
    ctx: RequestContext,
    headers: HeaderMap,
) -> Response {
    let caller = match authorize(&state, &ctx, Scope::PatientRead).await {
        Ok(caller) => caller,
        Err(denied) => return denied,
    };
    let txn = ctx.correlation_id.as_str();

    let Some(patient_id) = header_value(&headers, PATIENT_ID_HEADER) else {
        tracing::error!(correlation_id = %txn, "Missing PatientID header parameter");
        return message(400, "Missing PatientID header parameter");
    };
    let Some(tenant_id) = ctx.tenant_id.as_deref() else {
        tracing::error!(correlation_id = %txn, "Missing TenantID");
        return message(400, "Missing TenantID");
    };

    let connection = match state.tenants.resolve(tenant_id) {
        Ok(connection) => connection,
        Err(err) => {
            tracing::error!(correlation_id = %txn, "{}", err);
            return message(400, err.to_string());
        }
    };

    match state
        .patients
        .lookup(&connection, tenant_id, &patient_id, &caller.subject)
        .await
    {
        Ok(PatientLookup::Found(profile)) => Json(PatientRes {
            msg: "GET /patient was successful".into(),
            status: 200,
            payload: profile_res(profile),
        })
        .into_response(),
        Ok(PatientLookup::NotFound) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => {
            let status = err.upstream_status().unwrap_or(400);
            tracing::error!(correlation_id = %txn, status, "patient lookup failed: {}", err);
            message(status, err.to_string())
        }
    }
}

fn profile_res(profile: PatientProfile) -> PatientProfileRes {
    PatientProfileRes {
        family: profile.family,
        given: profile.given,
        prefix: profile.prefix,
        email: profile.email,
    }
}
