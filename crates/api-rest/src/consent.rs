//! Consent endpoints: create, revoke, query by patient and ledger ping.

use crate::context::RequestContext;
use crate::{authorize, message, AppState};
use api_shared::auth::Scope;
use api_shared::envelope::{ConsentReq, ConsentRes, MessageRes, QueryRes};
use axum::extract::rejection::JsonRejection;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use consent_core::constants::PATIENT_ID_HEADER;
use consent_core::service::revocation_of;
use consent_core::{ConsentError, CreateOutcome, PageSize, PatientQuery};
use serde::Deserialize;
use serde_json::Value;
use utoipa::IntoParams;

/// Pagination parameters for consent queries.
#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ConsentQueryParams {
    /// Page size, 1 to 50; anything else means 50.
    #[serde(rename = "pageSize")]
    pub page_size: Option<String>,
    /// Opaque cursor returned by the previous page.
    pub bookmark: Option<String>,
}

#[utoipa::path(
    post,
    path = "/api/v1/consent",
    request_body = ConsentReq,
    responses(
        (status = 200, description = "Consent recorded (or already present)", body = ConsentRes),
        (status = 400, description = "Invalid consent", body = ConsentRes),
        (status = 500, description = "De-identification or ledger failure", body = ConsentRes)
    )
)]
/// Record a consent.
#[axum::debug_handler]
pub async fn create_consent(
    State(state): State<AppState>,
    ctx: RequestContext,
    body: Result<Json<Value>, JsonRejection>,
) -> Response {
    let input = match body {
        Ok(Json(input)) => input,
        Err(rejection) => return rejected(&ctx, rejection.body_text()),
    };
    record_consent(&state, &ctx, input).await
}

#[utoipa::path(
    post,
    path = "/api/v1/consent/revoke",
    request_body = ConsentReq,
    responses(
        (status = 200, description = "Revocation recorded (or already present)", body = ConsentRes),
        (status = 400, description = "Invalid consent", body = ConsentRes),
        (status = 401, description = "Missing or invalid token", body = MessageRes),
        (status = 403, description = "Missing consent.revoke scope", body = MessageRes),
        (status = 500, description = "De-identification or ledger failure", body = ConsentRes)
    )
)]
/// Record a revocation: the submitted consent with `ConsentOption` forced to `["deny"]`.
#[axum::debug_handler]
pub async fn revoke_consent(
    State(state): State<AppState>,
    ctx: RequestContext,
    body: Result<Json<Value>, JsonRejection>,
) -> Response {
    let input = match body {
        Ok(Json(input)) => revocation_of(&input),
        Err(rejection) => return rejected(&ctx, rejection.body_text()),
    };
    if let Err(denied) = authorize(&state, &ctx, Scope::ConsentRevoke).await {
        return denied;
    }
    record_consent(&state, &ctx, input).await
}

/// Shared create path for consents and revocations.
///
/// The response always echoes the submitted body, never the de-identified record.
async fn record_consent(state: &AppState, ctx: &RequestContext, input: Value) -> Response {
    let txn = ctx.correlation_id.as_str();
    tracing::info!(correlation_id = %txn, "POST /register-consent: {}", input);

    match state.consent.create(&input, txn).await {
        Ok(CreateOutcome::Created) => {
            tracing::info!(correlation_id = %txn, "POST /register-consent was successful");
            Json(ConsentRes::success("POST /register-consent was successful", input))
                .into_response()
        }
        Ok(CreateOutcome::AlreadyExists) => {
            tracing::warn!(correlation_id = %txn, "consent already exists");
            Json(ConsentRes::success(
                format!("Consent {txn} already exists, txID: {txn}"),
                input,
            ))
            .into_response()
        }
        Err(ConsentError::Validation(msg)) => rejected(ctx, msg),
        Err(err) => {
            tracing::error!(
                correlation_id = %txn,
                timed_out = err.is_timeout(),
                "failed to record consent: {}",
                err
            );
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ConsentRes::failed(err.to_string(), input)),
            )
                .into_response()
        }
    }
}

fn rejected(ctx: &RequestContext, msg: String) -> Response {
    tracing::error!(correlation_id = %ctx.correlation_id, "request body validation failed: {}", msg);
    (StatusCode::BAD_REQUEST, Json(ConsentRes::rejected(msg))).into_response()
}

#[utoipa::path(
    get,
    path = "/api/v1/consent/query",
    params(
        ("x-cm-patientid" = String, Header, description = "Patient whose consents are read"),
        ConsentQueryParams
    ),
    responses(
        (status = 200, description = "One page of consents", body = QueryRes),
        (status = 400, description = "Missing patient or tenant", body = MessageRes),
        (status = 401, description = "Missing or invalid token", body = MessageRes),
        (status = 403, description = "Missing consent.read scope", body = MessageRes),
        (status = 404, description = "No consents could be re-identified", body = MessageRes),
        (status = 500, description = "De-identification or ledger failure", body = MessageRes)
    )
)]
/// Read one page of a patient's consents in the caller's tenant.
#[axum::debug_handler]
pub async fn query_consents(
    State(state): State<AppState>,
    ctx: RequestContext,
    headers: HeaderMap,
    Query(params): Query<ConsentQueryParams>,
) -> Response {
    let caller = match authorize(&state, &ctx, Scope::ConsentRead).await {
        Ok(caller) => caller,
        Err(denied) => return denied,
    };
    let txn = ctx.correlation_id.as_str();

    let Some(patient_id) = header_value(&headers, PATIENT_ID_HEADER) else {
        tracing::error!(correlation_id = %txn, "Missing PatientID header parameter");
        return message(400, "Missing PatientID header parameter");
    };
    let Some(tenant_id) = ctx.tenant_id.clone() else {
        tracing::error!(correlation_id = %txn, "Missing TenantID");
        return message(400, "Missing TenantID");
    };

    let query = PatientQuery {
        patient_id,
        tenant_id,
        caller_id: caller.subject,
        page_size: PageSize::from_query(params.page_size.as_deref()),
        bookmark: params.bookmark.unwrap_or_default(),
        correlation_id: txn.to_string(),
    };

    match state.consent.query_by_patient(&query).await {
        Ok(result) => Json(QueryRes {
            msg: "GET /consent was successful".into(),
            status: 200,
            payload: result.records,
            bookmark: result.bookmark,
        })
        .into_response(),
        Err(ConsentError::NotFound) => message(404, "Not found"),
        Err(err) => {
            tracing::error!(
                correlation_id = %txn,
                timed_out = err.is_timeout(),
                "failed to query consents: {}",
                err
            );
            message(500, err.to_string())
        }
    }
}

#[utoipa::path(
    get,
    path = "/api/v1/consent/ping",
    responses(
        (status = 200, description = "Ledger reachable", body = MessageRes),
        (status = 401, description = "Missing or invalid token", body = MessageRes),
        (status = 403, description = "Missing consent.read scope", body = MessageRes),
        (status = 500, description = "Ledger unreachable", body = MessageRes)
    )
)]
/// Ping the consent chaincode.
#[axum::debug_handler]
pub async fn ping_consent(State(state): State<AppState>, ctx: RequestContext) -> Response {
    if let Err(denied) = authorize(&state, &ctx, Scope::ConsentRead).await {
        return denied;
    }
    match state.consent.ping().await {
        Ok(answer) => message(200, format!("GET /ping was successful: {answer}")),
        Err(err) => {
            tracing::error!(correlation_id = %ctx.correlation_id, "{}", err);
            message(500, err.to_string())
        }
    }
}

/// Non-blank header value.
pub(crate) fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}
