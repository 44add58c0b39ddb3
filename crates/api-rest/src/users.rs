//! User endpoints backed by the identity service: login and password reset.
//!
//! Failures use the `{error: {message}, currentTime}` envelope.

use crate::context::RequestContext;
use crate::{status_code, AppState};
use api_shared::envelope::{ErrorRes, ForgotPasswordReq, LoginReq, MessageRes};
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;

const LOGIN_FIELDS: [&str; 2] = ["email", "password"];

static EMAIL_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"[a-z0-9!#$%&'*+/=?^_`{|}~-]+(?:\.[a-z0-9!#$%&'*+/=?^_`{|}~-]+)*@(?:[a-z0-9](?:[a-z0-9-]*[a-z0-9])?\.)+[a-z0-9](?:[a-z0-9-]*[a-z0-9])?",
    )
    .expect("email regex is valid")
});

fn error(status: u16, message: impl Into<String>) -> Response {
    (status_code(status), Json(ErrorRes::new(message))).into_response()
}

/// Non-empty string field of a JSON object.
fn string_field<'a>(body: &'a Value, name: &str) -> Option<&'a str> {
    body.get(name)
        .and_then(Value::as_str)
        .filter(|v| !v.is_empty())
}

#[utoipa::path(
    post,
    path = "/api/v1/users/login",
    request_body = LoginReq,
    responses(
        (status = 200, description = "Token payload issued by the identity service"),
        (status = 400, description = "Invalid login request", body = ErrorRes),
        (status = 500, description = "Identity service failure", body = ErrorRes)
    )
)]
/// Exchange an email and password for tokens.
#[axum::debug_handler]
pub async fn login(
    State(state): State<AppState>,
    ctx: RequestContext,
    body: Result<Json<Value>, JsonRejection>,
) -> Response {
    let txn = ctx.correlation_id.as_str();
    let body = match body {
        Ok(Json(body)) => body,
        Err(rejection) => return error(400, rejection.body_text()),
    };

    let unexpected: Vec<&str> = body
        .as_object()
        .map(|fields| {
            fields
                .keys()
                .map(String::as_str)
                .filter(|k| !LOGIN_FIELDS.contains(k))
                .collect()
        })
        .unwrap_or_default();
    if !unexpected.is_empty() {
        let msg = format!("Unexpected fields in request body: {}", unexpected.join(","));
        tracing::error!(correlation_id = %txn, "Failed to login user: {}", msg);
        return error(400, msg);
    }

    let (Some(email), Some(password)) = (string_field(&body, "email"), string_field(&body, "password"))
    else {
        return error(400, "Missing required login fields");
    };
    if !EMAIL_REGEX.is_match(email) {
        return error(400, "email format is invalid");
    }

    match state.identity.login(email, password).await {
        Ok(tokens) => (StatusCode::OK, Json(tokens)).into_response(),
        Err(err) => {
            tracing::error!(correlation_id = %txn, "login error: {}", err);
            error(err.status(), format!("Failed to login with AppID: {err}"))
        }
    }
}

#[utoipa::path(
    post,
    path = "/api/v1/users/forgotPassword",
    request_body = ForgotPasswordReq,
    responses(
        (status = 200, description = "Reset email sent", body = MessageRes),
        (status = 400, description = "Invalid or unknown user", body = ErrorRes),
        (status = 429, description = "A reset was already requested in this window", body = ErrorRes),
        (status = 500, description = "Identity service failure", body = ErrorRes)
    )
)]
/// Ask the identity service to email a password reset link.
///
/// Checks run in order: email shape, user existence, rate limit.
#[axum::debug_handler]
pub async fn forgot_password(
    State(state): State<AppState>,
    ctx: RequestContext,
    body: Result<Json<Value>, JsonRejection>,
) -> Response {
    let txn = ctx.correlation_id.as_str();
    let body = match body {
        Ok(Json(body)) => body,
        Err(rejection) => return error(400, rejection.body_text()),
    };

    let Some(user_id) = string_field(&body, "userId") else {
        return error(400, "Missing required userId field");
    };
    if !EMAIL_REGEX.is_match(user_id) {
        return error(400, "Email format is invalid");
    }

    let user_uuid = match state.identity.find_user(user_id).await {
        Ok(Some(uuid)) => uuid,
        Ok(None) => return error(400, "Failed to validate existing user."),
        Err(err) => {
            tracing::error!(correlation_id = %txn, "failed to look up user: {}", err);
            let status = match err.status() {
                500 => 404,
                other => other,
            };
            return error(status, "Failed to validate existing user.");
        }
    };

    if !state.reset_limiter.try_acquire(user_id) {
        tracing::warn!(correlation_id = %txn, "password reset rate limited");
        return error(429, "Too many requests, please try again later");
    }

    match state.identity.send_password_reset(&user_uuid).await {
        Ok(()) => Json(MessageRes::new(200, "Password email sent successfully")).into_response(),
        Err(err) => {
            tracing::error!(correlation_id = %txn, "resetPassword error: {}", err);
            error(
                err.status(),
                format!("Failed to request reset password with AppID: {err}"),
            )
        }
    }
}
