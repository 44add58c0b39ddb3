//! Request context middleware.
//!
//! Every request gets a correlation id (taken from `x-cm-txn-id` or freshly generated), the
//! tenant read from the bearer token's `TenantID` claim, and the bearer token itself. They are
//! stored in a [`RequestContext`] request extension and handlers take it as an extractor; the
//! correlation id is echoed back on the response.

use api_shared::auth::{bearer_token, tenant_from_token};
use axum::async_trait;
use axum::extract::{FromRequestParts, Request};
use axum::http::request::Parts;
use axum::http::{header, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::Response;
use consent_core::constants::TRANSACTION_ID_HEADER;
use tracing::Instrument;

/// Request-scoped values threaded explicitly into handlers.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RequestContext {
    pub correlation_id: String,
    pub tenant_id: Option<String>,
    pub bearer: Option<String>,
}

impl RequestContext {
    fn from_parts(parts: &Parts) -> Self {
        let correlation_id = parts
            .headers
            .get(TRANSACTION_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        let bearer = bearer_token(
            parts
                .headers
                .get(header::AUTHORIZATION)
                .and_then(|v| v.to_str().ok()),
        )
        .map(str::to_string);

        let tenant_id = bearer.as_deref().and_then(tenant_from_token);
        if bearer.is_some() && tenant_id.is_none() {
            tracing::warn!(%correlation_id, "failed to read TenantID from bearer token");
        }

        Self {
            correlation_id,
            tenant_id,
            bearer,
        }
    }
}

/// Attach a [`RequestContext`], run the request inside its span and echo the correlation id.
pub async fn request_context(request: Request, next: Next) -> Response {
    let (mut parts, body) = request.into_parts();
    let ctx = RequestContext::from_parts(&parts);
    let span = tracing::info_span!(
        "request",
        correlation_id = %ctx.correlation_id,
        method = %parts.method,
        path = %parts.uri.path(),
    );
    let echoed = HeaderValue::from_str(&ctx.correlation_id).ok();
    parts.extensions.insert(ctx);

    let mut response = next
        .run(Request::from_parts(parts, body))
        .instrument(span.clone())
        .await;
    span.in_scope(|| tracing::info!(status = response.status().as_u16(), "request completed"));

    if let Some(value) = echoed {
        response.headers_mut().insert(TRANSACTION_ID_HEADER, value);
    }
    response
}

#[async_trait]
impl<S> FromRequestParts<S> for RequestContext
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        // Routes mounted outside the middleware still get a usable context.
        Ok(parts
            .extensions
            .get::<RequestContext>()
            .cloned()
            .unwrap_or_else(|| RequestContext::from_parts(parts)))
    }
}
