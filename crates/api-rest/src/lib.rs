//! # API REST
//!
//! REST API implementation for the consent gateway.
//!
//! Handles:
//! - HTTP endpoints with axum, all under [`API_BASE_PATH`]
//! - Request context (correlation id, tenant, bearer) and scope checks
//! - OpenAPI/Swagger documentation
//! - REST-specific concerns (JSON serialization, CORS)
//!
//! Uses `api-shared` for envelopes and the identity service, and `consent-core` / `fhir` for the
//! work itself.

#![warn(rust_2018_idioms)]

pub mod consent;
pub mod context;
pub mod health;
pub mod patient;
pub mod rate_limit;
pub mod users;

use api_shared::auth::{AuthError, Caller, IdentityProvider, Scope};
use api_shared::envelope::{
    ConsentReq, ConsentRes, ErrorBody, ErrorRes, ForgotPasswordReq, HealthRes, LoginReq, MessageRes,
    PatientProfileRes, PatientRes, QueryRes,
};
use axum::http::StatusCode;
use axum::middleware;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use consent_core::ConsentService;
use fhir::{PatientMetadataClient, TenantDirectory};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

pub use context::RequestContext;
pub use rate_limit::FixedWindowLimiter;

/// Versioned prefix of every API route.
pub const API_BASE_PATH: &str = "/api/v1";

/// Application state shared across REST API handlers.
#[derive(Clone)]
pub struct AppState {
    pub consent: ConsentService,
    pub identity: Arc<dyn IdentityProvider>,
    pub tenants: Arc<TenantDirectory>,
    pub patients: PatientMetadataClient,
    pub reset_limiter: Arc<FixedWindowLimiter>,
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health,
        health::live,
        users::login,
        users::forgot_password,
        consent::create_consent,
        consent::revoke_consent,
        consent::query_consents,
        consent::ping_consent,
        patient::query_patient,
    ),
    components(schemas(
        ConsentReq,
        ConsentRes,
        QueryRes,
        MessageRes,
        PatientRes,
        PatientProfileRes,
        HealthRes,
        ErrorRes,
        ErrorBody,
        LoginReq,
        ForgotPasswordReq,
    ))
)]
pub struct ApiDoc;

/// Build the gateway router.
pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/health", get(health::health))
        .route("/live", get(health::live))
        .route("/users/login", post(users::login))
        .route("/users/forgotPassword", post(users::forgot_password))
        .route("/consent", post(consent::create_consent))
        .route("/consent/revoke", post(consent::revoke_consent))
        .route("/consent/query", get(consent::query_consents))
        .route("/consent/ping", get(consent::ping_consent))
        .route("/consent/patient", get(patient::query_patient));

    Router::new()
        .nest(API_BASE_PATH, api)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .fallback(no_route)
        .layer(
            ServiceBuilder::new()
                .layer(middleware::from_fn(context::request_context))
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

async fn no_route() -> (StatusCode, Json<ErrorRes>) {
    (StatusCode::NOT_FOUND, Json(ErrorRes::new("No route found")))
}

/// Status code from a numeric status, defaulting to 500 for anything unrepresentable.
pub(crate) fn status_code(status: u16) -> StatusCode {
    StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}

/// `{msg, status}` response with a matching HTTP status.
pub(crate) fn message(status: u16, msg: impl Into<String>) -> Response {
    (status_code(status), Json(MessageRes::new(status, msg))).into_response()
}

/// Validate the request's bearer token with the identity service, requiring `scope`.
pub(crate) async fn authorize(
    state: &AppState,
    ctx: &RequestContext,
    scope: Scope,
) -> Result<Caller, Response> {
    let outcome = match ctx.bearer.as_deref() {
        None => Err(AuthError::MissingToken),
        Some(token) => state.identity.authorize(token, Some(scope)).await,
    };
    outcome.map_err(|err| {
        tracing::warn!(correlation_id = %ctx.correlation_id, %scope, "authorization failed: {}", err);
        message(err.status(), err.to_string())
    })
}

#[cfg(test)]
pub(crate) mod testing {
    //! Fakes and helpers shared by the handler tests.

    use super::*;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use base64::Engine;
    use consent_core::deidentifier::DeIdentifier;
    use consent_core::ledger::{CredentialMode, LedgerConnector, LedgerSession};
    use consent_core::{ConsentConfig, ConsentRecord, DeidError, LedgerClient, LedgerError};
    use fhir::ClientSettings;
    use http_body_util::BodyExt;
    use serde_json::Value;
    use std::collections::BTreeMap;
    use std::sync::Mutex;
    use std::time::Duration;
    use tower::ServiceExt;

    /// Ledger keyed by consent id, answering queries from a fixed payload.
    #[derive(Default)]
    pub struct FakeLedger {
        pub writes: Mutex<BTreeMap<String, Vec<String>>>,
        pub query_response: Mutex<String>,
        pub down: Mutex<bool>,
    }

    struct FakeSession(Arc<FakeLedger>);

    #[async_trait]
    impl LedgerSession for FakeSession {
        async fn evaluate(&self, function: &str, _args: &[String]) -> Result<String, LedgerError> {
            if *self.0.down.lock().unwrap() {
                return Err(LedgerError::Transport("connection refused".into()));
            }
            match function {
                "Ping" => Ok("pong".into()),
                _ => Ok(self.0.query_response.lock().unwrap().clone()),
            }
        }

        async fn submit(&self, _function: &str, args: &[String]) -> Result<(), LedgerError> {
            if *self.0.down.lock().unwrap() {
                return Err(LedgerError::Transport("connection refused".into()));
            }
            let mut writes = self.0.writes.lock().unwrap();
            let key = args[0].clone();
            if writes.contains_key(&key) {
                return Err(LedgerError::Rejected(format!("consent {key} already exists")));
            }
            writes.insert(key, args.to_vec());
            Ok(())
        }

        async fn disconnect(&self) {}
    }

    struct FakeConnector(Arc<FakeLedger>);

    #[async_trait]
    impl LedgerConnector for FakeConnector {
        async fn connect(
            &self,
            _mode: CredentialMode,
        ) -> Result<Arc<dyn LedgerSession>, LedgerError> {
            Ok(Arc::new(FakeSession(Arc::clone(&self.0))))
        }
    }

    /// Tokenises as `tok-<value>` and restores by stripping the prefix.
    #[derive(Default)]
    pub struct FakeDeIdentifier {
        pub down: Mutex<bool>,
        /// Answer every batch with no records.
        pub drops_records: Mutex<bool>,
    }

    #[async_trait]
    impl DeIdentifier for FakeDeIdentifier {
        async fn deidentify(
            &self,
            value: &str,
            _tenant_id: &str,
            _correlation_id: &str,
        ) -> Result<String, DeidError> {
            if *self.down.lock().unwrap() {
                return Err(DeidError::Unavailable("connection refused".into()));
            }
            Ok(format!("tok-{value}"))
        }

        async fn identify_batch(
            &self,
            _caller_id: &str,
            records: &[ConsentRecord],
            _tenant_id: &str,
            _correlation_id: &str,
        ) -> Result<Vec<ConsentRecord>, DeidError> {
            if *self.drops_records.lock().unwrap() {
                return Ok(Vec::new());
            }
            Ok(records
                .iter()
                .cloned()
                .map(|mut r| {
                    r.patient_id = r.patient_id.trim_start_matches("tok-").to_string();
                    r
                })
                .collect())
        }

        async fn ready(&self) -> Result<(), DeidError> {
            Ok(())
        }
    }

    /// Identity service with fixed tokens: the token text is the space-separated scope list.
    #[derive(Default)]
    pub struct FakeIdentity {
        pub users: BTreeMap<String, String>,
        pub resets: Mutex<Vec<String>>,
        pub down: bool,
    }

    #[async_trait]
    impl IdentityProvider for FakeIdentity {
        async fn authorize(&self, token: &str, scope: Option<Scope>) -> Result<Caller, AuthError> {
            let claims = token
                .split('.')
                .nth(1)
                .and_then(|p| URL_SAFE_NO_PAD.decode(p).ok())
                .and_then(|b| serde_json::from_slice::<Value>(&b).ok())
                .ok_or(AuthError::InvalidToken)?;
            let scopes: Vec<String> = claims["scope"]
                .as_str()
                .unwrap_or_default()
                .split_whitespace()
                .map(str::to_string)
                .collect();
            if let Some(required) = scope {
                if !scopes.iter().any(|s| s == required.as_str()) {
                    return Err(AuthError::InsufficientScope(required));
                }
            }
            Ok(Caller {
                subject: claims["sub"].as_str().unwrap_or("caller").to_string(),
                scopes,
            })
        }

        async fn login(&self, username: &str, password: &str) -> Result<Value, AuthError> {
            if password == "right" {
                Ok(serde_json::json!({"access_token": format!("at-{username}")}))
            } else {
                Err(AuthError::Upstream {
                    status: 400,
                    message: "Wrong credentials".into(),
                })
            }
        }

        async fn ping(&self) -> Result<(), AuthError> {
            if self.down {
                Err(AuthError::Unavailable("connection refused".into()))
            } else {
                Ok(())
            }
        }

        async fn find_user(&self, user_id: &str) -> Result<Option<String>, AuthError> {
            Ok(self.users.get(user_id).cloned())
        }

        async fn send_password_reset(&self, user_uuid: &str) -> Result<(), AuthError> {
            self.resets.lock().unwrap().push(user_uuid.to_string());
            Ok(())
        }
    }

    pub struct Harness {
        pub ledger: Arc<FakeLedger>,
        pub deid: Arc<FakeDeIdentifier>,
        pub identity: Arc<FakeIdentity>,
        pub state: AppState,
    }

    impl Harness {
        pub fn new() -> Self {
            Self::with(FakeIdentity::default(), TenantDirectory::default())
        }

        pub fn with(identity: FakeIdentity, tenants: TenantDirectory) -> Self {
            let ledger = Arc::new(FakeLedger::default());
            let deid = Arc::new(FakeDeIdentifier::default());
            let identity = Arc::new(identity);
            let client = LedgerClient::new(
                Arc::new(FakeConnector(Arc::clone(&ledger))),
                Duration::from_secs(5),
                Duration::from_secs(5),
            );
            let consent = ConsentService::new(
                Arc::new(client),
                deid.clone(),
                ConsentConfig { dev_mode: false },
            );
            let state = AppState {
                consent,
                identity: identity.clone(),
                tenants: Arc::new(tenants),
                patients: PatientMetadataClient::new(
                    reqwest::Client::new(),
                    ClientSettings {
                        timeout: Duration::from_secs(5),
                        retries: 0,
                        retry_delay: Duration::ZERO,
                    },
                ),
                reset_limiter: Arc::new(FixedWindowLimiter::new(Duration::from_secs(60))),
            };
            Self {
                ledger,
                deid,
                identity,
                state,
            }
        }

        /// Send one request through a fresh router; returns status, correlation header and JSON body.
        pub async fn send(&self, request: Request<Body>) -> (StatusCode, Option<String>, Value) {
            let response = router(self.state.clone()).oneshot(request).await.unwrap();
            let status = response.status();
            let txn = response
                .headers()
                .get("x-cm-txn-id")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            let bytes = response.into_body().collect().await.unwrap().to_bytes();
            let body = if bytes.is_empty() {
                Value::Null
            } else {
                serde_json::from_slice(&bytes).unwrap()
            };
            (status, txn, body)
        }
    }

    /// Unsigned bearer token carrying `sub`, `TenantID` and `scope` claims.
    pub fn token(tenant: Option<&str>, scope: &str) -> String {
        let mut claims = serde_json::json!({"sub": "caller-1", "scope": scope});
        if let Some(tenant) = tenant {
            claims["TenantID"] = Value::from(tenant);
        }
        format!(
            "{}.{}.sig",
            URL_SAFE_NO_PAD.encode(r#"{"alg":"none"}"#),
            URL_SAFE_NO_PAD.encode(claims.to_string())
        )
    }

    pub fn get(uri: &str, headers: &[(&str, &str)]) -> Request<Body> {
        let mut builder = Request::builder().method("GET").uri(uri);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        builder.body(Body::empty()).unwrap()
    }

    pub fn post_json(uri: &str, headers: &[(&str, &str)], body: &Value) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use axum::http::StatusCode;

    #[tokio::test]
    async fn test_unknown_route_is_404_with_correlation_header() {
        let h = Harness::new();
        let (status, txn, body) = h
            .send(get("/api/v1/nowhere", &[("x-cm-txn-id", "txn-9")]))
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(txn.as_deref(), Some("txn-9"));
        assert_eq!(body["error"]["message"], "No route found");
    }

    #[tokio::test]
    async fn test_openapi_document_served() {
        let h = Harness::new();
        let (status, _, body) = h.send(get("/api-docs/openapi.json", &[])).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["paths"]["/api/v1/consent/query"].is_object());
    }
}
