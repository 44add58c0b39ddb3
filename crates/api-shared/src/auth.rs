//! Authentication and identity-service utilities.
//!
//! Bearer tokens are validated by the identity service (token introspection); this module never
//! verifies signatures itself. The tenant claim is read from the token payload without
//! verification only to scope the request; authorization decisions always come from
//! introspection.
//!
//! The same identity service backs user login and password reset:
//!
//! ```text
//! <url>/oauth/v4/<tenant>/token          password grant (login)
//! <url>/oauth/v4/<tenant>/introspect     token validation
//! <url>/oauth/v4/<tenant>/publickeys     health probe
//! <url>/management/v4/<tenant>/...       user directory (IAM bearer)
//! ```

use async_trait::async_trait;
use base64::engine::general_purpose::{URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine;
use serde::Deserialize;
use serde_json::Value;
use std::fmt;
use std::time::Duration;

/// Authorization scopes granted by the identity service.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Scope {
    ConsentRead,
    ConsentRevoke,
    PatientRead,
}

impl Scope {
    pub fn as_str(self) -> &'static str {
        match self {
            Scope::ConsentRead => "consent.read",
            Scope::ConsentRevoke => "consent.revoke",
            Scope::PatientRead => "patient.read",
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The authenticated caller behind a request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Caller {
    /// Identity-service subject.
    pub subject: String,
    pub scopes: Vec<String>,
}

/// Failures raised while authenticating callers or talking to the identity service.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Missing bearer token")]
    MissingToken,
    #[error("Invalid or expired token")]
    InvalidToken,
    #[error("Missing required scope: {0}")]
    InsufficientScope(Scope),
    #[error("{message}")]
    Upstream { status: u16, message: String },
    #[error("Failed to reach identity service: {0}")]
    Unavailable(String),
    #[error("Invalid AppID config: {0}")]
    Configuration(String),
}

impl AuthError {
    /// HTTP status to answer the caller with.
    pub fn status(&self) -> u16 {
        match self {
            AuthError::MissingToken | AuthError::InvalidToken => 401,
            AuthError::InsufficientScope(_) => 403,
            AuthError::Upstream { status, .. } => *status,
            AuthError::Unavailable(_) | AuthError::Configuration(_) => 500,
        }
    }
}

/// Extract the token from an `Authorization: Bearer <token>` header value.
pub fn bearer_token(header: Option<&str>) -> Option<&str> {
    let value = header?.trim();
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

/// Read the `TenantID` claim from a JWT payload without verifying the token.
pub fn tenant_from_token(token: &str) -> Option<String> {
    let payload = token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .or_else(|_| URL_SAFE.decode(payload))
        .ok()?;
    let claims: Value = serde_json::from_slice(&bytes).ok()?;
    claims
        .get("TenantID")
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// The identity service, as consumed by the gateway.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Validate `token` and, when given, require `scope`.
    async fn authorize(&self, token: &str, scope: Option<Scope>) -> Result<Caller, AuthError>;

    /// Resource-owner password grant; returns the token payload as issued.
    async fn login(&self, username: &str, password: &str) -> Result<Value, AuthError>;

    /// Health probe.
    async fn ping(&self) -> Result<(), AuthError>;

    /// Directory id of the user with this login, if one exists.
    async fn find_user(&self, user_id: &str) -> Result<Option<String>, AuthError>;

    /// Ask the identity service to email a password reset link.
    async fn send_password_reset(&self, user_uuid: &str) -> Result<(), AuthError>;
}

// ============================================================================
// Configuration
// ============================================================================

/// Identity-service settings, resolved once at startup.
#[derive(Clone, Debug)]
pub struct AppIdConfig {
    pub url: String,
    pub tenant_id: String,
    pub client_id: String,
    pub secret: String,
    /// API key for the management API; password reset is unavailable without it.
    pub iam_key: Option<String>,
    pub iam_url: String,
    pub timeout: Duration,
    pub retries: u32,
    pub retry_delay: Duration,
}

impl AppIdConfig {
    pub const DEFAULT_IAM_URL: &'static str = "https://iam.cloud.ibm.com/identity/token";

    /// Reject configurations with a blank required value, naming the first one.
    pub fn validate(&self) -> Result<(), AuthError> {
        let fields = [
            ("APP_ID_URL", &self.url),
            ("APP_ID_CLIENT_ID", &self.client_id),
            ("APP_ID_TENANT_ID", &self.tenant_id),
            ("APP_ID_SECRET", &self.secret),
        ];
        match fields.iter().find(|(_, value)| value.trim().is_empty()) {
            Some((name, _)) => Err(AuthError::Configuration(format!(
                "missing variable '{name}'"
            ))),
            None => Ok(()),
        }
    }

    fn oauth_url(&self) -> String {
        format!("{}/oauth/v4/{}", self.url.trim_end_matches('/'), self.tenant_id)
    }

    fn management_url(&self) -> String {
        format!(
            "{}/management/v4/{}",
            self.url.trim_end_matches('/'),
            self.tenant_id
        )
    }
}

// ============================================================================
// HTTP client
// ============================================================================

#[derive(Deserialize)]
struct IntrospectionWire {
    #[serde(default)]
    active: bool,
    #[serde(default)]
    sub: Option<String>,
    #[serde(default)]
    scope: Option<String>,
}

#[derive(Deserialize)]
struct AccessTokenWire {
    access_token: String,
}

#[derive(Deserialize)]
struct UserSearchWire {
    #[serde(rename = "Resources", default)]
    resources: Vec<UserWire>,
}

#[derive(Deserialize)]
struct UserWire {
    #[serde(default)]
    id: Option<String>,
}

#[derive(Deserialize, Default)]
struct OAuthErrorWire {
    #[serde(default)]
    error_description: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// HTTP client for the identity service.
pub struct AppIdClient {
    http: reqwest::Client,
    cfg: AppIdConfig,
}

impl AppIdClient {
    pub fn new(http: reqwest::Client, cfg: AppIdConfig) -> Self {
        Self { http, cfg }
    }

    /// Send a request, retrying on 5xx or no response with a static delay.
    async fn send_with_retry<F>(&self, build: F) -> Result<reqwest::Response, AuthError>
    where
        F: Fn() -> reqwest::RequestBuilder + Send + Sync,
    {
        let mut attempt = 0;
        loop {
            let result = build().timeout(self.cfg.timeout).send().await;
            let retryable = match &result {
                Ok(response) => response.status().is_server_error(),
                Err(_) => true,
            };
            if retryable && attempt < self.cfg.retries {
                attempt += 1;
                tracing::warn!(attempt, "no usable response from identity service, retrying");
                tokio::time::sleep(self.cfg.retry_delay).await;
                continue;
            }
            return result.map_err(|e| AuthError::Unavailable(e.to_string()));
        }
    }

    async fn upstream_error(response: reqwest::Response) -> AuthError {
        let status = response.status().as_u16();
        let body: OAuthErrorWire = response.json().await.unwrap_or_default();
        AuthError::Upstream {
            status,
            message: body
                .error_description
                .or(body.error)
                .unwrap_or_else(|| format!("identity service answered {status}")),
        }
    }

    async fn iam_token(&self) -> Result<String, AuthError> {
        let Some(api_key) = self.cfg.iam_key.as_deref() else {
            return Err(AuthError::Configuration(
                "missing variable 'APP_ID_IAM_KEY'".into(),
            ));
        };

        let response = self
            .http
            .post(&self.cfg.iam_url)
            .timeout(self.cfg.timeout)
            .header("accept", "application/json")
            .form(&[
                ("grant_type", "urn:ibm:params:oauth:grant-type:apikey"),
                ("apikey", api_key),
            ])
            .send()
            .await
            .map_err(|e| AuthError::Unavailable(format!("Failed to get Cloud IAM token: {e}")))?;
        if !response.status().is_success() {
            return Err(Self::upstream_error(response).await);
        }
        let token: AccessTokenWire = response
            .json()
            .await
            .map_err(|e| AuthError::Unavailable(format!("Failed to get Cloud IAM token: {e}")))?;
        Ok(token.access_token)
    }
}

#[async_trait]
impl IdentityProvider for AppIdClient {
    async fn authorize(&self, token: &str, scope: Option<Scope>) -> Result<Caller, AuthError> {
        let url = format!("{}/introspect", self.cfg.oauth_url());
        let response = self
            .send_with_retry(|| {
                self.http
                    .post(&url)
                    .basic_auth(&self.cfg.client_id, Some(&self.cfg.secret))
                    .form(&[("token", token)])
            })
            .await?;
        if !response.status().is_success() {
            return Err(Self::upstream_error(response).await);
        }

        let wire: IntrospectionWire = response
            .json()
            .await
            .map_err(|e| AuthError::Unavailable(e.to_string()))?;
        let subject = match wire.sub {
            Some(sub) if wire.active && !sub.is_empty() => sub,
            _ => return Err(AuthError::InvalidToken),
        };
        let scopes: Vec<String> = wire
            .scope
            .unwrap_or_default()
            .split_whitespace()
            .map(str::to_string)
            .collect();

        if let Some(required) = scope {
            if !scopes.iter().any(|s| s == required.as_str()) {
                return Err(AuthError::InsufficientScope(required));
            }
        }
        Ok(Caller { subject, scopes })
    }

    async fn login(&self, username: &str, password: &str) -> Result<Value, AuthError> {
        self.cfg.validate()?;
        let url = format!("{}/token", self.cfg.oauth_url());

        tracing::debug!("calling identity service to retrieve auth token");
        let response = self
            .send_with_retry(|| {
                self.http
                    .post(&url)
                    .basic_auth(&self.cfg.client_id, Some(&self.cfg.secret))
                    .header("accept", "application/json")
                    .form(&[
                        ("username", username),
                        ("password", password),
                        ("grant_type", "password"),
                    ])
            })
            .await?;
        if !response.status().is_success() {
            let err = Self::upstream_error(response).await;
            tracing::error!("login request to identity service failed: {}", err);
            return Err(err);
        }

        tracing::info!("login request to identity service was successful");
        response
            .json()
            .await
            .map_err(|e| AuthError::Unavailable(e.to_string()))
    }

    async fn ping(&self) -> Result<(), AuthError> {
        let url = format!("{}/publickeys", self.cfg.oauth_url());
        let response = self
            .http
            .get(&url)
            .timeout(self.cfg.timeout)
            .header("accept", "application/json")
            .send()
            .await
            .map_err(|e| AuthError::Unavailable(e.to_string()))?;
        if response.status().is_success() {
            tracing::info!("identity service health is OK");
            Ok(())
        } else {
            let err = Self::upstream_error(response).await;
            tracing::error!("identity service health is not OK: {}", err);
            Err(err)
        }
    }

    async fn find_user(&self, user_id: &str) -> Result<Option<String>, AuthError> {
        self.cfg.validate()?;
        let iam_token = self.iam_token().await?;
        let url = format!("{}/cloud_directory/Users", self.cfg.management_url());

        let response = self
            .send_with_retry(|| {
                self.http
                    .get(&url)
                    .bearer_auth(&iam_token)
                    .header("accept", "application/json")
                    .query(&[("query", user_id)])
            })
            .await?;
        if !response.status().is_success() {
            return Err(Self::upstream_error(response).await);
        }

        let search: UserSearchWire = response
            .json()
            .await
            .map_err(|e| AuthError::Unavailable(e.to_string()))?;
        Ok(search
            .resources
            .into_iter()
            .next()
            .and_then(|user| user.id)
            .filter(|id| !id.is_empty()))
    }

    async fn send_password_reset(&self, user_uuid: &str) -> Result<(), AuthError> {
        self.cfg.validate()?;
        let iam_token = self.iam_token().await?;
        let url = format!(
            "{}/cloud_directory/resend/RESET_PASSWORD",
            self.cfg.management_url()
        );

        let response = self
            .send_with_retry(|| {
                self.http
                    .post(&url)
                    .bearer_auth(&iam_token)
                    .form(&[("uuid", user_uuid)])
            })
            .await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(Self::upstream_error(response).await)
        }
    }
}
