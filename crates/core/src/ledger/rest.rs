//! Ledger gateway over HTTP.
//!
//! Sessions talk to a ledger gateway that exposes chaincode evaluate/submit as REST calls:
//!
//! ```text
//! POST <gateway>/channels/<channel>/chaincodes/<chaincode>/evaluate   {function, args}
//! POST <gateway>/channels/<channel>/chaincodes/<chaincode>/submit     {function, args}
//! ```
//!
//! Calls carry the enrolled admin identity: the admin id plus its base64 certificate as a bearer
//! credential. The gateway holds the signing key. Certificates come from an in-memory cache or,
//! when the cache is empty or bypassed, from enrollment against the certificate authority.

use super::{CredentialMode, LedgerConnector, LedgerSession};
use crate::config::LedgerConfig;
use crate::LedgerError;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;

/// An enrolled ledger identity. Any key material in the enrollment answer is not read.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct IdentityCredentials {
    pub certificate: String,
}

/// Source of ledger identity credentials.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn credentials(&self, mode: CredentialMode) -> Result<IdentityCredentials, LedgerError>;
}

/// Enrolls the admin identity with the certificate authority and caches the result.
pub struct CaEnrollment {
    http: reqwest::Client,
    ca_url: String,
    admin_id: String,
    admin_secret: String,
    cache: RwLock<Option<IdentityCredentials>>,
}

impl CaEnrollment {
    pub fn new(http: reqwest::Client, cfg: &LedgerConfig) -> Self {
        Self {
            http,
            ca_url: cfg.ca_url.trim_end_matches('/').to_string(),
            admin_id: cfg.admin_id.clone(),
            admin_secret: cfg.admin_secret.clone(),
            cache: RwLock::new(None),
        }
    }

    async fn enroll(&self) -> Result<IdentityCredentials, LedgerError> {
        tracing::debug!(admin_id = %self.admin_id, "enrolling ledger identity with CA");
        let response = self
            .http
            .post(format!("{}/api/v1/enroll", self.ca_url))
            .basic_auth(&self.admin_id, Some(&self.admin_secret))
            .send()
            .await
            .map_err(|e| LedgerError::Enrollment(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LedgerError::Enrollment(format!("status {status}: {body}")));
        }

        let credentials = response
            .json::<IdentityCredentials>()
            .await
            .map_err(|e| LedgerError::Enrollment(e.to_string()))?;
        tracing::info!(admin_id = %self.admin_id, "successfully enrolled ledger identity");
        Ok(credentials)
    }
}

#[async_trait]
impl CredentialProvider for CaEnrollment {
    async fn credentials(&self, mode: CredentialMode) -> Result<IdentityCredentials, LedgerError> {
        if mode == CredentialMode::Cached {
            if let Some(cached) = self.cache.read().await.clone() {
                return Ok(cached);
            }
        }

        let fresh = self.enroll().await?;
        *self.cache.write().await = Some(fresh.clone());
        Ok(fresh)
    }
}

/// Connector producing [`RestLedgerSession`]s.
pub struct RestLedgerConnector {
    http: reqwest::Client,
    chaincode_url: String,
    admin_id: String,
    credentials: Arc<dyn CredentialProvider>,
}

impl RestLedgerConnector {
    pub fn new(
        http: reqwest::Client,
        cfg: &LedgerConfig,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Self {
        Self {
            http,
            chaincode_url: cfg.chaincode_url(),
            admin_id: cfg.admin_id.clone(),
            credentials,
        }
    }
}

#[async_trait]
impl LedgerConnector for RestLedgerConnector {
    async fn connect(&self, mode: CredentialMode) -> Result<Arc<dyn LedgerSession>, LedgerError> {
        let credentials = self.credentials.credentials(mode).await?;
        Ok(Arc::new(RestLedgerSession {
            http: self.http.clone(),
            chaincode_url: self.chaincode_url.clone(),
            identity: self.admin_id.clone(),
            certificate: STANDARD.encode(credentials.certificate.as_bytes()),
        }))
    }
}

#[derive(Serialize)]
struct TransactionRequest<'a> {
    function: &'a str,
    args: &'a [String],
}

/// A session bound to one enrolled identity.
pub struct RestLedgerSession {
    http: reqwest::Client,
    chaincode_url: String,
    identity: String,
    certificate: String,
}

impl RestLedgerSession {
    async fn post(
        &self,
        action: &str,
        function: &str,
        args: &[String],
    ) -> Result<String, LedgerError> {
        let response = self
            .http
            .post(format!("{}/{action}", self.chaincode_url))
            .header("x-ledger-identity", &self.identity)
            .bearer_auth(&self.certificate)
            .json(&TransactionRequest { function, args })
            .send()
            .await
            .map_err(|e| LedgerError::Transport(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| LedgerError::Transport(e.to_string()))?;

        if status.is_success() {
            Ok(body)
        } else if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            Err(LedgerError::AccessDenied(body))
        } else {
            Err(LedgerError::Rejected(body))
        }
    }
}

#[async_trait]
impl LedgerSession for RestLedgerSession {
    async fn evaluate(&self, function: &str, args: &[String]) -> Result<String, LedgerError> {
        self.post("evaluate", function, args).await
    }

    async fn submit(&self, function: &str, args: &[String]) -> Result<(), LedgerError> {
        self.post("submit", function, args).await.map(|_| ())
    }

    async fn disconnect(&self) {
        tracing::debug!(identity = %self.identity, "closing ledger gateway session");
    }
}
