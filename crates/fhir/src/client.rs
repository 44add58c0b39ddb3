//! Patient metadata client.
//!
//! Looks a patient up in a tenant's patient-access service:
//!
//! 1. Exchange the tenant's client credentials for an access token at
//!    `<auth_url>/oauth/v4/<auth_tenant_id>/token` (retried on 5xx or no response).
//! 2. `GET <fhir_host>/patient-access-support/v4/Patient/<id>` with that token.
//! 3. Reduce the resource to a [`PatientProfile`] and write an audit line.
//!
//! An upstream 404 is a normal outcome ([`PatientLookup::NotFound`]), not an error.

use crate::patient::{Patient, PatientProfile};
use crate::tenant::TenantConnection;
use crate::{FhirError, FhirResult};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::Utc;
use serde::Deserialize;
use std::time::Duration;

const PATIENT_ROUTE: &str = "patient-access-support/v4/Patient";

/// Timeouts and retry policy for outbound identity calls.
#[derive(Clone, Copy, Debug)]
pub struct ClientSettings {
    pub timeout: Duration,
    /// Extra attempts after the first failed token request.
    pub retries: u32,
    pub retry_delay: Duration,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(10_000),
            retries: 1,
            retry_delay: Duration::from_millis(3_000),
        }
    }
}

/// Outcome of a patient lookup.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PatientLookup {
    Found(PatientProfile),
    NotFound,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// Client for tenant patient-access services.
#[derive(Clone)]
pub struct PatientMetadataClient {
    http: reqwest::Client,
    settings: ClientSettings,
}

impl PatientMetadataClient {
    pub fn new(http: reqwest::Client, settings: ClientSettings) -> Self {
        Self { http, settings }
    }

    /// Fetch the display profile for `patient_id` on behalf of `caller_id`.
    ///
    /// # Errors
    ///
    /// - [`FhirError::Upstream`] when the identity or patient service answers with a failure
    ///   status other than 404.
    /// - [`FhirError::Unavailable`] when a service cannot be reached.
    /// - [`FhirError::Translation`] when the patient resource cannot be read.
    pub async fn lookup(
        &self,
        tenant: &TenantConnection,
        tenant_id: &str,
        patient_id: &str,
        caller_id: &str,
    ) -> FhirResult<PatientLookup> {
        let credentials = STANDARD.encode(format!("{}:{}", tenant.client_id, tenant.client_secret));

        tracing::debug!("attempting to authenticate with patient-access service");
        let access_token = self.client_credentials_token(tenant, &credentials).await?;

        tracing::debug!("attempting to query patient-access service");
        let url = format!(
            "{}/{PATIENT_ROUTE}/{patient_id}",
            tenant.fhir_host.trim_end_matches('/')
        );
        let response = self
            .http
            .get(&url)
            .timeout(self.settings.timeout)
            .header("x-introspect-basic-authorization-header", &credentials)
            .header("x-fhir-tenant-id", tenant_id)
            .bearer_auth(&access_token)
            .send()
            .await
            .map_err(|e| FhirError::Unavailable(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| FhirError::Unavailable(e.to_string()))?;

        if status.as_u16() == 404 {
            tracing::warn!("Failed to retrieve patient metadata: {}", body);
            return Ok(PatientLookup::NotFound);
        }
        if !status.is_success() {
            tracing::error!("Failed to retrieve patient metadata: {}", body);
            return Err(FhirError::Upstream {
                status: status.as_u16(),
                message: "Failed to retrieve patient metadata".to_string(),
            });
        }

        let profile = Patient::parse_json(&body)?;
        audit_patient_access(caller_id, patient_id, &profile);
        Ok(PatientLookup::Found(profile))
    }

    async fn client_credentials_token(
        &self,
        tenant: &TenantConnection,
        credentials: &str,
    ) -> FhirResult<String> {
        let url = format!(
            "{}/oauth/v4/{}/token",
            tenant.auth_url.trim_end_matches('/'),
            tenant.auth_tenant_id
        );

        let mut attempt = 0;
        loop {
            let result = self
                .http
                .post(&url)
                .timeout(self.settings.timeout)
                .header("Authorization", format!("Basic {credentials}"))
                .form(&[("grant_type", "client_credentials"), ("scope", "openId")])
                .send()
                .await;

            let retryable = match &result {
                Ok(response) => response.status().is_server_error(),
                Err(_) => true,
            };
            if retryable && attempt < self.settings.retries {
                attempt += 1;
                tracing::warn!(attempt, "no usable response from identity service, retrying token request");
                tokio::time::sleep(self.settings.retry_delay).await;
                continue;
            }

            let response = result.map_err(|e| FhirError::Unavailable(e.to_string()))?;
            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                tracing::error!("token request to identity service failed: {}", body);
                return Err(FhirError::Upstream {
                    status: status.as_u16(),
                    message: format!("Failed to authenticate with patient-access service: {status}"),
                });
            }

            let token: TokenResponse = response
                .json()
                .await
                .map_err(|e| FhirError::Translation(e.to_string()))?;
            return Ok(token.access_token);
        }
    }
}

/// Record that `caller_id` read the demographics of `patient_id`.
fn audit_patient_access(caller_id: &str, patient_id: &str, profile: &PatientProfile) {
    tracing::info!(
        target: "audit",
        caller = %caller_id,
        timestamp = Utc::now().timestamp(),
        patient_id = %patient_id,
        prefix = ?profile.prefix,
        given = ?profile.given,
        family = %profile.family,
        email = %profile.email,
        "patient information accessed"
    );
}
