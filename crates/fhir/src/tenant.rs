//! Onboarded tenants and their FHIR connection settings.
//!
//! The directory is a YAML mapping keyed by tenant id:
//!
//! ```yaml
//! tenant-a:
//!   appIdFhirUrl: https://auth.example.org
//!   appIdFhirTenantId: 0f3c...
//!   appIdFhirClientId: client
//!   appIdFhirClientSecret: secret
//!   appIdFhirHost: https://fhir.example.org
//! ```
//!
//! It is loaded once at startup. A tenant that is absent is "not onboarded"; a tenant with
//! blank or missing fields is a configuration error reported with the field names.

use crate::{FhirError, FhirResult};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// Field names every onboarded tenant must define, in reporting order.
pub const TENANT_FIELDS: [&str; 5] = [
    "appIdFhirUrl",
    "appIdFhirTenantId",
    "appIdFhirClientId",
    "appIdFhirClientSecret",
    "appIdFhirHost",
];

/// Resolved connection settings for one tenant.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TenantConnection {
    /// Identity service base URL used for the client-credentials exchange.
    pub auth_url: String,
    /// Identity-service tenant that fronts the patient-access service.
    pub auth_tenant_id: String,
    pub client_id: String,
    pub client_secret: String,
    /// Patient-access service base URL.
    pub fhir_host: String,
}

#[derive(Clone, Debug, Default, Deserialize)]
struct TenantEntryWire {
    #[serde(rename = "appIdFhirUrl")]
    app_id_fhir_url: Option<String>,
    #[serde(rename = "appIdFhirTenantId")]
    app_id_fhir_tenant_id: Option<String>,
    #[serde(rename = "appIdFhirClientId")]
    app_id_fhir_client_id: Option<String>,
    #[serde(rename = "appIdFhirClientSecret")]
    app_id_fhir_client_secret: Option<String>,
    #[serde(rename = "appIdFhirHost")]
    app_id_fhir_host: Option<String>,
}

/// Tenant directory loaded from YAML.
#[derive(Clone, Debug, Default)]
pub struct TenantDirectory {
    tenants: BTreeMap<String, TenantEntryWire>,
}

impl TenantDirectory {
    /// Load the directory from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns [`FhirError::Io`] if the file cannot be read and [`FhirError::Translation`] if it
    /// does not match the directory schema.
    pub fn load(path: &Path) -> FhirResult<Self> {
        let text = fs::read_to_string(path)?;
        let directory = Self::from_yaml_str(&text)?;
        tracing::info!(
            path = %path.display(),
            tenants = directory.tenants.len(),
            "loaded tenant directory"
        );
        Ok(directory)
    }

    /// Parse the directory from YAML text.
    pub fn from_yaml_str(yaml_text: &str) -> FhirResult<Self> {
        if yaml_text.trim().is_empty() {
            return Ok(Self::default());
        }

        let deserializer = serde_yaml::Deserializer::from_str(yaml_text);
        let tenants = serde_path_to_error::deserialize(deserializer).map_err(|err| {
            let path = err.path().to_string();
            FhirError::Translation(format!(
                "Tenant directory schema mismatch at {path}: {}",
                err.into_inner()
            ))
        })?;
        Ok(Self { tenants })
    }

    pub fn is_empty(&self) -> bool {
        self.tenants.is_empty()
    }

    /// Connection settings for `tenant_id`.
    ///
    /// # Errors
    ///
    /// - [`FhirError::NotOnboarded`] when the tenant is not in the directory.
    /// - [`FhirError::MissingTenantFields`] naming every blank or missing field.
    pub fn resolve(&self, tenant_id: &str) -> FhirResult<TenantConnection> {
        let Some(entry) = self.tenants.get(tenant_id) else {
            tracing::error!("Caller's TenantID {} is not onboarded", tenant_id);
            return Err(FhirError::NotOnboarded(tenant_id.to_string()));
        };

        let values = [
            &entry.app_id_fhir_url,
            &entry.app_id_fhir_tenant_id,
            &entry.app_id_fhir_client_id,
            &entry.app_id_fhir_client_secret,
            &entry.app_id_fhir_host,
        ];
        let missing: Vec<String> = TENANT_FIELDS
            .iter()
            .zip(values.iter())
            .filter(|(_, value)| value.as_deref().is_none_or(|v| v.trim().is_empty()))
            .map(|(name, _)| name.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(FhirError::MissingTenantFields(missing));
        }

        let take = |value: &Option<String>| value.clone().unwrap_or_default();
        Ok(TenantConnection {
            auth_url: take(&entry.app_id_fhir_url),
            auth_tenant_id: take(&entry.app_id_fhir_tenant_id),
            client_id: take(&entry.app_id_fhir_client_id),
            client_secret: take(&entry.app_id_fhir_client_secret),
            fhir_host: take(&entry.app_id_fhir_host),
        })
    }
}
