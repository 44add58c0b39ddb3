//! FHIR boundary support for the consent gateway.
//!
//! This crate provides the **wire models** and **outbound client** used to look up patient
//! demographics from a tenant's FHIR patient-access service:
//! - a lenient FHIR `Patient` JSON wire model and its normalisation into a display profile
//! - the directory of onboarded tenants and their FHIR connection settings (YAML)
//! - the patient metadata client (token exchange, patient read, audit logging)
//!
//! Only the handful of `Patient` elements the gateway displays are modelled; everything else in
//! the resource is ignored.

pub mod client;
pub mod patient;
pub mod tenant;

pub use client::{ClientSettings, PatientLookup, PatientMetadataClient};
pub use patient::{Patient, PatientProfile};
pub use tenant::{TenantConnection, TenantDirectory};

/// Errors returned by the `fhir` boundary crate.
#[derive(Debug, thiserror::Error)]
pub enum FhirError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("invalid YAML: {0}")]
    InvalidYaml(#[from] serde_yaml::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("translation error: {0}")]
    Translation(String),

    #[error("Caller's {0} is not onboarded")]
    NotOnboarded(String),

    #[error("Please check configuration, the following variables are empty: {0:?}")]
    MissingTenantFields(Vec<String>),

    /// The identity or patient service answered with a failure status.
    #[error("{message}")]
    Upstream { status: u16, message: String },

    #[error("Failed to reach patient service: {0}")]
    Unavailable(String),
}

impl FhirError {
    /// Status reported by the upstream service, when one was received.
    pub fn upstream_status(&self) -> Option<u16> {
        match self {
            FhirError::Upstream { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Type alias for Results that can fail with a [`FhirError`].
pub type FhirResult<T> = Result<T, FhirError>;
