//! Consent record types.
//!
//! [`ConsentRecord`] is the canonical, ledger-ready shape produced by the validator. Every field
//! is a string because chaincode arguments are positional strings; list-valued fields
//! (`DatatypeIDs`, `ConsentOption`) are carried as their JSON-array text.

use crate::constants::DEFAULT_PAGE_SIZE;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;

/// The persisted unit written to and read back from the ledger.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsentRecord {
    #[serde(rename = "ConsentID", deserialize_with = "lenient_string")]
    pub consent_id: String,
    #[serde(rename = "PatientID", deserialize_with = "lenient_string")]
    pub patient_id: String,
    #[serde(rename = "ServiceID", deserialize_with = "lenient_string")]
    pub service_id: String,
    #[serde(rename = "TenantID", deserialize_with = "lenient_string")]
    pub tenant_id: String,
    #[serde(rename = "DatatypeIDs", deserialize_with = "lenient_string")]
    pub datatype_ids: String,
    #[serde(rename = "ConsentOption", deserialize_with = "lenient_string")]
    pub consent_option: String,
    #[serde(rename = "Creation", deserialize_with = "lenient_string")]
    pub creation: String,
    #[serde(rename = "Expiration", deserialize_with = "lenient_string")]
    pub expiration: String,
    #[serde(rename = "FHIRResourceID", deserialize_with = "lenient_string")]
    pub fhir_resource_id: String,
    #[serde(rename = "FHIRResourceVersion", deserialize_with = "lenient_string")]
    pub fhir_resource_version: String,
    #[serde(rename = "FHIRPolicy", deserialize_with = "lenient_string")]
    pub fhir_policy: String,
    #[serde(rename = "FHIRStatus", deserialize_with = "lenient_string")]
    pub fhir_status: String,
    #[serde(rename = "FHIRProvisionType", deserialize_with = "lenient_string")]
    pub fhir_provision_type: String,
    #[serde(rename = "FHIRProvisionAction", deserialize_with = "lenient_string")]
    pub fhir_provision_action: String,
    #[serde(rename = "FHIRPerformerIDSystem", deserialize_with = "lenient_string")]
    pub fhir_performer_id_system: String,
    #[serde(rename = "FHIRPerformerIDValue", deserialize_with = "lenient_string")]
    pub fhir_performer_id_value: String,
    #[serde(rename = "FHIRPerformerDisplay", deserialize_with = "lenient_string")]
    pub fhir_performer_display: String,
    #[serde(rename = "FHIRRecipientIDSystem", deserialize_with = "lenient_string")]
    pub fhir_recipient_id_system: String,
    #[serde(rename = "FHIRRecipientIDValue", deserialize_with = "lenient_string")]
    pub fhir_recipient_id_value: String,
    #[serde(rename = "FHIRRecipientDisplay", deserialize_with = "lenient_string")]
    pub fhir_recipient_display: String,
}

impl ConsentRecord {
    /// Positional `CreateConsent` arguments in the canonical field order.
    pub fn to_chaincode_args(&self) -> Vec<String> {
        [
            &self.consent_id,
            &self.patient_id,
            &self.service_id,
            &self.tenant_id,
            &self.datatype_ids,
            &self.consent_option,
            &self.creation,
            &self.expiration,
            &self.fhir_resource_id,
            &self.fhir_resource_version,
            &self.fhir_policy,
            &self.fhir_status,
            &self.fhir_provision_type,
            &self.fhir_provision_action,
            &self.fhir_performer_id_system,
            &self.fhir_performer_id_value,
            &self.fhir_performer_display,
            &self.fhir_recipient_id_system,
            &self.fhir_recipient_id_value,
            &self.fhir_recipient_display,
        ]
        .into_iter()
        .cloned()
        .collect()
    }

    /// Mutable access to an optional FHIR string field by its wire name.
    pub(crate) fn fhir_field_mut(&mut self, name: &str) -> Option<&mut String> {
        let field = match name {
            "FHIRResourceID" => &mut self.fhir_resource_id,
            "FHIRResourceVersion" => &mut self.fhir_resource_version,
            "FHIRPolicy" => &mut self.fhir_policy,
            "FHIRStatus" => &mut self.fhir_status,
            "FHIRProvisionType" => &mut self.fhir_provision_type,
            "FHIRProvisionAction" => &mut self.fhir_provision_action,
            "FHIRPerformerIDSystem" => &mut self.fhir_performer_id_system,
            "FHIRPerformerIDValue" => &mut self.fhir_performer_id_value,
            "FHIRPerformerDisplay" => &mut self.fhir_performer_display,
            "FHIRRecipientIDSystem" => &mut self.fhir_recipient_id_system,
            "FHIRRecipientIDValue" => &mut self.fhir_recipient_id_value,
            "FHIRRecipientDisplay" => &mut self.fhir_recipient_display,
            _ => return None,
        };
        Some(field)
    }
}

/// Ledger values are read as strings; non-string JSON is kept as its JSON text and `null` as
/// the empty string, so one odd field does not fail a whole page.
fn lenient_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::Null => String::new(),
        Value::String(s) => s,
        other => other.to_string(),
    })
}

/// One page of consents plus the cursor for the next page.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryResult {
    #[serde(default)]
    pub records: Vec<ConsentRecord>,
    #[serde(default)]
    pub bookmark: String,
}

/// Page size for consent queries, always within `1..=DEFAULT_PAGE_SIZE`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PageSize(u32);

impl PageSize {
    /// Clamp a raw query-string value; anything outside `1..=50` becomes 50.
    pub fn from_query(raw: Option<&str>) -> Self {
        let parsed = raw.and_then(|v| v.trim().parse::<i64>().ok());
        match parsed {
            Some(n) if n > 0 && n <= i64::from(DEFAULT_PAGE_SIZE) => Self(n as u32),
            _ => Self::default(),
        }
    }

    pub fn get(self) -> u32 {
        self.0
    }
}

impl Default for PageSize {
    fn default() -> Self {
        Self(DEFAULT_PAGE_SIZE)
    }
}

impl fmt::Display for PageSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
