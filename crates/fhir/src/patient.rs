//! FHIR-aligned patient wire model and profile normalisation.
//!
//! Responsibilities:
//! - Define a lenient wire model for the `Patient` resource returned by the patient-access service
//! - Reduce it to the [`PatientProfile`] the gateway shows to callers
//!
//! Notes:
//! - Unknown elements are ignored; the upstream resource carries far more than is displayed
//! - Only the first `name` entry is used

use crate::FhirError;
use serde::{Deserialize, Serialize};

// ============================================================================
// Public domain-level types
// ============================================================================

/// Display profile for a patient.
///
/// Every field defaults to empty when the resource does not carry it.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatientProfile {
    /// Family name (surname) from the first name entry.
    pub family: String,

    /// Given names from the first name entry.
    pub given: Vec<String>,

    /// Name prefixes (titles) from the first name entry.
    pub prefix: Vec<String>,

    /// First telecom value whose system is `email`.
    pub email: String,
}

// ============================================================================
// Public Patient operations
// ============================================================================

/// Patient resource operations.
///
/// This is a zero-sized type used for namespacing patient-related operations.
pub struct Patient;

impl Patient {
    /// Parse a FHIR `Patient` JSON resource into a display profile.
    ///
    /// Uses `serde_path_to_error` to report the path (e.g. `name[0].given`) of the first element
    /// that does not match the wire model.
    ///
    /// # Errors
    ///
    /// Returns [`FhirError`] if:
    /// - the text is not JSON or a modelled element has an unexpected type,
    /// - `resourceType` is present and is not `"Patient"`.
    pub fn parse_json(json_text: &str) -> Result<PatientProfile, FhirError> {
        let mut deserializer = serde_json::Deserializer::from_str(json_text);

        let wire = match serde_path_to_error::deserialize::<_, PatientWire>(&mut deserializer) {
            Ok(parsed) => parsed,
            Err(err) => {
                let path = err.path().to_string();
                let source = err.into_inner();
                let path = if path.is_empty() || path == "." {
                    "<root>"
                } else {
                    path.as_str()
                };
                return Err(FhirError::Translation(format!(
                    "Patient schema mismatch at {path}: {source}"
                )));
            }
        };

        if let Some(resource_type) = wire.resource_type.as_deref() {
            if resource_type != "Patient" {
                return Err(FhirError::InvalidInput(format!(
                    "Expected resourceType 'Patient', got '{resource_type}'"
                )));
            }
        }

        Ok(Self::profile(wire))
    }

    fn profile(wire: PatientWire) -> PatientProfile {
        let mut profile = PatientProfile::default();

        if let Some(name) = wire.name.into_iter().next() {
            profile.family = name.family.unwrap_or_default();
            profile.given = name.given;
            profile.prefix = name.prefix;
        }

        profile.email = wire
            .telecom
            .into_iter()
            .find(|entry| entry.system.as_deref() == Some("email"))
            .and_then(|entry| entry.value)
            .unwrap_or_default();

        profile
    }
}

// ============================================================================
// Wire types (internal)
// ============================================================================

#[derive(Clone, Debug, Deserialize)]
struct PatientWire {
    #[serde(rename = "resourceType", default)]
    resource_type: Option<String>,

    #[serde(default)]
    name: Vec<HumanNameWire>,

    #[serde(default)]
    telecom: Vec<ContactPointWire>,
}

#[derive(Clone, Debug, Deserialize)]
struct HumanNameWire {
    #[serde(default)]
    family: Option<String>,

    #[serde(default)]
    given: Vec<String>,

    #[serde(default)]
    prefix: Vec<String>,
}

#[derive(Clone, Debug, Deserialize)]
struct ContactPointWire {
    #[serde(default)]
    system: Option<String>,

    #[serde(default)]
    value: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extracts_first_name_and_email() {
        let input = r#"{
            "resourceType": "Patient",
            "id": "p-1",
            "name": [
                {"use": "official", "family": "Williams", "given": ["Sarah", "Jane"], "prefix": ["Dr"]},
                {"use": "nickname", "given": ["Sally"]}
            ],
            "telecom": [
                {"system": "phone", "value": "555-0100"},
                {"system": "email", "value": "sarah@example.org"}
            ],
            "birthDate": "1992-03-20"
        }"#;

        let profile = Patient::parse_json(input).expect("parse patient");
        assert_eq!(
            profile,
            PatientProfile {
                family: "Williams".into(),
                given: vec!["Sarah".into(), "Jane".into()],
                prefix: vec!["Dr".into()],
                email: "sarah@example.org".into(),
            }
        );
    }

    #[test]
    fn test_minimal_patient_defaults_to_empty() {
        let profile = Patient::parse_json(r#"{"resourceType": "Patient"}"#).unwrap();
        assert_eq!(profile, PatientProfile::default());
    }

    #[test]
    fn test_missing_family_and_email_are_empty_strings() {
        let input = r#"{"name": [{"given": ["Ann"]}], "telecom": [{"system": "phone", "value": "1"}]}"#;
        let profile = Patient::parse_json(input).unwrap();
        assert_eq!(profile.family, "");
        assert_eq!(profile.given, vec!["Ann"]);
        assert_eq!(profile.email, "");
    }

    #[test]
    fn test_rejects_other_resource_types() {
        let err = Patient::parse_json(r#"{"resourceType": "Observation"}"#).unwrap_err();
        match err {
            FhirError::InvalidInput(msg) => assert!(msg.contains("Observation")),
            other => panic!("expected InvalidInput error, got {other:?}"),
        }
    }

    #[test]
    fn test_wrong_type_reports_path() {
        let input = r#"{"resourceType": "Patient", "name": [{"given": "Sarah"}]}"#;
        let err = Patient::parse_json(input).unwrap_err();
        match err {
            FhirError::Translation(msg) => assert!(msg.contains("given"), "{msg}"),
            other => panic!("expected Translation error, got {other:?}"),
        }
    }
}
