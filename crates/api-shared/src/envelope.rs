//! Response envelopes shared by all handlers.
//!
//! Every endpoint answers with a stable `{msg, status}` shape (consent routes) or
//! `{message, currentTime}` / `{error: {message}, currentTime}` (health and user routes), so
//! clients can handle success and failure the same way.

use chrono::{SecondsFormat, Utc};
use consent_core::ConsentRecord;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

/// Failure category reported by consent writes.
pub const CONSENT_FAILURE_TYPE: &str = "Consent";

/// Current time as an RFC 3339 string with millisecond precision.
pub fn current_time() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Consent submission as documented for clients.
///
/// Handlers accept any JSON body and validate it themselves, so this type only describes the
/// fields that are read.
#[derive(Clone, Debug, Default, Serialize, Deserialize, ToSchema)]
pub struct ConsentReq {
    #[serde(rename = "PatientID")]
    pub patient_id: String,
    #[serde(rename = "ServiceID")]
    pub service_id: Option<String>,
    #[serde(rename = "TenantID")]
    pub tenant_id: String,
    #[serde(rename = "DatatypeIDs")]
    pub datatype_ids: Vec<String>,
    /// Up to two of `write`, `read`, `deny`; `deny` stands alone.
    #[serde(rename = "ConsentOption")]
    pub consent_option: Option<Vec<String>>,
    /// Epoch milliseconds, numeric string or date string.
    #[serde(rename = "Creation")]
    #[schema(value_type = Object)]
    pub creation: Value,
    #[serde(rename = "Expiration")]
    #[schema(value_type = Option<Object>)]
    pub expiration: Option<Value>,
    #[serde(rename = "FHIRResourceID")]
    pub fhir_resource_id: Option<String>,
    #[serde(rename = "FHIRResourceVersion")]
    pub fhir_resource_version: Option<String>,
    #[serde(rename = "FHIRPolicy")]
    pub fhir_policy: Option<String>,
    #[serde(rename = "FHIRStatus")]
    pub fhir_status: Option<String>,
    #[serde(rename = "FHIRProvisionType")]
    pub fhir_provision_type: Option<String>,
    #[serde(rename = "FHIRProvisionAction")]
    pub fhir_provision_action: Option<String>,
    #[serde(rename = "FHIRPerformerIDSystem")]
    pub fhir_performer_id_system: Option<String>,
    #[serde(rename = "FHIRPerformerIDValue")]
    pub fhir_performer_id_value: Option<String>,
    #[serde(rename = "FHIRPerformerDisplay")]
    pub fhir_performer_display: Option<String>,
    #[serde(rename = "FHIRRecipientIDSystem")]
    pub fhir_recipient_id_system: Option<String>,
    #[serde(rename = "FHIRRecipientIDValue")]
    pub fhir_recipient_id_value: Option<String>,
    #[serde(rename = "FHIRRecipientDisplay")]
    pub fhir_recipient_display: Option<String>,
}

/// Response to consent create and revoke.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ConsentRes {
    pub msg: String,
    /// The submitted bodies that were recorded.
    #[schema(value_type = Vec<Object>)]
    pub successes: Vec<Value>,
    /// The submitted bodies that could not be recorded.
    #[schema(value_type = Vec<Object>)]
    pub failures: Vec<Value>,
    pub status: u16,
    pub failure_type: String,
}

impl ConsentRes {
    pub fn success(msg: impl Into<String>, input: Value) -> Self {
        Self {
            msg: msg.into(),
            successes: vec![input],
            failures: vec![],
            status: 200,
            failure_type: String::new(),
        }
    }

    /// The submission was rejected before anything was attempted.
    pub fn rejected(msg: impl Into<String>) -> Self {
        Self {
            msg: msg.into(),
            successes: vec![],
            failures: vec![],
            status: 400,
            failure_type: CONSENT_FAILURE_TYPE.to_string(),
        }
    }

    /// The submission was valid but could not be recorded.
    pub fn failed(msg: impl Into<String>, input: Value) -> Self {
        Self {
            msg: msg.into(),
            successes: vec![],
            failures: vec![input],
            status: 500,
            failure_type: CONSENT_FAILURE_TYPE.to_string(),
        }
    }
}

/// One page of a patient's consents.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct QueryRes {
    pub msg: String,
    pub status: u16,
    #[schema(value_type = Vec<Object>)]
    pub payload: Vec<ConsentRecord>,
    /// Opaque cursor for the next page.
    pub bookmark: String,
}

/// Plain `{msg, status}` envelope.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct MessageRes {
    pub msg: String,
    pub status: u16,
}

impl MessageRes {
    pub fn new(status: u16, msg: impl Into<String>) -> Self {
        Self {
            msg: msg.into(),
            status,
        }
    }
}

/// Display profile of a patient.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct PatientProfileRes {
    pub family: String,
    pub given: Vec<String>,
    pub prefix: Vec<String>,
    pub email: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct PatientRes {
    pub msg: String,
    pub status: u16,
    pub payload: PatientProfileRes,
}

/// Health and liveness result.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct HealthRes {
    pub message: String,
    #[serde(rename = "currentTime")]
    pub current_time: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ErrorBody {
    pub message: String,
}

/// Failure envelope used by the user routes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ErrorRes {
    pub error: ErrorBody,
    #[serde(rename = "currentTime")]
    pub current_time: String,
}

impl ErrorRes {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            error: ErrorBody {
                message: message.into(),
            },
            current_time: current_time(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct LoginReq {
    pub email: String,
    pub password: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct ForgotPasswordReq {
    #[serde(rename = "userId")]
    pub user_id: String,
}
