//! Constants used throughout the consent core crate.
//!
//! Chaincode function names, collaborator header names and the fixed field
//! order of the canonical consent record live here so that the validator, the
//! ledger writer and the HTTP layer agree on them.

/// Chaincode function that appends a consent record.
pub const CREATE_CONSENT_FN: &str = "CreateConsent";

/// Chaincode function that pages through a patient's consents.
pub const QUERY_CONSENT_FN: &str = "QueryConsentWithPagination";

/// Chaincode function used as a liveness probe.
pub const PING_FN: &str = "Ping";

/// Header carrying the patient identifier on query requests.
pub const PATIENT_ID_HEADER: &str = "x-cm-patientid";

/// Header carrying the tenant identifier to downstream services.
pub const TENANT_ID_HEADER: &str = "x-cm-tenantid";

/// Header carrying the per-request correlation identifier.
pub const TRANSACTION_ID_HEADER: &str = "x-cm-txn-id";

/// Default and maximum page size for consent queries.
pub const DEFAULT_PAGE_SIZE: u32 = 50;

/// Maximum number of entries in `ConsentOption`.
pub const MAX_CONSENT_OPTIONS: usize = 2;

/// Accepted `ConsentOption` values.
pub const CONSENT_OPTIONS: [&str; 3] = ["write", "read", "deny"];

/// Optional FHIR provenance fields, in validation and ledger argument order.
pub const FHIR_STRING_FIELDS: [&str; 12] = [
    "FHIRResourceID",
    "FHIRResourceVersion",
    "FHIRPolicy",
    "FHIRStatus",
    "FHIRProvisionType",
    "FHIRProvisionAction",
    "FHIRPerformerIDSystem",
    "FHIRPerformerIDValue",
    "FHIRPerformerDisplay",
    "FHIRRecipientIDSystem",
    "FHIRRecipientIDValue",
    "FHIRRecipientDisplay",
];

/// Fields the de-identifier restores during batch re-identification.
pub const FIELDS_TO_IDENTIFY: [&str; 2] = ["PatientID", "ServiceID"];
