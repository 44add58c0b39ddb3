//! Consent submission validation and normalisation.
//!
//! A raw submission is checked against an ordered list of named rules. The first failing rule
//! wins, so the order below is part of the contract: clients see the same message for the same
//! defect every time. Rules are pure predicates over the request body and can be exercised on
//! their own.
//!
//! A submission that passes every rule is normalised into a [`ConsentRecord`]: optional strings
//! become empty strings, list fields become JSON-array text and timestamps become strings.

use crate::constants::{CONSENT_OPTIONS, FHIR_STRING_FIELDS, MAX_CONSENT_OPTIONS};
use crate::{ConsentError, ConsentRecord, ConsentResult};
use chrono::{DateTime, NaiveDate, Utc};
use serde_json::{Map, Value};

/// A validation rule: `Ok(())` or the client-facing failure message.
pub type Rule = fn(&Map<String, Value>) -> Result<(), String>;

/// Rules in evaluation order.
pub const RULES: [(&str, Rule); 7] = [
    ("required_fields", required_fields),
    ("datatype_ids", datatype_ids),
    ("consent_option", consent_option),
    ("creation", creation),
    ("expiration", expiration),
    ("fhir_strings", fhir_strings),
    ("option_or_provision", option_or_provision),
];

const REQUIRED_FIELDS: [&str; 4] = ["PatientID", "TenantID", "DatatypeIDs", "Creation"];

const PROVISION_FIELDS: [&str; 3] = ["FHIRStatus", "FHIRProvisionType", "FHIRProvisionAction"];

/// Validate a raw consent submission and build its canonical record.
///
/// `correlation_id` becomes the record's `ConsentID`; any `ConsentID` in the body is ignored.
///
/// # Errors
///
/// Returns [`ConsentError::Validation`] carrying the first failing rule's message.
pub fn validate_consent(input: &Value, correlation_id: &str) -> ConsentResult<ConsentRecord> {
    let empty = Map::new();
    let body = input.as_object().unwrap_or(&empty);

    for (name, rule) in RULES {
        if let Err(message) = rule(body) {
            tracing::debug!(rule = name, %correlation_id, "consent validation failed");
            return Err(ConsentError::Validation(message));
        }
    }

    Ok(normalise(body, correlation_id))
}

fn normalise(body: &Map<String, Value>, correlation_id: &str) -> ConsentRecord {
    let mut record = ConsentRecord {
        consent_id: correlation_id.to_string(),
        patient_id: plain_string(body.get("PatientID")),
        service_id: plain_string(body.get("ServiceID")),
        tenant_id: plain_string(body.get("TenantID")),
        datatype_ids: json_text(body.get("DatatypeIDs")),
        consent_option: match body.get("ConsentOption") {
            Some(options @ Value::Array(_)) => options.to_string(),
            _ => r#"[""]"#.to_string(),
        },
        creation: plain_string(body.get("Creation")),
        expiration: if is_truthy(body.get("Expiration")) {
            plain_string(body.get("Expiration"))
        } else {
            "0".to_string()
        },
        ..Default::default()
    };

    for name in FHIR_STRING_FIELDS {
        if let (Some(field), Some(Value::String(value))) =
            (record.fhir_field_mut(name), body.get(name))
        {
            *field = value.clone();
        }
    }

    record
}

// ============================================================================
// RULES
// ============================================================================

pub(crate) fn required_fields(body: &Map<String, Value>) -> Result<(), String> {
    if REQUIRED_FIELDS
        .iter()
        .all(|field| is_truthy(body.get(*field)))
    {
        Ok(())
    } else {
        Err("Missing required field(s)".into())
    }
}

pub(crate) fn datatype_ids(body: &Map<String, Value>) -> Result<(), String> {
    match body.get("DatatypeIDs") {
        Some(Value::Array(ids)) if ids.is_empty() => Err("DatatypeIDs must not be empty".into()),
        Some(Value::Array(_)) => Ok(()),
        _ => Err("DatatypeIDs must be array".into()),
    }
}

pub(crate) fn consent_option(body: &Map<String, Value>) -> Result<(), String> {
    let value = body.get("ConsentOption");
    if !is_truthy(value) {
        return Ok(());
    }
    let Some(Value::Array(options)) = value else {
        return Err("ConsentOption must be array".into());
    };

    if options.len() > MAX_CONSENT_OPTIONS {
        return Err("Too many consent options".into());
    }

    let valid = options
        .iter()
        .all(|opt| opt.as_str().is_some_and(|s| CONSENT_OPTIONS.contains(&s)));
    if !valid {
        return Err("invalid consent option".into());
    }

    let has = |wanted: &str| options.iter().any(|opt| opt.as_str() == Some(wanted));
    if has("deny") && (has("write") || has("read")) {
        return Err("deny cannot be paired with another consent option".into());
    }

    Ok(())
}

pub(crate) fn creation(body: &Map<String, Value>) -> Result<(), String> {
    match body.get("Creation").and_then(timestamp_millis) {
        Some(ms) if ms > 0 => Ok(()),
        _ => Err("Creation has invalid unix timestamp".into()),
    }
}

pub(crate) fn expiration(body: &Map<String, Value>) -> Result<(), String> {
    let value = body.get("Expiration");
    if !is_truthy(value) {
        return Ok(());
    }
    match value.and_then(timestamp_millis) {
        Some(ms) if ms >= 0 => Ok(()),
        _ => Err("Invalid Expiration".into()),
    }
}

pub(crate) fn fhir_strings(body: &Map<String, Value>) -> Result<(), String> {
    for name in FHIR_STRING_FIELDS {
        match body.get(name) {
            None | Some(Value::Null) => {}
            Some(Value::String(s)) if s.is_empty() => {
                return Err(format!("{name} must not be empty"));
            }
            Some(Value::String(_)) => {}
            Some(_) => return Err(format!("{name} must be string")),
        }
    }
    Ok(())
}

pub(crate) fn option_or_provision(body: &Map<String, Value>) -> Result<(), String> {
    let provision = PROVISION_FIELDS
        .iter()
        .all(|field| is_truthy(body.get(*field)));
    let has_option = matches!(body.get("ConsentOption"), Some(Value::Array(o)) if !o.is_empty());

    if provision || has_option {
        Ok(())
    } else {
        Err("Must specify at least one consent option".into())
    }
}

// ============================================================================
// HELPERS
// ============================================================================

/// Presence test for request fields: absent, null, `false`, `0` and `""` count as missing.
fn is_truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0),
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Array(_)) | Some(Value::Object(_)) => true,
    }
}

/// String form of a scalar field: strings verbatim, numbers as decimal text, everything else as
/// JSON text.
fn plain_string(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => number_text(n),
        Some(other) => other.to_string(),
    }
}

/// Integral floats print without a fraction or exponent (`1.7e12` becomes `1700000000000`).
fn number_text(n: &serde_json::Number) -> String {
    match n.as_f64() {
        Some(f) if !n.is_i64() && !n.is_u64() && f.fract() == 0.0 && f.abs() < 1e21 => {
            format!("{f:.0}")
        }
        _ => n.to_string(),
    }
}

fn json_text(value: Option<&Value>) -> String {
    value.map(Value::to_string).unwrap_or_default()
}

/// Interpret a timestamp field as milliseconds since the Unix epoch.
///
/// Accepts numbers and numeric strings (milliseconds), RFC 3339 timestamps and `YYYY-MM-DD`
/// dates (midnight UTC). Milliseconds that do not name a representable instant are rejected.
pub(crate) fn timestamp_millis(value: &Value) -> Option<i64> {
    let ms = match value {
        Value::Number(n) => match n.as_i64() {
            Some(ms) => ms,
            None => {
                let f = n.as_f64().filter(|f| f.is_finite() && f.abs() < i64::MAX as f64)?;
                f.trunc() as i64
            }
        },
        Value::String(s) => {
            let s = s.trim();
            if let Ok(ms) = s.parse::<i64>() {
                ms
            } else if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                dt.timestamp_millis()
            } else {
                NaiveDate::parse_from_str(s, "%Y-%m-%d")
                    .ok()
                    .and_then(|d| d.and_hms_opt(0, 0, 0))
                    .map(|dt| dt.and_utc().timestamp_millis())?
            }
        }
        _ => return None,
    };
    DateTime::<Utc>::from_timestamp_millis(ms).map(|_| ms)
}
