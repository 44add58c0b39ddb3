//! Consent orchestration.
//!
//! [`ConsentService`] composes the validator, the de-identification adapter, the ledger client
//! and the adaptive re-identifier into the create, revoke, query-by-patient and ping operations.
//! Request-scoped values (correlation id, tenant, caller) are passed in explicitly on every call.

use crate::config::ConsentConfig;
use crate::constants::{CREATE_CONSENT_FN, QUERY_CONSENT_FN};
use crate::deidentifier::DeIdentifier;
use crate::ledger::LedgerClient;
use crate::reidentify::{reidentify_adaptively, ReidentifyScope};
use crate::validation::validate_consent;
use crate::{ConsentError, ConsentRecord, ConsentResult, LedgerError, PageSize, QueryResult};
use serde_json::{json, Value};
use std::sync::Arc;

/// Result of a successful create or revoke.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CreateOutcome {
    Created,
    /// The ledger already holds this `ConsentID`; treated as success.
    AlreadyExists,
}

/// Query-by-patient request, with identifiers taken from the trusted request context.
#[derive(Clone, Debug)]
pub struct PatientQuery {
    pub patient_id: String,
    pub tenant_id: String,
    pub caller_id: String,
    pub page_size: PageSize,
    pub bookmark: String,
    pub correlation_id: String,
}

/// Shared handle over the consent collaborators.
#[derive(Clone)]
pub struct ConsentService {
    ledger: Arc<LedgerClient>,
    deid: Arc<dyn DeIdentifier>,
    config: ConsentConfig,
}

impl ConsentService {
    pub fn new(
        ledger: Arc<LedgerClient>,
        deid: Arc<dyn DeIdentifier>,
        config: ConsentConfig,
    ) -> Self {
        Self {
            ledger,
            deid,
            config,
        }
    }

    /// Validate, de-identify and write a consent to the ledger.
    ///
    /// # Errors
    ///
    /// - [`ConsentError::Validation`] before any collaborator is called.
    /// - [`ConsentError::Deid`] if tokenising `PatientID` or `ServiceID` fails.
    /// - [`ConsentError::Ledger`] for any write failure other than "already exists".
    pub async fn create(&self, input: &Value, correlation_id: &str) -> ConsentResult<CreateOutcome> {
        let mut record = validate_consent(input, correlation_id)?;

        if !self.config.dev_mode {
            self.deidentify_record(&mut record, correlation_id).await?;
        }

        tracing::debug!(%correlation_id, "attempting to write consent to ledger");
        match self
            .ledger
            .write(CREATE_CONSENT_FN, &record.to_chaincode_args())
            .await
        {
            Ok(()) => {
                tracing::info!(%correlation_id, "consent written to ledger");
                Ok(CreateOutcome::Created)
            }
            Err(err) if err.is_already_exists() => {
                tracing::warn!(%correlation_id, "{}", err);
                Ok(CreateOutcome::AlreadyExists)
            }
            Err(err) => {
                tracing::error!(%correlation_id, "write to ledger failed: {}", err);
                Err(ConsentError::ledger("writeToBC")(err))
            }
        }
    }

    /// Record a revocation: a create with `ConsentOption` forced to `["deny"]`.
    pub async fn revoke(&self, input: &Value, correlation_id: &str) -> ConsentResult<CreateOutcome> {
        self.create(&revocation_of(input), correlation_id).await
    }

    /// Read one page of a patient's consents and restore their identifying fields.
    ///
    /// # Errors
    ///
    /// Returns [`ConsentError::NotFound`] when the ledger returned records but none survived
    /// re-identification.
    pub async fn query_by_patient(&self, query: &PatientQuery) -> ConsentResult<QueryResult> {
        let correlation_id = query.correlation_id.as_str();
        let patient_id = if self.config.dev_mode {
            query.patient_id.clone()
        } else {
            self.deid
                .deidentify(&query.patient_id, &query.tenant_id, correlation_id)
                .await?
        };

        tracing::debug!(%correlation_id, "querying consents by patient and tenant from ledger");
        let args = [
            patient_id,
            query.tenant_id.clone(),
            query.page_size.to_string(),
            query.bookmark.clone(),
        ];
        let raw = self
            .ledger
            .read(QUERY_CONSENT_FN, &args)
            .await
            .map_err(ConsentError::ledger("queryFromBC"))?;
        let mut result = parse_query_result(&raw).map_err(ConsentError::ledger("queryFromBC"))?;

        if self.config.dev_mode || result.records.is_empty() {
            return Ok(result);
        }

        let scope = ReidentifyScope {
            caller_id: &query.caller_id,
            tenant_id: &query.tenant_id,
            correlation_id,
        };
        let identified = reidentify_adaptively(self.deid.as_ref(), &result.records, scope).await?;
        if identified.is_empty() {
            return Err(ConsentError::NotFound);
        }
        result.records = identified;
        Ok(result)
    }

    /// Ping the chaincode and return its answer.
    pub async fn ping(&self) -> ConsentResult<String> {
        self.ledger
            .ping()
            .await
            .map_err(ConsentError::ledger("pingBlockchain"))
    }

    async fn deidentify_record(
        &self,
        record: &mut ConsentRecord,
        correlation_id: &str,
    ) -> ConsentResult<()> {
        let tenant_id = record.tenant_id.clone();
        record.patient_id = self
            .deid
            .deidentify(&record.patient_id, &tenant_id, correlation_id)
            .await?;
        if !record.service_id.is_empty() {
            record.service_id = self
                .deid
                .deidentify(&record.service_id, &tenant_id, correlation_id)
                .await?;
        }
        Ok(())
    }
}

/// Copy of a raw submission with `ConsentOption` replaced by `["deny"]`.
pub fn revocation_of(input: &Value) -> Value {
    let mut body = match input {
        Value::Object(map) => map.clone(),
        _ => Default::default(),
    };
    body.insert("ConsentOption".into(), json!(["deny"]));
    Value::Object(body)
}

fn parse_query_result(raw: &str) -> Result<QueryResult, LedgerError> {
    if raw.trim().is_empty() {
        return Ok(QueryResult::default());
    }
    serde_json::from_str(raw).map_err(|e| LedgerError::InvalidResponse(e.to_string()))
}
