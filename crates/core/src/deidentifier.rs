//! De-identification adapter.
//!
//! Identifying fields are swapped for opaque tokens before a consent reaches the ledger, and the
//! tokens are swapped back after a read. Both directions go through the external
//! de-identification service, which is scoped per tenant and per request through headers.
//!
//! Successful batch re-identification writes one `audit` log line per record naming the caller.
//! That log is a compliance record, not diagnostics.

use crate::config::DeidentifierConfig;
use crate::constants::{FIELDS_TO_IDENTIFY, TENANT_ID_HEADER, TRANSACTION_ID_HEADER};
use crate::{ConsentRecord, DeidError};
use async_trait::async_trait;
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

const DEIDENTIFY_ROUTE: &str = "/api/de-identifier";
const IDENTIFY_BATCH_ROUTE: &str = "/api/identifier/batch";
const READY_ROUTE: &str = "/ready";

/// Batch codec between identifying values and de-identification tokens.
#[async_trait]
pub trait DeIdentifier: Send + Sync {
    /// Replace `value` with its token.
    async fn deidentify(
        &self,
        value: &str,
        tenant_id: &str,
        correlation_id: &str,
    ) -> Result<String, DeidError>;

    /// Restore `PatientID` and `ServiceID` on every record, in order.
    async fn identify_batch(
        &self,
        caller_id: &str,
        records: &[ConsentRecord],
        tenant_id: &str,
        correlation_id: &str,
    ) -> Result<Vec<ConsentRecord>, DeidError>;

    /// Readiness probe used at startup.
    async fn ready(&self) -> Result<(), DeidError>;
}

#[derive(Serialize)]
struct DeidentifyRequest<'a> {
    pii: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeidentifyResponse {
    de_pii: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct IdentifyBatchRequest<'a> {
    data_to_identify_batch: &'a [ConsentRecord],
    fields_to_identify: [&'static str; 2],
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct IdentifyBatchResponse {
    identified_data_batch: Vec<ConsentRecord>,
}

#[derive(Deserialize, Default)]
struct ServiceErrorBody {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    msg: Option<String>,
}

/// HTTP client for the de-identification service.
pub struct HttpDeIdentifier {
    http: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl HttpDeIdentifier {
    pub fn new(http: reqwest::Client, cfg: &DeidentifierConfig) -> Self {
        Self {
            http,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            timeout: cfg.timeout,
        }
    }

    /// POST `body` to `route`; the timeout covers the response body as well as the headers.
    async fn post<B, R>(
        &self,
        route: &str,
        body: &B,
        tenant_id: &str,
        correlation_id: &str,
    ) -> Result<R, DeidError>
    where
        B: Serialize + ?Sized + Sync,
        R: DeserializeOwned,
    {
        let url = format!("{}{route}", self.base_url);
        tracing::debug!(%url, %correlation_id, "sending request to de-identifier service");

        let request = self
            .http
            .post(&url)
            .header(TENANT_ID_HEADER, tenant_id)
            .header(TRANSACTION_ID_HEADER, correlation_id)
            .json(body);
        self.bounded(async move {
            let response = request
                .send()
                .await
                .map_err(|e| DeidError::Unavailable(e.to_string()))?;

            let status = response.status();
            if status.as_u16() == 413 {
                return Err(DeidError::PayloadTooLarge);
            }
            if !status.is_success() {
                let body: ServiceErrorBody = response.json().await.unwrap_or_default();
                return Err(DeidError::Rejected {
                    status: status.as_u16(),
                    message: body
                        .message
                        .or(body.msg)
                        .unwrap_or_else(|| status.to_string()),
                });
            }

            response
                .json::<R>()
                .await
                .map_err(|e| DeidError::InvalidResponse(e.to_string()))
        })
        .await
    }

    async fn bounded<T, F>(&self, call: F) -> Result<T, DeidError>
    where
        F: Future<Output = Result<T, DeidError>>,
    {
        tokio::time::timeout(self.timeout, call)
            .await
            .map_err(|_| DeidError::Timeout(self.timeout.as_millis()))?
    }
}

#[async_trait]
impl DeIdentifier for HttpDeIdentifier {
    async fn deidentify(
        &self,
        value: &str,
        tenant_id: &str,
        correlation_id: &str,
    ) -> Result<String, DeidError> {
        let response: DeidentifyResponse = self
            .post(
                DEIDENTIFY_ROUTE,
                &DeidentifyRequest { pii: value },
                tenant_id,
                correlation_id,
            )
            .await
            .inspect_err(|e| tracing::error!(%correlation_id, "failed to de-identify PII: {}", e))?;
        Ok(response.de_pii)
    }

    async fn identify_batch(
        &self,
        caller_id: &str,
        records: &[ConsentRecord],
        tenant_id: &str,
        correlation_id: &str,
    ) -> Result<Vec<ConsentRecord>, DeidError> {
        let request = IdentifyBatchRequest {
            data_to_identify_batch: records,
            fields_to_identify: FIELDS_TO_IDENTIFY,
        };
        let response: IdentifyBatchResponse = self
            .post(IDENTIFY_BATCH_ROUTE, &request, tenant_id, correlation_id)
            .await?;

        audit_access(caller_id, records);
        Ok(response.identified_data_batch)
    }

    async fn ready(&self) -> Result<(), DeidError> {
        let url = format!("{}{READY_ROUTE}", self.base_url);
        let request = self.http.get(&url);
        self.bounded(async move {
            let response = request
                .send()
                .await
                .map_err(|e| DeidError::Unavailable(e.to_string()))?;

            let status = response.status().as_u16();
            if response.status().is_success() {
                tracing::info!("de-identifier readiness is OK");
                return Ok(());
            }
            let body: ServiceErrorBody = response.json().await.unwrap_or_default();
            Err(DeidError::Rejected {
                status,
                message: body.msg.or(body.message).unwrap_or_default(),
            })
        })
        .await
    }
}

/// Record that `caller_id` accessed the plaintext behind each record's tokens.
pub fn audit_access(caller_id: &str, records: &[ConsentRecord]) {
    let timestamp = Utc::now().timestamp();
    for record in records {
        tracing::info!(
            target: "audit",
            caller = %caller_id,
            consent_id = %record.consent_id,
            patient_id = %record.patient_id,
            service_id = %record.service_id,
            timestamp,
            "accessed PII/PHI from de-identified PII/PHI"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::HeaderMap, http::StatusCode, routing::get, routing::post, Json, Router};
    use serde_json::{json, Value};
    use std::collections::BTreeMap;
    use std::fmt;
    use std::sync::{Arc, Mutex};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tracing::field::{Field, Visit};
    use tracing_subscriber::layer::{Context, SubscriberExt};
    use tracing_subscriber::Layer;

    async fn deidentify(headers: HeaderMap, Json(body): Json<Value>) -> (StatusCode, Json<Value>) {
        let tenant = headers
            .get(TENANT_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        let pii = body["pii"].as_str().unwrap_or_default();
        if pii == "boom" {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({"status": 400, "message": "bad pii"})),
            );
        }
        (StatusCode::OK, Json(json!({"dePii": format!("{tenant}:{pii}:token")})))
    }

    async fn identify(Json(body): Json<Value>) -> (StatusCode, Json<Value>) {
        let batch = body["dataToIdentifyBatch"].as_array().cloned().unwrap_or_default();
        assert_eq!(body["fieldsToIdentify"], json!(["PatientID", "ServiceID"]));
        if batch.len() > 2 {
            return (StatusCode::PAYLOAD_TOO_LARGE, Json(json!({})));
        }
        let restored: Vec<Value> = batch
            .into_iter()
            .map(|mut r| {
                let token = r["PatientID"].as_str().unwrap_or_default().to_string();
                r["PatientID"] = json!(token.trim_end_matches(":token"));
                r
            })
            .collect();
        (StatusCode::OK, Json(json!({"identifiedDataBatch": restored})))
    }

    async fn spawn_service() -> String {
        let app = Router::new()
            .route("/api/de-identifier", post(deidentify))
            .route("/api/identifier/batch", post(identify))
            .route("/ready", get(|| async { "ok" }));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        format!("http://{addr}")
    }

    fn client(base_url: String) -> HttpDeIdentifier {
        HttpDeIdentifier::new(
            reqwest::Client::new(),
            &DeidentifierConfig {
                base_url,
                timeout: Duration::from_secs(5),
            },
        )
    }

    fn record(id: &str, patient: &str) -> ConsentRecord {
        ConsentRecord {
            consent_id: id.into(),
            patient_id: patient.into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_deidentify_sends_tenant_header() {
        let deid = client(spawn_service().await);
        let token = deid.deidentify("p1", "t1", "tx-1").await.unwrap();
        assert_eq!(token, "t1:p1:token");
    }

    #[tokio::test]
    async fn test_service_error_keeps_status_and_message() {
        let deid = client(spawn_service().await);
        let err = deid.deidentify("boom", "t1", "tx-1").await.unwrap_err();
        assert_eq!(err.status(), Some(400));
        assert_eq!(
            err.to_string(),
            "Request to de-identifier service failed, status: 400, message: bad pii"
        );
    }

    #[tokio::test]
    async fn test_identify_batch_restores_records() {
        let deid = client(spawn_service().await);
        let records = vec![record("c1", "p1:token"), record("c2", "p2:token")];
        let restored = deid.identify_batch("caller", &records, "t1", "tx").await.unwrap();
        assert_eq!(restored[0].patient_id, "p1");
        assert_eq!(restored[1].consent_id, "c2");
    }

    #[tokio::test]
    async fn test_payload_too_large_is_distinguishable() {
        let deid = client(spawn_service().await);
        let records: Vec<_> = (0..3).map(|i| record(&format!("c{i}"), "p")).collect();
        let err = deid.identify_batch("caller", &records, "t1", "tx").await.unwrap_err();
        assert!(err.is_payload_too_large());
    }

    #[tokio::test]
    async fn test_unreachable_service_is_unavailable() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let deid = client(format!("http://{addr}"));
        let err = deid.deidentify("p1", "t1", "tx").await.unwrap_err();
        assert!(matches!(err, DeidError::Unavailable(_)));
        assert_eq!(err.status(), None);
    }

    #[tokio::test]
    async fn test_ready_probe() {
        let deid = client(spawn_service().await);
        deid.ready().await.expect("service is ready");
    }

    /// Answers every request with headers and a partial body, then goes silent.
    async fn spawn_stalled_body() -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                tokio::spawn(async move {
                    let mut buf = [0u8; 4096];
                    let _ = socket.read(&mut buf).await;
                    let _ = socket
                        .write_all(
                            b"HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: 100\r\n\r\n{",
                        )
                        .await;
                    tokio::time::sleep(Duration::from_secs(60)).await;
                });
            }
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn test_stalled_response_body_times_out() {
        let deid = HttpDeIdentifier::new(
            reqwest::Client::new(),
            &DeidentifierConfig {
                base_url: spawn_stalled_body().await,
                timeout: Duration::from_millis(200),
            },
        );

        let err = tokio::time::timeout(Duration::from_secs(3), deid.deidentify("p1", "t1", "tx"))
            .await
            .expect("de-identify must honour its timeout")
            .unwrap_err();
        assert!(matches!(err, DeidError::Timeout(200)));

        let err = tokio::time::timeout(
            Duration::from_secs(3),
            deid.identify_batch("caller", &[record("c1", "p1:token")], "t1", "tx"),
        )
        .await
        .expect("identify batch must honour its timeout")
        .unwrap_err();
        assert!(matches!(err, DeidError::Timeout(200)));
    }

    type Entries = Arc<Mutex<Vec<BTreeMap<String, String>>>>;

    /// Collects the fields of every `audit` event.
    #[derive(Clone, Default)]
    struct AuditLog(Entries);

    struct Fields<'a>(&'a mut BTreeMap<String, String>);

    impl Visit for Fields<'_> {
        fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
            self.0.insert(field.name().to_string(), format!("{value:?}"));
        }
    }

    impl<S: tracing::Subscriber> Layer<S> for AuditLog {
        fn on_event(&self, event: &tracing::Event<'_>, _: Context<'_, S>) {
            if event.metadata().target() != "audit" {
                return;
            }
            let mut fields = BTreeMap::new();
            event.record(&mut Fields(&mut fields));
            self.0.lock().unwrap().push(fields);
        }
    }

    #[tokio::test]
    async fn test_identify_batch_audits_each_record() {
        let log = AuditLog::default();
        let _guard =
            tracing::subscriber::set_default(tracing_subscriber::registry().with(log.clone()));

        let deid = client(spawn_service().await);
        let records = vec![record("c1", "p1:token"), record("c2", "p2:token")];
        deid.identify_batch("dr-who", &records, "t1", "tx").await.unwrap();

        let entries = log.0.lock().unwrap().clone();
        assert_eq!(entries.len(), 2);
        for (entry, consent_id) in entries.iter().zip(["c1", "c2"]) {
            assert_eq!(entry["caller"], "dr-who");
            assert_eq!(entry["consent_id"], consent_id);
            assert!(entry.contains_key("patient_id"));
            assert!(entry.contains_key("service_id"));
            assert!(entry["timestamp"].parse::<i64>().unwrap() > 0);
        }
        assert_eq!(entries[0]["patient_id"], "p1:token");
    }

    #[tokio::test]
    async fn test_failed_identify_batch_writes_no_audit_entry() {
        let log = AuditLog::default();
        let _guard =
            tracing::subscriber::set_default(tracing_subscriber::registry().with(log.clone()));

        let deid = client(spawn_service().await);
        let records: Vec<_> = (0..3).map(|i| record(&format!("c{i}"), "p")).collect();
        assert!(deid.identify_batch("dr-who", &records, "t1", "tx").await.is_err());

        assert!(log.0.lock().unwrap().is_empty());
    }
}
