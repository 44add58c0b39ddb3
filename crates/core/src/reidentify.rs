//! Adaptive batch re-identification.
//!
//! The de-identification service rejects oversized batches with "payload too large", and its
//! limit is not known up front. Re-identification therefore starts with the whole result set as
//! one chunk and halves a chunk whenever the service rejects it for size.
//!
//! Pending chunks are kept in a queue of index ranges over the input. The queue always partitions
//! the part of the input that has not been re-identified yet: a rejected chunk is replaced in
//! place by its two halves, chunks that succeeded are never revisited, and chunks are processed
//! strictly in order, one at a time. Results are therefore concatenated in input order.

use crate::deidentifier::DeIdentifier;
use crate::{ConsentRecord, DeidError};
use std::collections::VecDeque;
use std::ops::Range;

/// Who is asking and on whose behalf; threaded explicitly into every downstream call.
#[derive(Clone, Copy, Debug)]
pub struct ReidentifyScope<'a> {
    pub caller_id: &'a str,
    pub tenant_id: &'a str,
    pub correlation_id: &'a str,
}

/// Re-identify `records`, subdividing on payload-too-large rejections.
///
/// # Errors
///
/// Any failure other than payload-too-large aborts immediately and no partial result is
/// returned. A payload-too-large rejection of a single-record chunk cannot be subdivided and is
/// returned as-is.
pub async fn reidentify_adaptively(
    deid: &dyn DeIdentifier,
    records: &[ConsentRecord],
    scope: ReidentifyScope<'_>,
) -> Result<Vec<ConsentRecord>, DeidError> {
    if records.is_empty() {
        return Ok(Vec::new());
    }

    let mut pending: VecDeque<Range<usize>> = VecDeque::from([0..records.len()]);
    let mut identified = Vec::with_capacity(records.len());
    let mut attempts = 0usize;

    while let Some(chunk) = pending.pop_front() {
        attempts += 1;
        let result = deid
            .identify_batch(
                scope.caller_id,
                &records[chunk.clone()],
                scope.tenant_id,
                scope.correlation_id,
            )
            .await;

        match result {
            Ok(batch) => identified.extend(batch),
            Err(err) if err.is_payload_too_large() && chunk.len() > 1 => {
                let (first, second) = halve(chunk.clone());
                tracing::debug!(
                    correlation_id = %scope.correlation_id,
                    failed = ?chunk,
                    ?first,
                    ?second,
                    "re-identification payload too large, splitting chunk"
                );
                pending.push_front(second);
                pending.push_front(first);
            }
            Err(err) => {
                tracing::error!(
                    correlation_id = %scope.correlation_id,
                    attempts,
                    "re-identification failed: {}",
                    err
                );
                return Err(err);
            }
        }
    }

    tracing::debug!(
        correlation_id = %scope.correlation_id,
        attempts,
        records = records.len(),
        "re-identification complete"
    );
    Ok(identified)
}

/// Split a range into two halves, the first taking `ceil(len / 2)` elements.
fn halve(range: Range<usize>) -> (Range<usize>, Range<usize>) {
    let mid = range.start + range.len().div_ceil(2);
    (range.start..mid, mid..range.end)
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// De-identifier fake: tokens are `tok-<value>`, and batches larger than `limit` fail.
    pub struct FakeDeIdentifier {
        pub limit: usize,
        pub fail_with: Option<fn() -> DeidError>,
        pub calls: Mutex<Vec<Vec<String>>>,
    }

    impl FakeDeIdentifier {
        pub fn with_limit(limit: usize) -> Self {
            Self {
                limit,
                fail_with: None,
                calls: Mutex::new(Vec::new()),
            }
        }

        pub fn batch_sizes(&self) -> Vec<usize> {
            self.calls.lock().unwrap().iter().map(Vec::len).collect()
        }
    }

    #[async_trait]
    impl DeIdentifier for FakeDeIdentifier {
        async fn deidentify(&self, value: &str, _: &str, _: &str) -> Result<String, DeidError> {
            match self.fail_with {
                Some(fail) => Err(fail()),
                None => Ok(format!("tok-{value}")),
            }
        }

        async fn identify_batch(
            &self,
            _caller_id: &str,
            records: &[ConsentRecord],
            _tenant_id: &str,
            _correlation_id: &str,
        ) -> Result<Vec<ConsentRecord>, DeidError> {
            self.calls
                .lock()
                .unwrap()
                .push(records.iter().map(|r| r.consent_id.clone()).collect());
            if records.len() > self.limit {
                return Err(DeidError::PayloadTooLarge);
            }
            if let Some(fail) = self.fail_with {
                return Err(fail());
            }
            Ok(records
                .iter()
                .cloned()
                .map(|mut r| {
                    r.patient_id = r.patient_id.trim_start_matches("tok-").to_string();
                    r
                })
                .collect())
        }

        async fn ready(&self) -> Result<(), DeidError> {
            Ok(())
        }
    }
}
