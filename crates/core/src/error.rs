/// Failures raised by the ledger client and its gateway sessions.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("access denied: {0}")]
    AccessDenied(String),
    #[error("Request timed out after {0} ms")]
    Timeout(u128),
    #[error("failed to reach ledger gateway: {0}")]
    Transport(String),
    #[error("ledger rejected transaction: {0}")]
    Rejected(String),
    #[error("failed to enroll ledger identity: {0}")]
    Enrollment(String),
    #[error("invalid ledger response: {0}")]
    InvalidResponse(String),
    #[error("retry after re-enrollment failed: {0}")]
    RetryFailed(#[source] Box<LedgerError>),
}

impl LedgerError {
    /// True when the failure indicates the session's identity was refused.
    pub fn is_access_denied(&self) -> bool {
        match self {
            LedgerError::AccessDenied(_) => true,
            LedgerError::Rejected(message) | LedgerError::Transport(message) => {
                message.to_lowercase().contains("access denied")
            }
            _ => false,
        }
    }

    /// True when the ledger refused a write because the key is already present.
    pub fn is_already_exists(&self) -> bool {
        match self {
            LedgerError::RetryFailed(inner) => inner.is_already_exists(),
            other => other.to_string().contains("already exists"),
        }
    }
}

/// Failures raised by the de-identification adapter.
#[derive(Debug, thiserror::Error)]
pub enum DeidError {
    #[error("Request to de-identifier service failed, status: 413, message: payload too large")]
    PayloadTooLarge,
    #[error("Request to de-identifier service failed, status: {status}, message: {message}")]
    Rejected { status: u16, message: String },
    #[error("Failed to send request to de-identifier service: {0}")]
    Unavailable(String),
    #[error("Request to de-identifier service timed out after {0} ms")]
    Timeout(u128),
    #[error("invalid de-identifier response: {0}")]
    InvalidResponse(String),
}

impl DeidError {
    /// HTTP status reported by the de-identifier, when one was received.
    pub fn status(&self) -> Option<u16> {
        match self {
            DeidError::PayloadTooLarge => Some(413),
            DeidError::Rejected { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_payload_too_large(&self) -> bool {
        self.status() == Some(413)
    }
}

/// Errors surfaced by the consent service to its callers.
#[derive(Debug, thiserror::Error)]
pub enum ConsentError {
    /// Caller input defect; the message is shown to the client verbatim.
    #[error("{0}")]
    Validation(String),
    #[error("Not found")]
    NotFound,
    #[error(transparent)]
    Deid(#[from] DeidError),
    #[error("Failed to {operation}: {source}")]
    Ledger {
        operation: &'static str,
        #[source]
        source: LedgerError,
    },
    #[error("invalid configuration: {0}")]
    Configuration(String),
}

impl ConsentError {
    pub(crate) fn ledger(operation: &'static str) -> impl FnOnce(LedgerError) -> ConsentError {
        move |source| ConsentError::Ledger { operation, source }
    }

    /// True when the failure is a bounded-wait expiry on a downstream call.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            ConsentError::Deid(DeidError::Timeout(_))
                | ConsentError::Ledger {
                    source: LedgerError::Timeout(_),
                    ..
                }
        )
    }
}

pub type ConsentResult<T> = std::result::Result<T, ConsentError>;
