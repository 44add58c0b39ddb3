//! # Consent Core
//!
//! Core business logic for the consent gateway.
//!
//! This crate contains the consent lifecycle and its outbound collaborators:
//! - Validation and normalisation of raw consent submissions
//! - The ledger client (sessions, access-denied recovery, bounded waits)
//! - The de-identification adapter and adaptive batch re-identification
//! - The consent service composing them into create, revoke, query and ping
//!
//! **No API concerns**: Authentication, HTTP servers, or response envelopes belong in
//! `api-rest` or `api-shared`.

pub mod config;
pub mod consent;
pub mod constants;
pub mod deidentifier;
pub mod error;
pub mod ledger;
pub mod reidentify;
pub mod service;
pub mod validation;

pub use config::{ConsentConfig, DeidentifierConfig, LedgerConfig};
pub use consent::{ConsentRecord, PageSize, QueryResult};
pub use deidentifier::{DeIdentifier, HttpDeIdentifier};
pub use error::{ConsentError, ConsentResult, DeidError, LedgerError};
pub use ledger::{ConnectionPhase, CredentialMode, LedgerClient};
pub use service::{ConsentService, CreateOutcome, PatientQuery};
pub use validation::validate_consent;
