//! # API Shared
//!
//! Shared utilities and definitions for the consent gateway API.
//!
//! Contains:
//! - Response envelopes with OpenAPI schemas (`envelope` module)
//! - Shared services like `HealthService`
//! - Authentication utilities and the identity-service client
//!
//! Used by `api-rest` and the `consent-run` binary.

pub mod auth;
pub mod envelope;
pub mod health;

pub use auth::{AppIdClient, AppIdConfig, AuthError, Caller, IdentityProvider, Scope};
pub use envelope::{
    ConsentReq, ConsentRes, ErrorRes, ForgotPasswordReq, HealthRes, LoginReq, MessageRes, PatientProfileRes,
    PatientRes, QueryRes,
};
pub use health::{HealthService, Probe};
