//! Core runtime configuration.
//!
//! This module defines configuration that should be resolved once at process startup and then
//! passed into core services. Nothing in here reads the process environment: the binary collects
//! raw values and the helpers below turn them into typed settings, so request handling never
//! depends on process-wide state.

use crate::{ConsentError, ConsentResult};
use std::time::Duration;

/// Connection settings for the ledger gateway and its certificate authority.
#[derive(Clone, Debug)]
pub struct LedgerConfig {
    pub gateway_url: String,
    pub channel: String,
    pub chaincode: String,
    pub admin_id: String,
    pub admin_secret: String,
    pub ca_url: String,
    pub request_timeout: Duration,
    pub ping_timeout: Duration,
}

impl LedgerConfig {
    /// Reject configurations with blank required values.
    pub fn validate(&self) -> ConsentResult<()> {
        let fields = [
            ("LEDGER_GATEWAY_URL", &self.gateway_url),
            ("LEDGER_CHANNEL", &self.channel),
            ("LEDGER_CHAINCODE", &self.chaincode),
            ("LEDGER_ADMIN_ID", &self.admin_id),
            ("LEDGER_ADMIN_SECRET", &self.admin_secret),
            ("LEDGER_CA_URL", &self.ca_url),
        ];
        for (name, value) in fields {
            if value.trim().is_empty() {
                return Err(ConsentError::Configuration(format!(
                    "missing variable '{name}'"
                )));
            }
        }
        Ok(())
    }

    /// Base URL of the configured chaincode on the gateway.
    pub fn chaincode_url(&self) -> String {
        format!(
            "{}/channels/{}/chaincodes/{}",
            self.gateway_url.trim_end_matches('/'),
            self.channel,
            self.chaincode
        )
    }
}

/// Settings for the external de-identification service.
#[derive(Clone, Debug)]
pub struct DeidentifierConfig {
    pub base_url: String,
    pub timeout: Duration,
}

/// Settings for the consent service itself.
#[derive(Clone, Copy, Debug, Default)]
pub struct ConsentConfig {
    /// Trusted-internal mode: identifiers are written and read without de-identification.
    pub dev_mode: bool,
}

/// Return a required value, failing with the variable name when it is absent or blank.
pub fn required_env_value(name: &str, value: Option<String>) -> ConsentResult<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ConsentError::Configuration(format!("missing variable '{name}'")))
}

/// Parse a millisecond duration, falling back to `default_ms` when unset.
pub fn duration_ms_from_env_value(
    name: &str,
    value: Option<String>,
    default_ms: u64,
) -> ConsentResult<Duration> {
    let value = value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty());
    match value {
        None => Ok(Duration::from_millis(default_ms)),
        Some(raw) => raw.parse::<u64>().map(Duration::from_millis).map_err(|_| {
            ConsentError::Configuration(format!("{name} must be a number of milliseconds"))
        }),
    }
}

/// Parse a boolean flag; only `true`/`1` (any case) enable it.
pub fn flag_from_env_value(value: Option<String>) -> bool {
    value
        .map(|v| matches!(v.trim().to_lowercase().as_str(), "true" | "1"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ledger_config() -> LedgerConfig {
        LedgerConfig {
            gateway_url: "http://gateway:7080/".into(),
            channel: "consentchannel".into(),
            chaincode: "consent".into(),
            admin_id: "admin".into(),
            admin_secret: "secret".into(),
            ca_url: "http://ca:7054".into(),
            request_timeout: Duration::from_secs(30),
            ping_timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn test_chaincode_url_trims_trailing_slash() {
        assert_eq!(
            ledger_config().chaincode_url(),
            "http://gateway:7080/channels/consentchannel/chaincodes/consent"
        );
    }

    #[test]
    fn test_validate_names_missing_variable() {
        let mut cfg = ledger_config();
        cfg.admin_secret = "  ".into();
        let err = cfg.validate().expect_err("blank secret should be rejected");
        assert_eq!(
            err.to_string(),
            "invalid configuration: missing variable 'LEDGER_ADMIN_SECRET'"
        );
    }

    #[test]
    fn test_required_env_value() {
        assert_eq!(
            required_env_value("X", Some(" value ".into())).unwrap(),
            "value"
        );
        assert!(required_env_value("X", Some("".into())).is_err());
        assert!(required_env_value("X", None).is_err());
    }

    #[test]
    fn test_duration_defaults_and_parses() {
        assert_eq!(
            duration_ms_from_env_value("T", None, 5000).unwrap(),
            Duration::from_millis(5000)
        );
        assert_eq!(
            duration_ms_from_env_value("T", Some("250".into()), 5000).unwrap(),
            Duration::from_millis(250)
        );
        assert!(duration_ms_from_env_value("T", Some("soon".into()), 5000).is_err());
    }

    #[test]
    fn test_flag_from_env_value() {
        assert!(flag_from_env_value(Some("TRUE".into())));
        assert!(flag_from_env_value(Some("1".into())));
        assert!(!flag_from_env_value(Some("no".into())));
        assert!(!flag_from_env_value(None));
    }
}
