use anyhow::Context;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use api_rest::{AppState, FixedWindowLimiter};
use api_shared::{AppIdClient, AppIdConfig, IdentityProvider};
use consent_core::config::{duration_ms_from_env_value, flag_from_env_value, required_env_value};
use consent_core::ledger::rest::{CaEnrollment, RestLedgerConnector};
use consent_core::{
    ConsentConfig, ConsentService, DeIdentifier, DeidentifierConfig, HttpDeIdentifier,
    LedgerClient, LedgerConfig,
};
use fhir::{ClientSettings, PatientMetadataClient, TenantDirectory};

fn env(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

fn required(name: &str) -> anyhow::Result<String> {
    Ok(required_env_value(name, env(name))?)
}

fn millis(name: &str, default_ms: u64) -> anyhow::Result<Duration> {
    Ok(duration_ms_from_env_value(name, env(name), default_ms)?)
}

fn count(name: &str, default: u32) -> anyhow::Result<u32> {
    match env(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty()) {
        None => Ok(default),
        Some(raw) => raw
            .parse()
            .with_context(|| format!("{name} must be a non-negative integer")),
    }
}

fn ledger_config() -> anyhow::Result<LedgerConfig> {
    let cfg = LedgerConfig {
        gateway_url: required("LEDGER_GATEWAY_URL")?,
        channel: required("LEDGER_CHANNEL")?,
        chaincode: required("LEDGER_CHAINCODE")?,
        admin_id: required("LEDGER_ADMIN_ID")?,
        admin_secret: required("LEDGER_ADMIN_SECRET")?,
        ca_url: required("LEDGER_CA_URL")?,
        request_timeout: millis("LEDGER_TIMEOUT_MS", 30_000)?,
        ping_timeout: millis("LEDGER_PING_TIMEOUT_MS", 5_000)?,
    };
    cfg.validate()?;
    Ok(cfg)
}

fn app_id_config() -> anyhow::Result<AppIdConfig> {
    let cfg = AppIdConfig {
        url: env("APP_ID_URL").unwrap_or_default(),
        tenant_id: env("APP_ID_TENANT_ID").unwrap_or_default(),
        client_id: env("APP_ID_CLIENT_ID").unwrap_or_default(),
        secret: env("APP_ID_SECRET").unwrap_or_default(),
        iam_key: env("APP_ID_IAM_KEY").filter(|v| !v.trim().is_empty()),
        iam_url: env("IAM_URL").unwrap_or_else(|| AppIdConfig::DEFAULT_IAM_URL.into()),
        timeout: millis("APP_ID_TIMEOUT_MS", 10_000)?,
        retries: count("APP_ID_RETRIES", 1)?,
        retry_delay: millis("APP_ID_RETRY_DELAY_MS", 3_000)?,
    };
    cfg.validate()?;
    Ok(cfg)
}

/// Main entry point for the consent gateway
///
/// Resolves configuration, checks the de-identifier and connects to the ledger, then serves the
/// REST API until SIGINT or SIGTERM.
///
/// # Environment Variables
/// - `CONSENT_ADDR`: Server address (default: "0.0.0.0:3002")
/// - `DEV_MODE`: Skip de-identification (default: false)
/// - `LEDGER_*`, `DEIDENTIFIER_*`, `APP_ID_*`: collaborator settings
/// - `TENANT_CONFIG_PATH`: YAML directory of tenants onboarded for patient lookups
///
/// # Errors
/// Returns an error if required configuration is missing, the de-identifier is not ready, the
/// ledger cannot be reached, or the server fails while running.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("consent=info".parse()?)
                .add_directive("api_rest=info".parse()?)
                .add_directive("audit=info".parse()?),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let addr = env("CONSENT_ADDR").unwrap_or_else(|| "0.0.0.0:3002".into());
    let dev_mode = flag_from_env_value(env("DEV_MODE"));

    let ledger_cfg = ledger_config()?;
    let app_id_cfg = app_id_config()?;
    let deid_cfg = DeidentifierConfig {
        base_url: if dev_mode {
            env("DEIDENTIFIER_URL").unwrap_or_default()
        } else {
            required("DEIDENTIFIER_URL")?
        },
        timeout: millis("DEIDENTIFIER_TIMEOUT_MS", 10_000)?,
    };
    let tenants = match env("TENANT_CONFIG_PATH").filter(|v| !v.trim().is_empty()) {
        Some(path) => {
            let path = PathBuf::from(path);
            TenantDirectory::load(&path)
                .with_context(|| format!("failed to load tenant config {}", path.display()))?
        }
        None => {
            tracing::warn!("TENANT_CONFIG_PATH not set, no tenant is onboarded for patient lookups");
            TenantDirectory::default()
        }
    };
    let reset_window = millis("RESET_PASSWORD_WINDOW_MS", 60_000)?;

    let http = reqwest::Client::builder()
        .build()
        .context("failed to build HTTP client")?;

    let deidentifier = Arc::new(HttpDeIdentifier::new(http.clone(), &deid_cfg));
    if dev_mode {
        tracing::warn!("DEV_MODE is enabled, identifiers are stored without de-identification");
    } else {
        deidentifier
            .ready()
            .await
            .context("de-identifier service is not ready")?;
        tracing::info!("de-identifier service is ready");
    }

    let enrollment = Arc::new(CaEnrollment::new(http.clone(), &ledger_cfg));
    let connector = Arc::new(RestLedgerConnector::new(http.clone(), &ledger_cfg, enrollment));
    let ledger = Arc::new(LedgerClient::new(
        connector,
        ledger_cfg.request_timeout,
        ledger_cfg.ping_timeout,
    ));
    ledger
        .connect()
        .await
        .context("failed to connect to the ledger")?;

    let identity: Arc<dyn IdentityProvider> =
        Arc::new(AppIdClient::new(http.clone(), app_id_cfg.clone()));
    let state = AppState {
        consent: ConsentService::new(
            Arc::clone(&ledger),
            deidentifier,
            ConsentConfig { dev_mode },
        ),
        identity,
        tenants: Arc::new(tenants),
        patients: PatientMetadataClient::new(
            http,
            ClientSettings {
                timeout: app_id_cfg.timeout,
                retries: app_id_cfg.retries,
                retry_delay: app_id_cfg.retry_delay,
            },
        ),
        reset_limiter: Arc::new(FixedWindowLimiter::new(reset_window)),
    };

    tracing::info!("++ Starting consent gateway on {}", addr);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, api_rest::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    ledger.shutdown().await;
    tracing::info!("-- Consent gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received");
}
