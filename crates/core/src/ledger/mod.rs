//! Ledger client.
//!
//! The ledger is consumed as an opaque transactional key-value store: reads evaluate a named
//! chaincode function, writes submit one. [`LedgerClient`] owns the process-wide session and
//! applies exactly one recovery policy: when a call fails with an access-denied error, the
//! session is torn down, rebuilt with freshly derived credentials and the call is retried once.
//! Every other failure is returned as-is.
//!
//! ## Connection phases
//!
//! ```text
//! Disconnected -> Connecting -> Connected
//! Connected --access denied--> Disconnected -> Connecting (fresh credentials) -> Connected
//! ```

pub mod rest;

use crate::LedgerError;
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};

/// Where a new session's identity credentials come from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CredentialMode {
    /// Reuse cached credentials when available.
    Cached,
    /// Derive new credentials, bypassing any cache.
    ForceFresh,
}

/// Observable state of the ledger connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionPhase {
    Disconnected,
    Connecting,
    Connected,
}

/// An established session against the ledger.
#[async_trait]
pub trait LedgerSession: Send + Sync {
    /// Evaluate a read-only chaincode function and return its raw result text.
    async fn evaluate(&self, function: &str, args: &[String]) -> Result<String, LedgerError>;

    /// Submit a chaincode transaction for ordering and commit.
    async fn submit(&self, function: &str, args: &[String]) -> Result<(), LedgerError>;

    /// Release the session.
    async fn disconnect(&self);
}

/// Builds ledger sessions.
#[async_trait]
pub trait LedgerConnector: Send + Sync {
    async fn connect(&self, mode: CredentialMode) -> Result<Arc<dyn LedgerSession>, LedgerError>;
}

#[derive(Clone, Copy)]
enum Operation {
    Evaluate,
    Submit,
}

impl Operation {
    async fn run(
        self,
        session: &dyn LedgerSession,
        function: &str,
        args: &[String],
    ) -> Result<String, LedgerError> {
        match self {
            Operation::Evaluate => session.evaluate(function, args).await,
            Operation::Submit => session.submit(function, args).await.map(|()| String::new()),
        }
    }
}

/// Connection manager and transactional adapter over a [`LedgerConnector`].
///
/// Owned by the service root and shared by handle; there is no global session.
pub struct LedgerClient {
    connector: Arc<dyn LedgerConnector>,
    session: Mutex<Option<Arc<dyn LedgerSession>>>,
    phase: watch::Sender<ConnectionPhase>,
    request_timeout: Duration,
    ping_timeout: Duration,
}

impl LedgerClient {
    pub fn new(
        connector: Arc<dyn LedgerConnector>,
        request_timeout: Duration,
        ping_timeout: Duration,
    ) -> Self {
        Self {
            connector,
            session: Mutex::new(None),
            phase: watch::Sender::new(ConnectionPhase::Disconnected),
            request_timeout,
            ping_timeout,
        }
    }

    /// Current connection phase.
    pub fn phase(&self) -> ConnectionPhase {
        *self.phase.borrow()
    }

    /// Establish the initial session.
    ///
    /// An access-denied failure gets one forced-fresh reconnect before giving up.
    pub async fn connect(&self) -> Result<(), LedgerError> {
        match self.open(CredentialMode::Cached).await {
            Ok(_) => Ok(()),
            Err(err) if err.is_access_denied() => {
                tracing::warn!("ledger refused cached identity, re-enrolling: {}", err);
                self.open(CredentialMode::ForceFresh)
                    .await
                    .map(|_| ())
                    .map_err(|retry| LedgerError::RetryFailed(Box::new(retry)))
            }
            Err(err) => Err(err),
        }
    }

    /// Evaluate `function` and return its result text.
    pub async fn read(&self, function: &str, args: &[String]) -> Result<String, LedgerError> {
        self.execute(Operation::Evaluate, function, args).await
    }

    /// Submit `function` as a ledger transaction.
    pub async fn write(&self, function: &str, args: &[String]) -> Result<(), LedgerError> {
        self.execute(Operation::Submit, function, args)
            .await
            .map(|_| ())
    }

    /// Evaluate the chaincode `Ping` function under the ping timeout.
    pub async fn ping(&self) -> Result<String, LedgerError> {
        bounded(
            self.ping_timeout,
            self.read(crate::constants::PING_FN, &[]),
        )
        .await
    }

    /// Disconnect the current session, if any.
    pub async fn shutdown(&self) {
        let mut guard = self.session.lock().await;
        if let Some(session) = guard.take() {
            session.disconnect().await;
        }
        self.phase.send_replace(ConnectionPhase::Disconnected);
    }

    async fn execute(
        &self,
        op: Operation,
        function: &str,
        args: &[String],
    ) -> Result<String, LedgerError> {
        let session = self.current_or_open().await?;

        match bounded(self.request_timeout, op.run(session.as_ref(), function, args)).await {
            Err(err) if err.is_access_denied() => {
                tracing::warn!(function, "ledger access denied, re-enrolling and retrying: {}", err);
                let session = self.reconnect_after_denial(&session).await?;
                bounded(self.request_timeout, op.run(session.as_ref(), function, args))
                    .await
                    .map_err(|retry| LedgerError::RetryFailed(Box::new(retry)))
            }
            other => other,
        }
    }

    async fn current_or_open(&self) -> Result<Arc<dyn LedgerSession>, LedgerError> {
        {
            let guard = self.session.lock().await;
            if let Some(session) = guard.as_ref() {
                return Ok(Arc::clone(session));
            }
        }
        self.open(CredentialMode::Cached).await
    }

    /// Replace `failed` with a session built from fresh credentials.
    ///
    /// If another request already replaced it, the newer session is reused instead of
    /// tearing it down again.
    async fn reconnect_after_denial(
        &self,
        failed: &Arc<dyn LedgerSession>,
    ) -> Result<Arc<dyn LedgerSession>, LedgerError> {
        {
            let guard = self.session.lock().await;
            if let Some(current) = guard.as_ref() {
                if !Arc::ptr_eq(current, failed) {
                    return Ok(Arc::clone(current));
                }
            }
        }
        self.open(CredentialMode::ForceFresh)
            .await
            .map_err(|err| LedgerError::RetryFailed(Box::new(err)))
    }

    async fn open(&self, mode: CredentialMode) -> Result<Arc<dyn LedgerSession>, LedgerError> {
        let mut guard = self.session.lock().await;

        if mode == CredentialMode::Cached {
            if let Some(session) = guard.as_ref() {
                return Ok(Arc::clone(session));
            }
        }

        if let Some(stale) = guard.take() {
            tracing::debug!("disconnecting ledger session");
            if tokio::time::timeout(self.request_timeout, stale.disconnect())
                .await
                .is_err()
            {
                tracing::warn!("ledger session did not disconnect in time, dropping it");
            }
            self.phase.send_replace(ConnectionPhase::Disconnected);
        }

        // Enrollment runs under the session lock, so it must not outlive the request budget.
        self.phase.send_replace(ConnectionPhase::Connecting);
        match bounded(self.request_timeout, self.connector.connect(mode)).await {
            Ok(session) => {
                *guard = Some(Arc::clone(&session));
                self.phase.send_replace(ConnectionPhase::Connected);
                tracing::info!(?mode, "ledger session established");
                Ok(session)
            }
            Err(err) => {
                self.phase.send_replace(ConnectionPhase::Disconnected);
                tracing::error!("failed to connect to ledger: {}", err);
                Err(err)
            }
        }
    }
}

async fn bounded<T, F>(limit: Duration, call: F) -> Result<T, LedgerError>
where
    F: Future<Output = Result<T, LedgerError>>,
{
    tokio::time::timeout(limit, call)
        .await
        .map_err(|_| LedgerError::Timeout(limit.as_millis()))?
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use std::sync::atomic::Ordering;

    #[tokio::test]
    async fn test_starts_disconnected_and_connects_lazily() {
        let ledger = Arc::new(MemoryLedger::default());
        let client = memory_client(&ledger);
        assert_eq!(client.phase(), ConnectionPhase::Disconnected);

        client.write("CreateConsent", &["tx-1".into()]).await.unwrap();
        client.write("CreateConsent", &["tx-2".into()]).await.unwrap();

        assert_eq!(client.phase(), ConnectionPhase::Connected);
        assert_eq!(ledger.connects.load(Ordering::SeqCst), 1, "session is reused");
    }

    #[tokio::test]
    async fn test_access_denied_reconnects_with_fresh_credentials_once() {
        let ledger = Arc::new(MemoryLedger::default());
        let client = memory_client(&ledger);
        client.connect().await.unwrap();

        ledger.fail_next(access_denied);
        let result = client.read("QueryConsentWithPagination", &[]).await;

        assert!(result.is_ok(), "retry should succeed: {result:?}");
        assert_eq!(ledger.fresh_connects.load(Ordering::SeqCst), 1);
        assert_eq!(ledger.disconnects.load(Ordering::SeqCst), 1);
        assert_eq!(client.phase(), ConnectionPhase::Connected);
    }

    #[tokio::test]
    async fn test_second_access_denied_is_not_retried_again() {
        let ledger = Arc::new(MemoryLedger::default());
        let client = memory_client(&ledger);

        ledger.fail_next(access_denied);
        ledger.fail_next(access_denied);
        let err = client
            .write("CreateConsent", &["tx-1".into()])
            .await
            .expect_err("second denial must surface");

        assert!(matches!(err, LedgerError::RetryFailed(_)));
        assert_eq!(ledger.fresh_connects.load(Ordering::SeqCst), 1);
        assert!(ledger.writes.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_other_failures_are_not_retried() {
        let ledger = Arc::new(MemoryLedger::default());
        let client = memory_client(&ledger);

        ledger.fail_next(|| LedgerError::Transport("connection refused".into()));
        let err = client.read("Ping", &[]).await.expect_err("should fail");

        assert!(matches!(err, LedgerError::Transport(_)));
        assert_eq!(ledger.fresh_connects.load(Ordering::SeqCst), 0);
        assert_eq!(ledger.connects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_connect_retries_access_denied_with_fresh_credentials() {
        let ledger = Arc::new(MemoryLedger::default());
        ledger.connect_failures.lock().unwrap().push_back(access_denied);
        let client = memory_client(&ledger);

        client.connect().await.expect("fresh enrollment should connect");

        assert_eq!(ledger.connects.load(Ordering::SeqCst), 2);
        assert_eq!(ledger.fresh_connects.load(Ordering::SeqCst), 1);
        assert_eq!(client.phase(), ConnectionPhase::Connected);
    }

    #[tokio::test]
    async fn test_failed_connect_leaves_client_disconnected() {
        let ledger = Arc::new(MemoryLedger::default());
        ledger
            .connect_failures
            .lock()
            .unwrap()
            .push_back(|| LedgerError::Transport("gateway down".into()));
        let client = memory_client(&ledger);

        assert!(client.connect().await.is_err());
        assert_eq!(client.phase(), ConnectionPhase::Disconnected);
    }

    #[tokio::test]
    async fn test_ping_returns_chaincode_answer() {
        let ledger = Arc::new(MemoryLedger::default());
        let client = memory_client(&ledger);
        assert_eq!(client.ping().await.unwrap(), "pong");
    }

    struct StalledSession;

    #[async_trait]
    impl LedgerSession for StalledSession {
        async fn evaluate(&self, _: &str, _: &[String]) -> Result<String, LedgerError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(String::new())
        }

        async fn submit(&self, _: &str, _: &[String]) -> Result<(), LedgerError> {
            Ok(())
        }

        async fn disconnect(&self) {}
    }

    struct StalledConnector;

    #[async_trait]
    impl LedgerConnector for StalledConnector {
        async fn connect(&self, _: CredentialMode) -> Result<Arc<dyn LedgerSession>, LedgerError> {
            Ok(Arc::new(StalledSession))
        }
    }

    struct HangingConnector;

    #[async_trait]
    impl LedgerConnector for HangingConnector {
        async fn connect(&self, _: CredentialMode) -> Result<Arc<dyn LedgerSession>, LedgerError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(Arc::new(StalledSession))
        }
    }

    #[tokio::test]
    async fn test_hung_enrollment_is_bounded_by_request_timeout() {
        let client = Arc::new(LedgerClient::new(
            Arc::new(HangingConnector),
            Duration::from_millis(100),
            Duration::from_millis(100),
        ));

        let first = tokio::spawn({
            let client = Arc::clone(&client);
            async move { client.read("QueryConsentWithPagination", &[]).await }
        });
        let second = tokio::spawn({
            let client = Arc::clone(&client);
            async move { client.write("CreateConsent", &["tx-1".into()]).await }
        });

        let (first, second) = tokio::time::timeout(Duration::from_secs(2), async {
            (first.await.unwrap(), second.await.unwrap())
        })
        .await
        .expect("ledger calls must not wait on a hung enrollment");

        assert!(matches!(first, Err(LedgerError::Timeout(100))));
        assert!(matches!(second, Err(LedgerError::Timeout(100))));
        assert_eq!(client.phase(), ConnectionPhase::Disconnected);
    }

    #[tokio::test]
    async fn test_ping_times_out() {
        let client = LedgerClient::new(
            Arc::new(StalledConnector),
            Duration::from_secs(30),
            Duration::from_millis(20),
        );
        let err = client.ping().await.expect_err("ping should time out");
        assert_eq!(err.to_string(), "Request timed out after 20 ms");
    }
}
