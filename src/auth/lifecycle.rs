//! Credential lifecycle: acquisition, background renewal, handle publication
//!
//! [`CredentialManager::start`] acquires the first credential in the
//! caller's task (failure is fatal) and then spawns one long-lived renewal
//! task that owns the loop:
//!
//! ```text
//! Idle -> Acquiring -> Scheduled -> Acquiring -> Scheduled -> ...
//!                          |             |
//!                          |             +-- failure: wait min(retry, max_retry), re-arm now
//!                          +-- fires at renew_at = expires_at - margin
//! ```
//!
//! Each successful renewal is published into [`CurrentHandle`], an atomic
//! pointer cell. Writers take a snapshot with [`CurrentHandle::load`]; a swap
//! never blocks them and never shows them a half-built handle. Renewal
//! failures are retried forever on a fixed delay.

use super::{AuthError, AuthResult, Credential, TokenProvider};
use crate::backend::{RemoteHandle, StoreConnector};
use arc_swap::ArcSwap;
use chrono::{TimeDelta, Utc};
use secrecy::SecretString;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Everything needed to acquire a credential and bind a store to it
pub struct CredentialSettings {
    /// Store account FQDN (e.g. `myaccount.azuredatalakestore.net`)
    pub fqdn: String,
    /// OAuth2 token endpoint
    pub token_endpoint: String,
    pub client_id: String,
    pub client_key: SecretString,
    /// Path queried to prove the new client works
    pub probe_path: String,
    /// Subtracted from the token expiry to get the renewal instant
    pub security_margin: Duration,
    pub retry_interval: Duration,
    pub max_retry_interval: Duration,
}

impl fmt::Debug for CredentialSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialSettings")
            .field("fqdn", &self.fqdn)
            .field("token_endpoint", &self.token_endpoint)
            .field("client_id", &self.client_id)
            .field("client_key", &"[REDACTED]")
            .field("probe_path", &self.probe_path)
            .field("security_margin", &self.security_margin)
            .finish()
    }
}

/// Shared, atomically swappable reference to the live store handle
#[derive(Clone)]
pub struct CurrentHandle {
    cell: Arc<ArcSwap<RemoteHandle>>,
    renewals: Arc<AtomicU64>,
}

impl CurrentHandle {
    pub fn new(handle: RemoteHandle) -> Self {
        Self {
            cell: Arc::new(ArcSwap::from_pointee(handle)),
            renewals: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Snapshot of the current handle
    ///
    /// The snapshot stays valid after a later swap.
    pub fn load(&self) -> Arc<RemoteHandle> {
        self.cell.load_full()
    }

    /// Replace the current handle
    pub fn publish(&self, handle: RemoteHandle) {
        self.cell.store(Arc::new(handle));
        self.renewals.fetch_add(1, Ordering::SeqCst);
    }

    /// Number of handles published after the initial one
    pub fn renewals(&self) -> u64 {
        self.renewals.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for CurrentHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CurrentHandle")
            .field("handle", &self.load())
            .field("renewals", &self.renewals())
            .finish()
    }
}

/// Acquires credentials and binds store clients to them
pub struct CredentialManager {
    settings: CredentialSettings,
    provider: Arc<dyn TokenProvider>,
    connector: Arc<dyn StoreConnector>,
}

impl CredentialManager {
    pub fn new(
        settings: CredentialSettings,
        provider: Arc<dyn TokenProvider>,
        connector: Arc<dyn StoreConnector>,
    ) -> Self {
        Self {
            settings,
            provider,
            connector,
        }
    }

    pub fn settings(&self) -> &CredentialSettings {
        &self.settings
    }

    /// Fetch a token, build a store client and probe it
    ///
    /// The probe's answer is ignored; only an error counts.
    pub async fn acquire(&self) -> AuthResult<RemoteHandle> {
        let s = &self.settings;
        let token = self
            .provider
            .fetch_token(&s.token_endpoint, &s.client_id, &s.client_key)
            .await?;
        let credential = Credential::from_token(token, s.security_margin);

        info!(
            expires_at = %credential.expires_at(),
            renew_at = %credential.renew_at(),
            "Got ADLS OAuth token"
        );

        let store = self
            .connector
            .connect(&s.fqdn, &credential)
            .await
            .map_err(AuthError::Connect)?;

        store
            .exists(&s.probe_path)
            .await
            .map_err(|source| AuthError::Probe {
                path: s.probe_path.clone(),
                source,
            })?;
        debug!(probe = %s.probe_path, store = store.name(), "Store client passed probe");

        Ok(RemoteHandle::new(credential, store))
    }

    /// Fixed delay between failed renewal attempts
    pub fn renewal_retry_delay(&self) -> Duration {
        self.settings
            .retry_interval
            .min(self.settings.max_retry_interval)
    }

    /// Acquire the first credential and spawn the renewal task
    ///
    /// # Errors
    ///
    /// Returns the acquisition error if the first credential cannot be
    /// obtained; nothing is spawned in that case.
    pub async fn start(self) -> AuthResult<RenewalTask> {
        let first = self.acquire().await?;
        let current = CurrentHandle::new(first);
        let shutdown = CancellationToken::new();

        let join = tokio::spawn(renewal_loop(self, current.clone(), shutdown.clone()));

        Ok(RenewalTask {
            current,
            shutdown,
            join: Some(join),
        })
    }
}

async fn renewal_loop(
    manager: CredentialManager,
    current: CurrentHandle,
    shutdown: CancellationToken,
) {
    let mut renew_at = current.load().credential().renew_at();

    loop {
        let wait = (renew_at - Utc::now()).to_std().unwrap_or_default();
        debug!(renew_at = %renew_at, wait_secs = wait.as_secs_f64(), "Token renewal scheduled");

        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(wait) => {}
        }

        let attempt = tokio::select! {
            _ = shutdown.cancelled() => break,
            result = manager.acquire() => result,
        };

        match attempt {
            Ok(handle) => {
                // A credential due on arrival waits one retry delay before the next fetch.
                let floor = Utc::now()
                    + TimeDelta::from_std(manager.renewal_retry_delay()).unwrap_or_default();
                renew_at = handle.credential().renew_at().max(floor);
                current.publish(handle);
                info!(renew_at = %renew_at, "ADLS OAuth token refreshed");
            }
            Err(e) => {
                let delay = manager.renewal_retry_delay();
                error!(
                    error = %e,
                    retry_in_secs = delay.as_secs_f64(),
                    "ADLS refresh OAuth token failed! Retrying..."
                );
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(delay) => {}
                }
                renew_at = Utc::now();
            }
        }
    }

    debug!("Token renewal loop stopped");
}

/// Running renewal task and the handle cell it feeds
///
/// Dropping the task stops renewal; [`shutdown`](RenewalTask::shutdown)
/// additionally waits for the loop to exit.
pub struct RenewalTask {
    current: CurrentHandle,
    shutdown: CancellationToken,
    join: Option<JoinHandle<()>>,
}

impl RenewalTask {
    pub fn current(&self) -> &CurrentHandle {
        &self.current
    }

    /// Stop renewing and wait for the loop to finish
    ///
    /// In-flight writes keep their handle snapshot and are not interrupted.
    pub async fn shutdown(mut self) {
        self.shutdown.cancel();
        if let Some(join) = self.join.take() {
            if let Err(e) = join.await {
                warn!(error = %e, "Token renewal task ended abnormally");
            }
        }
    }
}

impl Drop for RenewalTask {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AccessToken;
    use crate::backend::{FaultKind, FaultPoint, MemoryConnector, MemoryStore};
    use async_trait::async_trait;

    use secrecy::ExposeSecret;
    use std::sync::Mutex;

    /// Issues `token-1`, `token-2`, ... each valid for `lifetime_secs`
    struct CountingProvider {
        issued: AtomicU64,
        lifetime_secs: i64,
        failures: Mutex<u32>,
    }

    impl CountingProvider {
        fn new(lifetime_secs: i64) -> Self {
            Self {
                issued: AtomicU64::new(0),
                lifetime_secs,
                failures: Mutex::new(0),
            }
        }

        fn fail_next(&self, count: u32) {
            *self.failures.lock().unwrap() = count;
        }
    }

    #[async_trait]
    impl TokenProvider for CountingProvider {
        async fn fetch_token(
            &self,
            _endpoint: &str,
            _client_id: &str,
            _client_key: &SecretString,
        ) -> AuthResult<AccessToken> {
            {
                let mut failures = self.failures.lock().unwrap();
                if *failures > 0 {
                    *failures -= 1;
                    return Err(AuthError::TokenEndpoint {
                        status: 503,
                        body: "unavailable".to_string(),
                    });
                }
            }
            let n = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(AccessToken {
                token: SecretString::new(format!("token-{}", n).into_boxed_str()),
                expires_at: Utc::now() + TimeDelta::seconds(self.lifetime_secs),
            })
        }
    }

    fn settings(margin_secs: u64) -> CredentialSettings {
        CredentialSettings {
            fqdn: "account.azuredatalakestore.net".to_string(),
            token_endpoint: "https://login.example.com/tenant/oauth2/token".to_string(),
            client_id: "client".to_string(),
            client_key: SecretString::new("key".to_string().into_boxed_str()),
            probe_path: "testfile".to_string(),
            security_margin: Duration::from_secs(margin_secs),
            retry_interval: Duration::from_secs(1),
            max_retry_interval: Duration::from_secs(10),
        }
    }

    fn token_of(current: &CurrentHandle) -> String {
        current
            .load()
            .credential()
            .access_token()
            .expose_secret()
            .to_string()
    }

    #[tokio::test]
    async fn test_acquire_probes_store() {
        let store = MemoryStore::new();
        let manager = CredentialManager::new(
            settings(300),
            Arc::new(CountingProvider::new(3600)),
            Arc::new(MemoryConnector::new(store.clone())),
        );

        let handle = manager.acquire().await.unwrap();
        assert_eq!(
            handle.credential().renew_at(),
            handle.credential().expires_at() - TimeDelta::seconds(300)
        );
        let ops = store.ops();
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].0, "token-1");
        assert_eq!(ops[0].1.path(), "testfile");
    }

    #[tokio::test]
    async fn test_probe_failure_fails_acquisition() {
        let store = MemoryStore::new();
        store.fail_always(
            FaultPoint::Exists,
            FaultKind::Remote {
                status: 403,
                message: "forbidden".to_string(),
            },
        );
        let manager = CredentialManager::new(
            settings(300),
            Arc::new(CountingProvider::new(3600)),
            Arc::new(MemoryConnector::new(store)),
        );

        let result = manager.acquire().await;
        assert!(matches!(result, Err(AuthError::Probe { .. })));
    }

    #[tokio::test]
    async fn test_start_fails_without_first_credential() {
        let provider = Arc::new(CountingProvider::new(3600));
        provider.fail_next(1);
        let manager = CredentialManager::new(
            settings(300),
            provider,
            Arc::new(MemoryConnector::new(MemoryStore::new())),
        );

        assert!(manager.start().await.is_err());
    }

    #[test]
    fn test_renewal_retry_delay_is_capped() {
        let mut s = settings(300);
        s.retry_interval = Duration::from_secs(30);
        let manager = CredentialManager::new(
            s,
            Arc::new(CountingProvider::new(3600)),
            Arc::new(MemoryConnector::new(MemoryStore::new())),
        );
        assert_eq!(manager.renewal_retry_delay(), Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_renews_at_expiry_minus_margin() {
        // Tokens live 310s with a 300s margin: renewal is due 10s after issue.
        let provider = Arc::new(CountingProvider::new(310));
        let manager = CredentialManager::new(
            settings(300),
            provider.clone(),
            Arc::new(MemoryConnector::new(MemoryStore::new())),
        );
        let task = manager.start().await.unwrap();
        let current = task.current().clone();
        assert_eq!(token_of(&current), "token-1");

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(current.renewals(), 0);

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(current.renewals(), 1);
        assert_eq!(token_of(&current), "token-2");

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(token_of(&current), "token-3");

        task.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_renewal_failures_retry_forever() {
        let provider = Arc::new(CountingProvider::new(310));
        let manager = CredentialManager::new(
            settings(300),
            provider.clone(),
            Arc::new(MemoryConnector::new(MemoryStore::new())),
        );
        let task = manager.start().await.unwrap();
        let current = task.current().clone();

        provider.fail_next(5);
        // Due at 10s, then five failures one second apart.
        tokio::time::sleep(Duration::from_secs(14)).await;
        assert_eq!(token_of(&current), "token-1");

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(token_of(&current), "token-2");
        assert_eq!(current.renewals(), 1);

        task.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_past_renewal_deadline_renews_immediately() {
        // Margin exceeds lifetime: every credential is due on arrival.
        let provider = Arc::new(CountingProvider::new(60));
        let manager = CredentialManager::new(
            settings(300),
            provider.clone(),
            Arc::new(MemoryConnector::new(MemoryStore::new())),
        );
        let task = manager.start().await.unwrap();
        let current = task.current().clone();

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(current.renewals() >= 1);

        task.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_renewal() {
        let provider = Arc::new(CountingProvider::new(310));
        let manager = CredentialManager::new(
            settings(300),
            provider.clone(),
            Arc::new(MemoryConnector::new(MemoryStore::new())),
        );
        let task = manager.start().await.unwrap();
        let current = task.current().clone();

        task.shutdown().await;
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(current.renewals(), 0);
        assert_eq!(provider.issued.load(Ordering::SeqCst), 1);
    }
}
