//! Shared fixtures for the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{TimeDelta, Utc};
use orbit_adls::auth::{AccessToken, AuthError, AuthResult, TokenProvider};
use orbit_adls::backend::StoreError;
use orbit_adls::core::Escalation;
use orbit_adls::{Event, SinkConfig};
use secrecy::SecretString;
use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

pub const FQDN: &str = "account.azuredatalakestore.net";

/// Issues `token-1`, `token-2`, ... valid for a fixed lifetime
pub struct ScriptedProvider {
    issued: AtomicU64,
    lifetime_secs: i64,
    failures: Mutex<u32>,
}

impl ScriptedProvider {
    pub fn new(lifetime_secs: i64) -> Arc<Self> {
        Arc::new(Self {
            issued: AtomicU64::new(0),
            lifetime_secs,
            failures: Mutex::new(0),
        })
    }

    /// Fail the next `count` token requests
    pub fn fail_next(&self, count: u32) {
        *self.failures.lock().unwrap() = count;
    }

    pub fn issued(&self) -> u64 {
        self.issued.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TokenProvider for ScriptedProvider {
    async fn fetch_token(
        &self,
        _token_endpoint: &str,
        _client_id: &str,
        _client_key: &SecretString,
    ) -> AuthResult<AccessToken> {
        {
            let mut failures = self.failures.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                return Err(AuthError::TokenEndpoint {
                    status: 503,
                    body: "temporarily unavailable".to_string(),
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

/// Records exhausted paths instead of exiting
#[derive(Default)]
pub struct RecordingEscalation {
    pub paths: Mutex<Vec<String>>,
}

impl Escalation for RecordingEscalation {
    fn retries_exceeded(&self, path: &str, _error: &StoreError) {
        self.paths.lock().unwrap().push(path.to_string());
    }
}

/// Valid configuration writing to `path` with one object per path
pub fn config(path: &str) -> SinkConfig {
    let mut config = SinkConfig::new(
        FQDN,
        "https://login.microsoftonline.com/tenant/oauth2/token",
        "client-id",
        "client-key",
        path,
    );
    config.single_file_per_thread = false;
    config
}

pub fn event(kind: &str, message: &str) -> Event {
    let mut e = Event::new();
    e.set("type", json!(kind));
    e.set("message", json!(message));
    e
}
