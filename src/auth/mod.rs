//! Access tokens and the credential lifecycle
//!
//! A [`TokenProvider`] exchanges the configured client credentials for an
//! [`AccessToken`]. The token is wrapped into an immutable [`Credential`]
//! that also knows when it must be renewed: `renew_at = expires_at - margin`.
//! The [`lifecycle`] module drives renewal in the background and publishes
//! each new store handle atomically.

pub mod azure_ad;
pub mod lifecycle;

pub use azure_ad::AzureAdTokenProvider;
pub use lifecycle::{CredentialManager, CredentialSettings, CurrentHandle, RenewalTask};

use crate::backend::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use secrecy::SecretString;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for credential operations
pub type AuthResult<T> = std::result::Result<T, AuthError>;

/// Errors raised while acquiring a credential
#[derive(Debug, Error)]
pub enum AuthError {
    /// HTTP transport to the token endpoint failed
    #[error("Token endpoint request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// The token endpoint answered with an error status
    #[error("Token endpoint returned HTTP {status}: {body}")]
    TokenEndpoint { status: u16, body: String },

    /// The token endpoint answered 2xx but the body was not a usable token
    #[error("Malformed token response: {0}")]
    MalformedResponse(String),

    /// Building the store client from the token failed
    #[error("Store connection failed: {0}")]
    Connect(#[source] StoreError),

    /// The store rejected the liveness probe
    #[error("Probe of '{path}' failed: {source}")]
    Probe {
        path: String,
        #[source]
        source: StoreError,
    },
}

/// Raw token as returned by a [`TokenProvider`]
pub struct AccessToken {
    pub token: SecretString,
    pub expires_at: DateTime<Utc>,
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("token", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Exchanges client credentials for an access token
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn fetch_token(
        &self,
        token_endpoint: &str,
        client_id: &str,
        client_key: &SecretString,
    ) -> AuthResult<AccessToken>;
}

/// Immutable access token with its renewal deadline
///
/// `renew_at` never exceeds `expires_at`. A margin longer than the token's
/// remaining lifetime yields a `renew_at` in the past, which makes the
/// renewal task fetch a new token straight away.
pub struct Credential {
    access_token: SecretString,
    expires_at: DateTime<Utc>,
    renew_at: DateTime<Utc>,
}

impl Credential {
    /// Build a credential renewing `margin` before expiry
    pub fn new(access_token: SecretString, expires_at: DateTime<Utc>, margin: Duration) -> Self {
        let margin = TimeDelta::from_std(margin).unwrap_or(TimeDelta::MAX);
        let renew_at = expires_at
            .checked_sub_signed(margin)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        Self {
            access_token,
            expires_at,
            renew_at,
        }
    }

    pub fn from_token(token: AccessToken, margin: Duration) -> Self {
        Self::new(token.token, token.expires_at, margin)
    }

    pub fn access_token(&self) -> &SecretString {
        &self.access_token
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    pub fn renew_at(&self) -> DateTime<Utc> {
        self.renew_at
    }

    /// True once `now` has reached the token's expiry
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Time left until renewal is due (zero when already due)
    pub fn until_renewal(&self, now: DateTime<Utc>) -> Duration {
        (self.renew_at - now).to_std().unwrap_or_default()
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("access_token", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .field("renew_at", &self.renew_at)
            .finish()
    }
}
