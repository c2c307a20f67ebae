//! Azure AD client-credentials token provider
//!
//! Posts `grant_type=client_credentials` to the configured OAuth2 token
//! endpoint and reads `access_token` plus `expires_in` from the JSON answer.
//! Azure AD v1 endpoints encode the numeric fields as strings, so both
//! representations are accepted.

use super::{AccessToken, AuthError, AuthResult, TokenProvider};
use async_trait::async_trait;
use chrono::{TimeDelta, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Deserializer};
use std::time::Duration;
use tracing::debug;

/// Resource identifier of the Data Lake Store data plane
pub const DATALAKE_RESOURCE: &str = "https://datalake.azure.net/";

/// Token provider talking to an Azure AD OAuth2 token endpoint
#[derive(Debug, Clone)]
pub struct AzureAdTokenProvider {
    http: reqwest::Client,
    resource: String,
}

impl AzureAdTokenProvider {
    /// Create a provider requesting tokens for the Data Lake Store resource
    pub fn new() -> AuthResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(concat!("orbit-adls/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http,
            resource: DATALAKE_RESOURCE.to_string(),
        })
    }

    /// Request tokens for a different resource
    pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = resource.into();
        self
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(deserialize_with = "lenient_u64")]
    expires_in: u64,
}

/// Accept `3599` as well as `"3599"`
fn lenient_u64<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumberOrString {
        Number(u64),
        String(String),
    }

    match NumberOrString::deserialize(deserializer)? {
        NumberOrString::Number(n) => Ok(n),
        NumberOrString::String(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

fn parse_token_response(body: &str) -> AuthResult<AccessToken> {
    let response: TokenResponse = serde_json::from_str(body)
        .map_err(|e| AuthError::MalformedResponse(e.to_string()))?;
    if response.access_token.is_empty() {
        return Err(AuthError::MalformedResponse(
            "empty access_token".to_string(),
        ));
    }

    let expires_at = i64::try_from(response.expires_in)
        .ok()
        .and_then(TimeDelta::try_seconds)
        .and_then(|lifetime| Utc::now().checked_add_signed(lifetime))
        .ok_or_else(|| {
            AuthError::MalformedResponse(format!(
                "expires_in out of range: {}",
                response.expires_in
            ))
        })?;

    Ok(AccessToken {
        token: SecretString::new(response.access_token.into_boxed_str()),
        expires_at,
    })
}

#[async_trait]
impl TokenProvider for AzureAdTokenProvider {
    #[tracing::instrument(skip(self, client_key), fields(client_id = %client_id))]
    async fn fetch_token(
        &self,
        token_endpoint: &str,
        client_id: &str,
        client_key: &SecretString,
    ) -> AuthResult<AccessToken> {
        let form = [
            ("grant_type", "client_credentials"),
            ("client_id", client_id),
            ("client_secret", client_key.expose_secret()),
            ("resource", self.resource.as_str()),
        ];

        let response = self.http.post(token_endpoint).form(&form).send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(AuthError::TokenEndpoint {
                status: status.as_u16(),
                body,
            });
        }

        let token = parse_token_response(&body)?;
        debug!(expires_at = %token.expires_at, "Token endpoint issued access token");
        Ok(token)
    }
}
