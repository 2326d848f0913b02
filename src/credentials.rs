//! Short-lived session token exchange

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Exchanges a long-lived credential for a session token
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Fetch a fresh token
    ///
    /// # Errors
    ///
    /// Returns `Error::Credential` if the exchange fails
    async fn fetch_token(&self) -> Result<SecretString>;
}

#[derive(Debug, Serialize)]
struct TokenRequest {
    ttl: u32,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    key_value: String,
}

/// Token exchange against the Flow API key endpoint
pub struct FlowTokenClient {
    client: reqwest::Client,
    token_url: String,
    api_key: SecretString,
    ttl: u32,
}

impl FlowTokenClient {
    /// Create a client that exchanges `api_key` at `token_url`
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built
    pub fn new(token_url: impl Into<String>, api_key: SecretString, ttl: u32) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()?;

        Ok(Self {
            client,
            token_url: token_url.into(),
            api_key,
            ttl,
        })
    }
}

#[async_trait]
impl TokenProvider for FlowTokenClient {
    async fn fetch_token(&self) -> Result<SecretString> {
        tracing::debug!(url = %self.token_url, ttl = self.ttl, "requesting session token");

        let response = self
            .client
            .post(&self.token_url)
            .header(
                "Authorization",
                format!("Bearer {}", self.api_key.expose_secret()),
            )
            .json(&TokenRequest { ttl: self.ttl })
            .send()
            .await
            .map_err(|e| Error::Credential(format!("token request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Credential(format!("token endpoint returned {status}")));
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| Error::Credential(format!("invalid token response: {e}")))?;

        if body.key_value.is_empty() {
            return Err(Error::Credential("token endpoint returned an empty token".to_string()));
        }

        tracing::info!("session token acquired");
        Ok(SecretString::from(body.key_value))
    }
}
