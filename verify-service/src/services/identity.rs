//! Identity provider client: code exchange, profile and linked accounts.

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, Secret};
use serde::Deserialize;
use service_core::observability::TracedClientExt;
use thiserror::Error;
use tracing::instrument;

use crate::config::OAuthConfig;
use crate::models::{Connection, IdentityCredential, Profile};

/// Upstream error bodies are kept for logs, bounded.
const MAX_ERROR_BODY: usize = 512;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum IdentityError {
    #[error("Failed to contact identity provider: {0}")]
    Transport(String),

    #[error("Identity provider returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Failed to parse identity provider response: {0}")]
    Decode(String),

    #[error("Identity provider call timed out")]
    Timeout,
}

impl IdentityError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, IdentityError::Timeout)
    }

    fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            IdentityError::Timeout
        } else if err.is_decode() {
            IdentityError::Decode(err.to_string())
        } else {
            IdentityError::Transport(err.to_string())
        }
    }
}

/// The three calls made against the identity provider on behalf of a user.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Trade a single-use authorization code for tokens.
    async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: &str,
    ) -> Result<IdentityCredential, IdentityError>;

    /// Fetch the authenticated user. Failure is fatal to verification.
    async fn fetch_profile(&self, access_token: &str) -> Result<Profile, IdentityError>;

    /// Fetch linked accounts. Any failure yields an empty list.
    async fn fetch_connections(&self, access_token: &str) -> Vec<Connection>;
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
}

/// REST client for the Discord OAuth2 and user endpoints.
pub struct DiscordIdentityClient {
    client: Client,
    api_base_url: String,
    client_id: String,
    client_secret: Secret<String>,
}

impl DiscordIdentityClient {
    pub fn new(client: Client, config: &OAuthConfig) -> Self {
        Self {
            client,
            api_base_url: config.api_base_url.trim_end_matches('/').to_string(),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        access_token: &str,
    ) -> Result<T, IdentityError> {
        let url = format!("{}{}", self.api_base_url, path);
        let response = self
            .client
            .traced_get(&url)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(IdentityError::from_reqwest)?;

        let response = error_for_status(response).await?;
        read_json(response).await
    }
}

#[async_trait]
impl IdentityProvider for DiscordIdentityClient {
    #[instrument(skip_all)]
    async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: &str,
    ) -> Result<IdentityCredential, IdentityError> {
        let url = format!("{}/oauth2/token", self.api_base_url);
        let response = self
            .client
            .traced_post(&url)
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.expose_secret().as_str()),
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", redirect_uri),
            ])
            .send()
            .await
            .map_err(IdentityError::from_reqwest)?;

        let response = error_for_status(response).await?;

        let tokens: TokenResponse = read_json(response).await?;

        Ok(IdentityCredential::new(
            tokens.access_token,
            tokens.refresh_token,
        ))
    }

    #[instrument(skip_all)]
    async fn fetch_profile(&self, access_token: &str) -> Result<Profile, IdentityError> {
        self.get_json("/users/@me", access_token).await
    }

    #[instrument(skip_all)]
    async fn fetch_connections(&self, access_token: &str) -> Vec<Connection> {
        match self
            .get_json::<Vec<Connection>>("/users/@me/connections", access_token)
            .await
        {
            Ok(connections) => connections,
            Err(e) => {
                tracing::warn!(error = %e, "Connections fetch failed, continuing without");
                Vec::new()
            }
        }
    }
}

/// Body read failures keep their timeout classification; anything else
/// past a successful status is a decode problem.
async fn read_json<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
) -> Result<T, IdentityError> {
    response
        .json::<T>()
        .await
        .map_err(|e| match IdentityError::from_reqwest(e) {
            IdentityError::Transport(msg) => IdentityError::Decode(msg),
            other => other,
        })
}

async fn error_for_status(response: reqwest::Response) -> Result<reqwest::Response, IdentityError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let mut body = response.text().await.unwrap_or_default();
    if body.len() > MAX_ERROR_BODY {
        let mut cut = MAX_ERROR_BODY;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
    }

    Err(IdentityError::Status {
        status: status.as_u16(),
        body,
    })
}
