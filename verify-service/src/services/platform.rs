//! Guild platform capability used for role provisioning and panel posting.
//!
//! Passed explicitly to the components that need it; its lifetime is owned
//! by process startup.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, Secret};
use serde::de::DeserializeOwned;
use service_core::observability::{TracedClientExt, TracedRequest};
use thiserror::Error;
use tracing::instrument;

use crate::config::PlatformConfig;
use crate::models::{BotUser, Guild, Member, Role, RoleSpec};
use crate::services::commands::ChannelMessage;

const AUDIT_LOG_REASON: &str = "X-Audit-Log-Reason";
/// Page size for the bot's guild listing (platform maximum).
const GUILD_PAGE_SIZE: usize = 200;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PlatformError {
    #[error("Failed to contact platform API: {0}")]
    Transport(String),

    #[error("Platform API returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Failed to parse platform response: {0}")]
    Decode(String),

    #[error("Platform API call timed out")]
    Timeout,
}

impl From<reqwest::Error> for PlatformError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            PlatformError::Timeout
        } else if err.is_decode() {
            PlatformError::Decode(err.to_string())
        } else {
            PlatformError::Transport(err.to_string())
        }
    }
}

#[async_trait]
pub trait GuildPlatform: Send + Sync {
    /// The account the service is authenticated as.
    async fn current_user(&self) -> Result<BotUser, PlatformError>;

    /// Every guild the service participates in.
    async fn list_guilds(&self) -> Result<Vec<Guild>, PlatformError>;

    /// `None` when the user is not a member of the guild.
    async fn fetch_member(
        &self,
        guild_id: &str,
        user_id: &str,
    ) -> Result<Option<Member>, PlatformError>;

    async fn list_roles(&self, guild_id: &str) -> Result<Vec<Role>, PlatformError>;

    async fn create_role(&self, guild_id: &str, spec: &RoleSpec) -> Result<Role, PlatformError>;

    async fn add_member_role(
        &self,
        guild_id: &str,
        user_id: &str,
        role_id: &str,
    ) -> Result<(), PlatformError>;

    async fn send_message(
        &self,
        channel_id: &str,
        message: &ChannelMessage,
    ) -> Result<(), PlatformError>;
}

/// Discord REST client authenticated with the bot token.
pub struct DiscordPlatformClient {
    client: Client,
    api_base_url: String,
    bot_token: Secret<String>,
}

impl DiscordPlatformClient {
    pub fn new(client: Client, config: &PlatformConfig) -> Self {
        Self {
            client,
            api_base_url: config.api_base_url.trim_end_matches('/').to_string(),
            bot_token: config.bot_token.clone(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_base_url, path)
    }

    fn authorize(&self, request: TracedRequest) -> TracedRequest {
        request.header(
            "Authorization",
            &format!("Bot {}", self.bot_token.expose_secret()),
        )
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, PlatformError> {
        let response = self
            .authorize(self.client.traced_get(&self.url(path)))
            .send()
            .await?;
        let response = error_for_status(response).await?;
        Ok(response.json::<T>().await?)
    }
}

#[async_trait]
impl GuildPlatform for DiscordPlatformClient {
    #[instrument(skip(self))]
    async fn current_user(&self) -> Result<BotUser, PlatformError> {
        self.get_json("/users/@me").await
    }

    #[instrument(skip(self))]
    async fn list_guilds(&self) -> Result<Vec<Guild>, PlatformError> {
        let mut guilds: Vec<Guild> = Vec::new();

        loop {
            let mut path = format!("/users/@me/guilds?limit={}", GUILD_PAGE_SIZE);
            if let Some(last) = guilds.last() {
                path.push_str(&format!("&after={}", last.id));
            }

            let page: Vec<Guild> = self.get_json(&path).await?;
            let done = page.len() < GUILD_PAGE_SIZE;
            guilds.extend(page);
            if done {
                break;
            }
        }

        Ok(guilds)
    }

    #[instrument(skip(self))]
    async fn fetch_member(
        &self,
        guild_id: &str,
        user_id: &str,
    ) -> Result<Option<Member>, PlatformError> {
        let path = format!("/guilds/{}/members/{}", guild_id, user_id);
        let response = self
            .authorize(self.client.traced_get(&self.url(&path)))
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let response = error_for_status(response).await?;
        Ok(Some(response.json::<Member>().await?))
    }

    #[instrument(skip(self))]
    async fn list_roles(&self, guild_id: &str) -> Result<Vec<Role>, PlatformError> {
        self.get_json(&format!("/guilds/{}/roles", guild_id)).await
    }

    #[instrument(skip(self, spec), fields(role = %spec.name))]
    async fn create_role(&self, guild_id: &str, spec: &RoleSpec) -> Result<Role, PlatformError> {
        let path = format!("/guilds/{}/roles", guild_id);
        let response = self
            .authorize(self.client.traced_post(&self.url(&path)))
            .header(AUDIT_LOG_REASON, "Verified role bootstrap")
            .json(spec)
            .send()
            .await?;

        let response = error_for_status(response).await?;
        Ok(response.json::<Role>().await?)
    }

    #[instrument(skip(self))]
    async fn add_member_role(
        &self,
        guild_id: &str,
        user_id: &str,
        role_id: &str,
    ) -> Result<(), PlatformError> {
        let path = format!("/guilds/{}/members/{}/roles/{}", guild_id, user_id, role_id);
        let response = self
            .authorize(self.client.traced_put(&self.url(&path)))
            .header(AUDIT_LOG_REASON, "Member completed verification")
            .send()
            .await?;

        error_for_status(response).await?;
        Ok(())
    }

    #[instrument(skip(self, message))]
    async fn send_message(
        &self,
        channel_id: &str,
        message: &ChannelMessage,
    ) -> Result<(), PlatformError> {
        let path = format!("/channels/{}/messages", channel_id);
        let response = self
            .authorize(self.client.traced_post(&self.url(&path)))
            .json(message)
            .send()
            .await?;

        error_for_status(response).await?;
        Ok(())
    }
}

async fn error_for_status(response: reqwest::Response) -> Result<reqwest::Response, PlatformError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(PlatformError::Status {
        status: status.as_u16(),
        body,
    })
}
