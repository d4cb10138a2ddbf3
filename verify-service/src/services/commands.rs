//! `setupverify`: posts the verification panel into a channel.
//!
//! Invocations arrive as signed interactions; the panel goes out through the
//! platform and the acknowledgement text is returned to the caller.

use serde::Serialize;
use std::sync::Arc;

use crate::models::PERMISSION_MANAGE_GUILD;
use crate::services::platform::{GuildPlatform, PlatformError};

const PANEL_TITLE: &str = "🔐 Verify Your Account";
const PANEL_DESCRIPTION: &str = "Click below to verify and gain server access.";
const PANEL_COLOR: u32 = 0x5865F2;
const PANEL_BUTTON_LABEL: &str = "Verify Now";
const DENIED_REPLY: &str = "❌ You need **Manage Server** permissions.";
const CREATED_REPLY: &str = "✅ Verification panel created!";

/// Component type ids and the link button style.
const ACTION_ROW: u8 = 1;
const BUTTON: u8 = 2;
const BUTTON_STYLE_LINK: u8 = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    SetupVerify,
}

impl Command {
    /// Commands are matched by name, case-insensitively; anything else is
    /// not ours.
    pub fn from_name(name: &str) -> Option<Command> {
        match name.trim().to_lowercase().as_str() {
            "setupverify" => Some(Command::SetupVerify),
            _ => None,
        }
    }
}

/// Where a command was invoked and with what authority.
#[derive(Debug, Clone)]
pub struct CommandInvocation {
    pub channel_id: String,
    /// Effective permission bitset of the invoking member.
    pub member_permissions: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelMessage {
    pub embeds: Vec<PanelEmbed>,
    pub components: Vec<ActionRow>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PanelEmbed {
    pub title: String,
    pub description: String,
    pub color: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActionRow {
    #[serde(rename = "type")]
    pub kind: u8,
    pub components: Vec<LinkButton>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LinkButton {
    #[serde(rename = "type")]
    pub kind: u8,
    pub style: u8,
    pub label: String,
    pub url: String,
}

/// The panel: embed plus a single link button to the authorize URL.
pub fn verification_panel(authorize_url: &str) -> ChannelMessage {
    ChannelMessage {
        embeds: vec![PanelEmbed {
            title: PANEL_TITLE.to_string(),
            description: PANEL_DESCRIPTION.to_string(),
            color: PANEL_COLOR,
        }],
        components: vec![ActionRow {
            kind: ACTION_ROW,
            components: vec![LinkButton {
                kind: BUTTON,
                style: BUTTON_STYLE_LINK,
                label: PANEL_BUTTON_LABEL.to_string(),
                url: authorize_url.to_string(),
            }],
        }],
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
    Denied,
    PanelPosted,
}

impl CommandOutcome {
    /// Acknowledgement shown to the invoking member.
    pub fn reply(&self) -> &'static str {
        match self {
            CommandOutcome::Denied => DENIED_REPLY,
            CommandOutcome::PanelPosted => CREATED_REPLY,
        }
    }
}

pub struct CommandHandler {
    platform: Arc<dyn GuildPlatform>,
    authorize_url: String,
}

impl CommandHandler {
    pub fn new(platform: Arc<dyn GuildPlatform>, authorize_url: String) -> Self {
        Self {
            platform,
            authorize_url,
        }
    }

    pub async fn execute(
        &self,
        command: Command,
        invocation: &CommandInvocation,
    ) -> Result<CommandOutcome, PlatformError> {
        match command {
            Command::SetupVerify => {
                if invocation.member_permissions & PERMISSION_MANAGE_GUILD == 0 {
                    tracing::info!(channel_id = %invocation.channel_id, "Panel request denied");
                    return Ok(CommandOutcome::Denied);
                }

                self.platform
                    .send_message(
                        &invocation.channel_id,
                        &verification_panel(&self.authorize_url),
                    )
                    .await?;

                tracing::info!(channel_id = %invocation.channel_id, "Verification panel posted");
                Ok(CommandOutcome::PanelPosted)
            }
        }
    }
}
