use serde::{Deserialize, Serialize};

/// VIEW_CHANNEL permission bit.
pub const PERMISSION_VIEW_CHANNEL: u64 = 1 << 10;
/// SEND_MESSAGES permission bit.
pub const PERMISSION_SEND_MESSAGES: u64 = 1 << 11;
/// MANAGE_GUILD permission bit.
pub const PERMISSION_MANAGE_GUILD: u64 = 1 << 5;

/// Colour given to a freshly created verified role (`#57F287`).
pub const VERIFIED_ROLE_COLOR: u32 = 0x57F287;

/// A guild the service's bot account participates in.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Guild {
    pub id: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Role {
    pub id: String,
    pub name: String,
}

/// Guild member as returned by the platform; only the role set matters here.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Member {
    #[serde(default)]
    pub roles: Vec<String>,
}

/// The bot account the service is logged in as.
#[derive(Debug, Clone, Deserialize)]
pub struct BotUser {
    pub id: String,
    pub username: String,
}

/// Payload for creating a role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoleSpec {
    pub name: String,
    pub color: u32,
    /// Permission bitset, serialised as a decimal string like the platform expects.
    #[serde(serialize_with = "serialize_permissions")]
    pub permissions: u64,
}

impl RoleSpec {
    /// Verified role: fixed colour, view + send only.
    pub fn verified(name: &str) -> Self {
        Self {
            name: name.to_string(),
            color: VERIFIED_ROLE_COLOR,
            permissions: PERMISSION_VIEW_CHANNEL | PERMISSION_SEND_MESSAGES,
        }
    }
}

fn serialize_permissions<S: serde::Serializer>(bits: &u64, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&bits.to_string())
}

/// What happened in one guild during provisioning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuildOutcome {
    /// Role assigned; `role_created` when this run had to create it.
    Assigned { role_id: String, role_created: bool },
    /// The user is not a member of this guild.
    Skipped,
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuildReport {
    pub guild_id: String,
    pub guild_name: String,
    pub outcome: GuildOutcome,
}

/// Per-guild results of one provisioning run.
#[derive(Debug, Clone, Default)]
pub struct ProvisionReport {
    pub guilds: Vec<GuildReport>,
}

impl ProvisionReport {
    pub fn assigned(&self) -> usize {
        self.count(|o| matches!(o, GuildOutcome::Assigned { .. }))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, GuildOutcome::Skipped))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, GuildOutcome::Failed { .. }))
    }

    pub fn outcome_for(&self, guild_id: &str) -> Option<&GuildOutcome> {
        self.guilds
            .iter()
            .find(|g| g.guild_id == guild_id)
            .map(|g| &g.outcome)
    }

    fn count(&self, pred: impl Fn(&GuildOutcome) -> bool) -> usize {
        self.guilds.iter().filter(|g| pred(&g.outcome)).count()
    }
}
