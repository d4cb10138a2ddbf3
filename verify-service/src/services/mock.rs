//! In-memory stand-ins for every upstream the service talks to.
//!
//! Used by tests and, for the notification sink, by development setups that
//! have no webhook configured.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;

use super::commands::ChannelMessage;
use super::geo::GeoResolver;
use super::identity::{IdentityError, IdentityProvider};
use super::platform::{GuildPlatform, PlatformError};
use super::webhook::{build_message, CredentialPolicy, DeliveryError, NotificationSink, WebhookMessage};
use crate::models::{
    BotUser, Connection, GeoRecord, Guild, IdentityCredential, Member, Profile, Role, RoleSpec,
    VerificationRecord,
};

/// A minimal profile with the given id and username.
pub fn sample_profile(id: &str, username: &str) -> Profile {
    Profile {
        id: id.to_string(),
        username: username.to_string(),
        discriminator: None,
        global_name: None,
        email: None,
        phone: None,
        avatar: None,
        mfa_enabled: false,
        locale: None,
    }
}

/// Mock identity provider with scripted results.
pub struct MockIdentityProvider {
    profile: Profile,
    connections: Vec<Connection>,
    exchange_error: Option<IdentityError>,
    profile_error: Option<IdentityError>,
    profile_delay: Duration,
    exchange_calls: AtomicU64,
    profile_calls: AtomicU64,
    connections_calls: AtomicU64,
}

impl MockIdentityProvider {
    pub fn new(profile: Profile) -> Self {
        Self {
            profile,
            connections: Vec::new(),
            exchange_error: None,
            profile_error: None,
            profile_delay: Duration::ZERO,
            exchange_calls: AtomicU64::new(0),
            profile_calls: AtomicU64::new(0),
            connections_calls: AtomicU64::new(0),
        }
    }

    pub fn with_connections(mut self, connections: Vec<Connection>) -> Self {
        self.connections = connections;
        self
    }

    pub fn failing_exchange(mut self, error: IdentityError) -> Self {
        self.exchange_error = Some(error);
        self
    }

    pub fn failing_profile(mut self, error: IdentityError) -> Self {
        self.profile_error = Some(error);
        self
    }

    pub fn with_profile_delay(mut self, delay: Duration) -> Self {
        self.profile_delay = delay;
        self
    }

    pub fn exchange_calls(&self) -> u64 {
        self.exchange_calls.load(Ordering::SeqCst)
    }

    pub fn profile_calls(&self) -> u64 {
        self.profile_calls.load(Ordering::SeqCst)
    }

    pub fn connections_calls(&self) -> u64 {
        self.connections_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IdentityProvider for MockIdentityProvider {
    async fn exchange_code(
        &self,
        code: &str,
        _redirect_uri: &str,
    ) -> Result<IdentityCredential, IdentityError> {
        self.exchange_calls.fetch_add(1, Ordering::SeqCst);

        match &self.exchange_error {
            Some(error) => Err(error.clone()),
            None => Ok(IdentityCredential::new(
                format!("mock-access-{}", code),
                Some(format!("mock-refresh-{}", code)),
            )),
        }
    }

    async fn fetch_profile(&self, _access_token: &str) -> Result<Profile, IdentityError> {
        self.profile_calls.fetch_add(1, Ordering::SeqCst);

        if !self.profile_delay.is_zero() {
            tokio::time::sleep(self.profile_delay).await;
        }

        match &self.profile_error {
            Some(error) => Err(error.clone()),
            None => Ok(self.profile.clone()),
        }
    }

    async fn fetch_connections(&self, _access_token: &str) -> Vec<Connection> {
        self.connections_calls.fetch_add(1, Ordering::SeqCst);
        self.connections.clone()
    }
}

/// Mock geo resolver returning a fixed record (or nothing).
pub struct MockGeoResolver {
    record: Option<GeoRecord>,
    delay: Duration,
    calls: AtomicU64,
}

impl MockGeoResolver {
    pub fn new(record: GeoRecord) -> Self {
        Self {
            record: Some(record),
            delay: Duration::ZERO,
            calls: AtomicU64::new(0),
        }
    }

    /// Behaves like a failed lookup.
    pub fn unknown() -> Self {
        Self {
            record: None,
            delay: Duration::ZERO,
            calls: AtomicU64::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GeoResolver for MockGeoResolver {
    async fn resolve(&self, _address: &str) -> Option<GeoRecord> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.record.clone()
    }
}

/// Mock notification sink that keeps the rendered messages.
pub struct MockNotificationSink {
    enabled: bool,
    unreachable: bool,
    delivered: Mutex<Vec<WebhookMessage>>,
}

impl MockNotificationSink {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            unreachable: false,
            delivered: Mutex::new(Vec::new()),
        }
    }

    /// Every delivery fails as if the endpoint refused the connection.
    pub fn unreachable() -> Self {
        Self {
            enabled: true,
            unreachable: true,
            delivered: Mutex::new(Vec::new()),
        }
    }

    pub async fn delivered(&self) -> Vec<WebhookMessage> {
        self.delivered.lock().await.clone()
    }
}

#[async_trait]
impl NotificationSink for MockNotificationSink {
    async fn deliver(&self, record: &VerificationRecord) -> Result<(), DeliveryError> {
        if !self.enabled {
            return Err(DeliveryError::NotEnabled(
                "Mock notification sink not enabled".to_string(),
            ));
        }
        if self.unreachable {
            return Err(DeliveryError::Transport(
                "error sending request: connection refused".to_string(),
            ));
        }

        let message = build_message(record, CredentialPolicy::Omit, Utc::now());
        tracing::info!(
            user_id = %record.identity_id(),
            "[MOCK] Verification log would be sent"
        );
        self.delivered.lock().await.push(message);
        Ok(())
    }
}

#[derive(Default)]
struct PlatformState {
    roles: HashMap<String, Vec<Role>>,
    member_roles: HashMap<(String, String), Vec<String>>,
    messages: Vec<(String, ChannelMessage)>,
    role_creations: usize,
}

/// In-memory guild platform.
pub struct MockGuildPlatform {
    guilds: Vec<Guild>,
    members: HashSet<(String, String)>,
    failing_guilds: HashSet<String>,
    rejects_credentials: bool,
    fails_messages: bool,
    role_lookup_delay: Duration,
    next_id: AtomicU64,
    state: Mutex<PlatformState>,
}

impl Default for MockGuildPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl MockGuildPlatform {
    pub fn new() -> Self {
        Self {
            guilds: Vec::new(),
            members: HashSet::new(),
            failing_guilds: HashSet::new(),
            rejects_credentials: false,
            fails_messages: false,
            role_lookup_delay: Duration::ZERO,
            next_id: AtomicU64::new(1000),
            state: Mutex::new(PlatformState::default()),
        }
    }

    pub fn with_guild(mut self, id: &str, name: &str) -> Self {
        self.guilds.push(Guild {
            id: id.to_string(),
            name: name.to_string(),
        });
        self
    }

    pub fn with_member(mut self, guild_id: &str, user_id: &str) -> Self {
        self.members
            .insert((guild_id.to_string(), user_id.to_string()));
        self
    }

    pub fn with_role(mut self, guild_id: &str, role_id: &str, name: &str) -> Self {
        self.state
            .get_mut()
            .roles
            .entry(guild_id.to_string())
            .or_default()
            .push(Role {
                id: role_id.to_string(),
                name: name.to_string(),
            });
        self
    }

    /// Member lookups in this guild fail with a permission error.
    pub fn failing_guild(mut self, guild_id: &str) -> Self {
        self.failing_guilds.insert(guild_id.to_string());
        self
    }

    /// `current_user` answers 401, like a revoked bot token.
    pub fn rejecting_credentials(mut self) -> Self {
        self.rejects_credentials = true;
        self
    }

    /// Channel posts fail with a permission error.
    pub fn failing_messages(mut self) -> Self {
        self.fails_messages = true;
        self
    }

    /// Delay between reading the role list and returning it, widening the
    /// window between lookup and create.
    pub fn with_role_lookup_delay(mut self, delay: Duration) -> Self {
        self.role_lookup_delay = delay;
        self
    }

    pub async fn roles_named(&self, guild_id: &str, name: &str) -> usize {
        self.state
            .lock()
            .await
            .roles
            .get(guild_id)
            .map(|roles| roles.iter().filter(|r| r.name == name).count())
            .unwrap_or(0)
    }

    pub async fn member_roles(&self, guild_id: &str, user_id: &str) -> Vec<String> {
        self.state
            .lock()
            .await
            .member_roles
            .get(&(guild_id.to_string(), user_id.to_string()))
            .cloned()
            .unwrap_or_default()
    }

    pub async fn role_creations(&self) -> usize {
        self.state.lock().await.role_creations
    }

    pub async fn sent_messages(&self) -> Vec<(String, ChannelMessage)> {
        self.state.lock().await.messages.clone()
    }

    fn missing_access() -> PlatformError {
        PlatformError::Status {
            status: 403,
            body: "{\"message\": \"Missing Access\", \"code\": 50001}".to_string(),
        }
    }
}

#[async_trait]
impl GuildPlatform for MockGuildPlatform {
    async fn current_user(&self) -> Result<BotUser, PlatformError> {
        if self.rejects_credentials {
            return Err(PlatformError::Status {
                status: 401,
                body: "{\"message\": \"401: Unauthorized\", \"code\": 0}".to_string(),
            });
        }

        Ok(BotUser {
            id: "900".to_string(),
            username: "verify-bot".to_string(),
        })
    }

    async fn list_guilds(&self) -> Result<Vec<Guild>, PlatformError> {
        Ok(self.guilds.clone())
    }

    async fn fetch_member(
        &self,
        guild_id: &str,
        user_id: &str,
    ) -> Result<Option<Member>, PlatformError> {
        if self.failing_guilds.contains(guild_id) {
            return Err(Self::missing_access());
        }

        if !self
            .members
            .contains(&(guild_id.to_string(), user_id.to_string()))
        {
            return Ok(None);
        }

        Ok(Some(Member {
            roles: self.member_roles(guild_id, user_id).await,
        }))
    }

    async fn list_roles(&self, guild_id: &str) -> Result<Vec<Role>, PlatformError> {
        let roles = self
            .state
            .lock()
            .await
            .roles
            .get(guild_id)
            .cloned()
            .unwrap_or_default();

        if !self.role_lookup_delay.is_zero() {
            tokio::time::sleep(self.role_lookup_delay).await;
        }

        Ok(roles)
    }

    async fn create_role(&self, guild_id: &str, spec: &RoleSpec) -> Result<Role, PlatformError> {
        let role = Role {
            id: self.next_id.fetch_add(1, Ordering::SeqCst).to_string(),
            name: spec.name.clone(),
        };

        let mut state = self.state.lock().await;
        state.role_creations += 1;
        state
            .roles
            .entry(guild_id.to_string())
            .or_default()
            .push(role.clone());

        Ok(role)
    }

    async fn add_member_role(
        &self,
        guild_id: &str,
        user_id: &str,
        role_id: &str,
    ) -> Result<(), PlatformError> {
        let mut state = self.state.lock().await;
        let roles = state
            .member_roles
            .entry((guild_id.to_string(), user_id.to_string()))
            .or_default();

        // Assigning a role the member already has is a no-op upstream too.
        if !roles.iter().any(|r| r == role_id) {
            roles.push(role_id.to_string());
        }

        Ok(())
    }

    async fn send_message(
        &self,
        channel_id: &str,
        message: &ChannelMessage,
    ) -> Result<(), PlatformError> {
        if self.fails_messages {
            return Err(Self::missing_access());
        }

        self.state
            .lock()
            .await
            .messages
            .push((channel_id.to_string(), message.clone()));
        Ok(())
    }
}
