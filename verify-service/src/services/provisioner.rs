//! Grants the verified role in every guild the user belongs to.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::instrument;

use crate::models::{Guild, GuildOutcome, GuildReport, ProvisionReport, Role, RoleSpec};
use crate::services::metrics::record_provisioning;
use crate::services::platform::{GuildPlatform, PlatformError};

/// Walks the service's guilds sequentially and assigns the verified role.
///
/// Role lookup-then-create has no atomicity guarantee from the platform.
/// With `serialize_role_creation` the check and create are held under a
/// per-guild lock, which closes the race between verifications handled by
/// this process; separate processes can still both create the role.
pub struct GrantProvisioner {
    platform: Arc<dyn GuildPlatform>,
    role_name: String,
    serialize_role_creation: bool,
    call_timeout: Duration,
    role_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl GrantProvisioner {
    pub fn new(
        platform: Arc<dyn GuildPlatform>,
        role_name: impl Into<String>,
        serialize_role_creation: bool,
        call_timeout: Duration,
    ) -> Self {
        Self {
            platform,
            role_name: role_name.into(),
            serialize_role_creation,
            call_timeout,
            role_locks: DashMap::new(),
        }
    }

    /// Never fails as a whole: every guild's result lands in the report.
    #[instrument(skip(self))]
    pub async fn provision(&self, identity_id: &str) -> ProvisionReport {
        let guilds = match self.call(self.platform.list_guilds()).await {
            Ok(guilds) => guilds,
            Err(e) => {
                tracing::error!(error = %e, "Failed to list guilds, nothing provisioned");
                record_provisioning("list_failed");
                return ProvisionReport::default();
            }
        };

        let mut report = ProvisionReport::default();
        for guild in guilds {
            let outcome = match self.provision_guild(&guild, identity_id).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    tracing::warn!(
                        guild_id = %guild.id,
                        error = %e,
                        "Role provisioning failed for guild"
                    );
                    GuildOutcome::Failed {
                        reason: e.to_string(),
                    }
                }
            };

            record_provisioning(match &outcome {
                GuildOutcome::Assigned { .. } => "assigned",
                GuildOutcome::Skipped => "skipped",
                GuildOutcome::Failed { .. } => "failed",
            });

            report.guilds.push(GuildReport {
                guild_id: guild.id,
                guild_name: guild.name,
                outcome,
            });
        }

        tracing::info!(
            assigned = report.assigned(),
            skipped = report.skipped(),
            failed = report.failed(),
            "Provisioning finished"
        );
        report
    }

    async fn provision_guild(
        &self,
        guild: &Guild,
        identity_id: &str,
    ) -> Result<GuildOutcome, PlatformError> {
        let member = self
            .call(self.platform.fetch_member(&guild.id, identity_id))
            .await?;
        if member.is_none() {
            tracing::debug!(guild_id = %guild.id, "User is not a member, skipping");
            return Ok(GuildOutcome::Skipped);
        }

        let (role, role_created) = self.ensure_role(&guild.id).await?;

        self.call(
            self.platform
                .add_member_role(&guild.id, identity_id, &role.id),
        )
        .await?;

        tracing::info!(guild_id = %guild.id, role_id = %role.id, "Verified role assigned");
        Ok(GuildOutcome::Assigned {
            role_id: role.id,
            role_created,
        })
    }

    async fn ensure_role(&self, guild_id: &str) -> Result<(Role, bool), PlatformError> {
        let lock = self.serialize_role_creation.then(|| {
            self.role_locks
                .entry(guild_id.to_string())
                .or_default()
                .clone()
        });
        let _guard = match &lock {
            Some(lock) => Some(lock.lock().await),
            None => None,
        };

        let roles = self.call(self.platform.list_roles(guild_id)).await?;
        if let Some(role) = roles.into_iter().find(|r| r.name == self.role_name) {
            return Ok((role, false));
        }

        let role = self
            .call(
                self.platform
                    .create_role(guild_id, &RoleSpec::verified(&self.role_name)),
            )
            .await?;
        tracing::info!(guild_id = %guild_id, role_id = %role.id, "Created verified role");
        Ok((role, true))
    }

    async fn call<T>(
        &self,
        fut: impl std::future::Future<Output = Result<T, PlatformError>>,
    ) -> Result<T, PlatformError> {
        tokio::time::timeout(self.call_timeout, fut)
            .await
            .map_err(|_| PlatformError::Timeout)?
    }
}
