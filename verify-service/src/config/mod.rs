use secrecy::Secret;
use serde::Deserialize;
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;
use std::time::Duration;

use crate::services::{CredentialPolicy, InteractionVerifier};

#[derive(Debug, Clone, Deserialize)]
pub struct VerifyConfig {
    #[serde(flatten)]
    pub common: core_config::Config,
    pub environment: Environment,
    pub oauth: OAuthConfig,
    pub platform: PlatformConfig,
    pub webhook: WebhookConfig,
    pub geo: GeoConfig,
    pub timeouts: TimeoutConfig,
    pub keep_alive: KeepAliveConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Dev,
    Prod,
}

/// OAuth application registered with the identity provider.
#[derive(Debug, Clone, Deserialize)]
pub struct OAuthConfig {
    pub client_id: String,
    pub client_secret: Secret<String>,
    pub redirect_uri: String,
    pub scopes: String,
    pub api_base_url: String,
    pub authorize_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlatformConfig {
    pub bot_token: Secret<String>,
    /// Hex Ed25519 key that signs inbound interactions.
    pub public_key: String,
    pub api_base_url: String,
    pub verified_role_name: String,
    /// Serialise role lookup-then-create per guild inside this process.
    pub serialize_role_creation: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookConfig {
    /// Unset only outside production, where a logging sink stands in.
    pub url: Option<Secret<String>>,
    pub credential_policy: CredentialPolicy,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GeoConfig {
    pub base_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TimeoutConfig {
    /// Deadline for any single outbound call.
    pub call: Duration,
    /// Deadline for everything that can fail a verification.
    pub verification: Duration,
}

#[derive(Debug, Clone, Deserialize)]
pub struct KeepAliveConfig {
    /// `None` disables the self-ping.
    pub interval: Option<Duration>,
}

impl OAuthConfig {
    /// The authorize URL users are sent to, for both the `/verify` redirect
    /// and the posted verification panel.
    pub fn authorize_link(&self) -> String {
        format!(
            "{}?client_id={}&response_type=code&redirect_uri={}&scope={}",
            self.authorize_url,
            urlencoding::encode(&self.client_id),
            urlencoding::encode(&self.redirect_uri),
            self.scopes
                .split_whitespace()
                .map(|scope| urlencoding::encode(scope).into_owned())
                .collect::<Vec<_>>()
                .join("+"),
        )
    }
}

impl VerifyConfig {
    pub fn load() -> Result<Self, AppError> {
        let common = core_config::Config::load()?;

        let environment = match get_env("ENVIRONMENT", "dev").to_lowercase().as_str() {
            "prod" | "production" => Environment::Prod,
            _ => Environment::Dev,
        };

        let default_redirect = format!("http://localhost:{}/auth/callback", common.port);

        let webhook_url = env::var("WEBHOOK_URL")
            .ok()
            .filter(|url| !url.trim().is_empty())
            .map(Secret::new);
        if webhook_url.is_none() && environment == Environment::Prod {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "WEBHOOK_URL is required in production but not set"
            )));
        }

        let credential_policy = get_env("WEBHOOK_CREDENTIALS", "omit")
            .parse::<CredentialPolicy>()
            .map_err(|e| AppError::ConfigError(anyhow::anyhow!(e)))?;

        let public_key = require_env("DISCORD_PUBLIC_KEY")?;
        InteractionVerifier::from_hex(&public_key)
            .map_err(|e| AppError::ConfigError(anyhow::anyhow!("DISCORD_PUBLIC_KEY: {}", e)))?;

        let call_timeout = parse_env("HTTP_CALL_TIMEOUT_SECS", 10u64)?;
        let verification_timeout = parse_env("VERIFICATION_DEADLINE_SECS", 30u64)?;
        let keep_alive_secs = parse_env("KEEP_ALIVE_INTERVAL_SECS", 300u64)?;

        Ok(VerifyConfig {
            environment,
            oauth: OAuthConfig {
                client_id: require_env("CLIENT_ID")?,
                client_secret: Secret::new(require_env("CLIENT_SECRET")?),
                redirect_uri: get_env("REDIRECT_URI", &default_redirect),
                scopes: get_env("OAUTH_SCOPES", "identify email connections guilds"),
                api_base_url: get_env("DISCORD_API_URL", "https://discord.com/api/v10"),
                authorize_url: get_env(
                    "DISCORD_AUTHORIZE_URL",
                    "https://discord.com/oauth2/authorize",
                ),
            },
            platform: PlatformConfig {
                bot_token: Secret::new(require_env("BOT_TOKEN")?),
                public_key,
                api_base_url: get_env("DISCORD_API_URL", "https://discord.com/api/v10"),
                verified_role_name: get_env("VERIFIED_ROLE_NAME", "Verified"),
                serialize_role_creation: parse_env("SERIALIZE_ROLE_CREATION", true)?,
            },
            webhook: WebhookConfig {
                url: webhook_url,
                credential_policy,
            },
            geo: GeoConfig {
                base_url: get_env("GEO_API_URL", "http://ip-api.com/json"),
            },
            timeouts: TimeoutConfig {
                call: Duration::from_secs(call_timeout.max(1)),
                verification: Duration::from_secs(verification_timeout.max(1)),
            },
            keep_alive: KeepAliveConfig {
                interval: (keep_alive_secs > 0).then(|| Duration::from_secs(keep_alive_secs)),
            },
            common,
        })
    }
}

fn get_env(key: &str, default: &str) -> String {
    env::var(key)
        .ok()
        .filter(|val| !val.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn require_env(key: &str) -> Result<String, AppError> {
    env::var(key)
        .ok()
        .filter(|val| !val.trim().is_empty())
        .ok_or_else(|| AppError::ConfigError(anyhow::anyhow!("{} is required but not set", key)))
}

fn parse_env<T>(key: &str, default: T) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(val) if !val.trim().is_empty() => val.trim().parse().map_err(|e| {
            AppError::ConfigError(anyhow::anyhow!("{} has an invalid value: {}", key, e))
        }),
        _ => Ok(default),
    }
}
