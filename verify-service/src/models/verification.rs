//! Per-request verification data. Nothing here outlives the callback that
//! created it.

use secrecy::{ExposeSecret, Secret};
use serde::Deserialize;
use std::fmt;

/// Inbound callback input.
#[derive(Debug, Clone)]
pub struct VerificationRequest {
    /// Single-use authorization code.
    pub code: String,
    /// Forwarded client address, or the transport peer.
    pub address: String,
    pub user_agent: Option<String>,
}

/// Access/refresh token pair from the code exchange.
///
/// `Debug` never prints the tokens.
#[derive(Clone)]
pub struct IdentityCredential {
    access_token: Secret<String>,
    refresh_token: Option<Secret<String>>,
}

impl IdentityCredential {
    pub fn new(access_token: impl Into<String>, refresh_token: Option<String>) -> Self {
        Self {
            access_token: Secret::new(access_token.into()),
            refresh_token: refresh_token.map(Secret::new),
        }
    }

    pub fn access_token(&self) -> &str {
        self.access_token.expose_secret()
    }

    pub fn refresh_token(&self) -> Option<&str> {
        self.refresh_token.as_ref().map(|t| t.expose_secret().as_str())
    }
}

impl fmt::Debug for IdentityCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityCredential")
            .field("access_token", &"[REDACTED]")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}

/// The identity provider's user object.
#[derive(Debug, Clone, Deserialize)]
pub struct Profile {
    pub id: String,
    pub username: String,
    #[serde(default)]
    pub discriminator: Option<String>,
    #[serde(default)]
    pub global_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub avatar: Option<String>,
    #[serde(default)]
    pub mfa_enabled: bool,
    #[serde(default)]
    pub locale: Option<String>,
}

impl Profile {
    /// `username#discriminator`, or the bare username for accounts on the
    /// discriminator-less scheme (`"0"`).
    pub fn tag(&self) -> String {
        match self.discriminator.as_deref() {
            Some(d) if !d.is_empty() && d != "0" => format!("{}#{}", self.username, d),
            _ => self.username.clone(),
        }
    }
}

/// Best-effort network origin attributes. Absent when the lookup failed.
#[derive(Debug, Clone, PartialEq)]
pub struct GeoRecord {
    pub address: String,
    pub country: Option<String>,
    pub city: Option<String>,
    pub isp: Option<String>,
    pub is_proxy: bool,
    pub is_hosting: bool,
    pub map_link: Option<String>,
}

/// One linked third-party account.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Connection {
    #[serde(rename = "type")]
    pub platform: String,
    #[serde(rename = "name")]
    pub display_name: String,
}

/// Who the browser says it is.
#[derive(Debug, Clone)]
pub struct ClientInfo {
    pub address: String,
    pub user_agent: Option<String>,
}

/// Merged snapshot of one verification attempt.
///
/// Only built once a profile was fetched, so `identity.id` is always set.
#[derive(Debug, Clone)]
pub struct VerificationRecord {
    pub identity: Profile,
    pub client: ClientInfo,
    pub network: Option<GeoRecord>,
    pub connections: Vec<Connection>,
    pub credential: IdentityCredential,
}

impl VerificationRecord {
    pub fn identity_id(&self) -> &str {
        &self.identity.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(discriminator: Option<&str>) -> Profile {
        Profile {
            id: "1".to_string(),
            username: "bob".to_string(),
            discriminator: discriminator.map(str::to_string),
            global_name: None,
            email: None,
            phone: None,
            avatar: None,
            mfa_enabled: false,
            locale: None,
        }
    }

    #[test]
    fn tag_includes_legacy_discriminator() {
        assert_eq!(profile(Some("0001")).tag(), "bob#0001");
    }

    #[test]
    fn tag_drops_zero_discriminator() {
        assert_eq!(profile(Some("0")).tag(), "bob");
        assert_eq!(profile(None).tag(), "bob");
    }

    #[test]
    fn credential_debug_is_redacted() {
        let credential = IdentityCredential::new("access-abc", Some("refresh-def".to_string()));
        let rendered = format!("{:?}", credential);
        assert!(!rendered.contains("access-abc"));
        assert!(!rendered.contains("refresh-def"));
        assert_eq!(credential.access_token(), "access-abc");
    }

    #[test]
    fn profile_tolerates_missing_optional_fields() {
        let profile: Profile =
            serde_json::from_str(r#"{"id":"42","username":"alice"}"#).unwrap();
        assert_eq!(profile.id, "42");
        assert!(profile.email.is_none());
        assert!(!profile.mfa_enabled);
    }
}
