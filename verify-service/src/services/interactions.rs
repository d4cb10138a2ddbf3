//! Signed HTTP interactions: how slash commands reach the service.
//!
//! The platform signs `timestamp || body` with the application's Ed25519
//! key and sends the hex signature alongside. Unsigned or mis-signed
//! requests must be rejected with 401.

use ed25519_dalek::{Signature, Verifier, VerifyingKey, PUBLIC_KEY_LENGTH};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const SIGNATURE_HEADER: &str = "X-Signature-Ed25519";
pub const TIMESTAMP_HEADER: &str = "X-Signature-Timestamp";

const INTERACTION_PING: u8 = 1;
const INTERACTION_APPLICATION_COMMAND: u8 = 2;
const RESPONSE_PONG: u8 = 1;
const RESPONSE_CHANNEL_MESSAGE: u8 = 4;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum InteractionError {
    #[error("Invalid interactions public key: {0}")]
    InvalidKey(String),

    #[error("Missing {0} header")]
    MissingHeader(&'static str),

    #[error("Malformed signature")]
    MalformedSignature,

    #[error("Signature does not match")]
    BadSignature,
}

/// Checks request signatures against the application's public key.
#[derive(Debug, Clone)]
pub struct InteractionVerifier {
    key: VerifyingKey,
}

impl InteractionVerifier {
    pub fn from_hex(public_key: &str) -> Result<Self, InteractionError> {
        let bytes = hex::decode(public_key.trim())
            .map_err(|e| InteractionError::InvalidKey(e.to_string()))?;
        let bytes: [u8; PUBLIC_KEY_LENGTH] = bytes.try_into().map_err(|_| {
            InteractionError::InvalidKey(format!("expected {} bytes", PUBLIC_KEY_LENGTH))
        })?;
        let key = VerifyingKey::from_bytes(&bytes)
            .map_err(|e| InteractionError::InvalidKey(e.to_string()))?;

        Ok(Self { key })
    }

    pub fn verify(
        &self,
        signature: Option<&str>,
        timestamp: Option<&str>,
        body: &str,
    ) -> Result<(), InteractionError> {
        let signature = signature.ok_or(InteractionError::MissingHeader(SIGNATURE_HEADER))?;
        let timestamp = timestamp.ok_or(InteractionError::MissingHeader(TIMESTAMP_HEADER))?;

        let bytes = hex::decode(signature).map_err(|_| InteractionError::MalformedSignature)?;
        let signature =
            Signature::from_slice(&bytes).map_err(|_| InteractionError::MalformedSignature)?;

        let mut message = Vec::with_capacity(timestamp.len() + body.len());
        message.extend_from_slice(timestamp.as_bytes());
        message.extend_from_slice(body.as_bytes());

        self.key
            .verify(&message, &signature)
            .map_err(|_| InteractionError::BadSignature)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Interaction {
    #[serde(rename = "type")]
    pub kind: u8,
    #[serde(default)]
    pub channel_id: Option<String>,
    #[serde(default)]
    pub member: Option<InteractionMember>,
    #[serde(default)]
    pub data: Option<CommandData>,
}

impl Interaction {
    pub fn is_ping(&self) -> bool {
        self.kind == INTERACTION_PING
    }

    pub fn is_command(&self) -> bool {
        self.kind == INTERACTION_APPLICATION_COMMAND
    }

    /// Permission bitset of the invoking member. Commands invoked outside a
    /// guild carry no member and hold no permissions.
    pub fn member_permissions(&self) -> Result<u64, std::num::ParseIntError> {
        match &self.member {
            Some(member) => member.permissions.parse(),
            None => Ok(0),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct InteractionMember {
    /// Decimal string; the bitset does not fit a JSON number.
    pub permissions: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CommandData {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InteractionResponse {
    #[serde(rename = "type")]
    pub kind: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<InteractionReply>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InteractionReply {
    pub content: String,
}

impl InteractionResponse {
    pub fn pong() -> Self {
        Self {
            kind: RESPONSE_PONG,
            data: None,
        }
    }

    pub fn message(content: &str) -> Self {
        Self {
            kind: RESPONSE_CHANNEL_MESSAGE,
            data: Some(InteractionReply {
                content: content.to_string(),
            }),
        }
    }
}
