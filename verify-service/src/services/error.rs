use std::fmt;
use std::time::Duration;
use thiserror::Error;

use super::identity::IdentityError;
use super::webhook::DeliveryError;

/// Where in the callback pipeline a verification stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Request,
    Exchange,
    Profile,
    Delivery,
    Timeout,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Request => "request",
            Stage::Exchange => "exchange",
            Stage::Profile => "profile",
            Stage::Delivery => "delivery",
            Stage::Timeout => "timeout",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fatal verification failures. Everything else degrades to defaults.
#[derive(Debug, Error)]
pub enum VerificationError {
    #[error("Invalid callback request: {0}")]
    InvalidRequest(String),

    #[error("Code exchange failed: {0}")]
    Exchange(#[source] IdentityError),

    #[error("Profile fetch failed: {0}")]
    Profile(#[source] IdentityError),

    #[error("Notification delivery failed: {0}")]
    Delivery(#[source] DeliveryError),

    #[error("Verification timed out during {during} after {after:?}")]
    Timeout { during: &'static str, after: Duration },
}

impl VerificationError {
    pub fn stage(&self) -> Stage {
        match self {
            VerificationError::InvalidRequest(_) => Stage::Request,
            VerificationError::Exchange(_) => Stage::Exchange,
            VerificationError::Profile(_) => Stage::Profile,
            VerificationError::Delivery(_) => Stage::Delivery,
            VerificationError::Timeout { .. } => Stage::Timeout,
        }
    }

    /// Stable code shown to the user and searchable in logs.
    pub fn code(&self) -> &'static str {
        match self.stage() {
            Stage::Request => "E_REQUEST",
            Stage::Exchange => "E_EXCHANGE",
            Stage::Profile => "E_PROFILE",
            Stage::Delivery => "E_DELIVERY",
            Stage::Timeout => "E_TIMEOUT",
        }
    }

    /// Browser-safe text. Upstream detail stays in the logs.
    pub fn user_message(&self) -> &'static str {
        match self.stage() {
            Stage::Request => "The verification link is invalid or incomplete. Please start again.",
            Stage::Exchange => {
                "We could not confirm your authorization. The link may have expired; please start again."
            }
            Stage::Profile => "We could not load your account details. Please try again.",
            Stage::Delivery | Stage::Timeout => {
                "Verification could not be completed right now. Please try again shortly."
            }
        }
    }
}
