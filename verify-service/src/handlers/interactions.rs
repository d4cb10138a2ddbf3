use axum::{extract::State, http::HeaderMap, Json};
use service_core::error::AppError;
use tracing::instrument;

use crate::services::interactions::{SIGNATURE_HEADER, TIMESTAMP_HEADER};
use crate::services::{Command, CommandInvocation, Interaction, InteractionResponse, PlatformError};
use crate::AppState;

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Interactions endpoint.
///
/// Verifies the request signature, answers pings and runs `setupverify`.
/// The body is taken as a string because the signature covers the exact bytes.
#[instrument(skip_all)]
pub async fn interactions(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Result<Json<InteractionResponse>, AppError> {
    state
        .verifier
        .verify(
            header(&headers, SIGNATURE_HEADER),
            header(&headers, TIMESTAMP_HEADER),
            &body,
        )
        .map_err(|e| {
            tracing::warn!(error = %e, "Rejected interaction");
            AppError::Unauthorized(anyhow::anyhow!("Invalid request signature"))
        })?;

    let interaction: Interaction = serde_json::from_str(&body).map_err(|e| {
        tracing::warn!(error = %e, "Failed to parse interaction");
        AppError::BadRequest(anyhow::anyhow!("Invalid interaction payload"))
    })?;

    if interaction.is_ping() {
        return Ok(Json(InteractionResponse::pong()));
    }

    if !interaction.is_command() {
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "Unsupported interaction type {}",
            interaction.kind
        )));
    }

    let name = interaction
        .data
        .as_ref()
        .map(|data| data.name.as_str())
        .unwrap_or_default();
    let command = Command::from_name(name)
        .ok_or_else(|| AppError::BadRequest(anyhow::anyhow!("Unknown command '{}'", name)))?;

    let channel_id = interaction
        .channel_id
        .clone()
        .ok_or_else(|| AppError::BadRequest(anyhow::anyhow!("Command without a channel")))?;
    let member_permissions = interaction
        .member_permissions()
        .map_err(|_| AppError::BadRequest(anyhow::anyhow!("Invalid member permissions")))?;

    let outcome = state
        .commands
        .execute(
            command,
            &CommandInvocation {
                channel_id,
                member_permissions,
            },
        )
        .await
        .map_err(|e| match e {
            PlatformError::Timeout => AppError::GatewayTimeout(e.to_string()),
            other => AppError::BadGateway(other.to_string()),
        })?;

    Ok(Json(InteractionResponse::message(outcome.reply())))
}
