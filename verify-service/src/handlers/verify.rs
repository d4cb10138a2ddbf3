use axum::{extract::State, response::Redirect};

use crate::AppState;

/// Sends the browser to the provider's consent screen.
pub async fn start_verification(State(state): State<AppState>) -> Redirect {
    Redirect::to(&state.config.oauth.authorize_link())
}
