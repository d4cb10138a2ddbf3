use askama::Template;
use axum::{
    extract::{ConnectInfo, Query, State},
    http::{header, HeaderMap},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use std::net::SocketAddr;
use tracing::instrument;

use crate::models::VerificationRequest;
use crate::services::VerificationError;
use crate::AppState;

const FORWARDED_FOR: &str = "x-forwarded-for";

#[derive(Template)]
#[template(path = "success.html")]
pub struct SuccessTemplate {}

#[derive(Template)]
#[template(path = "failure.html")]
pub struct FailureTemplate {
    pub code: &'static str,
    pub message: &'static str,
}

#[derive(Debug, Deserialize)]
pub struct CallbackParams {
    pub code: Option<String>,
    /// Set by the provider when the user denied consent.
    pub error: Option<String>,
}

/// OAuth redirect target: runs the verification pipeline for one code.
///
/// Both outcomes are served as 200 pages; the page body carries the result.
#[instrument(skip_all)]
pub async fn auth_callback(
    State(state): State<AppState>,
    Query(params): Query<CallbackParams>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
) -> Response {
    let request = match verification_request(params, &headers, peer) {
        Ok(request) => request,
        Err(e) => return failure_page(&e),
    };

    match state.pipeline.run(request).await {
        Ok(outcome) => {
            tracing::info!(
                user_id = %outcome.identity_id,
                assigned = outcome.report.assigned(),
                skipped = outcome.report.skipped(),
                failed = outcome.report.failed(),
                "Verification complete"
            );
            SuccessTemplate {}.into_response()
        }
        Err(e) => failure_page(&e),
    }
}

fn verification_request(
    params: CallbackParams,
    headers: &HeaderMap,
    peer: Option<ConnectInfo<SocketAddr>>,
) -> Result<VerificationRequest, VerificationError> {
    if let Some(error) = params.error {
        return Err(VerificationError::InvalidRequest(format!(
            "provider returned error: {}",
            error
        )));
    }

    let code = params
        .code
        .filter(|code| !code.trim().is_empty())
        .ok_or_else(|| VerificationError::InvalidRequest("missing code parameter".to_string()))?;

    Ok(VerificationRequest {
        code,
        address: client_address(headers, peer.map(|ConnectInfo(addr)| addr)),
        user_agent: headers
            .get(header::USER_AGENT)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string),
    })
}

/// First `x-forwarded-for` entry, else the peer address.
pub fn client_address(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    headers
        .get(FORWARDED_FOR)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|addr| !addr.is_empty())
        .map(str::to_string)
        .or_else(|| peer.map(|addr| addr.ip().to_string()))
        .unwrap_or_else(|| "unknown".to_string())
}

fn failure_page(error: &VerificationError) -> Response {
    tracing::error!(
        error = %error,
        stage = %error.stage(),
        code = error.code(),
        "Verification failed"
    );

    FailureTemplate {
        code: error.code(),
        message: error.user_message(),
    }
    .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn forwarded_header_wins_over_peer() {
        let mut headers = HeaderMap::new();
        headers.insert(
            FORWARDED_FOR,
            HeaderValue::from_static("203.0.113.7, 10.0.0.1"),
        );
        let peer: SocketAddr = "10.0.0.2:5000".parse().unwrap();

        assert_eq!(client_address(&headers, Some(peer)), "203.0.113.7");
    }

    #[test]
    fn falls_back_to_peer_then_unknown() {
        let peer: SocketAddr = "198.51.100.4:443".parse().unwrap();
        assert_eq!(client_address(&HeaderMap::new(), Some(peer)), "198.51.100.4");
        assert_eq!(client_address(&HeaderMap::new(), None), "unknown");
    }

    #[test]
    fn provider_error_is_a_request_error() {
        let err = verification_request(
            CallbackParams {
                code: Some("abc".to_string()),
                error: Some("access_denied".to_string()),
            },
            &HeaderMap::new(),
            None,
        )
        .unwrap_err();

        assert_eq!(err.code(), "E_REQUEST");
    }
}
