mod common;

use axum::{
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Form, Json, Router,
};
use common::{spawn_upstream, test_config};
use reqwest::Client;
use serde_json::json;
use std::collections::HashMap;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use verify_service::services::identity::IdentityError;
use verify_service::services::{DiscordIdentityClient, IdentityProvider};

fn client_for(base_url: &str) -> DiscordIdentityClient {
    let mut config = test_config();
    config.oauth.api_base_url = base_url.to_string();
    DiscordIdentityClient::new(Client::new(), &config.oauth)
}

fn bearer(headers: &HeaderMap) -> String {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

#[tokio::test]
async fn exchanges_code_and_fetches_profile() {
    let app = Router::new()
        .route(
            "/oauth2/token",
            post(|Form(form): Form<HashMap<String, String>>| async move {
                if form.get("code").map(String::as_str) != Some("abc123")
                    || form.get("grant_type").map(String::as_str) != Some("authorization_code")
                    || form.get("client_secret").map(String::as_str) != Some("test-secret")
                {
                    return (StatusCode::BAD_REQUEST, Json(json!({"error": "invalid_request"})));
                }
                (
                    StatusCode::OK,
                    Json(json!({
                        "access_token": "at-1",
                        "refresh_token": "rt-1",
                        "token_type": "Bearer",
                        "expires_in": 604800,
                        "scope": "identify email connections guilds"
                    })),
                )
            }),
        )
        .route(
            "/users/@me",
            get(|headers: HeaderMap| async move {
                if bearer(&headers) != "Bearer at-1" {
                    return (StatusCode::UNAUTHORIZED, Json(json!({"message": "401: Unauthorized"})));
                }
                (
                    StatusCode::OK,
                    Json(json!({
                        "id": "1",
                        "username": "bob",
                        "discriminator": "0001",
                        "email": "b@x.com",
                        "mfa_enabled": true,
                        "locale": "en-US",
                        "verified": true
                    })),
                )
            }),
        );
    let base = spawn_upstream(app).await;
    let identity = client_for(&base);

    let credential = identity
        .exchange_code("abc123", "http://localhost:3000/auth/callback")
        .await
        .unwrap();
    assert_eq!(credential.access_token(), "at-1");
    assert_eq!(credential.refresh_token(), Some("rt-1"));

    let profile = identity.fetch_profile(credential.access_token()).await.unwrap();
    assert_eq!(profile.id, "1");
    assert_eq!(profile.tag(), "bob#0001");
    assert_eq!(profile.email.as_deref(), Some("b@x.com"));
    assert!(profile.mfa_enabled);
    assert!(profile.phone.is_none());
}

#[tokio::test]
async fn rejected_exchange_reports_status_and_body() {
    let app = Router::new().route(
        "/oauth2/token",
        post(|| async {
            (
                StatusCode::UNAUTHORIZED,
                Json(json!({"error": "invalid_client"})),
            )
        }),
    );
    let base = spawn_upstream(app).await;

    let err = client_for(&base)
        .exchange_code("abc123", "http://localhost:3000/auth/callback")
        .await
        .unwrap_err();

    match err {
        IdentityError::Status { status, body } => {
            assert_eq!(status, 401);
            assert!(body.contains("invalid_client"));
        }
        other => panic!("expected status error, got {:?}", other),
    }
}

#[tokio::test]
async fn malformed_profile_is_a_decode_error() {
    let app = Router::new().route("/users/@me", get(|| async { "not json" }));
    let base = spawn_upstream(app).await;

    let err = client_for(&base).fetch_profile("at-1").await.unwrap_err();
    assert!(matches!(err, IdentityError::Decode(_)));
}

#[tokio::test]
async fn connections_failure_degrades_to_empty() {
    let app = Router::new().route(
        "/users/@me/connections",
        get(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "boom") }),
    );
    let base = spawn_upstream(app).await;

    assert!(client_for(&base).fetch_connections("at-1").await.is_empty());
}

#[tokio::test]
async fn connections_are_parsed() {
    let app = Router::new().route(
        "/users/@me/connections",
        get(|| async {
            Json(json!([
                {"type": "github", "id": "42", "name": "bobdev", "verified": true},
                {"type": "steam", "id": "7", "name": "bob_plays", "verified": false}
            ]))
        }),
    );
    let base = spawn_upstream(app).await;

    let connections = client_for(&base).fetch_connections("at-1").await;
    assert_eq!(connections.len(), 2);
    assert_eq!(connections[0].platform, "github");
    assert_eq!(connections[1].display_name, "bob_plays");
}

#[tokio::test]
async fn unreachable_provider_is_a_transport_error() {
    let err = client_for("http://127.0.0.1:9")
        .exchange_code("abc123", "http://localhost:3000/auth/callback")
        .await
        .unwrap_err();
    assert!(matches!(err, IdentityError::Transport(_)));
}

#[tokio::test]
async fn malformed_token_body_is_a_decode_error() {
    let app = Router::new().route("/oauth2/token", post(|| async { "<html>" }));
    let base = spawn_upstream(app).await;

    let err = client_for(&base)
        .exchange_code("abc123", "http://localhost:3000/auth/callback")
        .await
        .unwrap_err();
    assert!(matches!(err, IdentityError::Decode(_)));
}

/// Headers arrive promptly but the token body never finishes.
#[tokio::test]
async fn stalled_token_body_is_a_timeout() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut request = [0u8; 4096];
        let _ = socket.read(&mut request).await;
        socket
            .write_all(
                b"HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: 64\r\n\r\n{\"access_token\":",
            )
            .await
            .unwrap();
        socket.flush().await.unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;
    });

    let mut config = test_config();
    config.oauth.api_base_url = base;
    let client = DiscordIdentityClient::new(
        Client::builder()
            .timeout(Duration::from_millis(300))
            .build()
            .unwrap(),
        &config.oauth,
    );

    let err = client
        .exchange_code("abc123", "http://localhost:3000/auth/callback")
        .await
        .unwrap_err();
    assert!(err.is_timeout());
}
