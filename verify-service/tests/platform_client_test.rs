mod common;

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post, put},
    Json, Router,
};
use common::{spawn_upstream, test_config};
use reqwest::Client;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use verify_service::models::RoleSpec;
use verify_service::services::commands::verification_panel;
use verify_service::services::{DiscordPlatformClient, GuildPlatform, PlatformError};

#[derive(Clone, Default)]
struct Seen {
    role_payloads: Arc<Mutex<Vec<Value>>>,
    auth_headers: Arc<Mutex<Vec<String>>>,
    assignments: Arc<Mutex<Vec<(String, String, String)>>>,
    messages: Arc<Mutex<Vec<Value>>>,
    guild_queries: Arc<Mutex<Vec<HashMap<String, String>>>>,
}

async fn record_auth(seen: &Seen, headers: &HeaderMap) {
    let value = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    seen.auth_headers.lock().await.push(value);
}

fn fake_platform(seen: Seen) -> Router {
    Router::new()
        .route(
            "/users/@me",
            get(|State(seen): State<Seen>, headers: HeaderMap| async move {
                record_auth(&seen, &headers).await;
                Json(json!({"id": "900", "username": "verify-bot", "bot": true}))
            }),
        )
        .route(
            "/users/@me/guilds",
            get(
                |State(seen): State<Seen>, Query(query): Query<HashMap<String, String>>| async move {
                    let start = match query.get("after") {
                        None => 1,
                        Some(after) => after.parse::<u32>().unwrap_or(0) + 1,
                    };
                    // 201 guilds in total: one full page, then a short one.
                    let page: Vec<Value> = (start..=201)
                        .take(200)
                        .map(|id| json!({"id": id.to_string(), "name": format!("Guild {}", id)}))
                        .collect();
                    seen.guild_queries.lock().await.push(query);
                    Json(Value::Array(page))
                },
            ),
        )
        .route(
            "/guilds/:guild/members/:user",
            get(|Path((guild, user)): Path<(String, String)>| async move {
                if guild == "g1" && user == "1" {
                    (
                        StatusCode::OK,
                        Json(json!({"roles": ["r-old"], "user": {"id": "1"}})),
                    )
                } else {
                    (
                        StatusCode::NOT_FOUND,
                        Json(json!({"message": "Unknown Member", "code": 10007})),
                    )
                }
            }),
        )
        .route(
            "/guilds/:guild/roles",
            get(|| async { Json(json!([{"id": "r1", "name": "@everyone", "color": 0}])) }).post(
                |State(seen): State<Seen>, Json(body): Json<Value>| async move {
                    seen.role_payloads.lock().await.push(body.clone());
                    Json(json!({"id": "r2", "name": body["name"], "color": body["color"]}))
                },
            ),
        )
        .route(
            "/guilds/:guild/members/:user/roles/:role",
            put(
                |State(seen): State<Seen>, Path((guild, user, role)): Path<(String, String, String)>| async move {
                    seen.assignments.lock().await.push((guild, user, role));
                    StatusCode::NO_CONTENT
                },
            ),
        )
        .route(
            "/channels/:channel/messages",
            post(|State(seen): State<Seen>, Json(body): Json<Value>| async move {
                seen.messages.lock().await.push(body);
                Json(json!({"id": "m2"}))
            }),
        )
        .with_state(seen)
}

async fn platform(seen: Seen) -> DiscordPlatformClient {
    let base = spawn_upstream(fake_platform(seen)).await;
    let mut config = test_config();
    config.platform.api_base_url = base;
    DiscordPlatformClient::new(Client::new(), &config.platform)
}

#[tokio::test]
async fn authenticates_with_bot_token() {
    let seen = Seen::default();
    let platform = platform(seen.clone()).await;

    let bot = platform.current_user().await.unwrap();
    assert_eq!(bot.id, "900");
    assert_eq!(seen.auth_headers.lock().await[0], "Bot bot-token");
}

#[tokio::test]
async fn lists_guilds_across_pages() {
    let seen = Seen::default();
    let platform = platform(seen.clone()).await;

    let guilds = platform.list_guilds().await.unwrap();

    assert_eq!(guilds.len(), 201);
    assert_eq!(guilds[0].id, "1");
    assert_eq!(guilds[200].id, "201");

    let queries = seen.guild_queries.lock().await;
    assert_eq!(queries.len(), 2);
    assert_eq!(queries[0].get("limit").map(String::as_str), Some("200"));
    assert!(queries[0].get("after").is_none());
    assert_eq!(queries[1].get("after").map(String::as_str), Some("200"));
}

#[tokio::test]
async fn unknown_member_is_none() {
    let platform = platform(Seen::default()).await;

    let member = platform.fetch_member("g1", "1").await.unwrap().unwrap();
    assert_eq!(member.roles, vec!["r-old".to_string()]);
    assert!(platform.fetch_member("g1", "2").await.unwrap().is_none());
}

#[tokio::test]
async fn creates_role_with_fixed_color_and_permissions() {
    let seen = Seen::default();
    let platform = platform(seen.clone()).await;

    let role = platform
        .create_role("g1", &RoleSpec::verified("Verified"))
        .await
        .unwrap();
    assert_eq!(role.id, "r2");
    assert_eq!(role.name, "Verified");

    let payload = &seen.role_payloads.lock().await[0];
    assert_eq!(payload["name"], "Verified");
    assert_eq!(payload["color"], 0x57F287);
    assert_eq!(payload["permissions"], "3072");
}

#[tokio::test]
async fn assigns_role_with_put() {
    let seen = Seen::default();
    let platform = platform(seen.clone()).await;

    platform.add_member_role("g1", "1", "r2").await.unwrap();
    assert_eq!(
        seen.assignments.lock().await[0],
        ("g1".to_string(), "1".to_string(), "r2".to_string())
    );
}

#[tokio::test]
async fn posts_panel_with_link_button() {
    let seen = Seen::default();
    let platform = platform(seen.clone()).await;

    platform
        .send_message("c1", &verification_panel("https://discord.com/oauth2/authorize?x=1"))
        .await
        .unwrap();

    let message = &seen.messages.lock().await[0];
    assert_eq!(message["embeds"][0]["title"], "🔐 Verify Your Account");
    assert_eq!(message["components"][0]["type"], 1);
    assert_eq!(message["components"][0]["components"][0]["style"], 5);
    assert_eq!(
        message["components"][0]["components"][0]["url"],
        "https://discord.com/oauth2/authorize?x=1"
    );
}

#[tokio::test]
async fn rejected_token_is_a_status_error() {
    let app = Router::new().route(
        "/users/@me",
        get(|| async {
            (
                StatusCode::UNAUTHORIZED,
                Json(json!({"message": "401: Unauthorized", "code": 0})),
            )
        }),
    );
    let base = spawn_upstream(app).await;
    let mut config = test_config();
    config.platform.api_base_url = base;
    let platform = DiscordPlatformClient::new(Client::new(), &config.platform);

    let err = platform.current_user().await.unwrap_err();
    assert!(matches!(err, PlatformError::Status { status: 401, .. }));
}
