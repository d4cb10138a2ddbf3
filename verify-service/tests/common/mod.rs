#![allow(dead_code)]

use axum::{body::Body, http::Request, Router};
use ed25519_dalek::{Signer, SigningKey};
use http_body_util::BodyExt;
use secrecy::Secret;
use service_core::config::Config as CoreConfig;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower::ServiceExt;
use verify_service::config::{
    Environment, GeoConfig, KeepAliveConfig, OAuthConfig, PlatformConfig, TimeoutConfig,
    VerifyConfig, WebhookConfig,
};
use verify_service::models::{GeoRecord, Profile};
use verify_service::services::mock::sample_profile;
use verify_service::services::{
    CredentialPolicy, MockGeoResolver, MockGuildPlatform, MockIdentityProvider,
    MockNotificationSink,
};
use verify_service::startup::{build_router, build_state, Services};

pub const ROLE_NAME: &str = "Verified";

pub const INTERACTION_TIMESTAMP: &str = "1700000000";

/// Key the test platform signs interactions with.
pub fn signing_key() -> SigningKey {
    SigningKey::from_bytes(&[7u8; 32])
}

/// Hex signature over `timestamp || body`, as the platform sends it.
pub fn sign(timestamp: &str, body: &str) -> String {
    let message = format!("{}{}", timestamp, body);
    hex::encode(signing_key().sign(message.as_bytes()).to_bytes())
}

pub fn test_config() -> VerifyConfig {
    VerifyConfig {
        common: CoreConfig {
            port: 0,
            ..CoreConfig::default()
        },
        environment: Environment::Dev,
        oauth: OAuthConfig {
            client_id: "1234".to_string(),
            client_secret: Secret::new("test-secret".to_string()),
            redirect_uri: "http://localhost:3000/auth/callback".to_string(),
            scopes: "identify email connections guilds".to_string(),
            api_base_url: "http://127.0.0.1:9".to_string(),
            authorize_url: "https://discord.com/oauth2/authorize".to_string(),
        },
        platform: PlatformConfig {
            bot_token: Secret::new("bot-token".to_string()),
            public_key: hex::encode(signing_key().verifying_key().to_bytes()),
            api_base_url: "http://127.0.0.1:9".to_string(),
            verified_role_name: ROLE_NAME.to_string(),
            serialize_role_creation: true,
        },
        webhook: WebhookConfig {
            url: None,
            credential_policy: CredentialPolicy::Omit,
        },
        geo: GeoConfig {
            base_url: "http://127.0.0.1:9".to_string(),
        },
        timeouts: TimeoutConfig {
            call: Duration::from_millis(500),
            verification: Duration::from_secs(2),
        },
        keep_alive: KeepAliveConfig { interval: None },
    }
}

/// Scenario-A profile: `bob#0001 (1)` with an email.
pub fn bob() -> Profile {
    let mut profile = sample_profile("1", "bob");
    profile.discriminator = Some("0001".to_string());
    profile.email = Some("b@x.com".to_string());
    profile
}

pub fn norway() -> GeoRecord {
    GeoRecord {
        address: "203.0.113.7".to_string(),
        country: Some("Norway".to_string()),
        city: Some("Oslo".to_string()),
        isp: Some("Telenor".to_string()),
        is_proxy: false,
        is_hosting: false,
        map_link: Some("https://www.google.com/maps?q=59.9,10.7".to_string()),
    }
}

/// Router wired to in-memory collaborators the test can inspect.
pub struct TestApp {
    pub identity: Arc<MockIdentityProvider>,
    pub geo: Arc<MockGeoResolver>,
    pub sink: Arc<MockNotificationSink>,
    pub platform: Arc<MockGuildPlatform>,
    pub router: Router,
}

impl TestApp {
    pub fn new(
        identity: MockIdentityProvider,
        geo: MockGeoResolver,
        sink: MockNotificationSink,
        platform: MockGuildPlatform,
    ) -> Self {
        Self::with_config(test_config(), identity, geo, sink, platform)
    }

    pub fn with_config(
        config: VerifyConfig,
        identity: MockIdentityProvider,
        geo: MockGeoResolver,
        sink: MockNotificationSink,
        platform: MockGuildPlatform,
    ) -> Self {
        let identity = Arc::new(identity);
        let geo = Arc::new(geo);
        let sink = Arc::new(sink);
        let platform = Arc::new(platform);

        let services = Services {
            identity: identity.clone(),
            geo: geo.clone(),
            sink: sink.clone(),
            platform: platform.clone(),
        };
        let router = build_router(build_state(config, &services).unwrap());

        Self {
            identity,
            geo,
            sink,
            platform,
            router,
        }
    }

    /// Single member `1` in guild `g1`, everything else succeeding.
    pub fn happy() -> Self {
        Self::new(
            MockIdentityProvider::new(bob()),
            MockGeoResolver::unknown(),
            MockNotificationSink::new(true),
            MockGuildPlatform::new()
                .with_guild("g1", "Guild One")
                .with_member("g1", "1"),
        )
    }

    pub async fn get(&self, uri: &str) -> (u16, String) {
        get(&self.router, uri).await
    }
}

pub async fn get(router: &Router, uri: &str) -> (u16, String) {
    let response = router
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();

    let status = response.status().as_u16();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    (status, String::from_utf8_lossy(&body).into_owned())
}

/// POST `body` to `/interactions` with the given signature headers.
pub async fn post_interaction(
    router: &Router,
    body: &str,
    signature: Option<&str>,
) -> (u16, String) {
    let mut request = Request::builder()
        .method("POST")
        .uri("/interactions")
        .header("content-type", "application/json")
        .header("X-Signature-Timestamp", INTERACTION_TIMESTAMP);
    if let Some(signature) = signature {
        request = request.header("X-Signature-Ed25519", signature);
    }

    let response = router
        .clone()
        .oneshot(request.body(Body::from(body.to_string())).unwrap())
        .await
        .unwrap();

    let status = response.status().as_u16();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    (status, String::from_utf8_lossy(&body).into_owned())
}

/// Serve `app` on a random local port and return its base URL.
pub async fn spawn_upstream(app: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = format!("http://{}", listener.local_addr().unwrap());
    tokio::spawn(async move {
        axum::serve(listener, app).await.ok();
    });
    address
}
