//! Application startup and lifecycle management.

use axum::{
    middleware::from_fn,
    routing::{get, post},
    Router,
};
use reqwest::Client;
use service_core::error::AppError;
use service_core::middleware::{
    metrics_middleware, request_id_middleware, security_headers_middleware, REQUEST_ID_HEADER,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::trace::TraceLayer;

use crate::config::VerifyConfig;
use crate::handlers::{
    app::{health_check, index},
    callback::auth_callback,
    interactions::interactions,
    metrics::metrics,
    verify::start_verification,
};
use crate::services::{
    spawn_keep_alive, CommandHandler, DiscordIdentityClient, DiscordPlatformClient,
    GeoResolver, GrantProvisioner, GuildPlatform, IdentityProvider, InteractionVerifier,
    IpApiResolver, MockNotificationSink, NotificationSink, VerificationAggregator,
    VerificationPipeline, WebhookSink,
};
use crate::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/health", get(health_check))
        .route("/metrics", get(metrics))
        .route("/verify", get(start_verification))
        .route("/auth/callback", get(auth_callback))
        .route("/interactions", post(interactions))
        .layer(from_fn(security_headers_middleware))
        .layer(from_fn(metrics_middleware))
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get(REQUEST_ID_HEADER)
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                // The query string carries the OAuth code, so only the path is recorded.
                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    path = %request.uri().path(),
                )
            }),
        )
        .layer(from_fn(request_id_middleware))
        .with_state(state)
}

/// Upstream collaborators the pipeline is wired with.
#[derive(Clone)]
pub struct Services {
    pub identity: Arc<dyn IdentityProvider>,
    pub geo: Arc<dyn GeoResolver>,
    pub sink: Arc<dyn NotificationSink>,
    pub platform: Arc<dyn GuildPlatform>,
}

impl Services {
    /// REST clients for the configured endpoints.
    pub fn from_config(config: &VerifyConfig, client: &Client) -> Self {
        let sink: Arc<dyn NotificationSink> = match &config.webhook.url {
            Some(url) => {
                tracing::info!("Webhook notification sink initialized");
                Arc::new(WebhookSink::new(
                    client.clone(),
                    url.clone(),
                    config.webhook.credential_policy,
                ))
            }
            None => {
                tracing::info!("WEBHOOK_URL not set, using mock notification sink");
                Arc::new(MockNotificationSink::new(true))
            }
        };

        Self {
            identity: Arc::new(DiscordIdentityClient::new(client.clone(), &config.oauth)),
            geo: Arc::new(IpApiResolver::new(client.clone(), &config.geo.base_url)),
            sink,
            platform: Arc::new(DiscordPlatformClient::new(client.clone(), &config.platform)),
        }
    }
}

pub fn build_pipeline(config: &VerifyConfig, services: &Services) -> VerificationPipeline {
    let aggregator = VerificationAggregator::new(
        services.identity.clone(),
        services.geo.clone(),
        config.oauth.redirect_uri.clone(),
        config.timeouts.call,
    );
    let provisioner = GrantProvisioner::new(
        services.platform.clone(),
        config.platform.verified_role_name.clone(),
        config.platform.serialize_role_creation,
        config.timeouts.call,
    );

    VerificationPipeline::new(
        aggregator,
        services.sink.clone(),
        provisioner,
        config.timeouts.verification,
        config.timeouts.call,
    )
}

/// Everything the handlers share, wired from config and collaborators.
pub fn build_state(config: VerifyConfig, services: &Services) -> Result<AppState, AppError> {
    let verifier = InteractionVerifier::from_hex(&config.platform.public_key)
        .map_err(|e| AppError::ConfigError(anyhow::anyhow!(e)))?;
    let commands = CommandHandler::new(services.platform.clone(), config.oauth.authorize_link());
    let pipeline = build_pipeline(&config, services);

    Ok(AppState::new(
        Arc::new(config),
        Arc::new(pipeline),
        Arc::new(commands),
        Arc::new(verifier),
    ))
}

/// Application container for managing server lifecycle.
pub struct Application {
    port: u16,
    listener: TcpListener,
    state: AppState,
    client: Client,
}

impl Application {
    /// Build against the real upstream APIs.
    pub async fn build(config: VerifyConfig) -> Result<Self, AppError> {
        let client = Client::builder().timeout(config.timeouts.call).build()?;
        let services = Services::from_config(&config, &client);
        Self::build_with(config, services, client).await
    }

    /// Build with explicit collaborators. Fails if the bot credential is
    /// rejected by the platform.
    pub async fn build_with(
        config: VerifyConfig,
        services: Services,
        client: Client,
    ) -> Result<Self, AppError> {
        let bot = services.platform.current_user().await.map_err(|e| {
            tracing::error!(error = %e, "Bot credential rejected by the platform");
            AppError::ConfigError(anyhow::anyhow!("bot login failed: {}", e))
        })?;
        tracing::info!(bot_id = %bot.id, bot_name = %bot.username, "Bot logged in");

        let state = build_state(config, &services)?;

        // Port 0 = random port for testing
        let addr = SocketAddr::from(([0, 0, 0, 0], state.config.common.port));
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            tracing::error!("Failed to bind HTTP listener to {}: {}", addr, e);
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();

        tracing::info!("Verification service listening on port {}", port);

        Ok(Self {
            port,
            listener,
            state,
            client,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Serve until a shutdown signal arrives. The keep-alive task, if
    /// configured, lives exactly as long as the server.
    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        let keep_alive = self.state.config.keep_alive.interval.map(|interval| {
            spawn_keep_alive(
                self.client.clone(),
                format!("http://localhost:{}/", self.port),
                interval,
            )
        });

        let router = build_router(self.state);
        let result = axum::serve(
            self.listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await;

        if let Some(handle) = keep_alive {
            handle.abort();
        }

        result.map_err(|e| {
            tracing::error!("HTTP server error: {}", e);
            e
        })
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
