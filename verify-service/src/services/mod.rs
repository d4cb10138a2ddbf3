pub mod aggregator;
pub mod commands;
pub mod error;
pub mod geo;
pub mod identity;
pub mod interactions;
pub mod keep_alive;
pub mod metrics;
pub mod mock;
pub mod pipeline;
pub mod platform;
pub mod provisioner;
pub mod webhook;

pub use aggregator::VerificationAggregator;
pub use commands::{ChannelMessage, Command, CommandHandler, CommandInvocation, CommandOutcome};
pub use error::{Stage, VerificationError};
pub use geo::{GeoResolver, IpApiResolver};
pub use identity::{DiscordIdentityClient, IdentityError, IdentityProvider};
pub use interactions::{Interaction, InteractionResponse, InteractionVerifier};
pub use keep_alive::spawn_keep_alive;
pub use metrics::{get_metrics, init_metrics};
pub use mock::{
    MockGeoResolver, MockGuildPlatform, MockIdentityProvider, MockNotificationSink,
};
pub use pipeline::{VerificationOutcome, VerificationPipeline};
pub use platform::{DiscordPlatformClient, GuildPlatform, PlatformError};
pub use provisioner::GrantProvisioner;
pub use webhook::{
    build_message, CredentialPolicy, DeliveryError, NotificationSink, WebhookMessage, WebhookSink,
};
