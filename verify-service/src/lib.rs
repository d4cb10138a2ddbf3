pub mod config;
pub mod handlers;
pub mod models;
pub mod services;
pub mod startup;

use config::VerifyConfig;
use services::{CommandHandler, InteractionVerifier, VerificationPipeline};
use std::sync::Arc;

/// Shared application state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<VerifyConfig>,
    pub pipeline: Arc<VerificationPipeline>,
    pub commands: Arc<CommandHandler>,
    pub verifier: Arc<InteractionVerifier>,
}

impl AppState {
    pub fn new(
        config: Arc<VerifyConfig>,
        pipeline: Arc<VerificationPipeline>,
        commands: Arc<CommandHandler>,
        verifier: Arc<InteractionVerifier>,
    ) -> Self {
        Self {
            config,
            pipeline,
            commands,
            verifier,
        }
    }
}
