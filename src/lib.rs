//! QuotaBar - AI usage tracker
//!
//! Aggregates usage and quota metrics from locally installed AI coding
//! assistants (Claude, Codex, Cursor, Antigravity, Kiro, OpenRouter) by
//! reading each tool's own credential store and calling its usage API.

pub mod config;
pub mod error;
pub mod http;
pub mod jwt;
pub mod model;
pub mod normalize;
pub mod orchestrator;
pub mod providers;
pub mod refresh;
pub mod storage;
pub mod wire;

use crate::http::ReqwestHttpClient;
use crate::orchestrator::FetchOrchestrator;
use crate::providers::ProviderRegistry;
use crate::storage::{KeyringSecretStore, SqliteStateDb};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize logging
pub fn init_logging() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("quotabar=info".parse().expect("valid directive")),
        )
        .init();
}

/// Compose the production registry and orchestrator.
pub fn build_orchestrator() -> anyhow::Result<FetchOrchestrator> {
    let http = Arc::new(ReqwestHttpClient::new()?);
    let secrets = Arc::new(KeyringSecretStore::new());
    let statedb = Arc::new(SqliteStateDb::new());
    let registry = Arc::new(ProviderRegistry::new(http, secrets, statedb));
    Ok(FetchOrchestrator::new(registry))
}
