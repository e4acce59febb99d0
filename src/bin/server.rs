//! Glint server binary.
//!
//! Loads config (file plus environment overrides), wires the registry and
//! lifecycle controller, and serves the HTTP surface until interrupted.
//! Hardware sessions are attached by the wearable host integration through
//! [`glint::LifecycleController`].

use glint::agent::HttpAgent;
use glint::bus::EventBus;
use glint::history::TurnArchive;
use glint::settings::SettingsStore;
use glint::{GlintConfig, GlintServer, LifecycleController, SessionRegistry};
use std::path::PathBuf;
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config_path = std::env::var("GLINT_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| GlintConfig::default_path());
    let config = GlintConfig::load(&config_path)
        .map_err(|e| anyhow::anyhow!("failed to load config: {e}"))?;

    let archive = match &config.history.archive_path {
        Some(path) => {
            tracing::info!("chat-turn archive at {}", path.display());
            Some(Arc::new(TurnArchive::open(path).map_err(|e| {
                anyhow::anyhow!("failed to open archive: {e}")
            })?))
        }
        None => {
            tracing::info!("no archive path configured; chat history is in-memory only");
            None
        }
    };

    let bus = Arc::new(EventBus::new(&config.bus));
    let agent = Arc::new(HttpAgent::from_config(&config.agent));
    let settings = Arc::new(SettingsStore::new());
    let registry = SessionRegistry::new(config, bus, agent, None, archive, settings);
    let lifecycle = Arc::new(LifecycleController::new(registry));

    let server = GlintServer::start(Arc::clone(&lifecycle))
        .await
        .map_err(|e| anyhow::anyhow!("server failed to start: {e}"))?;
    tracing::info!("glint-server ready on port {}", server.port());

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");
    server.shutdown();
    Ok(())
}
