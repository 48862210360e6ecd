mod auth;
mod background;
mod config;
mod counters;
mod error;
mod http_server;
mod mailer;
mod newsletter;
mod notifier;
mod oauth;
mod registry;
mod state;
mod store;
mod types;
mod validation;

#[cfg(test)]
mod test_support;

use anyhow::Context;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use config::Settings;
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let settings = Settings::load().context("failed to load configuration")?;

    info!("Initializing state...");
    let state = AppState::initialize(settings).await?;

    http_server::serve(state).await
}
