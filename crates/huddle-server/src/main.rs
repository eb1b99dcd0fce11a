//! # Huddle Server
//!
//! Chat coordinator served over WebSocket.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! huddle
//!
//! # Run with a custom config file
//! HUDDLE_CONFIG=/path/to/huddle.toml huddle
//!
//! # Run with environment variables
//! HUDDLE_PORT=8080 HUDDLE_HOST=0.0.0.0 huddle
//! ```

mod config;
mod handlers;
mod metrics;
mod peer;

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "huddle=debug,huddle_server=debug,huddle_core=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = config::Config::load()?;

    tracing::info!("Starting Huddle server on {}:{}", config.host, config.port);

    // Initialize metrics
    metrics::init_metrics();

    // Start the server
    handlers::run_server(config).await?;

    Ok(())
}
