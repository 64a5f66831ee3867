//! Vibe Gateway entry point
//!
//! Run with:
//! ```bash
//! GATEWAY_PORT=8080 cargo run -p vibe-gateway
//! ```
//!
//! Configuration is loaded from environment variables.

use tracing::{error, info};
use vibe_common::{try_init_tracing, AppResult, ConfigError, GatewayConfig, TracingConfig};
use vibe_core::Server;

#[tokio::main]
async fn main() {
    let config = GatewayConfig::from_env();

    // Initialize tracing
    let tracing_config = config
        .as_ref()
        .map(TracingConfig::for_gateway)
        .unwrap_or_default();
    if let Err(e) = try_init_tracing(&tracing_config) {
        eprintln!("Warning: Failed to initialize tracing: {e}");
    }

    // Run the server
    if let Err(e) = run(config).await {
        error!(error = %e, code = e.error_code(), "Gateway stopped with an error");
        std::process::exit(1);
    }
}

async fn run(config: Result<GatewayConfig, ConfigError>) -> AppResult<()> {
    info!("Starting Vibe Gateway...");

    let config = config?;

    info!(
        name = %config.name,
        env = ?config.env,
        address = %config.address(),
        path = %config.path,
        longpoll_timeout_ms = config.longpoll_timeout_ms,
        "Configuration loaded"
    );

    vibe_gateway::server::run(Server::new(), config).await?;

    info!("Gateway stopped");
    Ok(())
}
