use std::sync::Arc;

use tokio::signal;

use traffic_gateway::config::{ConfigManager, FileConfigManager};
use traffic_gateway::core::gateway::{ApiGateway, Gateway};
use traffic_gateway::error::GatewayError;
use traffic_gateway::middleware::logging::init_tracing;

const DEFAULT_CONFIG_PATH: &str = "config.json";

#[tokio::main]
async fn main() -> Result<(), GatewayError> {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());

    // Load configuration, a broken document is fatal
    let config_manager = FileConfigManager::load_or_init(&config_path).await?;
    let config = config_manager.get_config().await;

    init_tracing(&config.logging)?;
    tracing::info!(
        config = %config_path,
        routes = config.routes.len(),
        "Configuration loaded"
    );

    let gateway = Arc::new(ApiGateway::with_config_manager(config_manager).await?);

    gateway.start().await?;
    if let Some(addr) = gateway.local_addr().await {
        tracing::info!("Traffic gateway listening on {}", addr);
    }

    // Wait for Ctrl+C
    if let Err(e) = signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl+C: {}", e);
    }
    tracing::info!("Shutdown signal received, stopping traffic gateway");

    gateway.stop().await?;
    tracing::info!("Traffic gateway stopped");

    Ok(())
}
