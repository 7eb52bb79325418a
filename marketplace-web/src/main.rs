use dotenvy::dotenv;
use marketplace_core::observability::logging::init_tracing;
use marketplace_web::config::get_configuration;
use marketplace_web::startup::build_router;
use marketplace_web::AppState;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    let configuration = get_configuration().map_err(|e| {
        eprintln!("Failed to read configuration: {}", e);
        anyhow::anyhow!("Configuration error: {}", e)
    })?;

    // Initialize tracing using shared logic
    init_tracing(
        "marketplace-web",
        &configuration.observability.log_level,
        configuration.observability.otlp_endpoint.as_deref(),
    );

    marketplace_web::services::metrics::init_metrics()?;

    let state = AppState::from_settings(&configuration)?;
    info!(
        role = %state.role,
        site_url = %state.site_url,
        ocr = state.ocr.is_some(),
        "Front end configured"
    );

    let app = build_router(state, &configuration.server);

    let address = format!(
        "{}:{}",
        configuration.server.host, configuration.server.port
    );
    let listener = tokio::net::TcpListener::bind(&address).await.map_err(|e| {
        tracing::error!("Failed to bind TCP listener to {}: {}", address, e);
        anyhow::anyhow!("Failed to bind to address {}: {}", address, e)
    })?;

    info!("Starting marketplace-web on {}", address);
    axum::serve(listener, app).await.map_err(|e| {
        tracing::error!("Server error: {}", e);
        anyhow::anyhow!("Server error: {}", e)
    })?;

    Ok(())
}
