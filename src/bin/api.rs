use fin_reasoning_orchestrator::{api::start_server, bootstrap::build_runtime, config::Settings};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug")),
        )
        .init();

    let settings = Settings::from_env()?;

    info!("Financial reasoning orchestrator - API server");
    info!("Port: {}", settings.api.port);

    let runtime = build_runtime(&settings).await?;

    info!("Orchestrator initialized");

    start_server(runtime.orchestrator, runtime.ingestor, settings.api.port).await?;

    Ok(())
}
