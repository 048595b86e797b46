use math_query_resolver::{agent::Orchestrator, api::start_server, config::ResolverConfig};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Loads .env as well
    let config = ResolverConfig::from_env()?;

    if config.gemini_api_key.is_none() {
        eprintln!("⚠️  GEMINI_API_KEY not set in .env");
        eprintln!("📌 See .env.example for setup instructions");
    }

    let api_port: u16 = std::env::var("PORT")
        .or_else(|_| std::env::var("API_PORT"))
        .unwrap_or_else(|_| "8080".to_string())
        .parse()?;

    info!("🚀 Math Query Resolver - API Server");
    info!("📍 Port: {}", api_port);

    let orchestrator = Arc::new(Orchestrator::from_config(&config)?);

    info!(engines = ?orchestrator.engine_names(), "✅ Orchestrator initialized");
    info!("📡 Starting API server...");

    start_server(orchestrator, api_port).await?;

    Ok(())
}
