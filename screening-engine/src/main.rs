use anyhow::Context;
use screening_engine::bootstrap::{build_cache, build_registry};
use screening_engine::sources::HttpTransport;
use screening_engine::{EngineConfig, LogAlertSink, RefreshScheduler, ScreeningOrchestrator};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("screening_engine=info"));
    let json = std::env::var("LOG_FORMAT").map(|v| v.eq_ignore_ascii_case("json")).unwrap_or(false);

    if json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    info!("Starting screening engine...");

    let config = EngineConfig::from_env().context("Failed to load configuration")?;
    info!(
        "Configuration loaded: {} sources, min score {}, high-risk cutoff {}",
        config.sources.len(),
        config.matching.min_score,
        config.matching.high_risk_cutoff
    );

    let transport = Arc::new(HttpTransport::new().context("Failed to build HTTP client")?);
    let registry = Arc::new(build_registry(&config, transport).context("Failed to register sources")?);
    let cache = Arc::new(build_cache(&config).await.context("Failed to initialize result cache")?);

    let orchestrator = ScreeningOrchestrator::new(&config, registry, cache, Arc::new(LogAlertSink));

    // The first scheduler tick performs the initial download of every list
    let scheduler = RefreshScheduler::new(orchestrator.clone(), config.orchestrator.refresh_interval()).start();

    tokio::signal::ctrl_c().await.context("Failed to listen for shutdown signal")?;
    info!("Shutdown signal received");

    scheduler.shutdown().await;
    for (source_id, status) in orchestrator.get_source_status() {
        if let Some(error) = status.last_error {
            warn!("Source {} last error: {}", source_id, error);
        }
    }

    info!("Screening engine stopped");
    Ok(())
}
