use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use txwatch_engine::config::Config;
use txwatch_engine::consumer;
use txwatch_engine::engine::Engine;
use txwatch_engine::lifecycle::LifecycleManager;
use txwatch_engine::storage::MemoryStore;

#[tokio::main]
async fn main() -> eyre::Result<()> {
    color_eyre::install()?;

    // Initialize structured logging (set RUST_LOG=info for output)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    tracing::info!("TxWatch Engine starting");

    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.toml".to_string());

    let config = Config::load(&config_path)?;
    tracing::info!(
        window_capacity = config.ingest.window_capacity,
        alert_threshold = config.detection.alert_threshold,
        "Configuration loaded from {}",
        config_path
    );

    let store = Arc::new(MemoryStore::new());
    let engine = Arc::new(Engine::new(config.clone(), store));

    // Restore checkpointed thresholds and models, if any
    let lifecycle = LifecycleManager::new(engine.clone());
    lifecycle.restore().await;

    let shutdown = CancellationToken::new();

    // Spawn API server
    if config.api.enabled {
        let api_engine = engine.clone();
        let host = config.api.host.clone();
        let port = config.api.port;
        tokio::spawn(async move {
            if let Err(e) = txwatch_engine::api::serve(api_engine, &host, port).await {
                tracing::error!(error = %e, "API server failed");
            }
        });
    }

    // Spawn model lifecycle scheduler
    let lifecycle_handle = tokio::spawn(lifecycle.run(shutdown.clone()));

    // Consume newline-delimited JSON events from stdin
    let consumer_engine = engine.clone();
    let consumer_shutdown = shutdown.clone();
    let consumer_handle = tokio::spawn(async move {
        consumer::consume(consumer_engine, tokio::io::stdin(), consumer_shutdown).await
    });

    tracing::info!("Engine running, reading events from stdin. Press Ctrl+C to stop.");

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received, stopping...");
    shutdown.cancel();

    let stats = consumer_handle.await?;
    tracing::info!(processed = stats.processed, "Consumer stopped");

    // Lifecycle takes the final checkpoint on its way out
    let _ = lifecycle_handle.await;

    engine
        .broadcaster()
        .publish_system(serde_json::json!({ "event": "shutdown" }));

    tracing::info!("TxWatch Engine stopped gracefully");
    Ok(())
}
