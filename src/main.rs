use std::sync::Arc;

use tracing::info;

use courtbook::config::Config;
use courtbook::engine::Engine;
use courtbook::model::Resource;
use courtbook::reaper;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env();
    courtbook::observability::init(config.metrics_port)?;

    // Ensure data directory exists
    std::fs::create_dir_all(&config.data_dir)?;
    let wal_path = config.data_dir.join("courtbook.wal");
    let engine = Arc::new(Engine::new(wal_path.clone())?);

    if let Some(catalog) = &config.catalog {
        let courts: Vec<Resource> = serde_json::from_slice(&std::fs::read(catalog)?)?;
        for court in courts {
            let id = court.id;
            if let Err(e) = engine.upsert_resource(court).await {
                tracing::error!("catalog {}: court {id} rejected: {e}", catalog.display());
            }
        }
    }

    info!("courtbook running");
    info!("  journal: {}", wal_path.display());
    info!("  courts: {}", engine.list_resources().await.len());
    info!("  sweep interval: {:?}", config.sweep_interval);
    info!("  compact threshold: {}", config.compact_threshold);
    info!("  metrics: {}", config.metrics_port.map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics")));

    let sweeper = tokio::spawn(reaper::run_sweeper(engine.clone(), config.sweep_interval));
    let compactor = tokio::spawn(reaper::run_compactor(engine.clone(), config.compact_threshold));

    // Graceful shutdown on SIGTERM/ctrl-c
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await?;
    }
    info!("shutdown signal received");

    sweeper.abort();
    compactor.abort();
    // Every acknowledged write is already fsynced; leave a compact journal behind.
    if let Err(e) = engine.compact_wal().await {
        tracing::warn!("final compaction failed: {e}");
    }

    info!("courtbook stopped");
    Ok(())
}
