use std::path::Path;

use anyhow::Result;

use marketpipe_core::config::AppConfig;
use marketpipe_core::engine::Orchestrator;
use marketpipe_core::health;

/// Execute the `run` command: load config, start the health endpoint when
/// containerized, then drive the pipeline end to end.
pub async fn execute(config_path: &Path) -> Result<bool> {
    // 1. Load config
    let config = AppConfig::load(config_path)?;

    tracing::info!(
        enabled_types = ?config.pipeline.enabled_types,
        bootstrap_servers = config.bootstrap_servers(),
        "Configuration loaded"
    );

    // 2. Health endpoint for the container orchestrator's liveness checks
    if config.pipeline.running_in_container {
        health::spawn(config.health.port);
    }

    // 3. Run all phases
    let ok = Orchestrator::new(config).run().await;
    if ok {
        println!("Pipeline verified successfully.");
    } else {
        println!("Pipeline verification failed.");
    }
    Ok(ok)
}
