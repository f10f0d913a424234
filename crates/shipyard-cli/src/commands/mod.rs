//! CLI command implementations.

pub mod build;

use anyhow::{Context, Result};
use shipyard_config::{PipelineConfig, load_pipeline_config};
use shipyard_pipeline::CleanupManager;
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Load the pipeline config, falling back to defaults when no file is given.
pub fn load_config(path: Option<&Path>) -> Result<PipelineConfig> {
    match path {
        Some(path) => load_pipeline_config(path)
            .with_context(|| format!("Failed to load config file: {}", path.display())),
        None => {
            info!("No config file given, using defaults");
            Ok(PipelineConfig::default())
        }
    }
}

pub fn validate(path: &Path) -> Result<()> {
    let config = load_pipeline_config(path)
        .with_context(|| format!("Configuration error in {}", path.display()))?;

    println!("Configuration is valid");
    println!("  build dir:      {}", config.build_dir.display());
    println!("  artifacts dir:  {}", config.artifacts_dir.display());
    println!("  platform:       {}", config.deploy.platform);
    println!("  node versions:  {}", config.nodejs.allowed_engines.join(", "));
    Ok(())
}

pub async fn prune(config: &PipelineConfig, max_age_secs: u64) -> Result<()> {
    let removed = CleanupManager::new(config)
        .cleanup_old_builds(Duration::from_secs(max_age_secs))
        .await
        .context("Failed to prune build directories")?;

    for path in &removed {
        println!("removed {}", path.display());
    }
    println!("{} stale build(s) removed", removed.len());
    Ok(())
}
