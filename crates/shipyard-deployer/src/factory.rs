//! Platform tag to deployer dispatch.

use shipyard_config::DeployConfig;
use shipyard_core::{Deployer, Error, Result};
use std::sync::Arc;

use crate::kubernetes::KubernetesDeployer;
use crate::static_files::StaticDeployer;

pub const SUPPORTED_PLATFORMS: &[&str] = &["static", "kubernetes"];

/// Create the deployer named by `config.platform`.
pub async fn create_deployer(config: &DeployConfig) -> Result<Arc<dyn Deployer>> {
    match config.platform.as_str() {
        "static" => Ok(Arc::new(StaticDeployer::new(config))),
        "kubernetes" => Ok(Arc::new(KubernetesDeployer::connect(config.clone()).await?)),
        other => Err(Error::InvalidInput(format!(
            "unsupported platform: {} (expected one of: {})",
            other,
            SUPPORTED_PLATFORMS.join(", ")
        ))),
    }
}
