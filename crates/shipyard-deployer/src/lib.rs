//! Deployment backends for Shipyard.
//!
//! Provides:
//! - Static file deployer (extract into a per-project directory with backups)
//! - Kubernetes deployer (Deployment, Service and Ingress per project)
//! - The platform-keyed deployer factory

pub mod cluster;
pub mod factory;
pub mod kubernetes;
pub mod static_files;

pub use cluster::{ClusterClient, ClusterError, KubeClusterClient};
pub use factory::{SUPPORTED_PLATFORMS, create_deployer};
pub use kubernetes::KubernetesDeployer;
pub use static_files::StaticDeployer;

pub use shipyard_core::deployer::Deployer;
