//! KDL configuration parsing for Shipyard.
//!
//! This crate handles parsing of the pipeline configuration document:
//! - Pipeline directories, timeouts and retention
//! - NodeJS build settings
//! - Deployment platform settings (static or kubernetes)

pub mod error;
pub mod pipeline;

pub use error::{ConfigError, ConfigResult};
pub use pipeline::{
    DeployConfig, NodeJsConfig, PipelineConfig, load_pipeline_config, parse_pipeline_config,
};
