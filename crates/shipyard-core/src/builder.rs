//! Builder trait and per-invocation options.
//!
//! Builders turn a [`Build`] into a deployable artifact inside an isolated
//! build environment. One implementation exists per framework family.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::{Build, BuildResult, Result};

/// Options handed to a single builder. Not shared across builds.
#[derive(Debug, Clone, Default)]
pub struct BuilderOptions {
    /// Scratch directory the source tree is copied into.
    pub work_dir: PathBuf,
    /// Dependency cache for this build.
    pub cache_dir: PathBuf,
    /// Where the archived artifact is written. Survives cleanup.
    pub artifact_dir: PathBuf,
    /// Environment overlay applied inside the build.
    pub environment: HashMap<String, String>,
    /// Upper bound on the build step.
    pub timeout: Duration,
}

/// Trait for framework builders.
#[async_trait]
pub trait Builder: Send + Sync {
    /// Name of this builder.
    fn name(&self) -> &'static str;

    /// Produce an artifact. Must observe `cancel` at I/O boundaries.
    async fn build(&self, build: &Build, cancel: &CancellationToken) -> Result<BuildResult>;

    /// Pre-flight check of the fields this builder requires.
    fn validate(&self, build: &Build) -> Result<()>;

    /// Release working-directory resources. Safe to call when `build` never ran.
    async fn cleanup(&self) -> Result<()>;
}

/// Creates builders keyed by a case-sensitive framework tag.
pub trait BuilderFactory: Send + Sync {
    /// Unsupported frameworks are an error; there is no fallback builder.
    fn create_builder(&self, framework: &str, options: BuilderOptions) -> Result<Box<dyn Builder>>;
}
