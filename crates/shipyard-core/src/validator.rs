//! Static checks of build configuration and produced artifacts.

use std::path::Path;

use crate::{Build, Result};

/// Framework-specific validation. Implementations have no side effects.
///
/// Malformed requests are reported as [`crate::Error::InvalidInput`], problems
/// reading the environment as [`crate::Error::Io`].
pub trait Validator: Send + Sync {
    fn validate_build_config(&self, build: &Build) -> Result<()>;

    fn validate_artifact(&self, artifact_path: &Path) -> Result<()>;
}
