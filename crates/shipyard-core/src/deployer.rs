//! Deployer trait.
//!
//! Deployers publish a built artifact or image to a target platform (a static
//! file root, a cluster) and can reverse that publication.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::{Build, Result};

/// Trait for deployers.
#[async_trait]
pub trait Deployer: Send + Sync {
    /// Name of this deployer.
    fn name(&self) -> &'static str;

    /// Validate a build before deploying it.
    fn validate(&self, build: &Build) -> Result<()>;

    /// Publish the build. Repeating a deploy updates in place.
    ///
    /// Must observe `cancel` between units of work and return
    /// [`Error::Cancelled`](crate::Error::Cancelled) only once no work it
    /// started is still running.
    async fn deploy(&self, build: &Build, cancel: &CancellationToken) -> Result<()>;

    /// Restore the state that preceded the most recent deploy.
    async fn rollback(&self, build: &Build) -> Result<()>;
}
