//! Container build engine boundary.
//!
//! The builder talks to the engine only through [`ContainerEngine`], so the
//! build algorithm can run against Docker in production and an in-memory
//! engine in tests.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use shipyard_core::Result;
use std::collections::HashMap;

/// A progress message reported while an image builds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildProgress {
    /// A line of recipe output.
    Output(String),
    /// Layer/pull status.
    Status { id: Option<String>, status: String },
    /// The engine reported a build failure. Ends the build.
    Error(String),
}

/// Operations the builder needs from a container engine.
#[async_trait]
pub trait ContainerEngine: Send + Sync {
    /// Name of this engine.
    fn name(&self) -> &'static str;

    /// Check that the engine is reachable.
    async fn ping(&self) -> Result<()>;

    /// Build an image from a tar build context containing a `Dockerfile`.
    ///
    /// With `use_cache` false every layer is rebuilt.
    fn build_image(
        &self,
        tag: &str,
        context: Bytes,
        build_args: HashMap<String, String>,
        use_cache: bool,
    ) -> BoxStream<'_, Result<BuildProgress>>;

    /// Create (but do not start) a container from `image`, returning its id.
    async fn create_container(&self, image: &str) -> Result<String>;

    /// Copy a directory out of a container as a tar archive.
    async fn copy_from_container(&self, container_id: &str, path: &str) -> Result<Bytes>;

    /// Force-remove a container and its volumes.
    async fn remove_container(&self, container_id: &str) -> Result<()>;
}
