//! Docker container engine implementation.

use async_trait::async_trait;
use bollard::Docker;
use bollard::container::{Config, CreateContainerOptions, DownloadFromContainerOptions, RemoveContainerOptions};
use bollard::errors::Error as DockerError;
use bollard::image::BuildImageOptions;
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use futures::stream::BoxStream;
use shipyard_core::{Error, Result};
use std::collections::HashMap;
use tracing::{debug, info};
use uuid::Uuid;

use crate::engine::{BuildProgress, ContainerEngine};

/// Container engine backed by the local Docker daemon.
#[derive(Clone)]
pub struct DockerEngine {
    docker: Docker,
}

impl DockerEngine {
    /// Connect to the local Docker daemon using the environment defaults.
    pub fn new() -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| Error::Unavailable(format!("failed to connect to docker: {}", e)))?;
        Ok(Self { docker })
    }

    /// Create with a custom Docker client.
    pub fn with_client(docker: Docker) -> Self {
        Self { docker }
    }

    fn container_name(image: &str) -> String {
        let repo = image.split(':').next().unwrap_or(image);
        format!("{}-extract-{}", repo, Uuid::new_v4().simple())
    }
}

/// Map a Docker API error onto the pipeline error taxonomy.
///
/// Responses from the daemon are content or lookup errors; anything that
/// never produced a response means the daemon could not be reached.
fn engine_error(context: &str, err: DockerError) -> Error {
    match err {
        DockerError::DockerResponseServerError {
            status_code: 404,
            message,
        } => Error::NotFound(format!("{}: {}", context, message)),
        DockerError::DockerResponseServerError {
            status_code,
            message,
        } => Error::Internal(format!("{} ({}): {}", context, status_code, message)),
        other => Error::Unavailable(format!("{}: {}", context, other)),
    }
}

#[async_trait]
impl ContainerEngine for DockerEngine {
    fn name(&self) -> &'static str {
        "docker"
    }

    async fn ping(&self) -> Result<()> {
        self.docker
            .ping()
            .await
            .map(|_| ())
            .map_err(|e| engine_error("docker ping failed", e))
    }

    fn build_image(
        &self,
        tag: &str,
        context: Bytes,
        build_args: HashMap<String, String>,
        use_cache: bool,
    ) -> BoxStream<'_, Result<BuildProgress>> {
        info!(image = %tag, use_cache, "Submitting image build");

        let options = BuildImageOptions {
            dockerfile: "Dockerfile".to_string(),
            t: tag.to_string(),
            rm: true,
            forcerm: true,
            nocache: !use_cache,
            buildargs: build_args,
            ..Default::default()
        };

        let stream = self.docker.build_image(options, None, Some(context));

        let mapped = stream.map(|result| match result {
            Ok(info) => {
                if let Some(error) = info.error {
                    return Ok(BuildProgress::Error(error));
                }
                if let Some(line) = info.stream {
                    return Ok(BuildProgress::Output(line.trim_end().to_string()));
                }
                Ok(BuildProgress::Status {
                    id: info.id,
                    status: info.status.unwrap_or_default(),
                })
            }
            // The daemon reports failing RUN steps as a server error on the stream.
            Err(DockerError::DockerStreamError { error }) => Ok(BuildProgress::Error(error)),
            Err(e) => Err(engine_error("docker build failed", e)),
        });

        Box::pin(mapped)
    }

    async fn create_container(&self, image: &str) -> Result<String> {
        let container_name = Self::container_name(image);

        let config = Config {
            image: Some(image.to_string()),
            ..Default::default()
        };

        let create_options = CreateContainerOptions {
            name: container_name.clone(),
            platform: None,
        };

        debug!(container = %container_name, image = %image, "Creating container");
        let container = self
            .docker
            .create_container(Some(create_options), config)
            .await
            .map_err(|e| engine_error("failed to create container", e))?;

        Ok(container.id)
    }

    async fn copy_from_container(&self, container_id: &str, path: &str) -> Result<Bytes> {
        let options = DownloadFromContainerOptions {
            path: path.to_string(),
        };

        let mut stream = self
            .docker
            .download_from_container(container_id, Some(options));

        let mut archive = BytesMut::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| engine_error("failed to copy from container", e))?;
            archive.extend_from_slice(&chunk);
        }

        debug!(container = %container_id, path = %path, bytes = archive.len(), "Copied from container");
        Ok(archive.freeze())
    }

    async fn remove_container(&self, container_id: &str) -> Result<()> {
        let options = RemoveContainerOptions {
            force: true,
            v: true,
            ..Default::default()
        };

        self.docker
            .remove_container(container_id, Some(options))
            .await
            .map_err(|e| engine_error("failed to remove container", e))?;

        Ok(())
    }
}
