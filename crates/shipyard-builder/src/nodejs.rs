//! Builder for the NodeJS framework family.
//!
//! A build copies the project into a scratch directory, renders a two-stage
//! recipe next to it, builds the image through the container engine, and
//! copies the served directory back out of a throwaway container as the
//! build artifact.

use async_trait::async_trait;
use futures::StreamExt;
use shipyard_config::NodeJsConfig;
use shipyard_core::{Build, BuildResult, Builder, BuilderOptions, Error, Result};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::archive::repack_container_archive;
use crate::context::remove_dir_if_exists;
use crate::engine::{BuildProgress, ContainerEngine};
use crate::manifest::MANIFEST_FILE;
use crate::recipe::{NodeJsRecipe, SERVE_ROOT};
use crate::source::{copy_source_tree, tar_directory};

/// Builds NodeJS projects into static-content images.
pub struct NodeJsBuilder {
    config: NodeJsConfig,
    options: BuilderOptions,
    engine: Arc<dyn ContainerEngine>,
}

impl NodeJsBuilder {
    pub fn new(
        config: NodeJsConfig,
        options: BuilderOptions,
        engine: Arc<dyn ContainerEngine>,
    ) -> Self {
        Self {
            config,
            options,
            engine,
        }
    }

    /// `shipyard-<project>:<commit or build id>`, prefixed by the registry when configured.
    pub fn image_tag(&self, build: &Build) -> String {
        let reference = build.commit().unwrap_or(build.id.as_str());
        let tag = format!(
            "shipyard-{}:{}",
            sanitize(&build.project_id),
            sanitize(reference)
        );
        match &self.config.registry {
            Some(registry) => format!("{}/{}", registry.trim_end_matches('/'), tag),
            None => tag,
        }
    }

    fn artifact_path(&self, build: &Build) -> PathBuf {
        self.options
            .artifact_dir
            .join(format!("{}.tar.gz", build.id))
    }

    /// The tighter of the per-invocation timeout and the configured build limit.
    fn build_timeout(&self) -> Duration {
        if self.options.timeout.is_zero() {
            self.config.max_build_time
        } else {
            self.options.timeout.min(self.config.max_build_time)
        }
    }

    async fn build_image(
        &self,
        build: &Build,
        tag: &str,
        recipe: &NodeJsRecipe,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let context_dir = self.options.work_dir.join("context");
        let source_dir = build
            .source_dir()
            .ok_or_else(|| Error::InvalidInput("builder config is missing sourceDir".into()))?;

        let files = copy_source_tree(&source_dir, &context_dir).await?;
        tokio::fs::write(context_dir.join("Dockerfile"), recipe.render())
            .await
            .map_err(|e| Error::io("failed to write Dockerfile", e))?;
        debug!(build_id = %build.id, files, "Prepared build context");

        let context = tar_directory(&context_dir).await?;
        let mut progress =
            self.engine
                .build_image(tag, context, recipe.build_args(), self.config.build_cache);

        let limit = self.build_timeout();
        let deadline = tokio::time::sleep(limit);
        tokio::pin!(deadline);

        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                _ = &mut deadline => {
                    return Err(Error::Timeout(format!(
                        "image build exceeded {}s",
                        limit.as_secs()
                    )));
                }
                next = progress.next() => next,
            };

            match next {
                None => break,
                Some(Ok(BuildProgress::Output(line))) => {
                    if !line.is_empty() {
                        debug!(build_id = %build.id, "{}", line);
                    }
                }
                Some(Ok(BuildProgress::Status { id, status })) => {
                    trace!(build_id = %build.id, layer = ?id, "{}", status);
                }
                Some(Ok(BuildProgress::Error(message))) => {
                    return Err(Error::ExecutionFailed(message));
                }
                Some(Err(e)) => return Err(e),
            }
        }

        info!(build_id = %build.id, image = %tag, "Image built");
        Ok(())
    }

    async fn extract_artifact(
        &self,
        build: &Build,
        tag: &str,
        cancel: &CancellationToken,
    ) -> Result<PathBuf> {
        let container_id = self.engine.create_container(tag).await?;

        let copied = tokio::select! {
            _ = cancel.cancelled() => Err(Error::Cancelled),
            result = self.engine.copy_from_container(&container_id, SERVE_ROOT) => result,
        };

        if let Err(e) = self.engine.remove_container(&container_id).await {
            warn!(container = %container_id, error = %e, "Failed to remove extraction container");
        }

        let dest = self.artifact_path(build);
        let size = repack_container_archive(copied?, &dest).await?;
        info!(build_id = %build.id, artifact = %dest.display(), size, "Artifact written");
        Ok(dest)
    }
}

/// Lowercase and replace anything outside `[a-z0-9._-]` so the value is a valid image reference part.
/// Both values are written into the recipe verbatim.
fn check_recipe_fields(build: &Build) -> Result<()> {
    if build.build_command.chars().any(char::is_control) {
        return Err(Error::InvalidInput(
            "build command must not contain control characters".into(),
        ));
    }
    if build.output_dir.chars().any(char::is_control) {
        return Err(Error::InvalidInput(
            "output directory must not contain control characters".into(),
        ));
    }
    let escapes = Path::new(&build.output_dir)
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    if escapes {
        return Err(Error::InvalidInput(format!(
            "output directory must be relative to the project: {}",
            build.output_dir
        )));
    }
    Ok(())
}

fn sanitize(value: &str) -> String {
    value
        .chars()
        .map(|c| {
            let c = c.to_ascii_lowercase();
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '-'
            }
        })
        .collect()
}

#[async_trait]
impl Builder for NodeJsBuilder {
    fn name(&self) -> &'static str {
        "nodejs"
    }

    async fn build(&self, build: &Build, cancel: &CancellationToken) -> Result<BuildResult> {
        info!(
            build_id = %build.id,
            project = %build.project_id,
            commit = ?build.commit(),
            engine = self.engine.name(),
            "Starting nodejs build"
        );

        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        self.engine.ping().await?;

        let tag = self.image_tag(build);
        let recipe = NodeJsRecipe::new(&self.config, build, &self.options.environment);

        self.build_image(build, &tag, &recipe, cancel).await?;
        let artifact_path = self.extract_artifact(build, &tag, cancel).await?;

        Ok(BuildResult {
            success: true,
            artifact_path,
            image_id: tag,
        })
    }

    fn validate(&self, build: &Build) -> Result<()> {
        if build.build_command.is_empty() {
            return Err(Error::InvalidInput("build command is required".into()));
        }
        if build.output_dir.is_empty() {
            return Err(Error::InvalidInput("output directory is required".into()));
        }
        check_recipe_fields(build)?;

        let source_dir = build.source_dir().ok_or_else(|| {
            Error::InvalidInput("source directory is required in builder configuration".into())
        })?;
        if !source_dir.is_dir() {
            return Err(Error::InvalidInput(format!(
                "source directory does not exist: {}",
                source_dir.display()
            )));
        }
        if !source_dir.join(MANIFEST_FILE).is_file() {
            return Err(Error::InvalidInput(format!(
                "package.json not found in source directory: {}",
                source_dir.display()
            )));
        }

        Ok(())
    }

    async fn cleanup(&self) -> Result<()> {
        remove_dir_if_exists(&self.options.work_dir).await
    }
}
