//! Local build-and-deploy command.

use anyhow::{Context, Result, bail};
use clap::Args;
use shipyard_builder::{DockerEngine, FrameworkBuilderFactory, NodeJsValidator};
use shipyard_config::PipelineConfig;
use shipyard_core::{Build, BuildId, BuildStatus};
use shipyard_deployer::create_deployer;
use shipyard_pipeline::Pipeline;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Args)]
pub struct BuildArgs {
    /// Project identifier; names the image and the deployment
    #[arg(long)]
    pub project: String,

    /// Project source directory
    #[arg(long, default_value = ".")]
    pub source: PathBuf,

    /// Framework tag (react, vue, svelte, angular)
    #[arg(long, default_value = "react")]
    pub framework: String,

    /// package.json script that produces the output directory
    #[arg(long, default_value = "build")]
    pub build_command: String,

    /// Directory the build script writes to, relative to the project
    #[arg(long, default_value = "build")]
    pub output_dir: String,

    /// Commit hash used as the image tag
    #[arg(long)]
    pub commit: Option<String>,

    /// Build id; generated when omitted
    #[arg(long)]
    pub id: Option<String>,

    /// Status poll interval in milliseconds
    #[arg(long, default_value = "500")]
    pub poll_interval: u64,
}

impl BuildArgs {
    fn to_build(&self) -> Result<Build> {
        let source = self
            .source
            .canonicalize()
            .with_context(|| format!("Failed to resolve source directory: {}", self.source.display()))?;
        let id = self.id.clone().map(BuildId::from).unwrap_or_else(BuildId::generate);

        let mut build = Build::new(id, &self.project, &self.framework)
            .with_build_command(&self.build_command)
            .with_output_dir(&self.output_dir)
            .with_source_dir(source);
        if let Some(commit) = &self.commit {
            build = build.with_commit_hash(commit);
        }
        Ok(build)
    }
}

/// Submit a build, wait for it to finish, and print the final record.
pub async fn run(config: PipelineConfig, args: BuildArgs) -> Result<()> {
    let build = args.to_build()?;
    let id = build.id.clone();

    let engine = Arc::new(DockerEngine::new().context("Failed to connect to Docker")?);
    let factory = Arc::new(FrameworkBuilderFactory::new(config.nodejs.clone(), engine));
    let deployer = create_deployer(&config.deploy)
        .await
        .context("Failed to create deployer")?;
    let validator = Arc::new(NodeJsValidator::new(
        config.nodejs.clone(),
        config.max_artifact_size,
    ));

    let pipeline = Pipeline::new(config, factory, deployer, validator);
    pipeline
        .start_build(build)
        .await
        .context("Build rejected")?;
    info!(build_id = %id, "Build submitted");

    let interval = Duration::from_millis(args.poll_interval.max(10));
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut interrupted = false;

    let finished = loop {
        tokio::select! {
            signal = &mut ctrl_c, if !interrupted => {
                signal.context("Failed to listen for Ctrl-C")?;
                interrupted = true;
                warn!(build_id = %id, "Interrupted, cancelling build");
                if let Err(e) = pipeline.cancel_build(&id).await {
                    warn!(build_id = %id, error = %e, "Cancel failed");
                }
            }
            _ = tokio::time::sleep(interval) => {}
        }

        let build = pipeline.get_build(&id).await?;
        // Wait for cleanup too, which finishes after the status is terminal.
        let settled = pipeline
            .get_metrics(&id)
            .await
            .is_some_and(|m| m.is_finished());
        if build.status.is_terminal() && settled {
            break build;
        }
    };

    println!("{}", serde_json::to_string_pretty(&finished)?);

    if let Some(metrics) = pipeline.get_metrics(&id).await {
        info!(
            build_id = %id,
            duration = ?metrics.duration,
            build = ?metrics.build_duration,
            deploy = ?metrics.deploy_duration,
            "Build metrics"
        );
    }

    if finished.status != BuildStatus::Success {
        bail!("build {} finished with status {}", id, finished.status);
    }
    Ok(())
}
