//! Pipeline orchestrator - drives a build from validation through deployment.

use shipyard_builder::BuildContext;
use shipyard_config::PipelineConfig;
use shipyard_core::{
    Build, BuildId, BuildResult, BuildStatus, BuildStep, Builder, BuilderFactory, BuilderOptions,
    Deployer, Error, Result, RollbackOutcome, Validator,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::metrics::{BuildMetrics, MetricsCollector};
use crate::registry::BuildRegistry;

/// Orchestrates builds. Cheap to clone; clones share the same registry.
#[derive(Clone)]
pub struct Pipeline {
    config: Arc<PipelineConfig>,
    builder_factory: Arc<dyn BuilderFactory>,
    deployer: Arc<dyn Deployer>,
    validator: Arc<dyn Validator>,
    registry: Arc<BuildRegistry>,
    metrics: Arc<MetricsCollector>,
}

/// Cancellation signals for one execution.
struct Signals {
    /// Fired by `cancel_build`.
    user: CancellationToken,
    /// Child of `user`, also fired when the build exceeds its timeout.
    run: CancellationToken,
    timeout: Duration,
}

impl Signals {
    /// The error describing why `run` fired.
    fn interruption(&self) -> Error {
        if self.user.is_cancelled() {
            Error::Cancelled
        } else {
            Error::Timeout(format!("build exceeded {:?}", self.timeout))
        }
    }
}

impl Pipeline {
    pub fn new(
        config: PipelineConfig,
        builder_factory: Arc<dyn BuilderFactory>,
        deployer: Arc<dyn Deployer>,
        validator: Arc<dyn Validator>,
    ) -> Self {
        let retained = config.max_retained_builds;
        Self {
            config: Arc::new(config),
            builder_factory,
            deployer,
            validator,
            registry: Arc::new(BuildRegistry::new(retained)),
            metrics: Arc::new(MetricsCollector::new(retained)),
        }
    }

    /// Validate and register a build, then execute it in the background.
    ///
    /// Returns as soon as the build is registered. A validation failure is
    /// returned directly and the build is never registered.
    pub async fn start_build(&self, build: Build) -> Result<()> {
        if build.id.is_empty() {
            return Err(Error::InvalidInput("build id is required".into()));
        }
        if build.status != BuildStatus::Pending {
            return Err(Error::InvalidInput(format!(
                "build {} must be submitted as pending, not {}",
                build.id, build.status
            )));
        }

        self.validator.validate_build_config(&build)?;

        let cancel = CancellationToken::new();
        self.registry.register(build.clone(), cancel.clone()).await?;
        info!(build_id = %build.id, project = %build.project_id, framework = %build.framework, "Build registered");

        let pipeline = self.clone();
        tokio::spawn(async move {
            pipeline.execute_build(build, cancel).await;
        });

        Ok(())
    }

    /// Current snapshot of a build.
    pub async fn get_build(&self, id: &BuildId) -> Result<Build> {
        self.registry.get(id).await
    }

    /// Cancel a build that is `building`.
    ///
    /// Cancellation is cooperative: in-flight engine and cluster calls are
    /// signalled and may finish shortly after this returns.
    pub async fn cancel_build(&self, id: &BuildId) -> Result<()> {
        self.registry.cancel(id).await?;
        info!(build_id = %id, "Build cancelled");
        Ok(())
    }

    pub async fn get_metrics(&self, id: &BuildId) -> Option<BuildMetrics> {
        self.metrics.get(id).await
    }

    async fn execute_build(&self, build: Build, cancel: CancellationToken) {
        let id = build.id.clone();

        match self
            .registry
            .advance(&id, |b| b.transition(BuildStatus::Building))
            .await
        {
            Ok(true) => {}
            Ok(false) => return,
            Err(e) => {
                error!(build_id = %id, error = %e, "Failed to start build");
                return;
            }
        }
        self.metrics.start_build(&id).await;
        info!(build_id = %id, "Build started");

        let signals = Signals {
            run: cancel.child_token(),
            user: cancel,
            timeout: self.config.default_timeout,
        };
        let timer = {
            let run = signals.run.clone();
            let timeout = signals.timeout;
            tokio::spawn(async move {
                tokio::select! {
                    _ = tokio::time::sleep(timeout) => run.cancel(),
                    _ = run.cancelled() => {}
                }
            })
        };

        let outcome = self.run(&build, &signals).await;
        signals.run.cancel();
        let _ = timer.await;

        self.finish(&id, outcome, &signals).await;
    }

    async fn finish(&self, id: &BuildId, outcome: Result<BuildResult>, signals: &Signals) {
        let (settled, intended) = match outcome {
            Ok(_) => (
                self.registry
                    .advance(id, |b| b.transition(BuildStatus::Success))
                    .await,
                BuildStatus::Success,
            ),
            Err(e) if e.is_cancelled() && signals.user.is_cancelled() => {
                debug!(build_id = %id, "Build stopped after cancellation");
                let recorded = self.registry.modify(id, |b| b.record_rollback(&e)).await;
                (recorded.map(|()| false), BuildStatus::Cancelled)
            }
            Err(e) => {
                let e = if e.is_cancelled() {
                    signals.interruption()
                } else {
                    e
                };
                error!(build_id = %id, error = %e, "Build failed");
                self.metrics.record_error(id).await;
                (
                    self.registry.advance(id, |b| b.fail(&e)).await,
                    BuildStatus::Failed,
                )
            }
        };

        if let Err(e) = settled {
            error!(build_id = %id, error = %e, "Failed to record build outcome");
        }

        // The record may already be evicted when retention is tight.
        let status = self
            .registry
            .get(id)
            .await
            .map(|b| b.status)
            .unwrap_or(intended);
        self.metrics.end_build(id, status).await;
        info!(build_id = %id, status = %status, "Build finished");
    }

    /// Steps 2 onward, inside a build context that is always cleaned up.
    async fn run(&self, build: &Build, signals: &Signals) -> Result<BuildResult> {
        let ctx = BuildContext::create(&self.config, &build.id)
            .await
            .map_err(|e| e.in_step(BuildStep::Setup))?;

        let outcome = self.run_in_context(build, &ctx, signals).await;

        if let Err(e) = ctx.cleanup().await {
            warn!(build_id = %build.id, error = %e, "Build context cleanup failed");
            self.metrics.record_warning(&build.id).await;
        }
        outcome
    }

    async fn run_in_context(
        &self,
        build: &Build,
        ctx: &BuildContext,
        signals: &Signals,
    ) -> Result<BuildResult> {
        let options = BuilderOptions {
            work_dir: ctx.build_dir.clone(),
            cache_dir: ctx.cache_dir.clone(),
            artifact_dir: ctx.artifact_dir.clone(),
            environment: self.config.nodejs.env_vars.clone(),
            timeout: self.config.default_timeout,
        };

        let builder = self
            .builder_factory
            .create_builder(&build.framework, options)
            .map_err(|e| e.in_step(BuildStep::CreateBuilder))?;
        debug!(build_id = %build.id, builder = builder.name(), "Builder created");

        let started = Instant::now();
        let built = match builder.validate(build) {
            Ok(()) => builder.build(build, &signals.run).await,
            Err(e) => Err(e),
        };
        if let Err(e) = builder.cleanup().await {
            warn!(build_id = %build.id, error = %e, "Builder cleanup failed");
            self.metrics.record_warning(&build.id).await;
        }
        let result = built.map_err(|e| e.in_step(BuildStep::Build))?;
        self.metrics
            .record_build_duration(&build.id, started.elapsed())
            .await;
        info!(build_id = %build.id, image = %result.image_id, "Build step completed");

        self.validator
            .validate_artifact(&result.artifact_path)
            .map_err(|e| e.in_step(BuildStep::ValidateArtifact))?;

        let deployable = self
            .registry
            .modify(&build.id, |b| {
                b.artifact_path = Some(result.artifact_path.clone());
                b.image_id = Some(result.image_id.clone());
                b.clone()
            })
            .await?;

        self.deploy(&deployable, signals)
            .await
            .map_err(|e| e.in_step(BuildStep::Deploy))?;

        Ok(result)
    }

    /// Deploy, rolling back on failure. The deployer observes `run` itself, so
    /// rollback only starts once the deploy has stopped touching the target.
    async fn deploy(&self, build: &Build, signals: &Signals) -> Result<()> {
        if signals.run.is_cancelled() {
            return Err(signals.interruption());
        }

        self.deployer.validate(build)?;

        info!(build_id = %build.id, deployer = self.deployer.name(), "Deploying");
        let started = Instant::now();
        let deployed = self.deployer.deploy(build, &signals.run).await;
        self.metrics
            .record_deploy_duration(&build.id, started.elapsed())
            .await;

        let Err(mut cause) = deployed else {
            info!(build_id = %build.id, "Deployment completed");
            return Ok(());
        };
        if cause.is_cancelled() && signals.run.is_cancelled() {
            cause = signals.interruption();
        }

        warn!(build_id = %build.id, error = %cause, "Deployment failed, rolling back");
        let rollback = match self.deployer.rollback(build).await {
            Ok(()) => RollbackOutcome::Completed,
            Err(e) => {
                error!(build_id = %build.id, error = %e, "Rollback failed");
                self.metrics.record_warning(&build.id).await;
                RollbackOutcome::Failed(e.to_string())
            }
        };

        Err(Error::DeployFailed {
            cause: Box::new(cause),
            rollback,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    #[derive(Clone, Copy, PartialEq)]
    enum Behavior {
        Succeed,
        Fail,
        Hang,
    }

    #[derive(Default)]
    struct Counters {
        builds: AtomicUsize,
        builder_cleanups: AtomicUsize,
        deploys: AtomicUsize,
        deploys_settled: AtomicUsize,
        rollbacks: AtomicUsize,
        rollbacks_during_deploy: AtomicUsize,
    }

    impl Counters {
        fn get(counter: &AtomicUsize) -> usize {
            counter.load(Ordering::SeqCst)
        }
    }

    struct MockBuilder {
        behavior: Behavior,
        artifact_size: usize,
        options: BuilderOptions,
        counters: Arc<Counters>,
    }

    #[async_trait]
    impl Builder for MockBuilder {
        fn name(&self) -> &'static str {
            "mock"
        }

        async fn build(&self, build: &Build, cancel: &CancellationToken) -> Result<BuildResult> {
            self.counters.builds.fetch_add(1, Ordering::SeqCst);
            match self.behavior {
                Behavior::Fail => Err(Error::ExecutionFailed("npm ERR! build script exited 1".into())),
                Behavior::Hang => {
                    cancel.cancelled().await;
                    Err(Error::Cancelled)
                }
                Behavior::Succeed => {
                    let path = self.options.artifact_dir.join(format!("{}.tar.gz", build.id));
                    std::fs::write(&path, vec![0u8; self.artifact_size]).unwrap();
                    Ok(BuildResult {
                        success: true,
                        artifact_path: path,
                        image_id: format!("shipyard-{}:{}", build.project_id, build.id),
                    })
                }
            }
        }

        fn validate(&self, _build: &Build) -> Result<()> {
            Ok(())
        }

        async fn cleanup(&self) -> Result<()> {
            self.counters.builder_cleanups.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct MockFactory {
        behavior: Behavior,
        artifact_size: usize,
        counters: Arc<Counters>,
    }

    impl BuilderFactory for MockFactory {
        fn create_builder(&self, framework: &str, options: BuilderOptions) -> Result<Box<dyn Builder>> {
            if framework != "react" {
                return Err(Error::InvalidInput(format!("unsupported framework: {}", framework)));
            }
            Ok(Box::new(MockBuilder {
                behavior: self.behavior,
                artifact_size: self.artifact_size,
                options,
                counters: self.counters.clone(),
            }))
        }
    }

    struct MockDeployer {
        behavior: Behavior,
        rollback_fails: bool,
        counters: Arc<Counters>,
    }

    #[async_trait]
    impl Deployer for MockDeployer {
        fn name(&self) -> &'static str {
            "mock"
        }

        fn validate(&self, build: &Build) -> Result<()> {
            assert!(build.artifact_path.is_some());
            assert!(build.image_id.is_some());
            Ok(())
        }

        async fn deploy(&self, _build: &Build, cancel: &CancellationToken) -> Result<()> {
            self.counters.deploys.fetch_add(1, Ordering::SeqCst);
            let result = match self.behavior {
                Behavior::Succeed => Ok(()),
                Behavior::Fail => Err(Error::Deployment("ingress rejected".into())),
                Behavior::Hang => {
                    cancel.cancelled().await;
                    // Winding down in-flight work.
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Err(Error::Cancelled)
                }
            };
            self.counters.deploys_settled.fetch_add(1, Ordering::SeqCst);
            result
        }

        async fn rollback(&self, _build: &Build) -> Result<()> {
            self.counters.rollbacks.fetch_add(1, Ordering::SeqCst);
            if Counters::get(&self.counters.deploys_settled) < Counters::get(&self.counters.deploys) {
                self.counters
                    .rollbacks_during_deploy
                    .fetch_add(1, Ordering::SeqCst);
            }
            if self.rollback_fails {
                return Err(Error::Deployment("no previous revision available for rollback".into()));
            }
            Ok(())
        }
    }

    struct MockValidator {
        reject_config: bool,
        max_artifact_size: u64,
    }

    impl Validator for MockValidator {
        fn validate_build_config(&self, _build: &Build) -> Result<()> {
            if self.reject_config {
                return Err(Error::InvalidInput("build command 'build' not found in package.json scripts".into()));
            }
            Ok(())
        }

        fn validate_artifact(&self, path: &Path) -> Result<()> {
            let size = std::fs::metadata(path).map_err(|e| Error::io("stat", e))?.len();
            if size > self.max_artifact_size {
                return Err(Error::ArtifactRejected("artifact size exceeds maximum allowed size".into()));
            }
            Ok(())
        }
    }

    struct Harness {
        root: TempDir,
        pipeline: Pipeline,
        counters: Arc<Counters>,
    }

    struct Setup {
        builder: Behavior,
        deployer: Behavior,
        rollback_fails: bool,
        reject_config: bool,
        artifact_size: usize,
        timeout: Duration,
        retained: usize,
    }

    impl Default for Setup {
        fn default() -> Self {
            Self {
                builder: Behavior::Succeed,
                deployer: Behavior::Succeed,
                rollback_fails: false,
                reject_config: false,
                artifact_size: 64,
                timeout: Duration::from_secs(30),
                retained: 100,
            }
        }
    }

    fn harness(setup: Setup) -> Harness {
        let root = TempDir::new().unwrap();
        let config = PipelineConfig {
            build_dir: root.path().join("builds"),
            artifacts_dir: root.path().join("artifacts"),
            cache_dir: root.path().join("cache"),
            default_timeout: setup.timeout,
            max_retained_builds: setup.retained,
            ..Default::default()
        };
        let counters = Arc::new(Counters::default());

        let pipeline = Pipeline::new(
            config,
            Arc::new(MockFactory {
                behavior: setup.builder,
                artifact_size: setup.artifact_size,
                counters: counters.clone(),
            }),
            Arc::new(MockDeployer {
                behavior: setup.deployer,
                rollback_fails: setup.rollback_fails,
                counters: counters.clone(),
            }),
            Arc::new(MockValidator {
                reject_config: setup.reject_config,
                max_artifact_size: 1024,
            }),
        );

        Harness {
            root,
            pipeline,
            counters,
        }
    }

    fn make_build(id: &str) -> Build {
        Build::new(id, "web", "react")
            .with_build_command("build")
            .with_output_dir("build")
            .with_source_dir("/src/web")
    }

    async fn wait_for(pipeline: &Pipeline, id: &str, done: impl Fn(&Build) -> bool) -> Build {
        let id = BuildId::from(id);
        for _ in 0..500 {
            let build = pipeline.get_build(&id).await.unwrap();
            if done(&build) {
                return build;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("build {} did not reach the expected state", id);
    }

    async fn wait_terminal(pipeline: &Pipeline, id: &str) -> Build {
        wait_for(pipeline, id, |b| b.status.is_terminal()).await
    }

    async fn wait_counter(counter: &AtomicUsize, at_least: usize) {
        for _ in 0..500 {
            if Counters::get(counter) >= at_least {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("counter never reached {}", at_least);
    }

    #[tokio::test]
    async fn test_successful_build_and_deploy() {
        let h = harness(Setup::default());
        h.pipeline.start_build(make_build("b1")).await.unwrap();

        let build = wait_terminal(&h.pipeline, "b1").await;
        assert_eq!(build.status, BuildStatus::Success);
        assert!(build.artifact_path.is_some());
        assert_eq!(build.image_id.as_deref(), Some("shipyard-web:b1"));
        assert!(build.start_time.is_some());
        assert!(build.complete_time.is_some());
        assert!(build.error_message.is_none());

        assert_eq!(Counters::get(&h.counters.deploys), 1);
        assert_eq!(Counters::get(&h.counters.rollbacks), 0);
        assert_eq!(Counters::get(&h.counters.builder_cleanups), 1);
        assert!(build.artifact_path.unwrap().exists());
        assert!(!h.root.path().join("builds/b1").exists());

        let metrics = loop {
            if let Some(m) = h.pipeline.get_metrics(&BuildId::from("b1")).await {
                if m.is_finished() {
                    break m;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        };
        assert_eq!(metrics.status, "success");
        assert!(metrics.build_duration.is_some());
        assert!(metrics.deploy_duration.is_some());
    }

    #[tokio::test]
    async fn test_config_rejection_never_registers() {
        let h = harness(Setup {
            reject_config: true,
            ..Default::default()
        });

        let err = h.pipeline.start_build(make_build("b1")).await.unwrap_err();
        assert!(err.is_caller_error());

        let err = h.pipeline.get_build(&BuildId::from("b1")).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
        assert_eq!(Counters::get(&h.counters.builds), 0);
    }

    #[tokio::test]
    async fn test_build_failure_skips_deploy() {
        let h = harness(Setup {
            builder: Behavior::Fail,
            ..Default::default()
        });
        h.pipeline.start_build(make_build("b1")).await.unwrap();

        let build = wait_terminal(&h.pipeline, "b1").await;
        assert_eq!(build.status, BuildStatus::Failed);
        assert_eq!(
            build.error_message.as_deref(),
            Some("build failed: execution failed: npm ERR! build script exited 1")
        );
        assert_eq!(Counters::get(&h.counters.deploys), 0);
        assert_eq!(Counters::get(&h.counters.builder_cleanups), 1);
    }

    #[tokio::test]
    async fn test_deploy_failure_rolls_back_once() {
        let h = harness(Setup {
            deployer: Behavior::Fail,
            ..Default::default()
        });
        h.pipeline.start_build(make_build("b1")).await.unwrap();

        let build = wait_terminal(&h.pipeline, "b1").await;
        assert_eq!(build.status, BuildStatus::Failed);
        assert_eq!(
            build.error_message.as_deref(),
            Some("deployment failed: deploy error: ingress rejected")
        );
        assert!(build.rollback_error.is_none());
        assert_eq!(Counters::get(&h.counters.deploys), 1);
        assert_eq!(Counters::get(&h.counters.rollbacks), 1);
        // Artifacts outlive a failed deploy.
        assert!(build.artifact_path.unwrap().exists());
    }

    #[tokio::test]
    async fn test_failed_rollback_is_kept_on_the_record() {
        let h = harness(Setup {
            deployer: Behavior::Fail,
            rollback_fails: true,
            ..Default::default()
        });
        h.pipeline.start_build(make_build("b1")).await.unwrap();

        let build = wait_terminal(&h.pipeline, "b1").await;
        assert_eq!(build.status, BuildStatus::Failed);
        assert_eq!(
            build.error_message.as_deref(),
            Some("deployment failed: deploy error: ingress rejected")
        );
        assert_eq!(
            build.rollback_error.as_deref(),
            Some("deploy error: no previous revision available for rollback")
        );
    }

    #[tokio::test]
    async fn test_oversized_artifact_never_deploys() {
        let h = harness(Setup {
            artifact_size: 4096,
            ..Default::default()
        });
        h.pipeline.start_build(make_build("b1")).await.unwrap();

        let build = wait_terminal(&h.pipeline, "b1").await;
        assert_eq!(build.status, BuildStatus::Failed);
        assert!(
            build
                .error_message
                .as_deref()
                .unwrap()
                .starts_with("artifact validation failed")
        );
        assert_eq!(Counters::get(&h.counters.deploys), 0);
    }

    #[tokio::test]
    async fn test_unsupported_framework_fails_build() {
        let h = harness(Setup::default());
        let mut build = make_build("b1");
        build.framework = "elm".into();
        h.pipeline.start_build(build).await.unwrap();

        let build = wait_terminal(&h.pipeline, "b1").await;
        assert_eq!(build.status, BuildStatus::Failed);
        assert_eq!(
            build.error_message.as_deref(),
            Some("builder creation failed: invalid input: unsupported framework: elm")
        );
        assert_eq!(Counters::get(&h.counters.builds), 0);
    }

    #[tokio::test]
    async fn test_cancel_during_build() {
        let h = harness(Setup {
            builder: Behavior::Hang,
            ..Default::default()
        });
        h.pipeline.start_build(make_build("b1")).await.unwrap();
        wait_counter(&h.counters.builds, 1).await;

        h.pipeline.cancel_build(&BuildId::from("b1")).await.unwrap();

        let build = h.pipeline.get_build(&BuildId::from("b1")).await.unwrap();
        assert_eq!(build.status, BuildStatus::Cancelled);
        assert!(build.complete_time.is_some());

        wait_counter(&h.counters.builder_cleanups, 1).await;
        let build = h.pipeline.get_build(&BuildId::from("b1")).await.unwrap();
        assert_eq!(build.status, BuildStatus::Cancelled);
        assert!(build.error_message.is_none());
        assert_eq!(Counters::get(&h.counters.deploys), 0);
    }

    #[tokio::test]
    async fn test_cancel_during_deploy_rolls_back() {
        let h = harness(Setup {
            deployer: Behavior::Hang,
            ..Default::default()
        });
        h.pipeline.start_build(make_build("b1")).await.unwrap();
        wait_counter(&h.counters.deploys, 1).await;

        h.pipeline.cancel_build(&BuildId::from("b1")).await.unwrap();
        wait_counter(&h.counters.rollbacks, 1).await;

        let build = h.pipeline.get_build(&BuildId::from("b1")).await.unwrap();
        assert_eq!(build.status, BuildStatus::Cancelled);
        assert_eq!(Counters::get(&h.counters.deploys_settled), 1);
        assert_eq!(Counters::get(&h.counters.rollbacks_during_deploy), 0);
    }

    #[tokio::test]
    async fn test_deploy_timeout_fails_after_rollback() {
        let h = harness(Setup {
            deployer: Behavior::Hang,
            rollback_fails: true,
            timeout: Duration::from_millis(100),
            ..Default::default()
        });
        h.pipeline.start_build(make_build("b1")).await.unwrap();

        let build = wait_terminal(&h.pipeline, "b1").await;
        assert_eq!(build.status, BuildStatus::Failed);
        assert!(
            build
                .error_message
                .as_deref()
                .unwrap()
                .starts_with("deployment failed: timeout:")
        );
        assert!(build.rollback_error.is_some());
        assert_eq!(Counters::get(&h.counters.rollbacks_during_deploy), 0);
    }

    #[tokio::test]
    async fn test_cancel_requires_building() {
        let h = harness(Setup::default());
        h.pipeline.start_build(make_build("b1")).await.unwrap();
        let done = wait_terminal(&h.pipeline, "b1").await;

        let err = h
            .pipeline
            .cancel_build(&BuildId::from("b1"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));
        assert_eq!(
            h.pipeline.get_build(&BuildId::from("b1")).await.unwrap(),
            done
        );
    }

    #[tokio::test]
    async fn test_unknown_build_is_not_found() {
        let h = harness(Setup::default());
        let id = BuildId::from("missing");

        assert!(matches!(
            h.pipeline.get_build(&id).await.unwrap_err(),
            Error::NotFound(_)
        ));
        assert!(matches!(
            h.pipeline.cancel_build(&id).await.unwrap_err(),
            Error::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn test_timeout_fails_build() {
        let h = harness(Setup {
            builder: Behavior::Hang,
            timeout: Duration::from_millis(50),
            ..Default::default()
        });
        h.pipeline.start_build(make_build("b1")).await.unwrap();

        let build = wait_terminal(&h.pipeline, "b1").await;
        assert_eq!(build.status, BuildStatus::Failed);
        assert!(build.error_message.unwrap().starts_with("timeout:"));
    }

    #[tokio::test]
    async fn test_duplicate_and_non_pending_submissions() {
        let h = harness(Setup {
            builder: Behavior::Hang,
            ..Default::default()
        });
        h.pipeline.start_build(make_build("b1")).await.unwrap();

        let err = h.pipeline.start_build(make_build("b1")).await.unwrap_err();
        assert!(err.is_caller_error());

        let mut stale = make_build("b2");
        stale.status = BuildStatus::Success;
        assert!(h.pipeline.start_build(stale).await.is_err());
    }

    #[tokio::test]
    async fn test_retention_cap() {
        let h = harness(Setup {
            retained: 2,
            ..Default::default()
        });

        for id in ["b1", "b2", "b3"] {
            h.pipeline.start_build(make_build(id)).await.unwrap();
            wait_terminal(&h.pipeline, id).await;
        }

        assert!(h.pipeline.get_build(&BuildId::from("b1")).await.is_err());
        assert!(h.pipeline.get_build(&BuildId::from("b3")).await.is_ok());
    }

    #[tokio::test]
    async fn test_concurrent_builds_are_independent() {
        let h = harness(Setup::default());
        let ids: Vec<String> = (0..8).map(|i| format!("b{}", i)).collect();

        for id in &ids {
            h.pipeline.start_build(make_build(id)).await.unwrap();
        }
        for id in &ids {
            let build = wait_terminal(&h.pipeline, id).await;
            assert_eq!(build.status, BuildStatus::Success);
        }
        assert_eq!(Counters::get(&h.counters.deploys), ids.len());
    }
}
