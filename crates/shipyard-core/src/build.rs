//! The build record and its lifecycle.

use chrono::{DateTime, Utc};
use derive_more::Display;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

use crate::{BuildId, Error, Result, RollbackOutcome};

/// Key in `builder_config` naming the project source tree.
pub const SOURCE_DIR_KEY: &str = "sourceDir";

/// Lifecycle status of a build.
///
/// Transitions only move forward: `Pending -> Building -> {Success, Failed, Cancelled}`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
pub enum BuildStatus {
    #[default]
    #[display("pending")]
    Pending,
    #[display("building")]
    Building,
    #[display("success")]
    Success,
    #[display("failed")]
    Failed,
    #[display("cancelled")]
    Cancelled,
}

impl BuildStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BuildStatus::Success | BuildStatus::Failed | BuildStatus::Cancelled
        )
    }

    pub fn can_transition_to(&self, next: BuildStatus) -> bool {
        matches!(
            (self, next),
            (BuildStatus::Pending, BuildStatus::Building)
                | (
                    BuildStatus::Building,
                    BuildStatus::Success | BuildStatus::Failed | BuildStatus::Cancelled
                )
        )
    }
}

/// A pipeline step, used to contextualize failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
pub enum BuildStep {
    #[display("build context setup")]
    Setup,
    #[display("builder creation")]
    CreateBuilder,
    #[display("build")]
    Build,
    #[display("artifact validation")]
    ValidateArtifact,
    #[display("deployment")]
    Deploy,
}

/// One request to produce a deployable artifact from a source tree and publish it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Build {
    pub id: BuildId,
    pub project_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_hash: Option<String>,
    /// Selects the builder, e.g. `react` or `vue`.
    pub framework: String,
    /// Name of the manifest script that produces the output directory.
    pub build_command: String,
    pub output_dir: String,
    /// Framework-specific settings; must carry `sourceDir`.
    #[serde(default)]
    pub builder_config: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub status: BuildStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Set when a failed deployment could not be rolled back.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rollback_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub complete_time: Option<DateTime<Utc>>,
}

impl Build {
    pub fn new(
        id: impl Into<BuildId>,
        project_id: impl Into<String>,
        framework: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            project_id: project_id.into(),
            commit_hash: None,
            framework: framework.into(),
            build_command: String::new(),
            output_dir: String::new(),
            builder_config: HashMap::new(),
            status: BuildStatus::Pending,
            error_message: None,
            rollback_error: None,
            artifact_path: None,
            image_id: None,
            start_time: None,
            complete_time: None,
        }
    }

    pub fn with_commit_hash(mut self, commit_hash: impl Into<String>) -> Self {
        self.commit_hash = Some(commit_hash.into());
        self
    }

    pub fn with_build_command(mut self, command: impl Into<String>) -> Self {
        self.build_command = command.into();
        self
    }

    pub fn with_output_dir(mut self, output_dir: impl Into<String>) -> Self {
        self.output_dir = output_dir.into();
        self
    }

    pub fn with_source_dir(self, source_dir: impl Into<PathBuf>) -> Self {
        let source_dir = source_dir.into();
        self.with_config(
            SOURCE_DIR_KEY,
            serde_json::Value::String(source_dir.to_string_lossy().into_owned()),
        )
    }

    pub fn with_config(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.builder_config.insert(key.into(), value);
        self
    }

    /// The source tree named by `builder_config.sourceDir`, if present and non-empty.
    pub fn source_dir(&self) -> Option<PathBuf> {
        self.builder_config
            .get(SOURCE_DIR_KEY)
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .map(PathBuf::from)
    }

    /// Commit hash when set and non-empty.
    pub fn commit(&self) -> Option<&str> {
        self.commit_hash.as_deref().filter(|c| !c.is_empty())
    }

    /// Move to `next`, stamping timestamps. Terminal states are final.
    pub fn transition(&mut self, next: BuildStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(Error::InvalidState(format!(
                "build {} cannot move from {} to {}",
                self.id, self.status, next
            )));
        }

        let now = Utc::now();
        if next == BuildStatus::Building {
            self.start_time.get_or_insert(now);
        }
        if next.is_terminal() {
            self.complete_time = Some(now);
        }
        self.status = next;
        Ok(())
    }

    /// Transition to `failed`, recording the error text and any rollback failure.
    pub fn fail(&mut self, error: &Error) -> Result<()> {
        self.transition(BuildStatus::Failed)?;
        self.error_message = Some(error.to_string());
        self.record_rollback(error);
        Ok(())
    }

    /// Keep the rollback failure carried by `error`, if any.
    pub fn record_rollback(&mut self, error: &Error) {
        if let Some(RollbackOutcome::Failed(reason)) = error.rollback_outcome() {
            self.rollback_error = Some(reason.clone());
        }
    }
}

/// Output of a builder invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildResult {
    pub success: bool,
    pub artifact_path: PathBuf,
    pub image_id: String,
}
