//! Error types for Shipyard.
//!
//! Variants follow the failure taxonomy of the pipeline: caller errors
//! (`InvalidInput`, `NotFound`, `InvalidState`) are never worth retrying,
//! operational errors (`Unavailable`, `Io`, `Timeout`) may succeed when the
//! caller resubmits, and content errors (`ExecutionFailed`,
//! `ArtifactRejected`) carry the diagnostic text produced by the build.

use thiserror::Error;

use crate::build::BuildStep;

#[derive(Debug, Error)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("unavailable: {0}")]
    Unavailable(String),

    #[error("execution failed: {0}")]
    ExecutionFailed(String),

    #[error("artifact rejected: {0}")]
    ArtifactRejected(String),

    #[error("deploy error: {0}")]
    Deployment(String),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("cancelled")]
    Cancelled,

    #[error("internal error: {0}")]
    Internal(String),

    /// A pipeline step failed; `source` is the underlying cause.
    #[error("{step} failed: {source}")]
    Step {
        step: BuildStep,
        #[source]
        source: Box<Error>,
    },

    /// Deployment failed after a successful build. The deploy error is the
    /// reported cause; the rollback outcome rides along for diagnostics.
    #[error("{cause}")]
    DeployFailed {
        #[source]
        cause: Box<Error>,
        rollback: RollbackOutcome,
    },
}

/// What happened when a failed deployment was rolled back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RollbackOutcome {
    Completed,
    Failed(String),
}

impl Error {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Wrap this error with the pipeline step it came from.
    pub fn in_step(self, step: BuildStep) -> Self {
        Self::Step {
            step,
            source: Box::new(self),
        }
    }

    /// True when the failure was caused by the request itself.
    pub fn is_caller_error(&self) -> bool {
        match self {
            Self::NotFound(_) | Self::InvalidInput(_) | Self::InvalidState(_) => true,
            Self::Step { source, .. } => source.is_caller_error(),
            Self::DeployFailed { cause, .. } => cause.is_caller_error(),
            _ => false,
        }
    }

    /// True when resubmitting the same build may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Unavailable(_) | Self::Io { .. } | Self::Timeout(_) => true,
            Self::Step { source, .. } => source.is_retryable(),
            Self::DeployFailed { cause, .. } => cause.is_retryable(),
            _ => false,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        match self {
            Self::Cancelled => true,
            Self::Step { source, .. } => source.is_cancelled(),
            Self::DeployFailed { cause, .. } => cause.is_cancelled(),
            _ => false,
        }
    }

    /// The rollback outcome, if this error came from a failed deployment.
    pub fn rollback_outcome(&self) -> Option<&RollbackOutcome> {
        match self {
            Self::DeployFailed { rollback, .. } => Some(rollback),
            Self::Step { source, .. } => source.rollback_outcome(),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
