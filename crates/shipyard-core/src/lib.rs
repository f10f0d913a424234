//! Core domain types and traits for the Shipyard build-and-deploy pipeline.
//!
//! This crate contains:
//! - Build identifiers and the build record with its lifecycle state machine
//! - The error taxonomy shared by every pipeline component
//! - Builder, deployer and validator capability traits

pub mod build;
pub mod builder;
pub mod deployer;
pub mod error;
pub mod id;
pub mod validator;

pub use build::{Build, BuildResult, BuildStatus, BuildStep, SOURCE_DIR_KEY};
pub use builder::{Builder, BuilderFactory, BuilderOptions};
pub use deployer::Deployer;
pub use error::{Error, Result, RollbackOutcome};
pub use id::BuildId;
pub use validator::Validator;
