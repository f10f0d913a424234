//! Framework builders for Shipyard.
//!
//! Provides:
//! - The container engine boundary and its Docker implementation
//! - The NodeJS-family builder (react, vue, svelte, angular)
//! - The framework-keyed builder factory
//! - Per-build filesystem contexts
//! - The NodeJS manifest and artifact validator

pub mod archive;
pub mod context;
pub mod docker;
pub mod engine;
pub mod factory;
pub mod manifest;
pub mod nodejs;
pub mod recipe;
pub mod source;
pub mod validator;

pub use context::BuildContext;
pub use docker::DockerEngine;
pub use engine::{BuildProgress, ContainerEngine};
pub use factory::FrameworkBuilderFactory;
pub use nodejs::NodeJsBuilder;
pub use validator::NodeJsValidator;

pub use shipyard_core::builder::{Builder, BuilderFactory, BuilderOptions};
