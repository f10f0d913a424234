//! Build-and-deploy orchestration for Shipyard.
//!
//! The [`Pipeline`] validates a submitted build, registers it, and runs it in
//! the background: build context, builder, artifact validation, deployment
//! and rollback on deploy failure. Callers poll or cancel by build id.

pub mod cleanup;
pub mod metrics;
pub mod orchestrator;
pub mod registry;

pub use cleanup::CleanupManager;
pub use metrics::{BuildMetrics, MetricsCollector};
pub use orchestrator::Pipeline;
pub use registry::BuildRegistry;
