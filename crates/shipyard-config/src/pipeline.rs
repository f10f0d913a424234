//! Pipeline configuration types and KDL parsing.

use crate::{ConfigError, ConfigResult};
use kdl::{KdlDocument, KdlNode};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

const MIB: u64 = 1024 * 1024;

/// Settings for the orchestrator and the directories it manages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Root of per-build working directories.
    pub build_dir: PathBuf,
    /// Root of archived artifacts. Artifacts outlive their build directory.
    pub artifacts_dir: PathBuf,
    /// Root of per-build dependency caches.
    pub cache_dir: PathBuf,
    /// Upper bound on a whole build, from build start to deploy end.
    pub default_timeout: Duration,
    /// Largest artifact the validator accepts.
    pub max_artifact_size: u64,
    /// Number of finished builds kept for status polling.
    pub max_retained_builds: usize,
    pub nodejs: NodeJsConfig,
    pub deploy: DeployConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            build_dir: PathBuf::from("/var/lib/shipyard/builds"),
            artifacts_dir: PathBuf::from("/var/lib/shipyard/artifacts"),
            cache_dir: PathBuf::from("/var/lib/shipyard/cache"),
            default_timeout: Duration::from_secs(1800),
            max_artifact_size: 100 * MIB,
            max_retained_builds: 1000,
            nodejs: NodeJsConfig::default(),
            deploy: DeployConfig::default(),
        }
    }
}

/// Settings for the NodeJS framework family (react, vue, svelte, angular).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeJsConfig {
    /// Runtime version used for the build image tag.
    pub default_version: String,
    /// `engines.node` values a project manifest may declare.
    pub allowed_engines: Vec<String>,
    pub max_build_time: Duration,
    pub build_cache: bool,
    pub env_vars: HashMap<String, String>,
    /// Runtime image repository; the tag is `<default_version>-alpine`.
    pub build_image: String,
    /// Image that serves the built output.
    pub serve_image: String,
    pub registry: Option<String>,
}

impl Default for NodeJsConfig {
    fn default() -> Self {
        Self {
            default_version: "20".to_string(),
            allowed_engines: vec!["18".to_string(), "20".to_string(), "22".to_string()],
            max_build_time: Duration::from_secs(900),
            build_cache: true,
            env_vars: HashMap::new(),
            build_image: "node".to_string(),
            serve_image: "nginx:alpine".to_string(),
            registry: None,
        }
    }
}

/// Settings for the deployment target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeployConfig {
    /// `static` or `kubernetes`.
    pub platform: String,
    pub namespace: String,
    pub ingress_domain: String,
    pub registry: Option<String>,
    pub pull_secret: Option<String>,
    pub replica_count: u32,
    /// Static root; the static deployer falls back to `/var/www/html`.
    pub static_path: Option<PathBuf>,
    /// Static size limit; the static deployer falls back to 100 MiB.
    pub max_deploy_size: Option<u64>,
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            platform: "static".to_string(),
            namespace: "default".to_string(),
            ingress_domain: String::new(),
            registry: None,
            pull_secret: None,
            replica_count: 1,
            static_path: None,
            max_deploy_size: None,
        }
    }
}

/// Read and parse a pipeline configuration file.
pub fn load_pipeline_config(path: impl AsRef<Path>) -> ConfigResult<PipelineConfig> {
    let content = std::fs::read_to_string(path)?;
    parse_pipeline_config(&content)
}

/// Parse a pipeline configuration from KDL text.
///
/// Settings may sit inside a `pipeline { }` block or at the top level.
/// Missing keys keep their defaults; unknown keys are ignored.
pub fn parse_pipeline_config(kdl: &str) -> ConfigResult<PipelineConfig> {
    let doc: KdlDocument = kdl.parse()?;

    let root = doc
        .nodes()
        .iter()
        .find(|n| n.name().value() == "pipeline")
        .and_then(|n| n.children())
        .unwrap_or(&doc);

    let mut config = PipelineConfig::default();

    for node in root.nodes() {
        match node.name().value() {
            "build-dir" => config.build_dir = required_path(node)?,
            "artifacts-dir" => config.artifacts_dir = required_path(node)?,
            "cache-dir" => config.cache_dir = required_path(node)?,
            "default-timeout" => config.default_timeout = required_secs(node)?,
            "max-artifact-size" => config.max_artifact_size = required_u64(node)?,
            "max-retained-builds" => {
                config.max_retained_builds = usize::try_from(required_u64(node)?)
                    .map_err(|e| invalid(node, e.to_string()))?;
            }
            "nodejs" => {
                if let Some(children) = node.children() {
                    config.nodejs = parse_nodejs(children)?;
                }
            }
            "deploy" => {
                if let Some(children) = node.children() {
                    config.deploy = parse_deploy(children)?;
                }
            }
            _ => {} // Ignore unknown nodes
        }
    }

    Ok(config)
}

fn parse_nodejs(doc: &KdlDocument) -> ConfigResult<NodeJsConfig> {
    let mut config = NodeJsConfig::default();

    for node in doc.nodes() {
        match node.name().value() {
            "default-version" => config.default_version = required_string(node)?,
            "allowed-engines" => config.allowed_engines = get_all_string_args(node),
            "max-build-time" => config.max_build_time = required_secs(node)?,
            "build-cache" => config.build_cache = required_bool(node)?,
            "build-image" => config.build_image = required_string(node)?,
            "serve-image" => config.serve_image = required_string(node)?,
            "registry" => config.registry = Some(required_string(node)?),
            "env" => config.env_vars = parse_env(node),
            _ => {}
        }
    }

    if config.default_version.is_empty() {
        return Err(ConfigError::MissingField("nodejs default-version".to_string()));
    }

    Ok(config)
}

fn parse_deploy(doc: &KdlDocument) -> ConfigResult<DeployConfig> {
    let mut config = DeployConfig::default();

    for node in doc.nodes() {
        match node.name().value() {
            "platform" => config.platform = required_string(node)?,
            "namespace" => config.namespace = required_string(node)?,
            "ingress-domain" => config.ingress_domain = required_string(node)?,
            "registry" => config.registry = Some(required_string(node)?),
            "pull-secret" => config.pull_secret = Some(required_string(node)?),
            "replica-count" => {
                config.replica_count = u32::try_from(required_u64(node)?)
                    .map_err(|e| invalid(node, e.to_string()))?;
            }
            "static-path" => config.static_path = Some(required_path(node)?),
            "max-deploy-size" => config.max_deploy_size = Some(required_u64(node)?),
            _ => {}
        }
    }

    match config.platform.as_str() {
        "static" | "kubernetes" => Ok(config),
        other => Err(ConfigError::InvalidValue {
            field: "deploy platform".to_string(),
            message: format!("unknown platform: {}", other),
        }),
    }
}

fn parse_env(node: &KdlNode) -> HashMap<String, String> {
    let mut env = HashMap::new();
    if let Some(children) = node.children() {
        for child in children.nodes() {
            let key = child.name().value().to_string();
            if let Some(val) = get_first_string_arg(child) {
                env.insert(key, val);
            }
        }
    }
    env
}

// Helper functions for extracting values from KDL nodes

fn invalid(node: &KdlNode, message: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        field: node.name().value().to_string(),
        message: message.into(),
    }
}

fn first_arg(node: &KdlNode) -> ConfigResult<&kdl::KdlValue> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .map(|e| e.value())
        .ok_or_else(|| ConfigError::MissingField(node.name().value().to_string()))
}

fn required_string(node: &KdlNode) -> ConfigResult<String> {
    first_arg(node)?
        .as_string()
        .map(|s| s.to_string())
        .ok_or_else(|| invalid(node, "expected a string"))
}

fn required_path(node: &KdlNode) -> ConfigResult<PathBuf> {
    required_string(node).map(PathBuf::from)
}

fn required_u64(node: &KdlNode) -> ConfigResult<u64> {
    let value = first_arg(node)?
        .as_integer()
        .ok_or_else(|| invalid(node, "expected an integer"))?;
    u64::try_from(value).map_err(|_| invalid(node, "expected a non-negative integer"))
}

fn required_secs(node: &KdlNode) -> ConfigResult<Duration> {
    required_u64(node).map(Duration::from_secs)
}

fn required_bool(node: &KdlNode) -> ConfigResult<bool> {
    first_arg(node)?
        .as_bool()
        .ok_or_else(|| invalid(node, "expected a boolean"))
}

fn get_first_string_arg(node: &KdlNode) -> Option<String> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_string())
        .map(|s| s.to_string())
}

fn get_all_string_args(node: &KdlNode) -> Vec<String> {
    node.entries()
        .iter()
        .filter(|e| e.name().is_none())
        .filter_map(|e| e.value().as_string())
        .map(|s| s.to_string())
        .collect()
}
