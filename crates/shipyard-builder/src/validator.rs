//! Static checks for NodeJS-family builds and their artifacts.

use shipyard_config::NodeJsConfig;
use shipyard_core::{Build, Error, Result, Validator};
use std::path::Path;

use crate::manifest::PackageJson;

/// Validator for the NodeJS family (react, vue, svelte, angular).
#[derive(Debug, Clone)]
pub struct NodeJsValidator {
    config: NodeJsConfig,
    max_artifact_size: u64,
}

impl NodeJsValidator {
    pub fn new(config: NodeJsConfig, max_artifact_size: u64) -> Self {
        Self {
            config,
            max_artifact_size,
        }
    }

    fn check_node_engine(&self, pkg: &PackageJson) -> Result<()> {
        let Some(engine) = pkg.node_engine() else {
            return Ok(());
        };

        // Exact match against the allow-list; ranges are not interpreted.
        if self.config.allowed_engines.iter().any(|a| a == engine) {
            Ok(())
        } else {
            Err(Error::InvalidInput(format!(
                "unsupported node version: {} (allowed: {})",
                engine,
                self.config.allowed_engines.join(", ")
            )))
        }
    }
}

impl Validator for NodeJsValidator {
    fn validate_build_config(&self, build: &Build) -> Result<()> {
        let source_dir = build
            .source_dir()
            .ok_or_else(|| Error::InvalidInput("builder config is missing sourceDir".into()))?;

        let pkg = PackageJson::read(&source_dir)?;
        self.check_node_engine(&pkg)?;

        if build.build_command.is_empty() {
            return Err(Error::InvalidInput("build command is required".into()));
        }
        if !pkg.has_script(&build.build_command) {
            return Err(Error::InvalidInput(format!(
                "build command '{}' not found in package.json scripts",
                build.build_command
            )));
        }

        Ok(())
    }

    fn validate_artifact(&self, path: &Path) -> Result<()> {
        let metadata = match std::fs::metadata(path) {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::ArtifactRejected(format!(
                    "artifact not found: {}",
                    path.display()
                )));
            }
            Err(e) => {
                return Err(Error::io(
                    format!("failed to stat artifact {}", path.display()),
                    e,
                ));
            }
        };

        if !metadata.is_file() {
            return Err(Error::ArtifactRejected(format!(
                "artifact is not a file: {}",
                path.display()
            )));
        }

        if metadata.len() > self.max_artifact_size {
            return Err(Error::ArtifactRejected(format!(
                "artifact size {} exceeds maximum allowed size {}",
                metadata.len(),
                self.max_artifact_size
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_project(dir: &Path, manifest: &str) {
        std::fs::write(dir.join("package.json"), manifest).unwrap();
    }

    fn make_build(dir: &Path) -> Build {
        Build::new("b1", "web", "react")
            .with_build_command("build")
            .with_output_dir("build")
            .with_source_dir(dir)
    }

    fn validator() -> NodeJsValidator {
        NodeJsValidator::new(NodeJsConfig::default(), 1024)
    }

    #[test]
    fn test_valid_project_passes() {
        let dir = TempDir::new().unwrap();
        write_project(
            dir.path(),
            r#"{"scripts": {"build": "react-scripts build"}, "engines": {"node": "20"}}"#,
        );

        validator()
            .validate_build_config(&make_build(dir.path()))
            .unwrap();
    }

    #[test]
    fn test_disallowed_engine_rejected() {
        let dir = TempDir::new().unwrap();
        write_project(
            dir.path(),
            r#"{"scripts": {"build": "vite build"}, "engines": {"node": "14"}}"#,
        );

        let err = validator()
            .validate_build_config(&make_build(dir.path()))
            .unwrap_err();
        assert!(err.is_caller_error());
        assert!(err.to_string().contains("unsupported node version: 14"));
    }

    #[test]
    fn test_missing_script_rejected() {
        let dir = TempDir::new().unwrap();
        write_project(dir.path(), r#"{"scripts": {"start": "vite"}}"#);

        let err = validator()
            .validate_build_config(&make_build(dir.path()))
            .unwrap_err();
        assert!(err.to_string().contains("'build' not found"));
    }

    #[test]
    fn test_missing_manifest_and_source_dir_are_caller_errors() {
        let dir = TempDir::new().unwrap();
        let err = validator()
            .validate_build_config(&make_build(dir.path()))
            .unwrap_err();
        assert!(err.is_caller_error());

        let no_source = Build::new("b2", "web", "react").with_build_command("build");
        let err = validator().validate_build_config(&no_source).unwrap_err();
        assert!(err.to_string().contains("sourceDir"));
    }

    #[test]
    fn test_artifact_size_limit() {
        let dir = TempDir::new().unwrap();
        let small = dir.path().join("small.tar.gz");
        let large = dir.path().join("large.tar.gz");
        std::fs::write(&small, vec![0u8; 512]).unwrap();
        std::fs::write(&large, vec![0u8; 2048]).unwrap();

        let v = validator();
        v.validate_artifact(&small).unwrap();

        let err = v.validate_artifact(&large).unwrap_err();
        assert!(matches!(err, Error::ArtifactRejected(_)));
        assert!(err.to_string().contains("exceeds maximum"));
    }

    #[test]
    fn test_missing_artifact_rejected() {
        let dir = TempDir::new().unwrap();
        let err = validator()
            .validate_artifact(&dir.path().join("missing.tar.gz"))
            .unwrap_err();
        assert!(matches!(err, Error::ArtifactRejected(_)));
    }
}
