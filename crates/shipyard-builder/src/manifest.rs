//! The NodeJS project manifest (`package.json`).

use serde::Deserialize;
use shipyard_core::{Error, Result};
use std::collections::HashMap;
use std::path::Path;

pub const MANIFEST_FILE: &str = "package.json";

/// The subset of `package.json` the pipeline inspects.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PackageJson {
    pub name: Option<String>,
    pub version: Option<String>,
    pub dependencies: HashMap<String, String>,
    pub scripts: HashMap<String, String>,
    pub engines: HashMap<String, String>,
}

impl PackageJson {
    /// Read the manifest from a project directory.
    ///
    /// A missing or malformed manifest is a caller error; any other read
    /// failure is an IO error.
    pub fn read(project_dir: &Path) -> Result<Self> {
        let path = project_dir.join(MANIFEST_FILE);
        let data = match std::fs::read_to_string(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::InvalidInput(format!(
                    "package.json not found in {}",
                    project_dir.display()
                )));
            }
            Err(e) => return Err(Error::io(format!("failed to read {}", path.display()), e)),
        };

        Self::parse(&data)
    }

    pub fn parse(data: &str) -> Result<Self> {
        serde_json::from_str(data)
            .map_err(|e| Error::InvalidInput(format!("invalid package.json: {}", e)))
    }

    /// The declared `engines.node` constraint, if any.
    pub fn node_engine(&self) -> Option<&str> {
        self.engines
            .get("node")
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    pub fn has_script(&self, name: &str) -> bool {
        self.scripts.contains_key(name)
    }
}
