//! Build identifiers.

use derive_more::Display;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Caller-supplied identifier of a build.
///
/// Callers normally pick the id themselves; [`BuildId::generate`] exists for
/// callers that have no natural identifier and uses UUIDv7 so generated ids
/// sort by submission time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display)]
#[serde(transparent)]
#[display("{_0}")]
pub struct BuildId(String);

impl BuildId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh, time-ordered id.
    pub fn generate() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<String> for BuildId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for BuildId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<BuildId> for String {
    fn from(id: BuildId) -> Self {
        id.0
    }
}

impl AsRef<str> for BuildId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::borrow::Borrow<str> for BuildId {
    fn borrow(&self) -> &str {
        &self.0
    }
}
