//! In-memory build registry.
//!
//! Every read and write of a registered build goes through one lock, so the
//! executing task and a concurrent cancel never race on a build's fields.

use shipyard_core::{Build, BuildId, BuildStatus, Error, Result};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::debug;

struct Entry {
    build: Build,
    cancel: CancellationToken,
}

/// Builds keyed by id, each with the cancellation trigger of its execution.
pub struct BuildRegistry {
    entries: RwLock<HashMap<BuildId, Entry>>,
    max_retained: usize,
}

impl BuildRegistry {
    /// `max_retained` caps the number of terminal builds kept.
    pub fn new(max_retained: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            max_retained,
        }
    }

    pub async fn register(&self, build: Build, cancel: CancellationToken) -> Result<()> {
        let mut entries = self.entries.write().await;
        if entries.contains_key(&build.id) {
            return Err(Error::InvalidInput(format!(
                "build already exists: {}",
                build.id
            )));
        }
        entries.insert(build.id.clone(), Entry { build, cancel });
        Ok(())
    }

    /// Snapshot of the build as currently recorded.
    pub async fn get(&self, id: &BuildId) -> Result<Build> {
        self.entries
            .read()
            .await
            .get(id)
            .map(|e| e.build.clone())
            .ok_or_else(|| not_found(id))
    }

    /// Apply `f` to the build under the write lock, regardless of status.
    pub async fn modify<R>(&self, id: &BuildId, f: impl FnOnce(&mut Build) -> R) -> Result<R> {
        let mut entries = self.entries.write().await;
        let entry = entries.get_mut(id).ok_or_else(|| not_found(id))?;
        Ok(f(&mut entry.build))
    }

    /// Apply a status change unless the build already reached a terminal state.
    ///
    /// Returns `false` when the build was already terminal and nothing changed.
    pub async fn advance(
        &self,
        id: &BuildId,
        f: impl FnOnce(&mut Build) -> Result<()>,
    ) -> Result<bool> {
        let mut entries = self.entries.write().await;
        let entry = entries.get_mut(id).ok_or_else(|| not_found(id))?;
        if entry.build.status.is_terminal() {
            return Ok(false);
        }

        f(&mut entry.build)?;
        if entry.build.status.is_terminal() {
            self.evict(&mut entries);
        }
        Ok(true)
    }

    /// Cancel a build in `building`, firing its cancellation token.
    pub async fn cancel(&self, id: &BuildId) -> Result<()> {
        let mut entries = self.entries.write().await;
        let entry = entries.get_mut(id).ok_or_else(|| not_found(id))?;

        if entry.build.status != BuildStatus::Building {
            return Err(Error::InvalidState(format!(
                "cannot cancel build {} with status: {}",
                id, entry.build.status
            )));
        }

        entry.build.transition(BuildStatus::Cancelled)?;
        entry.cancel.cancel();
        self.evict(&mut entries);
        Ok(())
    }

    /// Drop the oldest terminal builds beyond the retention cap.
    fn evict(&self, entries: &mut HashMap<BuildId, Entry>) {
        let mut terminal: Vec<_> = entries
            .values()
            .filter(|e| e.build.status.is_terminal())
            .map(|e| (e.build.complete_time, e.build.id.clone()))
            .collect();

        if terminal.len() <= self.max_retained {
            return;
        }

        terminal.sort();
        let excess = terminal.len() - self.max_retained;
        for (_, id) in terminal.into_iter().take(excess) {
            debug!(build_id = %id, "Evicting retained build");
            entries.remove(&id);
        }
    }
}

fn not_found(id: &BuildId) -> Error {
    Error::NotFound(format!("build not found: {}", id))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn building(id: &str) -> Build {
        let mut build = Build::new(id, "web", "react");
        build.transition(BuildStatus::Building).unwrap();
        build
    }

    #[tokio::test]
    async fn test_register_rejects_duplicates() {
        let registry = BuildRegistry::new(10);
        registry
            .register(Build::new("b1", "web", "react"), CancellationToken::new())
            .await
            .unwrap();

        let err = registry
            .register(Build::new("b1", "web", "react"), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.is_caller_error());
    }

    #[tokio::test]
    async fn test_cancel_fires_token_and_is_final() {
        let registry = BuildRegistry::new(10);
        let token = CancellationToken::new();
        registry.register(building("b1"), token.clone()).await.unwrap();

        registry.cancel(&BuildId::from("b1")).await.unwrap();
        assert!(token.is_cancelled());

        let changed = registry
            .advance(&BuildId::from("b1"), |b| b.transition(BuildStatus::Success))
            .await
            .unwrap();
        assert!(!changed);

        let build = registry.get(&BuildId::from("b1")).await.unwrap();
        assert_eq!(build.status, BuildStatus::Cancelled);
        assert!(build.complete_time.is_some());
    }

    #[tokio::test]
    async fn test_cancel_requires_building() {
        let registry = BuildRegistry::new(10);
        registry
            .register(Build::new("b1", "web", "react"), CancellationToken::new())
            .await
            .unwrap();

        let err = registry.cancel(&BuildId::from("b1")).await.unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));
        assert_eq!(
            registry.get(&BuildId::from("b1")).await.unwrap().status,
            BuildStatus::Pending
        );

        let err = registry.cancel(&BuildId::from("nope")).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn test_retention_evicts_oldest_terminal_only() {
        let registry = BuildRegistry::new(2);
        registry
            .register(building("running"), CancellationToken::new())
            .await
            .unwrap();

        for id in ["b1", "b2", "b3"] {
            registry
                .register(building(id), CancellationToken::new())
                .await
                .unwrap();
            registry
                .advance(&BuildId::from(id), |b| b.transition(BuildStatus::Success))
                .await
                .unwrap();
            tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        }

        assert_eq!(registry.entries.read().await.len(), 3);
        assert!(registry.get(&BuildId::from("b1")).await.is_err());
        assert!(registry.get(&BuildId::from("b3")).await.is_ok());
        assert!(registry.get(&BuildId::from("running")).await.is_ok());
    }
}
