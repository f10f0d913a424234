//! Per-build timing and counters.

use chrono::{DateTime, Utc};
use serde::Serialize;
use shipyard_core::{BuildId, BuildStatus};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;

pub const RUNNING: &str = "running";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BuildMetrics {
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration: Option<Duration>,
    pub build_duration: Option<Duration>,
    pub deploy_duration: Option<Duration>,
    pub status: String,
    pub error_count: u32,
    pub warning_count: u32,
}

impl BuildMetrics {
    fn started() -> Self {
        Self {
            start_time: Utc::now(),
            end_time: None,
            duration: None,
            build_duration: None,
            deploy_duration: None,
            status: RUNNING.to_string(),
            error_count: 0,
            warning_count: 0,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.end_time.is_some()
    }
}

/// Collects [`BuildMetrics`] in memory, keeping at most `max_retained` finished records.
pub struct MetricsCollector {
    metrics: RwLock<HashMap<BuildId, BuildMetrics>>,
    max_retained: usize,
}

impl MetricsCollector {
    pub fn new(max_retained: usize) -> Self {
        Self {
            metrics: RwLock::new(HashMap::new()),
            max_retained,
        }
    }

    pub async fn start_build(&self, id: &BuildId) {
        self.metrics
            .write()
            .await
            .insert(id.clone(), BuildMetrics::started());
    }

    pub async fn end_build(&self, id: &BuildId, status: BuildStatus) {
        let mut metrics = self.metrics.write().await;
        if let Some(m) = metrics.get_mut(id) {
            let now = Utc::now();
            m.end_time = Some(now);
            m.duration = (now - m.start_time).to_std().ok();
            m.status = status.to_string();
        }
        self.evict(&mut metrics);
    }

    pub async fn record_build_duration(&self, id: &BuildId, duration: Duration) {
        self.update(id, |m| m.build_duration = Some(duration)).await;
    }

    pub async fn record_deploy_duration(&self, id: &BuildId, duration: Duration) {
        self.update(id, |m| m.deploy_duration = Some(duration)).await;
    }

    pub async fn record_error(&self, id: &BuildId) {
        self.update(id, |m| m.error_count += 1).await;
    }

    pub async fn record_warning(&self, id: &BuildId) {
        self.update(id, |m| m.warning_count += 1).await;
    }

    pub async fn get(&self, id: &BuildId) -> Option<BuildMetrics> {
        self.metrics.read().await.get(id).cloned()
    }

    async fn update(&self, id: &BuildId, f: impl FnOnce(&mut BuildMetrics)) {
        if let Some(m) = self.metrics.write().await.get_mut(id) {
            f(m);
        }
    }

    fn evict(&self, metrics: &mut HashMap<BuildId, BuildMetrics>) {
        let mut finished: Vec<_> = metrics
            .iter()
            .filter_map(|(id, m)| m.end_time.map(|end| (end, id.clone())))
            .collect();
        if finished.len() <= self.max_retained {
            return;
        }

        finished.sort();
        let excess = finished.len() - self.max_retained;
        for (_, id) in finished.into_iter().take(excess) {
            metrics.remove(&id);
        }
    }
}
