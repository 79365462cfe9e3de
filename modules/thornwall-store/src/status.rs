//! Worker heartbeat publishing.
//!
//! Every worker publishes `{worker_id, kind, message, progress, healthy,
//! heartbeat}` under `worker:status:<kind>:<worker_id>` once per second.
//! The key carries a 30 second TTL so dashboards see crashed workers drop
//! off on their own.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::Result;
use crate::kv::KvStore;

const STATUS_TTL: Duration = Duration::from_secs(30);
const PUBLISH_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerStatus {
    pub worker_id: String,
    pub kind: String,
    pub message: String,
    pub progress: u8,
    pub healthy: bool,
    pub heartbeat: DateTime<Utc>,
}

struct ReporterInner {
    kv: Arc<dyn KvStore>,
    kind: String,
    worker_id: String,
    message: Mutex<String>,
    progress: AtomicU8,
    healthy: AtomicBool,
    stopper: CancellationToken,
}

#[derive(Clone)]
pub struct StatusReporter {
    inner: Arc<ReporterInner>,
}

impl StatusReporter {
    pub fn new(kv: Arc<dyn KvStore>, kind: &str, instance: usize) -> Self {
        Self {
            inner: Arc::new(ReporterInner {
                kv,
                kind: kind.to_string(),
                worker_id: format!("{kind}_worker_{instance}"),
                message: Mutex::new(String::from("Starting")),
                progress: AtomicU8::new(0),
                healthy: AtomicBool::new(true),
                stopper: CancellationToken::new(),
            }),
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.inner.worker_id
    }

    /// Start the once-per-second publish loop. Runs until [`stop`](Self::stop)
    /// or the supplied token cancels.
    pub fn start(&self, ctx: &CancellationToken) {
        let reporter = self.clone();
        let ctx = ctx.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = ctx.cancelled() => break,
                    _ = reporter.inner.stopper.cancelled() => break,
                    _ = tokio::time::sleep(PUBLISH_INTERVAL) => {
                        if let Err(e) = reporter.publish().await {
                            warn!(worker_id = %reporter.inner.worker_id, error = %e, "Failed to publish status");
                        }
                    }
                }
            }
        });
    }

    pub fn stop(&self) {
        self.inner.stopper.cancel();
    }

    /// Update the visible step message and progress, publishing immediately.
    pub async fn update_status(&self, message: impl Into<String>, progress: u8) {
        {
            let mut current = self.inner.message.lock().expect("status lock poisoned");
            *current = message.into();
        }
        self.inner.progress.store(progress.min(100), Ordering::Relaxed);
        if let Err(e) = self.publish().await {
            warn!(worker_id = %self.inner.worker_id, error = %e, "Failed to publish status");
        }
    }

    /// Unhealthy latches until the next `set_healthy(true)` at the top of the
    /// worker loop.
    pub fn set_healthy(&self, healthy: bool) {
        self.inner.healthy.store(healthy, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> WorkerStatus {
        WorkerStatus {
            worker_id: self.inner.worker_id.clone(),
            kind: self.inner.kind.clone(),
            message: self
                .inner
                .message
                .lock()
                .expect("status lock poisoned")
                .clone(),
            progress: self.inner.progress.load(Ordering::Relaxed),
            healthy: self.inner.healthy.load(Ordering::Relaxed),
            heartbeat: Utc::now(),
        }
    }

    async fn publish(&self) -> Result<()> {
        let status = self.snapshot();
        let key = format!("worker:status:{}:{}", status.kind, status.worker_id);
        self.inner
            .kv
            .set(&key, &serde_json::to_string(&status)?, Some(STATUS_TTL))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryKv;

    #[tokio::test]
    async fn publishes_under_kind_and_id_key() {
        let kv = Arc::new(MemoryKv::new());
        let reporter = StatusReporter::new(kv.clone(), "friend", 0);
        reporter.update_status("Processing friends batch", 20).await;

        let raw = kv
            .get("worker:status:friend:friend_worker_0")
            .await
            .unwrap()
            .unwrap();
        let status: WorkerStatus = serde_json::from_str(&raw).unwrap();
        assert_eq!(status.worker_id, "friend_worker_0");
        assert_eq!(status.progress, 20);
        assert!(status.healthy);
    }

    #[tokio::test]
    async fn unhealthy_latches_until_reset() {
        let kv = Arc::new(MemoryKv::new());
        let reporter = StatusReporter::new(kv, "queue", 1);

        reporter.set_healthy(false);
        assert!(!reporter.snapshot().healthy);

        reporter.update_status("still broken", 50).await;
        assert!(!reporter.snapshot().healthy);

        reporter.set_healthy(true);
        assert!(reporter.snapshot().healthy);
    }
}
