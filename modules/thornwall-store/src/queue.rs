//! Three-level priority queue over the shared KV store.
//!
//! Each priority is an ordered list of serialized items under
//! `queue:<priority>_priority`. A side index `queue:info:<subject_id>` tracks
//! status, priority and position so callers can report progress without
//! scanning; the index survives item removal.
//!
//! List entries are written as `<subject_id>:<json>` — the id rides outside
//! the payload so that a corrupt payload can still be tied back to its
//! side-index row when the entry is dropped.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::warn;

use thornwall_common::{Priority, QueueItem, QueueStatus, SubjectId};

use crate::error::{Result, StoreError};
use crate::kv::KvStore;

fn queue_key(priority: Priority) -> String {
    format!("queue:{}_priority", priority.as_str())
}

fn info_key(subject_id: SubjectId) -> String {
    format!("queue:info:{subject_id}")
}

fn encode_entry(item: &QueueItem) -> Result<String> {
    Ok(format!(
        "{}:{}",
        item.subject_id,
        serde_json::to_string(item)?
    ))
}

/// Split a raw list entry into its id tag and payload. The id survives even
/// when the payload no longer parses.
fn decode_entry(raw: &str) -> (Option<SubjectId>, Option<QueueItem>) {
    if let Some((prefix, payload)) = raw.split_once(':') {
        if let Ok(subject_id) = prefix.parse::<SubjectId>() {
            return (Some(subject_id), serde_json::from_str(payload).ok());
        }
    }
    (None, serde_json::from_str(raw).ok())
}

/// Side-index entry for a queued subject.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueInfo {
    pub status: QueueStatus,
    pub priority: Priority,
    pub position: usize,
}

pub struct PriorityQueue {
    kv: Arc<dyn KvStore>,
}

impl PriorityQueue {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    /// Add an item. Fails if the subject is already queued at any level and
    /// has not reached a terminal status. A non-terminal side-index row with
    /// no backing list entry is stale (a crash, or a dropped malformed
    /// entry), never a live item, and does not block the enqueue.
    pub async fn enqueue(&self, item: &QueueItem) -> Result<()> {
        if let Some(info) = self.info(item.subject_id).await? {
            if !info.status.is_terminal()
                && self.subject_in_list(info.priority, item.subject_id).await?
            {
                return Err(StoreError::AlreadyQueued(item.subject_id));
            }
        }

        let key = queue_key(item.priority);
        let position = self.kv.list_len(&key).await?;
        self.kv.list_push_back(&key, &encode_entry(item)?).await?;

        self.write_info(
            item.subject_id,
            QueueInfo {
                status: QueueStatus::Pending,
                priority: item.priority,
                position,
            },
        )
        .await
    }

    /// Read up to `batch_size` items, draining high before normal before low,
    /// FIFO within a level. Items stay queued until [`remove`](Self::remove).
    /// Malformed entries are logged, deleted, and their side-index rows
    /// closed so the subject can be queued again.
    pub async fn dequeue(&self, batch_size: usize) -> Result<Vec<QueueItem>> {
        let mut items = Vec::with_capacity(batch_size);

        for priority in Priority::ALL {
            if items.len() >= batch_size {
                break;
            }
            let key = queue_key(priority);
            let raw_entries = self.kv.list_front(&key, batch_size - items.len()).await?;

            for raw in raw_entries {
                let (subject_id, parsed) = decode_entry(&raw);
                match parsed {
                    Some(item) => items.push(item),
                    None => {
                        warn!(raw, subject_id = ?subject_id, "Dropping malformed queue item");
                        self.kv.list_remove(&key, &raw).await?;
                        if let Some(subject_id) = subject_id {
                            self.close_stale_info(subject_id).await?;
                        }
                    }
                }
            }
        }

        Ok(items)
    }

    /// Update a subject's status in the side index, enforcing the
    /// pending -> processing -> {complete, skipped} transition order.
    pub async fn set_status(&self, subject_id: SubjectId, status: QueueStatus) -> Result<()> {
        let mut info = self.info(subject_id).await?.ok_or(StoreError::NotFound)?;
        if !info.status.can_transition_to(status) {
            return Err(StoreError::InvalidTransition {
                from: info.status,
                to: status,
            });
        }
        info.status = status;
        self.write_info(subject_id, info).await
    }

    pub async fn set_position(&self, subject_id: SubjectId, position: usize) -> Result<()> {
        let mut info = self.info(subject_id).await?.ok_or(StoreError::NotFound)?;
        info.position = position;
        self.write_info(subject_id, info).await
    }

    pub async fn length(&self, priority: Priority) -> Result<usize> {
        self.kv.list_len(&queue_key(priority)).await
    }

    /// Remove a processed item from its level. The side index keeps the final
    /// status.
    pub async fn remove(&self, priority: Priority, item: &QueueItem) -> Result<()> {
        self.kv
            .list_remove(&queue_key(priority), &encode_entry(item)?)
            .await?;
        Ok(())
    }

    pub async fn info(&self, subject_id: SubjectId) -> Result<Option<QueueInfo>> {
        match self.kv.get(&info_key(subject_id)).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Whether a live list entry for this subject exists at the given level.
    async fn subject_in_list(&self, priority: Priority, subject_id: SubjectId) -> Result<bool> {
        let key = queue_key(priority);
        let len = self.kv.list_len(&key).await?;
        let prefix = format!("{subject_id}:");
        Ok(self
            .kv
            .list_front(&key, len)
            .await?
            .iter()
            .any(|entry| entry.starts_with(&prefix)))
    }

    /// Force a side-index row terminal after its list entry was dropped.
    /// Bypasses the transition guard: the item is gone, the index must not
    /// keep reporting it live.
    async fn close_stale_info(&self, subject_id: SubjectId) -> Result<()> {
        if let Some(mut info) = self.info(subject_id).await? {
            if !info.status.is_terminal() {
                info.status = QueueStatus::Complete;
                self.write_info(subject_id, info).await?;
            }
        }
        Ok(())
    }

    async fn write_info(&self, subject_id: SubjectId, info: QueueInfo) -> Result<()> {
        self.kv
            .set(&info_key(subject_id), &serde_json::to_string(&info)?, None)
            .await
    }
}
