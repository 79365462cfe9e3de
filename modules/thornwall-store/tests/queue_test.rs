//! Priority queue behavior over the in-memory KV.

use std::sync::Arc;

use chrono::Utc;

use thornwall_common::{Priority, QueueItem, QueueStatus};
use thornwall_store::{MemoryKv, PriorityQueue, StoreError};

fn item(subject_id: u64, priority: Priority) -> QueueItem {
    QueueItem {
        subject_id,
        priority,
        reason: "reported by reviewer".to_string(),
        added_by: 1,
        added_at: Utc::now(),
        status: QueueStatus::Pending,
    }
}

fn queue() -> PriorityQueue {
    PriorityQueue::new(Arc::new(MemoryKv::new()))
}

#[tokio::test]
async fn dequeue_drains_high_then_normal_then_low() {
    let queue = queue();

    // 2 high, 3 normal, 1 low; batch of 5 must leave the low item queued.
    for (id, priority) in [
        (10, Priority::Normal),
        (11, Priority::High),
        (12, Priority::Low),
        (13, Priority::Normal),
        (14, Priority::High),
        (15, Priority::Normal),
    ] {
        queue.enqueue(&item(id, priority)).await.unwrap();
    }

    let batch = queue.dequeue(5).await.unwrap();
    let ids: Vec<u64> = batch.iter().map(|i| i.subject_id).collect();
    assert_eq!(ids, vec![11, 14, 10, 13, 15]);

    assert_eq!(queue.length(Priority::Low).await.unwrap(), 1);
}

#[tokio::test]
async fn fifo_within_a_priority() {
    let queue = queue();
    for id in [1, 2, 3] {
        queue.enqueue(&item(id, Priority::Normal)).await.unwrap();
    }

    let batch = queue.dequeue(10).await.unwrap();
    let ids: Vec<u64> = batch.iter().map(|i| i.subject_id).collect();
    assert_eq!(ids, vec![1, 2, 3]);
}

#[tokio::test]
async fn duplicate_enqueue_is_rejected_across_levels() {
    let queue = queue();
    queue.enqueue(&item(42, Priority::Low)).await.unwrap();

    let err = queue.enqueue(&item(42, Priority::High)).await.unwrap_err();
    assert!(matches!(err, StoreError::AlreadyQueued(42)));
}

#[tokio::test]
async fn terminal_status_allows_requeue() {
    let queue = queue();
    let first = item(7, Priority::Normal);
    queue.enqueue(&first).await.unwrap();

    queue.set_status(7, QueueStatus::Processing).await.unwrap();
    queue.set_status(7, QueueStatus::Complete).await.unwrap();
    queue.remove(Priority::Normal, &first).await.unwrap();

    queue.enqueue(&item(7, Priority::High)).await.unwrap();
}

#[tokio::test]
async fn status_transitions_are_monotonic() {
    let queue = queue();
    queue.enqueue(&item(5, Priority::High)).await.unwrap();

    queue.set_status(5, QueueStatus::Processing).await.unwrap();
    queue.set_status(5, QueueStatus::Complete).await.unwrap();

    // Terminal states never go backwards.
    let err = queue
        .set_status(5, QueueStatus::Processing)
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::InvalidTransition { .. }));

    let info = queue.info(5).await.unwrap().unwrap();
    assert_eq!(info.status, QueueStatus::Complete);
}

#[tokio::test]
async fn pending_cannot_jump_to_complete() {
    let queue = queue();
    queue.enqueue(&item(6, Priority::High)).await.unwrap();

    let err = queue.set_status(6, QueueStatus::Complete).await.unwrap_err();
    assert!(matches!(err, StoreError::InvalidTransition { .. }));
}

#[tokio::test]
async fn info_survives_item_removal() {
    let queue = queue();
    let queued = item(9, Priority::Normal);
    queue.enqueue(&queued).await.unwrap();

    queue.set_status(9, QueueStatus::Processing).await.unwrap();
    queue.set_status(9, QueueStatus::Complete).await.unwrap();
    queue.remove(Priority::Normal, &queued).await.unwrap();

    assert_eq!(queue.length(Priority::Normal).await.unwrap(), 0);
    let info = queue.info(9).await.unwrap().unwrap();
    assert_eq!(info.status, QueueStatus::Complete);
    assert_eq!(info.priority, Priority::Normal);
}

#[tokio::test]
async fn malformed_items_are_dropped_not_blocking() {
    let kv = Arc::new(MemoryKv::new());
    let queue = PriorityQueue::new(kv.clone());

    queue.enqueue(&item(1, Priority::High)).await.unwrap();

    // Inject garbage directly into the high-priority list.
    use thornwall_store::KvStore;
    kv.list_push_back("queue:high_priority", "{not json")
        .await
        .unwrap();
    queue.enqueue(&item(2, Priority::High)).await.unwrap();

    let batch = queue.dequeue(10).await.unwrap();
    let ids: Vec<u64> = batch.iter().map(|i| i.subject_id).collect();
    assert_eq!(ids, vec![1, 2]);

    // The garbage entry was deleted from the list.
    assert_eq!(queue.length(Priority::High).await.unwrap(), 2);
}

#[tokio::test]
async fn malformed_tagged_entry_closes_its_side_index() {
    use thornwall_store::{KvStore, QueueInfo};

    let kv = Arc::new(MemoryKv::new());
    let queue = PriorityQueue::new(kv.clone());

    // A side-index row exists, but the list entry's payload is corrupt.
    let info = QueueInfo {
        status: QueueStatus::Pending,
        priority: Priority::High,
        position: 0,
    };
    kv.set("queue:info:7", &serde_json::to_string(&info).unwrap(), None)
        .await
        .unwrap();
    kv.list_push_back("queue:high_priority", "7:corrupt payload")
        .await
        .unwrap();

    assert!(queue.dequeue(10).await.unwrap().is_empty());
    assert_eq!(queue.length(Priority::High).await.unwrap(), 0);

    // The orphaned side-index row was closed, not left pending forever.
    let info = queue.info(7).await.unwrap().unwrap();
    assert_eq!(info.status, QueueStatus::Complete);

    // The subject can be queued again.
    queue.enqueue(&item(7, Priority::Normal)).await.unwrap();
}

#[tokio::test]
async fn stale_side_index_without_entry_does_not_block_enqueue() {
    use thornwall_store::KvStore;

    let kv = Arc::new(MemoryKv::new());
    let queue = PriorityQueue::new(kv.clone());

    queue.enqueue(&item(8, Priority::High)).await.unwrap();

    // Simulate a crash that lost the list but kept the pending index row.
    kv.delete("queue:high_priority").await.unwrap();

    queue.enqueue(&item(8, Priority::High)).await.unwrap();
    assert_eq!(queue.length(Priority::High).await.unwrap(), 1);

    let info = queue.info(8).await.unwrap().unwrap();
    assert_eq!(info.status, QueueStatus::Pending);
}

#[tokio::test]
async fn dequeue_reads_without_removing() {
    let queue = queue();
    queue.enqueue(&item(3, Priority::Normal)).await.unwrap();

    assert_eq!(queue.dequeue(5).await.unwrap().len(), 1);
    // Read-then-remove-after-success: still present until removed.
    assert_eq!(queue.dequeue(5).await.unwrap().len(), 1);
}
