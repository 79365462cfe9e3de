//! Processing-cache dedupe semantics.

use std::sync::Arc;
use std::time::Duration;

use thornwall_store::{MemoryKv, ProcessingCache};

#[tokio::test]
async fn marked_subjects_are_filtered_within_ttl() {
    let cache = ProcessingCache::new(Arc::new(MemoryKv::new()), Duration::from_secs(60));

    cache.mark_processed(&[1, 2, 3]).await.unwrap();

    let unprocessed = cache.filter_unprocessed(&[1, 2, 3, 4, 5]).await.unwrap();
    assert_eq!(unprocessed, vec![4, 5]);
}

#[tokio::test]
async fn markers_expire_after_ttl() {
    let cache = ProcessingCache::new(Arc::new(MemoryKv::new()), Duration::from_millis(30));

    cache.mark_processed(&[10]).await.unwrap();
    assert!(cache.is_processed(10).await.unwrap());

    tokio::time::sleep(Duration::from_millis(60)).await;
    assert!(!cache.is_processed(10).await.unwrap());

    let unprocessed = cache.filter_unprocessed(&[10]).await.unwrap();
    assert_eq!(unprocessed, vec![10]);
}

#[tokio::test]
async fn filter_preserves_input_order() {
    let cache = ProcessingCache::new(Arc::new(MemoryKv::new()), Duration::from_secs(60));
    cache.mark_processed(&[20]).await.unwrap();

    let unprocessed = cache
        .filter_unprocessed(&[30, 20, 10, 40])
        .await
        .unwrap();
    assert_eq!(unprocessed, vec![30, 10, 40]);
}
