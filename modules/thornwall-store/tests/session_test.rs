//! Session persistence and numeric-precision round trips.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use thornwall_store::{KvStore, MemoryKv, Session, SessionKey};

const TTL: Duration = Duration::from_secs(1800);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct ReviewTarget {
    id: u64,
    name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct ReviewState {
    target: ReviewTarget,
    history: Vec<u64>,
}

static TARGET_KEY: SessionKey<ReviewTarget> = SessionKey::persistent("review_target");
static STATE_KEY: SessionKey<ReviewState> = SessionKey::persistent("review_state");
static DRAFT_KEY: SessionKey<String> = SessionKey::ephemeral("draft_note");
static IMAGE_KEY: SessionKey<Vec<u8>> = SessionKey::persistent("generated_image");

#[tokio::test]
async fn full_u64_ids_survive_touch_and_reload() {
    let kv: Arc<MemoryKv> = Arc::new(MemoryKv::new());

    let session = Session::load(kv.clone(), 100, TTL).await.unwrap();
    let target = ReviewTarget {
        id: 18_446_744_073_709_551_610,
        name: "subject".to_string(),
    };
    session.set(&TARGET_KEY, &target).unwrap();
    session.touch().await.unwrap();

    // A fresh session object reads the persisted blob back.
    let reloaded = Session::load(kv, 100, TTL).await.unwrap();
    let decoded = reloaded.get(&TARGET_KEY).unwrap().unwrap();
    assert_eq!(decoded.id, 18_446_744_073_709_551_610);
    assert_eq!(decoded, target);
}

#[tokio::test]
async fn nested_ids_survive_at_depth() {
    let kv: Arc<MemoryKv> = Arc::new(MemoryKv::new());

    let session = Session::load(kv.clone(), 7, TTL).await.unwrap();
    let state = ReviewState {
        target: ReviewTarget {
            id: u64::MAX,
            name: "deep".to_string(),
        },
        history: vec![1, 9_007_199_254_740_993, u64::MAX - 3],
    };
    session.set(&STATE_KEY, &state).unwrap();
    session.touch().await.unwrap();

    let reloaded = Session::load(kv, 7, TTL).await.unwrap();
    assert_eq!(reloaded.get(&STATE_KEY).unwrap().unwrap(), state);
}

#[tokio::test]
async fn ephemeral_keys_are_dropped_on_serialization() {
    let kv: Arc<MemoryKv> = Arc::new(MemoryKv::new());

    let session = Session::load(kv.clone(), 3, TTL).await.unwrap();
    session
        .set(&DRAFT_KEY, &"work in progress".to_string())
        .unwrap();
    session
        .set(
            &TARGET_KEY,
            &ReviewTarget {
                id: 5,
                name: "kept".to_string(),
            },
        )
        .unwrap();
    session.touch().await.unwrap();

    // Still readable in-process.
    assert_eq!(
        session.get(&DRAFT_KEY).unwrap().as_deref(),
        Some("work in progress")
    );

    // Gone after reload: it was never written.
    let reloaded = Session::load(kv, 3, TTL).await.unwrap();
    assert_eq!(reloaded.get(&DRAFT_KEY).unwrap(), None);
    assert!(reloaded.get(&TARGET_KEY).unwrap().is_some());
}

#[tokio::test]
async fn buffers_round_trip_as_base64() {
    let kv: Arc<MemoryKv> = Arc::new(MemoryKv::new());

    let session = Session::load(kv.clone(), 4, TTL).await.unwrap();
    let payload = vec![0u8, 1, 2, 250, 255];
    session.set_buffer(&IMAGE_KEY, &payload);
    session.touch().await.unwrap();

    let reloaded = Session::load(kv, 4, TTL).await.unwrap();
    assert_eq!(reloaded.get_buffer(&IMAGE_KEY), Some(payload));
}

#[tokio::test]
async fn touch_refreshes_ttl_and_expiry_destroys_state() {
    let kv: Arc<MemoryKv> = Arc::new(MemoryKv::new());

    let session = Session::load(kv.clone(), 9, Duration::from_millis(30))
        .await
        .unwrap();
    session
        .set(
            &TARGET_KEY,
            &ReviewTarget {
                id: 1,
                name: "short lived".to_string(),
            },
        )
        .unwrap();
    session.touch().await.unwrap();
    assert!(kv.get("session:9").await.unwrap().is_some());

    tokio::time::sleep(Duration::from_millis(60)).await;
    assert!(kv.get("session:9").await.unwrap().is_none());

    let reloaded = Session::load(kv, 9, Duration::from_millis(30)).await.unwrap();
    assert_eq!(reloaded.get(&TARGET_KEY).unwrap(), None);
}

#[tokio::test]
async fn delete_removes_key() {
    let kv: Arc<MemoryKv> = Arc::new(MemoryKv::new());
    let session = Session::load(kv, 2, TTL).await.unwrap();

    session
        .set(
            &TARGET_KEY,
            &ReviewTarget {
                id: 8,
                name: "temp".to_string(),
            },
        )
        .unwrap();
    session.delete(&TARGET_KEY);
    assert_eq!(session.get(&TARGET_KEY).unwrap(), None);
}
