//! User-checker orchestration against fakes.

mod support;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio_util::sync::CancellationToken;

use thornwall_common::{
    GroupMembershipRecord, Reason, SubjectStatus, User, UserReasonType,
};
use thornwall_store::{MemoryKv, ProcessingCache};
use thornwall_workers::analyzer::{Analyzer, SharedReasons};
use thornwall_workers::checker::{CheckOptions, UserChecker};

use support::FakeStore;

/// Test analyzer that flags fixed subjects with a fixed reason.
struct ScriptedAnalyzer {
    kind: UserReasonType,
    flags: Vec<(u64, f64)>,
    fail: bool,
}

#[async_trait]
impl Analyzer for ScriptedAnalyzer {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn analyze(
        &self,
        _ctx: &CancellationToken,
        _subjects: &[User],
        reasons: &SharedReasons,
    ) -> anyhow::Result<()> {
        if self.fail {
            anyhow::bail!("induced analyzer failure");
        }
        for (id, confidence) in &self.flags {
            reasons.add(*id, self.kind, Reason::new("scripted reason", *confidence));
        }
        Ok(())
    }
}

fn subject(id: u64) -> User {
    User::new(id, format!("user_{id}"), "", "", Utc::now())
}

fn checker(store: Arc<FakeStore>, analyzers: Vec<Arc<dyn Analyzer>>) -> UserChecker {
    let cache = Arc::new(ProcessingCache::new(
        Arc::new(MemoryKv::new()),
        std::time::Duration::from_secs(6 * 60 * 60),
    ));
    UserChecker::new(store, cache, analyzers)
}

#[tokio::test]
async fn flagged_subjects_are_persisted_with_aggregated_confidence() {
    let store = Arc::new(FakeStore::new());
    let checker = checker(
        store.clone(),
        vec![
            Arc::new(ScriptedAnalyzer {
                kind: UserReasonType::Profile,
                flags: vec![(1, 0.42)],
                fail: false,
            }),
            Arc::new(ScriptedAnalyzer {
                kind: UserReasonType::Group,
                flags: vec![(1, 0.3), (2, 0.5)],
                fail: false,
            }),
        ],
    );

    let outcome = checker
        .process_users(
            &CancellationToken::new(),
            vec![subject(1), subject(2), subject(3)],
            CheckOptions::default(),
        )
        .await
        .unwrap();

    assert_eq!(outcome.total, 3);
    assert_eq!(outcome.flagged, 2);
    let mut newly = outcome.newly_flagged.clone();
    newly.sort_unstable();
    assert_eq!(newly, vec![1, 2]);

    let saved = store.saved_user(1).unwrap();
    assert_eq!(saved.status, SubjectStatus::Flagged);
    // 0.42 + 0.3 aggregated and rounded.
    assert_eq!(saved.confidence, 0.72);
    assert_eq!(saved.reasons.len(), 2);

    // Unflagged subject 3 was not persisted.
    assert!(store.saved_user(3).is_none());
}

#[tokio::test]
async fn analyzer_failure_does_not_abort_the_batch() {
    let store = Arc::new(FakeStore::new());
    let checker = checker(
        store.clone(),
        vec![
            Arc::new(ScriptedAnalyzer {
                kind: UserReasonType::Profile,
                flags: Vec::new(),
                fail: true,
            }),
            Arc::new(ScriptedAnalyzer {
                kind: UserReasonType::Friend,
                flags: vec![(5, 0.8)],
                fail: false,
            }),
        ],
    );

    let outcome = checker
        .process_users(
            &CancellationToken::new(),
            vec![subject(5)],
            CheckOptions::default(),
        )
        .await
        .unwrap();

    assert_eq!(outcome.flagged, 1);
    assert!(store.saved_user(5).is_some());
}

#[tokio::test]
async fn existing_reason_types_survive_and_same_types_overwrite() {
    let store = Arc::new(FakeStore::new());

    // Already flagged with an outfit reason from an earlier pass.
    let mut existing = subject(7);
    existing.status = SubjectStatus::Flagged;
    existing.reasons.add(
        UserReasonType::Outfit,
        Reason::new("User has inappropriate outfits.", 0.6),
    );
    store.insert_user(existing.clone());

    let checker = checker(
        store.clone(),
        vec![Arc::new(ScriptedAnalyzer {
            kind: UserReasonType::Profile,
            flags: vec![(7, 0.4)],
            fail: false,
        })],
    );

    // The batch subject carries the store snapshot (reasons included).
    checker
        .process_users(
            &CancellationToken::new(),
            vec![existing],
            CheckOptions::default(),
        )
        .await
        .unwrap();

    let saved = store.saved_user(7).unwrap();
    assert!(saved.reasons.contains(UserReasonType::Outfit));
    assert!(saved.reasons.contains(UserReasonType::Profile));
    assert_eq!(saved.confidence, 1.0);
}

#[tokio::test]
async fn group_memberships_of_flagged_users_feed_tracking() {
    let store = Arc::new(FakeStore::new());
    let checker = checker(
        store.clone(),
        vec![Arc::new(ScriptedAnalyzer {
            kind: UserReasonType::Profile,
            flags: vec![(9, 0.9)],
            fail: false,
        })],
    );

    let mut user = subject(9);
    user.groups = vec![
        GroupMembershipRecord {
            group_id: 501,
            group_name: "group a".into(),
            role: "Member".into(),
            member_count: 100,
        },
        GroupMembershipRecord {
            group_id: 502,
            group_name: "group b".into(),
            role: "Member".into(),
            member_count: 50,
        },
    ];

    checker
        .process_users(&CancellationToken::new(), vec![user], CheckOptions::default())
        .await
        .unwrap();

    let flags = store.group_flags.lock().unwrap();
    assert_eq!(flags[&501], vec![9]);
    assert_eq!(flags[&502], vec![9]);
}

#[tokio::test]
async fn newly_flagged_subjects_get_an_activity_entry() {
    let store = Arc::new(FakeStore::new());
    let checker = checker(
        store.clone(),
        vec![Arc::new(ScriptedAnalyzer {
            kind: UserReasonType::Friend,
            flags: vec![(11, 0.7)],
            fail: false,
        })],
    );

    checker
        .process_users(
            &CancellationToken::new(),
            vec![subject(11)],
            CheckOptions::default(),
        )
        .await
        .unwrap();

    assert_eq!(
        store.activity_types(),
        vec![thornwall_common::ActivityType::UserFlagged]
    );
}
