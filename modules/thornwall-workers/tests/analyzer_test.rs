//! Analyzer scenarios against in-memory fakes.

mod support;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use thornwall_common::{
    OutfitRecord, Reason, SubjectStatus, User, UserReasonType,
};
use thornwall_store::CondoPlayer;
use thornwall_workers::analyzer::{
    Analyzer, CondoAnalyzer, OutfitAnalyzer, OutfitConfig, SharedReasons,
};

use support::{FakeBackend, FakeImageSource, FakeStore, FakeThumbnailSource};

fn subject(id: u64, name: &str) -> User {
    User::new(id, name, name, "", Utc::now())
}

fn outfit_analyzer(backend: Arc<FakeBackend>, urls: HashMap<u64, String>) -> OutfitAnalyzer {
    OutfitAnalyzer::new(
        backend,
        Arc::new(FakeThumbnailSource { urls }),
        Arc::new(FakeImageSource),
        OutfitConfig {
            max_outfits: 100,
            sub_batch: 10,
        },
    )
}

#[tokio::test]
async fn blocked_outfit_analysis_becomes_max_confidence_evidence() {
    let backend = Arc::new(FakeBackend::new());
    backend
        .outfit_violations
        .lock()
        .unwrap()
        .push_back(Err(ai_client::AiError::ContentBlocked));

    let mut user = subject(1, "blocked_user");
    user.status = SubjectStatus::Flagged;
    user.outfits = vec![
        OutfitRecord { outfit_id: 11, name: "Outfit A".into() },
        OutfitRecord { outfit_id: 12, name: "Outfit B".into() },
        OutfitRecord { outfit_id: 13, name: "Outfit C".into() },
    ];

    let urls = HashMap::from([
        (11, "https://cdn.example/a.webp".to_string()),
        (12, "https://cdn.example/b.webp".to_string()),
        (13, "https://cdn.example/c.webp".to_string()),
    ]);

    let analyzer = outfit_analyzer(backend, urls);
    let reasons = SharedReasons::new();
    analyzer
        .analyze(&CancellationToken::new(), &[user], &reasons)
        .await
        .unwrap();

    let map = reasons.snapshot();
    let reason = map[&1].get(UserReasonType::Outfit).unwrap();
    assert_eq!(reason.confidence, 1.0);
    assert_eq!(
        reason.evidence,
        vec!["Unknown Outfits: Content was blocked by AI safety filters. (1.00)".to_string()]
    );
}

#[tokio::test]
async fn outfit_names_from_model_must_match_submitted_names() {
    let backend = Arc::new(FakeBackend::new());
    backend.outfit_violations.lock().unwrap().push_back(Ok(
        thornwall_workers::analyzer::OutfitAnalysis {
            username: "subject".into(),
            evidence: vec![
                thornwall_workers::analyzer::OutfitViolation {
                    outfit_name: "Outfit A".into(),
                    violation: "Revealing clothing".into(),
                    confidence: 0.7,
                },
                thornwall_workers::analyzer::OutfitViolation {
                    outfit_name: "Invented Outfit".into(),
                    violation: "Hallucinated".into(),
                    confidence: 0.9,
                },
            ],
            confidence: 0.9,
        },
    ));

    let mut user = subject(2, "subject");
    user.status = SubjectStatus::Flagged;
    user.outfits = vec![OutfitRecord { outfit_id: 21, name: "Outfit A".into() }];

    let urls = HashMap::from([(21, "https://cdn.example/a.webp".to_string())]);
    let analyzer = outfit_analyzer(backend, urls);
    let reasons = SharedReasons::new();
    analyzer
        .analyze(&CancellationToken::new(), &[user], &reasons)
        .await
        .unwrap();

    let map = reasons.snapshot();
    let reason = map[&2].get(UserReasonType::Outfit).unwrap();
    // Only the genuine name survives; the invented one is dropped, so the
    // surviving confidence is 0.7.
    assert_eq!(reason.confidence, 0.7);
    assert_eq!(reason.evidence.len(), 1);
    assert!(reason.evidence[0].starts_with("Outfit A:"));
}

#[tokio::test]
async fn invalid_overall_confidence_drops_the_whole_response() {
    let backend = Arc::new(FakeBackend::new());
    // One high-confidence item, but the response-level confidence is out of
    // range: the entire response is discarded.
    backend.outfit_violations.lock().unwrap().push_back(Ok(
        thornwall_workers::analyzer::OutfitAnalysis {
            username: "gated".into(),
            evidence: vec![thornwall_workers::analyzer::OutfitViolation {
                outfit_name: "Outfit A".into(),
                violation: "Severe violation".into(),
                confidence: 0.95,
            }],
            confidence: 0.0,
        },
    ));

    let mut user = subject(4, "gated");
    user.status = SubjectStatus::Flagged;
    user.outfits = vec![OutfitRecord { outfit_id: 41, name: "Outfit A".into() }];

    let urls = HashMap::from([(41, "https://cdn.example/a.webp".to_string())]);
    let analyzer = outfit_analyzer(backend, urls);
    let reasons = SharedReasons::new();
    analyzer
        .analyze(&CancellationToken::new(), &[user], &reasons)
        .await
        .unwrap();

    assert!(reasons.is_empty());
}

#[tokio::test]
async fn valid_overall_confidence_keeps_low_confidence_items() {
    let backend = Arc::new(FakeBackend::new());
    // The response passes the overall gate; items inside it are accepted
    // without a second confidence filter.
    backend.outfit_violations.lock().unwrap().push_back(Ok(
        thornwall_workers::analyzer::OutfitAnalysis {
            username: "kept".into(),
            evidence: vec![thornwall_workers::analyzer::OutfitViolation {
                outfit_name: "Outfit A".into(),
                violation: "Borderline clothing".into(),
                confidence: 0.05,
            }],
            confidence: 0.6,
        },
    ));

    let mut user = subject(5, "kept");
    user.status = SubjectStatus::Flagged;
    user.outfits = vec![OutfitRecord { outfit_id: 51, name: "Outfit A".into() }];

    let urls = HashMap::from([(51, "https://cdn.example/a.webp".to_string())]);
    let analyzer = outfit_analyzer(backend, urls);
    let reasons = SharedReasons::new();
    analyzer
        .analyze(&CancellationToken::new(), &[user], &reasons)
        .await
        .unwrap();

    let map = reasons.snapshot();
    let reason = map[&5].get(UserReasonType::Outfit).unwrap();
    assert_eq!(reason.confidence, 0.05);
    assert_eq!(reason.evidence, vec!["Outfit A: Borderline clothing (0.05)".to_string()]);
}

#[tokio::test]
async fn unflagged_user_themes_flag_only_at_half_confidence() {
    let backend = Arc::new(FakeBackend::new());
    backend.outfit_themes.lock().unwrap().push_back(Ok(
        thornwall_workers::analyzer::OutfitThemeAnalysis {
            username: "mild".into(),
            themes: vec![thornwall_workers::analyzer::OutfitTheme {
                outfit_name: "Outfit A".into(),
                theme: "Subtle theme".into(),
                confidence: 0.3,
            }],
        },
    ));

    let mut user = subject(3, "mild");
    user.outfits = vec![OutfitRecord { outfit_id: 31, name: "Outfit A".into() }];

    let urls = HashMap::from([(31, "https://cdn.example/a.webp".to_string())]);
    let analyzer = outfit_analyzer(backend, urls);
    let reasons = SharedReasons::new();
    analyzer
        .analyze(&CancellationToken::new(), &[user], &reasons)
        .await
        .unwrap();

    assert!(reasons.is_empty());
}

#[tokio::test]
async fn condo_thumbnail_binds_and_flags_at_full_confidence() {
    let store = Arc::new(FakeStore::new());
    store.insert_condo_player(CondoPlayer {
        thumbnail_url: "https://cdn.example/t1.webp".into(),
        user_id: None,
        is_blacklisted: false,
    });

    let mut user = subject(10, "first_sighting");
    user.thumbnail_url = "https://cdn.example/t1.webp".into();

    let analyzer = CondoAnalyzer::new(store.clone());
    let reasons = SharedReasons::new();
    analyzer
        .analyze(&CancellationToken::new(), &[user], &reasons)
        .await
        .unwrap();

    let map = reasons.snapshot();
    assert_eq!(map[&10].get(UserReasonType::Condo).unwrap().confidence, 1.0);

    let players = store.condo_players.lock().unwrap();
    assert_eq!(players["https://cdn.example/t1.webp"].user_id, Some(10));
}

#[tokio::test]
async fn condo_rebind_blacklists_and_deletes_condo_only_user() {
    let store = Arc::new(FakeStore::new());
    store.insert_condo_player(CondoPlayer {
        thumbnail_url: "https://cdn.example/shared.webp".into(),
        user_id: Some(100),
        is_blacklisted: false,
    });

    // The previously bound subject was flagged for the condo match alone.
    let mut bound = subject(100, "previously_bound");
    bound.status = SubjectStatus::Flagged;
    bound
        .reasons
        .add(UserReasonType::Condo, Reason::new("User found in condo games.", 1.0));
    store.insert_user(bound);

    let mut newcomer = subject(200, "newcomer");
    newcomer.thumbnail_url = "https://cdn.example/shared.webp".into();

    let analyzer = CondoAnalyzer::new(store.clone());
    let reasons = SharedReasons::new();
    analyzer
        .analyze(&CancellationToken::new(), &[newcomer], &reasons)
        .await
        .unwrap();

    // The newcomer is not condo-flagged.
    assert!(reasons.is_empty());

    // The thumbnail is blacklisted and the condo-only user is gone.
    let players = store.condo_players.lock().unwrap();
    assert!(players["https://cdn.example/shared.webp"].is_blacklisted);
    drop(players);
    assert_eq!(*store.deleted_users.lock().unwrap(), vec![100]);

    let activities = store.activity_types();
    assert!(activities.contains(&thornwall_common::ActivityType::CondoBlacklisted));
    assert!(activities.contains(&thornwall_common::ActivityType::UserDeleted));
}

#[tokio::test]
async fn condo_rebind_preserves_users_with_other_reasons() {
    let store = Arc::new(FakeStore::new());
    store.insert_condo_player(CondoPlayer {
        thumbnail_url: "https://cdn.example/shared2.webp".into(),
        user_id: Some(101),
        is_blacklisted: false,
    });

    let mut bound = subject(101, "multi_reason");
    bound.status = SubjectStatus::Flagged;
    bound
        .reasons
        .add(UserReasonType::Condo, Reason::new("User found in condo games.", 1.0));
    bound.reasons.add(
        UserReasonType::Profile,
        Reason::new("User profile contains inappropriate content.", 0.8),
    );
    store.insert_user(bound);

    let mut newcomer = subject(201, "newcomer2");
    newcomer.thumbnail_url = "https://cdn.example/shared2.webp".into();

    let analyzer = CondoAnalyzer::new(store.clone());
    let reasons = SharedReasons::new();
    analyzer
        .analyze(&CancellationToken::new(), &[newcomer], &reasons)
        .await
        .unwrap();

    // Blacklisted, but the multi-reason user survives.
    assert!(store.deleted_users.lock().unwrap().is_empty());
    assert!(store.saved_user(101).is_some());
}

#[tokio::test]
async fn blacklisted_thumbnails_never_flag() {
    let store = Arc::new(FakeStore::new());
    store.insert_condo_player(CondoPlayer {
        thumbnail_url: "https://cdn.example/black.webp".into(),
        user_id: None,
        is_blacklisted: true,
    });

    let mut user = subject(300, "shared_avatar");
    user.thumbnail_url = "https://cdn.example/black.webp".into();

    let analyzer = CondoAnalyzer::new(store);
    let reasons = SharedReasons::new();
    analyzer
        .analyze(&CancellationToken::new(), &[user], &reasons)
        .await
        .unwrap();

    assert!(reasons.is_empty());
}
