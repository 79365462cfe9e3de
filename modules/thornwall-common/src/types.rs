//! Core domain types shared across the pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::reason::{GroupReasonType, Reasons, UserReasonType};

/// Platform-side identifier for a user or group. Stable externally; every
/// subject additionally receives a [`Uuid`] on first persistence.
pub type SubjectId = u64;

/// Sentinel thumbnail URL meaning "attempted and unavailable".
pub const THUMBNAIL_PLACEHOLDER: &str = "-";

/// Review status of a subject. A subject lives in exactly one bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubjectStatus {
    Unflagged,
    Flagged,
    Confirmed,
    Cleared,
    Locked,
}

impl SubjectStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unflagged => "unflagged",
            Self::Flagged => "flagged",
            Self::Confirmed => "confirmed",
            Self::Cleared => "cleared",
            Self::Locked => "locked",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "unflagged" => Some(Self::Unflagged),
            "flagged" => Some(Self::Flagged),
            "confirmed" => Some(Self::Confirmed),
            "cleared" => Some(Self::Cleared),
            "locked" => Some(Self::Locked),
            _ => None,
        }
    }

    /// Ordering used by merge-save: an automated flag never demotes a subject
    /// a reviewer has already acted on.
    pub fn rank(&self) -> u8 {
        match self {
            Self::Unflagged => 0,
            Self::Flagged => 1,
            Self::Cleared => 2,
            Self::Confirmed => 3,
            Self::Locked => 4,
        }
    }
}

/// Group membership captured at fetch time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupMembershipRecord {
    pub group_id: SubjectId,
    pub group_name: String,
    pub role: String,
    pub member_count: u64,
}

/// Saved outfit captured at fetch time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutfitRecord {
    pub outfit_id: u64,
    pub name: String,
}

/// A user subject. The store owns authoritative state; workers hold copies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: SubjectId,
    pub uuid: Uuid,
    pub name: String,
    pub display_name: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub status: SubjectStatus,
    pub confidence: f64,
    pub reasons: Reasons<UserReasonType>,
    #[serde(default)]
    pub friend_ids: Vec<SubjectId>,
    #[serde(default)]
    pub groups: Vec<GroupMembershipRecord>,
    #[serde(default)]
    pub outfits: Vec<OutfitRecord>,
    pub thumbnail_url: String,
    pub last_thumbnail_update: Option<DateTime<Utc>>,
    pub upvotes: i32,
    pub downvotes: i32,
    pub reputation: i32,
    pub is_banned: bool,
    pub last_scanned: Option<DateTime<Utc>>,
    pub last_updated: DateTime<Utc>,
    pub last_viewed: Option<DateTime<Utc>>,
    pub last_purge_check: Option<DateTime<Utc>>,
    pub verified_at: Option<DateTime<Utc>>,
    pub cleared_at: Option<DateTime<Utc>>,
    pub locked_at: Option<DateTime<Utc>>,
    pub reviewer_id: Option<u64>,
}

impl User {
    /// A fresh, unflagged record as produced by the user fetcher.
    pub fn new(
        id: SubjectId,
        name: impl Into<String>,
        display_name: impl Into<String>,
        description: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            uuid: Uuid::new_v4(),
            name: name.into(),
            display_name: display_name.into(),
            description: description.into(),
            created_at,
            status: SubjectStatus::Unflagged,
            confidence: 0.0,
            reasons: Reasons::new(),
            friend_ids: Vec::new(),
            groups: Vec::new(),
            outfits: Vec::new(),
            thumbnail_url: String::new(),
            last_thumbnail_update: None,
            upvotes: 0,
            downvotes: 0,
            reputation: 0,
            is_banned: false,
            last_scanned: None,
            last_updated: Utc::now(),
            last_viewed: None,
            last_purge_check: None,
            verified_at: None,
            cleared_at: None,
            locked_at: None,
            reviewer_id: None,
        }
    }

    /// Recompute the aggregate confidence from the reason map.
    pub fn recompute_confidence(&mut self) {
        self.confidence = self.reasons.aggregate_confidence();
    }
}

/// A group subject.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Group {
    pub id: SubjectId,
    pub uuid: Uuid,
    pub name: String,
    pub description: String,
    pub owner_id: Option<SubjectId>,
    pub member_count: u64,
    pub status: SubjectStatus,
    pub confidence: f64,
    pub reasons: Reasons<GroupReasonType>,
    pub thumbnail_url: String,
    pub last_thumbnail_update: Option<DateTime<Utc>>,
    pub is_locked: bool,
    pub last_scanned: Option<DateTime<Utc>>,
    pub last_updated: DateTime<Utc>,
    pub last_purge_check: Option<DateTime<Utc>>,
    pub cleared_at: Option<DateTime<Utc>>,
    pub reviewer_id: Option<u64>,
}

impl Group {
    pub fn new(
        id: SubjectId,
        name: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id,
            uuid: Uuid::new_v4(),
            name: name.into(),
            description: description.into(),
            owner_id: None,
            member_count: 0,
            status: SubjectStatus::Unflagged,
            confidence: 0.0,
            reasons: Reasons::new(),
            thumbnail_url: String::new(),
            last_thumbnail_update: None,
            is_locked: false,
            last_scanned: None,
            last_updated: Utc::now(),
            last_purge_check: None,
            cleared_at: None,
            reviewer_id: None,
        }
    }

    pub fn recompute_confidence(&mut self) {
        self.confidence = self.reasons.aggregate_confidence();
    }
}

/// Queue priority. Drained strictly high before normal before low.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    High,
    Normal,
    Low,
}

impl Priority {
    /// All priorities in drain order.
    pub const ALL: [Priority; 3] = [Priority::High, Priority::Normal, Priority::Low];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Normal => "normal",
            Self::Low => "low",
        }
    }
}

/// Lifecycle of a queued item. Tracked separately from the queue entry so it
/// survives item removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    Pending,
    Processing,
    Complete,
    Skipped,
}

impl QueueStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Skipped)
    }

    /// Allowed transitions: pending -> processing -> {complete, skipped}.
    pub fn can_transition_to(&self, next: QueueStatus) -> bool {
        match (self, next) {
            (Self::Pending, Self::Processing) => true,
            (Self::Processing, Self::Complete) | (Self::Processing, Self::Skipped) => true,
            (a, b) if *a == b => true,
            _ => false,
        }
    }
}

/// A queued request to classify a subject.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueItem {
    pub subject_id: SubjectId,
    pub priority: Priority,
    pub reason: String,
    pub added_by: u64,
    pub added_at: DateTime<Utc>,
    pub status: QueueStatus,
}

/// Target of an activity log entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityTarget {
    pub user_id: Option<SubjectId>,
    pub group_id: Option<SubjectId>,
}

impl ActivityTarget {
    pub fn user(id: SubjectId) -> Self {
        Self {
            user_id: Some(id),
            group_id: None,
        }
    }

    pub fn group(id: SubjectId) -> Self {
        Self {
            user_id: None,
            group_id: Some(id),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityType {
    UserFlagged,
    UserConfirmed,
    UserCleared,
    UserDeleted,
    UserLookup,
    GroupFlagged,
    GroupConfirmed,
    GroupCleared,
    GroupDeleted,
    CondoBlacklisted,
    QueueProcessed,
    AppealSubmitted,
    AppealClaimed,
    AppealAccepted,
    AppealRejected,
    AppealReopened,
}

impl ActivityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UserFlagged => "user_flagged",
            Self::UserConfirmed => "user_confirmed",
            Self::UserCleared => "user_cleared",
            Self::UserDeleted => "user_deleted",
            Self::UserLookup => "user_lookup",
            Self::GroupFlagged => "group_flagged",
            Self::GroupConfirmed => "group_confirmed",
            Self::GroupCleared => "group_cleared",
            Self::GroupDeleted => "group_deleted",
            Self::CondoBlacklisted => "condo_blacklisted",
            Self::QueueProcessed => "queue_processed",
            Self::AppealSubmitted => "appeal_submitted",
            Self::AppealClaimed => "appeal_claimed",
            Self::AppealAccepted => "appeal_accepted",
            Self::AppealRejected => "appeal_rejected",
            Self::AppealReopened => "appeal_reopened",
        }
    }
}

/// Append-only audit record. Ordered by `(timestamp, sequence)`; the sequence
/// is a per-row monotonic discriminator assigned by the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityLog {
    pub target: ActivityTarget,
    pub reviewer_id: Option<u64>,
    pub activity_type: ActivityType,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub sequence: i64,
    #[serde(default)]
    pub details: serde_json::Value,
}

impl ActivityLog {
    pub fn new(target: ActivityTarget, activity_type: ActivityType) -> Self {
        Self {
            target,
            reviewer_id: None,
            activity_type,
            timestamp: Utc::now(),
            sequence: 0,
            details: serde_json::Value::Null,
        }
    }

    pub fn with_reviewer(mut self, reviewer_id: u64) -> Self {
        self.reviewer_id = Some(reviewer_id);
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_rank_never_demotes_reviewed_subjects() {
        assert!(SubjectStatus::Confirmed.rank() > SubjectStatus::Flagged.rank());
        assert!(SubjectStatus::Cleared.rank() > SubjectStatus::Flagged.rank());
        assert!(SubjectStatus::Locked.rank() > SubjectStatus::Confirmed.rank());
    }

    #[test]
    fn status_round_trips_through_strings() {
        for status in [
            SubjectStatus::Unflagged,
            SubjectStatus::Flagged,
            SubjectStatus::Confirmed,
            SubjectStatus::Cleared,
            SubjectStatus::Locked,
        ] {
            assert_eq!(SubjectStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(SubjectStatus::parse("banned"), None);
    }

    #[test]
    fn queue_status_transitions_are_monotonic() {
        use QueueStatus::*;
        assert!(Pending.can_transition_to(Processing));
        assert!(Processing.can_transition_to(Complete));
        assert!(Processing.can_transition_to(Skipped));
        assert!(!Complete.can_transition_to(Processing));
        assert!(!Pending.can_transition_to(Complete));
        assert!(!Skipped.can_transition_to(Pending));
    }

    #[test]
    fn priorities_drain_high_first() {
        assert_eq!(
            Priority::ALL,
            [Priority::High, Priority::Normal, Priority::Low]
        );
    }
}
