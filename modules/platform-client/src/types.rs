use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Full user record as returned by the platform.
#[derive(Debug, Clone, Deserialize)]
pub struct UserDetails {
    pub id: u64,
    pub name: String,
    #[serde(rename = "displayName", default)]
    pub display_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "created")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "isBanned", default)]
    pub is_banned: bool,
}

/// One page of a paginated friend listing.
#[derive(Debug, Clone, Deserialize)]
pub struct FriendPage {
    pub data: Vec<FriendEntry>,
    #[serde(rename = "nextPageCursor", default)]
    pub next_page_cursor: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FriendEntry {
    pub id: u64,
}

/// One page of a paginated group member listing.
#[derive(Debug, Clone, Deserialize)]
pub struct MemberPage {
    pub data: Vec<MemberEntry>,
    #[serde(rename = "nextPageCursor", default)]
    pub next_page_cursor: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MemberEntry {
    #[serde(rename = "userId")]
    pub user_id: u64,
}

/// A user's membership in a group.
#[derive(Debug, Clone, Deserialize)]
pub struct GroupMembership {
    pub group: GroupSummary,
    #[serde(default)]
    pub role: Option<RoleSummary>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GroupSummary {
    pub id: u64,
    pub name: String,
    #[serde(rename = "memberCount", default)]
    pub member_count: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RoleSummary {
    #[serde(default)]
    pub name: String,
}

/// Group record as returned by the platform.
#[derive(Debug, Clone, Deserialize)]
pub struct GroupDetails {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "memberCount", default)]
    pub member_count: u64,
    #[serde(default)]
    pub owner: Option<GroupOwner>,
    #[serde(rename = "isLocked", default)]
    pub is_locked: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GroupOwner {
    #[serde(rename = "userId")]
    pub user_id: u64,
}

/// A saved outfit.
#[derive(Debug, Clone, Deserialize)]
pub struct Outfit {
    pub id: u64,
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
struct DataEnvelope<T> {
    pub data: Vec<T>,
}

pub(crate) use envelope::unwrap_data;

mod envelope {
    use super::DataEnvelope;
    use serde::de::DeserializeOwned;

    pub(crate) fn unwrap_data<T: DeserializeOwned>(
        body: serde_json::Value,
    ) -> Result<Vec<T>, serde_json::Error> {
        let envelope: DataEnvelope<T> = serde_json::from_value(body)?;
        Ok(envelope.data)
    }
}

// =============================================================================
// Thumbnails
// =============================================================================

/// Kinds of thumbnail the batch endpoint serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub enum ThumbnailType {
    Avatar,
    Outfit,
    GroupIcon,
}

#[derive(Debug, Clone, Serialize)]
pub struct ThumbnailRequest {
    #[serde(rename = "type")]
    pub kind: ThumbnailType,
    #[serde(rename = "targetId")]
    pub target_id: u64,
    pub size: String,
    pub format: String,
}

impl ThumbnailRequest {
    pub fn avatar(target_id: u64) -> Self {
        Self {
            kind: ThumbnailType::Avatar,
            target_id,
            size: "420x420".to_string(),
            format: "webp".to_string(),
        }
    }

    pub fn outfit(target_id: u64) -> Self {
        Self {
            kind: ThumbnailType::Outfit,
            target_id,
            size: "150x150".to_string(),
            format: "webp".to_string(),
        }
    }

    pub fn group_icon(target_id: u64) -> Self {
        Self {
            kind: ThumbnailType::GroupIcon,
            target_id,
            size: "420x420".to_string(),
            format: "webp".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ThumbnailResponse {
    #[serde(rename = "targetId")]
    pub target_id: u64,
    pub state: ThumbnailState,
    #[serde(rename = "imageUrl", default)]
    pub image_url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum ThumbnailState {
    Completed,
    Pending,
    Error,
    Blocked,
}
