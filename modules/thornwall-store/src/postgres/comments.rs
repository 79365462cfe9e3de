//! Reviewer comments on subjects.

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use thornwall_common::{normalize_name, SubjectId};

use crate::error::{Result, StoreError};

/// How alike two comments must be (token overlap) before the new one is
/// rejected as a duplicate.
const SIMILARITY_REJECT_THRESHOLD: f64 = 0.8;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct UserComment {
    pub id: i64,
    pub target_id: i64,
    pub reviewer_id: i64,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Link policy for comment content. Hosts not on the allowlist are rejected.
#[derive(Debug, Clone, Default)]
pub struct CommentPolicy {
    pub allowed_link_hosts: Vec<String>,
}

impl CommentPolicy {
    fn links_are_valid(&self, content: &str) -> bool {
        for word in content.split_whitespace() {
            let Some(rest) = word
                .strip_prefix("https://")
                .or_else(|| word.strip_prefix("http://"))
            else {
                continue;
            };
            let host = rest.split('/').next().unwrap_or_default();
            let allowed = self
                .allowed_link_hosts
                .iter()
                .any(|allowed| host == allowed || host.ends_with(&format!(".{allowed}")));
            if !allowed {
                return false;
            }
        }
        true
    }
}

pub struct CommentStore {
    pool: PgPool,
    policy: CommentPolicy,
}

impl CommentStore {
    pub(crate) fn new(pool: PgPool) -> Self {
        Self {
            pool,
            policy: CommentPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: CommentPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub async fn get_user_comments(&self, target_id: SubjectId) -> Result<Vec<UserComment>> {
        let rows = sqlx::query_as::<_, UserComment>(
            "SELECT id, target_id, reviewer_id, content, created_at, updated_at \
             FROM user_comments WHERE target_id = $1 ORDER BY created_at ASC",
        )
        .bind(target_id as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Add a comment, rejecting duplicates, near-duplicates, and comments
    /// with links outside the allowlist.
    pub async fn add_user_comment(
        &self,
        target_id: SubjectId,
        reviewer_id: u64,
        content: &str,
    ) -> Result<UserComment> {
        if !self.policy.links_are_valid(content) {
            return Err(StoreError::CommentInvalidLinks);
        }

        let existing = self.get_user_comments(target_id).await?;
        for comment in &existing {
            if comment.reviewer_id == reviewer_id as i64 {
                return Err(StoreError::CommentExists);
            }
            if comment_similarity(&comment.content, content) >= SIMILARITY_REJECT_THRESHOLD {
                return Err(StoreError::CommentTooSimilar);
            }
        }

        let row = sqlx::query_as::<_, UserComment>(
            "INSERT INTO user_comments (target_id, reviewer_id, content) \
             VALUES ($1, $2, $3) \
             RETURNING id, target_id, reviewer_id, content, created_at, updated_at",
        )
        .bind(target_id as i64)
        .bind(reviewer_id as i64)
        .bind(content)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }
}

/// Token-set overlap between two comments after normalization.
fn comment_similarity(a: &str, b: &str) -> f64 {
    let tokens = |text: &str| -> std::collections::HashSet<String> {
        text.split_whitespace()
            .map(normalize_name)
            .filter(|t| !t.is_empty())
            .collect()
    };

    let set_a = tokens(a);
    let set_b = tokens(b);
    if set_a.is_empty() || set_b.is_empty() {
        return 0.0;
    }

    let intersection = set_a.intersection(&set_b).count() as f64;
    let union = set_a.union(&set_b).count() as f64;
    intersection / union
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_comments_are_fully_similar() {
        assert_eq!(
            comment_similarity("known predator account", "known predator account"),
            1.0
        );
    }

    #[test]
    fn unrelated_comments_are_dissimilar() {
        let score = comment_similarity("known predator account", "appeal looks legitimate");
        assert!(score < 0.2);
    }

    #[test]
    fn similarity_survives_case_and_punctuation() {
        let score = comment_similarity("Known predator ACCOUNT!", "known, predator account");
        assert!(score >= SIMILARITY_REJECT_THRESHOLD);
    }

    #[test]
    fn default_policy_rejects_any_link() {
        let policy = CommentPolicy::default();
        assert!(policy.links_are_valid("no links here"));
        assert!(!policy.links_are_valid("see https://evil.example/payload"));
    }

    #[test]
    fn allowlisted_hosts_pass() {
        let policy = CommentPolicy {
            allowed_link_hosts: vec!["example.com".to_string()],
        };
        assert!(policy.links_are_valid("profile: https://example.com/users/1"));
        assert!(policy.links_are_valid("profile: https://www.example.com/users/1"));
        assert!(!policy.links_are_valid("mirror: https://example.net/users/1"));
    }
}
