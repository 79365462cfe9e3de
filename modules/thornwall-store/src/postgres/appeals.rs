//! Appeals against moderation outcomes.

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use thornwall_common::SubjectId;

use crate::error::{Result, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppealStatus {
    Pending,
    Claimed,
    Accepted,
    Rejected,
}

impl AppealStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Claimed => "claimed",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "claimed" => Some(Self::Claimed),
            "accepted" => Some(Self::Accepted),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Appeal {
    pub id: i64,
    pub user_id: SubjectId,
    pub requester_id: u64,
    pub status: AppealStatus,
    pub claimed_by: Option<u64>,
    pub review_reason: Option<String>,
    pub submitted_at: DateTime<Utc>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub reviewed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AppealMessage {
    pub id: i64,
    pub appeal_id: i64,
    pub author_id: i64,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, sqlx::FromRow)]
struct AppealRow {
    id: i64,
    user_id: i64,
    requester_id: i64,
    status: String,
    claimed_by: Option<i64>,
    review_reason: Option<String>,
    submitted_at: DateTime<Utc>,
    claimed_at: Option<DateTime<Utc>>,
    reviewed_at: Option<DateTime<Utc>>,
}

impl AppealRow {
    fn into_appeal(self) -> Result<Appeal> {
        let status = AppealStatus::parse(&self.status).ok_or(StoreError::NotFound)?;
        Ok(Appeal {
            id: self.id,
            user_id: self.user_id as SubjectId,
            requester_id: self.requester_id as u64,
            status,
            claimed_by: self.claimed_by.map(|id| id as u64),
            review_reason: self.review_reason,
            submitted_at: self.submitted_at,
            claimed_at: self.claimed_at,
            reviewed_at: self.reviewed_at,
        })
    }
}

const APPEAL_COLUMNS: &str = "id, user_id, requester_id, status, claimed_by, review_reason, \
     submitted_at, claimed_at, reviewed_at";

pub struct AppealStore {
    pool: PgPool,
}

impl AppealStore {
    pub(crate) fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn submit(&self, user_id: SubjectId, requester_id: u64) -> Result<Appeal> {
        let row = sqlx::query_as::<_, AppealRow>(&format!(
            "INSERT INTO appeals (user_id, requester_id) VALUES ($1, $2) \
             RETURNING {APPEAL_COLUMNS}"
        ))
        .bind(user_id as i64)
        .bind(requester_id as i64)
        .fetch_one(&self.pool)
        .await?;
        row.into_appeal()
    }

    pub async fn get(&self, id: i64) -> Result<Appeal> {
        let row = sqlx::query_as::<_, AppealRow>(&format!(
            "SELECT {APPEAL_COLUMNS} FROM appeals WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::NotFound)?;
        row.into_appeal()
    }

    pub async fn get_pending(&self, limit: usize) -> Result<Vec<Appeal>> {
        let rows = sqlx::query_as::<_, AppealRow>(&format!(
            "SELECT {APPEAL_COLUMNS} FROM appeals WHERE status = 'pending' \
             ORDER BY submitted_at ASC LIMIT $1"
        ))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(AppealRow::into_appeal).collect()
    }

    /// Claim a pending appeal for review. Fails if it is not pending.
    pub async fn claim(&self, id: i64, reviewer_id: u64) -> Result<()> {
        let affected = sqlx::query(
            "UPDATE appeals SET status = 'claimed', claimed_by = $2, claimed_at = NOW() \
             WHERE id = $1 AND status = 'pending'",
        )
        .bind(id)
        .bind(reviewer_id as i64)
        .execute(&self.pool)
        .await?
        .rows_affected();
        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    pub async fn accept(&self, id: i64, reviewer_id: u64, reason: &str) -> Result<()> {
        self.finish(id, reviewer_id, reason, AppealStatus::Accepted)
            .await
    }

    pub async fn reject(&self, id: i64, reviewer_id: u64, reason: &str) -> Result<()> {
        self.finish(id, reviewer_id, reason, AppealStatus::Rejected)
            .await
    }

    async fn finish(
        &self,
        id: i64,
        reviewer_id: u64,
        reason: &str,
        status: AppealStatus,
    ) -> Result<()> {
        let affected = sqlx::query(
            "UPDATE appeals SET status = $4, review_reason = $3, reviewed_at = NOW() \
             WHERE id = $1 AND status = 'claimed' AND claimed_by = $2",
        )
        .bind(id)
        .bind(reviewer_id as i64)
        .bind(reason)
        .bind(status.as_str())
        .execute(&self.pool)
        .await?
        .rows_affected();
        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    /// Reopen a reviewed appeal.
    pub async fn reopen(&self, id: i64) -> Result<()> {
        let affected = sqlx::query(
            "UPDATE appeals SET status = 'pending', claimed_by = NULL, claimed_at = NULL, \
             reviewed_at = NULL, review_reason = NULL \
             WHERE id = $1 AND status IN ('accepted', 'rejected')",
        )
        .bind(id)
        .execute(&self.pool)
        .await?
        .rows_affected();
        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    pub async fn add_message(&self, appeal_id: i64, author_id: u64, message: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO appeal_timelines (appeal_id, author_id, message) VALUES ($1, $2, $3)",
        )
        .bind(appeal_id)
        .bind(author_id as i64)
        .bind(message)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_timeline(&self, appeal_id: i64) -> Result<Vec<AppealMessage>> {
        let rows = sqlx::query_as::<_, AppealMessage>(
            "SELECT id, appeal_id, author_id, message, created_at \
             FROM appeal_timelines WHERE appeal_id = $1 ORDER BY created_at ASC, id ASC",
        )
        .bind(appeal_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}
