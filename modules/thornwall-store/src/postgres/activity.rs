//! Append-only activity log with stable cursor pagination.

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use thornwall_common::{ActivityLog, ActivityTarget, ActivityType, SubjectId};

use crate::error::Result;

/// Keyset cursor: entries strictly older than `(timestamp, sequence)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActivityCursor {
    pub timestamp: DateTime<Utc>,
    pub sequence: i64,
}

#[derive(Debug, Clone, Default)]
pub struct ActivityFilter {
    pub user_id: Option<SubjectId>,
    pub group_id: Option<SubjectId>,
    pub reviewer_id: Option<u64>,
    pub activity_type: Option<ActivityType>,
}

#[derive(Debug, sqlx::FromRow)]
struct LogRow {
    id: i64,
    user_id: Option<i64>,
    group_id: Option<i64>,
    reviewer_id: Option<i64>,
    activity_type: String,
    created_at: DateTime<Utc>,
    details: serde_json::Value,
}

impl LogRow {
    fn into_log(self) -> Option<ActivityLog> {
        let activity_type = parse_activity_type(&self.activity_type)?;
        Some(ActivityLog {
            target: ActivityTarget {
                user_id: self.user_id.map(|id| id as SubjectId),
                group_id: self.group_id.map(|id| id as SubjectId),
            },
            reviewer_id: self.reviewer_id.map(|id| id as u64),
            activity_type,
            timestamp: self.created_at,
            sequence: self.id,
            details: self.details,
        })
    }
}

pub struct ActivityStore {
    pool: PgPool,
}

impl ActivityStore {
    pub(crate) fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Append one entry. The sequence discriminator comes from the store.
    pub async fn log(&self, entry: &ActivityLog) -> Result<()> {
        sqlx::query(
            "INSERT INTO activity_logs (user_id, group_id, reviewer_id, activity_type, created_at, details) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(entry.target.user_id.map(|id| id as i64))
        .bind(entry.target.group_id.map(|id| id as i64))
        .bind(entry.reviewer_id.map(|id| id as i64))
        .bind(entry.activity_type.as_str())
        .bind(entry.timestamp)
        .bind(&entry.details)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Page through logs newest-first. Returns the next cursor when more rows
    /// remain.
    pub async fn get_logs(
        &self,
        filter: &ActivityFilter,
        cursor: Option<ActivityCursor>,
        limit: usize,
    ) -> Result<(Vec<ActivityLog>, Option<ActivityCursor>)> {
        let mut sql = String::from(
            "SELECT id, user_id, group_id, reviewer_id, activity_type, created_at, details \
             FROM activity_logs WHERE TRUE",
        );
        let mut binds: Vec<BindValue> = Vec::new();

        if let Some(user_id) = filter.user_id {
            binds.push(BindValue::Int(user_id as i64));
            sql.push_str(&format!(" AND user_id = ${}", binds.len()));
        }
        if let Some(group_id) = filter.group_id {
            binds.push(BindValue::Int(group_id as i64));
            sql.push_str(&format!(" AND group_id = ${}", binds.len()));
        }
        if let Some(reviewer_id) = filter.reviewer_id {
            binds.push(BindValue::Int(reviewer_id as i64));
            sql.push_str(&format!(" AND reviewer_id = ${}", binds.len()));
        }
        if let Some(activity_type) = filter.activity_type {
            binds.push(BindValue::Text(activity_type.as_str().to_string()));
            sql.push_str(&format!(" AND activity_type = ${}", binds.len()));
        }
        if let Some(cursor) = cursor {
            binds.push(BindValue::Time(cursor.timestamp));
            let ts_idx = binds.len();
            binds.push(BindValue::Int(cursor.sequence));
            sql.push_str(&format!(
                " AND (created_at, id) < (${ts_idx}, ${})",
                binds.len()
            ));
        }

        binds.push(BindValue::Int(limit as i64 + 1));
        sql.push_str(&format!(
            " ORDER BY created_at DESC, id DESC LIMIT ${}",
            binds.len()
        ));

        let mut query = sqlx::query_as::<_, LogRow>(&sql);
        for bind in binds {
            query = match bind {
                BindValue::Int(v) => query.bind(v),
                BindValue::Text(v) => query.bind(v),
                BindValue::Time(v) => query.bind(v),
            };
        }

        let mut rows = query.fetch_all(&self.pool).await?;

        let next_cursor = if rows.len() > limit {
            rows.truncate(limit);
            rows.last().map(|row| ActivityCursor {
                timestamp: row.created_at,
                sequence: row.id,
            })
        } else {
            None
        };

        Ok((
            rows.into_iter().filter_map(LogRow::into_log).collect(),
            next_cursor,
        ))
    }

    /// Subject ids this reviewer acted on most recently, deduplicated.
    pub async fn get_recently_reviewed_ids(
        &self,
        reviewer_id: u64,
        is_group: bool,
        limit: usize,
    ) -> Result<Vec<SubjectId>> {
        let column = if is_group { "group_id" } else { "user_id" };
        let sql = format!(
            "SELECT DISTINCT ON ({column}) {column}, created_at FROM activity_logs \
             WHERE reviewer_id = $1 AND {column} IS NOT NULL \
             ORDER BY {column}, created_at DESC"
        );
        let rows: Vec<(i64, DateTime<Utc>)> = sqlx::query_as(&sql)
            .bind(reviewer_id as i64)
            .fetch_all(&self.pool)
            .await?;

        let mut rows = rows;
        rows.sort_by(|a, b| b.1.cmp(&a.1));
        rows.truncate(limit);
        Ok(rows.into_iter().map(|(id, _)| id as SubjectId).collect())
    }
}

enum BindValue {
    Int(i64),
    Text(String),
    Time(DateTime<Utc>),
}

fn parse_activity_type(value: &str) -> Option<ActivityType> {
    use ActivityType::*;
    match value {
        "user_flagged" => Some(UserFlagged),
        "user_confirmed" => Some(UserConfirmed),
        "user_cleared" => Some(UserCleared),
        "user_deleted" => Some(UserDeleted),
        "user_lookup" => Some(UserLookup),
        "group_flagged" => Some(GroupFlagged),
        "group_confirmed" => Some(GroupConfirmed),
        "group_cleared" => Some(GroupCleared),
        "group_deleted" => Some(GroupDeleted),
        "condo_blacklisted" => Some(CondoBlacklisted),
        "queue_processed" => Some(QueueProcessed),
        "appeal_submitted" => Some(AppealSubmitted),
        "appeal_claimed" => Some(AppealClaimed),
        "appeal_accepted" => Some(AppealAccepted),
        "appeal_rejected" => Some(AppealRejected),
        "appeal_reopened" => Some(AppealReopened),
        _ => None,
    }
}
