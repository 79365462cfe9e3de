//! Group-member tracking: flagged users accumulate against the groups they
//! belong to until the percentage sweep decides whether to flag the group.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use thornwall_common::SubjectId;

use crate::error::Result;

pub struct TrackingStore {
    pool: PgPool,
}

impl TrackingStore {
    pub(crate) fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Append flagged users to their groups' tracking rows, deduplicated.
    pub async fn add_group_flags(
        &self,
        group_to_users: &HashMap<SubjectId, Vec<SubjectId>>,
    ) -> Result<()> {
        for (group_id, user_ids) in group_to_users {
            if user_ids.is_empty() {
                continue;
            }
            let bind_users: Vec<i64> = user_ids.iter().map(|id| *id as i64).collect();
            sqlx::query(
                "INSERT INTO group_member_trackings (group_id, flagged_user_ids, last_appended) \
                 VALUES ($1, $2, NOW()) \
                 ON CONFLICT (group_id) DO UPDATE SET \
                     flagged_user_ids = ARRAY( \
                         SELECT DISTINCT unnest(group_member_trackings.flagged_user_ids || EXCLUDED.flagged_user_ids) \
                     ), \
                     last_appended = NOW()",
            )
            .bind(*group_id as i64)
            .bind(&bind_users)
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    /// Tracking rows that have accumulated at least `min_users` flagged
    /// members and have not been flagged yet, largest first.
    pub async fn get_trackings_to_check(
        &self,
        limit: usize,
        min_users: usize,
    ) -> Result<HashMap<SubjectId, Vec<SubjectId>>> {
        let rows: Vec<(i64, Vec<i64>)> = sqlx::query_as(
            "SELECT group_id, flagged_user_ids FROM group_member_trackings \
             WHERE NOT is_flagged AND cardinality(flagged_user_ids) >= $1 \
             ORDER BY cardinality(flagged_user_ids) DESC LIMIT $2",
        )
        .bind(min_users as i64)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(group_id, user_ids)| {
                (
                    group_id as SubjectId,
                    user_ids.into_iter().map(|id| id as SubjectId).collect(),
                )
            })
            .collect())
    }

    pub async fn mark_trackings_flagged(&self, group_ids: &[SubjectId]) -> Result<()> {
        if group_ids.is_empty() {
            return Ok(());
        }
        let bind_ids: Vec<i64> = group_ids.iter().map(|id| *id as i64).collect();
        sqlx::query("UPDATE group_member_trackings SET is_flagged = TRUE WHERE group_id = ANY($1)")
            .bind(&bind_ids)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Drop tracking rows that have not accumulated anything recently.
    pub async fn purge_stale_trackings(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let affected =
            sqlx::query("DELETE FROM group_member_trackings WHERE last_appended < $1")
                .bind(cutoff)
                .execute(&self.pool)
                .await?
                .rows_affected();
        Ok(affected)
    }
}
