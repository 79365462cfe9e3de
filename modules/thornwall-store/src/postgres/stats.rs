//! Periodic pipeline statistics.

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::error::Result;

#[derive(Debug, Clone, Default)]
pub struct StatsSnapshot {
    pub recorded_at: Option<DateTime<Utc>>,
    pub flagged_users: i64,
    pub confirmed_users: i64,
    pub cleared_users: i64,
    pub locked_users: i64,
    pub flagged_groups: i64,
    pub confirmed_groups: i64,
    pub cleared_groups: i64,
    pub locked_groups: i64,
    pub queue_high: i64,
    pub queue_normal: i64,
    pub queue_low: i64,
}

pub struct StatsStore {
    pool: PgPool,
}

impl StatsStore {
    pub(crate) fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Current bucket counts. Queue lengths are filled in by the caller from
    /// the KV side.
    pub async fn bucket_counts(&self) -> Result<StatsSnapshot> {
        let mut snapshot = StatsSnapshot::default();

        let pairs: [(&str, &mut i64); 8] = [
            ("flagged_users", &mut snapshot.flagged_users),
            ("confirmed_users", &mut snapshot.confirmed_users),
            ("cleared_users", &mut snapshot.cleared_users),
            ("locked_users", &mut snapshot.locked_users),
            ("flagged_groups", &mut snapshot.flagged_groups),
            ("confirmed_groups", &mut snapshot.confirmed_groups),
            ("cleared_groups", &mut snapshot.cleared_groups),
            ("locked_groups", &mut snapshot.locked_groups),
        ];

        for (table, slot) in pairs {
            let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
                .fetch_one(&self.pool)
                .await?;
            *slot = count;
        }

        Ok(snapshot)
    }

    pub async fn save_snapshot(&self, snapshot: &StatsSnapshot) -> Result<()> {
        sqlx::query(
            "INSERT INTO statistics \
             (flagged_users, confirmed_users, cleared_users, locked_users, \
              flagged_groups, confirmed_groups, cleared_groups, locked_groups, \
              queue_high, queue_normal, queue_low) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
        )
        .bind(snapshot.flagged_users)
        .bind(snapshot.confirmed_users)
        .bind(snapshot.cleared_users)
        .bind(snapshot.locked_users)
        .bind(snapshot.flagged_groups)
        .bind(snapshot.confirmed_groups)
        .bind(snapshot.cleared_groups)
        .bind(snapshot.locked_groups)
        .bind(snapshot.queue_high)
        .bind(snapshot.queue_normal)
        .bind(snapshot.queue_low)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// When the last snapshot was recorded, if any.
    pub async fn last_recorded_at(&self) -> Result<Option<DateTime<Utc>>> {
        let row: Option<(DateTime<Utc>,)> =
            sqlx::query_as("SELECT recorded_at FROM statistics ORDER BY recorded_at DESC LIMIT 1")
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(ts,)| ts))
    }
}
