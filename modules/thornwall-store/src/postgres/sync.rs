//! External chat-server membership sync and user-data redaction.

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::error::Result;

pub struct SyncStore {
    pool: PgPool,
}

impl SyncStore {
    pub(crate) fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Server ids a user is currently recorded in.
    pub async fn get_user_guilds(&self, user_id: u64) -> Result<Vec<u64>> {
        let rows: Vec<(i64,)> =
            sqlx::query_as("SELECT server_id FROM server_members WHERE user_id = $1")
                .bind(user_id as i64)
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().map(|(id,)| id as u64).collect())
    }

    pub async fn upsert_server_members(&self, members: &[(u64, u64)]) -> Result<()> {
        for (server_id, user_id) in members {
            sqlx::query(
                "INSERT INTO server_members (server_id, user_id, updated_at) \
                 VALUES ($1, $2, NOW()) \
                 ON CONFLICT (server_id, user_id) DO UPDATE SET updated_at = NOW()",
            )
            .bind(*server_id as i64)
            .bind(*user_id as i64)
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    /// Whether this user requested their synced data be withheld.
    pub async fn is_user_data_redacted(&self, user_id: u64) -> Result<bool> {
        let exists: Option<i64> =
            sqlx::query_scalar("SELECT user_id FROM user_redactions WHERE user_id = $1")
                .bind(user_id as i64)
                .fetch_optional(&self.pool)
                .await?;
        Ok(exists.is_some())
    }

    pub async fn redact_user_data(&self, user_id: u64) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "INSERT INTO user_redactions (user_id) VALUES ($1) ON CONFLICT DO NOTHING",
        )
        .bind(user_id as i64)
        .execute(&mut *tx)
        .await?;
        sqlx::query("DELETE FROM server_members WHERE user_id = $1")
            .bind(user_id as i64)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    /// Member rows for redacted users that somehow re-appeared.
    pub async fn purge_redacted_members(&self) -> Result<u64> {
        let affected = sqlx::query(
            "DELETE FROM server_members \
             WHERE user_id IN (SELECT user_id FROM user_redactions)",
        )
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(affected)
    }

    /// Member rows not refreshed since the cutoff.
    pub async fn purge_old_server_members(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let affected = sqlx::query("DELETE FROM server_members WHERE updated_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(affected)
    }
}
