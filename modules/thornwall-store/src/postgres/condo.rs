//! Known condo-player avatar thumbnails.

use sqlx::PgPool;

use thornwall_common::SubjectId;

use crate::error::{Result, StoreError};

#[derive(Debug, Clone)]
pub struct CondoPlayer {
    pub thumbnail_url: String,
    pub user_id: Option<SubjectId>,
    pub is_blacklisted: bool,
}

#[derive(Debug, sqlx::FromRow)]
struct CondoRow {
    thumbnail_url: String,
    user_id: Option<i64>,
    is_blacklisted: bool,
}

pub struct CondoStore {
    pool: PgPool,
}

impl CondoStore {
    pub(crate) fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn get_player_by_thumbnail(&self, thumbnail_url: &str) -> Result<CondoPlayer> {
        let row = sqlx::query_as::<_, CondoRow>(
            "SELECT thumbnail_url, user_id, is_blacklisted FROM condo_players \
             WHERE thumbnail_url = $1",
        )
        .bind(thumbnail_url)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::NotFound)?;

        Ok(CondoPlayer {
            thumbnail_url: row.thumbnail_url,
            user_id: row.user_id.map(|id| id as SubjectId),
            is_blacklisted: row.is_blacklisted,
        })
    }

    pub async fn insert_player(&self, thumbnail_url: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO condo_players (thumbnail_url) VALUES ($1) ON CONFLICT DO NOTHING",
        )
        .bind(thumbnail_url)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Blacklist a thumbnail observed on more than one subject.
    pub async fn blacklist_player(&self, thumbnail_url: &str) -> Result<()> {
        sqlx::query("UPDATE condo_players SET is_blacklisted = TRUE WHERE thumbnail_url = $1")
            .bind(thumbnail_url)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Bind a thumbnail to the subject it was first observed on.
    pub async fn set_player_user(&self, thumbnail_url: &str, user_id: SubjectId) -> Result<()> {
        sqlx::query("UPDATE condo_players SET user_id = $2 WHERE thumbnail_url = $1")
            .bind(thumbnail_url)
            .bind(user_id as i64)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
