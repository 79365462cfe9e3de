//! User buckets and reasons.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use thornwall_common::{
    Reason, Reasons, SubjectId, SubjectStatus, User, UserReasonType,
};

use crate::error::{Result, StoreError};

pub(crate) const USER_BUCKETS: [(&str, SubjectStatus); 4] = [
    ("flagged_users", SubjectStatus::Flagged),
    ("confirmed_users", SubjectStatus::Confirmed),
    ("cleared_users", SubjectStatus::Cleared),
    ("locked_users", SubjectStatus::Locked),
];

const USER_COLUMNS: &str = "id, uuid, name, display_name, description, created_at, confidence, \
     friend_ids, groups, outfits, thumbnail_url, last_thumbnail_update, upvotes, downvotes, \
     reputation, is_banned, last_scanned, last_updated, last_viewed, last_purge_check, \
     verified_at, cleared_at, locked_at, reviewer_id";

fn bucket_table(status: SubjectStatus) -> Option<&'static str> {
    USER_BUCKETS
        .iter()
        .find(|(_, s)| *s == status)
        .map(|(table, _)| *table)
}

#[derive(Debug, sqlx::FromRow)]
struct UserRow {
    id: i64,
    uuid: Uuid,
    name: String,
    display_name: String,
    description: String,
    created_at: DateTime<Utc>,
    confidence: f64,
    friend_ids: Vec<i64>,
    groups: serde_json::Value,
    outfits: serde_json::Value,
    thumbnail_url: String,
    last_thumbnail_update: Option<DateTime<Utc>>,
    upvotes: i32,
    downvotes: i32,
    reputation: i32,
    is_banned: bool,
    last_scanned: Option<DateTime<Utc>>,
    last_updated: DateTime<Utc>,
    last_viewed: Option<DateTime<Utc>>,
    last_purge_check: Option<DateTime<Utc>>,
    verified_at: Option<DateTime<Utc>>,
    cleared_at: Option<DateTime<Utc>>,
    locked_at: Option<DateTime<Utc>>,
    reviewer_id: Option<i64>,
}

impl UserRow {
    fn into_user(self, status: SubjectStatus) -> User {
        User {
            id: self.id as SubjectId,
            uuid: self.uuid,
            name: self.name,
            display_name: self.display_name,
            description: self.description,
            created_at: self.created_at,
            status,
            confidence: self.confidence,
            reasons: Reasons::new(),
            friend_ids: self.friend_ids.iter().map(|id| *id as SubjectId).collect(),
            groups: serde_json::from_value(self.groups).unwrap_or_default(),
            outfits: serde_json::from_value(self.outfits).unwrap_or_default(),
            thumbnail_url: self.thumbnail_url,
            last_thumbnail_update: self.last_thumbnail_update,
            upvotes: self.upvotes,
            downvotes: self.downvotes,
            reputation: self.reputation,
            is_banned: self.is_banned,
            last_scanned: self.last_scanned,
            last_updated: self.last_updated,
            last_viewed: self.last_viewed,
            last_purge_check: self.last_purge_check,
            verified_at: self.verified_at,
            cleared_at: self.cleared_at,
            locked_at: self.locked_at,
            reviewer_id: self.reviewer_id.map(|id| id as u64),
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ReasonRow {
    user_id: i64,
    reason_type: String,
    message: String,
    confidence: f64,
    evidence: Vec<String>,
}

pub struct UserStore {
    pool: PgPool,
}

impl UserStore {
    pub(crate) fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Next seed for graph traversal: least-recently-scanned confirmed user,
    /// falling back to flagged. Marks the pick scanned so concurrent workers
    /// fan out over different seeds.
    pub async fn get_user_to_scan(&self) -> Result<User> {
        let mut tx = self.pool.begin().await?;

        for (table, status) in [
            ("confirmed_users", SubjectStatus::Confirmed),
            ("flagged_users", SubjectStatus::Flagged),
        ] {
            let sql = format!(
                "SELECT {USER_COLUMNS} FROM {table} \
                 ORDER BY last_scanned ASC NULLS FIRST LIMIT 1 FOR UPDATE SKIP LOCKED"
            );
            if let Some(row) = sqlx::query_as::<_, UserRow>(&sql)
                .fetch_optional(&mut *tx)
                .await?
            {
                sqlx::query(&format!(
                    "UPDATE {table} SET last_scanned = NOW() WHERE id = $1"
                ))
                .bind(row.id)
                .execute(&mut *tx)
                .await?;
                tx.commit().await?;

                let mut user = row.into_user(status);
                user.reasons = self
                    .load_reasons(&[user.id])
                    .await?
                    .remove(&user.id)
                    .unwrap_or_default();
                return Ok(user);
            }
        }

        tx.commit().await?;
        Err(StoreError::NotFound)
    }

    /// Look up subjects by id across every bucket. Absent ids are simply not
    /// in the result.
    pub async fn get_users_by_ids(
        &self,
        ids: &[SubjectId],
        with_reasons: bool,
    ) -> Result<HashMap<SubjectId, User>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let bind_ids: Vec<i64> = ids.iter().map(|id| *id as i64).collect();

        let mut users = HashMap::new();
        for (table, status) in USER_BUCKETS {
            let sql = format!("SELECT {USER_COLUMNS} FROM {table} WHERE id = ANY($1)");
            let rows = sqlx::query_as::<_, UserRow>(&sql)
                .bind(&bind_ids)
                .fetch_all(&self.pool)
                .await?;
            for row in rows {
                let user = row.into_user(status);
                users.insert(user.id, user);
            }
        }

        if with_reasons && !users.is_empty() {
            let found: Vec<SubjectId> = users.keys().copied().collect();
            let mut reasons = self.load_reasons(&found).await?;
            for (id, user) in users.iter_mut() {
                if let Some(r) = reasons.remove(id) {
                    user.reasons = r;
                }
            }
        }

        Ok(users)
    }

    /// Upsert with merge semantics. New subjects land in the flagged bucket;
    /// subjects a reviewer already acted on stay in their bucket. Incoming
    /// reason types overwrite stored ones of the same type, other types are
    /// preserved, and the row confidence is recomputed from the merged set.
    pub async fn save_users(&self, users: Vec<User>) -> Result<()> {
        for user in users {
            let mut tx = self.pool.begin().await?;

            let existing = find_user_bucket(&mut tx, user.id).await?;
            let table = match existing {
                Some((table, _)) => {
                    let sql = format!(
                        "UPDATE {table} SET name = $2, display_name = $3, description = $4, \
                         friend_ids = $5, groups = $6, outfits = $7, is_banned = $8, \
                         last_updated = NOW() WHERE id = $1"
                    );
                    sqlx::query(&sql)
                        .bind(user.id as i64)
                        .bind(&user.name)
                        .bind(&user.display_name)
                        .bind(&user.description)
                        .bind(
                            user.friend_ids
                                .iter()
                                .map(|id| *id as i64)
                                .collect::<Vec<i64>>(),
                        )
                        .bind(serde_json::to_value(&user.groups)?)
                        .bind(serde_json::to_value(&user.outfits)?)
                        .bind(user.is_banned)
                        .execute(&mut *tx)
                        .await?;
                    table
                }
                None => {
                    insert_user_row(&mut tx, "flagged_users", &user).await?;
                    "flagged_users"
                }
            };

            for (kind, reason) in user.reasons.iter() {
                sqlx::query(
                    "INSERT INTO user_reasons (user_id, reason_type, message, confidence, evidence) \
                     VALUES ($1, $2, $3, $4, $5) \
                     ON CONFLICT (user_id, reason_type) \
                     DO UPDATE SET message = $3, confidence = $4, evidence = $5, created_at = NOW()",
                )
                .bind(user.id as i64)
                .bind(kind.as_str())
                .bind(&reason.message)
                .bind(reason.confidence)
                .bind(&reason.evidence)
                .execute(&mut *tx)
                .await?;
            }

            // Recompute the aggregate from the merged reason set.
            let rows = sqlx::query_as::<_, ReasonRow>(
                "SELECT user_id, reason_type, message, confidence, evidence \
                 FROM user_reasons WHERE user_id = $1",
            )
            .bind(user.id as i64)
            .fetch_all(&mut *tx)
            .await?;
            let merged = rows_to_reasons(rows)
                .remove(&user.id)
                .unwrap_or_default();

            sqlx::query(&format!(
                "UPDATE {table} SET confidence = $2 WHERE id = $1"
            ))
            .bind(user.id as i64)
            .bind(merged.aggregate_confidence())
            .execute(&mut *tx)
            .await?;

            tx.commit().await?;
        }
        Ok(())
    }

    pub async fn get_flagged_users_count(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM flagged_users")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }

    /// Users whose thumbnails are stale, oldest first, across the active
    /// buckets.
    pub async fn get_users_for_thumbnail_update(&self, limit: usize) -> Result<Vec<User>> {
        let mut users = Vec::new();
        for (table, status) in [
            ("flagged_users", SubjectStatus::Flagged),
            ("confirmed_users", SubjectStatus::Confirmed),
        ] {
            let sql = format!(
                "SELECT {USER_COLUMNS} FROM {table} \
                 ORDER BY last_thumbnail_update ASC NULLS FIRST LIMIT $1"
            );
            let rows = sqlx::query_as::<_, UserRow>(&sql)
                .bind(limit as i64)
                .fetch_all(&self.pool)
                .await?;
            users.extend(rows.into_iter().map(|row| row.into_user(status)));
        }

        users.sort_by_key(|u| u.last_thumbnail_update);
        users.truncate(limit);
        Ok(users)
    }

    pub async fn update_user_thumbnails(
        &self,
        thumbnails: &HashMap<SubjectId, String>,
    ) -> Result<()> {
        for (id, url) in thumbnails {
            for (table, _) in USER_BUCKETS {
                let sql = format!(
                    "UPDATE {table} SET thumbnail_url = $2, last_thumbnail_update = NOW() \
                     WHERE id = $1"
                );
                let affected = sqlx::query(&sql)
                    .bind(*id as i64)
                    .bind(url)
                    .execute(&self.pool)
                    .await?
                    .rows_affected();
                if affected > 0 {
                    break;
                }
            }
        }
        Ok(())
    }

    /// A batch of subjects due for a platform ban re-check, plus the subset
    /// currently marked banned. Marks the batch checked.
    pub async fn get_users_to_check(
        &self,
        limit: usize,
    ) -> Result<(Vec<SubjectId>, Vec<SubjectId>)> {
        let mut ids = Vec::new();
        let mut currently_banned = Vec::new();

        for table in ["confirmed_users", "flagged_users"] {
            let sql = format!(
                "UPDATE {table} SET last_purge_check = NOW() WHERE id IN ( \
                     SELECT id FROM {table} \
                     ORDER BY last_purge_check ASC NULLS FIRST LIMIT $1 \
                 ) RETURNING id, is_banned"
            );
            let rows: Vec<(i64, bool)> = sqlx::query_as(&sql)
                .bind(limit as i64)
                .fetch_all(&self.pool)
                .await?;
            for (id, is_banned) in rows {
                ids.push(id as SubjectId);
                if is_banned {
                    currently_banned.push(id as SubjectId);
                }
            }
        }

        Ok((ids, currently_banned))
    }

    pub async fn mark_users_ban_status(&self, ids: &[SubjectId], banned: bool) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let bind_ids: Vec<i64> = ids.iter().map(|id| *id as i64).collect();
        for (table, _) in USER_BUCKETS {
            let sql = format!(
                "UPDATE {table} SET is_banned = $2, locked_at = CASE WHEN $2 THEN NOW() ELSE NULL END \
                 WHERE id = ANY($1)"
            );
            sqlx::query(&sql)
                .bind(&bind_ids)
                .bind(banned)
                .execute(&self.pool)
                .await?;
        }
        Ok(())
    }

    /// Delete cleared users older than the cutoff. Returns rows removed.
    pub async fn purge_old_cleared_users(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let affected = sqlx::query(
            "DELETE FROM cleared_users WHERE cleared_at IS NOT NULL AND cleared_at < $1",
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(affected)
    }

    /// Remove a subject entirely. Returns whether any row existed.
    pub async fn delete_user(&self, id: SubjectId) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        let mut deleted = false;
        for (table, _) in USER_BUCKETS {
            let affected = sqlx::query(&format!("DELETE FROM {table} WHERE id = $1"))
                .bind(id as i64)
                .execute(&mut *tx)
                .await?
                .rows_affected();
            deleted |= affected > 0;
        }
        sqlx::query("DELETE FROM user_reasons WHERE user_id = $1")
            .bind(id as i64)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(deleted)
    }

    /// Atomic bucket move: flagged -> confirmed.
    pub async fn confirm_user(&self, id: SubjectId, reviewer_id: u64) -> Result<()> {
        self.move_user(id, SubjectStatus::Confirmed, reviewer_id)
            .await
    }

    /// Atomic bucket move: any -> cleared.
    pub async fn clear_user(&self, id: SubjectId, reviewer_id: u64) -> Result<()> {
        self.move_user(id, SubjectStatus::Cleared, reviewer_id).await
    }

    async fn move_user(
        &self,
        id: SubjectId,
        destination: SubjectStatus,
        reviewer_id: u64,
    ) -> Result<()> {
        let dest_table = bucket_table(destination).ok_or(StoreError::NotFound)?;
        let mut tx = self.pool.begin().await?;

        let (source_table, _) = find_user_bucket(&mut tx, id)
            .await?
            .ok_or(StoreError::NotFound)?;
        if source_table == dest_table {
            tx.commit().await?;
            return Ok(());
        }

        // Bucket tables share a schema, so the row moves wholesale.
        sqlx::query(&format!(
            "INSERT INTO {dest_table} SELECT * FROM {source_table} WHERE id = $1"
        ))
        .bind(id as i64)
        .execute(&mut *tx)
        .await?;

        let stamp_column = match destination {
            SubjectStatus::Confirmed => "verified_at",
            SubjectStatus::Cleared => "cleared_at",
            SubjectStatus::Locked => "locked_at",
            _ => "last_updated",
        };
        sqlx::query(&format!(
            "UPDATE {dest_table} SET {stamp_column} = NOW(), reviewer_id = $2 WHERE id = $1"
        ))
        .bind(id as i64)
        .bind(reviewer_id as i64)
        .execute(&mut *tx)
        .await?;

        sqlx::query(&format!("DELETE FROM {source_table} WHERE id = $1"))
            .bind(id as i64)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Flagged users missing a reason of the given type, for regeneration.
    pub async fn get_flagged_users_missing_reason(
        &self,
        kind: UserReasonType,
        limit: usize,
    ) -> Result<Vec<User>> {
        let sql = format!(
            "SELECT {USER_COLUMNS} FROM flagged_users u \
             WHERE NOT EXISTS ( \
                 SELECT 1 FROM user_reasons r \
                 WHERE r.user_id = u.id AND r.reason_type = $1 \
             ) ORDER BY last_updated ASC LIMIT $2"
        );
        let rows = sqlx::query_as::<_, UserRow>(&sql)
            .bind(kind.as_str())
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;

        let mut users: Vec<User> = rows
            .into_iter()
            .map(|row| row.into_user(SubjectStatus::Flagged))
            .collect();

        let ids: Vec<SubjectId> = users.iter().map(|u| u.id).collect();
        let mut reasons = self.load_reasons(&ids).await?;
        for user in users.iter_mut() {
            if let Some(r) = reasons.remove(&user.id) {
                user.reasons = r;
            }
        }
        Ok(users)
    }

    async fn load_reasons(
        &self,
        ids: &[SubjectId],
    ) -> Result<HashMap<SubjectId, Reasons<UserReasonType>>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let bind_ids: Vec<i64> = ids.iter().map(|id| *id as i64).collect();
        let rows = sqlx::query_as::<_, ReasonRow>(
            "SELECT user_id, reason_type, message, confidence, evidence \
             FROM user_reasons WHERE user_id = ANY($1)",
        )
        .bind(&bind_ids)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows_to_reasons(rows))
    }
}

async fn find_user_bucket(
    tx: &mut Transaction<'_, Postgres>,
    id: SubjectId,
) -> Result<Option<(&'static str, SubjectStatus)>> {
    for (table, status) in USER_BUCKETS {
        let exists: Option<i64> =
            sqlx::query_scalar(&format!("SELECT id FROM {table} WHERE id = $1"))
                .bind(id as i64)
                .fetch_optional(&mut **tx)
                .await?;
        if exists.is_some() {
            return Ok(Some((table, status)));
        }
    }
    Ok(None)
}

async fn insert_user_row(
    tx: &mut Transaction<'_, Postgres>,
    table: &str,
    user: &User,
) -> Result<()> {
    let sql = format!(
        "INSERT INTO {table} ({USER_COLUMNS}) VALUES \
         ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, \
          NOW(), $18, $19, $20, $21, $22, $23)"
    );
    sqlx::query(&sql)
        .bind(user.id as i64)
        .bind(user.uuid)
        .bind(&user.name)
        .bind(&user.display_name)
        .bind(&user.description)
        .bind(user.created_at)
        .bind(user.confidence)
        .bind(
            user.friend_ids
                .iter()
                .map(|id| *id as i64)
                .collect::<Vec<i64>>(),
        )
        .bind(serde_json::to_value(&user.groups)?)
        .bind(serde_json::to_value(&user.outfits)?)
        .bind(&user.thumbnail_url)
        .bind(user.last_thumbnail_update)
        .bind(user.upvotes)
        .bind(user.downvotes)
        .bind(user.reputation)
        .bind(user.is_banned)
        .bind(user.last_scanned)
        .bind(user.last_viewed)
        .bind(user.last_purge_check)
        .bind(user.verified_at)
        .bind(user.cleared_at)
        .bind(user.locked_at)
        .bind(user.reviewer_id.map(|id| id as i64))
        .execute(&mut **tx)
        .await?;
    Ok(())
}

fn rows_to_reasons(rows: Vec<ReasonRow>) -> HashMap<SubjectId, Reasons<UserReasonType>> {
    let mut map: HashMap<SubjectId, Reasons<UserReasonType>> = HashMap::new();
    for row in rows {
        let Some(kind) = UserReasonType::parse(&row.reason_type) else {
            continue;
        };
        map.entry(row.user_id as SubjectId).or_default().add(
            kind,
            Reason {
                message: row.message,
                confidence: row.confidence,
                evidence: row.evidence,
            },
        );
    }
    map
}
