//! Group buckets and reasons.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use thornwall_common::{Group, GroupReasonType, Reason, Reasons, SubjectId, SubjectStatus};

use crate::error::{Result, StoreError};

pub(crate) const GROUP_BUCKETS: [(&str, SubjectStatus); 4] = [
    ("flagged_groups", SubjectStatus::Flagged),
    ("confirmed_groups", SubjectStatus::Confirmed),
    ("cleared_groups", SubjectStatus::Cleared),
    ("locked_groups", SubjectStatus::Locked),
];

const GROUP_COLUMNS: &str = "id, uuid, name, description, owner_id, member_count, confidence, \
     thumbnail_url, last_thumbnail_update, is_locked, last_scanned, last_updated, \
     last_purge_check, cleared_at, reviewer_id";

#[derive(Debug, sqlx::FromRow)]
struct GroupRow {
    id: i64,
    uuid: Uuid,
    name: String,
    description: String,
    owner_id: Option<i64>,
    member_count: i64,
    confidence: f64,
    thumbnail_url: String,
    last_thumbnail_update: Option<DateTime<Utc>>,
    is_locked: bool,
    last_scanned: Option<DateTime<Utc>>,
    last_updated: DateTime<Utc>,
    last_purge_check: Option<DateTime<Utc>>,
    cleared_at: Option<DateTime<Utc>>,
    reviewer_id: Option<i64>,
}

impl GroupRow {
    fn into_group(self, status: SubjectStatus) -> Group {
        Group {
            id: self.id as SubjectId,
            uuid: self.uuid,
            name: self.name,
            description: self.description,
            owner_id: self.owner_id.map(|id| id as SubjectId),
            member_count: self.member_count as u64,
            status,
            confidence: self.confidence,
            reasons: Reasons::new(),
            thumbnail_url: self.thumbnail_url,
            last_thumbnail_update: self.last_thumbnail_update,
            is_locked: self.is_locked,
            last_scanned: self.last_scanned,
            last_updated: self.last_updated,
            last_purge_check: self.last_purge_check,
            cleared_at: self.cleared_at,
            reviewer_id: self.reviewer_id.map(|id| id as u64),
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct GroupReasonRow {
    group_id: i64,
    reason_type: String,
    message: String,
    confidence: f64,
    evidence: Vec<String>,
}

pub struct GroupStore {
    pool: PgPool,
}

impl GroupStore {
    pub(crate) fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Next group seed for member traversal, confirmed before flagged.
    pub async fn get_group_to_scan(&self) -> Result<Group> {
        let mut tx = self.pool.begin().await?;

        for (table, status) in [
            ("confirmed_groups", SubjectStatus::Confirmed),
            ("flagged_groups", SubjectStatus::Flagged),
        ] {
            let sql = format!(
                "SELECT {GROUP_COLUMNS} FROM {table} \
                 ORDER BY last_scanned ASC NULLS FIRST LIMIT 1 FOR UPDATE SKIP LOCKED"
            );
            if let Some(row) = sqlx::query_as::<_, GroupRow>(&sql)
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
                return Ok(row.into_group(status));
            }
        }

        tx.commit().await?;
        Err(StoreError::NotFound)
    }

    pub async fn get_groups_by_ids(
        &self,
        ids: &[SubjectId],
    ) -> Result<HashMap<SubjectId, Group>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let bind_ids: Vec<i64> = ids.iter().map(|id| *id as i64).collect();

        let mut groups = HashMap::new();
        for (table, status) in GROUP_BUCKETS {
            let sql = format!("SELECT {GROUP_COLUMNS} FROM {table} WHERE id = ANY($1)");
            let rows = sqlx::query_as::<_, GroupRow>(&sql)
                .bind(&bind_ids)
                .fetch_all(&self.pool)
                .await?;
            for row in rows {
                let group = row.into_group(status);
                groups.insert(group.id, group);
            }
        }

        let found: Vec<SubjectId> = groups.keys().copied().collect();
        let mut reasons = self.load_reasons(&found).await?;
        for (id, group) in groups.iter_mut() {
            if let Some(r) = reasons.remove(id) {
                group.reasons = r;
            }
        }

        Ok(groups)
    }

    /// Merge-save, same discipline as users: new groups land flagged,
    /// reviewed groups stay put, reasons merge per type.
    pub async fn save_groups(&self, groups: Vec<Group>) -> Result<()> {
        for group in groups {
            let mut tx = self.pool.begin().await?;

            let existing = find_group_bucket(&mut tx, group.id).await?;
            let table = match existing {
                Some((table, _)) => {
                    let sql = format!(
                        "UPDATE {table} SET name = $2, description = $3, owner_id = $4, \
                         member_count = $5, is_locked = $6, last_updated = NOW() WHERE id = $1"
                    );
                    sqlx::query(&sql)
                        .bind(group.id as i64)
                        .bind(&group.name)
                        .bind(&group.description)
                        .bind(group.owner_id.map(|id| id as i64))
                        .bind(group.member_count as i64)
                        .bind(group.is_locked)
                        .execute(&mut *tx)
                        .await?;
                    table
                }
                None => {
                    let sql = format!(
                        "INSERT INTO flagged_groups ({GROUP_COLUMNS}) VALUES \
                         ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, NOW(), $12, $13, $14)"
                    );
                    sqlx::query(&sql)
                        .bind(group.id as i64)
                        .bind(group.uuid)
                        .bind(&group.name)
                        .bind(&group.description)
                        .bind(group.owner_id.map(|id| id as i64))
                        .bind(group.member_count as i64)
                        .bind(group.confidence)
                        .bind(&group.thumbnail_url)
                        .bind(group.last_thumbnail_update)
                        .bind(group.is_locked)
                        .bind(group.last_scanned)
                        .bind(group.last_purge_check)
                        .bind(group.cleared_at)
                        .bind(group.reviewer_id.map(|id| id as i64))
                        .execute(&mut *tx)
                        .await?;
                    "flagged_groups"
                }
            };

            for (kind, reason) in group.reasons.iter() {
                sqlx::query(
                    "INSERT INTO group_reasons (group_id, reason_type, message, confidence, evidence) \
                     VALUES ($1, $2, $3, $4, $5) \
                     ON CONFLICT (group_id, reason_type) \
                     DO UPDATE SET message = $3, confidence = $4, evidence = $5, created_at = NOW()",
                )
                .bind(group.id as i64)
                .bind(kind.as_str())
                .bind(&reason.message)
                .bind(reason.confidence)
                .bind(&reason.evidence)
                .execute(&mut *tx)
                .await?;
            }

            let rows = sqlx::query_as::<_, GroupReasonRow>(
                "SELECT group_id, reason_type, message, confidence, evidence \
                 FROM group_reasons WHERE group_id = $1",
            )
            .bind(group.id as i64)
            .fetch_all(&mut *tx)
            .await?;
            let merged = rows_to_reasons(rows).remove(&group.id).unwrap_or_default();

            sqlx::query(&format!(
                "UPDATE {table} SET confidence = $2 WHERE id = $1"
            ))
            .bind(group.id as i64)
            .bind(merged.aggregate_confidence())
            .execute(&mut *tx)
            .await?;

            tx.commit().await?;
        }
        Ok(())
    }

    pub async fn get_flagged_groups_count(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM flagged_groups")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }

    /// Groups due for a platform lock re-check, plus the currently-locked
    /// subset. Marks the batch checked.
    pub async fn get_groups_to_check(
        &self,
        limit: usize,
    ) -> Result<(Vec<SubjectId>, Vec<SubjectId>)> {
        let mut ids = Vec::new();
        let mut currently_locked = Vec::new();

        for table in ["confirmed_groups", "flagged_groups"] {
            let sql = format!(
                "UPDATE {table} SET last_purge_check = NOW() WHERE id IN ( \
                     SELECT id FROM {table} \
                     ORDER BY last_purge_check ASC NULLS FIRST LIMIT $1 \
                 ) RETURNING id, is_locked"
            );
            let rows: Vec<(i64, bool)> = sqlx::query_as(&sql)
                .bind(limit as i64)
                .fetch_all(&self.pool)
                .await?;
            for (id, is_locked) in rows {
                ids.push(id as SubjectId);
                if is_locked {
                    currently_locked.push(id as SubjectId);
                }
            }
        }

        Ok((ids, currently_locked))
    }

    pub async fn mark_groups_lock_status(&self, ids: &[SubjectId], locked: bool) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let bind_ids: Vec<i64> = ids.iter().map(|id| *id as i64).collect();
        for (table, _) in GROUP_BUCKETS {
            let sql = format!("UPDATE {table} SET is_locked = $2 WHERE id = ANY($1)");
            sqlx::query(&sql)
                .bind(&bind_ids)
                .bind(locked)
                .execute(&self.pool)
                .await?;
        }
        Ok(())
    }

    pub async fn purge_old_cleared_groups(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let affected = sqlx::query(
            "DELETE FROM cleared_groups WHERE cleared_at IS NOT NULL AND cleared_at < $1",
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(affected)
    }

    pub async fn get_groups_for_thumbnail_update(&self, limit: usize) -> Result<Vec<Group>> {
        let mut groups = Vec::new();
        for (table, status) in [
            ("flagged_groups", SubjectStatus::Flagged),
            ("confirmed_groups", SubjectStatus::Confirmed),
        ] {
            let sql = format!(
                "SELECT {GROUP_COLUMNS} FROM {table} \
                 ORDER BY last_thumbnail_update ASC NULLS FIRST LIMIT $1"
            );
            let rows = sqlx::query_as::<_, GroupRow>(&sql)
                .bind(limit as i64)
                .fetch_all(&self.pool)
                .await?;
            groups.extend(rows.into_iter().map(|row| row.into_group(status)));
        }

        groups.sort_by_key(|g| g.last_thumbnail_update);
        groups.truncate(limit);
        Ok(groups)
    }

    pub async fn update_group_thumbnails(
        &self,
        thumbnails: &HashMap<SubjectId, String>,
    ) -> Result<()> {
        for (id, url) in thumbnails {
            for (table, _) in GROUP_BUCKETS {
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

    async fn load_reasons(
        &self,
        ids: &[SubjectId],
    ) -> Result<HashMap<SubjectId, Reasons<GroupReasonType>>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let bind_ids: Vec<i64> = ids.iter().map(|id| *id as i64).collect();
        let rows = sqlx::query_as::<_, GroupReasonRow>(
            "SELECT group_id, reason_type, message, confidence, evidence \
             FROM group_reasons WHERE group_id = ANY($1)",
        )
        .bind(&bind_ids)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows_to_reasons(rows))
    }
}

async fn find_group_bucket(
    tx: &mut Transaction<'_, Postgres>,
    id: SubjectId,
) -> Result<Option<(&'static str, SubjectStatus)>> {
    for (table, status) in GROUP_BUCKETS {
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

fn rows_to_reasons(rows: Vec<GroupReasonRow>) -> HashMap<SubjectId, Reasons<GroupReasonType>> {
    let mut map: HashMap<SubjectId, Reasons<GroupReasonType>> = HashMap::new();
    for row in rows {
        let Some(kind) = GroupReasonType::parse(&row.reason_type) else {
            continue;
        };
        map.entry(row.group_id as SubjectId).or_default().add(
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
