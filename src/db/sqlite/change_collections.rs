use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};

use crate::{
    db::{
        error::{DbError, DbResult},
        repos::{ChangeCollectionRepo, TenantRegistry},
    },
    models::{ChangeDocument, OperationType, TenantId},
};

/// SQLite-backed change collections.
///
/// Wall times are stored as nanoseconds since the Unix epoch, the full
/// precision of `DateTime<Utc>`, so the expiry filter is an integer range scan
/// over the `(tenant_id, wall_time_ns)` index and agrees exactly with a direct
/// comparison of wall times. Documents must fall between 1677 and 2262.
pub struct SqliteChangeCollectionRepo {
    pool: SqlitePool,
}

impl SqliteChangeCollectionRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn parse_tenant(s: String) -> DbResult<TenantId> {
        s.parse().map_err(DbError::Internal)
    }

    fn wall_time_nanos(wall_time: DateTime<Utc>) -> DbResult<i64> {
        wall_time
            .timestamp_nanos_opt()
            .ok_or_else(|| DbError::Internal(format!("Wall time out of range: {}", wall_time)))
    }

    /// Cutoff as stored nanoseconds, clamped to the representable range.
    fn cutoff_nanos(cutoff: DateTime<Utc>) -> i64 {
        match cutoff.timestamp_nanos_opt() {
            Some(nanos) => nanos,
            // Before every storable wall time, so nothing matches
            None if cutoff < DateTime::<Utc>::UNIX_EPOCH => i64::MIN,
            None => i64::MAX,
        }
    }

    fn parse_document(row: &sqlx::sqlite::SqliteRow) -> DbResult<ChangeDocument> {
        let op: String = row.get("op");
        let payload: String = row.get("payload");
        Ok(ChangeDocument {
            operation: op.parse::<OperationType>().map_err(DbError::Internal)?,
            namespace: row.get("ns"),
            payload: serde_json::from_str(&payload)?,
            wall_time: DateTime::<Utc>::from_timestamp_nanos(row.get("wall_time_ns")),
        })
    }

    async fn ensure_exists(&self, tenant: &TenantId) -> DbResult<()> {
        if self.collection_exists(tenant).await? {
            Ok(())
        } else {
            Err(DbError::CollectionNotFound(tenant.clone()))
        }
    }
}

#[async_trait]
impl TenantRegistry for SqliteChangeCollectionRepo {
    async fn list_tenants(&self) -> DbResult<BTreeSet<TenantId>> {
        let rows = sqlx::query("SELECT tenant_id FROM change_collections")
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter()
            .map(|row| Self::parse_tenant(row.get("tenant_id")))
            .collect()
    }
}

#[async_trait]
impl ChangeCollectionRepo for SqliteChangeCollectionRepo {
    async fn create_collection(&self, tenant: &TenantId) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO change_collections (tenant_id)
            VALUES (?)
            ON CONFLICT (tenant_id) DO NOTHING
            "#,
        )
        .bind(tenant.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn drop_collection(&self, tenant: &TenantId) -> DbResult<bool> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM change_collection_entries WHERE tenant_id = ?")
            .bind(tenant.as_str())
            .execute(&mut *tx)
            .await?;

        let result = sqlx::query("DELETE FROM change_collections WHERE tenant_id = ?")
            .bind(tenant.as_str())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(result.rows_affected() > 0)
    }

    async fn insert(&self, tenant: &TenantId, document: ChangeDocument) -> DbResult<()> {
        let payload = serde_json::to_string(&document.payload)?;
        let wall_time_ns = Self::wall_time_nanos(document.wall_time)?;

        // Conditional insert so a concurrently dropped collection never gains orphan rows
        let result = sqlx::query(
            r#"
            INSERT INTO change_collection_entries (tenant_id, op, ns, payload, wall_time_ns)
            SELECT ?, ?, ?, ?, ?
            WHERE EXISTS (SELECT 1 FROM change_collections WHERE tenant_id = ?)
            "#,
        )
        .bind(tenant.as_str())
        .bind(document.operation.to_string())
        .bind(&document.namespace)
        .bind(payload)
        .bind(wall_time_ns)
        .bind(tenant.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::CollectionNotFound(tenant.clone()));
        }
        Ok(())
    }

    async fn list_documents(&self, tenant: &TenantId) -> DbResult<Option<Vec<ChangeDocument>>> {
        if !self.collection_exists(tenant).await? {
            return Ok(None);
        }

        let rows = sqlx::query(
            r#"
            SELECT op, ns, payload, wall_time_ns
            FROM change_collection_entries
            WHERE tenant_id = ?
            ORDER BY wall_time_ns ASC, id ASC
            "#,
        )
        .bind(tenant.as_str())
        .fetch_all(&self.pool)
        .await?;

        let documents = rows
            .iter()
            .map(Self::parse_document)
            .collect::<DbResult<Vec<_>>>()?;
        Ok(Some(documents))
    }

    async fn collection_exists(&self, tenant: &TenantId) -> DbResult<bool> {
        let row = sqlx::query("SELECT 1 FROM change_collections WHERE tenant_id = ?")
            .bind(tenant.as_str())
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.is_some())
    }

    async fn count_expired(&self, tenant: &TenantId, cutoff: DateTime<Utc>) -> DbResult<u64> {
        self.ensure_exists(tenant).await?;

        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS count
            FROM change_collection_entries
            WHERE tenant_id = ? AND wall_time_ns <= ?
            "#,
        )
        .bind(tenant.as_str())
        .bind(Self::cutoff_nanos(cutoff))
        .fetch_one(&self.pool)
        .await?;

        let count: i64 = row.get("count");
        Ok(count as u64)
    }

    async fn delete_expired(
        &self,
        tenant: &TenantId,
        cutoff: DateTime<Utc>,
        limit: u64,
    ) -> DbResult<u64> {
        self.ensure_exists(tenant).await?;

        let limit = i64::try_from(limit).unwrap_or(i64::MAX);

        // Delete a batch using subquery to select the oldest IDs
        let result = sqlx::query(
            r#"
            DELETE FROM change_collection_entries
            WHERE id IN (
                SELECT id FROM change_collection_entries
                WHERE tenant_id = ? AND wall_time_ns <= ?
                ORDER BY wall_time_ns ASC, id ASC
                LIMIT ?
            )
            "#,
        )
        .bind(tenant.as_str())
        .bind(Self::cutoff_nanos(cutoff))
        .bind(limit)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}
