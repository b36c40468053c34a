use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use crate::db::{
    error::DbResult,
    repos::{CHANGE_STREAMS_PARAMETER, ChangeStreamsParameter, ClusterParameterRepo},
};

pub struct SqliteClusterParameterRepo {
    pool: SqlitePool,
}

impl SqliteClusterParameterRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Read the `changeStreams` parameter.
    ///
    /// A missing row or a value that does not parse reads as unset.
    pub async fn change_streams(&self) -> DbResult<ChangeStreamsParameter> {
        let row = sqlx::query("SELECT value FROM cluster_parameters WHERE name = ?")
            .bind(CHANGE_STREAMS_PARAMETER)
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(ChangeStreamsParameter::default());
        };

        let value: String = row.get("value");
        match serde_json::from_str(&value) {
            Ok(param) => Ok(param),
            Err(e) => {
                tracing::warn!(
                    parameter = CHANGE_STREAMS_PARAMETER,
                    error = %e,
                    "Ignoring malformed cluster parameter"
                );
                Ok(ChangeStreamsParameter::default())
            }
        }
    }

    /// Write the `changeStreams` parameter, replacing any previous value.
    pub async fn set_change_streams(&self, param: &ChangeStreamsParameter) -> DbResult<()> {
        let value = serde_json::to_string(param)?;

        sqlx::query(
            r#"
            INSERT INTO cluster_parameters (name, value, updated_at)
            VALUES (?, ?, CURRENT_TIMESTAMP)
            ON CONFLICT (name) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(CHANGE_STREAMS_PARAMETER)
        .bind(value)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl ClusterParameterRepo for SqliteClusterParameterRepo {
    async fn expire_after_seconds(&self) -> DbResult<Option<i64>> {
        Ok(self.change_streams().await?.expire_after_seconds)
    }
}
