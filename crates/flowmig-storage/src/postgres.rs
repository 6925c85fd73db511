//! PostgreSQL implementation of MappingStore
//!
//! The table name carries a configurable prefix for multi-tenant
//! deployments, so statements are built at runtime rather than checked at
//! compile time. Monotonic key permanence is enforced in the upsert itself
//! with a conditional `ON CONFLICT` update.

use std::collections::HashSet;

use async_trait::async_trait;
use flowmig_core::EntityType;
use sqlx::postgres::PgRow;
use sqlx::{PgExecutor, PgPool, Row};
use tracing::{debug, error, instrument};

use super::store::{MappingRecord, MappingStore, StoreError};

/// PostgreSQL implementation of MappingStore
///
/// Bound to the migrator pool from the datasource registry so mapping writes
/// share the transaction manager of the target-system writes.
#[derive(Clone)]
pub struct PostgresMappingStore {
    pool: PgPool,
    table: String,
}

impl PostgresMappingStore {
    /// Create a store over the migrator pool with a table-name prefix
    ///
    /// The prefix is interpolated into SQL, so it is restricted to
    /// identifier characters.
    pub fn new(pool: PgPool, table_prefix: &str) -> Result<Self, StoreError> {
        if !table_prefix
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(StoreError::Database(format!(
                "invalid table prefix: {table_prefix:?}"
            )));
        }
        Ok(Self {
            pool,
            table: format!("{table_prefix}mapping_record"),
        })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Upsert one row on a caller-supplied executor
    ///
    /// Passing the transaction from `DataSourceRegistry::begin_migration_tx`
    /// makes the mapping write atomic with the target-system write sharing
    /// that transaction.
    pub async fn upsert_in<'e, E: PgExecutor<'e>>(
        &self,
        executor: E,
        legacy_id: &str,
        entity_type: EntityType,
        target_key: Option<i64>,
        skip_reason: Option<String>,
    ) -> Result<(), StoreError> {
        let sql = format!(
            r#"
            INSERT INTO {t} (legacy_id, entity_type, target_key, create_time, skip_reason)
            VALUES ($1, $2, $3, now(), $4)
            ON CONFLICT (legacy_id, entity_type) DO UPDATE
            SET target_key = EXCLUDED.target_key,
                skip_reason = EXCLUDED.skip_reason
            WHERE {t}.target_key IS NULL
            "#,
            t = self.table
        );
        sqlx::query(&sql)
            .bind(legacy_id)
            .bind(entity_type.as_str())
            .bind(target_key)
            .bind(&skip_reason)
            .execute(executor)
            .await
            .map_err(|e| {
                error!("failed to upsert mapping row: {}", e);
                StoreError::Database(e.to_string())
            })?;

        debug!(%legacy_id, %entity_type, ?target_key, "upserted mapping row");
        Ok(())
    }
}

fn row_to_record(row: PgRow) -> Result<MappingRecord, StoreError> {
    let type_str: String = row.get("entity_type");
    let entity_type = type_str.parse::<EntityType>().map_err(StoreError::Corrupt)?;
    Ok(MappingRecord {
        legacy_id: row.get("legacy_id"),
        entity_type,
        target_key: row.get("target_key"),
        create_time: row.get("create_time"),
        skip_reason: row.get("skip_reason"),
    })
}

#[async_trait]
impl MappingStore for PostgresMappingStore {
    #[instrument(skip(self, skip_reason))]
    async fn upsert(
        &self,
        legacy_id: &str,
        entity_type: EntityType,
        target_key: Option<i64>,
        skip_reason: Option<String>,
    ) -> Result<(), StoreError> {
        self.upsert_in(&self.pool, legacy_id, entity_type, target_key, skip_reason)
            .await
    }

    #[instrument(skip(self))]
    async fn get(
        &self,
        legacy_id: &str,
        entity_type: EntityType,
    ) -> Result<Option<MappingRecord>, StoreError> {
        let sql = format!(
            r#"
            SELECT legacy_id, entity_type, target_key, create_time, skip_reason
            FROM {t}
            WHERE legacy_id = $1 AND entity_type = $2
            "#,
            t = self.table
        );
        let row = sqlx::query(&sql)
            .bind(legacy_id)
            .bind(entity_type.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;

        row.map(row_to_record).transpose()
    }

    #[instrument(skip(self))]
    async fn migrated_ids(&self, entity_type: EntityType) -> Result<HashSet<String>, StoreError> {
        let sql = format!(
            "SELECT legacy_id FROM {t} WHERE entity_type = $1 AND target_key IS NOT NULL",
            t = self.table
        );
        let rows = sqlx::query(&sql)
            .bind(entity_type.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(rows.into_iter().map(|r| r.get("legacy_id")).collect())
    }

    #[instrument(skip(self))]
    async fn skipped(&self, entity_type: EntityType) -> Result<Vec<MappingRecord>, StoreError> {
        let sql = format!(
            r#"
            SELECT legacy_id, entity_type, target_key, create_time, skip_reason
            FROM {t}
            WHERE entity_type = $1 AND target_key IS NULL
            ORDER BY legacy_id
            "#,
            t = self.table
        );
        let rows = sqlx::query(&sql)
            .bind(entity_type.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;

        rows.into_iter().map(row_to_record).collect()
    }

    async fn count_skipped(&self) -> Result<u64, StoreError> {
        let sql = format!(
            "SELECT COUNT(*) AS n FROM {t} WHERE target_key IS NULL",
            t = self.table
        );
        let row = sqlx::query(&sql)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;
        Ok(row.get::<i64, _>("n") as u64)
    }

    async fn count_skipped_by_type(&self, entity_type: EntityType) -> Result<u64, StoreError> {
        let sql = format!(
            "SELECT COUNT(*) AS n FROM {t} WHERE entity_type = $1 AND target_key IS NULL",
            t = self.table
        );
        let row = sqlx::query(&sql)
            .bind(entity_type.as_str())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;
        Ok(row.get::<i64, _>("n") as u64)
    }

    async fn count_migrated_by_type(&self, entity_type: EntityType) -> Result<u64, StoreError> {
        let sql = format!(
            "SELECT COUNT(*) AS n FROM {t} WHERE entity_type = $1 AND target_key IS NOT NULL",
            t = self.table
        );
        let row = sqlx::query(&sql)
            .bind(entity_type.as_str())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;
        Ok(row.get::<i64, _>("n") as u64)
    }

    #[instrument(skip(self))]
    async fn create_schema(&self) -> Result<(), StoreError> {
        let sql = format!(
            r#"
            CREATE TABLE IF NOT EXISTS {t} (
                legacy_id   TEXT        NOT NULL,
                entity_type TEXT        NOT NULL,
                target_key  BIGINT,
                create_time TIMESTAMPTZ NOT NULL DEFAULT now(),
                skip_reason TEXT,
                PRIMARY KEY (legacy_id, entity_type)
            )
            "#,
            t = self.table
        );
        sqlx::query(&sql)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;
        debug!(table = %self.table, "ensured mapping schema");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn drop_schema(&self) -> Result<(), StoreError> {
        let sql = format!("DROP TABLE IF EXISTS {t}", t = self.table);
        sqlx::query(&sql)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;
        debug!(table = %self.table, "dropped mapping schema");
        Ok(())
    }
}
