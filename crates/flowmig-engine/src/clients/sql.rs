//! sqlx reference clients
//!
//! `PgLegacyClient` reads the legacy engine's export tables (one table per
//! entity type, named after the type with a configurable prefix).
//! `PgTargetClient` writes to a relational target engine through the
//! migrator pool, so target writes and mapping writes can share a
//! transaction manager.

use std::collections::BTreeMap;

use async_trait::async_trait;
use flowmig_core::{EntityType, LegacyEntity, TargetEntityBuilder, VariableKind, VariableValue};
use sqlx::postgres::PgRow;
use sqlx::{PgExecutor, PgPool, Row};
use tracing::{debug, instrument};

use super::{LegacyClient, LegacyError, TargetClient, TargetError};

fn validate_prefix(prefix: &str) -> Result<(), String> {
    if prefix
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        Ok(())
    } else {
        Err(format!("invalid table prefix: {prefix:?}"))
    }
}

/// Legacy engine reads over sqlx
pub struct PgLegacyClient {
    pool: PgPool,
    table_prefix: String,
}

impl PgLegacyClient {
    pub fn new(pool: PgPool, table_prefix: &str) -> Result<Self, LegacyError> {
        validate_prefix(table_prefix).map_err(LegacyError::Read)?;
        Ok(Self {
            pool,
            table_prefix: table_prefix.to_string(),
        })
    }

    fn table_for(&self, entity_type: EntityType) -> String {
        format!("{}{}", self.table_prefix, entity_type.as_str())
    }

    fn entity_from_row(entity_type: EntityType, row: &PgRow) -> Result<LegacyEntity, LegacyError> {
        let attributes: Option<serde_json::Value> = row.try_get("attributes").ok().flatten();
        let mut entity = LegacyEntity::new(row.get::<String, _>("id"), entity_type);
        entity.tenant_id = row.get("tenant_id");
        entity.name = row.get("name");
        entity.parent_id = row.get("parent_id");
        if let Some(serde_json::Value::Object(map)) = attributes {
            entity.attributes = map;
        }

        if entity_type == EntityType::Variable {
            let kind_str: String = row.get("var_kind");
            let kind = kind_str
                .parse::<VariableKind>()
                .map_err(LegacyError::Read)?;
            entity.variable = Some(VariableValue::new(
                row.get::<String, _>("var_name"),
                kind,
                row.get("var_value"),
                row.get::<String, _>("scope_id"),
            ));
        }
        Ok(entity)
    }

    fn columns_for(entity_type: EntityType) -> &'static str {
        if entity_type == EntityType::Variable {
            "id, tenant_id, name, parent_id, attributes, var_name, var_kind, var_value, scope_id"
        } else {
            "id, tenant_id, name, parent_id, attributes"
        }
    }
}

#[async_trait]
impl LegacyClient for PgLegacyClient {
    #[instrument(skip(self))]
    async fn list_entities(
        &self,
        entity_type: EntityType,
        cursor: Option<&str>,
    ) -> Result<Vec<LegacyEntity>, LegacyError> {
        let columns = Self::columns_for(entity_type);
        let table = self.table_for(entity_type);
        let rows = match cursor {
            Some(cursor) => {
                let sql = format!("SELECT {columns} FROM {table} WHERE id > $1 ORDER BY id");
                sqlx::query(&sql).bind(cursor).fetch_all(&self.pool).await
            }
            None => {
                let sql = format!("SELECT {columns} FROM {table} ORDER BY id");
                sqlx::query(&sql).fetch_all(&self.pool).await
            }
        }
        .map_err(|e| LegacyError::Read(e.to_string()))?;

        debug!(%entity_type, count = rows.len(), "listed legacy entities");
        rows.iter()
            .map(|row| Self::entity_from_row(entity_type, row))
            .collect()
    }

    #[instrument(skip(self))]
    async fn get_entity(
        &self,
        entity_type: EntityType,
        id: &str,
    ) -> Result<Option<LegacyEntity>, LegacyError> {
        let sql = format!(
            "SELECT {columns} FROM {table} WHERE id = $1",
            columns = Self::columns_for(entity_type),
            table = self.table_for(entity_type),
        );
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| LegacyError::Read(e.to_string()))?;

        row.map(|row| Self::entity_from_row(entity_type, &row))
            .transpose()
    }

    #[instrument(skip(self))]
    async fn get_variable(
        &self,
        scope_id: &str,
        name: &str,
    ) -> Result<Option<VariableValue>, LegacyError> {
        let sql = format!(
            "SELECT var_name, var_kind, var_value, scope_id FROM {table} WHERE scope_id = $1 AND var_name = $2",
            table = self.table_for(EntityType::Variable),
        );
        let row = sqlx::query(&sql)
            .bind(scope_id)
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| LegacyError::Read(e.to_string()))?;

        row.map(|row| {
            let kind_str: String = row.get("var_kind");
            let kind = kind_str
                .parse::<VariableKind>()
                .map_err(LegacyError::Read)?;
            Ok(VariableValue::new(
                row.get::<String, _>("var_name"),
                kind,
                row.get("var_value"),
                row.get::<String, _>("scope_id"),
            ))
        })
        .transpose()
    }
}

/// Relational target engine writes over sqlx
///
/// One entity table keyed by a bigserial; `(entity_type, legacy_id)` is
/// unique so creates are idempotent upserts.
#[derive(Clone)]
pub struct PgTargetClient {
    pool: PgPool,
    table: String,
}

impl PgTargetClient {
    pub fn new(pool: PgPool, table_prefix: &str) -> Result<Self, TargetError> {
        validate_prefix(table_prefix).map_err(TargetError::Unavailable)?;
        Ok(Self {
            pool,
            table: format!("{table_prefix}target_entity"),
        })
    }

    /// Ensure the reference target table exists
    pub async fn create_schema(&self) -> Result<(), TargetError> {
        let sql = format!(
            r#"
            CREATE TABLE IF NOT EXISTS {t} (
                key         BIGSERIAL PRIMARY KEY,
                entity_type TEXT  NOT NULL,
                legacy_id   TEXT  NOT NULL,
                tenant_id   TEXT,
                name        TEXT,
                parent_key  BIGINT,
                state       TEXT  NOT NULL DEFAULT 'active',
                variables   JSONB NOT NULL DEFAULT '{{}}',
                attributes  JSONB NOT NULL DEFAULT '{{}}',
                UNIQUE (entity_type, legacy_id)
            )
            "#,
            t = self.table
        );
        sqlx::query(&sql)
            .execute(&self.pool)
            .await
            .map_err(|e| TargetError::Unavailable(e.to_string()))?;
        Ok(())
    }

    /// Create one entity on a caller-supplied executor
    ///
    /// Passing a transaction lets the caller commit this write together with
    /// the mapping upsert sharing that transaction.
    pub async fn create_entity_in<'e, E: PgExecutor<'e>>(
        &self,
        executor: E,
        builder: &TargetEntityBuilder,
    ) -> Result<i64, TargetError> {
        let variables = serde_json::to_value(&builder.variables)
            .map_err(|e| TargetError::Rejected(format!("unserializable variables: {e}")))?;
        let sql = format!(
            r#"
            INSERT INTO {t} (entity_type, legacy_id, tenant_id, name, parent_key, variables, attributes)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (entity_type, legacy_id) DO UPDATE
            SET tenant_id = EXCLUDED.tenant_id,
                name = EXCLUDED.name,
                parent_key = EXCLUDED.parent_key,
                variables = EXCLUDED.variables,
                attributes = EXCLUDED.attributes
            RETURNING key
            "#,
            t = self.table
        );
        let row = sqlx::query(&sql)
            .bind(builder.entity_type.as_str())
            .bind(&builder.legacy_id)
            .bind(&builder.tenant_id)
            .bind(&builder.name)
            .bind(builder.parent_key)
            .bind(&variables)
            .bind(serde_json::Value::Object(builder.attributes.clone()))
            .fetch_one(executor)
            .await
            .map_err(Self::map_write_error)?;

        let key: i64 = row.get("key");
        debug!(key, "created target entity");
        Ok(key)
    }

    fn map_write_error(e: sqlx::Error) -> TargetError {
        match &e {
            // constraint violations are the target refusing the data
            sqlx::Error::Database(db) if db.constraint().is_some() => {
                TargetError::Rejected(db.message().to_string())
            }
            _ => TargetError::Unavailable(e.to_string()),
        }
    }
}

#[async_trait]
impl TargetClient for PgTargetClient {
    #[instrument(skip(self))]
    async fn find_by_legacy_id(
        &self,
        entity_type: EntityType,
        legacy_id: &str,
    ) -> Result<Option<i64>, TargetError> {
        let sql = format!(
            "SELECT key FROM {t} WHERE entity_type = $1 AND legacy_id = $2",
            t = self.table
        );
        let row = sqlx::query(&sql)
            .bind(entity_type.as_str())
            .bind(legacy_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| TargetError::Unavailable(e.to_string()))?;

        // absent row is a definitive negative answer
        Ok(row.map(|r| r.get("key")))
    }

    #[instrument(skip(self, builder), fields(legacy_id = %builder.legacy_id))]
    async fn create_entity(&self, builder: &TargetEntityBuilder) -> Result<i64, TargetError> {
        self.create_entity_in(&self.pool, builder).await
    }

    async fn set_variables(
        &self,
        target_key: i64,
        variables: &BTreeMap<String, serde_json::Value>,
    ) -> Result<(), TargetError> {
        let variables = serde_json::to_value(variables)
            .map_err(|e| TargetError::Rejected(format!("unserializable variables: {e}")))?;
        // merge into the scope's map; each variable entity carries only its
        // own entry and must not clobber siblings migrated earlier
        let sql = format!(
            "UPDATE {t} SET variables = variables || $1 WHERE key = $2",
            t = self.table
        );
        sqlx::query(&sql)
            .bind(&variables)
            .bind(target_key)
            .execute(&self.pool)
            .await
            .map_err(Self::map_write_error)?;
        Ok(())
    }

    async fn complete_task(&self, target_key: i64) -> Result<(), TargetError> {
        let sql = format!(
            "UPDATE {t} SET state = 'completed' WHERE key = $1",
            t = self.table
        );
        sqlx::query(&sql)
            .bind(target_key)
            .execute(&self.pool)
            .await
            .map_err(Self::map_write_error)?;
        Ok(())
    }

    async fn cancel_entity(&self, target_key: i64) -> Result<(), TargetError> {
        let sql = format!(
            "UPDATE {t} SET state = 'cancelled' WHERE key = $1",
            t = self.table
        );
        sqlx::query(&sql)
            .bind(target_key)
            .execute(&self.pool)
            .await
            .map_err(Self::map_write_error)?;
        Ok(())
    }
}
