//! Transactional target-write + mapping-write unit
//!
//! In the reference SQL deployment the target table and the mapping table
//! live behind the same migrator pool, so one transaction can cover the
//! entity create and its success mapping row. The orchestrator prefers this
//! seam whenever it is wired in; without it the two writes are independent
//! statements and idempotent retry covers the gap (external target APIs
//! cannot share a SQL transaction).

use async_trait::async_trait;
use flowmig_core::TargetEntityBuilder;
use flowmig_storage::{PostgresMappingStore, StoreError};
use sqlx::PgPool;
use tracing::debug;

use crate::clients::sql::PgTargetClient;
use crate::migrator::MigrationError;

/// Creates a target entity and records its mapping as one unit
#[async_trait]
pub trait AtomicMigration: Send + Sync {
    /// Write the entity and its success mapping row; both commit or neither
    async fn create_and_map(&self, builder: &TargetEntityBuilder) -> Result<i64, MigrationError>;
}

/// Transactional implementation over the migrator pool
pub struct PgAtomicMigration {
    pool: PgPool,
    target: PgTargetClient,
    store: PostgresMappingStore,
}

impl PgAtomicMigration {
    pub fn new(pool: PgPool, target: PgTargetClient, store: PostgresMappingStore) -> Self {
        Self {
            pool,
            target,
            store,
        }
    }
}

#[async_trait]
impl AtomicMigration for PgAtomicMigration {
    async fn create_and_map(&self, builder: &TargetEntityBuilder) -> Result<i64, MigrationError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;
        let key = self
            .target
            .create_entity_in(&mut *tx, builder)
            .await
            .map_err(|e| MigrationError::from_target(&builder.legacy_id, e))?;
        self.store
            .upsert_in(
                &mut *tx,
                &builder.legacy_id,
                builder.entity_type,
                Some(key),
                None,
            )
            .await?;
        tx.commit()
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;
        debug!(legacy_id = %builder.legacy_id, key, "committed target write with mapping");
        Ok(key)
    }
}
