//! Datasource and transaction registry
//!
//! Two configuration shapes:
//!
//! - legacy-only: one physical database serves legacy reads and migration
//!   writes, but through two separate pools so a long migration-write
//!   transaction never blocks, or is blocked by, concurrent legacy reads,
//!   and rollback of a failed migration write cannot touch an in-flight
//!   read.
//! - legacy + target: legacy reads keep their pool; migration-mapping writes
//!   and target-system writes share the pool bound to the target database,
//!   so a target write and its mapping write commit or roll back together.
//!
//! Built once at startup, torn down explicitly with `close`.

use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::{debug, info};

use super::store::StoreError;

const MAX_CONNECTIONS: u32 = 5;

/// Process-wide datasource registry
pub struct DataSourceRegistry {
    legacy: PgPool,
    migrator: PgPool,
    has_target: bool,
}

impl DataSourceRegistry {
    /// Connect the pools for the configured shape
    ///
    /// Without a target URL the migrator pool is a second pool over the
    /// legacy database (separate transaction manager, same datasource).
    pub async fn connect(
        legacy_url: &str,
        target_url: Option<&str>,
    ) -> Result<Self, StoreError> {
        let legacy = PgPoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .connect(legacy_url)
            .await
            .map_err(|e| StoreError::Database(format!("legacy datasource: {e}")))?;

        let (migrator, has_target) = match target_url {
            Some(url) => {
                let pool = PgPoolOptions::new()
                    .max_connections(MAX_CONNECTIONS)
                    .connect(url)
                    .await
                    .map_err(|e| StoreError::Database(format!("target datasource: {e}")))?;
                (pool, true)
            }
            None => {
                let pool = PgPoolOptions::new()
                    .max_connections(MAX_CONNECTIONS)
                    .connect(legacy_url)
                    .await
                    .map_err(|e| StoreError::Database(format!("migrator datasource: {e}")))?;
                (pool, false)
            }
        };

        info!(has_target, "datasource registry connected");
        Ok(Self {
            legacy,
            migrator,
            has_target,
        })
    }

    /// Pool dedicated to legacy reads
    pub fn legacy_pool(&self) -> &PgPool {
        &self.legacy
    }

    /// Pool for migration-mapping writes and target-system writes
    pub fn migrator_pool(&self) -> &PgPool {
        &self.migrator
    }

    /// Target pool when the dual-datasource shape is configured
    pub fn target_pool(&self) -> Option<&PgPool> {
        self.has_target.then_some(&self.migrator)
    }

    pub fn has_target_datasource(&self) -> bool {
        self.has_target
    }

    /// Begin a migration-write transaction (transaction template analog)
    ///
    /// Target writes and mapping upserts bound to this transaction commit or
    /// roll back as one unit.
    pub async fn begin_migration_tx(&self) -> Result<Transaction<'static, Postgres>, StoreError> {
        self.migrator
            .begin()
            .await
            .map_err(|e| StoreError::Database(e.to_string()))
    }

    /// Close both pools
    ///
    /// Idempotent; safe to call multiple times. Pooled connections are
    /// released deterministically before return.
    pub async fn close(&self) {
        if self.legacy.is_closed() && self.migrator.is_closed() {
            return;
        }
        self.legacy.close().await;
        self.migrator.close().await;
        debug!("datasource registry closed");
    }

    pub fn is_closed(&self) -> bool {
        self.legacy.is_closed() && self.migrator.is_closed()
    }
}
