//! MappingStore trait definition
//!
//! The mapping store is the only persisted state the migrator owns: one row
//! per `(legacy_id, entity_type)` correlating the legacy identifier with its
//! target key, or holding a skip reason while the key is still null.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use flowmig_core::EntityType;

/// Error type for store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Database error
    #[error("database error: {0}")]
    Database(String),

    /// Stored value could not be decoded
    #[error("corrupt mapping row: {0}")]
    Corrupt(String),
}

/// One row of the mapping table
///
/// `target_key == None` means the entity is currently skipped and will be
/// re-evaluated on retry. Rows are created on the first processing attempt,
/// updated in place afterwards, and never deleted short of a schema drop.
#[derive(Debug, Clone, PartialEq)]
pub struct MappingRecord {
    pub legacy_id: String,
    pub entity_type: EntityType,
    pub target_key: Option<i64>,
    pub create_time: DateTime<Utc>,
    pub skip_reason: Option<String>,
}

impl MappingRecord {
    pub fn is_migrated(&self) -> bool {
        self.target_key.is_some()
    }
}

/// Durable legacy-id to target-key correlation table
///
/// Implementations must uphold monotonic key permanence: once a row holds a
/// non-null target key, no upsert may replace it with null or a different
/// key ("once migrated, always migrated").
#[async_trait]
pub trait MappingStore: Send + Sync {
    /// Atomic, idempotent upsert of one mapping row
    ///
    /// A null `target_key` with a `skip_reason` records a skip; a non-null
    /// key records success and clears the reason. Upserts against an
    /// already-migrated row are silently ignored.
    async fn upsert(
        &self,
        legacy_id: &str,
        entity_type: EntityType,
        target_key: Option<i64>,
        skip_reason: Option<String>,
    ) -> Result<(), StoreError>;

    /// Fetch one mapping row
    async fn get(
        &self,
        legacy_id: &str,
        entity_type: EntityType,
    ) -> Result<Option<MappingRecord>, StoreError>;

    /// Target key for a legacy id, `None` when absent or skipped
    async fn target_key(
        &self,
        legacy_id: &str,
        entity_type: EntityType,
    ) -> Result<Option<i64>, StoreError> {
        Ok(self
            .get(legacy_id, entity_type)
            .await?
            .and_then(|r| r.target_key))
    }

    /// Legacy ids of one type already holding a non-null key
    async fn migrated_ids(&self, entity_type: EntityType) -> Result<HashSet<String>, StoreError>;

    /// Skipped rows of one type, with reasons
    async fn skipped(&self, entity_type: EntityType) -> Result<Vec<MappingRecord>, StoreError>;

    /// Legacy ids of one type currently skipped
    async fn skipped_ids(&self, entity_type: EntityType) -> Result<Vec<String>, StoreError> {
        Ok(self
            .skipped(entity_type)
            .await?
            .into_iter()
            .map(|r| r.legacy_id)
            .collect())
    }

    /// Total skipped rows across all entity types
    async fn count_skipped(&self) -> Result<u64, StoreError>;

    /// Skipped rows of one type
    async fn count_skipped_by_type(&self, entity_type: EntityType) -> Result<u64, StoreError>;

    /// Migrated rows of one type
    async fn count_migrated_by_type(&self, entity_type: EntityType) -> Result<u64, StoreError>;

    /// Create the mapping table if it does not exist
    async fn create_schema(&self) -> Result<(), StoreError>;

    /// Drop the mapping table and everything it tracks
    async fn drop_schema(&self) -> Result<(), StoreError>;
}
