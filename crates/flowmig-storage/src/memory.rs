//! In-memory implementation of MappingStore for testing

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::Utc;
use flowmig_core::EntityType;
use parking_lot::RwLock;

use super::store::{MappingRecord, MappingStore, StoreError};

/// In-memory implementation of MappingStore
///
/// Primarily for tests; provides the same semantics as the PostgreSQL
/// implementation, including monotonic key permanence via check-then-write.
pub struct InMemoryMappingStore {
    records: RwLock<HashMap<(String, EntityType), MappingRecord>>,
}

impl InMemoryMappingStore {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
        }
    }

    /// Total number of rows (for test assertions)
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

impl Default for InMemoryMappingStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MappingStore for InMemoryMappingStore {
    async fn upsert(
        &self,
        legacy_id: &str,
        entity_type: EntityType,
        target_key: Option<i64>,
        skip_reason: Option<String>,
    ) -> Result<(), StoreError> {
        let mut records = self.records.write();
        let key = (legacy_id.to_string(), entity_type);
        match records.get_mut(&key) {
            Some(existing) if existing.target_key.is_some() => {
                // once migrated, always migrated
            }
            Some(existing) => {
                existing.target_key = target_key;
                existing.skip_reason = skip_reason;
            }
            None => {
                records.insert(
                    key,
                    MappingRecord {
                        legacy_id: legacy_id.to_string(),
                        entity_type,
                        target_key,
                        create_time: Utc::now(),
                        skip_reason,
                    },
                );
            }
        }
        Ok(())
    }

    async fn get(
        &self,
        legacy_id: &str,
        entity_type: EntityType,
    ) -> Result<Option<MappingRecord>, StoreError> {
        Ok(self
            .records
            .read()
            .get(&(legacy_id.to_string(), entity_type))
            .cloned())
    }

    async fn migrated_ids(&self, entity_type: EntityType) -> Result<HashSet<String>, StoreError> {
        Ok(self
            .records
            .read()
            .values()
            .filter(|r| r.entity_type == entity_type && r.target_key.is_some())
            .map(|r| r.legacy_id.clone())
            .collect())
    }

    async fn skipped(&self, entity_type: EntityType) -> Result<Vec<MappingRecord>, StoreError> {
        let mut rows: Vec<MappingRecord> = self
            .records
            .read()
            .values()
            .filter(|r| r.entity_type == entity_type && r.target_key.is_none())
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.legacy_id.cmp(&b.legacy_id));
        Ok(rows)
    }

    async fn count_skipped(&self) -> Result<u64, StoreError> {
        Ok(self
            .records
            .read()
            .values()
            .filter(|r| r.target_key.is_none())
            .count() as u64)
    }

    async fn count_skipped_by_type(&self, entity_type: EntityType) -> Result<u64, StoreError> {
        Ok(self
            .records
            .read()
            .values()
            .filter(|r| r.entity_type == entity_type && r.target_key.is_none())
            .count() as u64)
    }

    async fn count_migrated_by_type(&self, entity_type: EntityType) -> Result<u64, StoreError> {
        Ok(self
            .records
            .read()
            .values()
            .filter(|r| r.entity_type == entity_type && r.target_key.is_some())
            .count() as u64)
    }

    async fn create_schema(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn drop_schema(&self) -> Result<(), StoreError> {
        self.records.write().clear();
        Ok(())
    }
}
