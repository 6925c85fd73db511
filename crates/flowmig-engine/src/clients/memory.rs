//! In-memory clients for testing
//!
//! `InMemoryLegacyClient` serves a mutable set of legacy entities;
//! `InMemoryTargetClient` records writes and supports scripted rejections so
//! tests can drive transient and permanent failures.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use async_trait::async_trait;
use flowmig_core::{EntityType, LegacyEntity, TargetEntityBuilder, VariableValue};
use parking_lot::RwLock;

use super::{LegacyClient, LegacyError, TargetClient, TargetError};

/// In-memory implementation of LegacyClient
pub struct InMemoryLegacyClient {
    entities: RwLock<Vec<LegacyEntity>>,
}

impl InMemoryLegacyClient {
    pub fn new() -> Self {
        Self {
            entities: RwLock::new(Vec::new()),
        }
    }

    pub fn add(&self, entity: LegacyEntity) {
        self.entities.write().push(entity);
    }

    /// Replace an entity in place, e.g. after "fixing" a legacy-side
    /// condition between retry passes
    pub fn replace(&self, entity: LegacyEntity) {
        let mut entities = self.entities.write();
        match entities
            .iter_mut()
            .find(|e| e.id == entity.id && e.entity_type == entity.entity_type)
        {
            Some(slot) => *slot = entity,
            None => entities.push(entity),
        }
    }
}

impl Default for InMemoryLegacyClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LegacyClient for InMemoryLegacyClient {
    async fn list_entities(
        &self,
        entity_type: EntityType,
        cursor: Option<&str>,
    ) -> Result<Vec<LegacyEntity>, LegacyError> {
        let mut matching: Vec<LegacyEntity> = self
            .entities
            .read()
            .iter()
            .filter(|e| e.entity_type == entity_type)
            .filter(|e| cursor.map_or(true, |c| e.id.as_str() > c))
            .cloned()
            .collect();
        matching.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(matching)
    }

    async fn get_entity(
        &self,
        entity_type: EntityType,
        id: &str,
    ) -> Result<Option<LegacyEntity>, LegacyError> {
        Ok(self
            .entities
            .read()
            .iter()
            .find(|e| e.entity_type == entity_type && e.id == id)
            .cloned())
    }

    async fn get_variable(
        &self,
        scope_id: &str,
        name: &str,
    ) -> Result<Option<VariableValue>, LegacyError> {
        Ok(self
            .entities
            .read()
            .iter()
            .filter_map(|e| e.variable.as_ref())
            .find(|v| v.scope_id == scope_id && v.name == name)
            .cloned())
    }
}

struct Rejection {
    reason: String,
    remaining: u32,
}

/// In-memory implementation of TargetClient
///
/// Keys are handed out from a counter; writes are retained for assertions.
pub struct InMemoryTargetClient {
    created: RwLock<BTreeMap<(EntityType, String), TargetEntityBuilder>>,
    keys: RwLock<HashMap<(EntityType, String), i64>>,
    variables: RwLock<HashMap<i64, BTreeMap<String, serde_json::Value>>>,
    completed: RwLock<Vec<i64>>,
    cancelled: RwLock<Vec<i64>>,
    rejections: RwLock<HashMap<String, Rejection>>,
    next_key: AtomicI64,
    create_calls: AtomicU64,
}

impl InMemoryTargetClient {
    pub fn new() -> Self {
        Self {
            created: RwLock::new(BTreeMap::new()),
            keys: RwLock::new(HashMap::new()),
            variables: RwLock::new(HashMap::new()),
            completed: RwLock::new(Vec::new()),
            cancelled: RwLock::new(Vec::new()),
            rejections: RwLock::new(HashMap::new()),
            next_key: AtomicI64::new(1),
            create_calls: AtomicU64::new(0),
        }
    }

    /// Script the next `times` creates of `legacy_id` to be rejected
    pub fn reject(&self, legacy_id: impl Into<String>, reason: impl Into<String>, times: u32) {
        self.rejections.write().insert(
            legacy_id.into(),
            Rejection {
                reason: reason.into(),
                remaining: times,
            },
        );
    }

    /// Seed an entity created by an external writer (no migration involved)
    pub fn insert_external(&self, entity_type: EntityType, legacy_id: impl Into<String>) -> i64 {
        let key = self.next_key.fetch_add(1, Ordering::SeqCst);
        self.keys
            .write()
            .insert((entity_type, legacy_id.into()), key);
        key
    }

    /// Number of successful create calls (for idempotence assertions)
    pub fn create_count(&self) -> u64 {
        self.create_calls.load(Ordering::SeqCst)
    }

    /// Key assigned to a legacy id, if any
    pub fn key_of(&self, entity_type: EntityType, legacy_id: &str) -> Option<i64> {
        self.keys
            .read()
            .get(&(entity_type, legacy_id.to_string()))
            .copied()
    }

    /// Builder recorded for a legacy id, if it went through `create_entity`
    pub fn builder_of(
        &self,
        entity_type: EntityType,
        legacy_id: &str,
    ) -> Option<TargetEntityBuilder> {
        self.created
            .read()
            .get(&(entity_type, legacy_id.to_string()))
            .cloned()
    }

    pub fn variables_of(&self, target_key: i64) -> Option<BTreeMap<String, serde_json::Value>> {
        self.variables.read().get(&target_key).cloned()
    }

    pub fn completed_keys(&self) -> Vec<i64> {
        self.completed.read().clone()
    }

    pub fn cancelled_keys(&self) -> Vec<i64> {
        self.cancelled.read().clone()
    }
}

impl Default for InMemoryTargetClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TargetClient for InMemoryTargetClient {
    async fn find_by_legacy_id(
        &self,
        entity_type: EntityType,
        legacy_id: &str,
    ) -> Result<Option<i64>, TargetError> {
        Ok(self.key_of(entity_type, legacy_id))
    }

    async fn create_entity(&self, builder: &TargetEntityBuilder) -> Result<i64, TargetError> {
        {
            let mut rejections = self.rejections.write();
            if let Some(rejection) = rejections.get_mut(&builder.legacy_id) {
                if rejection.remaining > 0 {
                    rejection.remaining -= 1;
                    return Err(TargetError::Rejected(rejection.reason.clone()));
                }
            }
        }

        let slot = (builder.entity_type, builder.legacy_id.clone());
        let mut keys = self.keys.write();
        let key = match keys.get(&slot) {
            // retry-safe: a second create for the same legacy id returns
            // the existing key instead of duplicating
            Some(existing) => *existing,
            None => {
                let key = self.next_key.fetch_add(1, Ordering::SeqCst);
                keys.insert(slot.clone(), key);
                key
            }
        };
        self.created.write().insert(slot, builder.clone());
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        Ok(key)
    }

    async fn set_variables(
        &self,
        target_key: i64,
        variables: &BTreeMap<String, serde_json::Value>,
    ) -> Result<(), TargetError> {
        self.variables
            .write()
            .entry(target_key)
            .or_default()
            .extend(variables.iter().map(|(k, v)| (k.clone(), v.clone())));
        Ok(())
    }

    async fn complete_task(&self, target_key: i64) -> Result<(), TargetError> {
        self.completed.write().push(target_key);
        Ok(())
    }

    async fn cancel_entity(&self, target_key: i64) -> Result<(), TargetError> {
        self.cancelled.write().push(target_key);
        Ok(())
    }
}
