//! Legacy-read and target-write clients
//!
//! The engines on either side of the migration are external collaborators;
//! the orchestrators consume them through these traits. In-memory
//! implementations back the tests, sqlx implementations back the binary.

pub mod memory;
pub mod sql;

use std::collections::BTreeMap;

use async_trait::async_trait;
use flowmig_core::{EntityType, LegacyEntity, TargetEntityBuilder, VariableValue};

/// Error type for legacy-side reads; always fatal to the run
#[derive(Debug, thiserror::Error)]
pub enum LegacyError {
    #[error("legacy read failed: {0}")]
    Read(String),
}

/// Error type for target-side writes
#[derive(Debug, thiserror::Error)]
pub enum TargetError {
    /// The target system refused this entity; recorded as a skip
    #[error("{0}")]
    Rejected(String),

    /// The target system is unreachable or misbehaving; fatal to the run
    #[error("target system unavailable: {0}")]
    Unavailable(String),
}

/// Read-only view of the legacy engine
#[async_trait]
pub trait LegacyClient: Send + Sync {
    /// List entities of one type, optionally resuming after a cursor id
    async fn list_entities(
        &self,
        entity_type: EntityType,
        cursor: Option<&str>,
    ) -> Result<Vec<LegacyEntity>, LegacyError>;

    /// Fetch one entity by id
    async fn get_entity(
        &self,
        entity_type: EntityType,
        id: &str,
    ) -> Result<Option<LegacyEntity>, LegacyError>;

    /// Fetch one variable by scope and name
    async fn get_variable(
        &self,
        scope_id: &str,
        name: &str,
    ) -> Result<Option<VariableValue>, LegacyError>;
}

/// Write interface of the target engine
///
/// Every operation must be retry-safe: reprocessing an already-migrated
/// legacy id must never create a duplicate target entity. The engine checks
/// the mapping store before writing, and `find_by_legacy_id` lets it adopt
/// entities created externally while migration runs.
#[async_trait]
pub trait TargetClient: Send + Sync {
    /// Look up an entity by its legacy id
    ///
    /// Not-found is a definitive negative answer (`Ok(None)`), never an
    /// error.
    async fn find_by_legacy_id(
        &self,
        entity_type: EntityType,
        legacy_id: &str,
    ) -> Result<Option<i64>, TargetError>;

    /// Create (or idempotently upsert) one entity, returning its key
    async fn create_entity(&self, builder: &TargetEntityBuilder) -> Result<i64, TargetError>;

    /// Merge variables into an entity's variable map
    ///
    /// Entries already on the scope keep their values unless the map carries
    /// the same name; variables migrated earlier must survive later calls.
    async fn set_variables(
        &self,
        target_key: i64,
        variables: &BTreeMap<String, serde_json::Value>,
    ) -> Result<(), TargetError>;

    /// Mark a migrated task as completed
    async fn complete_task(&self, target_key: i64) -> Result<(), TargetError>;

    /// Cancel a migrated entity
    async fn cancel_entity(&self, target_key: i64) -> Result<(), TargetError>;
}
