//! Per-entity-type migration orchestrator
//!
//! Drives the fetch -> convert -> write -> mark loop for one entity type.
//! Recoverable failures (interceptor chain, validation, target rejection)
//! are recorded as skips and never abort the batch; anything else is fatal
//! to the run since it signals an environment problem rather than a data
//! problem.

use std::sync::Arc;

use flowmig_core::{ConversionError, ConversionService, EntityType, LegacyEntity};
use flowmig_storage::{MappingRecord, MappingStore, StoreError};
use tracing::{debug, info, instrument, warn};

use crate::atomic::AtomicMigration;
use crate::clients::{LegacyClient, LegacyError, TargetClient, TargetError};
use crate::validate::{check_constructs, ValidationError};

/// Errors from migration processing
#[derive(Debug, thiserror::Error)]
pub enum MigrationError {
    /// Interceptor chain failure, deliberate or unexpected (recoverable)
    #[error(transparent)]
    Conversion(#[from] ConversionError),

    /// Pre-write business-rule failure (recoverable)
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The target system refused the entity (recoverable)
    #[error("target rejected '{legacy_id}': {reason}")]
    TargetRejected { legacy_id: String, reason: String },

    /// No interceptor produced a target builder (recoverable)
    #[error("no interceptor produced a target builder for '{0}'")]
    NoBuilder(String),

    /// Mapping store failure (fatal)
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Legacy read failure (fatal)
    #[error(transparent)]
    Legacy(#[from] LegacyError),

    /// Target system unreachable (fatal)
    #[error("target system unavailable: {0}")]
    TargetUnavailable(String),
}

impl MigrationError {
    /// Skip reason when this failure is recoverable at the per-entity level
    ///
    /// `None` means the failure is fatal to the whole run.
    pub fn skip_reason(&self) -> Option<String> {
        match self {
            MigrationError::Conversion(e) => Some(e.to_string()),
            MigrationError::Validation(e) => Some(e.to_string()),
            MigrationError::TargetRejected { reason, .. } => Some(reason.clone()),
            MigrationError::NoBuilder(_) => Some(self.to_string()),
            MigrationError::Store(_)
            | MigrationError::Legacy(_)
            | MigrationError::TargetUnavailable(_) => None,
        }
    }

    pub(crate) fn from_target(legacy_id: &str, err: TargetError) -> Self {
        match err {
            TargetError::Rejected(reason) => MigrationError::TargetRejected {
                legacy_id: legacy_id.to_string(),
                reason,
            },
            TargetError::Unavailable(msg) => MigrationError::TargetUnavailable(msg),
        }
    }
}

/// Counters for one pass over one entity type
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MigrationStats {
    pub migrated: u64,
    pub skipped: u64,
}

impl MigrationStats {
    pub fn absorb(&mut self, other: MigrationStats) {
        self.migrated += other.migrated;
        self.skipped += other.skipped;
    }
}

/// Explicitly constructed, explicitly scoped bundle of collaborators
///
/// Replaces process-wide singletons; built once at startup and passed by
/// reference into the orchestrators.
pub struct MigrationContext {
    pub store: Arc<dyn MappingStore>,
    pub legacy: Arc<dyn LegacyClient>,
    pub target: Arc<dyn TargetClient>,
    pub converter: Arc<ConversionService>,
    /// Transactional create-plus-mapping seam; used instead of the plain
    /// `create_entity` path when the target shares the migrator pool
    pub atomic: Option<Arc<dyn AtomicMigration>>,
}

impl MigrationContext {
    pub fn new(
        store: Arc<dyn MappingStore>,
        legacy: Arc<dyn LegacyClient>,
        target: Arc<dyn TargetClient>,
        converter: Arc<ConversionService>,
    ) -> Self {
        Self {
            store,
            legacy,
            target,
            converter,
            atomic: None,
        }
    }

    pub fn with_atomic(mut self, atomic: Arc<dyn AtomicMigration>) -> Self {
        self.atomic = Some(atomic);
        self
    }
}

/// Migrates entities of one type, sequentially
pub struct EntityMigrator<'a> {
    ctx: &'a MigrationContext,
    entity_type: EntityType,
}

impl<'a> EntityMigrator<'a> {
    pub fn new(ctx: &'a MigrationContext, entity_type: EntityType) -> Self {
        Self { ctx, entity_type }
    }

    /// Process all legacy entities of this type not yet migrated
    #[instrument(skip(self), fields(entity_type = %self.entity_type))]
    pub async fn migrate(&self) -> Result<MigrationStats, MigrationError> {
        let migrated = self.ctx.store.migrated_ids(self.entity_type).await?;
        let entities = self
            .ctx
            .legacy
            .list_entities(self.entity_type, None)
            .await?;

        let mut stats = MigrationStats::default();
        for entity in entities {
            if migrated.contains(&entity.id) {
                debug!(legacy_id = %entity.id, "already migrated, skipping");
                continue;
            }
            self.process(entity, &mut stats).await?;
        }
        info!(
            migrated = stats.migrated,
            skipped = stats.skipped,
            "finished migrate pass"
        );
        Ok(stats)
    }

    /// Reprocess only the entities previously recorded as skipped
    #[instrument(skip(self), fields(entity_type = %self.entity_type))]
    pub async fn retry_skipped(&self) -> Result<MigrationStats, MigrationError> {
        let ids = self.ctx.store.skipped_ids(self.entity_type).await?;

        let mut stats = MigrationStats::default();
        for id in ids {
            match self.ctx.legacy.get_entity(self.entity_type, &id).await? {
                Some(entity) => self.process(entity, &mut stats).await?,
                None => {
                    warn!(legacy_id = %id, "skipped entity vanished from the legacy engine");
                    self.ctx
                        .store
                        .upsert(
                            &id,
                            self.entity_type,
                            None,
                            Some("legacy entity no longer exists".to_string()),
                        )
                        .await?;
                    stats.skipped += 1;
                }
            }
        }
        info!(
            migrated = stats.migrated,
            skipped = stats.skipped,
            "finished retry pass"
        );
        Ok(stats)
    }

    /// Read-only report of skipped entities with reasons
    pub async fn list_skipped(&self) -> Result<Vec<MappingRecord>, MigrationError> {
        Ok(self.ctx.store.skipped(self.entity_type).await?)
    }

    /// One entity's unit of work plus its mapping bookkeeping
    ///
    /// The skip record is written after the failed unit, independently of
    /// it, so skip bookkeeping survives the rollback of the business write.
    async fn process(
        &self,
        entity: LegacyEntity,
        stats: &mut MigrationStats,
    ) -> Result<(), MigrationError> {
        let legacy_id = entity.id.clone();
        match self.migrate_one(&entity).await {
            Ok(target_key) => {
                self.ctx
                    .store
                    .upsert(&legacy_id, self.entity_type, Some(target_key), None)
                    .await?;
                stats.migrated += 1;
                debug!(%legacy_id, target_key, "migrated entity");
                Ok(())
            }
            Err(err) => match err.skip_reason() {
                Some(reason) => {
                    warn!(%legacy_id, %reason, "skipping entity");
                    self.ctx
                        .store
                        .upsert(&legacy_id, self.entity_type, None, Some(reason))
                        .await?;
                    stats.skipped += 1;
                    Ok(())
                }
                None => Err(err),
            },
        }
    }

    /// Validate, convert and write one entity, returning its target key
    async fn migrate_one(&self, entity: &LegacyEntity) -> Result<i64, MigrationError> {
        check_constructs(entity)?;
        let parent_key = self.resolve_parent(entity).await?;

        let mut conversion = self.ctx.converter.convert(entity.clone())?;
        let mut builder = conversion
            .builder
            .take()
            .ok_or_else(|| MigrationError::NoBuilder(entity.id.clone()))?;
        if builder.parent_key.is_none() {
            builder.parent_key = parent_key;
        }

        // tolerate concurrent external writers: an entity that already
        // exists under this legacy id is adopted, not duplicated
        let existing = self
            .ctx
            .target
            .find_by_legacy_id(self.entity_type, &entity.id)
            .await
            .map_err(|e| MigrationError::from_target(&entity.id, e))?;
        // the atomic seam also writes the success mapping row; the upsert in
        // `process` then bounces off key permanence as a no-op
        let target_key = match existing {
            Some(key) => {
                info!(legacy_id = %entity.id, key, "target entity created externally, adopting");
                key
            }
            None => match self.ctx.atomic.as_deref() {
                Some(atomic) => atomic.create_and_map(&builder).await?,
                None => self
                    .ctx
                    .target
                    .create_entity(&builder)
                    .await
                    .map_err(|e| MigrationError::from_target(&entity.id, e))?,
            },
        };

        // variables live on their owning scope in the target engine
        if self.entity_type == EntityType::Variable && !builder.variables.is_empty() {
            if let Some(scope_key) = parent_key {
                self.ctx
                    .target
                    .set_variables(scope_key, &builder.variables)
                    .await
                    .map_err(|e| MigrationError::from_target(&entity.id, e))?;
            }
        }
        self.apply_task_state(entity, target_key).await?;

        Ok(target_key)
    }

    /// Resolve the target key of the entity this one references
    async fn resolve_parent(&self, entity: &LegacyEntity) -> Result<Option<i64>, MigrationError> {
        let (parent_id, parent_type) = match (&entity.parent_id, entity.entity_type.depends_on()) {
            (Some(parent_id), Some(parent_type)) => (parent_id, parent_type),
            _ => return Ok(None),
        };
        match self.ctx.store.target_key(parent_id, parent_type).await? {
            Some(key) => Ok(Some(key)),
            None => Err(ValidationError::ParentNotMigrated {
                parent_id: parent_id.clone(),
            }
            .into()),
        }
    }

    /// Replay terminal task state onto the migrated entity
    async fn apply_task_state(
        &self,
        entity: &LegacyEntity,
        target_key: i64,
    ) -> Result<(), MigrationError> {
        if entity.entity_type != EntityType::UserTask {
            return Ok(());
        }
        let state = entity.attributes.get("state").and_then(|v| v.as_str());
        let result = match state {
            Some("completed") => self.ctx.target.complete_task(target_key).await,
            Some("cancelled") => self.ctx.target.cancel_entity(target_key).await,
            _ => Ok(()),
        };
        result.map_err(|e| MigrationError::from_target(&entity.id, e))
    }
}
