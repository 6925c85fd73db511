//! Top-level migration run driver
//!
//! Runs one mode across all entity types in the fixed topological order, and
//! implements the convergent retry loop: retry passes repeat while the total
//! skipped count keeps shrinking, so the loop is bounded by the number of
//! failure-resolution dependency layers instead of looping forever on
//! permanently unresolvable entities.

use std::str::FromStr;

use flowmig_core::EntityType;
use flowmig_storage::MappingRecord;
use tracing::{info, instrument, warn};

use crate::migrator::{EntityMigrator, MigrationContext, MigrationError, MigrationStats};

/// Process invocation mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Process all unmapped legacy entities
    Migrate,
    /// Reprocess only previously-skipped entities
    RetrySkipped,
    /// Read-only report of skipped entities
    ListSkipped,
}

impl FromStr for RunMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "migrate" => Ok(RunMode::Migrate),
            "retry-skipped" => Ok(RunMode::RetrySkipped),
            "list-skipped" => Ok(RunMode::ListSkipped),
            other => Err(format!("unknown run mode: {other}")),
        }
    }
}

/// Per-type counts taken from the mapping store
#[derive(Debug, Clone, Copy)]
pub struct TypeCounts {
    pub entity_type: EntityType,
    pub migrated: u64,
    pub skipped: u64,
}

/// Outcome of one run
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    /// Entities migrated during this run (all passes)
    pub migrated: u64,
    /// Entities still skipped when the run finished
    pub skipped: u64,
    /// Retry passes executed beyond the initial one
    pub retry_passes: u32,
}

/// Drives migrations across entity types
pub struct MigrationRunner<'a> {
    ctx: &'a MigrationContext,
}

impl<'a> MigrationRunner<'a> {
    pub fn new(ctx: &'a MigrationContext) -> Self {
        Self { ctx }
    }

    fn types(filter: Option<EntityType>) -> Vec<EntityType> {
        match filter {
            Some(ty) => vec![ty],
            None => EntityType::ORDERED.to_vec(),
        }
    }

    /// Execute one pass of `mode` over the selected entity types
    #[instrument(skip(self))]
    pub async fn run(
        &self,
        mode: RunMode,
        filter: Option<EntityType>,
    ) -> Result<RunSummary, MigrationError> {
        let mut pass = MigrationStats::default();
        for entity_type in Self::types(filter) {
            let migrator = EntityMigrator::new(self.ctx, entity_type);
            match mode {
                RunMode::Migrate => pass.absorb(migrator.migrate().await?),
                RunMode::RetrySkipped => pass.absorb(migrator.retry_skipped().await?),
                RunMode::ListSkipped => {}
            }
        }
        Ok(RunSummary {
            migrated: pass.migrated,
            skipped: self.ctx.store.count_skipped().await?,
            retry_passes: 0,
        })
    }

    /// Read-only report of skipped entities across the selected types
    pub async fn list_skipped(
        &self,
        filter: Option<EntityType>,
    ) -> Result<Vec<MappingRecord>, MigrationError> {
        let mut records = Vec::new();
        for entity_type in Self::types(filter) {
            let migrator = EntityMigrator::new(self.ctx, entity_type);
            records.extend(migrator.list_skipped().await?);
        }
        Ok(records)
    }

    /// Migrated/skipped counts per type, without re-running migration
    pub async fn counts(&self) -> Result<Vec<TypeCounts>, MigrationError> {
        let mut counts = Vec::with_capacity(EntityType::ORDERED.len());
        for entity_type in EntityType::ORDERED {
            counts.push(TypeCounts {
                entity_type,
                migrated: self.ctx.store.count_migrated_by_type(entity_type).await?,
                skipped: self.ctx.store.count_skipped_by_type(entity_type).await?,
            });
        }
        Ok(counts)
    }

    /// Full migration with the convergent retry loop
    ///
    /// After the initial pass, retry passes repeat while the skipped count
    /// is above zero and still strictly shrinking. The first pass that makes
    /// no progress stops the loop and the residue is reported as permanent.
    #[instrument(skip(self))]
    pub async fn migrate_all(&self) -> Result<RunSummary, MigrationError> {
        let mut summary = self.run(RunMode::Migrate, None).await?;
        let mut previous = summary.skipped;

        while previous > 0 {
            let pass = self.run(RunMode::RetrySkipped, None).await?;
            summary.retry_passes += 1;
            summary.migrated += pass.migrated;
            summary.skipped = pass.skipped;

            if pass.skipped == 0 {
                break;
            }
            if pass.skipped >= previous {
                warn!(
                    remaining = pass.skipped,
                    "retry pass made no progress; remaining skips are permanent"
                );
                break;
            }
            previous = pass.skipped;
        }

        info!(
            migrated = summary.migrated,
            skipped = summary.skipped,
            retry_passes = summary.retry_passes,
            "migration run finished"
        );
        Ok(summary)
    }
}
