// Flowmig CLI
//
// Design Decision: Use clap derive for ergonomic argument parsing.
// Design Decision: One binary, mode flags instead of subcommands; exactly one
// of --migrate / --retry-skipped / --list-skipped runs per invocation.
// Design Decision: Datasource URLs come from the YAML config, overridable
// through FLOWMIG_LEGACY_URL / FLOWMIG_TARGET_URL so credentials stay out of
// version-controlled files.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use flowmig_core::builtin::{default_registry, DefaultTenant};
use flowmig_core::{ConversionService, EntityType, MigratorConfig};
use flowmig_engine::{
    MigrationContext, MigrationRunner, PgAtomicMigration, PgLegacyClient, PgTargetClient, RunMode,
};
use flowmig_storage::{DataSourceRegistry, MappingStore, PostgresMappingStore};

#[derive(Parser)]
#[command(name = "flowmig")]
#[command(about = "Flowmig - Migrate process-execution state between workflow engines")]
#[command(version)]
pub struct Cli {
    /// Path to the YAML configuration file
    #[arg(long, env = "FLOWMIG_CONFIG", default_value = "flowmig.yaml")]
    pub config: PathBuf,

    /// Process all unmapped legacy entities
    #[arg(long, conflicts_with_all = ["retry_skipped", "list_skipped"])]
    pub migrate: bool,

    /// Reprocess only previously-skipped entities
    #[arg(long, conflicts_with = "list_skipped")]
    pub retry_skipped: bool,

    /// Report skipped entities and per-type counts without migrating
    #[arg(long)]
    pub list_skipped: bool,

    /// Restrict the run to one entity type
    #[arg(long)]
    pub entity_type: Option<EntityType>,

    /// Drop the mapping schema, discarding all migration state
    #[arg(long)]
    pub drop_schema: bool,

    /// Confirm destructive operations
    #[arg(long, requires = "drop_schema")]
    pub force: bool,
}

impl Cli {
    /// Selected run mode; a bare invocation migrates
    fn mode(&self) -> RunMode {
        match (self.migrate, self.retry_skipped, self.list_skipped) {
            (_, _, true) => RunMode::ListSkipped,
            (_, true, _) => RunMode::RetrySkipped,
            _ => RunMode::Migrate,
        }
    }
}

fn load_config(path: &PathBuf) -> anyhow::Result<MigratorConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading config file {}", path.display()))?;
    let mut config: MigratorConfig =
        serde_yaml::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?;
    config.apply_env_overrides();
    Ok(config)
}

fn build_converter(config: &MigratorConfig) -> anyhow::Result<Arc<ConversionService>> {
    let mut registry = default_registry();
    if let Some(tenant) = &config.default_tenant {
        registry.register_entity(50, Arc::new(DefaultTenant::new(tenant)));
    }
    registry
        .apply(&config.interceptors)
        .context("applying configured interceptors")?;
    let (entities, variables) = registry.build();
    Ok(Arc::new(ConversionService::new(entities, variables)))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    let registry = DataSourceRegistry::connect(&config.legacy.database_url, config.target_url())
        .await
        .context("connecting datasources")?;
    let store = PostgresMappingStore::new(registry.migrator_pool().clone(), &config.table_prefix)?;

    if cli.drop_schema {
        if !cli.force {
            registry.close().await;
            anyhow::bail!("--drop-schema discards all migration state; pass --force to confirm");
        }
        store.drop_schema().await?;
        warn!("mapping schema dropped");
    }

    store.create_schema().await?;

    let converter = build_converter(&config)?;
    let legacy = Arc::new(PgLegacyClient::new(
        registry.legacy_pool().clone(),
        &config.legacy.table_prefix,
    )?);
    let target_prefix = config
        .target
        .as_ref()
        .map(|t| t.table_prefix.as_str())
        .unwrap_or_default();
    let target = PgTargetClient::new(registry.migrator_pool().clone(), target_prefix)?;
    target.create_schema().await?;

    // target writes and mapping writes share the migrator pool, so the
    // atomic create-plus-mapping unit applies in both datasource shapes
    let atomic = PgAtomicMigration::new(
        registry.migrator_pool().clone(),
        target.clone(),
        store.clone(),
    );
    let ctx = MigrationContext::new(Arc::new(store), legacy, Arc::new(target), converter)
        .with_atomic(Arc::new(atomic));
    let runner = MigrationRunner::new(&ctx);

    match cli.mode() {
        RunMode::ListSkipped => {
            let records = runner.list_skipped(cli.entity_type).await?;
            for record in &records {
                println!(
                    "{}\t{}\t{}",
                    record.entity_type,
                    record.legacy_id,
                    record.skip_reason.as_deref().unwrap_or("-"),
                );
            }
            println!();
            for counts in runner.counts().await? {
                println!(
                    "{}: {} migrated, {} skipped",
                    counts.entity_type, counts.migrated, counts.skipped
                );
            }
        }
        RunMode::Migrate => {
            let summary = match cli.entity_type {
                // a type filter disables the cross-type retry loop; retries
                // within one type cannot resolve cross-type dependencies
                Some(_) => runner.run(RunMode::Migrate, cli.entity_type).await?,
                None => runner.migrate_all().await?,
            };
            println!(
                "migrated {} entities, {} skipped ({} retry passes)",
                summary.migrated, summary.skipped, summary.retry_passes
            );
        }
        RunMode::RetrySkipped => {
            let summary = runner.run(RunMode::RetrySkipped, cli.entity_type).await?;
            println!(
                "migrated {} entities, {} still skipped",
                summary.migrated, summary.skipped
            );
        }
    }

    registry.close().await;
    Ok(())
}
