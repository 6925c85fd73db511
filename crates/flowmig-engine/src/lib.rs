// Migration orchestration engine
//
// Drives fetch -> convert -> write -> mark loops per entity type against the
// client traits, with the convergent retry loop on top:
// - atomic: transactional create-plus-mapping unit for the SQL deployment
// - clients: LegacyClient / TargetClient traits, in-memory and sqlx impls
// - migrator: per-entity-type orchestrator and error taxonomy
// - runner: run modes and the convergent retry driver

pub mod atomic;
pub mod clients;
pub mod migrator;
pub mod runner;
pub mod validate;

pub use atomic::{AtomicMigration, PgAtomicMigration};
pub use clients::memory::{InMemoryLegacyClient, InMemoryTargetClient};
pub use clients::sql::{PgLegacyClient, PgTargetClient};
pub use clients::{LegacyClient, LegacyError, TargetClient, TargetError};
pub use migrator::{EntityMigrator, MigrationContext, MigrationError, MigrationStats};
pub use runner::{MigrationRunner, RunMode, RunSummary, TypeCounts};
pub use validate::{ValidationError, SUPPORTED_CONSTRUCTS};
