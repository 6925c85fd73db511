//! End-to-end migration flows over the in-memory store and clients
//!
//! Covers idempotence, the convergent retry loop, skip bookkeeping, and the
//! adoption of externally created target entities.

use std::sync::Arc;

use flowmig_core::{
    default_registry, ConversionService, EntityType, InterceptorDescriptor, LegacyEntity,
    VariableKind, VariableValue,
};
use flowmig_engine::{
    InMemoryLegacyClient, InMemoryTargetClient, MigrationContext, MigrationRunner, RunMode,
};
use flowmig_storage::{InMemoryMappingStore, MappingStore};

struct Harness {
    store: Arc<InMemoryMappingStore>,
    legacy: Arc<InMemoryLegacyClient>,
    target: Arc<InMemoryTargetClient>,
    ctx: MigrationContext,
}

fn harness(descriptors: &[InterceptorDescriptor]) -> Harness {
    let mut registry = default_registry();
    registry.apply(descriptors).expect("valid descriptors");
    let (entities, variables) = registry.build();
    let converter = Arc::new(ConversionService::new(entities, variables));

    let store = Arc::new(InMemoryMappingStore::new());
    let legacy = Arc::new(InMemoryLegacyClient::new());
    let target = Arc::new(InMemoryTargetClient::new());
    let ctx = MigrationContext::new(
        store.clone(),
        legacy.clone(),
        target.clone(),
        converter,
    );
    Harness {
        store,
        legacy,
        target,
        ctx,
    }
}

/// Scenario A: a tenant-assigning interceptor runs, the write succeeds, and
/// the mapping row holds a non-null key with no skip reason.
#[tokio::test]
async fn test_successful_migration_records_mapping() {
    let h = harness(&[InterceptorDescriptor::new("default-tenant")
        .with_order(50)
        .with_property("tenant_id", serde_json::json!("t1"))]);
    h.legacy
        .add(LegacyEntity::new("P1", EntityType::ProcessInstance));

    let runner = MigrationRunner::new(&h.ctx);
    let summary = runner.migrate_all().await.unwrap();
    assert_eq!(summary.migrated, 1);
    assert_eq!(summary.skipped, 0);

    let record = h
        .store
        .get("P1", EntityType::ProcessInstance)
        .await
        .unwrap()
        .unwrap();
    assert!(record.target_key.is_some());
    assert_eq!(record.skip_reason, None);

    let builder = h
        .target
        .builder_of(EntityType::ProcessInstance, "P1")
        .unwrap();
    assert_eq!(builder.tenant_id.as_deref(), Some("t1"));
}

/// Scenario B: validation skips the entity with the construct's name, the
/// skip is listable, and a retry after the fix migrates it.
#[tokio::test]
async fn test_validation_skip_then_retry_succeeds() {
    let h = harness(&[]);
    h.legacy.add(
        LegacyEntity::new("P2", EntityType::ProcessInstance)
            .with_attribute("constructs", serde_json::json!(["X"])),
    );

    let runner = MigrationRunner::new(&h.ctx);
    let summary = runner.migrate_all().await.unwrap();
    assert_eq!(summary.migrated, 0);
    assert_eq!(summary.skipped, 1);

    let record = h
        .store
        .get("P2", EntityType::ProcessInstance)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.target_key, None);
    assert_eq!(record.skip_reason.as_deref(), Some("unsupported construct X"));

    let skipped = runner
        .list_skipped(Some(EntityType::ProcessInstance))
        .await
        .unwrap();
    assert_eq!(skipped.len(), 1);
    assert_eq!(skipped[0].legacy_id, "P2");

    // the offending construct disappears from the legacy side
    h.legacy
        .replace(LegacyEntity::new("P2", EntityType::ProcessInstance));
    let retry = runner.run(RunMode::RetrySkipped, None).await.unwrap();
    assert_eq!(retry.migrated, 1);

    let record = h
        .store
        .get("P2", EntityType::ProcessInstance)
        .await
        .unwrap()
        .unwrap();
    assert!(record.target_key.is_some());
    assert_eq!(record.skip_reason, None);
}

/// Running MIGRATE twice with no legacy-side changes migrates once; the
/// second run performs no target writes.
#[tokio::test]
async fn test_migrate_is_idempotent() {
    let h = harness(&[]);
    h.legacy
        .add(LegacyEntity::new("a", EntityType::ProcessDefinition));
    h.legacy
        .add(LegacyEntity::new("b", EntityType::ProcessDefinition));

    let runner = MigrationRunner::new(&h.ctx);
    let first = runner.run(RunMode::Migrate, None).await.unwrap();
    assert_eq!(first.migrated, 2);
    let creates_after_first = h.target.create_count();

    let second = runner.run(RunMode::Migrate, None).await.unwrap();
    assert_eq!(second.migrated, 0);
    assert_eq!(h.target.create_count(), creates_after_first);
}

/// Transient failures resolving one per pass converge in as many retry
/// passes as there are layers, ending with zero skipped.
#[tokio::test]
async fn test_convergent_retry_terminates_when_failures_resolve() {
    let h = harness(&[]);
    for (id, failures) in [("e1", 1), ("e2", 2), ("e3", 3)] {
        h.legacy.add(LegacyEntity::new(id, EntityType::Incident));
        h.target.reject(id, "target warming up", failures);
    }

    let runner = MigrationRunner::new(&h.ctx);
    let summary = runner.migrate_all().await.unwrap();

    assert_eq!(summary.skipped, 0);
    assert_eq!(summary.migrated, 3);
    assert_eq!(summary.retry_passes, 3);
    assert_eq!(h.store.count_skipped().await.unwrap(), 0);
}

/// Permanent failures stop the loop as soon as a pass makes no progress:
/// one migrate pass plus exactly one retry pass.
#[tokio::test]
async fn test_convergent_retry_stops_on_permanent_failures() {
    let h = harness(&[]);
    for id in ["m1", "m2"] {
        h.legacy.add(LegacyEntity::new(id, EntityType::Incident));
        h.target.reject(id, "schema mismatch", u32::MAX);
    }

    let runner = MigrationRunner::new(&h.ctx);
    let summary = runner.migrate_all().await.unwrap();

    assert_eq!(summary.retry_passes, 1);
    assert_eq!(summary.skipped, 2);
    let skipped = runner.list_skipped(Some(EntityType::Incident)).await.unwrap();
    assert_eq!(skipped.len(), 2);
    assert!(skipped
        .iter()
        .all(|r| r.skip_reason.as_deref() == Some("schema mismatch")));
}

/// A child whose parent is initially rejected skips with a dependency
/// reason, then both migrate on the next pass and the child references the
/// parent's key.
#[tokio::test]
async fn test_dependency_skip_resolves_after_parent_migrates() {
    let h = harness(&[]);
    h.legacy
        .add(LegacyEntity::new("d1", EntityType::ProcessDefinition));
    h.legacy.add(
        LegacyEntity::new("p1", EntityType::ProcessInstance).with_parent("d1"),
    );
    h.target.reject("d1", "target warming up", 1);

    let runner = MigrationRunner::new(&h.ctx);
    let summary = runner.migrate_all().await.unwrap();
    assert_eq!(summary.skipped, 0);
    assert_eq!(summary.retry_passes, 1);

    let definition_key = h
        .target
        .key_of(EntityType::ProcessDefinition, "d1")
        .unwrap();
    let builder = h
        .target
        .builder_of(EntityType::ProcessInstance, "p1")
        .unwrap();
    assert_eq!(builder.parent_key, Some(definition_key));
}

/// An entity created in the target by an external writer is adopted rather
/// than duplicated.
#[tokio::test]
async fn test_externally_created_entity_is_adopted() {
    let h = harness(&[]);
    h.legacy
        .add(LegacyEntity::new("P9", EntityType::ProcessInstance));
    let external_key = h
        .target
        .insert_external(EntityType::ProcessInstance, "P9");

    let runner = MigrationRunner::new(&h.ctx);
    runner.migrate_all().await.unwrap();

    assert_eq!(h.target.create_count(), 0);
    assert_eq!(
        h.store
            .target_key("P9", EntityType::ProcessInstance)
            .await
            .unwrap(),
        Some(external_key)
    );
}

/// Variable entities run the variable chain and land on their owning scope.
#[tokio::test]
async fn test_variable_entity_sets_converted_value_on_scope() {
    let h = harness(&[]);
    h.legacy
        .add(LegacyEntity::new("pi-1", EntityType::ProcessInstance));
    h.legacy.add(
        LegacyEntity::new("v1", EntityType::Variable)
            .with_parent("pi-1")
            .with_variable(VariableValue::new(
                "due",
                VariableKind::Date,
                serde_json::json!("2024-03-01 08:00:00.0"),
                "pi-1",
            )),
    );

    let runner = MigrationRunner::new(&h.ctx);
    let summary = runner.migrate_all().await.unwrap();
    assert_eq!(summary.skipped, 0);

    let scope_key = h.target.key_of(EntityType::ProcessInstance, "pi-1").unwrap();
    let variables = h.target.variables_of(scope_key).unwrap();
    assert_eq!(
        variables["due"],
        serde_json::json!("2024-03-01T08:00:00+00:00")
    );
}

/// Every variable of a scope survives migration; each variable entity
/// merges its own entry without clobbering siblings migrated earlier.
#[tokio::test]
async fn test_all_variables_of_a_scope_survive_migration() {
    let h = harness(&[]);
    h.legacy
        .add(LegacyEntity::new("pi-1", EntityType::ProcessInstance));
    for (id, name, value) in [("v-a", "a", 1), ("v-b", "b", 2)] {
        h.legacy.add(
            LegacyEntity::new(id, EntityType::Variable)
                .with_parent("pi-1")
                .with_variable(VariableValue::new(
                    name,
                    VariableKind::Long,
                    serde_json::json!(value),
                    "pi-1",
                )),
        );
    }

    let runner = MigrationRunner::new(&h.ctx);
    let summary = runner.migrate_all().await.unwrap();
    assert_eq!(summary.skipped, 0);

    let scope_key = h.target.key_of(EntityType::ProcessInstance, "pi-1").unwrap();
    let variables = h.target.variables_of(scope_key).unwrap();
    assert_eq!(variables["a"], serde_json::json!(1));
    assert_eq!(variables["b"], serde_json::json!(2));
}

/// A conversion-chain failure becomes the skip reason, naming the
/// interceptor and the entity.
#[tokio::test]
async fn test_interceptor_failure_becomes_skip_reason() {
    let h = harness(&[]);
    h.legacy.add(
        LegacyEntity::new("v2", EntityType::Variable)
            .with_parent("pi-2")
            .with_variable(VariableValue::new(
                "when",
                VariableKind::Date,
                serde_json::json!("not a date"),
                "pi-2",
            )),
    );
    h.legacy
        .add(LegacyEntity::new("pi-2", EntityType::ProcessInstance));

    let runner = MigrationRunner::new(&h.ctx);
    runner.migrate_all().await.unwrap();

    let record = h
        .store
        .get("v2", EntityType::Variable)
        .await
        .unwrap()
        .unwrap();
    let reason = record.skip_reason.unwrap();
    assert!(reason.contains("normalize-dates"), "reason: {reason}");
    assert!(reason.contains("unparseable date"), "reason: {reason}");
}

/// Terminal task state is replayed onto migrated user tasks.
#[tokio::test]
async fn test_completed_task_state_is_replayed() {
    let h = harness(&[]);
    h.legacy
        .add(LegacyEntity::new("pi-3", EntityType::ProcessInstance));
    h.legacy.add(
        LegacyEntity::new("t1", EntityType::UserTask)
            .with_parent("pi-3")
            .with_attribute("state", serde_json::json!("completed")),
    );
    h.legacy.add(
        LegacyEntity::new("t2", EntityType::UserTask)
            .with_parent("pi-3")
            .with_attribute("state", serde_json::json!("cancelled")),
    );

    let runner = MigrationRunner::new(&h.ctx);
    runner.migrate_all().await.unwrap();

    let t1_key = h.target.key_of(EntityType::UserTask, "t1").unwrap();
    let t2_key = h.target.key_of(EntityType::UserTask, "t2").unwrap();
    assert_eq!(h.target.completed_keys(), vec![t1_key]);
    assert_eq!(h.target.cancelled_keys(), vec![t2_key]);
}

/// With no interceptor seeding a builder, the entity skips rather than
/// writing an empty target record.
#[tokio::test]
async fn test_missing_builder_is_a_skip() {
    use flowmig_core::InterceptorRegistry;

    let (entities, variables) = InterceptorRegistry::new().build();
    let converter = Arc::new(ConversionService::new(entities, variables));
    let store = Arc::new(InMemoryMappingStore::new());
    let legacy = Arc::new(InMemoryLegacyClient::new());
    let target = Arc::new(InMemoryTargetClient::new());
    legacy.add(LegacyEntity::new("P5", EntityType::ProcessInstance));
    let ctx = MigrationContext::new(store.clone(), legacy, target.clone(), converter);

    let runner = MigrationRunner::new(&ctx);
    let summary = runner.migrate_all().await.unwrap();
    assert_eq!(summary.skipped, 1);
    assert_eq!(target.create_count(), 0);

    let record = store
        .get("P5", EntityType::ProcessInstance)
        .await
        .unwrap()
        .unwrap();
    assert!(record
        .skip_reason
        .unwrap()
        .contains("no interceptor produced a target builder"));
}

/// The wired-in atomic unit handles creates instead of the plain target
/// path, and its mapping write stands.
#[tokio::test]
async fn test_atomic_unit_replaces_plain_create_path() {
    use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

    use flowmig_engine::{AtomicMigration, MigrationError};

    struct RecordingUnit {
        store: Arc<InMemoryMappingStore>,
        next_key: AtomicI64,
        calls: AtomicU64,
    }

    #[async_trait::async_trait]
    impl AtomicMigration for RecordingUnit {
        async fn create_and_map(
            &self,
            builder: &flowmig_core::TargetEntityBuilder,
        ) -> Result<i64, MigrationError> {
            let key = self.next_key.fetch_add(1, Ordering::SeqCst);
            self.store
                .upsert(&builder.legacy_id, builder.entity_type, Some(key), None)
                .await
                .map_err(MigrationError::Store)?;
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(key)
        }
    }

    let h = harness(&[]);
    h.legacy
        .add(LegacyEntity::new("P1", EntityType::ProcessInstance));
    let unit = Arc::new(RecordingUnit {
        store: h.store.clone(),
        next_key: AtomicI64::new(100),
        calls: AtomicU64::new(0),
    });
    let ctx = MigrationContext::new(
        h.store.clone(),
        h.legacy.clone(),
        h.target.clone(),
        h.ctx.converter.clone(),
    )
    .with_atomic(unit.clone());

    let runner = MigrationRunner::new(&ctx);
    let summary = runner.migrate_all().await.unwrap();
    assert_eq!(summary.migrated, 1);

    assert_eq!(unit.calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.target.create_count(), 0, "plain create path must not run");
    assert_eq!(
        h.store
            .target_key("P1", EntityType::ProcessInstance)
            .await
            .unwrap(),
        Some(100)
    );
}

/// Summary counts are available from the store without re-running.
#[tokio::test]
async fn test_counts_without_rerunning() {
    let h = harness(&[]);
    h.legacy
        .add(LegacyEntity::new("ok", EntityType::ProcessDefinition));
    h.legacy.add(
        LegacyEntity::new("bad", EntityType::ProcessDefinition)
            .with_attribute("constructs", serde_json::json!(["Y"])),
    );

    let runner = MigrationRunner::new(&h.ctx);
    runner.migrate_all().await.unwrap();

    let counts = runner.counts().await.unwrap();
    let definitions = counts
        .iter()
        .find(|c| c.entity_type == EntityType::ProcessDefinition)
        .unwrap();
    assert_eq!(definitions.migrated, 1);
    assert_eq!(definitions.skipped, 1);
}
