// Mapping store and datasource registry
//
// This crate owns the migrator's only persisted state, the mapping table,
// and the dual-datasource transaction registry:
// - MappingStore: trait + InMemoryMappingStore (tests) + PostgresMappingStore
// - DataSourceRegistry: legacy-read vs migration-write pools and transactions

pub mod datasource;
pub mod memory;
pub mod postgres;
pub mod store;

pub use datasource::DataSourceRegistry;
pub use memory::InMemoryMappingStore;
pub use postgres::PostgresMappingStore;
pub use store::{MappingRecord, MappingStore, StoreError};
