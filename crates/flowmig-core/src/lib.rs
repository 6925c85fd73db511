// Core migration model
//
// This crate provides the pieces shared by storage and orchestration:
// - the legacy/target entity data model
// - the type-dispatched interceptor registry and pipelines
// - the conversion service
// - configuration types

pub mod builtin;
pub mod config;
pub mod convert;
pub mod entity;
pub mod interceptor;
pub mod pipeline;
pub mod registry;

pub use builtin::{default_registry, install_builtin_factories};
pub use config::{EndpointConfig, MigratorConfig};
pub use convert::ConversionService;
pub use entity::{
    ConversionContext, EntityType, LegacyEntity, TargetEntityBuilder, VariableKind, VariableValue,
};
pub use interceptor::{AnyInterceptor, EntityInterceptor, InterceptError, VariableInterceptor};
pub use pipeline::{ConversionError, EntityPipeline, VariablePipeline};
pub use registry::{InterceptorDescriptor, InterceptorRegistry, RegistryError};
