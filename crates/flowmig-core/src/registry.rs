//! Interceptor registry
//!
//! Builds the effective ordered interceptor pipelines by merging natively
//! registered instances with declarative configuration. Declared entries are
//! resolved through a static key-to-factory map rather than dynamic class
//! loading; properties are deserialized into typed structs by each factory.

use std::collections::HashMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::interceptor::AnyInterceptor;
use crate::pipeline::{EntityPipeline, VariablePipeline};

/// Declarative configuration for one interceptor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterceptorDescriptor {
    /// Stable key matching a registered instance or a factory
    pub key: String,

    /// Disabled entries are removed from the effective list entirely
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Explicit priority; lower runs first. Omitted keeps the registered
    /// order for native instances and defaults to 0 for factory-built ones.
    #[serde(default)]
    pub order: Option<i32>,

    /// Factory properties, deserialized into the factory's typed config
    #[serde(default)]
    pub properties: serde_json::Map<String, serde_json::Value>,
}

fn default_enabled() -> bool {
    true
}

impl InterceptorDescriptor {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            enabled: true,
            order: None,
            properties: serde_json::Map::new(),
        }
    }

    pub fn disabled(key: impl Into<String>) -> Self {
        Self {
            enabled: false,
            ..Self::new(key)
        }
    }

    pub fn with_order(mut self, order: i32) -> Self {
        self.order = Some(order);
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.properties.insert(key.into(), value);
        self
    }
}

/// Factory function building an interceptor from descriptor properties
pub type InterceptorFactory =
    fn(&serde_json::Map<String, serde_json::Value>) -> Result<AnyInterceptor, RegistryError>;

/// Errors from registry configuration
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// Declared key matches neither a registered instance nor a factory
    #[error("unknown interceptor key: {0}")]
    UnknownInterceptor(String),

    /// Properties were supplied for an interceptor without a factory
    #[error("interceptor '{0}' does not accept properties")]
    NotConfigurable(String),

    /// Properties did not deserialize into the factory's config struct
    #[error("invalid properties for interceptor '{key}': {source}")]
    InvalidProperties {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Deserialize descriptor properties into a factory's typed config
pub fn typed_properties<T: DeserializeOwned>(
    key: &str,
    properties: &serde_json::Map<String, serde_json::Value>,
) -> Result<T, RegistryError> {
    serde_json::from_value(serde_json::Value::Object(properties.clone())).map_err(|source| {
        RegistryError::InvalidProperties {
            key: key.to_string(),
            source,
        }
    })
}

struct Registration {
    key: String,
    interceptor: AnyInterceptor,
    order: i32,
    seq: usize,
    enabled: bool,
}

/// Registry of interceptor instances and factories
///
/// Natively registered instances come first; `apply` merges declared
/// configuration on top. `build` produces the effective pipelines: enabled
/// entries only, stably sorted by order with ties broken by registration
/// sequence.
pub struct InterceptorRegistry {
    entries: Vec<Registration>,
    factories: HashMap<String, InterceptorFactory>,
}

impl InterceptorRegistry {
    /// Create a registry with no factories
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            factories: HashMap::new(),
        }
    }

    /// Register a factory under a stable key
    pub fn add_factory(&mut self, key: impl Into<String>, factory: InterceptorFactory) {
        self.factories.insert(key.into(), factory);
    }

    /// Register an instance; its `name()` is the key configuration matches on
    pub fn register(&mut self, order: i32, interceptor: AnyInterceptor) {
        let seq = self.entries.len();
        self.entries.push(Registration {
            key: interceptor.name().to_string(),
            interceptor,
            order,
            seq,
            enabled: true,
        });
    }

    pub fn register_entity(
        &mut self,
        order: i32,
        interceptor: std::sync::Arc<dyn crate::interceptor::EntityInterceptor>,
    ) {
        self.register(order, AnyInterceptor::Entity(interceptor));
    }

    pub fn register_variable(
        &mut self,
        order: i32,
        interceptor: std::sync::Arc<dyn crate::interceptor::VariableInterceptor>,
    ) {
        self.register(order, AnyInterceptor::Variable(interceptor));
    }

    /// Merge declared configuration into the registered instances
    ///
    /// A descriptor matching a registered instance toggles enablement,
    /// optionally overrides its order, and rebinds properties by rebuilding
    /// through the matching factory; it never duplicates the instance.
    /// Unmatched keys are resolved through the factory map.
    pub fn apply(&mut self, descriptors: &[InterceptorDescriptor]) -> Result<(), RegistryError> {
        for descriptor in descriptors {
            match self.entries.iter().position(|e| e.key == descriptor.key) {
                Some(idx) => {
                    if !descriptor.properties.is_empty() {
                        let factory = self
                            .factories
                            .get(descriptor.key.as_str())
                            .ok_or_else(|| {
                                RegistryError::NotConfigurable(descriptor.key.clone())
                            })?;
                        self.entries[idx].interceptor = factory(&descriptor.properties)?;
                    }
                    self.entries[idx].enabled = descriptor.enabled;
                    if let Some(order) = descriptor.order {
                        self.entries[idx].order = order;
                    }
                    debug!(key = %descriptor.key, enabled = descriptor.enabled, "reconfigured interceptor");
                }
                None => {
                    let factory = self.factories.get(descriptor.key.as_str()).ok_or_else(|| {
                        RegistryError::UnknownInterceptor(descriptor.key.clone())
                    })?;
                    if !descriptor.enabled {
                        // declared but disabled, nothing to add
                        continue;
                    }
                    let interceptor = factory(&descriptor.properties)?;
                    self.register(descriptor.order.unwrap_or(0), interceptor);
                    debug!(key = %descriptor.key, "added declared interceptor");
                }
            }
        }
        Ok(())
    }

    /// Produce the effective ordered pipelines
    pub fn build(mut self) -> (EntityPipeline, VariablePipeline) {
        self.entries.retain(|e| e.enabled);
        self.entries.sort_by_key(|e| (e.order, e.seq));

        let mut entity = Vec::new();
        let mut variable = Vec::new();
        for entry in self.entries {
            match entry.interceptor {
                AnyInterceptor::Entity(i) => entity.push(i),
                AnyInterceptor::Variable(i) => variable.push(i),
            }
        }
        (EntityPipeline::new(entity), VariablePipeline::new(variable))
    }
}

impl Default for InterceptorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::entity::{ConversionContext, TargetEntityBuilder};
    use crate::interceptor::{EntityInterceptor, InterceptError};

    struct Tagger {
        name: String,
    }

    impl EntityInterceptor for Tagger {
        fn name(&self) -> &str {
            &self.name
        }

        fn intercept(&self, ctx: &mut ConversionContext) -> Result<(), InterceptError> {
            let builder = ctx.builder.get_or_insert_with(|| {
                TargetEntityBuilder::new(ctx.legacy.id.clone(), ctx.legacy.entity_type)
            });
            let seen = builder
                .attributes
                .entry("seen")
                .or_insert_with(|| serde_json::json!([]));
            seen.as_array_mut()
                .unwrap()
                .push(serde_json::json!(self.name));
            Ok(())
        }
    }

    fn tagger(name: &str) -> Arc<dyn EntityInterceptor> {
        Arc::new(Tagger {
            name: name.to_string(),
        })
    }

    fn dispatch_order(registry: InterceptorRegistry) -> Vec<String> {
        use crate::entity::{EntityType, LegacyEntity};

        let (entity, _) = registry.build();
        let mut ctx =
            ConversionContext::new(LegacyEntity::new("e1", EntityType::ProcessInstance));
        entity.dispatch(&mut ctx).unwrap();
        ctx.builder
            .unwrap()
            .attributes
            .get("seen")
            .and_then(|v| v.as_array().cloned())
            .unwrap_or_default()
            .into_iter()
            .map(|v| v.as_str().unwrap().to_string())
            .collect()
    }

    #[test]
    fn test_order_is_stable_with_ties() {
        let mut registry = InterceptorRegistry::new();
        registry.register_entity(10, tagger("b"));
        registry.register_entity(10, tagger("c"));
        registry.register_entity(5, tagger("a"));

        assert_eq!(dispatch_order(registry), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_disable_removes_instance() {
        let mut registry = InterceptorRegistry::new();
        registry.register_entity(0, tagger("keep"));
        registry.register_entity(0, tagger("drop"));
        registry
            .apply(&[InterceptorDescriptor::disabled("drop")])
            .unwrap();

        assert_eq!(dispatch_order(registry), vec!["keep"]);
    }

    #[test]
    fn test_descriptor_overrides_order_without_duplicating() {
        let mut registry = InterceptorRegistry::new();
        registry.register_entity(0, tagger("first"));
        registry.register_entity(10, tagger("second"));
        registry
            .apply(&[InterceptorDescriptor::new("first").with_order(20)])
            .unwrap();

        assert_eq!(dispatch_order(registry), vec!["second", "first"]);
    }

    #[test]
    fn test_unknown_key_is_an_error() {
        let mut registry = InterceptorRegistry::new();
        let err = registry
            .apply(&[InterceptorDescriptor::new("no-such-interceptor")])
            .unwrap_err();
        assert!(matches!(err, RegistryError::UnknownInterceptor(_)));
    }

    #[test]
    fn test_properties_without_factory_are_rejected() {
        let mut registry = InterceptorRegistry::new();
        registry.register_entity(0, tagger("fixed"));
        let err = registry
            .apply(&[
                InterceptorDescriptor::new("fixed").with_property("x", serde_json::json!(1))
            ])
            .unwrap_err();
        assert!(matches!(err, RegistryError::NotConfigurable(_)));
    }
}
