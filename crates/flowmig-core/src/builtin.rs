//! Built-in interceptors
//!
//! The migrator registers `seed-builder` and `normalize-dates` natively;
//! `default-tenant` and `prefix-variable-names` are factory-only and enter
//! the pipeline through declared configuration. All four are also exposed as
//! factories so configuration can rebind their properties.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::Deserialize;

use crate::entity::{ConversionContext, TargetEntityBuilder, VariableKind, VariableValue};
use crate::interceptor::{AnyInterceptor, EntityInterceptor, InterceptError, VariableInterceptor};
use crate::registry::{typed_properties, InterceptorRegistry, RegistryError};

/// Order of the natively registered seed interceptor; runs before anything
/// configured with the default order 0.
pub const SEED_BUILDER_ORDER: i32 = -100;

/// Seeds the target builder from the legacy entity's mappable fields
///
/// Runs first; tolerates a builder preset by an even earlier interceptor and
/// leaves it untouched in that case.
pub struct SeedBuilder;

impl EntityInterceptor for SeedBuilder {
    fn name(&self) -> &str {
        "seed-builder"
    }

    fn intercept(&self, ctx: &mut ConversionContext) -> Result<(), InterceptError> {
        if ctx.builder.is_none() {
            ctx.builder = Some(TargetEntityBuilder::from_legacy(&ctx.legacy));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct DefaultTenantProps {
    tenant_id: String,
}

/// Assigns a tenant to builders whose legacy entity carried none
pub struct DefaultTenant {
    tenant_id: String,
}

impl DefaultTenant {
    pub fn new(tenant_id: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
        }
    }
}

impl EntityInterceptor for DefaultTenant {
    fn name(&self) -> &str {
        "default-tenant"
    }

    fn intercept(&self, ctx: &mut ConversionContext) -> Result<(), InterceptError> {
        if let Some(builder) = ctx.builder.as_mut() {
            if builder.tenant_id.is_none() {
                builder.tenant_id = Some(self.tenant_id.clone());
            }
        }
        Ok(())
    }
}

/// Rewrites legacy date strings to RFC 3339
///
/// The legacy engine serializes dates in several local formats; the target
/// engine accepts RFC 3339 only. Unparseable dates are a deliberate
/// conversion failure, not a pass-through.
pub struct NormalizeDates;

const LEGACY_DATE_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"];

impl VariableInterceptor for NormalizeDates {
    fn name(&self) -> &str {
        "normalize-dates"
    }

    fn kinds(&self) -> Vec<VariableKind> {
        vec![VariableKind::Date]
    }

    fn intercept(&self, variable: &mut VariableValue) -> Result<(), InterceptError> {
        let raw = match variable.value.as_str() {
            Some(raw) => raw,
            None => {
                return Err(InterceptError::failed(format!(
                    "date variable '{}' holds a non-string value",
                    variable.name
                )))
            }
        };

        if DateTime::parse_from_rfc3339(raw).is_ok() {
            return Ok(());
        }
        for format in LEGACY_DATE_FORMATS {
            if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
                let utc: DateTime<Utc> = DateTime::from_naive_utc_and_offset(naive, Utc);
                variable.value = serde_json::json!(utc.to_rfc3339());
                return Ok(());
            }
        }
        if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
            let naive = date.and_hms_opt(0, 0, 0).unwrap();
            let utc: DateTime<Utc> = DateTime::from_naive_utc_and_offset(naive, Utc);
            variable.value = serde_json::json!(utc.to_rfc3339());
            return Ok(());
        }

        Err(InterceptError::failed(format!(
            "unparseable date '{raw}' in variable '{}'",
            variable.name
        )))
    }
}

#[derive(Debug, Deserialize)]
struct PrefixProps {
    prefix: String,
}

/// Prepends a namespace prefix to every variable name
pub struct PrefixVariableNames {
    prefix: String,
}

impl PrefixVariableNames {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }
}

impl VariableInterceptor for PrefixVariableNames {
    fn name(&self) -> &str {
        "prefix-variable-names"
    }

    fn intercept(&self, variable: &mut VariableValue) -> Result<(), InterceptError> {
        if !variable.name.starts_with(&self.prefix) {
            variable.name = format!("{}{}", self.prefix, variable.name);
        }
        Ok(())
    }
}

fn seed_builder_factory(
    _props: &serde_json::Map<String, serde_json::Value>,
) -> Result<AnyInterceptor, RegistryError> {
    Ok(AnyInterceptor::Entity(Arc::new(SeedBuilder)))
}

fn default_tenant_factory(
    props: &serde_json::Map<String, serde_json::Value>,
) -> Result<AnyInterceptor, RegistryError> {
    let props: DefaultTenantProps = typed_properties("default-tenant", props)?;
    Ok(AnyInterceptor::Entity(Arc::new(DefaultTenant::new(
        props.tenant_id,
    ))))
}

fn normalize_dates_factory(
    _props: &serde_json::Map<String, serde_json::Value>,
) -> Result<AnyInterceptor, RegistryError> {
    Ok(AnyInterceptor::Variable(Arc::new(NormalizeDates)))
}

fn prefix_variable_names_factory(
    props: &serde_json::Map<String, serde_json::Value>,
) -> Result<AnyInterceptor, RegistryError> {
    let props: PrefixProps = typed_properties("prefix-variable-names", props)?;
    Ok(AnyInterceptor::Variable(Arc::new(PrefixVariableNames::new(
        props.prefix,
    ))))
}

/// Install the built-in factories into a registry
pub fn install_builtin_factories(registry: &mut InterceptorRegistry) {
    registry.add_factory("seed-builder", seed_builder_factory);
    registry.add_factory("default-tenant", default_tenant_factory);
    registry.add_factory("normalize-dates", normalize_dates_factory);
    registry.add_factory("prefix-variable-names", prefix_variable_names_factory);
}

/// Registry preloaded with the native built-ins and all factories
pub fn default_registry() -> InterceptorRegistry {
    let mut registry = InterceptorRegistry::new();
    install_builtin_factories(&mut registry);
    registry.register_entity(SEED_BUILDER_ORDER, Arc::new(SeedBuilder));
    registry.register_variable(0, Arc::new(NormalizeDates));
    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{EntityType as ET, LegacyEntity};
    use crate::registry::InterceptorDescriptor;

    #[test]
    fn test_seed_builder_preserves_preset() {
        let seed = SeedBuilder;
        let mut ctx = ConversionContext::new(LegacyEntity::new("p1", ET::ProcessInstance));
        ctx.builder = Some(TargetEntityBuilder::new("p1", ET::ProcessInstance).with_tenant("preset"));
        seed.intercept(&mut ctx).unwrap();
        assert_eq!(ctx.builder.unwrap().tenant_id.as_deref(), Some("preset"));
    }

    #[test]
    fn test_default_tenant_only_fills_missing() {
        let interceptor = DefaultTenant::new("t1");

        let mut ctx = ConversionContext::new(LegacyEntity::new("p1", ET::ProcessInstance));
        ctx.builder = Some(TargetEntityBuilder::new("p1", ET::ProcessInstance));
        interceptor.intercept(&mut ctx).unwrap();
        assert_eq!(ctx.builder.as_ref().unwrap().tenant_id.as_deref(), Some("t1"));

        let mut ctx = ConversionContext::new(LegacyEntity::new("p2", ET::ProcessInstance));
        ctx.builder = Some(TargetEntityBuilder::new("p2", ET::ProcessInstance).with_tenant("t2"));
        interceptor.intercept(&mut ctx).unwrap();
        assert_eq!(ctx.builder.as_ref().unwrap().tenant_id.as_deref(), Some("t2"));

        // no builder yet: a preset-less no-op, not an error
        let mut ctx = ConversionContext::new(LegacyEntity::new("p3", ET::ProcessInstance));
        interceptor.intercept(&mut ctx).unwrap();
        assert!(ctx.builder.is_none());
    }

    #[test]
    fn test_normalize_dates_rewrites_legacy_formats() {
        let interceptor = NormalizeDates;

        let mut var = VariableValue::new(
            "due",
            VariableKind::Date,
            serde_json::json!("2024-03-01 13:30:00.250"),
            "pi-1",
        );
        interceptor.intercept(&mut var).unwrap();
        assert_eq!(var.value, serde_json::json!("2024-03-01T13:30:00.250+00:00"));

        let mut var = VariableValue::new(
            "start",
            VariableKind::Date,
            serde_json::json!("2024-03-01"),
            "pi-1",
        );
        interceptor.intercept(&mut var).unwrap();
        assert_eq!(var.value, serde_json::json!("2024-03-01T00:00:00+00:00"));

        let mut var = VariableValue::new(
            "bad",
            VariableKind::Date,
            serde_json::json!("last tuesday"),
            "pi-1",
        );
        let err = interceptor.intercept(&mut var).unwrap_err();
        assert!(matches!(err, InterceptError::Failed(_)));
    }

    #[test]
    fn test_normalize_dates_keeps_rfc3339_untouched() {
        let interceptor = NormalizeDates;
        let original = serde_json::json!("2024-03-01T13:30:00+02:00");
        let mut var = VariableValue::new("due", VariableKind::Date, original.clone(), "pi-1");
        interceptor.intercept(&mut var).unwrap();
        assert_eq!(var.value, original);
    }

    #[test]
    fn test_prefix_factory_via_registry() {
        let mut registry = default_registry();
        registry
            .apply(&[InterceptorDescriptor::new("prefix-variable-names")
                .with_property("prefix", serde_json::json!("legacy_"))])
            .unwrap();
        let (_, variables) = registry.build();

        let mut var =
            VariableValue::new("amount", VariableKind::Long, serde_json::json!(10), "pi-1");
        variables.dispatch(&mut var).unwrap();
        assert_eq!(var.name, "legacy_amount");

        // idempotent on retry
        variables.dispatch(&mut var).unwrap();
        assert_eq!(var.name, "legacy_amount");
    }

    #[test]
    fn test_default_tenant_factory_requires_tenant_id() {
        let mut registry = default_registry();
        let err = registry
            .apply(&[InterceptorDescriptor::new("default-tenant")])
            .unwrap_err();
        assert!(matches!(err, RegistryError::InvalidProperties { .. }));
    }
}
