//! Entity/variable conversion service
//!
//! Turns one legacy entity into a target builder by running it through the
//! effective interceptor pipelines. The service never recovers from chain
//! failures itself; the orchestrator decides what a failure means.

use tracing::debug;

use crate::entity::{ConversionContext, EntityType, LegacyEntity, VariableValue};
use crate::pipeline::{ConversionError, EntityPipeline, VariablePipeline};

/// Runs interceptor dispatch for entities and variables
pub struct ConversionService {
    entities: EntityPipeline,
    variables: VariablePipeline,
}

impl ConversionService {
    pub fn new(entities: EntityPipeline, variables: VariablePipeline) -> Self {
        Self {
            entities,
            variables,
        }
    }

    /// Convert one legacy entity into a fresh conversion context
    ///
    /// The returned context's builder may be `None` when no interceptor set
    /// one; the caller decides whether that constitutes a skip.
    pub fn convert(&self, legacy: LegacyEntity) -> Result<ConversionContext, ConversionError> {
        let mut ctx = ConversionContext::new(legacy);
        self.convert_with_context(&mut ctx)?;
        Ok(ctx)
    }

    /// Rerun dispatch against an existing context
    ///
    /// Used when the same legacy entity must be reconverted on retry; the
    /// interceptor chain is expected to behave idempotently over its own
    /// output.
    pub fn convert_with_context(&self, ctx: &mut ConversionContext) -> Result<(), ConversionError> {
        debug!(entity_id = %ctx.legacy.id, entity_type = %ctx.entity_type(), "converting entity");
        self.entities.dispatch(ctx)?;

        // variable entities carry a payload that runs through its own chain
        if ctx.entity_type() == EntityType::Variable {
            if let Some(mut variable) = ctx.legacy.variable.clone() {
                self.variables.dispatch(&mut variable)?;
                if let Some(builder) = ctx.builder.as_mut() {
                    builder.variables.insert(variable.name, variable.value);
                }
            }
        }
        Ok(())
    }

    /// Convert one variable value in place
    pub fn convert_variable(&self, variable: &mut VariableValue) -> Result<(), ConversionError> {
        self.variables.dispatch(variable)
    }
}
