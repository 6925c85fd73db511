//! Interceptor dispatch
//!
//! The pipelines hold the effective ordered interceptor lists produced by the
//! registry and run them over one entity or variable. The chain is fail-fast:
//! the first failure aborts the remaining interceptors for that subject and
//! surfaces as a `ConversionError` naming the interceptor and the subject.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::entity::{ConversionContext, VariableValue};
use crate::interceptor::{EntityInterceptor, InterceptError, VariableInterceptor};

/// Failure of an interceptor chain for one entity or variable
#[derive(Debug, thiserror::Error)]
#[error("interceptor '{interceptor}' failed for '{subject}': {reason}")]
pub struct ConversionError {
    /// Name of the interceptor that failed
    pub interceptor: String,
    /// Identity of the entity or variable being converted
    pub subject: String,
    /// Human-readable reason, recorded as the skip reason
    pub reason: String,
    /// True when the failure was not a deliberate rejection
    pub unexpected: bool,
}

impl ConversionError {
    fn from_intercept(interceptor: &str, subject: &str, err: InterceptError) -> Self {
        let (reason, unexpected) = match err {
            InterceptError::Failed(reason) => (reason, false),
            InterceptError::Unexpected(err) => (format!("{err:#}"), true),
        };
        Self {
            interceptor: interceptor.to_string(),
            subject: subject.to_string(),
            reason,
            unexpected,
        }
    }
}

/// Effective ordered entity-interceptor chain
#[derive(Clone)]
pub struct EntityPipeline {
    steps: Vec<Arc<dyn EntityInterceptor>>,
}

impl EntityPipeline {
    pub(crate) fn new(steps: Vec<Arc<dyn EntityInterceptor>>) -> Self {
        Self { steps }
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Run the chain over one conversion context
    ///
    /// Later interceptors never run after an earlier failure, even if they
    /// target unrelated attributes.
    pub fn dispatch(&self, ctx: &mut ConversionContext) -> Result<(), ConversionError> {
        let entity_type = ctx.entity_type();
        for step in &self.steps {
            let declared = step.entity_types();
            let matches = declared.is_empty()
                || declared.iter().any(|d| entity_type.is_assignable_to(*d));
            if !matches {
                continue;
            }
            debug!(interceptor = step.name(), entity_id = %ctx.legacy.id, "invoking entity interceptor");
            if let Err(err) = step.intercept(ctx) {
                let err = ConversionError::from_intercept(step.name(), &ctx.legacy.id, err);
                warn!(%err, "entity interceptor chain aborted");
                return Err(err);
            }
        }
        Ok(())
    }
}

/// Effective ordered variable-interceptor chain
#[derive(Clone)]
pub struct VariablePipeline {
    steps: Vec<Arc<dyn VariableInterceptor>>,
}

impl VariablePipeline {
    pub(crate) fn new(steps: Vec<Arc<dyn VariableInterceptor>>) -> Self {
        Self { steps }
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Run the chain over one variable value, fail-fast
    pub fn dispatch(&self, variable: &mut VariableValue) -> Result<(), ConversionError> {
        let subject = format!("{}:{}", variable.scope_id, variable.name);
        for step in &self.steps {
            let declared = step.kinds();
            let matches = declared.is_empty()
                || declared.iter().any(|d| variable.kind.is_assignable_to(*d));
            if !matches {
                continue;
            }
            debug!(interceptor = step.name(), variable = %subject, "invoking variable interceptor");
            if let Err(err) = step.intercept(variable) {
                let err = ConversionError::from_intercept(step.name(), &subject, err);
                warn!(%err, "variable interceptor chain aborted");
                return Err(err);
            }
        }
        Ok(())
    }
}
