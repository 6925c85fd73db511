//! Interceptor traits
//!
//! An interceptor is a pluggable unit of conversion logic. Entity
//! interceptors transform a whole legacy-entity-to-builder conversion;
//! variable interceptors transform one variable value in flight.
//!
//! Each interceptor declares the types it supports; an empty declaration
//! matches everything. Declaring a supertype also matches subtype values
//! (see `EntityType::is_assignable_to`).

use std::sync::Arc;

use crate::entity::{ConversionContext, EntityType, VariableKind, VariableValue};

/// Failure raised by an interceptor
#[derive(Debug, thiserror::Error)]
pub enum InterceptError {
    /// Deliberate signal that this value/entity cannot be converted
    #[error("{0}")]
    Failed(String),

    /// Any other failure escaping an interceptor
    #[error(transparent)]
    Unexpected(#[from] anyhow::Error),
}

impl InterceptError {
    /// Deliberately reject the current entity/variable with a reason
    pub fn failed(reason: impl Into<String>) -> Self {
        InterceptError::Failed(reason.into())
    }
}

/// Transforms a whole legacy-entity conversion
///
/// Invoked with the shared per-entity context. The builder may not exist yet
/// when an interceptor runs; early interceptors typically preset values that
/// later ones read back.
pub trait EntityInterceptor: Send + Sync {
    /// Stable name, used in skip reasons and configuration matching
    fn name(&self) -> &str;

    /// Entity types this interceptor fires for; empty matches all
    fn entity_types(&self) -> Vec<EntityType> {
        Vec::new()
    }

    fn intercept(&self, ctx: &mut ConversionContext) -> Result<(), InterceptError>;
}

/// Transforms one variable value in flight
pub trait VariableInterceptor: Send + Sync {
    /// Stable name, used in skip reasons and configuration matching
    fn name(&self) -> &str;

    /// Variable kinds this interceptor fires for; empty matches all
    fn kinds(&self) -> Vec<VariableKind> {
        Vec::new()
    }

    fn intercept(&self, variable: &mut VariableValue) -> Result<(), InterceptError>;
}

/// Tagged variant over the two interceptor kinds
///
/// Factories return this so one registry can hold both pipelines.
#[derive(Clone)]
pub enum AnyInterceptor {
    Entity(Arc<dyn EntityInterceptor>),
    Variable(Arc<dyn VariableInterceptor>),
}

impl AnyInterceptor {
    pub fn name(&self) -> &str {
        match self {
            AnyInterceptor::Entity(i) => i.name(),
            AnyInterceptor::Variable(i) => i.name(),
        }
    }
}

impl std::fmt::Debug for AnyInterceptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self {
            AnyInterceptor::Entity(_) => "entity",
            AnyInterceptor::Variable(_) => "variable",
        };
        write!(f, "AnyInterceptor::{kind}({})", self.name())
    }
}
