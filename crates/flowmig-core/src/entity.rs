//! Entity and variable data model
//!
//! Legacy process-execution state is modelled as a flat `LegacyEntity` tagged
//! with an `EntityType`. Two explicit relations replace the open class
//! hierarchy of the source engine:
//!
//! - `supertype()` drives interceptor type matching ("is assignable to")
//! - `depends_on()` drives pre-write validation and migration ordering

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Kind of process-execution entity being migrated
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    ProcessDefinition,
    ProcessInstance,
    FlowNode,
    UserTask,
    Variable,
    Incident,
}

impl EntityType {
    /// Fixed topological migration order.
    ///
    /// Definitions are migrated before the instances that reference them,
    /// instances before their child flow nodes, tasks, variables and
    /// incidents. Orchestrators iterate this slice and never reorder it.
    pub const ORDERED: [EntityType; 6] = [
        EntityType::ProcessDefinition,
        EntityType::ProcessInstance,
        EntityType::FlowNode,
        EntityType::UserTask,
        EntityType::Variable,
        EntityType::Incident,
    ];

    /// Type-hierarchy parent used by interceptor dispatch.
    ///
    /// A user task is a flow node, so an interceptor declaring `FlowNode`
    /// also receives `UserTask` entities.
    pub fn supertype(self) -> Option<EntityType> {
        match self {
            EntityType::UserTask => Some(EntityType::FlowNode),
            _ => None,
        }
    }

    /// Whether a value of this type matches a declared interceptor type
    pub fn is_assignable_to(self, declared: EntityType) -> bool {
        let mut current = Some(self);
        while let Some(ty) = current {
            if ty == declared {
                return true;
            }
            current = ty.supertype();
        }
        false
    }

    /// Referential dependency in the target schema.
    ///
    /// An entity cannot be written before the entity its `parent_id` points
    /// at has been migrated.
    pub fn depends_on(self) -> Option<EntityType> {
        match self {
            EntityType::ProcessDefinition => None,
            EntityType::ProcessInstance => Some(EntityType::ProcessDefinition),
            EntityType::FlowNode
            | EntityType::UserTask
            | EntityType::Variable
            | EntityType::Incident => Some(EntityType::ProcessInstance),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EntityType::ProcessDefinition => "process_definition",
            EntityType::ProcessInstance => "process_instance",
            EntityType::FlowNode => "flow_node",
            EntityType::UserTask => "user_task",
            EntityType::Variable => "variable",
            EntityType::Incident => "incident",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "process_definition" => Ok(EntityType::ProcessDefinition),
            "process_instance" => Ok(EntityType::ProcessInstance),
            "flow_node" => Ok(EntityType::FlowNode),
            "user_task" => Ok(EntityType::UserTask),
            "variable" => Ok(EntityType::Variable),
            "incident" => Ok(EntityType::Incident),
            other => Err(format!("unknown entity type: {other}")),
        }
    }
}

/// Runtime kind of a variable value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariableKind {
    Bool,
    Long,
    Double,
    String,
    Date,
    Json,
    Xml,
    File,
    Object,
}

impl VariableKind {
    /// Structured payloads are all objects; an interceptor declaring
    /// `Object` receives json, xml and file variables as well.
    pub fn supertype(self) -> Option<VariableKind> {
        match self {
            VariableKind::Json | VariableKind::Xml | VariableKind::File => {
                Some(VariableKind::Object)
            }
            _ => None,
        }
    }

    /// Whether a value of this kind matches a declared interceptor kind
    pub fn is_assignable_to(self, declared: VariableKind) -> bool {
        let mut current = Some(self);
        while let Some(kind) = current {
            if kind == declared {
                return true;
            }
            current = kind.supertype();
        }
        false
    }

    pub fn as_str(self) -> &'static str {
        match self {
            VariableKind::Bool => "bool",
            VariableKind::Long => "long",
            VariableKind::Double => "double",
            VariableKind::String => "string",
            VariableKind::Date => "date",
            VariableKind::Json => "json",
            VariableKind::Xml => "xml",
            VariableKind::File => "file",
            VariableKind::Object => "object",
        }
    }
}

impl fmt::Display for VariableKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VariableKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bool" => Ok(VariableKind::Bool),
            "long" => Ok(VariableKind::Long),
            "double" => Ok(VariableKind::Double),
            "string" => Ok(VariableKind::String),
            "date" => Ok(VariableKind::Date),
            "json" => Ok(VariableKind::Json),
            "xml" => Ok(VariableKind::Xml),
            "file" => Ok(VariableKind::File),
            "object" => Ok(VariableKind::Object),
            other => Err(format!("unknown variable kind: {other}")),
        }
    }
}

/// One variable value in flight through the pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableValue {
    pub name: String,
    pub kind: VariableKind,
    pub value: serde_json::Value,
    /// Id of the scope (process instance, task) owning the variable
    pub scope_id: String,
}

impl VariableValue {
    pub fn new(
        name: impl Into<String>,
        kind: VariableKind,
        value: serde_json::Value,
        scope_id: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            value,
            scope_id: scope_id.into(),
        }
    }
}

/// A unit of process-execution state read from the legacy engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LegacyEntity {
    pub id: String,
    pub entity_type: EntityType,
    pub tenant_id: Option<String>,
    pub name: Option<String>,
    /// Legacy id of the entity this one references (definition for an
    /// instance, instance for a flow node / task / variable / incident)
    pub parent_id: Option<String>,
    /// Engine-specific attributes that interceptors and validation inspect
    #[serde(default)]
    pub attributes: serde_json::Map<String, serde_json::Value>,
    /// Present for `EntityType::Variable` entities only
    #[serde(default)]
    pub variable: Option<VariableValue>,
}

impl LegacyEntity {
    pub fn new(id: impl Into<String>, entity_type: EntityType) -> Self {
        Self {
            id: id.into(),
            entity_type,
            tenant_id: None,
            name: None,
            parent_id: None,
            attributes: serde_json::Map::new(),
            variable: None,
        }
    }

    pub fn with_tenant(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    pub fn with_variable(mut self, variable: VariableValue) -> Self {
        self.variable = Some(variable);
        self
    }
}

/// Builder for the target-system write derived from one legacy entity
///
/// Interceptors fill this in during conversion; the target client turns it
/// into a create/upsert request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetEntityBuilder {
    pub legacy_id: String,
    pub entity_type: EntityType,
    pub tenant_id: Option<String>,
    pub name: Option<String>,
    /// Target key of the already-migrated parent entity
    pub parent_key: Option<i64>,
    #[serde(default)]
    pub variables: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub attributes: serde_json::Map<String, serde_json::Value>,
}

impl TargetEntityBuilder {
    pub fn new(legacy_id: impl Into<String>, entity_type: EntityType) -> Self {
        Self {
            legacy_id: legacy_id.into(),
            entity_type,
            tenant_id: None,
            name: None,
            parent_key: None,
            variables: BTreeMap::new(),
            attributes: serde_json::Map::new(),
        }
    }

    /// Seed a builder from the legacy entity's directly mappable fields
    pub fn from_legacy(entity: &LegacyEntity) -> Self {
        Self {
            legacy_id: entity.id.clone(),
            entity_type: entity.entity_type,
            tenant_id: entity.tenant_id.clone(),
            name: entity.name.clone(),
            parent_key: None,
            variables: BTreeMap::new(),
            attributes: entity.attributes.clone(),
        }
    }

    pub fn with_tenant(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }

    pub fn with_parent_key(mut self, parent_key: i64) -> Self {
        self.parent_key = Some(parent_key);
        self
    }

    pub fn with_variable(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.variables.insert(name.into(), value);
        self
    }
}

/// Ephemeral per-entity conversion state
///
/// Owned by the conversion service for exactly one conversion call and never
/// persisted. `builder` stays `None` until an interceptor sets it; the caller
/// decides whether a missing builder constitutes a skip.
#[derive(Debug, Clone)]
pub struct ConversionContext {
    pub legacy: LegacyEntity,
    pub builder: Option<TargetEntityBuilder>,
}

impl ConversionContext {
    pub fn new(legacy: LegacyEntity) -> Self {
        Self {
            legacy,
            builder: None,
        }
    }

    pub fn entity_type(&self) -> EntityType {
        self.legacy.entity_type
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_task_is_assignable_to_flow_node() {
        assert!(EntityType::UserTask.is_assignable_to(EntityType::FlowNode));
        assert!(EntityType::UserTask.is_assignable_to(EntityType::UserTask));
        assert!(!EntityType::FlowNode.is_assignable_to(EntityType::UserTask));
        assert!(!EntityType::Variable.is_assignable_to(EntityType::FlowNode));
    }

    #[test]
    fn test_variable_kind_hierarchy() {
        assert!(VariableKind::Json.is_assignable_to(VariableKind::Object));
        assert!(VariableKind::Xml.is_assignable_to(VariableKind::Object));
        assert!(!VariableKind::Long.is_assignable_to(VariableKind::Object));
        assert!(!VariableKind::Object.is_assignable_to(VariableKind::Json));
    }

    #[test]
    fn test_ordered_respects_dependencies() {
        // every entity type appears after the type it depends on
        for (idx, ty) in EntityType::ORDERED.iter().enumerate() {
            if let Some(dep) = ty.depends_on() {
                let dep_idx = EntityType::ORDERED
                    .iter()
                    .position(|t| *t == dep)
                    .expect("dependency must be in ORDERED");
                assert!(dep_idx < idx, "{ty} ordered before its dependency {dep}");
            }
        }
    }

    #[test]
    fn test_entity_type_round_trip() {
        for ty in EntityType::ORDERED {
            assert_eq!(ty.as_str().parse::<EntityType>().unwrap(), ty);
        }
        assert!("bpmn_diagram".parse::<EntityType>().is_err());
    }

    #[test]
    fn test_builder_from_legacy() {
        let entity = LegacyEntity::new("pi-1", EntityType::ProcessInstance)
            .with_tenant("t1")
            .with_name("order-fulfilment")
            .with_attribute("version", serde_json::json!(3));

        let builder = TargetEntityBuilder::from_legacy(&entity);
        assert_eq!(builder.legacy_id, "pi-1");
        assert_eq!(builder.tenant_id.as_deref(), Some("t1"));
        assert_eq!(builder.attributes["version"], serde_json::json!(3));
        assert!(builder.parent_key.is_none());
    }
}
