//! Pre-write business-rule validation
//!
//! Runs before conversion so entities the target engine can never accept are
//! skipped with a precise reason instead of bouncing off the target write.

use flowmig_core::LegacyEntity;

/// Constructs the target engine supports; anything else in an entity's
/// `constructs` attribute fails validation.
pub const SUPPORTED_CONSTRUCTS: &[&str] = &[
    "user_task",
    "service_task",
    "exclusive_gateway",
    "parallel_gateway",
    "timer_event",
    "message_event",
];

/// A pre-write business-rule check failed; recorded as a skip
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    /// The entity uses a construct the target engine does not support
    #[error("unsupported construct {0}")]
    UnsupportedConstruct(String),

    /// The entity references a parent that has no target key yet
    ///
    /// Resolves on a later retry pass once the parent migrates; drives the
    /// convergent retry loop.
    #[error("referenced parent '{parent_id}' not yet migrated")]
    ParentNotMigrated { parent_id: String },
}

/// Check the entity's declared constructs against the supported set
pub fn check_constructs(entity: &LegacyEntity) -> Result<(), ValidationError> {
    let constructs = match entity.attributes.get("constructs") {
        Some(serde_json::Value::Array(items)) => items,
        _ => return Ok(()),
    };
    for construct in constructs {
        if let Some(name) = construct.as_str() {
            if !SUPPORTED_CONSTRUCTS.contains(&name) {
                return Err(ValidationError::UnsupportedConstruct(name.to_string()));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use flowmig_core::EntityType;

    use super::*;

    #[test]
    fn test_supported_constructs_pass() {
        let entity = LegacyEntity::new("p1", EntityType::ProcessInstance).with_attribute(
            "constructs",
            serde_json::json!(["user_task", "exclusive_gateway"]),
        );
        assert!(check_constructs(&entity).is_ok());
    }

    #[test]
    fn test_unsupported_construct_fails_with_its_name() {
        let entity = LegacyEntity::new("p2", EntityType::ProcessInstance)
            .with_attribute("constructs", serde_json::json!(["user_task", "X"]));
        let err = check_constructs(&entity).unwrap_err();
        assert_eq!(err.to_string(), "unsupported construct X");
    }

    #[test]
    fn test_missing_attribute_passes() {
        let entity = LegacyEntity::new("p3", EntityType::ProcessInstance);
        assert!(check_constructs(&entity).is_ok());
    }
}
