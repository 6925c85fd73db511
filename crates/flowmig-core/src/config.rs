//! Migrator configuration
//!
//! Deserialized from a YAML file by the binary; datasource URLs can be
//! overridden through environment variables so credentials stay out of the
//! config file.

use serde::{Deserialize, Serialize};

use crate::registry::InterceptorDescriptor;

/// Environment override for the legacy datasource URL
pub const LEGACY_URL_ENV: &str = "FLOWMIG_LEGACY_URL";
/// Environment override for the target datasource URL
pub const TARGET_URL_ENV: &str = "FLOWMIG_TARGET_URL";

/// One datasource endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    pub database_url: String,

    /// Prefix namespacing this endpoint's tables
    #[serde(default)]
    pub table_prefix: String,
}

/// Top-level migrator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigratorConfig {
    /// Prefix for the mapping table (multi-tenant deployments)
    #[serde(default)]
    pub table_prefix: String,

    pub legacy: EndpointConfig,

    /// When absent, mapping writes share the legacy database through a
    /// second pool
    #[serde(default)]
    pub target: Option<EndpointConfig>,

    /// Tenant assigned to entities that carry none
    #[serde(default)]
    pub default_tenant: Option<String>,

    #[serde(default)]
    pub interceptors: Vec<InterceptorDescriptor>,
}

impl MigratorConfig {
    /// Apply environment-variable overrides for datasource URLs
    ///
    /// `FLOWMIG_TARGET_URL` also switches a legacy-only configuration into
    /// the dual-datasource shape.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var(LEGACY_URL_ENV) {
            self.legacy.database_url = url;
        }
        if let Ok(url) = std::env::var(TARGET_URL_ENV) {
            match self.target.as_mut() {
                Some(target) => target.database_url = url,
                None => {
                    self.target = Some(EndpointConfig {
                        database_url: url,
                        table_prefix: String::new(),
                    });
                }
            }
        }
    }

    pub fn target_url(&self) -> Option<&str> {
        self.target.as_ref().map(|t| t.database_url.as_str())
    }
}
