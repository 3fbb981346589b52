//! # Orchestrator Configuration
//!
//! Everything the orchestrator needs to turn runtime signals into a ready
//! tenant: detection rules, tenant profiles, plugin search locations, loader
//! and security policy, and merge settings.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use tenancy_core::config::ConfigLoader;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load configuration (environment auto-detected)
//! let loaded = ConfigLoader::load_from_directory("config")?;
//!
//! let tenants = loaded.config().tenant_catalog();
//! let timeout = loaded.config().loader.plugin_timeout();
//! # let _ = (tenants, timeout);
//! # Ok(())
//! # }
//! ```
//!
//! Hosts that do not keep a config file build [`OrchestratorConfig`] in code.

pub mod error;
pub mod loader;

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::time::Duration;

use crate::constants::defaults;
use crate::context::{BusinessContext, DetectionConfig, TenantCatalog};
use crate::loader::{LoaderSettings, SecurityPolicy};
use crate::merge::{ConfigSchema, ConfigValue, MergeStrategy};
use crate::registry::LoadingStrategy;

pub use error::{ConfigResult, ConfigurationError};
pub use loader::{expand_env_placeholders, sanitize_for_logging, ConfigLoader};

/// Root configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub detection: DetectionConfig,
    /// Tenant profiles keyed by tenant id; the keys form the tenant catalogue
    pub tenants: BTreeMap<String, TenantProfile>,
    /// Lowest-precedence configuration fragment
    pub base_config: ConfigValue,
    pub plugins: PluginDiscoveryConfig,
    pub loader: LoaderSettings,
    pub security: SecurityPolicy,
    pub merge: MergeSettings,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            detection: DetectionConfig::default(),
            tenants: BTreeMap::new(),
            base_config: ConfigValue::empty_map(),
            plugins: PluginDiscoveryConfig::default(),
            loader: LoaderSettings::default(),
            security: SecurityPolicy::default(),
            merge: MergeSettings::default(),
        }
    }
}

/// What one tenant activates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TenantProfile {
    /// Requested plugin ids, in declaration order
    pub plugins: Vec<String>,
    /// Plugins whose exclusion makes the tenant's load fatal
    pub required_plugins: Vec<String>,
    /// Tenant-tier configuration fragment
    pub config: ConfigValue,
    /// Dotted paths whose arrays concatenate instead of replacing
    pub append_keys: Vec<String>,
    /// Overrides `loader.default_strategy` for this tenant
    pub loading_strategy: Option<LoadingStrategy>,
    /// Overrides `merge.strategy` for this tenant
    pub merge_strategy: Option<MergeStrategy>,
}

impl Default for TenantProfile {
    fn default() -> Self {
        Self {
            plugins: Vec::new(),
            required_plugins: Vec::new(),
            config: ConfigValue::empty_map(),
            append_keys: Vec::new(),
            loading_strategy: None,
            merge_strategy: None,
        }
    }
}

impl TenantProfile {
    pub fn new<I, S>(plugins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            plugins: plugins.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn require(mut self, plugin: impl Into<String>) -> Self {
        self.required_plugins.push(plugin.into());
        self
    }

    pub fn with_config(mut self, config: ConfigValue) -> Self {
        self.config = config;
        self
    }

    pub fn with_append_key(mut self, path: impl Into<String>) -> Self {
        self.append_keys.push(path.into());
        self
    }

    pub fn with_loading_strategy(mut self, strategy: LoadingStrategy) -> Self {
        self.loading_strategy = Some(strategy);
        self
    }

    pub fn with_merge_strategy(mut self, strategy: MergeStrategy) -> Self {
        self.merge_strategy = Some(strategy);
        self
    }

    /// Requested plugins followed by any required plugin not already listed
    pub fn requested_plugins(&self) -> Vec<String> {
        let mut requested = self.plugins.clone();
        for plugin in &self.required_plugins {
            if !requested.contains(plugin) {
                requested.push(plugin.clone());
            }
        }
        requested
    }

    pub fn required_set(&self) -> BTreeSet<String> {
        self.required_plugins.iter().cloned().collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginDiscoveryConfig {
    /// Directories scanned for manifest files, in order
    pub search_paths: Vec<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeSettings {
    pub strategy: MergeStrategy,
    pub cache_ttl_seconds: u64,
    pub schema: Option<ConfigSchema>,
}

impl Default for MergeSettings {
    fn default() -> Self {
        Self {
            strategy: MergeStrategy::Deep,
            cache_ttl_seconds: defaults::CACHE_TTL_SECONDS,
            schema: None,
        }
    }
}

impl MergeSettings {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_seconds)
    }
}

impl OrchestratorConfig {
    pub fn with_tenant(mut self, id: impl AsRef<str>, profile: TenantProfile) -> Self {
        self.tenants
            .insert(BusinessContext::parse(id.as_ref()).as_str().to_string(), profile);
        self
    }

    pub fn with_base_config(mut self, base_config: ConfigValue) -> Self {
        self.base_config = base_config;
        self
    }

    pub fn with_search_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.plugins.search_paths.push(path.into());
        self
    }

    /// Tenant catalogue derived from the configured profiles
    pub fn tenant_catalog(&self) -> TenantCatalog {
        TenantCatalog::new(self.tenants.keys())
    }

    pub fn tenant_profile(&self, context: &BusinessContext) -> Option<&TenantProfile> {
        self.tenants.get(context.as_str())
    }

    /// Validate configuration after load
    pub fn validate(&self) -> ConfigResult<()> {
        let catalog = self.tenant_catalog();

        if !catalog.contains(&self.detection.fallback_context) {
            return Err(ConfigurationError::invalid_value(
                "detection.fallback_context",
                self.detection.fallback_context.as_str(),
                "fallback context must be a configured tenant or 'unknown'",
            ));
        }

        let duplicates = self.detection.duplicate_strategies();
        if !duplicates.is_empty() {
            return Err(ConfigurationError::invalid_value(
                "detection.strategy_order",
                duplicates
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(", "),
                "each strategy may appear only once",
            ));
        }

        if self.detection.header_name.trim().is_empty() {
            return Err(ConfigurationError::missing_required_field(
                "detection.header_name",
                "detection configuration",
            ));
        }

        for rule in &self.detection.domain_rules {
            if let Some(confidence) = rule.confidence {
                if !(0.0..=1.0).contains(&confidence) {
                    return Err(ConfigurationError::invalid_value(
                        format!("detection.domain_rules[{}].confidence", rule.pattern),
                        confidence.to_string(),
                        "confidence must be within [0, 1]",
                    ));
                }
            }
            self.check_rule_target("detection.domain_rules", &rule.context, &catalog)?;
        }
        for rule in &self.detection.port_rules {
            self.check_rule_target("detection.port_rules", &rule.context, &catalog)?;
        }
        for rule in &self.detection.env_rules {
            self.check_rule_target("detection.env_rules", &rule.context, &catalog)?;
        }

        if self.loader.plugin_timeout_ms == 0 {
            return Err(ConfigurationError::invalid_value(
                "loader.plugin_timeout_ms",
                "0",
                "plugin timeout must be greater than 0",
            ));
        }
        if self.loader.performance_budget_ms == 0 {
            return Err(ConfigurationError::invalid_value(
                "loader.performance_budget_ms",
                "0",
                "performance budget must be greater than 0",
            ));
        }

        for (tenant, profile) in &self.tenants {
            if let Some(empty) = profile
                .plugins
                .iter()
                .chain(&profile.required_plugins)
                .find(|plugin| plugin.trim().is_empty())
            {
                return Err(ConfigurationError::invalid_value(
                    format!("tenants.{tenant}.plugins"),
                    empty.clone(),
                    "plugin ids must not be empty",
                ));
            }
        }

        Ok(())
    }

    fn check_rule_target(
        &self,
        field: &str,
        context: &BusinessContext,
        catalog: &TenantCatalog,
    ) -> ConfigResult<()> {
        if context.is_unknown() || !catalog.contains(context) {
            return Err(ConfigurationError::invalid_value(
                field,
                context.as_str(),
                "rule target must be a configured tenant",
            ));
        }
        Ok(())
    }
}
