//! Configuration Loader
//!
//! Environment-aware loading of `tenancy-config.yaml`: file discovery, size
//! limited read, environment overlay merge, `${VAR}` expansion, validation.

use regex::Regex;
use serde_yaml::Value as YamlValue;
use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::error::{ConfigResult, ConfigurationError};
use super::OrchestratorConfig;
use crate::constants::{defaults, env_vars};
use crate::merge::ConfigValue;

const MAX_CONFIG_FILE_SIZE: u64 = 10 * 1024 * 1024; // 10MB limit

/// A loaded, validated orchestrator configuration and where it came from
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    config: OrchestratorConfig,
    environment: String,
    config_directory: PathBuf,
}

impl ConfigLoader {
    /// Load configuration with environment auto-detection from the process environment
    pub fn load_from_directory(config_dir: impl Into<PathBuf>) -> ConfigResult<Self> {
        let variables: HashMap<String, String> = env::vars().collect();
        let environment = Self::detect_environment_from(&variables);
        Self::load_from_directory_with_env(config_dir, &environment, &variables)
    }

    /// Load configuration with an explicit environment name and variable map
    ///
    /// Useful for testing without modifying global environment variables.
    pub fn load_from_directory_with_env(
        config_dir: impl Into<PathBuf>,
        environment: &str,
        variables: &HashMap<String, String>,
    ) -> ConfigResult<Self> {
        let config_directory = config_dir.into();
        debug!(
            environment = %environment,
            directory = %config_directory.display(),
            "loading orchestrator configuration"
        );

        let config = Self::load_and_merge_config(&config_directory, environment, variables)?;
        config.validate()?;

        debug!(
            config = %serde_json::to_string(&sanitize_for_logging(&config))
                .unwrap_or_else(|_| "[serialization error]".to_string()),
            "configuration loaded"
        );
        info!(
            environment = %environment,
            tenants = config.tenants.len(),
            search_paths = config.plugins.search_paths.len(),
            "Configuration loaded successfully"
        );

        Ok(Self {
            config,
            environment: environment.to_lowercase(),
            config_directory,
        })
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Owned configuration with search paths resolved against the config directory
    pub fn into_config(self) -> OrchestratorConfig {
        let search_paths = self.resolved_search_paths();
        let mut config = self.config;
        config.plugins.search_paths = search_paths;
        config
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn config_directory(&self) -> &Path {
        &self.config_directory
    }

    /// Configuration with secret-like values masked, for debugging output
    pub fn debug_config(&self) -> serde_json::Value {
        sanitize_for_logging(&self.config)
    }

    /// Manifest search paths, relative entries resolved against the config directory
    pub fn resolved_search_paths(&self) -> Vec<PathBuf> {
        self.config
            .plugins
            .search_paths
            .iter()
            .map(|path| {
                if path.is_absolute() {
                    path.clone()
                } else {
                    self.config_directory.join(path)
                }
            })
            .collect()
    }

    /// Current environment: `TENANCY_ENV`, then `APP_ENV`, then `development`
    pub fn detect_environment() -> String {
        let variables: HashMap<String, String> = env::vars().collect();
        Self::detect_environment_from(&variables)
    }

    pub fn detect_environment_from(variables: &HashMap<String, String>) -> String {
        [env_vars::TENANCY_ENV, env_vars::APP_ENV]
            .iter()
            .filter_map(|name| variables.get(*name))
            .map(|value| value.trim())
            .find(|value| !value.is_empty())
            .unwrap_or(defaults::ENVIRONMENT)
            .to_lowercase()
    }

    fn find_config_file(config_directory: &Path) -> ConfigResult<PathBuf> {
        let mut searched_paths = Vec::new();

        for name in defaults::CONFIG_FILE_NAMES {
            let config_path = config_directory.join(name);
            searched_paths.push(config_path.clone());

            if config_path.exists() {
                debug!("Found configuration file: {}", config_path.display());
                return Ok(config_path);
            }
        }

        Err(ConfigurationError::config_file_not_found(searched_paths))
    }

    /// Safely read a configuration file with a size limit
    fn read_config_file_safely(path: &Path) -> ConfigResult<String> {
        let metadata = std::fs::metadata(path)
            .map_err(|e| ConfigurationError::file_read_error(path.display().to_string(), e))?;

        if metadata.len() > MAX_CONFIG_FILE_SIZE {
            return Err(ConfigurationError::invalid_value(
                "file_size",
                metadata.len().to_string(),
                format!(
                    "Configuration file too large ({}MB > {}MB limit)",
                    metadata.len() / (1024 * 1024),
                    MAX_CONFIG_FILE_SIZE / (1024 * 1024)
                ),
            ));
        }

        if !metadata.is_file() {
            return Err(ConfigurationError::invalid_value(
                "file_type",
                "directory or special file",
                "Configuration path must point to a regular file",
            ));
        }

        std::fs::read_to_string(path)
            .map_err(|e| ConfigurationError::file_read_error(path.display().to_string(), e))
    }

    fn load_and_merge_config(
        config_directory: &Path,
        environment: &str,
        variables: &HashMap<String, String>,
    ) -> ConfigResult<OrchestratorConfig> {
        let config_file = Self::find_config_file(config_directory)?;
        let yaml_content = Self::read_config_file_safely(&config_file)?;

        let mut yaml_data: YamlValue = serde_yaml::from_str(&yaml_content)
            .map_err(|e| ConfigurationError::invalid_yaml(config_file.display().to_string(), e))?;

        let environment = environment.to_lowercase();
        if let Some(env_overrides) = yaml_data
            .get(YamlValue::String(environment.clone()))
            .cloned()
        {
            debug!("Applying environment-specific overrides for: {}", environment);
            merge_yaml_values(&mut yaml_data, env_overrides);
        }

        if let YamlValue::Mapping(ref mut map) = yaml_data {
            for section in defaults::ENVIRONMENT_SECTIONS {
                map.remove(YamlValue::String(section.to_string()));
            }
            map.remove(YamlValue::String(environment));
        }

        expand_env_placeholders(&mut yaml_data, variables)?;

        // an empty file parses as null
        if yaml_data.is_null() {
            return Ok(OrchestratorConfig::default());
        }

        serde_yaml::from_value(yaml_data).map_err(|e| {
            ConfigurationError::invalid_yaml(
                config_file.display().to_string(),
                format!("Failed to deserialize configuration: {e}"),
            )
        })
    }
}

/// Recursively merge YAML values (environment overrides into base config)
fn merge_yaml_values(base: &mut YamlValue, override_value: YamlValue) {
    match (&mut *base, override_value) {
        (YamlValue::Mapping(base_map), YamlValue::Mapping(override_map)) => {
            for (key, value) in override_map {
                if let Some(existing_value) = base_map.get_mut(&key) {
                    merge_yaml_values(existing_value, value);
                } else {
                    base_map.insert(key, value);
                }
            }
        }
        (base_ref, override_val) => {
            *base_ref = override_val;
        }
    }
}

/// Replace `${VAR}` and `${VAR:-default}` in every string leaf
///
/// Variables come from `variables`, never from the process environment
/// directly. A placeholder with no value and no default is an error.
pub fn expand_env_placeholders(
    value: &mut YamlValue,
    variables: &HashMap<String, String>,
) -> ConfigResult<()> {
    let pattern = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}")
        .map_err(|e| ConfigurationError::validation_error(e.to_string()))?;
    expand_recursive(value, variables, &pattern)
}

fn expand_recursive(
    value: &mut YamlValue,
    variables: &HashMap<String, String>,
    pattern: &Regex,
) -> ConfigResult<()> {
    match value {
        YamlValue::String(text) => {
            if text.contains("${") {
                *text = expand_string(text, variables, pattern)?;
            }
        }
        YamlValue::Sequence(items) => {
            for item in items {
                expand_recursive(item, variables, pattern)?;
            }
        }
        YamlValue::Mapping(map) => {
            for (_, item) in map.iter_mut() {
                expand_recursive(item, variables, pattern)?;
            }
        }
        YamlValue::Tagged(tagged) => expand_recursive(&mut tagged.value, variables, pattern)?,
        YamlValue::Null | YamlValue::Bool(_) | YamlValue::Number(_) => {}
    }
    Ok(())
}

fn expand_string(
    text: &str,
    variables: &HashMap<String, String>,
    pattern: &Regex,
) -> ConfigResult<String> {
    let mut expanded = String::with_capacity(text.len());
    let mut last = 0;

    for captures in pattern.captures_iter(text) {
        let Some(whole) = captures.get(0) else {
            continue;
        };
        let name = &captures[1];
        let replacement = match (variables.get(name), captures.get(2)) {
            (Some(value), _) => value.as_str(),
            (None, Some(default)) => default.as_str(),
            (None, None) => {
                return Err(ConfigurationError::environment_variable_error(
                    name,
                    "variable is not set and has no default",
                ))
            }
        };
        expanded.push_str(&text[last..whole.start()]);
        expanded.push_str(replacement);
        last = whole.end();
    }
    expanded.push_str(&text[last..]);
    Ok(expanded)
}

/// Configuration as JSON with secret-like values masked
pub fn sanitize_for_logging(config: &OrchestratorConfig) -> serde_json::Value {
    match serde_json::to_value(config) {
        Ok(json) => ConfigValue::from(json).sanitized().to_json(),
        Err(e) => serde_json::Value::String(format!("[serialization error: {e}]")),
    }
}
