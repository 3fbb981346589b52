//! # Plugin Manifests
//!
//! The explicit record a plugin declares about itself. Capabilities are checked
//! against the closed set of supported interfaces when the manifest is read.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

use crate::merge::ConfigValue;

/// Errors raised while discovering or registering manifests
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Failed to read manifest {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse manifest {path}: {reason}")]
    Parse { path: PathBuf, reason: String },

    #[error("Manifest {path} is too large: {size} bytes (limit {limit})")]
    TooLarge { path: PathBuf, size: u64, limit: u64 },

    #[error("Invalid manifest for plugin '{plugin}': {reason}")]
    InvalidManifest { plugin: String, reason: String },

    #[error("Plugin '{plugin}' declares unsupported capability '{capability}'")]
    UnsupportedCapability { plugin: String, capability: String },

    #[error("Plugin id '{plugin}' is declared more than once")]
    DuplicatePlugin { plugin: String },
}

pub type RegistryResult<T> = Result<T, RegistryError>;

/// When a plugin is instantiated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadingStrategy {
    /// All at initialization, in resolved order
    #[default]
    Eager,
    /// On first access to one of the plugin's capabilities
    Lazy,
    /// Only on an explicit caller request
    OnDemand,
}

impl fmt::Display for LoadingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Eager => write!(f, "eager"),
            Self::Lazy => write!(f, "lazy"),
            Self::OnDemand => write!(f, "on_demand"),
        }
    }
}

impl FromStr for LoadingStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "eager" => Ok(Self::Eager),
            "lazy" => Ok(Self::Lazy),
            "on_demand" | "ondemand" => Ok(Self::OnDemand),
            _ => Err(format!("Unknown loading strategy: {s}")),
        }
    }
}

/// Closed set of interfaces a plugin may contribute to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Collections,
    Globals,
    Fields,
    Hooks,
    Endpoints,
    Admin,
    Jobs,
    AccessControl,
}

impl Capability {
    pub const ALL: [Capability; 8] = [
        Self::Collections,
        Self::Globals,
        Self::Fields,
        Self::Hooks,
        Self::Endpoints,
        Self::Admin,
        Self::Jobs,
        Self::AccessControl,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Collections => "collections",
            Self::Globals => "globals",
            Self::Fields => "fields",
            Self::Hooks => "hooks",
            Self::Endpoints => "endpoints",
            Self::Admin => "admin",
            Self::Jobs => "jobs",
            Self::AccessControl => "access_control",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Capability {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|capability| capability.as_str() == normalized)
            .ok_or_else(|| format!("Unknown capability: {s}"))
    }
}

/// Default origin for manifests that do not name one
pub const LOCAL_ORIGIN: &str = "local";

fn default_origin() -> String {
    LOCAL_ORIGIN.to_string()
}

/// Manifest as written on disk, before capability validation
#[derive(Debug, Clone, Deserialize)]
pub struct RawPluginManifest {
    pub id: String,
    pub version: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, alias = "dependencies")]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub loading_strategy: Option<LoadingStrategy>,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default = "default_origin")]
    pub source_origin: String,
    #[serde(default)]
    pub signature: Option<String>,
    #[serde(default)]
    pub config: Option<ConfigValue>,
    #[serde(default)]
    pub append_keys: Vec<String>,
}

/// Validated plugin manifest
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PluginManifest {
    pub id: String,
    pub version: String,
    pub description: Option<String>,
    pub depends_on: Vec<String>,
    /// `None` means the loader default applies
    pub loading_strategy: Option<LoadingStrategy>,
    pub capabilities: BTreeSet<Capability>,
    pub source_origin: String,
    pub signature: Option<String>,
    /// Configuration fragment contributed by the plugin
    pub config: Option<ConfigValue>,
    pub append_keys: BTreeSet<String>,
}

impl PluginManifest {
    /// Minimal manifest, mostly for programmatic registration and tests
    pub fn new(id: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            version: version.into(),
            description: None,
            depends_on: Vec::new(),
            loading_strategy: None,
            capabilities: BTreeSet::new(),
            source_origin: default_origin(),
            signature: None,
            config: None,
            append_keys: BTreeSet::new(),
        }
    }

    #[must_use]
    pub fn depends_on<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on.extend(ids.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn with_strategy(mut self, strategy: LoadingStrategy) -> Self {
        self.loading_strategy = Some(strategy);
        self
    }

    #[must_use]
    pub fn with_capabilities<I>(mut self, capabilities: I) -> Self
    where
        I: IntoIterator<Item = Capability>,
    {
        self.capabilities.extend(capabilities);
        self
    }

    #[must_use]
    pub fn with_origin(mut self, origin: impl Into<String>, signature: Option<&str>) -> Self {
        self.source_origin = origin.into();
        self.signature = signature.map(str::to_string);
        self
    }

    #[must_use]
    pub fn with_config(mut self, config: ConfigValue) -> Self {
        self.config = Some(config);
        self
    }

    pub fn effective_strategy(&self, default: LoadingStrategy) -> LoadingStrategy {
        self.loading_strategy.unwrap_or(default)
    }

    pub fn has_capability(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }
}

impl TryFrom<RawPluginManifest> for PluginManifest {
    type Error = RegistryError;

    fn try_from(raw: RawPluginManifest) -> RegistryResult<Self> {
        let id = raw.id.trim().to_string();
        if id.is_empty() {
            return Err(RegistryError::InvalidManifest {
                plugin: raw.id,
                reason: "id must not be empty".to_string(),
            });
        }
        if raw.version.trim().is_empty() {
            return Err(RegistryError::InvalidManifest {
                plugin: id,
                reason: "version must not be empty".to_string(),
            });
        }

        let capabilities = raw
            .capabilities
            .iter()
            .map(|name| {
                name.parse::<Capability>()
                    .map_err(|_| RegistryError::UnsupportedCapability {
                        plugin: id.clone(),
                        capability: name.clone(),
                    })
            })
            .collect::<RegistryResult<BTreeSet<_>>>()?;

        let mut depends_on = Vec::with_capacity(raw.depends_on.len());
        for dependency in raw.depends_on {
            let dependency = dependency.trim().to_string();
            if !depends_on.contains(&dependency) {
                depends_on.push(dependency);
            }
        }

        Ok(Self {
            id,
            version: raw.version,
            description: raw.description,
            depends_on,
            loading_strategy: raw.loading_strategy,
            capabilities,
            source_origin: raw.source_origin,
            signature: raw.signature,
            config: raw.config,
            append_keys: raw.append_keys.into_iter().collect(),
        })
    }
}
