//! On-disk platform fixture: a config directory with five tenants and a
//! plugin directory of manifests, inside a temp dir.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tenancy_core::config::ConfigLoader;
use tenancy_core::OrchestratorConfig;

pub const PLATFORM_CONFIG: &str = r#"
detection:
  domain_rules:
    - pattern: intellitrade
      context: intellitrade
    - pattern: "salarium\\.(com|io)$"
      context: salarium
      match_kind: regex
    - pattern: latinos
      context: latinos
      match_kind: contains
    - pattern: capacita
      context: capacita
    - pattern: emprende
      context: emprendimiento
      match_kind: contains
  port_rules:
    - port: 3001
      context: latinos
    - port: 3002
      context: capacita

tenants:
  intellitrade:
    plugins: [auth, trading]
    config:
      site:
        name: IntelliTrade
  salarium:
    plugins: [auth, payroll]
    config:
      site:
        name: Salarium
  latinos:
    plugins: [auth, community]
    required_plugins: [community]
    append_keys: [navigation]
    config:
      site:
        name: Latinos
        locale: es
      navigation: [comunidad]
  capacita:
    plugins: [auth, courses]
  emprendimiento:
    plugins: [auth, mentoring]

base_config:
  site:
    name: Platform
    locale: en
  navigation: [home]
  database:
    url: "postgres://${DB_HOST:-localhost}/platform"
    password: "${DB_PASSWORD:-changeme}"

plugins:
  search_paths: [plugins]

loader:
  default_strategy: eager
  plugin_timeout_ms: 200

merge:
  strategy: deep
  cache_ttl_seconds: 60

test:
  loader:
    plugin_timeout_ms: 100
"#;

pub const MANIFESTS: [(&str, &str); 6] = [
    (
        "auth",
        r#"
id: auth
version: "1.0.0"
capabilities: [access_control, hooks]
"#,
    ),
    (
        "trading",
        r#"
id: trading
version: "2.1.0"
depends_on: [auth]
capabilities: [collections, endpoints]
config:
  features:
    trading: true
"#,
    ),
    (
        "payroll",
        r#"
id: payroll
version: "1.4.0"
depends_on: [auth]
capabilities: [collections, jobs]
config:
  payroll:
    currency: EUR
"#,
    ),
    (
        "community",
        r#"
id: community
version: "0.9.0"
depends_on: [auth]
capabilities: [collections, fields]
append_keys: [navigation]
config:
  navigation: [foro]
"#,
    ),
    (
        "courses",
        r#"
id: courses
version: "3.0.0"
depends_on: [auth]
loading_strategy: lazy
capabilities: [collections]
"#,
    ),
    (
        "mentoring",
        r#"
id: mentoring
version: "1.0.0"
depends_on: [auth]
loading_strategy: on_demand
capabilities: [admin]
"#,
    ),
];

/// Config directory plus plugin directory, removed on drop
pub struct TestPlatform {
    _temp_dir: TempDir,
    config_dir: PathBuf,
}

impl TestPlatform {
    pub fn new() -> Self {
        Self::with_config(PLATFORM_CONFIG)
    }

    pub fn with_config(config_yaml: &str) -> Self {
        let temp_dir = TempDir::new().unwrap();
        let config_dir = temp_dir.path().to_path_buf();
        fs::write(config_dir.join("tenancy-config.yaml"), config_yaml).unwrap();
        fs::create_dir_all(config_dir.join("plugins")).unwrap();

        let platform = Self {
            _temp_dir: temp_dir,
            config_dir,
        };
        for (id, manifest) in MANIFESTS {
            platform.write_manifest(id, manifest);
        }
        platform
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn plugin_dir(&self) -> PathBuf {
        self.config_dir.join("plugins")
    }

    pub fn write_manifest(&self, id: &str, yaml: &str) {
        fs::write(self.plugin_dir().join(format!("{id}.yaml")), yaml).unwrap();
    }

    pub fn remove_manifest(&self, id: &str) {
        fs::remove_file(self.plugin_dir().join(format!("{id}.yaml"))).unwrap();
    }

    /// Load the `development` configuration with a fixed variable map
    pub fn load(&self) -> OrchestratorConfig {
        self.load_env("development", &HashMap::new())
    }

    pub fn load_env(&self, environment: &str, variables: &HashMap<String, String>) -> OrchestratorConfig {
        ConfigLoader::load_from_directory_with_env(&self.config_dir, environment, variables)
            .unwrap()
            .into_config()
    }
}
