//! # System Constants
//!
//! Names, defaults and confidence levels that define the operational boundaries
//! of business context detection, plugin loading and configuration merging.

/// Environment variables consulted by the environment detection strategy,
/// in the order they are checked.
pub mod env_vars {
    /// Explicit business context selector (most specific)
    pub const BUSINESS_CONTEXT: &str = "BUSINESS_CONTEXT";
    /// Business mode selector used by single-tenant deployments
    pub const BUSINESS_MODE: &str = "BUSINESS_MODE";
    /// Environment name used to pick the configuration overlay
    pub const TENANCY_ENV: &str = "TENANCY_ENV";
    /// Secondary environment name lookup
    pub const APP_ENV: &str = "APP_ENV";
    /// Explicit log filter override
    pub const TENANCY_LOG: &str = "TENANCY_LOG";
    /// Log output format (`json` or `pretty`)
    pub const TENANCY_LOG_FORMAT: &str = "TENANCY_LOG_FORMAT";
}

/// Inbound request metadata consulted by detection
pub mod headers {
    /// Explicit business context header
    pub const BUSINESS_CONTEXT: &str = "x-business-context";
    /// Host header, used when the caller did not supply a domain
    pub const HOST: &str = "host";
}

/// Confidence scores reported by the built-in detection strategies
pub mod confidence {
    pub const ENV_BUSINESS_CONTEXT: f64 = 0.95;
    pub const ENV_BUSINESS_MODE: f64 = 0.9;
    pub const ENV_MAPPING: f64 = 0.9;
    pub const HEADER: f64 = 0.9;
    pub const DOMAIN_SUBDOMAIN: f64 = 0.85;
    pub const DOMAIN_PATTERN: f64 = 0.8;
    pub const DOMAIN_SUBSTRING: f64 = 0.7;
    pub const PORT: f64 = 0.8;
    /// Reported when no strategy matched
    pub const FALLBACK: f64 = 0.1;
    /// Reported when detection itself failed
    pub const DETECTION_FAILED: f64 = 0.0;
}

/// Loader and cache defaults
pub mod defaults {
    /// Per-plugin instantiation budget
    pub const PLUGIN_TIMEOUT_MS: u64 = 5_000;
    /// Wall-clock ceiling for a whole load phase
    pub const PERFORMANCE_BUDGET_MS: u64 = 30_000;
    /// Merged configuration cache TTL
    pub const CACHE_TTL_SECONDS: u64 = 300;
    /// Default environment when none is set
    pub const ENVIRONMENT: &str = "development";
    /// Default config file names, in lookup order
    pub const CONFIG_FILE_NAMES: [&str; 2] = ["tenancy-config.yaml", "tenancy-config.yml"];
    /// Environment overlay sections stripped after merging
    pub const ENVIRONMENT_SECTIONS: [&str; 3] = ["development", "test", "production"];
}

/// Observability event names emitted through the orchestration logger
pub mod events {
    pub const STAGE_TRANSITION: &str = "orchestration.stage_transition";
    pub const CONTEXT_DETECTED: &str = "orchestration.context_detected";
    pub const PLUGIN_LOADED: &str = "orchestration.plugin_loaded";
    pub const PLUGIN_EXCLUDED: &str = "orchestration.plugin_excluded";
    pub const BUDGET_EXCEEDED: &str = "orchestration.budget_exceeded";
    pub const CACHE_HIT: &str = "orchestration.cache_hit";
    pub const CACHE_MISS: &str = "orchestration.cache_miss";
    pub const SNAPSHOT_PUBLISHED: &str = "orchestration.snapshot_published";
    pub const RUN_FAILED: &str = "orchestration.run_failed";
}
