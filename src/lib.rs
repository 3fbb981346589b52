#![allow(clippy::doc_markdown)] // Allow technical terms like YAML, TTL in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Tenancy Core
//!
//! Runtime orchestration for multi-tenant platforms: decide which business
//! context a process or request belongs to, activate that tenant's plugins in
//! dependency order, and hand the host framework one merged configuration.
//!
//! ## Pipeline
//!
//! ```text
//! RuntimeSignals ─▶ ContextDetector ─▶ PluginRegistry ─▶ DependencyResolver
//!                                                              │
//!            OrchestrationResult ◀─ ConfigurationManager ◀─ PluginLoader
//! ```
//!
//! Every run either publishes a complete, immutable [`OrchestrationResult`]
//! or leaves the previous one in place.
//!
//! ## Module Organization
//!
//! - [`context`] - Business context detection from env, headers, domain and port
//! - [`registry`] - Plugin manifests and atomically published snapshots
//! - [`resolution`] - Dependency closure and deterministic topological order
//! - [`loader`] - Security checks, timeouts, lazy and on-demand instantiation
//! - [`merge`] - Configuration fragments, merge strategies and the merge cache
//! - [`state_machine`] - Pipeline stages and their transitions
//! - [`config`] - YAML configuration with environment overlays
//! - [`orchestration`] - The facade tying the stages together
//! - [`logging`] - Structured logging setup and the orchestration logger seam
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use tenancy_core::config::ConfigLoader;
//! use tenancy_core::context::RuntimeSignals;
//! use tenancy_core::orchestration::Orchestrator;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! tenancy_core::logging::init_structured_logging();
//!
//! let loaded = ConfigLoader::load_from_directory("config")?;
//! let orchestrator = Orchestrator::new(loaded.into_config())?;
//!
//! let result = orchestrator
//!     .initialize(&RuntimeSignals::from_process_env())
//!     .await?;
//! println!("{} -> {:?}", result.tenant(), result.plugin_order);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod constants;
pub mod context;
pub mod loader;
pub mod logging;
pub mod merge;
pub mod orchestration;
pub mod registry;
pub mod resolution;
pub mod state_machine;

pub use config::{ConfigLoader, ConfigurationError, OrchestratorConfig, TenantProfile};
pub use context::{BusinessContext, ContextDetector, DetectionResult, RuntimeSignals};
pub use loader::{LoadedPluginSet, PluginFactory, PluginInstance, SecurityPolicy};
pub use merge::{ConfigValue, MergeStrategy, MergedConfig};
pub use orchestration::{
    ErrorKind, OrchestrationError, OrchestrationResult, Orchestrator, OrchestratorBuilder,
    OrchestratorResult,
};
pub use registry::{Capability, LoadingStrategy, PluginManifest};
pub use state_machine::OrchestrationState;
