//! # Plugin Loading
//!
//! Security checks, per-plugin timeouts, dependency-ordered concurrent
//! instantiation and lazy access over a resolved plugin order.

pub mod plugin;
pub mod plugin_loader;
pub mod security;

pub use plugin::{
    FactoryRegistry, InertPlugin, PluginFactory, PluginInitContext, PluginInitError,
    PluginInstance,
};
pub use plugin_loader::{
    LoadError, LoadReport, LoadResult, LoadedPluginSet, LoaderSettings, PluginLoadStatus,
    PluginLoader, PluginOutcome,
};
pub use security::{AllowListEntry, SecurityError, SecurityPolicy};
