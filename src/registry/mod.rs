//! # Plugin Registry
//!
//! Manifests and the immutable snapshots they are published in.
//!
//! ```text
//! Registry
//! ├── PluginManifest     (declared id, version, dependencies, capabilities)
//! ├── RegistrySnapshot   (immutable, declaration-ordered)
//! └── PluginRegistry     (discovery + atomic publish)
//! ```

pub mod manifest;
pub mod plugin_registry;

pub use manifest::{
    Capability, LoadingStrategy, PluginManifest, RawPluginManifest, RegistryError,
    RegistryResult,
};
pub use plugin_registry::{PluginRegistry, RegistrySnapshot, RegistryStats};
