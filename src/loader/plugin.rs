//! # Plugin Instances and Factories
//!
//! Host code supplies a [`PluginFactory`] per plugin id. Manifests with no
//! registered factory instantiate as [`InertPlugin`]s: they still take part in
//! ordering and configuration but carry no behavior.

use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use crate::registry::{Capability, PluginManifest};

/// Failure reported by a factory while instantiating a plugin
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct PluginInitError {
    pub message: String,
    /// Whether the plugin considers this failure fatal for the whole load
    pub fatal: bool,
}

impl PluginInitError {
    pub fn recoverable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            fatal: false,
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            fatal: true,
        }
    }
}

/// A live plugin
pub trait PluginInstance: Send + Sync + fmt::Debug {
    fn id(&self) -> &str;

    fn version(&self) -> &str;

    /// Capabilities this instance was granted at instantiation
    fn capabilities(&self) -> &BTreeSet<Capability>;
}

/// What a factory receives when asked for an instance
#[derive(Debug, Clone)]
pub struct PluginInitContext {
    pub manifest: Arc<PluginManifest>,
    /// Declared capabilities, narrowed by the sandbox policy when enabled
    pub capabilities: BTreeSet<Capability>,
    pub sandboxed: bool,
}

#[async_trait]
pub trait PluginFactory: Send + Sync {
    async fn instantiate(
        &self,
        context: PluginInitContext,
    ) -> Result<Arc<dyn PluginInstance>, PluginInitError>;
}

/// Plugin with no host-supplied behavior
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InertPlugin {
    id: String,
    version: String,
    capabilities: BTreeSet<Capability>,
}

impl InertPlugin {
    pub fn from_context(context: &PluginInitContext) -> Self {
        Self {
            id: context.manifest.id.clone(),
            version: context.manifest.version.clone(),
            capabilities: context.capabilities.clone(),
        }
    }
}

impl PluginInstance for InertPlugin {
    fn id(&self) -> &str {
        &self.id
    }

    fn version(&self) -> &str {
        &self.version
    }

    fn capabilities(&self) -> &BTreeSet<Capability> {
        &self.capabilities
    }
}

/// Factories keyed by plugin id
#[derive(Default)]
pub struct FactoryRegistry {
    factories: DashMap<String, Arc<dyn PluginFactory>>,
}

impl fmt::Debug for FactoryRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut ids: Vec<String> = self.factories.iter().map(|entry| entry.key().clone()).collect();
        ids.sort();
        f.debug_struct("FactoryRegistry").field("plugins", &ids).finish()
    }
}

impl FactoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, plugin_id: impl Into<String>, factory: Arc<dyn PluginFactory>) {
        self.factories.insert(plugin_id.into(), factory);
    }

    pub fn unregister(&self, plugin_id: &str) -> bool {
        self.factories.remove(plugin_id).is_some()
    }

    pub fn get(&self, plugin_id: &str) -> Option<Arc<dyn PluginFactory>> {
        self.factories
            .get(plugin_id)
            .map(|entry| entry.value().clone())
    }

    pub fn contains(&self, plugin_id: &str) -> bool {
        self.factories.contains_key(plugin_id)
    }

    /// Instantiate through the registered factory, or as an inert plugin
    pub async fn instantiate(
        &self,
        context: PluginInitContext,
    ) -> Result<Arc<dyn PluginInstance>, PluginInitError> {
        match self.get(&context.manifest.id) {
            Some(factory) => factory.instantiate(context).await,
            None => Ok(Arc::new(InertPlugin::from_context(&context))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingFactory;

    #[async_trait]
    impl PluginFactory for FailingFactory {
        async fn instantiate(
            &self,
            _context: PluginInitContext,
        ) -> Result<Arc<dyn PluginInstance>, PluginInitError> {
            Err(PluginInitError::fatal("database unreachable"))
        }
    }

    fn context(id: &str) -> PluginInitContext {
        PluginInitContext {
            manifest: Arc::new(
                PluginManifest::new(id, "1.0").with_capabilities([Capability::Collections]),
            ),
            capabilities: [Capability::Collections].into_iter().collect(),
            sandboxed: false,
        }
    }

    #[tokio::test]
    async fn test_missing_factory_yields_inert_plugin() {
        let registry = FactoryRegistry::new();
        let plugin = registry.instantiate(context("seo")).await.unwrap();
        assert_eq!(plugin.id(), "seo");
        assert_eq!(plugin.version(), "1.0");
        assert!(plugin.capabilities().contains(&Capability::Collections));
    }

    #[tokio::test]
    async fn test_registered_factory_is_used() {
        let registry = FactoryRegistry::new();
        registry.register("billing", Arc::new(FailingFactory));
        let error = registry.instantiate(context("billing")).await.unwrap_err();
        assert!(error.fatal);
        assert_eq!(error.to_string(), "database unreachable");
        assert!(registry.unregister("billing"));
        assert!(registry.instantiate(context("billing")).await.is_ok());
    }
}
