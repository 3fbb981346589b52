//! Plugin factories with controllable behavior

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tenancy_core::loader::{InertPlugin, PluginFactory, PluginInitContext, PluginInitError};
use tenancy_core::PluginInstance;

/// Sleeps before producing an inert instance
pub struct SlowFactory {
    pub delay: Duration,
}

#[async_trait]
impl PluginFactory for SlowFactory {
    async fn instantiate(
        &self,
        context: PluginInitContext,
    ) -> Result<Arc<dyn PluginInstance>, PluginInitError> {
        tokio::time::sleep(self.delay).await;
        Ok(Arc::new(InertPlugin::from_context(&context)))
    }
}

/// Always fails with the configured severity
pub struct FailingFactory {
    pub fatal: bool,
}

#[async_trait]
impl PluginFactory for FailingFactory {
    async fn instantiate(
        &self,
        _context: PluginInitContext,
    ) -> Result<Arc<dyn PluginInstance>, PluginInitError> {
        if self.fatal {
            Err(PluginInitError::fatal("database unreachable"))
        } else {
            Err(PluginInitError::recoverable("optional service offline"))
        }
    }
}

/// Counts instantiations
#[derive(Default)]
pub struct CountingFactory {
    pub calls: AtomicUsize,
}

impl CountingFactory {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PluginFactory for CountingFactory {
    async fn instantiate(
        &self,
        context: PluginInitContext,
    ) -> Result<Arc<dyn PluginInstance>, PluginInitError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(InertPlugin::from_context(&context)))
    }
}
