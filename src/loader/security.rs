//! # Plugin Security Policy
//!
//! Origin/signature allow-listing checked before instantiation, and the
//! sandbox capability set plugins are narrowed to.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use thiserror::Error;

use crate::registry::{Capability, PluginManifest};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SecurityError {
    #[error("Plugin '{plugin}' comes from untrusted origin '{origin}'")]
    UntrustedOrigin { plugin: String, origin: String },

    #[error("Plugin '{plugin}' has no signature")]
    MissingSignature { plugin: String },

    #[error("Plugin '{plugin}' signature is not trusted for origin '{origin}'")]
    InvalidSignature { plugin: String, origin: String },
}

/// One trusted source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllowListEntry {
    pub origin: String,
    /// Accepted signatures; empty accepts any signature from this origin
    #[serde(default)]
    pub signatures: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityPolicy {
    pub verify_signatures: bool,
    pub allow_list: Vec<AllowListEntry>,
    /// Narrow capabilities and isolate instantiation in its own task
    pub sandbox: bool,
    /// Capabilities a sandboxed plugin may be granted
    pub sandbox_capabilities: BTreeSet<Capability>,
}

impl Default for SecurityPolicy {
    fn default() -> Self {
        Self {
            verify_signatures: false,
            allow_list: Vec::new(),
            sandbox: false,
            sandbox_capabilities: Capability::ALL.into_iter().collect(),
        }
    }
}

impl SecurityPolicy {
    pub fn permissive() -> Self {
        Self::default()
    }

    /// Check a manifest's origin and signature against the allow-list
    ///
    /// Always passes when signature verification is off.
    pub fn verify(&self, manifest: &PluginManifest) -> Result<(), SecurityError> {
        if !self.verify_signatures {
            return Ok(());
        }

        let entry = self
            .allow_list
            .iter()
            .find(|entry| entry.origin == manifest.source_origin)
            .ok_or_else(|| SecurityError::UntrustedOrigin {
                plugin: manifest.id.clone(),
                origin: manifest.source_origin.clone(),
            })?;

        let signature = manifest
            .signature
            .as_deref()
            .filter(|signature| !signature.trim().is_empty())
            .ok_or_else(|| SecurityError::MissingSignature {
                plugin: manifest.id.clone(),
            })?;

        if entry.signatures.is_empty() || entry.signatures.iter().any(|trusted| trusted == signature) {
            Ok(())
        } else {
            Err(SecurityError::InvalidSignature {
                plugin: manifest.id.clone(),
                origin: manifest.source_origin.clone(),
            })
        }
    }

    /// Capabilities exposed to the plugin during instantiation
    pub fn granted_capabilities(&self, manifest: &PluginManifest) -> BTreeSet<Capability> {
        if self.sandbox {
            manifest
                .capabilities
                .intersection(&self.sandbox_capabilities)
                .copied()
                .collect()
        } else {
            manifest.capabilities.clone()
        }
    }
}
