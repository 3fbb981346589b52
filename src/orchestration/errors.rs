//! # Orchestration Errors
//!
//! Stage errors as raised by each component, and the structured error the
//! facade hands to the host: failing stage, taxonomy kind and cause chain.

use serde::{Deserialize, Serialize};
use std::error::Error as StdError;
use std::fmt;
use thiserror::Error;

use crate::config::ConfigurationError;
use crate::context::DetectionError;
use crate::loader::LoadError;
use crate::merge::ConfigMergeError;
use crate::registry::RegistryError;
use crate::resolution::ResolutionError;
use crate::state_machine::{OrchestrationState, StateMachineError};

/// An error raised inside one pipeline stage, before classification
#[derive(Debug, Error)]
pub enum StageError {
    #[error(transparent)]
    Detection(#[from] DetectionError),

    #[error(transparent)]
    Discovery(#[from] RegistryError),

    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    #[error(transparent)]
    Loading(#[from] LoadError),

    #[error(transparent)]
    Merge(#[from] ConfigMergeError),

    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    StateMachine(#[from] StateMachineError),
}

/// Error taxonomy shared by every stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    DetectionAmbiguity,
    Discovery,
    MissingDependency,
    Cycle,
    PluginTimeout,
    SecurityRejection,
    PluginFailure,
    RequiredPluginExcluded,
    ValidationError,
    CacheStale,
    Configuration,
    InvalidTransition,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::DetectionAmbiguity => "detection_ambiguity",
            Self::Discovery => "discovery",
            Self::MissingDependency => "missing_dependency",
            Self::Cycle => "cycle",
            Self::PluginTimeout => "plugin_timeout",
            Self::SecurityRejection => "security_rejection",
            Self::PluginFailure => "plugin_failure",
            Self::RequiredPluginExcluded => "required_plugin_excluded",
            Self::ValidationError => "validation_error",
            Self::CacheStale => "cache_stale",
            Self::Configuration => "configuration",
            Self::InvalidTransition => "invalid_transition",
        };
        f.write_str(name)
    }
}

/// What the host receives when a run fails
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
#[error("Orchestration failed during {stage} ({kind}): {message}")]
pub struct OrchestrationError {
    /// The stage that was active when the run failed
    pub stage: OrchestrationState,
    pub kind: ErrorKind,
    pub fatal: bool,
    pub message: String,
    /// Source chain below `message`, outermost first
    pub causes: Vec<String>,
    /// Tenant being resolved, when detection had completed
    pub tenant: Option<String>,
}

impl OrchestrationError {
    pub fn new(
        stage: OrchestrationState,
        kind: ErrorKind,
        fatal: bool,
        error: &(dyn StdError + 'static),
    ) -> Self {
        Self {
            stage,
            kind,
            fatal,
            message: error.to_string(),
            causes: cause_chain(error),
            tenant: None,
        }
    }

    pub fn with_tenant(mut self, tenant: impl Into<String>) -> Self {
        self.tenant = Some(tenant.into());
        self
    }
}

/// `source()` messages below `error`, skipping repeats of the parent message
pub fn cause_chain(error: &(dyn StdError + 'static)) -> Vec<String> {
    let mut causes = Vec::new();
    let mut previous = error.to_string();
    let mut current = error.source();
    while let Some(cause) = current {
        let message = cause.to_string();
        if message != previous {
            causes.push(message.clone());
        }
        previous = message;
        current = cause.source();
    }
    causes
}

pub type OrchestratorResult<T> = Result<T, OrchestrationError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::SecurityError;

    #[test]
    fn test_cause_chain_follows_sources() {
        let error = StageError::from(LoadError::SecurityRejection {
            plugin: "payments".to_string(),
            source: SecurityError::MissingSignature {
                plugin: "payments".to_string(),
            },
        });
        let orchestration = OrchestrationError::new(
            OrchestrationState::Loading,
            ErrorKind::SecurityRejection,
            true,
            &error,
        )
        .with_tenant("salarium");

        assert!(orchestration.message.contains("rejected by security policy"));
        assert_eq!(orchestration.causes, vec!["Plugin 'payments' has no signature"]);
        assert_eq!(orchestration.tenant.as_deref(), Some("salarium"));
        assert!(orchestration.to_string().contains("loading (security_rejection)"));
    }
}
