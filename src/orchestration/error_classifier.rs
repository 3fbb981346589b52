//! # Stage Error Classification
//!
//! Maps every stage error onto the shared taxonomy and decides whether it
//! aborts the run.
//!
//! | Kind | Fatal |
//! |---|---|
//! | DetectionAmbiguity | no |
//! | MissingDependency, Cycle | yes |
//! | PluginTimeout | only when timeouts are configured fatal |
//! | SecurityRejection | yes |
//! | ValidationError | yes |
//! | CacheStale | no |

use serde::{Deserialize, Serialize};

use super::errors::{ErrorKind, StageError};
use crate::loader::LoadError;
use crate::merge::ConfigMergeError;
use crate::registry::RegistryError;
use crate::resolution::ResolutionError;

/// Result of error classification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorClassification {
    pub kind: ErrorKind,
    pub fatal: bool,
    /// Stable code for log searches
    pub error_code: String,
}

impl ErrorClassification {
    fn new(kind: ErrorKind, fatal: bool, code: &str) -> Self {
        Self {
            kind,
            fatal,
            error_code: code.to_string(),
        }
    }
}

pub trait ErrorClassifier: Send + Sync {
    fn classify_error(&self, error: &StageError) -> ErrorClassification;

    fn classifier_name(&self) -> &'static str;
}

#[derive(Debug, Clone, Default)]
pub struct StandardErrorClassifier {
    timeouts_fatal: bool,
}

impl StandardErrorClassifier {
    pub fn new(timeouts_fatal: bool) -> Self {
        Self { timeouts_fatal }
    }

    fn classify_load_error(&self, error: &LoadError) -> ErrorClassification {
        match error {
            LoadError::PluginTimeout { .. } => ErrorClassification::new(
                ErrorKind::PluginTimeout,
                self.timeouts_fatal,
                "LOAD_TIMEOUT",
            ),
            LoadError::SecurityRejection { .. } => {
                ErrorClassification::new(ErrorKind::SecurityRejection, true, "LOAD_SECURITY")
            }
            LoadError::PluginFailed { source, .. } => {
                ErrorClassification::new(ErrorKind::PluginFailure, source.fatal, "LOAD_FAILED")
            }
            LoadError::RequiredPluginExcluded { .. } => ErrorClassification::new(
                ErrorKind::RequiredPluginExcluded,
                true,
                "LOAD_REQUIRED_EXCLUDED",
            ),
            LoadError::NotAvailable { .. } => {
                ErrorClassification::new(ErrorKind::PluginFailure, false, "LOAD_NOT_AVAILABLE")
            }
        }
    }
}

impl ErrorClassifier for StandardErrorClassifier {
    fn classify_error(&self, error: &StageError) -> ErrorClassification {
        match error {
            StageError::Detection(_) => ErrorClassification::new(
                ErrorKind::DetectionAmbiguity,
                false,
                "DETECTION_AMBIGUOUS",
            ),
            StageError::Discovery(registry_error) => {
                let code = match registry_error {
                    RegistryError::UnsupportedCapability { .. } => "DISCOVERY_CAPABILITY",
                    RegistryError::DuplicatePlugin { .. } => "DISCOVERY_DUPLICATE",
                    _ => "DISCOVERY_FAILED",
                };
                ErrorClassification::new(ErrorKind::Discovery, true, code)
            }
            StageError::Resolution(resolution_error) => match resolution_error {
                ResolutionError::Cycle { .. } => {
                    ErrorClassification::new(ErrorKind::Cycle, true, "RESOLUTION_CYCLE")
                }
                ResolutionError::MissingDependency { .. } => ErrorClassification::new(
                    ErrorKind::MissingDependency,
                    true,
                    "RESOLUTION_MISSING",
                ),
                ResolutionError::UnknownPlugin { .. } => ErrorClassification::new(
                    ErrorKind::MissingDependency,
                    true,
                    "RESOLUTION_UNKNOWN",
                ),
            },
            StageError::Loading(load_error) => self.classify_load_error(load_error),
            StageError::Merge(merge_error) => {
                let code = match merge_error {
                    ConfigMergeError::Validation { .. } => "MERGE_VALIDATION",
                    ConfigMergeError::Computation { .. } => "MERGE_COMPUTATION",
                };
                ErrorClassification::new(ErrorKind::ValidationError, true, code)
            }
            StageError::Configuration(_) => {
                ErrorClassification::new(ErrorKind::Configuration, true, "CONFIGURATION")
            }
            StageError::StateMachine(_) => ErrorClassification::new(
                ErrorKind::InvalidTransition,
                true,
                "STATE_TRANSITION",
            ),
        }
    }

    fn classifier_name(&self) -> &'static str {
        "standard"
    }
}
