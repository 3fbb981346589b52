use thiserror::Error;

/// Errors raised while merging or validating configuration fragments
///
/// `Clone` so that one coalesced computation can hand its error to every waiter.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ConfigMergeError {
    #[error("Validation failed at '{path}': expected {expected}, found {found}")]
    Validation {
        path: String,
        expected: String,
        found: String,
    },

    #[error("Configuration computation for {key} did not complete: {reason}")]
    Computation { key: String, reason: String },
}

pub type ConfigMergeResult<T> = Result<T, ConfigMergeError>;
