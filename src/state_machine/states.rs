use serde::{Deserialize, Serialize};
use std::fmt;

/// Orchestration pipeline states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrchestrationState {
    /// No run has started yet
    #[default]
    Uninitialized,
    /// Resolving the business context from runtime signals
    Detecting,
    /// Publishing a plugin registry snapshot
    Discovering,
    /// Ordering the tenant's plugin set
    Resolving,
    /// Instantiating plugins
    Loading,
    /// Merging and validating configuration fragments
    ConfiguringMerge,
    /// A snapshot is published; only a reload leaves this state
    Ready,
    /// The last run failed; the failing stage is recorded alongside
    Error,
}

impl OrchestrationState {
    /// Pipeline stages in execution order
    pub const PIPELINE: [OrchestrationState; 5] = [
        Self::Detecting,
        Self::Discovering,
        Self::Resolving,
        Self::Loading,
        Self::ConfiguringMerge,
    ];

    /// Terminal until an explicit re-run
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Ready | Self::Error)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error)
    }

    /// A pipeline stage is executing
    pub fn is_active(&self) -> bool {
        Self::PIPELINE.contains(self)
    }

    /// The stage that follows this one on success
    pub fn next_stage(&self) -> Option<Self> {
        match self {
            Self::Detecting => Some(Self::Discovering),
            Self::Discovering => Some(Self::Resolving),
            Self::Resolving => Some(Self::Loading),
            Self::Loading => Some(Self::ConfiguringMerge),
            Self::ConfiguringMerge => Some(Self::Ready),
            Self::Uninitialized | Self::Ready | Self::Error => None,
        }
    }
}

impl fmt::Display for OrchestrationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uninitialized => write!(f, "uninitialized"),
            Self::Detecting => write!(f, "detecting"),
            Self::Discovering => write!(f, "discovering"),
            Self::Resolving => write!(f, "resolving"),
            Self::Loading => write!(f, "loading"),
            Self::ConfiguringMerge => write!(f, "configuring_merge"),
            Self::Ready => write!(f, "ready"),
            Self::Error => write!(f, "error"),
        }
    }
}

impl std::str::FromStr for OrchestrationState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "uninitialized" => Ok(Self::Uninitialized),
            "detecting" => Ok(Self::Detecting),
            "discovering" => Ok(Self::Discovering),
            "resolving" => Ok(Self::Resolving),
            "loading" => Ok(Self::Loading),
            "configuring_merge" => Ok(Self::ConfiguringMerge),
            "ready" => Ok(Self::Ready),
            "error" => Ok(Self::Error),
            _ => Err(format!("Invalid orchestration state: {s}")),
        }
    }
}
