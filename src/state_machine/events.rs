use serde::{Deserialize, Serialize};

use super::states::OrchestrationState;

/// Events that drive the orchestration state machine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum OrchestrationEvent {
    /// Begin a run from `Uninitialized` (or retry from `Error`)
    Start,
    ContextDetected,
    PluginsDiscovered,
    DependenciesResolved,
    PluginsLoaded,
    ConfigMerged,
    /// A stage failed
    Fail {
        stage: OrchestrationState,
        reason: String,
    },
    /// Hot reload from `Ready`
    Reload,
}

impl OrchestrationEvent {
    /// Get a string representation of the event type for logging
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::ContextDetected => "context_detected",
            Self::PluginsDiscovered => "plugins_discovered",
            Self::DependenciesResolved => "dependencies_resolved",
            Self::PluginsLoaded => "plugins_loaded",
            Self::ConfigMerged => "config_merged",
            Self::Fail { .. } => "fail",
            Self::Reload => "reload",
        }
    }

    pub fn fail(stage: OrchestrationState, reason: impl Into<String>) -> Self {
        Self::Fail {
            stage,
            reason: reason.into(),
        }
    }

    /// The completion event for a pipeline stage
    pub fn completed(stage: OrchestrationState) -> Option<Self> {
        match stage {
            OrchestrationState::Detecting => Some(Self::ContextDetected),
            OrchestrationState::Discovering => Some(Self::PluginsDiscovered),
            OrchestrationState::Resolving => Some(Self::DependenciesResolved),
            OrchestrationState::Loading => Some(Self::PluginsLoaded),
            OrchestrationState::ConfiguringMerge => Some(Self::ConfigMerged),
            _ => None,
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        match self {
            Self::Fail { reason, .. } => Some(reason),
            _ => None,
        }
    }
}
