use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::{StateMachineError, StateMachineResult};
use super::events::OrchestrationEvent;
use super::states::OrchestrationState;

/// One recorded state change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateTransition {
    pub from: OrchestrationState,
    pub to: OrchestrationState,
    pub event: String,
    pub at: DateTime<Utc>,
}

/// The stage and cause recorded on entering `Error`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageFailure {
    pub stage: OrchestrationState,
    pub reason: String,
}

/// Orchestration pipeline state machine
///
/// Pure and synchronous: it validates transitions and records history, the
/// orchestrator drives it and performs the work of each stage.
#[derive(Debug, Clone, Default)]
pub struct OrchestrationStateMachine {
    current: OrchestrationState,
    history: Vec<StateTransition>,
    last_failure: Option<StageFailure>,
}

impl OrchestrationStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> OrchestrationState {
        self.current
    }

    /// Transitions of the current run, oldest first
    pub fn history(&self) -> &[StateTransition] {
        &self.history
    }

    pub fn last_failure(&self) -> Option<&StageFailure> {
        self.last_failure.as_ref()
    }

    pub fn can_transition(&self, event: &OrchestrationEvent) -> bool {
        Self::determine_target_state(self.current, event).is_ok()
    }

    /// Apply an event, returning the new state
    ///
    /// `Start` and `Reload` begin a new run and clear the previous run's history.
    pub fn transition(&mut self, event: OrchestrationEvent) -> StateMachineResult<OrchestrationState> {
        let from = self.current;
        let to = Self::determine_target_state(from, &event)?;

        if matches!(event, OrchestrationEvent::Start | OrchestrationEvent::Reload) {
            self.history.clear();
            self.last_failure = None;
        }
        if let OrchestrationEvent::Fail { stage, reason } = &event {
            self.last_failure = Some(StageFailure {
                stage: *stage,
                reason: reason.clone(),
            });
        }

        self.history.push(StateTransition {
            from,
            to,
            event: event.event_type().to_string(),
            at: Utc::now(),
        });
        self.current = to;
        Ok(to)
    }

    /// Determine the target state based on current state and event
    pub fn determine_target_state(
        current: OrchestrationState,
        event: &OrchestrationEvent,
    ) -> StateMachineResult<OrchestrationState> {
        use OrchestrationEvent as E;
        use OrchestrationState as S;

        let target = match (current, event) {
            // Run entry
            (S::Uninitialized, E::Start) => S::Detecting,
            (S::Error, E::Start | E::Reload) => S::Detecting,
            (S::Ready, E::Reload) => S::Detecting,

            // Stage completion
            (S::Detecting, E::ContextDetected) => S::Discovering,
            (S::Discovering, E::PluginsDiscovered) => S::Resolving,
            (S::Resolving, E::DependenciesResolved) => S::Loading,
            (S::Loading, E::PluginsLoaded) => S::ConfiguringMerge,
            (S::ConfiguringMerge, E::ConfigMerged) => S::Ready,

            // Failure, from any non-terminal state
            (S::Uninitialized, E::Fail { .. }) => S::Error,
            (active, E::Fail { stage, .. }) if active.is_active() => {
                if *stage != active {
                    return Err(StateMachineError::StageMismatch {
                        stage: *stage,
                        current: active,
                    });
                }
                S::Error
            }

            (from, _) => {
                return Err(StateMachineError::InvalidTransition {
                    from,
                    event: event.event_type().to_string(),
                })
            }
        };

        Ok(target)
    }
}
