use thiserror::Error;

use super::states::OrchestrationState;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StateMachineError {
    #[error("Invalid transition from '{from}' on event '{event}'")]
    InvalidTransition {
        from: OrchestrationState,
        event: String,
    },

    #[error("Failure reported for stage '{stage}' while '{current}' is active")]
    StageMismatch {
        stage: OrchestrationState,
        current: OrchestrationState,
    },
}

pub type StateMachineResult<T> = Result<T, StateMachineError>;
