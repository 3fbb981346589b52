// Orchestration pipeline state machine
//
// Uninitialized -> Detecting -> Discovering -> Resolving -> Loading
//   -> ConfiguringMerge -> Ready, with Error reachable from every
//   non-terminal state. Ready and Error re-enter Detecting on reload.

pub mod errors;
pub mod events;
pub mod machine;
pub mod states;

pub use errors::{StateMachineError, StateMachineResult};
pub use events::OrchestrationEvent;
pub use machine::{OrchestrationStateMachine, StageFailure, StateTransition};
pub use states::OrchestrationState;
