//! # Orchestration Engine
//!
//! Drives one tenant from runtime signals to a ready, immutable snapshot.
//!
//! ## Core Components
//!
//! - **Orchestrator**: facade exposing `initialize`, `resolve_for_request` and `reload`
//! - **ErrorClassifier**: maps stage errors onto the shared error taxonomy
//! - **OrchestrationResult**: the published snapshot (context, plugin order, merged config)

pub mod error_classifier;
pub mod errors;
pub mod orchestrator;
pub mod types;

pub use error_classifier::{ErrorClassification, ErrorClassifier, StandardErrorClassifier};
pub use errors::{cause_chain, ErrorKind, OrchestrationError, OrchestratorResult, StageError};
pub use orchestrator::{Orchestrator, OrchestratorBuilder};
pub use types::{OrchestrationResult, StageTiming};
