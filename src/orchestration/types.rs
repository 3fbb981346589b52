//! Types handed to the host framework

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::context::{BusinessContext, DetectionResult};
use crate::loader::{LoadReport, LoadedPluginSet};
use crate::merge::{CacheOutcome, MergedConfig};
use crate::state_machine::OrchestrationState;

/// Wall-clock time spent in one pipeline stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StageTiming {
    pub stage: OrchestrationState,
    pub duration_ms: u64,
}

/// The immutable result of one successful pipeline run
///
/// Published behind an `Arc` and never modified afterwards.
#[derive(Debug, Clone, Serialize)]
pub struct OrchestrationResult {
    pub run_id: Uuid,
    pub context: DetectionResult,
    /// Non-excluded plugins in dependency order
    pub plugin_order: Vec<String>,
    pub merged_config: Arc<MergedConfig>,
    pub stage_timings: Vec<StageTiming>,
    /// Recoverable problems met during the run
    pub warnings: Vec<String>,
    pub load_report: LoadReport,
    pub cache_outcome: CacheOutcome,
    pub registry_generation: u64,
    pub completed_at: DateTime<Utc>,
    #[serde(skip)]
    pub plugins: Arc<LoadedPluginSet>,
}

impl OrchestrationResult {
    pub fn tenant(&self) -> &BusinessContext {
        &self.context.context
    }

    pub fn total_duration_ms(&self) -> u64 {
        self.stage_timings.iter().map(|timing| timing.duration_ms).sum()
    }

    pub fn timing(&self, stage: OrchestrationState) -> Option<u64> {
        self.stage_timings
            .iter()
            .find(|timing| timing.stage == stage)
            .map(|timing| timing.duration_ms)
    }
}
