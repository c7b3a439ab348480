//! Run metrics handed back by an external metrics collaborator.
//!
//! The engine measures duration and task counts itself. Cost and token
//! totals only exist when a [`MetricsSink`] reports them.

use serde::{Deserialize, Serialize};

/// Aggregated figures for one workflow run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunMetrics {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_cost: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<u64>,
    #[serde(default)]
    pub duration_seconds: f64,
    #[serde(default)]
    pub task_count: usize,
    #[serde(default)]
    pub completed_tasks: usize,
    #[serde(default)]
    pub success_rate: f64,
    #[serde(default)]
    pub agents_used: Vec<String>,
}

impl RunMetrics {
    /// Fill cost/token totals from another report when this one lacks them.
    pub fn absorb(&mut self, external: RunMetrics) {
        if self.total_cost.is_none() {
            self.total_cost = external.total_cost;
        }
        if self.total_tokens.is_none() {
            self.total_tokens = external.total_tokens;
        }
    }
}

/// Receives run lifecycle notifications. All methods default to no-ops.
pub trait MetricsSink: Send + Sync {
    fn run_started(&self, _workflow_id: &str, _workflow_type: &str) {}

    fn task_finished(&self, _workflow_id: &str, _task_id: &str, _agent: &str, _success: bool) {}

    /// Called once when the run ends. Returns whatever the sink aggregated.
    fn run_finished(&self, _workflow_id: &str, _success: bool) -> Option<RunMetrics> {
        None
    }
}
