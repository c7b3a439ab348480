//! Workflow-specific behavior.
//!
//! Every hook has a no-op default, so most workflow types need no policy
//! at all and run under [`DefaultPolicy`].

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use contentloom_core::{ExecutionContext, Result, Task, TaskTemplate, WorkflowTemplate};

#[async_trait]
pub trait WorkflowPolicy: Send + Sync {
    /// Extra input validation, run after the required-variable check.
    fn validate_inputs(&self, _template: &WorkflowTemplate, _context: &ExecutionContext) -> Result<()> {
        Ok(())
    }

    /// Last chance to adjust the context before tasks are materialized.
    fn prepare_context(&self, _context: &mut ExecutionContext) -> Result<()> {
        Ok(())
    }

    /// Tasks for which this returns true are never materialized.
    fn should_skip_task(&self, _task: &TaskTemplate, _context: &ExecutionContext) -> bool {
        false
    }

    /// Runs after each task's output has been stored in the context.
    async fn post_process_task(
        &self,
        _task: &Task,
        _output: &str,
        _context: &mut ExecutionContext,
    ) -> Result<()> {
        Ok(())
    }

    /// Runs once after the last task. May set `final_output`.
    async fn post_process_workflow(&self, _context: &mut ExecutionContext) -> Result<()> {
        Ok(())
    }
}

/// All hooks left at their defaults.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultPolicy;

impl WorkflowPolicy for DefaultPolicy {}

/// Policies keyed by workflow type, falling back to [`DefaultPolicy`].
#[derive(Clone)]
pub struct PolicyRegistry {
    policies: HashMap<String, Arc<dyn WorkflowPolicy>>,
    fallback: Arc<dyn WorkflowPolicy>,
}

impl Default for PolicyRegistry {
    fn default() -> Self {
        Self {
            policies: HashMap::new(),
            fallback: Arc::new(DefaultPolicy),
        }
    }
}

impl std::fmt::Debug for PolicyRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut types: Vec<&String> = self.policies.keys().collect();
        types.sort();
        f.debug_struct("PolicyRegistry").field("types", &types).finish()
    }
}

impl PolicyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a policy. Replaces any existing policy for the type.
    pub fn register(&mut self, workflow_type: impl Into<String>, policy: Arc<dyn WorkflowPolicy>) {
        self.policies.insert(workflow_type.into(), policy);
    }

    pub fn get(&self, workflow_type: &str) -> Arc<dyn WorkflowPolicy> {
        self.policies
            .get(workflow_type)
            .cloned()
            .unwrap_or_else(|| self.fallback.clone())
    }

    pub fn contains(&self, workflow_type: &str) -> bool {
        self.policies.contains_key(workflow_type)
    }
}
