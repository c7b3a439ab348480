//! `contentloom workflow`: Inspect workflow templates without running them.
//!
//! The CLI has no agent backend, so these commands are offline inspection
//! only. Runs go through `WorkflowEngine` with a real `AgentExecutor`.

use std::fmt::Write;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use contentloom_config::EngineConfig;
use contentloom_core::{
    AgentDescriptor, AgentError, AgentExecutor, ExecutionContext, StaticAgentResolver,
};
use contentloom_prompt::{ExpressionRenderer, LiteralRenderer, TemplateRenderer};
use contentloom_workflow::{TemplateStore, WorkflowEngine};
use tracing::warn;

/// The CLI never talks to agents; inspection commands only plan.
struct OfflineAgents;

#[async_trait]
impl AgentExecutor for OfflineAgents {
    async fn execute_agent(
        &self,
        agent: &AgentDescriptor,
        _instruction: &str,
        _context: &ExecutionContext,
    ) -> Result<String, AgentError> {
        Err(AgentError::ExecutionFailed {
            agent: agent.name.clone(),
            reason: "no agent executor is attached to the CLI".into(),
        })
    }
}

pub fn list(config: &EngineConfig) -> Result<(), Box<dyn std::error::Error>> {
    let store = TemplateStore::new(&config.paths.workflows_dir);
    let types = store.available();
    if types.is_empty() {
        println!("No workflow templates in {}", config.paths.workflows_dir.display());
    }
    for workflow_type in types {
        println!("{workflow_type}");
    }
    Ok(())
}

pub async fn validate(config: &EngineConfig, workflow_type: &str) -> Result<(), Box<dyn std::error::Error>> {
    let store = TemplateStore::new(&config.paths.workflows_dir);
    let template = store.get(workflow_type).await?;

    println!("🔍 Validating workflow '{workflow_type}'...");
    println!("   ✅ {} (version {})", template.name, template.version_or_default());
    println!("   Tasks:     {}", template.tasks.len());
    println!(
        "   Variables: {}",
        template
            .variables
            .iter()
            .map(|v| if v.required { format!("{}*", v.name) } else { v.name.clone() })
            .collect::<Vec<_>>()
            .join(", ")
    );

    let issues = template.dependency_issues();
    if issues.is_empty() {
        println!("   ✅ All dependencies refer to earlier tasks");
        return Ok(());
    }
    println!();
    for issue in &issues {
        println!("   ⚠️  {issue}");
    }
    Err(format!("{} dependency issue(s) in '{workflow_type}'", issues.len()).into())
}

pub async fn tasks(
    config: &EngineConfig,
    workflow_type: &str,
    context: Option<&Path>,
) -> Result<(), Box<dyn std::error::Error>> {
    let context = super::read_context(context).await?;
    print!("{}", task_listing(config, workflow_type, &context).await?);
    Ok(())
}

/// Planned tasks with their prompts rendered against the context a run
/// would start from.
async fn task_listing(
    config: &EngineConfig,
    workflow_type: &str,
    context: &ExecutionContext,
) -> Result<String, Box<dyn std::error::Error>> {
    let engine = WorkflowEngine::from_config(
        config,
        Arc::new(StaticAgentResolver::new()),
        Arc::new(OfflineAgents),
    );
    let executor = engine.executor(workflow_type).await?;
    let planned = executor.plan(context).await?;
    let prepared = executor.prepared_context(context)?;

    let renderer = ExpressionRenderer::new();
    let mut out = String::new();
    for (index, task) in planned.iter().enumerate() {
        let agent = task
            .agent_name
            .as_deref()
            .or(task.agent_role.as_deref())
            .unwrap_or("-");
        writeln!(out, "{}. {} [{}] agent={}", index + 1, task.name, task.id, agent)?;
        if !task.dependencies.is_empty() {
            writeln!(out, "   depends on: {}", task.dependencies.join(", "))?;
        }

        let mut working = prepared.clone();
        working.insert("task_id", task.id.clone());
        working.insert("task_name", task.name.clone());
        let prompt = renderer.render(&task.description, &working).unwrap_or_else(|e| {
            warn!(task_id = %task.id, error = %e, "Prompt render failed, using literal substitution");
            LiteralRenderer
                .render(&task.description, &working)
                .unwrap_or_else(|_| task.description.clone())
        });
        for line in prompt.lines() {
            writeln!(out, "   | {line}")?;
        }
    }
    Ok(out)
}
