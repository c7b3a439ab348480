//! Sequential task execution for one workflow run.
//!
//! A run moves `created → ready → running → completed | failed`:
//!
//! 1. validate required variables
//! 2. prepare the context (bookkeeping fields, client id reconciliation)
//! 3. materialize tasks and resolve their prompts, then mark ready
//! 4. execute tasks one at a time in declaration order
//! 5. post-process the workflow and settle `final_output`
//! 6. attach run metrics and mark completed
//!
//! Any failure marks the run failed and is returned to the caller. A failed
//! task never gets placeholder output.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

use contentloom_core::{
    AgentDescriptor, AgentExecutor, AgentResolver, Error, ExecutionContext, MetricsSink, Result,
    RunMetrics, Task, Workflow, WorkflowTemplate,
};
use contentloom_prompt::{
    CompactedContext, ContextCompactor, ExpressionRenderer, Layer, LiteralRenderer, PromptAssembler, PromptConfig,
    SectionContribution, TemplateRenderer,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::policy::{DefaultPolicy, WorkflowPolicy};
use crate::prompts::PromptStore;

/// Ad-hoc section carrying the task's own prompt.
pub const TASK_SECTION: &str = "task";

/// Final state of a run plus its result.
#[derive(Debug)]
pub struct RunOutcome {
    pub workflow: Workflow,
    pub result: Result<ExecutionContext>,
}

/// Runs one workflow template against the agent collaborators.
pub struct WorkflowExecutor {
    workflow_type: String,
    template: Arc<WorkflowTemplate>,
    assembler: Arc<PromptAssembler>,
    resolver: Arc<dyn AgentResolver>,
    agents: Arc<dyn AgentExecutor>,
    policy: Arc<dyn WorkflowPolicy>,
    prompts: PromptStore,
    metrics: Option<Arc<dyn MetricsSink>>,
    compactor: Option<ContextCompactor>,
    prompt_config: PromptConfig,
    renderer: ExpressionRenderer,
}

impl WorkflowExecutor {
    pub fn new(
        workflow_type: impl Into<String>,
        template: Arc<WorkflowTemplate>,
        assembler: Arc<PromptAssembler>,
        resolver: Arc<dyn AgentResolver>,
        agents: Arc<dyn AgentExecutor>,
    ) -> Self {
        Self {
            workflow_type: workflow_type.into(),
            template,
            assembler,
            resolver,
            agents,
            policy: Arc::new(DefaultPolicy),
            prompts: PromptStore::new("prompts"),
            metrics: None,
            compactor: None,
            prompt_config: PromptConfig::default(),
            renderer: ExpressionRenderer::new(),
        }
    }

    pub fn with_policy(mut self, policy: Arc<dyn WorkflowPolicy>) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_prompt_store(mut self, prompts: PromptStore) -> Self {
        self.prompts = prompts;
        self
    }

    pub fn with_metrics(mut self, sink: Arc<dyn MetricsSink>) -> Self {
        self.metrics = Some(sink);
        self
    }

    /// Compact each task's working context into `kb_summary`,
    /// `runtime_context`, `examples` and `citations` before prompting.
    pub fn with_compactor(mut self, compactor: ContextCompactor) -> Self {
        self.compactor = Some(compactor);
        self
    }

    /// Base prompt options shared by every task (version, budgets,
    /// overrides).
    pub fn with_prompt_config(mut self, config: PromptConfig) -> Self {
        self.prompt_config = config;
        self
    }

    pub fn template(&self) -> &WorkflowTemplate {
        &self.template
    }

    /// Run to completion and return the augmented context.
    pub async fn execute(&self, context: ExecutionContext) -> Result<ExecutionContext> {
        self.execute_run(context, None).await.result
    }

    /// Run with an optional cancellation token. Cancellation fails the run
    /// like any other task error.
    pub async fn execute_run(
        &self,
        mut context: ExecutionContext,
        cancel: Option<CancellationToken>,
    ) -> RunOutcome {
        let started = Instant::now();
        let workflow_id = context.text("workflow_id").unwrap_or_else(|| {
            format!("{}_{}", self.workflow_type, Uuid::new_v4().simple())
        });
        context.insert("workflow_id", workflow_id.clone());

        let mut workflow = Workflow::new(
            workflow_id.clone(),
            self.template.name.clone(),
            self.template.description.clone(),
        );
        info!(
            workflow_id = %workflow_id,
            workflow_type = %self.workflow_type,
            "Starting workflow run"
        );
        if let Some(sink) = &self.metrics {
            sink.run_started(&workflow_id, &self.workflow_type);
        }

        let result = self
            .drive(&mut workflow, &mut context, cancel.as_ref())
            .await;

        let result = match result {
            Ok(agents_used) => {
                let metrics = self.finish_metrics(&workflow, &agents_used, started, true);
                match serde_json::to_value(&metrics) {
                    Ok(value) => {
                        context.insert("workflow_metrics", value);
                        workflow.complete().map(|_| context)
                    }
                    Err(e) => Err(e.into()),
                }
            }
            Err(e) => Err(e),
        };

        if let Err(e) = &result {
            self.finish_metrics(&workflow, &[], started, false);
            if let Err(transition) = workflow.fail(e.to_string()) {
                warn!(workflow_id = %workflow_id, error = %transition, "Could not mark run failed");
            }
            error!(workflow_id = %workflow_id, error = %e, "Workflow run failed");
        } else {
            info!(
                workflow_id = %workflow_id,
                tasks = workflow.tasks.len(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Workflow run completed"
            );
        }

        RunOutcome { workflow, result }
    }

    /// Validate, prepare and materialize tasks without executing anything.
    /// Skipped tasks are absent; descriptions are the unrendered prompts.
    pub async fn plan(&self, context: &ExecutionContext) -> Result<Vec<Task>> {
        let context = self.prepared_context(context)?;
        let mut workflow = Workflow::new(
            format!("{}_plan", self.workflow_type),
            self.template.name.clone(),
            self.template.description.clone(),
        );
        self.create_tasks(&mut workflow, &context).await?;
        Ok(workflow.tasks)
    }

    /// The context a run starts from: validated, with bookkeeping fields,
    /// variable defaults and the client id pair filled in.
    pub fn prepared_context(&self, context: &ExecutionContext) -> Result<ExecutionContext> {
        let mut context = context.clone();
        self.validate(&context)?;
        self.prepare(&mut context)?;
        Ok(context)
    }

    /// Steps 1-5. Returns the names of the agents that ran.
    async fn drive(
        &self,
        workflow: &mut Workflow,
        context: &mut ExecutionContext,
        cancel: Option<&CancellationToken>,
    ) -> Result<Vec<String>> {
        self.validate(context)?;
        self.prepare(context)?;
        self.create_tasks(workflow, context).await?;
        workflow.mark_ready()?;

        for issue in self.template.dependency_issues() {
            warn!(workflow_id = %workflow.id, "{issue}");
        }

        workflow.start()?;
        let agents_used = self.run_tasks(workflow, context, cancel).await?;

        self.policy.post_process_workflow(context).await?;
        settle_final_output(context, workflow);
        Ok(agents_used)
    }

    fn validate(&self, context: &ExecutionContext) -> Result<()> {
        let missing = self.template.missing_variables(context);
        if !missing.is_empty() {
            return Err(Error::MissingVariables(missing));
        }
        self.policy.validate_inputs(&self.template, context)
    }

    fn prepare(&self, context: &mut ExecutionContext) -> Result<()> {
        context.insert("workflow_template", self.template.name.clone());
        context.insert("workflow_version", self.template.version_or_default().to_string());
        if !context.is_truthy("workflow_type") {
            context.insert("workflow_type", self.workflow_type.clone());
        }

        for variable in &self.template.variables {
            if let Some(default) = &variable.default {
                if !context.contains_key(&variable.name) {
                    context.insert(variable.name.clone(), default.clone());
                }
            }
        }

        let name = context.get("client_name").cloned();
        let profile = context.get("client_profile").cloned();
        match (context.is_truthy("client_name"), context.is_truthy("client_profile")) {
            (true, false) => {
                context.insert("client_profile", name.unwrap_or_default());
            }
            (false, true) => {
                context.insert("client_name", profile.unwrap_or_default());
            }
            _ => {}
        }

        self.policy.prepare_context(context)
    }

    async fn create_tasks(&self, workflow: &mut Workflow, context: &ExecutionContext) -> Result<()> {
        for template in &self.template.tasks {
            if self.policy.should_skip_task(template, context) {
                info!(workflow_id = %workflow.id, task_id = %template.id, "Skipping task");
                continue;
            }
            let description = self.prompts.resolve(template).await;
            workflow.add_task(Task::from_template(template, description))?;
        }
        debug!(workflow_id = %workflow.id, tasks = workflow.tasks.len(), "Tasks materialized");
        Ok(())
    }

    async fn run_tasks(
        &self,
        workflow: &Workflow,
        context: &mut ExecutionContext,
        cancel: Option<&CancellationToken>,
    ) -> Result<Vec<String>> {
        let mut agents_used = Vec::new();

        for task in &workflow.tasks {
            if cancel.is_some_and(|t| t.is_cancelled()) {
                return Err(Error::Cancelled {
                    task: task.id.clone(),
                });
            }

            let mut working = context.clone();
            working.insert("task_id", task.id.clone());
            working.insert("task_name", task.name.clone());
            let compacted = self.compactor.as_ref().map(|c| c.build(&working));
            if let Some(compacted) = &compacted {
                compacted.apply_to(&mut working);
            }

            info!(workflow_id = %workflow.id, task_id = %task.id, "Executing task");
            let agent = match self
                .resolver
                .resolve(task.agent_name.as_deref(), task.agent_role.as_deref(), &working)
                .await
            {
                Ok(agent) => agent,
                Err(e) => {
                    let declared = task.agent_name.as_deref().or(task.agent_role.as_deref());
                    self.report_task(workflow, task, declared.unwrap_or_default(), false);
                    return Err(e.into());
                }
            };

            let output = match self.run_task(task, &agent, &working, compacted.as_ref(), cancel).await {
                Ok(output) => output,
                Err(e) => {
                    self.report_task(workflow, task, &agent.name, false);
                    return Err(e);
                }
            };
            self.report_task(workflow, task, &agent.name, true);

            context.insert(task.output_key(), output.clone());
            self.policy.post_process_task(task, &output, context).await?;
            agents_used.push(agent.name);
        }

        Ok(agents_used)
    }

    fn report_task(&self, workflow: &Workflow, task: &Task, agent: &str, success: bool) {
        if let Some(sink) = &self.metrics {
            sink.task_finished(&workflow.id, &task.id, agent, success);
        }
    }

    /// Assemble and execute. Returns the raw output.
    async fn run_task(
        &self,
        task: &Task,
        agent: &AgentDescriptor,
        working: &ExecutionContext,
        compacted: Option<&CompactedContext>,
        cancel: Option<&CancellationToken>,
    ) -> Result<String> {
        let prompt = self.render_task_prompt(task, working, compacted);
        let mut config = self.prompt_config.clone();
        if !prompt.trim().is_empty() {
            config.extra_layers.push(Layer::new("task.prompt").with(
                TASK_SECTION,
                SectionContribution::new(prompt, format!("prompt:{}", task.id)),
            ));
        }
        let assembled = self.assembler.build(agent, working, &config)?;
        debug!(
            task_id = %task.id,
            agent = %agent.name,
            tokens = assembled.report.total_tokens,
            "Instruction assembled"
        );

        let call = self.agents.execute_agent(agent, &assembled.text, working);
        let result = match cancel {
            Some(token) => tokio::select! {
                biased;
                _ = token.cancelled() => {
                    warn!(task_id = %task.id, "Run cancelled during task execution");
                    return Err(Error::Cancelled { task: task.id.clone() });
                }
                r = call => r,
            },
            None => call.await,
        };

        result.map_err(|e| Error::TaskFailed {
            task: task.name.clone(),
            reason: e.to_string(),
        })
    }

    /// Render the task prompt, then append client instructions and the
    /// compacted context sections. A task without a prompt stays empty.
    fn render_task_prompt(
        &self,
        task: &Task,
        context: &ExecutionContext,
        compacted: Option<&CompactedContext>,
    ) -> String {
        if task.description.trim().is_empty() {
            return String::new();
        }
        let mut prompt = match self.renderer.render(&task.description, context) {
            Ok(text) => text,
            Err(e) => {
                warn!(task_id = %task.id, error = %e, "Prompt render failed, using literal substitution");
                LiteralRenderer
                    .render(&task.description, context)
                    .unwrap_or_else(|_| task.description.clone())
            }
        };

        if let Some(extra) = client_instructions(context) {
            prompt.push_str("\n\n");
            prompt.push_str(&extra);
        }
        let sections = compacted
            .map(CompactedContext::prompt_sections)
            .filter(|s| !s.is_empty());
        if let Some(sections) = sections {
            prompt.push_str("\n\n");
            prompt.push_str(&sections);
        }
        prompt
    }

    fn finish_metrics(
        &self,
        workflow: &Workflow,
        agents_used: &[String],
        started: Instant,
        success: bool,
    ) -> RunMetrics {
        let task_count = workflow.tasks.len();
        let completed = agents_used.len();
        let mut metrics = RunMetrics {
            duration_seconds: started.elapsed().as_secs_f64(),
            task_count,
            completed_tasks: completed,
            success_rate: if task_count == 0 {
                if success { 1.0 } else { 0.0 }
            } else {
                completed as f64 / task_count as f64
            },
            agents_used: agents_used
                .iter()
                .cloned()
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect(),
            ..Default::default()
        };
        if let Some(reported) = self
            .metrics
            .as_ref()
            .and_then(|sink| sink.run_finished(&workflow.id, success))
        {
            metrics.absorb(reported);
        }
        metrics
    }
}

/// `client_overrides.additional_instructions`, else its `disclaimer`.
fn client_instructions(context: &ExecutionContext) -> Option<String> {
    let overrides = context.get("client_overrides")?.as_object()?;
    ["additional_instructions", "disclaimer"]
        .iter()
        .filter_map(|key| overrides.get(*key)?.as_str())
        .map(str::trim)
        .find(|text| !text.is_empty())
        .map(str::to_string)
}

/// Make sure `final_output` is set when anything usable exists: an explicit
/// `final_content` or `content`, else the last task's output.
fn settle_final_output(context: &mut ExecutionContext, workflow: &Workflow) {
    if context.is_truthy("final_output") {
        return;
    }
    let fallback = context.first_text(&["final_content", "content"]).or_else(|| {
        workflow
            .tasks
            .last()
            .and_then(|t| context.text(&t.output_key()))
    });
    if let Some(text) = fallback {
        context.insert("final_output", text);
    }
}
