//! Process-wide entry point: owns the template cache, policies and the
//! prompt assembler, and hands out one [`WorkflowExecutor`] per run.

use std::sync::Arc;

use contentloom_config::EngineConfig;
use contentloom_core::{
    AgentExecutor, AgentResolver, ExecutionContext, MetricsSink, Result, ToolNameRegistry,
};
use contentloom_prompt::{ContextCompactor, LayerResolver, PromptAssembler, PromptConfig};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::executor::{RunOutcome, WorkflowExecutor};
use crate::policy::{PolicyRegistry, WorkflowPolicy};
use crate::prompts::PromptStore;
use crate::template::TemplateStore;

/// The prompt assembler described by `config`: versioned section files
/// under the system and profile roots, the canonical tool registry, and the
/// configured budget overrides.
pub fn build_assembler(config: &EngineConfig) -> PromptAssembler {
    let layers = LayerResolver::new(&config.paths.system_prompts_dir, &config.paths.profiles_dir)
        .with_tool_registry(Arc::new(ToolNameRegistry::canonical()));
    PromptAssembler::new(layers)
        .with_budgets(&config.prompt.section_budgets)
        .with_default_version(config.prompt.version.clone())
}

pub fn build_compactor(config: &EngineConfig) -> ContextCompactor {
    ContextCompactor::new()
        .with_budgets(&config.compaction.budgets)
        .with_summarize(config.compaction.summarize)
}

pub struct WorkflowEngine {
    templates: Arc<TemplateStore>,
    policies: PolicyRegistry,
    prompts: PromptStore,
    assembler: Arc<PromptAssembler>,
    resolver: Arc<dyn AgentResolver>,
    agents: Arc<dyn AgentExecutor>,
    metrics: Option<Arc<dyn MetricsSink>>,
    compactor: Option<ContextCompactor>,
    prompt_config: PromptConfig,
}

impl WorkflowEngine {
    pub fn new(
        templates: TemplateStore,
        prompts: PromptStore,
        assembler: PromptAssembler,
        resolver: Arc<dyn AgentResolver>,
        agents: Arc<dyn AgentExecutor>,
    ) -> Self {
        Self {
            templates: Arc::new(templates),
            policies: PolicyRegistry::new(),
            prompts,
            assembler: Arc::new(assembler),
            resolver,
            agents,
            metrics: None,
            compactor: None,
            prompt_config: PromptConfig::default(),
        }
    }

    /// Wire every store from the engine configuration.
    pub fn from_config(
        config: &EngineConfig,
        resolver: Arc<dyn AgentResolver>,
        agents: Arc<dyn AgentExecutor>,
    ) -> Self {
        info!(
            workflows_dir = %config.paths.workflows_dir.display(),
            version = %config.prompt.version,
            "Workflow engine configured"
        );

        Self::new(
            TemplateStore::new(&config.paths.workflows_dir),
            PromptStore::new(&config.paths.prompts_dir),
            build_assembler(config),
            resolver,
            agents,
        )
        .with_compactor(build_compactor(config))
    }

    pub fn with_policy(mut self, workflow_type: impl Into<String>, policy: Arc<dyn WorkflowPolicy>) -> Self {
        self.policies.register(workflow_type, policy);
        self
    }

    pub fn with_metrics(mut self, sink: Arc<dyn MetricsSink>) -> Self {
        self.metrics = Some(sink);
        self
    }

    pub fn with_compactor(mut self, compactor: ContextCompactor) -> Self {
        self.compactor = Some(compactor);
        self
    }

    pub fn with_prompt_config(mut self, config: PromptConfig) -> Self {
        self.prompt_config = config;
        self
    }

    pub fn templates(&self) -> &TemplateStore {
        &self.templates
    }

    pub fn assembler(&self) -> &PromptAssembler {
        &self.assembler
    }

    /// An executor for `workflow_type`, loading its template on first use.
    pub async fn executor(&self, workflow_type: &str) -> Result<WorkflowExecutor> {
        let template = self.templates.get(workflow_type).await?;
        let mut executor = WorkflowExecutor::new(
            workflow_type,
            template,
            self.assembler.clone(),
            self.resolver.clone(),
            self.agents.clone(),
        )
        .with_policy(self.policies.get(workflow_type))
        .with_prompt_store(self.prompts.clone())
        .with_prompt_config(self.prompt_config.clone());
        if let Some(sink) = &self.metrics {
            executor = executor.with_metrics(sink.clone());
        }
        if let Some(compactor) = &self.compactor {
            executor = executor.with_compactor(compactor.clone());
        }
        Ok(executor)
    }

    pub async fn execute(&self, workflow_type: &str, context: ExecutionContext) -> Result<ExecutionContext> {
        self.executor(workflow_type).await?.execute(context).await
    }

    /// Like [`execute`](Self::execute), but cancellable and returning the
    /// final workflow state. An unknown template is still an `Err` here
    /// since no run exists yet.
    pub async fn execute_with_cancel(
        &self,
        workflow_type: &str,
        context: ExecutionContext,
        cancel: CancellationToken,
    ) -> Result<RunOutcome> {
        let executor = self.executor(workflow_type).await?;
        Ok(executor.execute_run(context, Some(cancel)).await)
    }
}
