//! Workflow execution for contentloom.
//!
//! Templates are loaded once per workflow type and shared. Each run
//! materializes the template's tasks, then executes them strictly one after
//! another: every task sees the outputs of the tasks before it as
//! `<task_id>_output` context keys, gets a system prompt assembled from the
//! layered section templates, and is handed to the agent executor. The first
//! failure ends the run.

pub mod engine;
pub mod executor;
pub mod policy;
pub mod prompts;
pub mod template;

pub use engine::{WorkflowEngine, build_assembler, build_compactor};
pub use executor::{RunOutcome, TASK_SECTION, WorkflowExecutor};
pub use policy::{DefaultPolicy, PolicyRegistry, WorkflowPolicy};
pub use prompts::PromptStore;
pub use template::{TemplateStore, load_template_file};
pub use tokio_util::sync::CancellationToken;
