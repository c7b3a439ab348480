//! # contentloom core
//!
//! Domain types, traits, and error definitions for the contentloom workflow
//! and prompt assembly engine. Every collaborator the engine talks to (agent
//! resolution, agent execution, metrics) is a trait here; implementations
//! live in the caller's code or in the other workspace crates.

pub mod agent;
pub mod context;
pub mod error;
pub mod metrics;
pub mod tool;
pub mod workflow;

pub use agent::{AgentDescriptor, AgentExecutor, AgentResolver, StaticAgentResolver};
pub use context::ExecutionContext;
pub use error::{AgentError, Error, Result};
pub use metrics::{MetricsSink, RunMetrics};
pub use tool::{ToolDescriptor, ToolNameRegistry};
pub use workflow::{Task, TaskTemplate, TemplateVariable, Workflow, WorkflowStatus, WorkflowTemplate};
