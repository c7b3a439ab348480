//! Workflow templates and run instances.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

use crate::context::ExecutionContext;
use crate::error::{Error, Result};

// ── Templates ───────────────────────────────────────────────────────────────

/// A declarative workflow, loaded from JSON or YAML.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowTemplate {
    pub name: String,

    #[serde(default)]
    pub description: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(default)]
    pub variables: Vec<TemplateVariable>,

    #[serde(default)]
    pub tasks: Vec<TaskTemplate>,
}

/// A declared input variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateVariable {
    pub name: String,

    #[serde(default)]
    pub required: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Inserted into the context when the caller did not supply the variable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<serde_json::Value>,
}

/// One step of a workflow template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskTemplate {
    pub id: String,

    pub name: String,

    #[serde(default, alias = "agent", skip_serializing_if = "Option::is_none")]
    pub agent_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_role: Option<String>,

    #[serde(default)]
    pub dependencies: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description_template: Option<String>,
}

/// A problem with the declared dependency metadata of a template.
///
/// Dependencies never reorder execution; these are reported so template
/// authors can keep declaration order consistent with them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DependencyIssue {
    Unknown { task: String, dependency: String },
    Forward { task: String, dependency: String },
    SelfReference { task: String },
}

impl fmt::Display for DependencyIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown { task, dependency } => {
                write!(f, "task '{task}' depends on unknown task '{dependency}'")
            }
            Self::Forward { task, dependency } => write!(
                f,
                "task '{task}' depends on '{dependency}', which is declared after it"
            ),
            Self::SelfReference { task } => write!(f, "task '{task}' depends on itself"),
        }
    }
}

impl WorkflowTemplate {
    pub fn task(&self, id: &str) -> Option<&TaskTemplate> {
        self.tasks.iter().find(|t| t.id == id)
    }

    /// Version string injected as `workflow_version`.
    pub fn version_or_default(&self) -> &str {
        self.version.as_deref().unwrap_or("1.0")
    }

    /// Required variables that are absent or falsy in `context`, in
    /// declaration order.
    pub fn missing_variables(&self, context: &ExecutionContext) -> Vec<String> {
        self.variables
            .iter()
            .filter(|v| v.required && !context.is_truthy(&v.name))
            .map(|v| v.name.clone())
            .collect()
    }

    /// Structural checks that make a template unusable.
    pub fn check(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::config("workflow template has no name"));
        }
        let mut seen = HashSet::new();
        for task in &self.tasks {
            if task.id.trim().is_empty() {
                return Err(Error::config(format!(
                    "workflow '{}' has a task with an empty id",
                    self.name
                )));
            }
            if !seen.insert(task.id.as_str()) {
                return Err(Error::config(format!(
                    "workflow '{}' declares task id '{}' more than once",
                    self.name, task.id
                )));
            }
        }
        Ok(())
    }

    /// Dependency metadata that disagrees with declaration order.
    pub fn dependency_issues(&self) -> Vec<DependencyIssue> {
        let mut issues = Vec::new();
        for (index, task) in self.tasks.iter().enumerate() {
            for dep in &task.dependencies {
                if dep == &task.id {
                    issues.push(DependencyIssue::SelfReference {
                        task: task.id.clone(),
                    });
                    continue;
                }
                match self.tasks.iter().position(|t| &t.id == dep) {
                    None => issues.push(DependencyIssue::Unknown {
                        task: task.id.clone(),
                        dependency: dep.clone(),
                    }),
                    Some(pos) if pos > index => issues.push(DependencyIssue::Forward {
                        task: task.id.clone(),
                        dependency: dep.clone(),
                    }),
                    Some(_) => {}
                }
            }
        }
        issues
    }
}

// ── Runtime ─────────────────────────────────────────────────────────────────

/// A task instantiated for one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub name: String,
    /// Resolved prompt text, not yet rendered against the context.
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_role: Option<String>,
    #[serde(default)]
    pub dependencies: Vec<String>,
}

impl Task {
    pub fn from_template(template: &TaskTemplate, description: String) -> Self {
        Self {
            id: template.id.clone(),
            name: template.name.clone(),
            description,
            agent_name: template.agent_name.clone(),
            agent_role: template.agent_role.clone(),
            dependencies: template.dependencies.clone(),
        }
    }

    /// Context key under which this task's output is stored.
    pub fn output_key(&self) -> String {
        output_key(&self.id)
    }
}

/// `<task_id>_output`
pub fn output_key(task_id: &str) -> String {
    format!("{task_id}_output")
}

/// Lifecycle of a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    #[default]
    Created,
    Ready,
    Running,
    Completed,
    Failed,
}

impl WorkflowStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::Ready => "ready",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// One execution of a workflow template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub id: String,
    pub name: String,
    pub description: String,
    pub tasks: Vec<Task>,
    pub status: WorkflowStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Workflow {
    pub fn new(id: impl Into<String>, name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: description.into(),
            tasks: Vec::new(),
            status: WorkflowStatus::Created,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            error: None,
        }
    }

    pub fn add_task(&mut self, task: Task) -> Result<()> {
        self.expect(WorkflowStatus::Created, WorkflowStatus::Created)?;
        self.tasks.push(task);
        Ok(())
    }

    /// All tasks materialized.
    pub fn mark_ready(&mut self) -> Result<()> {
        self.expect(WorkflowStatus::Created, WorkflowStatus::Ready)?;
        self.status = WorkflowStatus::Ready;
        Ok(())
    }

    pub fn start(&mut self) -> Result<()> {
        self.expect(WorkflowStatus::Ready, WorkflowStatus::Running)?;
        self.status = WorkflowStatus::Running;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    pub fn complete(&mut self) -> Result<()> {
        self.expect(WorkflowStatus::Running, WorkflowStatus::Completed)?;
        self.status = WorkflowStatus::Completed;
        self.finished_at = Some(Utc::now());
        Ok(())
    }

    /// Fail from any non-terminal state.
    pub fn fail(&mut self, reason: impl Into<String>) -> Result<()> {
        if self.status.is_terminal() {
            return Err(Error::InvalidTransition {
                from: self.status.to_string(),
                to: WorkflowStatus::Failed.to_string(),
            });
        }
        self.status = WorkflowStatus::Failed;
        self.finished_at = Some(Utc::now());
        self.error = Some(reason.into());
        Ok(())
    }

    fn expect(&self, required: WorkflowStatus, target: WorkflowStatus) -> Result<()> {
        if self.status == required {
            Ok(())
        } else {
            Err(Error::InvalidTransition {
                from: self.status.to_string(),
                to: target.to_string(),
            })
        }
    }
}
