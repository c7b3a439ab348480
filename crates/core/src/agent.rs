//! Agent descriptors and the two agent collaborators the executor needs:
//! one that resolves which agent runs a task, one that actually runs it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::context::ExecutionContext;
use crate::error::AgentError;

/// Everything the prompt assembler needs to know about an agent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentDescriptor {
    pub name: String,

    #[serde(default)]
    pub role: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_message: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backstory: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub goal: Option<String>,

    /// Tool names this agent may invoke.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<String>,

    /// Free-form metadata (`brand_voice`, ...).
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl AgentDescriptor {
    pub fn new(name: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            role: role.into(),
            ..Default::default()
        }
    }

    pub fn with_system_message(mut self, text: impl Into<String>) -> Self {
        self.system_message = Some(text.into());
        self
    }

    pub fn with_backstory(mut self, text: impl Into<String>) -> Self {
        self.backstory = Some(text.into());
        self
    }

    pub fn with_goal(mut self, text: impl Into<String>) -> Self {
        self.goal = Some(text.into());
        self
    }

    pub fn with_tools<I, S>(mut self, tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tools = tools.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// A metadata entry as a non-empty string.
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata
            .get(key)
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

/// Executes one task with a fully assembled instruction.
///
/// This is the only network-bound step of a run; the executor awaits it
/// before moving on to the next task.
#[async_trait]
pub trait AgentExecutor: Send + Sync {
    async fn execute_agent(
        &self,
        agent: &AgentDescriptor,
        instruction: &str,
        context: &ExecutionContext,
    ) -> std::result::Result<String, AgentError>;
}

/// Picks the agent for a task from its declared name and role.
#[async_trait]
pub trait AgentResolver: Send + Sync {
    async fn resolve(
        &self,
        agent_name: Option<&str>,
        agent_role: Option<&str>,
        context: &ExecutionContext,
    ) -> std::result::Result<AgentDescriptor, AgentError>;
}

/// A resolver backed by an in-memory set of descriptors.
///
/// Lookup goes by name first, then by role.
#[derive(Debug, Clone, Default)]
pub struct StaticAgentResolver {
    agents: HashMap<String, AgentDescriptor>,
}

impl StaticAgentResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an agent. Replaces any existing agent with the same name.
    pub fn register(&mut self, agent: AgentDescriptor) {
        self.agents.insert(agent.name.clone(), agent);
    }

    pub fn with_agent(mut self, agent: AgentDescriptor) -> Self {
        self.register(agent);
        self
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    fn lookup(&self, name: Option<&str>, role: Option<&str>) -> Option<&AgentDescriptor> {
        if let Some(agent) = name.and_then(|n| self.agents.get(n)) {
            return Some(agent);
        }
        let role = role?;
        // Sorted so that role collisions resolve the same way every time.
        let mut candidates: Vec<&AgentDescriptor> =
            self.agents.values().filter(|a| a.role == role).collect();
        candidates.sort_by(|a, b| a.name.cmp(&b.name));
        candidates.into_iter().next()
    }
}

#[async_trait]
impl AgentResolver for StaticAgentResolver {
    async fn resolve(
        &self,
        agent_name: Option<&str>,
        agent_role: Option<&str>,
        _context: &ExecutionContext,
    ) -> std::result::Result<AgentDescriptor, AgentError> {
        self.lookup(agent_name, agent_role).cloned().ok_or_else(|| {
            AgentError::NotFound(
                agent_name
                    .or(agent_role)
                    .unwrap_or("<unspecified>")
                    .to_string(),
            )
        })
    }
}
