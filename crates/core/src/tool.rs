//! Tool descriptors and the canonical tool-name registry.
//!
//! The engine never executes tools itself. It only needs their names and
//! descriptions to render the `tool_rules` prompt section, plus the
//! invocation syntax agents are expected to follow.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// A tool as shown to an agent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

impl ToolDescriptor {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
        }
    }
}

pub const WEB_SEARCH: &str = "web_search";
pub const WEB_SEARCH_FINANCIAL: &str = "web_search_financial";
pub const RAG_GET_CLIENT_CONTENT: &str = "rag_get_client_content";
pub const RAG_SEARCH_CONTENT: &str = "rag_search_content";
pub const PERPLEXITY_SEARCH: &str = "perplexity_search";
pub const RESEARCH_AGENT: &str = "research_agent";

/// Canonical tool names, legacy aliases, and the invocation rules rendered
/// into prompts.
#[derive(Debug, Clone, Default)]
pub struct ToolNameRegistry {
    tools: BTreeMap<String, String>,
    aliases: HashMap<String, String>,
    syntax: Vec<String>,
    rules: Vec<String>,
}

impl ToolNameRegistry {
    /// An empty registry with no syntax block.
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in tool set with its bracketed invocation syntax.
    pub fn canonical() -> Self {
        let mut registry = Self::new();
        registry.register(WEB_SEARCH, "General web search");
        registry.register(WEB_SEARCH_FINANCIAL, "Web search restricted to financial sources");
        registry.register(RAG_GET_CLIENT_CONTENT, "Fetch stored content for a client");
        registry.register(RAG_SEARCH_CONTENT, "Semantic search over stored content");
        registry.register(PERPLEXITY_SEARCH, "Research-grade search with citations");
        registry.register(RESEARCH_AGENT, "Delegate a research question to the research agent");

        for legacy in [
            "research_premium_financial",
            "research_client_sources",
            "research_general_topic",
            "research_financial_premium",
        ] {
            registry.alias(legacy, PERPLEXITY_SEARCH);
        }

        registry.syntax = vec![
            bracketed(RAG_GET_CLIENT_CONTENT, "client_name"),
            bracketed(RAG_GET_CLIENT_CONTENT, "client_name, document_name"),
            bracketed(RAG_SEARCH_CONTENT, "client_name, search_query"),
            format!(
                "{} (searches shared content when the client is omitted)",
                bracketed(RAG_SEARCH_CONTENT, "search_query")
            ),
            bracketed(WEB_SEARCH, "your search query"),
            bracketed(PERPLEXITY_SEARCH, "your search query"),
        ];
        registry.rules = vec![
            "Use the exact tool names listed above".into(),
            format!("Provide concrete queries for {RAG_SEARCH_CONTENT}"),
            "Separate parameters with commas for multi-argument tools".into(),
            "Do not use placeholders like 'TOOL_NAME'".into(),
        ];
        registry
    }

    /// Register a canonical tool. Replaces any existing description.
    pub fn register(&mut self, name: impl Into<String>, description: impl Into<String>) {
        self.tools.insert(name.into(), description.into());
    }

    /// Map a legacy name onto a canonical one.
    pub fn alias(&mut self, alias: impl Into<String>, canonical: impl Into<String>) {
        self.aliases.insert(alias.into(), canonical.into());
    }

    pub fn with_syntax(mut self, lines: Vec<String>) -> Self {
        self.syntax = lines;
        self
    }

    pub fn with_rules(mut self, rules: Vec<String>) -> Self {
        self.rules = rules;
        self
    }

    /// Resolve a name or alias to its canonical form.
    pub fn canonicalize<'a>(&'a self, name: &'a str) -> &'a str {
        self.aliases.get(name).map(String::as_str).unwrap_or(name)
    }

    pub fn is_canonical(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Descriptor for a tool name, canonicalized. Unknown tools keep their
    /// name with an empty description.
    pub fn describe(&self, name: &str) -> ToolDescriptor {
        let canonical = self.canonicalize(name);
        ToolDescriptor::new(
            canonical,
            self.tools.get(canonical).cloned().unwrap_or_default(),
        )
    }

    pub fn invocation_syntax(&self) -> &[String] {
        &self.syntax
    }

    pub fn critical_rules(&self) -> &[String] {
        &self.rules
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tools.keys().map(String::as_str)
    }
}

fn bracketed(tool: &str, args: &str) -> String {
    format!("[{tool}] {args} [/{tool}]")
}
