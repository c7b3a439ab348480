//! Layered system prompt assembly.
//!
//! Merges every layer's section contributions, applies per-section token
//! budgets, and emits the final system message with a [`BudgetReport`].
//!
//! # Merge rule
//!
//! Contributions accumulate per section in layer order. A contribution
//! marked `replace` discards whatever the section held so far. Each section
//! is then joined with blank lines, trimmed, and truncated to its budget.
//!
//! # Determinism
//!
//! Output order is fixed: the canonical sections first
//! (`persona, goal, tool_rules, brand_voice, compliance_rules,
//! run_context_notice`), then any ad-hoc sections sorted by name. Identical
//! templates and context always produce identical text.

use std::collections::BTreeMap;

use contentloom_core::{AgentDescriptor, ExecutionContext, Result, ToolDescriptor};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::budget::{BudgetTable, COMPLIANCE_RULES, PROMPT_SECTIONS};
use crate::layers::{Layer, LayerResolver, runtime_layer};
use crate::token;

const DEFAULT_VERSION: &str = "v1";

// ── Types ─────────────────────────────────────────────────────────────────

/// Per-call assembly options.
#[derive(Debug, Clone, Default)]
pub struct PromptConfig {
    /// Template set version. Falls back to the assembler's default.
    pub version: Option<String>,
    /// Budget overrides merged over the assembler's table.
    pub section_budgets: BTreeMap<String, usize>,
    /// Tools available to the agent. When empty, the agent's own tool names
    /// are used.
    pub tools: Vec<ToolDescriptor>,
    /// Section → text, always applied as replacing contributions.
    pub runtime_overrides: BTreeMap<String, String>,
    /// Ad-hoc layers applied after the task layer and before the runtime
    /// layer.
    pub extra_layers: Vec<Layer>,
}

impl PromptConfig {
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn with_budget(mut self, section: impl Into<String>, budget: usize) -> Self {
        self.section_budgets.insert(section.into(), budget);
        self
    }

    pub fn with_tools(mut self, tools: Vec<ToolDescriptor>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_override(mut self, section: impl Into<String>, text: impl Into<String>) -> Self {
        self.runtime_overrides.insert(section.into(), text.into());
        self
    }

    pub fn with_layer(mut self, layer: Layer) -> Self {
        self.extra_layers.push(layer);
        self
    }
}

/// Budget accounting for one emitted section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionReport {
    pub tokens: usize,
    pub budget: Option<usize>,
    pub truncated: bool,
    pub sources: Vec<String>,
}

/// Diagnostic companion to the assembled text. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetReport {
    pub version: String,
    pub total_tokens: usize,
    pub system_message_length: usize,
    pub sections: BTreeMap<String, SectionReport>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembledPrompt {
    pub text: String,
    pub report: BudgetReport,
}

#[derive(Default)]
struct Accumulated {
    parts: Vec<String>,
    sources: Vec<String>,
}

// ── Assembler ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct PromptAssembler {
    resolver: LayerResolver,
    budgets: BudgetTable,
    default_version: String,
}

impl PromptAssembler {
    pub fn new(resolver: LayerResolver) -> Self {
        Self {
            resolver,
            budgets: BudgetTable::prompt_defaults(),
            default_version: DEFAULT_VERSION.into(),
        }
    }

    /// Merge process-wide budget overrides over the defaults.
    pub fn with_budgets(mut self, overrides: &BTreeMap<String, usize>) -> Self {
        self.budgets = self.budgets.merged(overrides);
        self
    }

    pub fn with_default_version(mut self, version: impl Into<String>) -> Self {
        self.default_version = version.into();
        self
    }

    pub fn resolver(&self) -> &LayerResolver {
        &self.resolver
    }

    pub fn build(
        &self,
        agent: &AgentDescriptor,
        context: &ExecutionContext,
        config: &PromptConfig,
    ) -> Result<AssembledPrompt> {
        let version = config.version.as_deref().unwrap_or(&self.default_version);
        let tools = self.effective_tools(agent, config);

        let mut sections: BTreeMap<String, Accumulated> = BTreeMap::new();
        for layer in self.resolver.resolve(agent, &tools, context, version)? {
            merge_layer(&mut sections, &layer);
        }
        for layer in &config.extra_layers {
            merge_layer(&mut sections, layer);
        }

        let has_compliance = sections
            .get(COMPLIANCE_RULES)
            .is_some_and(|acc| !acc.parts.is_empty());
        merge_layer(
            &mut sections,
            &runtime_layer(context, !has_compliance, &config.runtime_overrides),
        );

        let budgets = self.budgets.clone().merged(&config.section_budgets);
        let mut report = BudgetReport {
            version: version.to_string(),
            total_tokens: 0,
            system_message_length: 0,
            sections: BTreeMap::new(),
        };
        let mut emitted = Vec::new();

        for name in section_order(&sections) {
            let Some(acc) = sections.get(&name) else {
                continue;
            };
            let joined = acc.parts.join("\n\n");
            let joined = joined.trim();
            if joined.is_empty() {
                continue;
            }

            let budget = budgets.get(&name);
            let original_tokens = token::count_tokens(joined);
            let truncated = budget.is_some_and(|b| original_tokens > b);
            let text = match budget {
                Some(b) if truncated => token::truncate(joined, b),
                _ => joined.to_string(),
            };
            let tokens = token::count_tokens(&text);
            if truncated {
                debug!(section = %name, original_tokens, budget = ?budget, "Section truncated to budget");
            }

            report.total_tokens += tokens;
            report.sections.insert(
                name.clone(),
                SectionReport {
                    tokens,
                    budget,
                    truncated,
                    sources: acc.sources.clone(),
                },
            );
            if !text.is_empty() {
                emitted.push(text);
            }
        }

        let text = emitted.join("\n\n");
        report.system_message_length = text.chars().count();

        debug!(
            agent = %agent.name,
            version = %report.version,
            sections = report.sections.len(),
            total_tokens = report.total_tokens,
            "System prompt assembled"
        );

        Ok(AssembledPrompt { text, report })
    }

    fn effective_tools(&self, agent: &AgentDescriptor, config: &PromptConfig) -> Vec<ToolDescriptor> {
        if !config.tools.is_empty() {
            return config.tools.clone();
        }
        agent
            .tools
            .iter()
            .map(|name| match self.resolver.tool_registry() {
                Some(registry) => registry.describe(name),
                None => ToolDescriptor::new(name.clone(), ""),
            })
            .collect()
    }
}

fn merge_layer(sections: &mut BTreeMap<String, Accumulated>, layer: &Layer) {
    for (name, contribution) in layer.iter() {
        let acc = sections.entry(name.to_string()).or_default();
        if contribution.replace {
            acc.parts.clear();
            acc.sources.clear();
        }
        let text = contribution.text.trim();
        if text.is_empty() {
            continue;
        }
        acc.parts.push(text.to_string());
        acc.sources.push(
            contribution
                .source()
                .map(str::to_string)
                .unwrap_or_else(|| layer.label.clone()),
        );
    }
}

/// Canonical sections first, then ad-hoc ones by name.
fn section_order(sections: &BTreeMap<String, Accumulated>) -> Vec<String> {
    let mut order: Vec<String> = PROMPT_SECTIONS.iter().map(|s| s.to_string()).collect();
    order.extend(
        sections
            .keys()
            .filter(|k| !PROMPT_SECTIONS.contains(&k.as_str()))
            .cloned(),
    );
    order
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::budget::{GOAL, PERSONA, RUN_CONTEXT_NOTICE, TOOL_RULES};
    use crate::layers::SectionContribution;
    use serde_json::json;

    struct Fixture {
        _dir: tempfile::TempDir,
        assembler: PromptAssembler,
    }

    fn fixture(files: &[(&str, &str)]) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let system = dir.path().join("system");
        let profiles = dir.path().join("profiles");
        for (rel, body) in files {
            let path = dir.path().join(rel);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(&path, body).unwrap();
        }
        Fixture {
            assembler: PromptAssembler::new(LayerResolver::new(system, profiles)),
            _dir: dir,
        }
    }

    fn writer() -> AgentDescriptor {
        AgentDescriptor::new("writer", "content_writer")
    }

    #[test]
    fn sections_follow_fixed_order() {
        let f = fixture(&[(
            "system/v1/global.yaml",
            "sections:\n  run_context_notice: Notice text\n  goal: Goal text\n  persona: Persona text\n",
        )]);
        let out = f
            .assembler
            .build(&writer(), &ExecutionContext::new(), &PromptConfig::default())
            .unwrap();
        assert_eq!(out.text, "Persona text\n\nGoal text\n\nNotice text");
    }

    #[test]
    fn contributions_append_across_layers() {
        let f = fixture(&[
            ("system/v1/global.yaml", "persona: Global persona\n"),
            ("system/v1/agents/writer.yaml", "persona: Writer persona\n"),
        ]);
        let agent = writer().with_system_message("Descriptor persona");
        let out = f
            .assembler
            .build(&agent, &ExecutionContext::new(), &PromptConfig::default())
            .unwrap();
        assert_eq!(out.text, "Global persona\n\nWriter persona\n\nDescriptor persona");
        assert_eq!(out.report.sections[PERSONA].sources.len(), 3);
        assert_eq!(out.report.sections[PERSONA].sources[2], "agent");
    }

    #[test]
    fn replace_discards_earlier_contributions() {
        let f = fixture(&[
            ("system/v1/global.yaml", "persona: Global persona\n"),
            (
                "system/v1/workflows/newsletter.yaml",
                "persona:\n  text: Only this\n  replace: true\n",
            ),
        ]);
        let ctx: ExecutionContext = [("workflow_type", json!("newsletter"))].into_iter().collect();
        let out = f.assembler.build(&writer(), &ctx, &PromptConfig::default()).unwrap();
        assert!(out.text.starts_with("Only this"));
        assert!(!out.text.contains("Global persona"));
        assert_eq!(out.report.sections[PERSONA].sources.len(), 1);
    }

    #[test]
    fn blank_contributions_leave_no_source() {
        let f = fixture(&[("system/v1/global.yaml", "persona: Global persona\n")]);
        let extra = Layer::new("extra")
            .with(PERSONA, SectionContribution::new("   ", "extra:persona"))
            .with(GOAL, SectionContribution::new("", "extra:goal"));
        let config = PromptConfig::default().with_layer(extra);
        let out = f
            .assembler
            .build(&writer(), &ExecutionContext::new(), &config)
            .unwrap();
        assert_eq!(out.text, "Global persona");
        assert_eq!(out.report.sections[PERSONA].sources.len(), 1);
        assert!(!out.report.sections.contains_key(GOAL));
    }

    #[test]
    fn empty_sections_are_omitted() {
        let f = fixture(&[]);
        let agent = writer().with_goal("Explain rates");
        let out = f
            .assembler
            .build(&agent, &ExecutionContext::new(), &PromptConfig::default())
            .unwrap();
        assert_eq!(out.text, "Primary goal: Explain rates");
        assert!(!out.report.sections.contains_key(PERSONA));
        assert!(!out.text.contains("\n\n\n"));
    }

    #[test]
    fn nothing_to_say_yields_empty_prompt() {
        let f = fixture(&[]);
        let out = f
            .assembler
            .build(&writer(), &ExecutionContext::new(), &PromptConfig::default())
            .unwrap();
        assert!(out.text.is_empty());
        assert_eq!(out.report.total_tokens, 0);
        assert_eq!(out.report.system_message_length, 0);
    }

    #[test]
    fn budgets_truncate_and_are_reported() {
        let f = fixture(&[]);
        let agent = writer().with_system_message("word1 word2 word3 word4 word5 word6");
        let config = PromptConfig::default().with_budget(PERSONA, 3);
        let out = f.assembler.build(&agent, &ExecutionContext::new(), &config).unwrap();

        assert!(!out.text.contains("word4"));
        let persona = &out.report.sections[PERSONA];
        assert!(persona.truncated);
        assert_eq!(persona.budget, Some(3));
        assert!(persona.tokens <= 3);
    }

    #[test]
    fn default_budgets_apply_without_overrides() {
        let f = fixture(&[]);
        let goal = (0..100).map(|i| format!("w{i}")).collect::<Vec<_>>().join(" ");
        let agent = writer().with_goal(goal);
        let out = f
            .assembler
            .build(&agent, &ExecutionContext::new(), &PromptConfig::default())
            .unwrap();
        let report = &out.report.sections[GOAL];
        assert_eq!(report.budget, Some(80));
        assert!(report.truncated);
        assert_eq!(report.tokens, 80);
    }

    #[test]
    fn zero_budget_drops_section_text() {
        let f = fixture(&[]);
        let agent = writer().with_system_message("Persona").with_goal("Goal");
        let config = PromptConfig::default().with_budget(PERSONA, 0);
        let out = f.assembler.build(&agent, &ExecutionContext::new(), &config).unwrap();
        assert_eq!(out.text, "Primary goal: Goal");
        assert!(out.report.sections[PERSONA].truncated);
        assert_eq!(out.report.sections[PERSONA].tokens, 0);
    }

    #[test]
    fn runtime_overrides_replace_any_section() {
        let f = fixture(&[("system/v1/global.yaml", "goal: File goal\n")]);
        let config = PromptConfig::default().with_override(GOAL, "Override goal");
        let out = f
            .assembler
            .build(&writer(), &ExecutionContext::new(), &config)
            .unwrap();
        assert_eq!(out.text, "Override goal");
        assert_eq!(out.report.sections[GOAL].sources, vec!["runtime_override"]);
    }

    #[test]
    fn compliance_from_context_only_when_missing() {
        let ctx: ExecutionContext = [("compliance_requirements", json!("Cite sources."))]
            .into_iter()
            .collect();

        let bare = fixture(&[]);
        let out = bare.assembler.build(&writer(), &ctx, &PromptConfig::default()).unwrap();
        assert_eq!(out.text, "Cite sources.");

        let with_file = fixture(&[("system/v1/global.yaml", "compliance_rules: No forecasts.\n")]);
        let out = with_file
            .assembler
            .build(&writer(), &ctx, &PromptConfig::default())
            .unwrap();
        assert_eq!(out.text, "No forecasts.");
    }

    #[test]
    fn runtime_notice_closes_the_prompt() {
        let f = fixture(&[]);
        let ctx: ExecutionContext = [
            ("client_profile", json!("acme")),
            ("target_audience", json!("Investors")),
        ]
        .into_iter()
        .collect();
        let agent = writer().with_goal("Explain");
        let out = f.assembler.build(&agent, &ctx, &PromptConfig::default()).unwrap();
        assert_eq!(
            out.text,
            "Primary goal: Explain\n\nRuntime context:\n- Client profile: acme\n- Target audience: Investors"
        );
        assert_eq!(out.report.sections[RUN_CONTEXT_NOTICE].sources, vec!["runtime"]);
    }

    #[test]
    fn ad_hoc_sections_follow_canonical_ones() {
        let f = fixture(&[]);
        let layer = Layer::new("task.prompt").with("task", SectionContribution::new("Write the draft.", "task.prompt"));
        let agent = writer().with_goal("Explain");
        let ctx: ExecutionContext = [("tone", json!("calm"))].into_iter().collect();
        let out = f
            .assembler
            .build(&agent, &ctx, &PromptConfig::default().with_layer(layer))
            .unwrap();
        assert_eq!(
            out.text,
            "Primary goal: Explain\n\nRuntime context:\n- Preferred tone: calm\n\nWrite the draft."
        );
        assert_eq!(out.report.sections["task"].budget, None);
    }

    #[test]
    fn agent_tool_names_are_described_through_registry() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = LayerResolver::new(dir.path(), dir.path()).with_tool_registry(std::sync::Arc::new(
            contentloom_core::ToolNameRegistry::canonical(),
        ));
        let assembler = PromptAssembler::new(resolver);
        let agent = writer().with_tools(["research_client_sources"]);
        let out = assembler
            .build(&agent, &ExecutionContext::new(), &PromptConfig::default().with_budget(TOOL_RULES, 500))
            .unwrap();
        assert!(out.text.contains("- perplexity_search: "));
        assert!(out.text.contains("Critical rules:"));
    }

    #[test]
    fn version_selects_template_set() {
        let f = fixture(&[
            ("system/v1/global.yaml", "persona: Version one\n"),
            ("system/v2/global.yaml", "persona: Version two\n"),
        ]);
        let ctx = ExecutionContext::new();
        let v1 = f.assembler.build(&writer(), &ctx, &PromptConfig::default()).unwrap();
        let v2 = f
            .assembler
            .build(&writer(), &ctx, &PromptConfig::default().with_version("v2"))
            .unwrap();
        assert_eq!(v1.text, "Version one");
        assert_eq!(v1.report.version, "v1");
        assert_eq!(v2.text, "Version two");
    }

    #[test]
    fn repeated_builds_are_identical() {
        let f = fixture(&[
            ("system/v1/global.yaml", "persona: \"Hello {{ client_name }}\"\n"),
            ("profiles/acme/prompts/system/v1/profile.yaml", "brand_voice: Crisp\n"),
        ]);
        let ctx: ExecutionContext = [("client_name", json!("acme")), ("tone", json!("warm"))]
            .into_iter()
            .collect();
        let agent = writer().with_goal("Explain").with_tools(["web_search"]);
        let a = f.assembler.build(&agent, &ctx, &PromptConfig::default()).unwrap();
        let b = f.assembler.build(&agent, &ctx, &PromptConfig::default()).unwrap();
        assert_eq!(a, b);
        assert!(a.text.starts_with("Hello acme"));
        assert!(a.text.contains("Crisp"));
    }

    #[test]
    fn unparsable_template_fails_the_build() {
        let f = fixture(&[("system/v1/global.yaml", "- just\n- a list\n")]);
        let err = f
            .assembler
            .build(&writer(), &ExecutionContext::new(), &PromptConfig::default())
            .unwrap_err();
        assert!(err.is_configuration());
    }
}
