//! Template layers.
//!
//! A layer is one source of section text: a YAML file from the versioned
//! template tree, or a programmatic builder (the agent descriptor, the
//! runtime context). Resolution order, lowest precedence first:
//!
//! 1. `<system>/<version>/global.yaml`
//! 2. `<system>/<version>/profile.yaml`, then the profile overlay
//! 3. `<system>/<version>/workflows/<workflow>.yaml`, then the overlay
//! 4. `<system>/<version>/agents/<agent>.yaml`, then the overlay, then the
//!    agent descriptor itself
//! 5. `<system>/<version>/tasks/<workflow>/<task>.yaml`, then the overlay
//!
//! The profile overlay root is `<profiles>/<profile>/prompts/system/<version>`.
//! The runtime layer always comes last and is built by the assembler, since
//! it depends on what earlier layers contributed.
//!
//! A missing file is an empty layer. A file that exists but cannot be
//! parsed is a configuration error.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use contentloom_core::{AgentDescriptor, Error, ExecutionContext, Result, ToolDescriptor, ToolNameRegistry};
use serde::Serialize;
use serde_yaml::Value as Yaml;
use tracing::{debug, warn};

use crate::budget::{BRAND_VOICE, COMPLIANCE_RULES, GOAL, PERSONA, RUN_CONTEXT_NOTICE, TOOL_RULES};
use crate::render::{ExpressionRenderer, TemplateRenderer};

/// Fallback tool instruction when no canonical registry is configured.
pub const GENERIC_TOOL_REMINDER: &str =
    "Ensure tool calls use the canonical name and are wrapped in [TOOL] ... [/TOOL] blocks.";

// ── Types ─────────────────────────────────────────────────────────────────

/// One layer's text for one section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SectionContribution {
    pub text: String,
    /// Discard everything accumulated for this section so far.
    pub replace: bool,
    pub metadata: BTreeMap<String, String>,
}

impl SectionContribution {
    pub fn new(text: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            replace: false,
            metadata: BTreeMap::from([("source".to_string(), source.into())]),
        }
    }

    pub fn replacing(text: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            replace: true,
            ..Self::new(text, source)
        }
    }

    pub fn source(&self) -> Option<&str> {
        self.metadata.get("source").map(String::as_str)
    }
}

/// Section name → contribution, from a single source.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Layer {
    pub label: String,
    sections: BTreeMap<String, SectionContribution>,
}

impl Layer {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            sections: BTreeMap::new(),
        }
    }

    /// Set the contribution for a section. Section names are lowercased.
    pub fn insert(&mut self, section: &str, contribution: SectionContribution) {
        self.sections.insert(section.to_lowercase(), contribution);
    }

    pub fn with(mut self, section: &str, contribution: SectionContribution) -> Self {
        self.insert(section, contribution);
        self
    }

    pub fn get(&self, section: &str) -> Option<&SectionContribution> {
        self.sections.get(section)
    }

    pub fn contains(&self, section: &str) -> bool {
        self.sections.contains_key(section)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &SectionContribution)> {
        self.sections.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    pub fn len(&self) -> usize {
        self.sections.len()
    }
}

// ── Resolver ──────────────────────────────────────────────────────────────

/// Loads file and agent layers for one assembly.
#[derive(Clone)]
pub struct LayerResolver {
    system_dir: PathBuf,
    profiles_dir: PathBuf,
    renderer: Arc<dyn TemplateRenderer>,
    tool_registry: Option<Arc<ToolNameRegistry>>,
}

impl std::fmt::Debug for LayerResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LayerResolver")
            .field("system_dir", &self.system_dir)
            .field("profiles_dir", &self.profiles_dir)
            .field("tool_registry", &self.tool_registry.is_some())
            .finish()
    }
}

impl LayerResolver {
    pub fn new(system_dir: impl Into<PathBuf>, profiles_dir: impl Into<PathBuf>) -> Self {
        Self {
            system_dir: system_dir.into(),
            profiles_dir: profiles_dir.into(),
            renderer: Arc::new(ExpressionRenderer::new()),
            tool_registry: None,
        }
    }

    pub fn with_renderer(mut self, renderer: Arc<dyn TemplateRenderer>) -> Self {
        self.renderer = renderer;
        self
    }

    pub fn with_tool_registry(mut self, registry: Arc<ToolNameRegistry>) -> Self {
        self.tool_registry = Some(registry);
        self
    }

    pub fn tool_registry(&self) -> Option<&ToolNameRegistry> {
        self.tool_registry.as_deref()
    }

    /// Every layer up to and including the task layer, in precedence order.
    pub fn resolve(
        &self,
        agent: &AgentDescriptor,
        tools: &[ToolDescriptor],
        context: &ExecutionContext,
        version: &str,
    ) -> Result<Vec<Layer>> {
        let profile = identifier(context, &["client_profile", "client_name"], "profile");
        let workflow = identifier(context, &["workflow_type", "workflow_template"], "workflow");
        let task = identifier(context, &["task_id", "task_name"], "task");
        let agent_name = safe_segment(&agent.name, "agent");

        let core = self.system_dir.join(version);
        let overlay = profile
            .as_ref()
            .map(|p| self.profiles_dir.join(p).join("prompts").join("system").join(version));

        let mut layers = vec![self.load_file(&core.join("global.yaml"), "global", context)?];

        if profile.is_some() {
            layers.push(self.load_file(&core.join("profile.yaml"), "profile", context)?);
            if let Some(root) = &overlay {
                layers.push(self.load_file(&root.join("profile.yaml"), "profile.overlay", context)?);
            }
        }

        if let Some(wf) = &workflow {
            let rel = Path::new("workflows").join(format!("{wf}.yaml"));
            layers.extend(self.load_pair(&core, overlay.as_deref(), &rel, "workflow", context)?);
        }

        if let Some(name) = &agent_name {
            let rel = Path::new("agents").join(format!("{name}.yaml"));
            layers.extend(self.load_pair(&core, overlay.as_deref(), &rel, "agent", context)?);
        }
        layers.push(self.agent_layer(agent, tools));

        if let (Some(wf), Some(task)) = (&workflow, &task) {
            let rel = Path::new("tasks").join(wf).join(format!("{task}.yaml"));
            layers.extend(self.load_pair(&core, overlay.as_deref(), &rel, "task", context)?);
        }

        Ok(layers)
    }

    fn load_pair(
        &self,
        core: &Path,
        overlay: Option<&Path>,
        relative: &Path,
        label: &str,
        context: &ExecutionContext,
    ) -> Result<Vec<Layer>> {
        let mut layers = vec![self.load_file(&core.join(relative), label, context)?];
        if let Some(root) = overlay {
            layers.push(self.load_file(&root.join(relative), &format!("{label}.overlay"), context)?);
        }
        Ok(layers)
    }

    /// Load one section file. Missing files yield an empty layer.
    pub fn load_file(&self, path: &Path, label: &str, context: &ExecutionContext) -> Result<Layer> {
        let mut layer = Layer::new(label);
        if !path.is_file() {
            debug!(path = %path.display(), "Section file not found, skipping layer");
            return Ok(layer);
        }

        let parse_error = |reason: String| Error::TemplateParse {
            path: path.display().to_string(),
            reason,
        };
        let content = std::fs::read_to_string(path).map_err(|e| parse_error(e.to_string()))?;
        let document: Yaml = serde_yaml::from_str(&content).map_err(|e| parse_error(e.to_string()))?;

        let sections = match document {
            Yaml::Null => return Ok(layer),
            Yaml::Mapping(mut map) => match map.remove("sections") {
                Some(Yaml::Mapping(inner)) => inner,
                Some(Yaml::Null) => return Ok(layer),
                Some(_) => return Err(parse_error("'sections' must be a mapping".into())),
                None => map,
            },
            _ => return Err(parse_error("expected a mapping of section names".into())),
        };

        let source = path.display().to_string();
        for (key, value) in sections {
            let name = scalar_text(&key)
                .ok_or_else(|| parse_error("section names must be strings".into()))?;
            let (raw, replace) = match &value {
                Yaml::Mapping(entry) => {
                    let text = entry
                        .get("text")
                        .and_then(scalar_text)
                        .filter(|t| !t.is_empty())
                        .or_else(|| entry.get("content").and_then(scalar_text))
                        .unwrap_or_default();
                    let replace = entry.get("replace").and_then(Yaml::as_bool).unwrap_or(false);
                    (text, replace)
                }
                Yaml::Null => continue,
                other => (
                    scalar_text(other).ok_or_else(|| {
                        parse_error(format!("section '{name}' must be text or a mapping"))
                    })?,
                    false,
                ),
            };

            let rendered = self.render_section(&raw, context, &source, &name);
            let text = rendered.trim();
            if text.is_empty() {
                continue;
            }
            let mut contribution = SectionContribution::new(text, source.clone());
            contribution.replace = replace;
            layer.insert(&name, contribution);
        }

        debug!(path = %source, sections = layer.len(), "Loaded section file");
        Ok(layer)
    }

    fn render_section(&self, raw: &str, context: &ExecutionContext, source: &str, section: &str) -> String {
        if raw.is_empty() {
            return String::new();
        }
        match self.renderer.render(raw, context) {
            Ok(text) => text,
            Err(e) => {
                warn!(path = source, section, error = %e, "Section render failed, using raw text");
                raw.to_string()
            }
        }
    }

    /// Sections derived from the agent descriptor itself.
    pub fn agent_layer(&self, agent: &AgentDescriptor, tools: &[ToolDescriptor]) -> Layer {
        let mut layer = Layer::new("agent.descriptor");

        let persona: Vec<&str> = [agent.system_message.as_deref(), agent.backstory.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect();
        if !persona.is_empty() {
            layer.insert(PERSONA, SectionContribution::new(persona.join("\n\n"), "agent"));
        }

        if let Some(goal) = agent.goal.as_deref().map(str::trim).filter(|g| !g.is_empty()) {
            layer.insert(GOAL, SectionContribution::new(format!("Primary goal: {goal}"), "agent"));
        }

        if let Some(voice) = agent.metadata_str("brand_voice") {
            layer.insert(
                BRAND_VOICE,
                SectionContribution::new(format!("Brand voice guidance: {voice}"), "agent.metadata"),
            );
        }

        if let Some(rules) = self.tool_rules(tools) {
            layer.insert(TOOL_RULES, SectionContribution::new(rules, "agent.tools"));
        }

        layer
    }

    fn tool_rules(&self, tools: &[ToolDescriptor]) -> Option<String> {
        if tools.is_empty() {
            return None;
        }

        let mut lines = vec!["You have access to the following tools:".to_string()];
        for tool in tools.iter().filter(|t| !t.name.trim().is_empty()) {
            let description = tool.description.trim();
            if description.is_empty() {
                lines.push(format!("- {}", tool.name));
            } else {
                lines.push(format!("- {}: {description}", tool.name));
            }
        }

        match self.tool_registry.as_deref() {
            Some(registry) if !registry.invocation_syntax().is_empty() => {
                lines.push(String::new());
                lines.push("When invoking tools, use the exact syntax:".into());
                lines.extend(registry.invocation_syntax().iter().cloned());
                if !registry.critical_rules().is_empty() {
                    lines.push(String::new());
                    lines.push("Critical rules:".into());
                    lines.extend(registry.critical_rules().iter().map(|r| format!("- {r}")));
                }
            }
            _ => lines.push(GENERIC_TOOL_REMINDER.into()),
        }

        Some(lines.join("\n"))
    }
}

/// The runtime layer: a notice built from well-known context fields,
/// compliance requirements when nothing else supplied them, then caller
/// overrides as replacing contributions.
pub fn runtime_layer(
    context: &ExecutionContext,
    include_compliance: bool,
    overrides: &BTreeMap<String, String>,
) -> Layer {
    let mut layer = Layer::new("runtime");

    let fields: [(&str, &[&str]); 6] = [
        ("Client profile", &["client_profile", "client_name"]),
        ("Target audience", &["target_audience"]),
        ("Preferred tone", &["tone"]),
        ("Workflow template", &["workflow_template"]),
        ("Current task", &["task_name"]),
        ("Custom instructions", &["custom_instructions"]),
    ];
    let bullets: Vec<String> = fields
        .into_iter()
        .filter_map(|(label, keys)| context.first_text(keys).map(|v| format!("{label}: {v}")))
        .collect();

    if !bullets.is_empty() {
        layer.insert(
            RUN_CONTEXT_NOTICE,
            SectionContribution::new(format!("Runtime context:\n- {}", bullets.join("\n- ")), "runtime"),
        );
    }

    if include_compliance {
        if let Some(compliance) = context.text("compliance_requirements") {
            layer.insert(COMPLIANCE_RULES, SectionContribution::new(compliance, "runtime"));
        }
    }

    for (section, text) in overrides {
        if text.trim().is_empty() {
            continue;
        }
        layer.insert(section, SectionContribution::replacing(text.clone(), "runtime_override"));
    }

    layer
}

fn identifier(context: &ExecutionContext, keys: &[&str], kind: &str) -> Option<String> {
    let value = context.first_text(keys)?;
    safe_segment(&value, kind).map(str::to_string)
}

/// Reject identifiers that would leave the template tree.
fn safe_segment<'a>(value: &'a str, kind: &str) -> Option<&'a str> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    if value.contains(['/', '\\']) || value.contains("..") {
        warn!(kind, value, "Ignoring identifier that is not a plain path segment");
        return None;
    }
    Some(value)
}

fn scalar_text(value: &Yaml) -> Option<String> {
    match value {
        Yaml::String(s) => Some(s.clone()),
        Yaml::Number(n) => Some(n.to_string()),
        Yaml::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::fs;

    fn write(path: &Path, body: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, body).unwrap();
    }

    fn ctx(pairs: &[(&str, &str)]) -> ExecutionContext {
        pairs.iter().map(|(k, v)| (*k, json!(v))).collect()
    }

    #[test]
    fn missing_file_is_empty_layer() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = LayerResolver::new(dir.path(), dir.path());
        let layer = resolver
            .load_file(&dir.path().join("nope.yaml"), "global", &ExecutionContext::new())
            .unwrap();
        assert!(layer.is_empty());
    }

    #[test]
    fn sections_key_and_bare_mapping_both_parse() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.yaml");
        let b = dir.path().join("b.yaml");
        write(&a, "sections:\n  Persona: You are helpful.\n");
        write(&b, "goal:\n  content: Ship it\n  replace: true\n");

        let resolver = LayerResolver::new(dir.path(), dir.path());
        let ctx = ExecutionContext::new();
        let la = resolver.load_file(&a, "a", &ctx).unwrap();
        let lb = resolver.load_file(&b, "b", &ctx).unwrap();

        assert_eq!(la.get("persona").unwrap().text, "You are helpful.");
        assert!(!la.get("persona").unwrap().replace);
        let goal = lb.get("goal").unwrap();
        assert_eq!(goal.text, "Ship it");
        assert!(goal.replace);
        assert_eq!(goal.source(), Some(b.display().to_string().as_str()));
    }

    #[test]
    fn section_text_is_rendered_against_context() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("global.yaml");
        write(&path, "sections:\n  goal: \"Write {{ target_word_count * 2 }} words on {{ topic }}\"\n");
        let resolver = LayerResolver::new(dir.path(), dir.path());

        let mut ctx = ctx(&[("topic", "rates")]);
        ctx.insert("target_word_count", 400);
        let layer = resolver.load_file(&path, "global", &ctx).unwrap();
        assert_eq!(layer.get("goal").unwrap().text, "Write 800 words on rates");
    }

    #[test]
    fn render_failure_falls_back_to_raw_text() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("global.yaml");
        write(&path, "sections:\n  persona: \"Hello {% if %} there\"\n");
        let resolver = LayerResolver::new(dir.path(), dir.path());
        let layer = resolver.load_file(&path, "global", &ExecutionContext::new()).unwrap();
        assert_eq!(layer.get("persona").unwrap().text, "Hello {% if %} there");
    }

    #[test]
    fn blank_sections_are_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("global.yaml");
        write(&path, "sections:\n  persona: \"   \"\n  goal: ~\n  brand_voice: \"{{ missing }}\"\n");
        let resolver = LayerResolver::new(dir.path(), dir.path());
        let layer = resolver.load_file(&path, "global", &ExecutionContext::new()).unwrap();
        assert!(layer.is_empty());
    }

    #[test]
    fn unparsable_file_is_a_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("global.yaml");
        write(&path, "sections: [unclosed\n");
        let resolver = LayerResolver::new(dir.path(), dir.path());
        let err = resolver.load_file(&path, "global", &ExecutionContext::new()).unwrap_err();
        assert!(matches!(err, Error::TemplateParse { .. }));
        assert!(err.is_configuration());
    }

    #[test]
    fn resolve_walks_layers_in_precedence_order() {
        let dir = tempfile::tempdir().unwrap();
        let system = dir.path().join("system");
        let profiles = dir.path().join("profiles");
        let core = system.join("v1");
        let overlay = profiles.join("acme").join("prompts").join("system").join("v1");

        write(&core.join("global.yaml"), "persona: global\n");
        write(&core.join("profile.yaml"), "persona: core profile\n");
        write(&overlay.join("profile.yaml"), "persona: acme profile\n");
        write(&core.join("workflows/newsletter.yaml"), "persona: workflow\n");
        write(&overlay.join("workflows/newsletter.yaml"), "persona: acme workflow\n");
        write(&core.join("agents/writer.yaml"), "persona: agent file\n");
        write(&core.join("tasks/newsletter/draft.yaml"), "persona: task\n");

        let resolver = LayerResolver::new(&system, &profiles);
        let agent = AgentDescriptor::new("writer", "content_writer").with_system_message("descriptor");
        let ctx = ctx(&[
            ("client_name", "acme"),
            ("workflow_type", "newsletter"),
            ("task_id", "draft"),
        ]);

        let layers = resolver.resolve(&agent, &[], &ctx, "v1").unwrap();
        let personas: Vec<&str> = layers
            .iter()
            .filter_map(|l| l.get("persona").map(|c| c.text.as_str()))
            .collect();
        assert_eq!(
            personas,
            vec![
                "global",
                "core profile",
                "acme profile",
                "workflow",
                "acme workflow",
                "agent file",
                "descriptor",
                "task"
            ]
        );
    }

    #[test]
    fn task_layer_needs_workflow_and_task() {
        let dir = tempfile::tempdir().unwrap();
        write(&dir.path().join("v1/tasks/newsletter/draft.yaml"), "goal: task goal\n");
        let resolver = LayerResolver::new(dir.path(), dir.path());
        let agent = AgentDescriptor::new("writer", "");

        let only_task = ctx(&[("task_id", "draft")]);
        let layers = resolver.resolve(&agent, &[], &only_task, "v1").unwrap();
        assert!(layers.iter().all(|l| !l.contains("goal")));
    }

    #[test]
    fn traversal_identifiers_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        write(&dir.path().join("secret.yaml"), "persona: leaked\n");
        let system = dir.path().join("system");
        let resolver = LayerResolver::new(&system, dir.path());
        let agent = AgentDescriptor::new("../../secret", "");
        let ctx = ctx(&[("workflow_type", "../secret")]);

        let layers = resolver.resolve(&agent, &[], &ctx, "v1").unwrap();
        assert!(layers.iter().all(|l| l.get("persona").is_none()));
    }

    #[test]
    fn agent_layer_maps_descriptor_fields() {
        let resolver = LayerResolver::new("/none", "/none");
        let agent = AgentDescriptor::new("writer", "content_writer")
            .with_system_message("  You write newsletters. ")
            .with_backstory("Ten years at a bank.")
            .with_goal("Explain rates")
            .with_metadata("brand_voice", "Plain and warm");

        let layer = resolver.agent_layer(&agent, &[]);
        assert_eq!(
            layer.get(PERSONA).unwrap().text,
            "You write newsletters.\n\nTen years at a bank."
        );
        assert_eq!(layer.get(GOAL).unwrap().text, "Primary goal: Explain rates");
        assert_eq!(
            layer.get(BRAND_VOICE).unwrap().text,
            "Brand voice guidance: Plain and warm"
        );
        assert_eq!(layer.get(BRAND_VOICE).unwrap().source(), Some("agent.metadata"));
        assert!(!layer.contains(TOOL_RULES));
    }

    #[test]
    fn tool_rules_without_registry_use_generic_reminder() {
        let resolver = LayerResolver::new("/none", "/none");
        let agent = AgentDescriptor::new("writer", "");
        let tools = [ToolDescriptor::new("web_search", "Search the web"), ToolDescriptor::new("calc", "")];

        let layer = resolver.agent_layer(&agent, &tools);
        let rules = &layer.get(TOOL_RULES).unwrap().text;
        assert_eq!(
            rules,
            &format!(
                "You have access to the following tools:\n- web_search: Search the web\n- calc\n{GENERIC_TOOL_REMINDER}"
            )
        );
    }

    #[test]
    fn tool_rules_with_registry_include_syntax_block() {
        let resolver = LayerResolver::new("/none", "/none")
            .with_tool_registry(Arc::new(ToolNameRegistry::canonical()));
        let tools = [ToolDescriptor::new("rag_search_content", "Search stored content")];

        let layer = resolver.agent_layer(&AgentDescriptor::new("writer", ""), &tools);
        let rules = &layer.get(TOOL_RULES).unwrap().text;
        assert!(rules.contains("When invoking tools, use the exact syntax:"));
        assert!(rules.contains("[rag_search_content] client_name, search_query [/rag_search_content]"));
        assert!(rules.contains("Critical rules:\n- Use the exact tool names listed above"));
        assert!(!rules.contains(GENERIC_TOOL_REMINDER));
    }

    #[test]
    fn runtime_layer_builds_notice_and_overrides() {
        let ctx = ctx(&[
            ("client_name", "acme"),
            ("tone", "calm"),
            ("task_name", "Draft"),
            ("compliance_requirements", "No forecasts."),
        ]);
        let overrides = BTreeMap::from([("goal".to_string(), "Override goal".to_string())]);
        let layer = runtime_layer(&ctx, true, &overrides);

        assert_eq!(
            layer.get(RUN_CONTEXT_NOTICE).unwrap().text,
            "Runtime context:\n- Client profile: acme\n- Preferred tone: calm\n- Current task: Draft"
        );
        assert_eq!(layer.get(COMPLIANCE_RULES).unwrap().text, "No forecasts.");
        let goal = layer.get(GOAL).unwrap();
        assert!(goal.replace);
        assert_eq!(goal.source(), Some("runtime_override"));

        let without = runtime_layer(&ctx, false, &BTreeMap::new());
        assert!(!without.contains(COMPLIANCE_RULES));
    }
}
