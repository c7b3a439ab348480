//! Template rendering.
//!
//! Two renderers share one trait. [`ExpressionRenderer`] evaluates the full
//! Jinja-style language through minijinja (substitution, arithmetic,
//! indexing, filters, control flow). [`LiteralRenderer`] only replaces bare
//! `{{ name }}` placeholders and never fails. Callers decide what to do
//! when the expression renderer errors; the error never travels further up.

use contentloom_core::ExecutionContext;
use contentloom_core::context::value_to_text;
use minijinja::Environment;

/// A rendering failure. Only ever seen by the call site choosing a fallback.
#[derive(Debug, Clone, thiserror::Error)]
#[error("template render failed: {0}")]
pub struct RenderError(pub String);

pub trait TemplateRenderer: Send + Sync {
    fn render(&self, template: &str, context: &ExecutionContext) -> Result<String, RenderError>;
}

/// Full expression engine.
pub struct ExpressionRenderer {
    env: Environment<'static>,
}

impl ExpressionRenderer {
    pub fn new() -> Self {
        Self {
            env: Environment::new(),
        }
    }
}

impl Default for ExpressionRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ExpressionRenderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExpressionRenderer").finish_non_exhaustive()
    }
}

impl TemplateRenderer for ExpressionRenderer {
    fn render(&self, template: &str, context: &ExecutionContext) -> Result<String, RenderError> {
        self.env
            .render_str(template, context)
            .map_err(|e| RenderError(e.to_string()))
    }
}

/// Literal `{{ name }}` substitution. Anything that is not a bare
/// identifier present in the context is left untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct LiteralRenderer;

impl TemplateRenderer for LiteralRenderer {
    fn render(&self, template: &str, context: &ExecutionContext) -> Result<String, RenderError> {
        Ok(substitute(template, context))
    }
}

fn substitute(template: &str, context: &ExecutionContext) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find("{{") {
        let Some(close) = rest[open + 2..].find("}}") else {
            break;
        };
        let placeholder = &rest[open..open + 2 + close + 2];
        let name = rest[open + 2..open + 2 + close].trim();

        out.push_str(&rest[..open]);
        match context.get(name) {
            Some(value) if is_identifier(name) => out.push_str(&value_to_text(value)),
            _ => out.push_str(placeholder),
        }
        rest = &rest[open + placeholder.len()..];
    }
    out.push_str(rest);
    out
}

fn is_identifier(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx() -> ExecutionContext {
        [
            ("topic", json!("Inflation")),
            ("count", json!(3)),
            ("items", json!(["a", "b"])),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn expression_renderer_handles_arithmetic_and_indexing() {
        let r = ExpressionRenderer::new();
        let out = r
            .render("{{ topic }}: {{ count * 2 }} / {{ items[1] }}", &ctx())
            .unwrap();
        assert_eq!(out, "Inflation: 6 / b");
    }

    #[test]
    fn expression_renderer_reports_syntax_errors() {
        let r = ExpressionRenderer::new();
        assert!(r.render("{% if %}broken", &ctx()).is_err());
    }

    #[test]
    fn literal_renderer_substitutes_known_names() {
        let out = LiteralRenderer
            .render("About {{topic}} x{{ count }}", &ctx())
            .unwrap();
        assert_eq!(out, "About Inflation x3");
    }

    #[test]
    fn literal_renderer_leaves_unknown_placeholders() {
        let out = LiteralRenderer
            .render("{{ missing }} {{ count + 1 }} {{ unclosed", &ctx())
            .unwrap();
        assert_eq!(out, "{{ missing }} {{ count + 1 }} {{ unclosed");
    }
}
