//! Context compaction.
//!
//! Folds an arbitrary execution context into three budgeted text buckets
//! and a citation list:
//!
//! 1. **Collect** fields into `kb_summary`, `examples` and `runtime_context`
//! 2. **Dedupe** lines by trimmed identity, first occurrence wins
//! 3. **Normalize** trailing whitespace and blank lines away
//! 4. **Cap** each bucket to its token budget
//! 5. **Citations** from `*citation*` / `*source*` keys
//! 6. **Report** drop ratios, budgets, timing
//!
//! Compaction has no error path. Values of unexpected shape are stringified.

use std::collections::{BTreeMap, HashSet};
use std::time::Instant;

use contentloom_core::ExecutionContext;
use contentloom_core::context::{is_truthy, value_to_text};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::budget::{BudgetTable, COMPACTION_SECTIONS, EXAMPLES, KB_SUMMARY, RUNTIME_CONTEXT};
use crate::token;

/// Key fragments that route a field into the knowledge-base bucket.
const KB_MARKERS: [&str; 8] = [
    "rag", "research", "analysis", "context", "brief", "summary", "content", "insight",
];

/// Fields rendered as runtime bullet lines, in this order.
const RUNTIME_FIELDS: [&str; 9] = [
    "topic",
    "target_audience",
    "target_word_count",
    "tone",
    "edition_number",
    "include_sources",
    "custom_instructions",
    "client_profile",
    "client_name",
];

const DEFAULT_CITATION_CAP: usize = 5;

// ── Types ─────────────────────────────────────────────────────────────────

/// One bucket after dedupe, normalize and cap.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineSection {
    pub text: String,
    pub tokens: usize,
}

/// Diagnostics for one compaction pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompactionNotes {
    pub duration_ms: f64,
    /// `max(0, 1 - final/original)` per bucket.
    pub drop_ratios: BTreeMap<String, f64>,
    pub truncated: BTreeMap<String, bool>,
    pub budgets: BudgetTable,
    pub total_tokens: usize,
}

/// Output of [`ContextCompactor::build`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompactedContext {
    pub kb_summary: PipelineSection,
    pub runtime_context: PipelineSection,
    pub examples: PipelineSection,
    pub citations: Vec<String>,
    pub notes: CompactionNotes,
}

impl CompactedContext {
    pub fn section(&self, name: &str) -> Option<&PipelineSection> {
        match name {
            KB_SUMMARY => Some(&self.kb_summary),
            RUNTIME_CONTEXT => Some(&self.runtime_context),
            EXAMPLES => Some(&self.examples),
            _ => None,
        }
    }

    /// Write the bucket texts and citations into `context` so templates can
    /// reference `{{ kb_summary }}` and friends.
    pub fn apply_to(&self, context: &mut ExecutionContext) {
        context.insert(KB_SUMMARY, self.kb_summary.text.clone());
        context.insert(RUNTIME_CONTEXT, self.runtime_context.text.clone());
        context.insert(EXAMPLES, self.examples.text.clone());
        context.insert("citations", self.citations.clone());
    }

    /// Markdown block appended to task prompts. Empty buckets are left out;
    /// citations become a bullet list.
    pub fn prompt_sections(&self) -> String {
        let mut blocks = Vec::new();
        for (heading, section) in [
            ("Knowledge Base Summary", &self.kb_summary),
            ("Runtime Context", &self.runtime_context),
            ("Examples", &self.examples),
        ] {
            if !section.text.is_empty() {
                blocks.push(format!("## {heading}\n{}", section.text));
            }
        }
        if !self.citations.is_empty() {
            let bullets: Vec<String> = self.citations.iter().map(|c| format!("- {c}")).collect();
            blocks.push(format!("## Citations\n{}", bullets.join("\n")));
        }
        blocks.join("\n\n")
    }
}

// ── Compactor ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ContextCompactor {
    budgets: BudgetTable,
    summarize: bool,
}

impl Default for ContextCompactor {
    fn default() -> Self {
        Self::new()
    }
}

impl ContextCompactor {
    pub fn new() -> Self {
        Self {
            budgets: BudgetTable::compaction_defaults(),
            summarize: false,
        }
    }

    /// Merge bucket budget overrides over the defaults.
    pub fn with_budgets(mut self, overrides: &BTreeMap<String, usize>) -> Self {
        self.budgets = self.budgets.merged(overrides);
        self
    }

    pub fn with_budget(mut self, section: &str, budget: usize) -> Self {
        self.budgets.set(section, budget);
        self
    }

    /// Extended summarization mode lifts the citation cap.
    pub fn with_summarize(mut self, summarize: bool) -> Self {
        self.summarize = summarize;
        self
    }

    pub fn budgets(&self) -> &BudgetTable {
        &self.budgets
    }

    pub fn build(&self, context: &ExecutionContext) -> CompactedContext {
        let started = Instant::now();
        let collected = collect(context);

        let mut out = CompactedContext::default();
        let mut notes = CompactionNotes {
            budgets: self.budgets.clone(),
            ..Default::default()
        };

        for name in COMPACTION_SECTIONS {
            let raw = collected.get(name).map(String::as_str).unwrap_or_default();
            let original_tokens = token::count_tokens(raw);
            let cleaned = normalize(&dedupe(raw));

            let (text, truncated) = match self.budgets.get(name) {
                Some(budget) if token::count_tokens(&cleaned) > budget => {
                    (token::truncate(&cleaned, budget), true)
                }
                _ => (cleaned, false),
            };
            let tokens = token::count_tokens(&text);

            notes
                .drop_ratios
                .insert(name.to_string(), drop_ratio(original_tokens, tokens));
            notes.truncated.insert(name.to_string(), truncated);
            notes.total_tokens += tokens;

            let section = PipelineSection { text, tokens };
            match name {
                KB_SUMMARY => out.kb_summary = section,
                RUNTIME_CONTEXT => out.runtime_context = section,
                _ => out.examples = section,
            }
        }

        out.citations = self.citations(context);
        notes.duration_ms = started.elapsed().as_secs_f64() * 1000.0;

        debug!(
            total_tokens = notes.total_tokens,
            citations = out.citations.len(),
            "Context compacted"
        );

        out.notes = notes;
        out
    }

    fn citations(&self, context: &ExecutionContext) -> Vec<String> {
        let mut raw = Vec::new();
        for (key, value) in context.iter() {
            let lower = key.to_lowercase();
            if !lower.contains("citation") && !lower.contains("source") {
                continue;
            }
            match value {
                Value::Array(items) => raw.extend(
                    items
                        .iter()
                        .filter(|v| citable(v))
                        .map(value_to_text),
                ),
                v if citable(v) => raw.push(value_to_text(v)),
                _ => {}
            }
        }

        let mut seen = HashSet::new();
        let mut unique = Vec::new();
        for entry in raw {
            if seen.insert(entry.clone()) {
                unique.push(entry);
            }
            if !self.summarize && unique.len() >= DEFAULT_CITATION_CAP {
                break;
            }
        }
        unique
    }
}

// ── Pipeline stages ───────────────────────────────────────────────────────

fn collect(context: &ExecutionContext) -> BTreeMap<&'static str, String> {
    let mut kb = Vec::new();
    let mut examples = Vec::new();

    for (key, value) in context.iter() {
        if !is_truthy(value) {
            continue;
        }
        let lower = key.to_lowercase();
        if is_kb_key(&lower) {
            kb.push(format!("[{key}]\n{}", block_text(value).trim()));
            continue;
        }
        if lower.ends_with("_examples") || lower.contains("example") {
            examples.push(block_text(value).trim().to_string());
        }
    }

    let runtime: Vec<String> = RUNTIME_FIELDS
        .iter()
        .filter_map(|field| {
            let value = context.get(field).filter(|v| is_truthy(v))?;
            Some(format!("- {}: {}", title_case(field), inline_text(value)))
        })
        .collect();

    BTreeMap::from([
        (KB_SUMMARY, kb.join("\n\n")),
        (RUNTIME_CONTEXT, runtime.join("\n")),
        (EXAMPLES, examples.join("\n\n")),
    ])
}

fn is_kb_key(lower: &str) -> bool {
    KB_MARKERS.iter().any(|m| lower.contains(m)) || lower.ends_with("_output")
}

/// Lists become one item per line.
fn block_text(value: &Value) -> String {
    match value {
        Value::Array(items) => items
            .iter()
            .filter(|v| is_truthy(v))
            .map(value_to_text)
            .collect::<Vec<_>>()
            .join("\n"),
        other => value_to_text(other),
    }
}

/// Lists become a comma-separated run.
fn inline_text(value: &Value) -> String {
    match value {
        Value::Array(items) => items.iter().map(value_to_text).collect::<Vec<_>>().join(", "),
        other => value_to_text(other),
    }
}

// Booleans such as `include_sources: true` are flags, not references.
fn citable(value: &Value) -> bool {
    is_truthy(value) && !value.is_boolean()
}

fn title_case(field: &str) -> String {
    field
        .split('_')
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Drop blank lines and repeated lines (by trimmed content), keeping the
/// first occurrence of each.
pub fn dedupe(text: &str) -> String {
    let mut seen = HashSet::new();
    text.lines()
        .filter(|line| {
            let key = line.trim();
            !key.is_empty() && seen.insert(key)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Right-trim every line and drop the ones left empty.
pub fn normalize(text: &str) -> String {
    text.lines()
        .map(str::trim_end)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn drop_ratio(original: usize, kept: usize) -> f64 {
    if original == 0 {
        return 0.0;
    }
    (1.0 - kept as f64 / original as f64).max(0.0)
}
