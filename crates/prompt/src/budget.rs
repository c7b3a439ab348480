//! Section names and their token budgets.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const PERSONA: &str = "persona";
pub const GOAL: &str = "goal";
pub const TOOL_RULES: &str = "tool_rules";
pub const BRAND_VOICE: &str = "brand_voice";
pub const COMPLIANCE_RULES: &str = "compliance_rules";
pub const RUN_CONTEXT_NOTICE: &str = "run_context_notice";

/// Output order of system prompt sections.
pub const PROMPT_SECTIONS: [&str; 6] = [
    PERSONA,
    GOAL,
    TOOL_RULES,
    BRAND_VOICE,
    COMPLIANCE_RULES,
    RUN_CONTEXT_NOTICE,
];

pub const KB_SUMMARY: &str = "kb_summary";
pub const RUNTIME_CONTEXT: &str = "runtime_context";
pub const EXAMPLES: &str = "examples";

/// Output order of compaction buckets.
pub const COMPACTION_SECTIONS: [&str; 3] = [KB_SUMMARY, RUNTIME_CONTEXT, EXAMPLES];

/// Section name → maximum token count. Sections without an entry are
/// unbounded.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BudgetTable(BTreeMap<String, usize>);

impl BudgetTable {
    /// Defaults for system prompt sections.
    pub fn prompt_defaults() -> Self {
        Self::from_pairs(&[
            (PERSONA, 400),
            (GOAL, 80),
            (TOOL_RULES, 260),
            (BRAND_VOICE, 160),
            (COMPLIANCE_RULES, 180),
            (RUN_CONTEXT_NOTICE, 160),
        ])
    }

    /// Defaults for compaction buckets.
    pub fn compaction_defaults() -> Self {
        Self::from_pairs(&[(KB_SUMMARY, 1200), (RUNTIME_CONTEXT, 400), (EXAMPLES, 400)])
    }

    fn from_pairs(pairs: &[(&str, usize)]) -> Self {
        Self(pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect())
    }

    /// This table with `overrides` merged on top. Override keys are
    /// lowercased to match section names.
    pub fn merged(mut self, overrides: &BTreeMap<String, usize>) -> Self {
        for (section, budget) in overrides {
            self.0.insert(section.to_lowercase(), *budget);
        }
        self
    }

    pub fn set(&mut self, section: impl Into<String>, budget: usize) {
        self.0.insert(section.into(), budget);
    }

    pub fn get(&self, section: &str) -> Option<usize> {
        self.0.get(section).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, usize)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }
}
