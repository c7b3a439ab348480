//! Prompt-side building blocks of contentloom.
//!
//! - [`token`]: whitespace token counting and budget-respecting truncation
//! - [`compactor`]: folds free-form context into `kb_summary`,
//!   `runtime_context` and `examples`
//! - [`layers`]: loads section contributions from versioned template files
//!   and from the agent/runtime programmatic builders
//! - [`assembler`]: merges layers into the final system message plus a
//!   budget report

pub mod assembler;
pub mod budget;
pub mod compactor;
pub mod layers;
pub mod render;
pub mod token;

pub use assembler::{AssembledPrompt, BudgetReport, PromptAssembler, PromptConfig, SectionReport};
pub use budget::BudgetTable;
pub use compactor::{CompactedContext, CompactionNotes, ContextCompactor, PipelineSection};
pub use layers::{Layer, LayerResolver, SectionContribution, runtime_layer};
pub use render::{ExpressionRenderer, LiteralRenderer, RenderError, TemplateRenderer};
pub use token::{count_tokens, truncate};
