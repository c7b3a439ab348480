//! Task prompt resolution.
//!
//! A task's prompt text comes from `<prompts_dir>/<prompt_id>.md` when the
//! task names a prompt id, otherwise from its inline `description_template`.
//! A missing prompt file degrades to the inline template with a warning.

use std::path::{Component, Path, PathBuf};

use contentloom_core::TaskTemplate;
use tracing::{debug, error, warn};

#[derive(Debug, Clone)]
pub struct PromptStore {
    dir: PathBuf,
}

impl PromptStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Unrendered prompt text for a task.
    pub async fn resolve(&self, task: &TaskTemplate) -> String {
        let inline = task
            .description_template
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty());

        if let Some(prompt_id) = task.prompt_id.as_deref().filter(|p| !p.trim().is_empty()) {
            match self.read(prompt_id).await {
                Some(text) => {
                    debug!(task_id = %task.id, prompt_id, "Loaded prompt file");
                    return text;
                }
                None => warn!(
                    task_id = %task.id,
                    prompt_id,
                    "Prompt file not found, falling back to inline template"
                ),
            }
        }

        match inline {
            Some(text) => text.to_string(),
            None => {
                error!(task_id = %task.id, "Task has neither a prompt file nor an inline template");
                String::new()
            }
        }
    }

    async fn read(&self, prompt_id: &str) -> Option<String> {
        let relative = Path::new(prompt_id);
        if !relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)))
        {
            warn!(prompt_id, "Prompt id is not a relative path inside the prompts directory");
            return None;
        }

        let path = self.dir.join(format!("{prompt_id}.md"));
        match tokio::fs::read_to_string(&path).await {
            Ok(text) => Some(text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to read prompt file");
                None
            }
        }
    }
}
