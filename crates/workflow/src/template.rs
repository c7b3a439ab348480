//! Workflow template loading and the process-wide template cache.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use contentloom_core::{Error, Result, WorkflowTemplate};
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, info};

const EXTENSIONS: [&str; 3] = ["json", "yaml", "yml"];

/// Parse a template file. The format follows the extension: `.json`, or
/// `.yaml`/`.yml`.
pub fn load_template_file(path: &Path) -> Result<WorkflowTemplate> {
    let content = std::fs::read_to_string(path).map_err(|e| parse_error(path, e.to_string()))?;
    parse_template(path, &content)
}

fn parse_template(path: &Path, content: &str) -> Result<WorkflowTemplate> {
    let template: WorkflowTemplate = match path.extension().and_then(|e| e.to_str()) {
        Some("yaml" | "yml") => {
            serde_yaml::from_str(content).map_err(|e| parse_error(path, e.to_string()))?
        }
        _ => serde_json::from_str(content).map_err(|e| parse_error(path, e.to_string()))?,
    };
    template.check()?;
    Ok(template)
}

fn parse_error(path: &Path, reason: String) -> Error {
    Error::TemplateParse {
        path: path.display().to_string(),
        reason,
    }
}

/// Load-once cache of workflow templates, keyed by workflow type.
///
/// The first request for a type reads the file; concurrent first requests
/// wait on the same load instead of racing. Cached templates are shared
/// read-only.
#[derive(Debug)]
pub struct TemplateStore {
    dir: PathBuf,
    cache: Mutex<HashMap<String, Arc<OnceCell<Arc<WorkflowTemplate>>>>>,
}

impl TemplateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Register a template without touching disk.
    pub async fn insert(&self, workflow_type: impl Into<String>, template: WorkflowTemplate) -> Result<()> {
        template.check()?;
        let cell = OnceCell::new_with(Some(Arc::new(template)));
        self.cache
            .lock()
            .await
            .insert(workflow_type.into(), Arc::new(cell));
        Ok(())
    }

    /// The template for `workflow_type`, loading it on first use.
    pub async fn get(&self, workflow_type: &str) -> Result<Arc<WorkflowTemplate>> {
        let cell = {
            let mut cache = self.cache.lock().await;
            cache.entry(workflow_type.to_string()).or_default().clone()
        };
        cell.get_or_try_init(|| self.load(workflow_type))
            .await
            .cloned()
    }

    /// Drop one cached template so the next `get` rereads it.
    pub async fn invalidate(&self, workflow_type: &str) {
        self.cache.lock().await.remove(workflow_type);
    }

    pub async fn clear(&self) {
        self.cache.lock().await.clear();
    }

    /// Workflow types present on disk, sorted.
    pub fn available(&self) -> Vec<String> {
        let Ok(entries) = std::fs::read_dir(&self.dir) else {
            return Vec::new();
        };
        let mut types: Vec<String> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| {
                p.extension()
                    .and_then(|e| e.to_str())
                    .is_some_and(|e| EXTENSIONS.contains(&e))
            })
            .filter_map(|p| p.file_stem().and_then(|s| s.to_str()).map(str::to_string))
            .collect();
        types.sort();
        types.dedup();
        types
    }

    async fn load(&self, workflow_type: &str) -> Result<Arc<WorkflowTemplate>> {
        if workflow_type.is_empty()
            || workflow_type.contains(['/', '\\'])
            || workflow_type.contains("..")
        {
            return Err(Error::WorkflowNotFound(workflow_type.to_string()));
        }

        for ext in EXTENSIONS {
            let path = self.dir.join(format!("{workflow_type}.{ext}"));
            if !path.is_file() {
                continue;
            }
            debug!(path = %path.display(), "Reading workflow template");
            let content = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| parse_error(&path, e.to_string()))?;
            let template = parse_template(&path, &content)?;
            info!(
                workflow_type,
                name = %template.name,
                tasks = template.tasks.len(),
                "Workflow template loaded"
            );
            return Ok(Arc::new(template));
        }

        Err(Error::WorkflowNotFound(workflow_type.to_string()))
    }
}
