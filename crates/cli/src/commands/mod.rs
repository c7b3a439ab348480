pub mod compact;
pub mod config_cmd;
pub mod prompt;
pub mod workflow;

use std::path::Path;

use contentloom_config::EngineConfig;
use contentloom_core::ExecutionContext;

/// Load the explicit config file, or the default one.
pub fn load_config(path: Option<&Path>) -> Result<EngineConfig, Box<dyn std::error::Error>> {
    let config = match path {
        Some(path) => EngineConfig::load_with_env(path)?,
        None => EngineConfig::load()?,
    };
    Ok(config)
}

/// Read a JSON object into an execution context. No path means empty.
pub async fn read_context(path: Option<&Path>) -> Result<ExecutionContext, Box<dyn std::error::Error>> {
    let Some(path) = path else {
        return Ok(ExecutionContext::new());
    };
    let raw = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| format!("Failed to read {}: {e}", path.display()))?;
    let context: ExecutionContext = serde_json::from_str(&raw)
        .map_err(|e| format!("{} is not a JSON object: {e}", path.display()))?;
    Ok(context)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn context_file_is_parsed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ctx.json");
        std::fs::write(&path, r#"{"topic": "Rates", "edition_number": 4}"#).unwrap();

        let ctx = read_context(Some(&path)).await.unwrap();
        assert_eq!(ctx.get_str("topic"), Some("Rates"));
        assert_eq!(ctx.len(), 2);
    }

    #[tokio::test]
    async fn non_object_context_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ctx.json");
        std::fs::write(&path, "[1, 2]").unwrap();
        assert!(read_context(Some(&path)).await.is_err());
    }

    #[tokio::test]
    async fn missing_context_path_means_empty() {
        assert!(read_context(None).await.unwrap().is_empty());
    }

    #[test]
    fn explicit_missing_config_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(Some(&dir.path().join("absent.toml"))).unwrap();
        assert_eq!(config.prompt.version, "v1");
    }
}
