//! Configuration loading and validation for contentloom.
//!
//! Loads configuration from `~/.contentloom/config.toml` with environment
//! variable overrides. A missing file means defaults.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.contentloom/config.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub paths: PathsConfig,

    #[serde(default)]
    pub prompt: PromptSettings,

    #[serde(default)]
    pub compaction: CompactionSettings,
}

/// Where templates live on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Root of the versioned system-prompt section files
    /// (`<dir>/<version>/global.yaml`, ...).
    #[serde(default = "default_system_prompts_dir")]
    pub system_prompts_dir: PathBuf,

    /// Root of per-client overlays
    /// (`<dir>/<profile>/prompts/system/<version>/...`).
    #[serde(default = "default_profiles_dir")]
    pub profiles_dir: PathBuf,

    /// Workflow template files (`<dir>/<type>.json|yaml`).
    #[serde(default = "default_workflows_dir")]
    pub workflows_dir: PathBuf,

    /// Task prompt files (`<dir>/<prompt_id>.md`).
    #[serde(default = "default_prompts_dir")]
    pub prompts_dir: PathBuf,
}

fn default_system_prompts_dir() -> PathBuf {
    PathBuf::from("templates/system")
}
fn default_profiles_dir() -> PathBuf {
    PathBuf::from("profiles")
}
fn default_workflows_dir() -> PathBuf {
    PathBuf::from("templates/workflows")
}
fn default_prompts_dir() -> PathBuf {
    PathBuf::from("prompts")
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            system_prompts_dir: default_system_prompts_dir(),
            profiles_dir: default_profiles_dir(),
            workflows_dir: default_workflows_dir(),
            prompts_dir: default_prompts_dir(),
        }
    }
}

/// System prompt assembly settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptSettings {
    /// Template set version (`v1`, `v2`, ...).
    #[serde(default = "default_version")]
    pub version: String,

    /// Per-section token budgets merged over the built-in table.
    #[serde(default)]
    pub section_budgets: BTreeMap<String, usize>,
}

fn default_version() -> String {
    "v1".into()
}

impl Default for PromptSettings {
    fn default() -> Self {
        Self {
            version: default_version(),
            section_budgets: BTreeMap::new(),
        }
    }
}

/// Context compaction settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompactionSettings {
    /// Extended summarization mode: citations are not capped.
    #[serde(default)]
    pub summarize: bool,

    /// Bucket budgets (`kb_summary`, `runtime_context`, `examples`) merged
    /// over the built-in table.
    #[serde(default)]
    pub budgets: BTreeMap<String, usize>,
}

impl EngineConfig {
    /// Load configuration from the default path (~/.contentloom/config.toml),
    /// then apply environment overrides:
    /// - `CONTENTLOOM_TEMPLATES_DIR`
    /// - `CONTENTLOOM_PROFILES_DIR`
    /// - `CONTENTLOOM_WORKFLOWS_DIR`
    /// - `CONTENTLOOM_PROMPTS_DIR`
    /// - `CONTENTLOOM_PROMPT_VERSION`
    /// - `CONTENTLOOM_SUMMARIZE`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        Self::load_with_env(&config_path)
    }

    /// Load from `path`, then apply environment overrides.
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load_from(path)?;
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from a variable lookup (the process environment in
    /// production).
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup("CONTENTLOOM_TEMPLATES_DIR") {
            self.paths.system_prompts_dir = PathBuf::from(dir);
        }
        if let Some(dir) = lookup("CONTENTLOOM_PROFILES_DIR") {
            self.paths.profiles_dir = PathBuf::from(dir);
        }
        if let Some(dir) = lookup("CONTENTLOOM_WORKFLOWS_DIR") {
            self.paths.workflows_dir = PathBuf::from(dir);
        }
        if let Some(dir) = lookup("CONTENTLOOM_PROMPTS_DIR") {
            self.paths.prompts_dir = PathBuf::from(dir);
        }
        if let Some(version) = lookup("CONTENTLOOM_PROMPT_VERSION") {
            self.prompt.version = version;
        }
        if let Some(flag) = lookup("CONTENTLOOM_SUMMARIZE") {
            self.compaction.summarize = matches!(
                flag.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            );
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".contentloom")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let version = self.prompt.version.trim();
        if version.is_empty() {
            return Err(ConfigError::ValidationError(
                "prompt.version must not be empty".into(),
            ));
        }
        if version.contains(['/', '\\']) || version.contains("..") {
            return Err(ConfigError::ValidationError(format!(
                "prompt.version must be a plain directory name, got '{version}'"
            )));
        }

        for (name, dir) in [
            ("system_prompts_dir", &self.paths.system_prompts_dir),
            ("profiles_dir", &self.paths.profiles_dir),
            ("workflows_dir", &self.paths.workflows_dir),
            ("prompts_dir", &self.paths.prompts_dir),
        ] {
            if dir.as_os_str().is_empty() {
                return Err(ConfigError::ValidationError(format!(
                    "paths.{name} must not be empty"
                )));
            }
        }

        Ok(())
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn default_config_is_valid() {
        let config = EngineConfig::default();
        assert_eq!(config.prompt.version, "v1");
        assert_eq!(config.paths.prompts_dir, PathBuf::from("prompts"));
        assert!(!config.compaction.summarize);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn config_roundtrip_toml() {
        let mut config = EngineConfig::default();
        config.prompt.section_budgets.insert("persona".into(), 250);
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: EngineConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let config = EngineConfig::load_from(Path::new("/nonexistent/config.toml")).unwrap();
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[prompt]\nversion = \"v2\"\n\n[compaction]\nsummarize = true\n\n[compaction.budgets]\nkb_summary = 600\n",
        )
        .unwrap();

        let config = EngineConfig::load_from(&path).unwrap();
        assert_eq!(config.prompt.version, "v2");
        assert!(config.compaction.summarize);
        assert_eq!(config.compaction.budgets.get("kb_summary"), Some(&600));
        assert_eq!(config.paths, PathsConfig::default());
    }

    #[test]
    fn malformed_file_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[prompt\nversion = ").unwrap();
        let err = EngineConfig::load_from(&path).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }

    #[test]
    fn path_like_version_rejected() {
        let mut config = EngineConfig::default();
        config.prompt.version = "../v1".into();
        assert!(config.validate().is_err());
        config.prompt.version = "  ".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn overrides_replace_file_values() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("CONTENTLOOM_TEMPLATES_DIR", "/srv/system"),
            ("CONTENTLOOM_PROMPT_VERSION", "v3"),
            ("CONTENTLOOM_SUMMARIZE", "yes"),
        ]);
        let mut config = EngineConfig::default();
        config.apply_overrides(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(config.paths.system_prompts_dir, PathBuf::from("/srv/system"));
        assert_eq!(config.paths.profiles_dir, PathBuf::from("profiles"));
        assert_eq!(config.prompt.version, "v3");
        assert!(config.compaction.summarize);
    }

    #[test]
    fn default_toml_generation() {
        let toml_str = EngineConfig::default_toml();
        assert!(toml_str.contains("templates/system"));
        assert!(toml_str.contains("v1"));
    }
}
