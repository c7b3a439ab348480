//! `contentloom config`: Show the resolved configuration.

use std::path::Path;

use contentloom_config::EngineConfig;

pub fn run(config: &EngineConfig, explicit: Option<&Path>, path_only: bool) -> Result<(), Box<dyn std::error::Error>> {
    if path_only {
        let path = match explicit {
            Some(path) => path.to_path_buf(),
            None => EngineConfig::config_dir().join("config.toml"),
        };
        println!("{}", path.display());
        return Ok(());
    }

    let toml_str = toml::to_string_pretty(config)?;
    println!("{toml_str}");
    Ok(())
}

#[cfg(test)]
mod tests {
    #[test]
    fn config_path_is_valid() {
        let path = contentloom_config::EngineConfig::config_dir().join("config.toml");
        assert!(path.to_str().unwrap().contains(".contentloom"));
    }
}
