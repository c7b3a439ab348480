//! `contentloom prompt`: Assemble an agent's system prompt.

use std::path::Path;

use contentloom_config::EngineConfig;
use contentloom_core::AgentDescriptor;
use contentloom_prompt::PromptConfig;
use contentloom_workflow::build_assembler;

pub async fn run(
    config: &EngineConfig,
    agent: &Path,
    context: Option<&Path>,
    version: Option<String>,
    report: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let raw = tokio::fs::read_to_string(agent)
        .await
        .map_err(|e| format!("Failed to read {}: {e}", agent.display()))?;
    let agent: AgentDescriptor = serde_json::from_str(&raw)
        .map_err(|e| format!("Invalid agent descriptor {}: {e}", agent.display()))?;
    let context = super::read_context(context).await?;

    let mut prompt_config = PromptConfig::default();
    if let Some(version) = version {
        prompt_config = prompt_config.with_version(version);
    }

    let assembled = build_assembler(config).build(&agent, &context, &prompt_config)?;
    if report {
        let out = serde_json::json!({
            "system_prompt": assembled.text,
            "report": assembled.report,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        println!("{}", assembled.text);
    }
    Ok(())
}
