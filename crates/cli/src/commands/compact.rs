//! `contentloom compact`: Run the context compactor over a JSON context.

use std::path::Path;

use contentloom_config::EngineConfig;
use contentloom_workflow::build_compactor;

pub async fn run(config: &EngineConfig, context: &Path, summarize: bool) -> Result<(), Box<dyn std::error::Error>> {
    let context = super::read_context(Some(context)).await?;
    let mut compactor = build_compactor(config);
    if summarize {
        compactor = compactor.with_summarize(true);
    }

    let compacted = compactor.build(&context);
    println!("{}", serde_json::to_string_pretty(&compacted)?);
    Ok(())
}
