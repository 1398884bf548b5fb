use std::path::Path;

use crate::core::commands::context;
use crate::core::engine::ValidationSeverity;
use crate::core::types::OutputFormat;
use crate::utils::error::Result;

/// Validate an OWNERS file against the branch policy
pub(crate) fn run(
    repo: &Path, project: Option<&str>, branch: &str, file: &Path, target_path: &str,
    format: &OutputFormat,
) -> Result<()> {
    let ctx = context(repo, project)?;
    let bytes = std::fs::read(file)?;

    let messages = ctx
        .engine
        .validate_config_file(&ctx.project, branch, target_path, &bytes)?;

    match format {
        OutputFormat::Text => {
            if messages.is_empty() {
                println!("{}: OK", target_path);
            }
            for message in &messages {
                match message.severity {
                    ValidationSeverity::Error => println!("error: {}", message.message),
                    ValidationSeverity::Warning => println!("warning: {}", message.message),
                }
            }
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&messages)?);
        }
    }

    if messages
        .iter()
        .any(|message| message.severity == ValidationSeverity::Error)
    {
        std::process::exit(1);
    }
    Ok(())
}
