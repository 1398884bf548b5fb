use std::path::Path;

use crate::core::commands::{ChangeArgs, assemble_change, context};
use crate::core::types::OutputFormat;
use crate::utils::error::Result;

/// Run the submit rule for a change assembled from the CLI arguments
pub(crate) fn run(
    repo: &Path, project: Option<&str>, args: &ChangeArgs<'_>, format: &OutputFormat,
) -> Result<()> {
    let ctx = context(repo, project)?;
    let change = assemble_change(&ctx, args)?;

    let record = ctx.engine.submit_record(&change)?;

    match format {
        OutputFormat::Text => match &record {
            None => println!("code owners are disabled for branch {}", change.branch),
            Some(record) => {
                println!("status: {:?}", record.status);
                if let Some(message) = &record.error_message {
                    println!("error: {}", message);
                }
                for requirement in &record.requirements {
                    println!(
                        "requirement [{}]: {}",
                        requirement.requirement_type, requirement.fallback_text
                    );
                }
            }
        },
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
    }

    if record.map(|r| r.is_ok()).unwrap_or(true) {
        Ok(())
    } else {
        std::process::exit(1);
    }
}
