use std::path::Path;

use crate::core::commands::{ChangeArgs, account_for_email, assemble_change, context};
use crate::core::types::OutputFormat;
use crate::utils::error::Result;

/// List the changed paths owned by an account
pub(crate) fn run(
    repo: &Path, project: Option<&str>, args: &ChangeArgs<'_>, email: &str, start: usize,
    limit: usize, format: &OutputFormat,
) -> Result<()> {
    let ctx = context(repo, project)?;
    let change = assemble_change(&ctx, args)?;
    let account = account_for_email(&ctx.accounts, email)?;

    let paths = ctx.engine.owned_paths(&change, account, start, limit)?;

    match format {
        OutputFormat::Text => {
            for path in &paths {
                println!("{}", path);
            }
            println!("{} paths owned by {}", paths.len(), email);
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&paths)?);
        }
    }

    Ok(())
}
