use std::path::Path;

use crate::core::commands::{account_for_email, context};
use crate::core::types::{CodeOwnerReference, OutputFormat};
use crate::utils::error::Result;

/// Resolve an owner reference (email or `*`) under the branch policy
pub(crate) fn run(
    repo: &Path, project: Option<&str>, branch: &str, reference: &str,
    enforce_visibility: bool, as_user: Option<&str>, format: &OutputFormat,
) -> Result<()> {
    let ctx = context(repo, project)?;

    let viewer = as_user
        .map(|email| account_for_email(&ctx.accounts, email))
        .transpose()?;
    let reference = CodeOwnerReference::parse(reference);

    let resolved = ctx.engine.resolve_owner_reference(
        &ctx.project,
        branch,
        &reference,
        enforce_visibility,
        viewer,
    )?;

    match format {
        OutputFormat::Text => {
            if resolved.owned_by_all_users {
                println!("owned by all users");
            }
            for account in &resolved.owners {
                println!("account {}", account);
            }
            for message in &resolved.messages {
                println!("warning: {}", message);
            }
            if resolved.owners.is_empty() && !resolved.owned_by_all_users {
                println!("unresolved");
            }
        }
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "owners": resolved.owners,
                    "ownedByAllUsers": resolved.owned_by_all_users,
                    "hasUnresolved": resolved.has_unresolved,
                    "messages": resolved.messages,
                })
            );
        }
    }

    Ok(())
}
