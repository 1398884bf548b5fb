use std::path::Path;

use tabled::Tabled;

use crate::core::commands::{ChangeArgs, assemble_change, context};
use crate::core::display::{render_table, truncate_string};
use crate::core::loader::CancelFlag;
use crate::core::types::{FileCodeOwnerStatus, OutputFormat, PathCodeOwnerStatus};
use crate::utils::error::Result;

#[derive(Tabled)]
struct StatusRow {
    #[tabled(rename = "Path")]
    path: String,
    #[tabled(rename = "Change")]
    kind: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Reasons")]
    reasons: String,
}

fn rows_for(status: &FileCodeOwnerStatus) -> Vec<StatusRow> {
    let path_row = |path_status: &PathCodeOwnerStatus| StatusRow {
        path: path_status.path.clone(),
        kind: status.changed_file.kind.to_string(),
        status: path_status.status.to_string(),
        reasons: truncate_string(&path_status.reasons.join("; "), 60),
    };

    status
        .new_path_status
        .iter()
        .chain(status.old_path_status.iter())
        .map(path_row)
        .collect()
}

/// List per-file code-owner statuses for a change
pub(crate) fn run(
    repo: &Path, project: Option<&str>, args: &ChangeArgs<'_>, all_owners: bool,
    format: &OutputFormat,
) -> Result<()> {
    let ctx = context(repo, project)?;
    let change = assemble_change(&ctx, args)?;

    let statuses = ctx
        .engine
        .file_statuses_with(&change, all_owners, CancelFlag::new())?;

    match format {
        OutputFormat::Text => {
            let rows: Vec<StatusRow> = statuses.iter().flat_map(rows_for).collect();
            println!("{}", render_table(rows));
            println!("{} changed files", statuses.len());
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&statuses)?);
        }
    }

    Ok(())
}
