//! # Command-Line Interface Module
//!
//! Defines the CLI with `clap` and dispatches to the handlers in
//! `core::commands`. The `owners` group holds the engine-facing commands
//! (check, statuses, owned, resolve, validate); `completion` and `config`
//! mirror the usual tooling commands.

use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{
    generate,
    shells::{Bash, Fish, Zsh},
};

use crate::core::commands::{self, ChangeArgs};
use crate::core::types::OutputFormat;
use crate::utils::app_config::AppConfig;
use crate::utils::error::Result;
use crate::utils::types::LogLevel;

#[derive(Parser, Debug)]
#[command(
    name = "ownergate",
    author,
    about,
    long_about = "Code-owner approval gate for Git-based code review",
    version
)]
pub struct Cli {
    /// Specifies a custom configuration file path.
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enables or disables debug mode.
    #[arg(name = "debug", short, long = "debug", value_name = "DEBUG")]
    pub debug: Option<bool>,

    /// Sets the logging level for the application.
    #[arg(
        name = "log_level",
        short,
        long = "log-level",
        value_name = "LOG_LEVEL",
        value_enum
    )]
    pub log_level: Option<LogLevel>,

    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Evaluate and inspect code-owner approvals for a repository.
    #[clap(
        name = "owners",
        about = "Evaluate and inspect code-owner approvals",
        long_about = "Run the code-owner submit rule and query per-file approval state"
    )]
    Owners {
        #[clap(subcommand)]
        subcommand: OwnersSubcommand,
    },
    /// Generate shell completion scripts.
    #[clap(name = "completion", about = "Generate completion scripts", long_about = None)]
    Completion {
        #[clap(subcommand)]
        subcommand: CompletionSubcommand,
    },
    /// Display the current application configuration.
    #[clap(name = "config", about = "Show Configuration", long_about = None)]
    Config,
}

#[derive(Subcommand, PartialEq, Debug)]
enum CompletionSubcommand {
    #[clap(about = "generate the autocompletion script for bash")]
    Bash,
    #[clap(about = "generate the autocompletion script for zsh")]
    Zsh,
    #[clap(about = "generate the autocompletion script for fish")]
    Fish,
}

/// Review-side options shared by the change-evaluating subcommands.
#[derive(clap::Args, PartialEq, Debug)]
struct ChangeOpts {
    /// Destination branch of the change.
    #[arg(long, default_value = "main")]
    branch: String,

    /// Revision under evaluation; defaults to the branch tip.
    #[arg(long, value_name = "COMMIT")]
    revision: Option<String>,

    /// Email of the change owner.
    #[arg(long, value_name = "EMAIL")]
    owner: Option<String>,

    /// Email of the patch-set uploader; defaults to the change owner.
    #[arg(long, value_name = "EMAIL")]
    uploader: Option<String>,

    /// Reviewer email; may be given multiple times.
    #[arg(long = "reviewer", value_name = "EMAIL")]
    reviewers: Vec<String>,

    /// Email whose vote meets the required approval; may be given multiple
    /// times.
    #[arg(long = "approver", value_name = "EMAIL")]
    approvers: Vec<String>,

    /// Email voting on an override label; may be given multiple times.
    #[arg(long = "override", value_name = "EMAIL")]
    overriders: Vec<String>,
}

impl ChangeOpts {
    fn as_args(&self) -> ChangeArgs<'_> {
        ChangeArgs {
            branch: &self.branch,
            revision: self.revision.as_deref(),
            owner: self.owner.as_deref(),
            uploader: self.uploader.as_deref(),
            reviewers: &self.reviewers,
            approvers: &self.approvers,
            overriders: &self.overriders,
        }
    }
}

#[derive(Subcommand, PartialEq, Debug)]
enum OwnersSubcommand {
    /// Run the submit rule: is every changed path approved by a code owner?
    #[clap(name = "check", about = "Run the code-owner submit rule for a change")]
    Check {
        /// The repository to evaluate. Defaults to the current directory.
        #[arg(default_value = ".")]
        path: PathBuf,

        /// Project name; defaults to the configured project.
        #[arg(long)]
        project: Option<String>,

        #[clap(flatten)]
        change: ChangeOpts,

        /// The output format: `text` or `json`.
        #[arg(long, value_name = "FORMAT", default_value = "text", value_parser = parse_output_format)]
        format: OutputFormat,
    },

    /// Show the per-file code-owner status of a change.
    #[clap(name = "statuses", about = "List per-file code-owner statuses")]
    Statuses {
        /// The repository to evaluate. Defaults to the current directory.
        #[arg(default_value = ".")]
        path: PathBuf,

        /// Project name; defaults to the configured project.
        #[arg(long)]
        project: Option<String>,

        #[clap(flatten)]
        change: ChangeOpts,

        /// Collect every contributing owner instead of stopping at the first
        /// approval evidence.
        #[arg(long)]
        all_owners: bool,

        /// The output format: `text` or `json`.
        #[arg(long, value_name = "FORMAT", default_value = "text", value_parser = parse_output_format)]
        format: OutputFormat,
    },

    /// List the changed paths a given account owns.
    #[clap(name = "owned", about = "List changed paths owned by an account")]
    Owned {
        /// The repository to evaluate. Defaults to the current directory.
        #[arg(default_value = ".")]
        path: PathBuf,

        /// Project name; defaults to the configured project.
        #[arg(long)]
        project: Option<String>,

        #[clap(flatten)]
        change: ChangeOpts,

        /// Email of the account to check ownership for.
        #[arg(long, value_name = "EMAIL")]
        account: String,

        /// Number of leading paths to skip.
        #[arg(long, default_value_t = 0)]
        start: usize,

        /// Maximum number of paths to return.
        #[arg(long, default_value_t = 100)]
        limit: usize,

        /// The output format: `text` or `json`.
        #[arg(long, value_name = "FORMAT", default_value = "text", value_parser = parse_output_format)]
        format: OutputFormat,
    },

    /// Resolve an owner reference (an email or `*`) to accounts.
    #[clap(name = "resolve", about = "Resolve an owner reference to accounts")]
    Resolve {
        /// The owner reference to resolve.
        reference: String,

        /// The repository to evaluate. Defaults to the current directory.
        #[arg(long, default_value = ".")]
        path: PathBuf,

        /// Project name; defaults to the configured project.
        #[arg(long)]
        project: Option<String>,

        /// Branch whose policy applies.
        #[arg(long, default_value = "main")]
        branch: String,

        /// Enforce account visibility for the resolving user.
        #[arg(long)]
        enforce_visibility: bool,

        /// Resolve as this user (email) instead of anonymously.
        #[arg(long, value_name = "EMAIL")]
        as_user: Option<String>,

        /// The output format: `text` or `json`.
        #[arg(long, value_name = "FORMAT", default_value = "text", value_parser = parse_output_format)]
        format: OutputFormat,
    },

    /// Validate an OWNERS file before it lands.
    #[clap(name = "validate", about = "Validate an OWNERS file against the branch policy")]
    Validate {
        /// Local file holding the OWNERS content to validate.
        file: PathBuf,

        /// The repository to evaluate. Defaults to the current directory.
        #[arg(long, default_value = ".")]
        path: PathBuf,

        /// Project name; defaults to the configured project.
        #[arg(long)]
        project: Option<String>,

        /// Branch whose policy applies.
        #[arg(long, default_value = "main")]
        branch: String,

        /// Repository path the file is destined for.
        #[arg(long, default_value = "/OWNERS", value_name = "PATH")]
        target_path: String,

        /// The output format: `text` or `json`.
        #[arg(long, value_name = "FORMAT", default_value = "text", value_parser = parse_output_format)]
        format: OutputFormat,
    },
}

/// Parses command-line arguments, merges configuration, and executes the
/// matched command.
pub fn cli_match() -> Result<()> {
    // Parse the command line arguments
    let cli = Cli::parse();

    // Merge clap config file if the value is set
    AppConfig::merge_config(cli.config.as_deref())?;

    let app = Cli::command();
    let matches = app.get_matches();

    AppConfig::merge_args(matches)?;

    // Execute the subcommand
    match &cli.command {
        Commands::Owners { subcommand } => owners(subcommand)?,
        Commands::Completion { subcommand } => {
            let mut app = Cli::command();
            match subcommand {
                CompletionSubcommand::Bash => {
                    generate(Bash, &mut app, "ownergate", &mut std::io::stdout());
                }
                CompletionSubcommand::Zsh => {
                    generate(Zsh, &mut app, "ownergate", &mut std::io::stdout());
                }
                CompletionSubcommand::Fish => {
                    generate(Fish, &mut app, "ownergate", &mut std::io::stdout());
                }
            }
        }
        Commands::Config => commands::config()?,
    }

    Ok(())
}

/// Dispatch of the `owners` subcommands to their handlers.
fn owners(subcommand: &OwnersSubcommand) -> Result<()> {
    match subcommand {
        OwnersSubcommand::Check {
            path,
            project,
            change,
            format,
        } => commands::check::run(path, project.as_deref(), &change.as_args(), format),
        OwnersSubcommand::Statuses {
            path,
            project,
            change,
            all_owners,
            format,
        } => commands::statuses::run(
            path,
            project.as_deref(),
            &change.as_args(),
            *all_owners,
            format,
        ),
        OwnersSubcommand::Owned {
            path,
            project,
            change,
            account,
            start,
            limit,
            format,
        } => commands::owned::run(
            path,
            project.as_deref(),
            &change.as_args(),
            account,
            *start,
            *limit,
            format,
        ),
        OwnersSubcommand::Resolve {
            reference,
            path,
            project,
            branch,
            enforce_visibility,
            as_user,
            format,
        } => commands::resolve::run(
            path,
            project.as_deref(),
            branch,
            reference,
            *enforce_visibility,
            as_user.as_deref(),
            format,
        ),
        OwnersSubcommand::Validate {
            file,
            path,
            project,
            branch,
            target_path,
            format,
        } => commands::validate::run(
            path,
            project.as_deref(),
            branch,
            file,
            target_path,
            format,
        ),
    }
}

/// Parses a string slice into an `OutputFormat` enum.
fn parse_output_format(s: &str) -> std::result::Result<OutputFormat, String> {
    match s.to_lowercase().as_str() {
        "text" => Ok(OutputFormat::Text),
        "json" => Ok(OutputFormat::Json),
        _ => Err(format!("Invalid output format: {}", s)),
    }
}
