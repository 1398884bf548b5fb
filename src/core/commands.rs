//! # CLI Command Handlers
//!
//! One handler per subcommand, plus the shared plumbing that turns CLI
//! arguments into an [`Engine`] wired against the local Git repository and
//! the accounts fixture, and into a [`ChangeSnapshot`] for the commands that
//! evaluate one.

pub mod check;
pub mod owned;
pub mod resolve;
pub mod statuses;
pub mod validate;

use std::path::Path;
use std::sync::Arc;

use super::backend::BackendRegistry;
use super::engine::{Engine, Services};
use super::git::GitRepositoryProvider;
use super::paths;
use super::providers::{AccountProvider, RepositoryProvider, StaticAccounts, StaticHierarchy};
use super::types::{AccountId, ChangeSnapshot, Vote};
use crate::utils::app_config::AppConfig;
use crate::utils::error::{Error, Result};

/// Show the configuration file
pub fn config() -> Result<()> {
    let config = AppConfig::fetch()?;
    println!("{:#?}", config);

    Ok(())
}

/// Engine plus the concrete providers the commands need direct access to.
pub(crate) struct CliContext {
    pub engine: Engine,
    pub repos: Arc<GitRepositoryProvider>,
    pub accounts: Arc<StaticAccounts>,
    pub project: String,
}

/// Build the context for a local repository. The project name defaults from
/// the application config, the accounts come from the configured JSON
/// fixture (an empty store otherwise).
pub(crate) fn context(repo: &Path, project: Option<&str>) -> Result<CliContext> {
    let config = AppConfig::fetch()?;
    let project = project.unwrap_or(&config.project).to_string();

    let mut repos = GitRepositoryProvider::new();
    repos.add_project(&project, repo);
    let repos = Arc::new(repos);

    let accounts = match &config.accounts_file {
        Some(file) => StaticAccounts::from_json(&std::fs::read(file)?)?,
        None => StaticAccounts::new(),
    };
    let accounts = Arc::new(accounts);

    let engine = Engine::new(Services {
        repos: repos.clone(),
        accounts: accounts.clone(),
        projects: Arc::new(StaticHierarchy::new()),
        backends: BackendRegistry::standard(),
    });

    Ok(CliContext {
        engine,
        repos,
        accounts,
        project,
    })
}

/// Resolve a CLI-supplied email to exactly one account.
pub(crate) fn account_for_email(accounts: &StaticAccounts, email: &str) -> Result<AccountId> {
    let matches = accounts.lookup_by_email(email)?;
    match matches.len() {
        0 => Err(Error::account(&format!(
            "no account found for '{}' (is the accounts file configured?)",
            email
        ))),
        1 => Ok(*matches.iter().next().unwrap()),
        _ => Err(Error::account(&format!("email '{}' is ambiguous", email))),
    }
}

/// Review-side arguments shared by the change-evaluating commands.
pub(crate) struct ChangeArgs<'a> {
    pub branch: &'a str,
    pub revision: Option<&'a str>,
    pub owner: Option<&'a str>,
    pub uploader: Option<&'a str>,
    pub reviewers: &'a [String],
    pub approvers: &'a [String],
    pub overriders: &'a [String],
}

/// Assemble a change snapshot from CLI arguments. Approver votes carry the
/// policy's required label, override votes its first override label.
pub(crate) fn assemble_change(ctx: &CliContext, args: &ChangeArgs<'_>) -> Result<ChangeSnapshot> {
    let branch = paths::full_ref(args.branch);
    let revision = match args.revision {
        Some(revision) => revision.to_string(),
        None => ctx
            .repos
            .resolve_ref(&ctx.project, &branch)?
            .ok_or_else(|| Error::repository(&format!("branch {} not found", branch)))?,
    };
    let policy = ctx.engine.policy_snapshot(&ctx.project, &branch)?;

    let owner = match args.owner {
        Some(email) => account_for_email(&ctx.accounts, email)?,
        // Without an explicit owner the change belongs to nobody the
        // accounts store knows, which disables owner-coupled shortcuts.
        None => AccountId(0),
    };
    let uploader = match args.uploader {
        Some(email) => account_for_email(&ctx.accounts, email)?,
        None => owner,
    };

    let mut change = ChangeSnapshot::new(&ctx.project, &branch, &revision, owner);
    change.uploader = uploader;

    for email in args.reviewers {
        change
            .reviewers
            .insert(account_for_email(&ctx.accounts, email)?);
    }

    for email in args.approvers {
        let account = account_for_email(&ctx.accounts, email)?;
        change.reviewers.insert(account);
        change.votes.push(Vote::new(
            account,
            &policy.required_approval.label,
            policy.required_approval.value,
        ));
    }

    for email in args.overriders {
        let account = account_for_email(&ctx.accounts, email)?;
        let approval = policy.override_approvals.first().ok_or_else(|| {
            Error::policy_invalid(&ctx.project, "no override label is configured")
        })?;
        change
            .votes
            .push(Vote::new(account, &approval.label, approval.value));
    }

    Ok(change)
}
