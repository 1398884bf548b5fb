//! # Approval-Status Engine
//!
//! Combines owner sets, reviewers, approvers, implicit approvals, overrides
//! and fallback rules into a per-path status, and aggregates those into a
//! submit decision. For each changed path the owner set is collected by
//! walking the config hierarchy from the leaf folder upward (stopping at
//! configs that ignore their parents), seeded with the policy's global
//! owners and patched up by the fallback rule when no owner is defined.

use std::cell::OnceCell;
use std::collections::BTreeSet;

use super::hierarchy::{self, HierarchyWalker, VisitResult};
use super::identity::{OwnerResolver, ResolvedOwners};
use super::loader::ConfigLoader;
use super::policy::{FallbackCodeOwners, ImplicitApprovalPolicy, PolicySnapshot};
use super::providers::{AccountProvider, RepositoryProvider};
use super::types::{
    AccountId, ChangeSnapshot, ChangedFile, FileCodeOwnerStatus, OwnerStatus,
    PathCodeOwnerStatus, Vote,
};
use crate::utils::error::Result;

/// The review-side inputs of the status computation, derived once per
/// request from the change snapshot and the policy.
#[derive(Debug, Clone)]
pub struct CheckInput {
    pub reviewers: BTreeSet<AccountId>,
    pub approvers: BTreeSet<AccountId>,
    /// Approvers from previous patch sets; empty unless sticky approvals are
    /// enabled.
    pub sticky_approvers: BTreeSet<AccountId>,
    pub implicit_approver: Option<AccountId>,
    /// Valid override votes on the current patch set.
    pub overrides: Vec<Vote>,
    /// Resolved project-wide owners.
    pub global_owners: ResolvedOwners,
    pub fallback: FallbackCodeOwners,
    /// Collect contributing owners for reporting and never short-circuit.
    pub check_all_owners: bool,
    /// The uploader bypasses the ownership check entirely.
    pub exempted_uploader: bool,
}

impl CheckInput {
    /// Derive the inputs from a change snapshot under a policy. The uploader
    /// is filtered from approvers, reviewers, sticky approvers and override
    /// sources iff the required label forbids self-approval.
    pub fn from_change(
        policy: &PolicySnapshot, change: &ChangeSnapshot, accounts: &dyn AccountProvider,
        owner_resolver: &OwnerResolver<'_>,
    ) -> Result<Self> {
        let ignore_self = policy.ignore_self_approval;
        let uploader = change.uploader;

        let mut approvers: BTreeSet<AccountId> = change
            .votes
            .iter()
            .filter(|vote| policy.required_approval.is_met_by(vote))
            .map(|vote| vote.account)
            .collect();
        let mut reviewers = change.reviewers.clone();
        if ignore_self {
            approvers.remove(&uploader);
            reviewers.remove(&uploader);
        }

        let mut sticky_approvers = BTreeSet::new();
        if policy.sticky_approvals {
            for previous in change.previous_approvals.values() {
                sticky_approvers.extend(previous.iter().copied());
            }
            if ignore_self {
                sticky_approvers.remove(&uploader);
            }
        }

        let implicit_approver = match policy.implicit_approvals {
            ImplicitApprovalPolicy::Disabled => None,
            _ if ignore_self => None,
            ImplicitApprovalPolicy::Enabled if change.change_owner == uploader => {
                Some(change.change_owner)
            }
            ImplicitApprovalPolicy::Enabled => None,
            ImplicitApprovalPolicy::Forced => Some(change.change_owner),
        };

        let overrides = policy
            .override_votes(&change.votes)
            .into_iter()
            .filter(|vote| !(ignore_self && vote.account == uploader))
            .cloned()
            .collect();

        let exempted_uploader = match accounts.get(uploader)? {
            Some(account) => policy
                .exempted_users
                .iter()
                .any(|email| account.has_email(email)),
            None => false,
        };

        let global_owners =
            owner_resolver.resolve_all(policy.global_code_owners.iter())?;

        Ok(Self {
            reviewers,
            approvers,
            sticky_approvers,
            implicit_approver,
            overrides,
            global_owners,
            fallback: policy.fallback_code_owners,
            check_all_owners: false,
            exempted_uploader,
        })
    }
}

/// Computes per-path and per-file statuses for one change.
pub struct StatusEngine<'a> {
    change: &'a ChangeSnapshot,
    input: CheckInput,
    loader: &'a ConfigLoader<'a>,
    walker: HierarchyWalker<'a>,
    repos: &'a dyn RepositoryProvider,
    accounts: &'a dyn AccountProvider,
    owner_resolver: OwnerResolver<'a>,
    branch_has_configs: OnceCell<bool>,
}

impl<'a> StatusEngine<'a> {
    pub fn new(
        policy: &'a PolicySnapshot, change: &'a ChangeSnapshot, input: CheckInput,
        loader: &'a ConfigLoader<'a>, repos: &'a dyn RepositoryProvider,
        accounts: &'a dyn AccountProvider, owner_resolver: OwnerResolver<'a>,
    ) -> Self {
        let backend = loader.backend();
        let walker = HierarchyWalker::new(
            loader,
            policy.matcher(backend),
            backend.default_file_name(),
        );

        Self {
            change,
            input,
            loader,
            walker,
            repos,
            accounts,
            owner_resolver,
            branch_has_configs: OnceCell::new(),
        }
    }

    /// Statuses for all changed files: the new path when present, the old
    /// path when the file was deleted or renamed.
    pub fn file_statuses(
        &self, files: &[ChangedFile],
    ) -> Result<Vec<FileCodeOwnerStatus>> {
        files
            .iter()
            .map(|file| {
                self.loader.cancel_flag().check()?;

                let new_path_status = file
                    .new_path
                    .as_deref()
                    .map(|path| self.path_status(path))
                    .transpose()?;
                let old_path_status = if file.old_path_needs_approval() {
                    file.old_path
                        .as_deref()
                        .map(|path| self.path_status(path))
                        .transpose()?
                } else {
                    None
                };

                Ok(FileCodeOwnerStatus {
                    changed_file: file.clone(),
                    new_path_status,
                    old_path_status,
                })
            })
            .collect()
    }

    /// The paths of the given files that are owned by an account.
    pub fn owned_paths(
        &self, files: &[ChangedFile], account: AccountId,
    ) -> Result<Vec<String>> {
        let mut paths = BTreeSet::new();
        for file in files {
            for path in file.new_path.iter().chain(file.old_path.iter()) {
                self.loader.cancel_flag().check()?;
                let owners = self.owners_for_path(path)?;
                if owners.owned_by_all_users || owners.owners.contains(&account) {
                    paths.insert(path.clone());
                }
            }
        }
        Ok(paths.into_iter().collect())
    }

    /// Status of one absolute path.
    pub fn path_status(&self, path: &str) -> Result<PathCodeOwnerStatus> {
        // Overrides and exemptions dominate; the owner set is only computed
        // for them when the caller asked for owners to be reported.
        if self.input.exempted_uploader {
            let mut status = PathCodeOwnerStatus::new(path, OwnerStatus::Approved);
            status
                .reasons
                .push("patch set uploader is exempted from owner approval".to_string());
            if self.input.check_all_owners {
                status.owners = Some(self.owners_for_path(path)?.owners);
            }
            return Ok(status);
        }

        if !self.input.overrides.is_empty() {
            let mut status = PathCodeOwnerStatus::new(path, OwnerStatus::Approved);
            for vote in &self.input.overrides {
                status.reasons.push(format!(
                    "override by account {} with {}+{}",
                    vote.account, vote.label, vote.value
                ));
            }
            if self.input.check_all_owners {
                status.owners = Some(self.owners_for_path(path)?.owners);
            }
            return Ok(status);
        }

        let owners = self.owners_for_path(path)?;
        let mut status = self.classify(path, &owners);
        if self.input.check_all_owners {
            status.owners = Some(owners.owners.clone());
        }
        for message in &owners.messages {
            status.reasons.push(message.clone());
        }
        Ok(status)
    }

    /// Collect the owner set of a path: global owners plus everything the
    /// hierarchy walk contributes, with fallback owners when the set stays
    /// empty. On branches without any owner config the project owners act as
    /// code owners (bootstrapping).
    pub fn owners_for_path(&self, path: &str) -> Result<ResolvedOwners> {
        let mut owners = self.input.global_owners.clone();

        if !self.branch_has_configs()? {
            owners
                .owners
                .extend(self.accounts.project_owners(&self.change.project)?);
            return Ok(owners);
        }

        let resolver = &self.owner_resolver;
        self.walker.walk(
            &self.change.project,
            &self.change.branch,
            path,
            &mut |resolved| {
                let references = resolved.owners();
                owners.merge(resolver.resolve_all(references.iter())?);
                if !resolved.unresolved_imports.is_empty() {
                    owners.has_unresolved_imports = true;
                    for unresolved in &resolved.unresolved_imports {
                        owners.messages.push(unresolved.message());
                    }
                }
                Ok(VisitResult::Continue)
            },
        )?;

        if owners.owners.is_empty() && !owners.owned_by_all_users {
            match self.input.fallback {
                FallbackCodeOwners::None => {}
                FallbackCodeOwners::AllUsers => owners.owned_by_all_users = true,
                FallbackCodeOwners::ProjectOwners => {
                    owners
                        .owners
                        .extend(self.accounts.project_owners(&self.change.project)?);
                }
            }
        }

        Ok(owners)
    }

    fn classify(&self, path: &str, owners: &ResolvedOwners) -> PathCodeOwnerStatus {
        let input = &self.input;
        let owner_accounts = &owners.owners;
        let all_users = owners.owned_by_all_users;

        let is_owner = |account: &AccountId| all_users || owner_accounts.contains(account);

        if let Some(implicit) = input.implicit_approver {
            if is_owner(&implicit) {
                let mut status = PathCodeOwnerStatus::new(path, OwnerStatus::Approved);
                status.reasons.push(format!(
                    "implicitly approved by the change owner (account {})",
                    implicit
                ));
                return status;
            }
        }

        if let Some(approver) = input.approvers.iter().copied().find(|a| is_owner(a)) {
            let mut status = PathCodeOwnerStatus::new(path, OwnerStatus::Approved);
            status
                .reasons
                .push(format!("approved by account {}", approver));
            return status;
        }

        if all_users && !input.approvers.is_empty() {
            let mut status = PathCodeOwnerStatus::new(path, OwnerStatus::Approved);
            status
                .reasons
                .push("path is owned by all users and has an approval".to_string());
            return status;
        }

        if let Some(sticky) = input.sticky_approvers.iter().copied().find(|a| is_owner(a)) {
            let mut status = PathCodeOwnerStatus::new(path, OwnerStatus::Approved);
            status.reasons.push(format!(
                "approved by account {} on a previous patch set",
                sticky
            ));
            return status;
        }

        if all_users || input.reviewers.iter().any(|r| is_owner(r)) {
            return PathCodeOwnerStatus::new(path, OwnerStatus::Pending);
        }

        if owner_accounts.is_empty() {
            return PathCodeOwnerStatus::new(path, OwnerStatus::NoOwnersDefined);
        }

        PathCodeOwnerStatus::new(path, OwnerStatus::InsufficientReviewers)
    }

    fn branch_has_configs(&self) -> Result<bool> {
        if let Some(&known) = self.branch_has_configs.get() {
            return Ok(known);
        }

        let file_name = self.loader.backend().default_file_name();
        let has_configs = match self
            .loader
            .sticky_revision(&self.change.project, &self.change.branch)?
        {
            Some(revision) => hierarchy::branch_has_owner_configs(
                self.repos,
                &self.change.project,
                &revision,
                file_name,
            )?,
            None => false,
        };

        let _ = self.branch_has_configs.set(has_configs);
        Ok(has_configs)
    }
}

/// A change is submittable iff every present path status of every file is
/// approved.
pub fn is_submittable(statuses: &[FileCodeOwnerStatus]) -> bool {
    statuses.iter().all(FileCodeOwnerStatus::is_approved)
}
