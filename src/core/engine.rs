//! # Engine Surface
//!
//! The façade the host (and the CLI) talks to. An [`Engine`] owns the
//! injected services and builds everything request-scoped per call: the
//! policy snapshot, the config loader with its per-request cache, the
//! changed-file extractor and the status engine. The engine is a pure
//! function of the repository state plus the change snapshot; it persists
//! nothing and is safe to invoke concurrently for different requests.

use std::sync::Arc;

use serde::Serialize;

use super::backend::BackendRegistry;
use super::changes::ChangedFilesExtractor;
use super::identity::{OwnerResolver, ResolvedOwners};
use super::loader::{CancelFlag, ConfigLoader};
use super::paths;
use super::policy::{PolicyFactory, PolicySnapshot};
use super::providers::{AccountProvider, ProjectHierarchy, RepositoryProvider};
use super::resolver::PathOwnersResolver;
use super::status::{self, CheckInput, StatusEngine};
use super::submit::{self, SubmitRecord};
use super::types::{
    AccountId, ChangeSnapshot, CodeOwnerReference, ConfigKey, FileCodeOwnerStatus,
};
use crate::utils::error::{Error, Result};

/// The injected seams the engine runs against.
pub struct Services {
    pub repos: Arc<dyn RepositoryProvider>,
    pub accounts: Arc<dyn AccountProvider>,
    pub projects: Arc<dyn ProjectHierarchy>,
    pub backends: BackendRegistry,
}

/// Outcome of a submittability query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubmitDecision {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationSeverity {
    Error,
    Warning,
}

/// One finding of a config file validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationMessage {
    pub severity: ValidationSeverity,
    pub message: String,
}

impl ValidationMessage {
    fn error(message: String) -> Self {
        Self {
            severity: ValidationSeverity::Error,
            message,
        }
    }

    fn warning(message: String) -> Self {
        Self {
            severity: ValidationSeverity::Warning,
            message,
        }
    }
}

pub struct Engine {
    services: Services,
}

impl Engine {
    pub fn new(services: Services) -> Self {
        Self { services }
    }

    /// Whether the change is submittable. User-caused failures are folded
    /// into the decision; internal failures propagate.
    pub fn is_submittable(&self, change: &ChangeSnapshot) -> Result<SubmitDecision> {
        match self.file_statuses(change) {
            Ok(statuses) => Ok(SubmitDecision {
                ok: status::is_submittable(&statuses),
                error_kind: None,
                message: None,
            }),
            Err(err) if err.is_user_caused() => Ok(SubmitDecision {
                ok: false,
                error_kind: Some(err.kind().to_string()),
                message: Some(err.to_string()),
            }),
            Err(err) => Err(err),
        }
    }

    /// Per-file code-owner statuses of the change.
    pub fn file_statuses(&self, change: &ChangeSnapshot) -> Result<Vec<FileCodeOwnerStatus>> {
        self.file_statuses_with(change, false, CancelFlag::new())
    }

    /// Per-file statuses with explicit options: `check_all_owners` collects
    /// the contributing owners for every path instead of stopping at the
    /// first approval evidence.
    pub fn file_statuses_with(
        &self, change: &ChangeSnapshot, check_all_owners: bool, cancel: CancelFlag,
    ) -> Result<Vec<FileCodeOwnerStatus>> {
        let repos = self.services.repos.as_ref();
        let accounts = self.services.accounts.as_ref();

        let policy = self.policy(&change.project, &change.branch, cancel.clone())?;
        let backend = self.backend_for(&policy);

        let loader = ConfigLoader::new(repos, backend, cancel.clone());
        let extractor = ChangedFilesExtractor::new(repos, cancel.clone());
        let files =
            extractor.recompute(&change.project, &change.revision, policy.merge_commit_strategy)?;

        let owner_resolver = OwnerResolver::new(accounts, cancel.clone())
            .with_allowed_domains(policy.allowed_email_domains.clone());
        let mut input = CheckInput::from_change(&policy, change, accounts, &owner_resolver)?;
        input.check_all_owners = check_all_owners;

        let engine = StatusEngine::new(
            &policy,
            change,
            input,
            &loader,
            repos,
            accounts,
            owner_resolver,
        );
        engine.file_statuses(&files)
    }

    /// The submit record for the change, or `None` when the engine is
    /// disabled for the destination branch.
    pub fn submit_record(&self, change: &ChangeSnapshot) -> Result<Option<SubmitRecord>> {
        let cancel = CancelFlag::new();
        let policy = self.policy(&change.project, &change.branch, cancel.clone())?;
        if policy.is_disabled() {
            return Ok(None);
        }

        match self.file_statuses_with(change, false, cancel) {
            Ok(statuses) => Ok(Some(submit::record_from_statuses(&statuses))),
            Err(err) => submit::record_from_error(err).map(Some),
        }
    }

    /// Changed paths of the change that the account owns, paginated.
    pub fn owned_paths(
        &self, change: &ChangeSnapshot, account: AccountId, start: usize, limit: usize,
    ) -> Result<Vec<String>> {
        let repos = self.services.repos.as_ref();
        let accounts = self.services.accounts.as_ref();
        let cancel = CancelFlag::new();

        let policy = self.policy(&change.project, &change.branch, cancel.clone())?;
        let backend = self.backend_for(&policy);

        let loader = ConfigLoader::new(repos, backend, cancel.clone());
        let extractor = ChangedFilesExtractor::new(repos, cancel.clone());
        let files =
            extractor.recompute(&change.project, &change.revision, policy.merge_commit_strategy)?;

        let owner_resolver = OwnerResolver::new(accounts, cancel.clone())
            .with_allowed_domains(policy.allowed_email_domains.clone());
        let input = CheckInput::from_change(&policy, change, accounts, &owner_resolver)?;

        let engine = StatusEngine::new(
            &policy,
            change,
            input,
            &loader,
            repos,
            accounts,
            owner_resolver,
        );
        let paths = engine.owned_paths(&files, account)?;
        Ok(paths.into_iter().skip(start).take(limit).collect())
    }

    /// Resolve a single owner reference under the project/branch policy.
    pub fn resolve_owner_reference(
        &self, project: &str, branch: &str, reference: &CodeOwnerReference,
        enforce_visibility: bool, as_user: Option<AccountId>,
    ) -> Result<ResolvedOwners> {
        let cancel = CancelFlag::new();
        let policy = self.policy(project, branch, cancel.clone())?;

        let mut resolver = OwnerResolver::new(self.services.accounts.as_ref(), cancel)
            .with_allowed_domains(policy.allowed_email_domains.clone());
        if enforce_visibility {
            if let Some(user) = as_user {
                resolver = resolver.enforcing_visibility(user);
            }
        }

        resolver.resolve_all([reference])
    }

    /// Validate an OWNERS blob as it would be parsed at `(project, branch,
    /// file_path)`. Parse failures come back as error messages, unresolvable
    /// owners and imports as warnings; only infrastructure failures are
    /// `Err`.
    pub fn validate_config_file(
        &self, project: &str, branch: &str, file_path: &str, bytes: &[u8],
    ) -> Result<Vec<ValidationMessage>> {
        let cancel = CancelFlag::new();
        let policy = self.policy(project, branch, cancel.clone())?;
        let backend = self.backend_for(&policy);

        let (folder_path, file_name) = paths::split_folder_file(file_path)?;
        if file_name != backend.default_file_name() {
            return Ok(vec![ValidationMessage::warning(format!(
                "file name '{}' is not the expected '{}' for the {} backend",
                file_name,
                backend.default_file_name(),
                backend.id()
            ))]);
        }

        let key = ConfigKey::new(project, branch, &folder_path, &file_name);
        let config = match backend.parse(&key, bytes) {
            Ok(config) => config,
            Err(err @ Error::ConfigInvalid { .. }) => {
                return Ok(vec![ValidationMessage::error(err.to_string())]);
            }
            Err(err) => return Err(err),
        };

        let mut messages = Vec::new();

        // Unresolvable owner references are warnings; the config may be
        // ahead of the account store.
        let resolver = OwnerResolver::new(self.services.accounts.as_ref(), cancel.clone())
            .with_allowed_domains(policy.allowed_email_domains.clone());
        let resolved = resolver.resolve_all(config.referenced_owners().iter())?;
        for message in resolved.messages {
            messages.push(ValidationMessage::warning(message));
        }

        // Probe imports for existence by resolving the config against a
        // representative path in its folder.
        let loader = ConfigLoader::new(self.services.repos.as_ref(), backend, cancel);
        let path_resolver = PathOwnersResolver::new(&loader, policy.matcher(backend));
        let probe_path = paths::join(&folder_path, "file");
        let resolved = path_resolver.resolve(&config, &probe_path)?;
        for unresolved in resolved.unresolved_imports {
            messages.push(ValidationMessage::warning(unresolved.message()));
        }

        Ok(messages)
    }

    /// The resolved policy for `(project, branch)`, for host layers that
    /// need the configured labels.
    pub fn policy_snapshot(&self, project: &str, branch: &str) -> Result<PolicySnapshot> {
        self.policy(project, branch, CancelFlag::new())
    }

    fn policy(
        &self, project: &str, branch: &str, cancel: CancelFlag,
    ) -> Result<PolicySnapshot> {
        PolicyFactory::new(
            self.services.repos.as_ref(),
            self.services.projects.as_ref(),
            &self.services.backends,
            cancel,
        )
        .snapshot(project, branch)
    }

    fn backend_for(&self, policy: &PolicySnapshot) -> &'static dyn super::backend::CodeOwnersBackend {
        self.services
            .backends
            .get(&policy.backend_id)
            .unwrap_or_else(|| self.services.backends.default_backend())
    }
}
