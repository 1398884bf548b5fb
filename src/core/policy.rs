//! # Policy Configuration Snapshot
//!
//! Per `(project, branch)` resolved settings, read once per request from the
//! `code-owners.config` file on each project's `refs/meta/config` ref. The
//! file is INI-style key-value text with a `[codeOwners]` section and
//! optional per-branch sections in git-config style:
//!
//! ```ini
//! [codeOwners]
//! backend = find-owners
//! requiredApproval = Code-Review+2
//! globalCodeOwners = build-cop@example.com
//! [codeOwners "main"]
//! backend = proto
//! ```
//!
//! Inheritance follows the project parent chain: single-value keys in a
//! child override the parent, multi-value keys extend it. Branch sections
//! apply on top of the project-wide values the same way.

use std::collections::{BTreeSet, HashMap};

use config::{Config, File, FileFormat};
use serde::{Deserialize, Serialize};

use super::backend::{BackendRegistry, CodeOwnersBackend};
use super::loader::CancelFlag;
use super::matcher::{GlobMatcher, PathExpressionDialect, PathExpressionMatcher};
use super::paths;
use super::providers::{ProjectHierarchy, RepositoryProvider};
use super::types::{CodeOwnerReference, DEFAULT_CONFIG_REF, Vote};
use crate::utils::error::{Error, Result};

/// Name of the policy file on the default-config ref.
pub const POLICY_FILE_NAME: &str = "code-owners.config";

// Key matching is case-insensitive: the config crate stores keys lowercased.
const POLICY_SECTION: &str = "codeowners";

/// Keys whose values extend inherited values instead of replacing them.
const MULTI_VALUE_KEYS: [&str; 5] = [
    "overrideapproval",
    "globalcodeowners",
    "exemptedusers",
    "allowedemaildomains",
    "disabledbranch",
];

/// Base for merge-commit diffing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MergeCommitStrategy {
    #[default]
    AllChangedFiles,
    FilesWithConflictResolution,
}

/// Who owns paths with no owner definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FallbackCodeOwners {
    #[default]
    None,
    AllUsers,
    ProjectOwners,
}

/// Whether the uploader implicitly approves files they own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ImplicitApprovalPolicy {
    #[default]
    Disabled,
    /// Counts only when the change owner uploaded the patch set themselves.
    Enabled,
    /// Counts the change owner regardless of who uploaded.
    Forced,
}

/// A `<Label>+<Value>` pair a vote must meet or exceed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequiredApproval {
    pub label: String,
    pub value: i16,
}

impl RequiredApproval {
    pub fn new(label: &str, value: i16) -> Self {
        Self {
            label: label.to_string(),
            value,
        }
    }

    /// Parse a `<Label>+<Value>` spec, e.g. `Code-Review+2`.
    pub fn parse_label_spec(project: &str, spec: &str) -> Result<Self> {
        let invalid = || {
            Error::policy_invalid(
                project,
                &format!("invalid label spec '{}', expected <Label>+<Value>", spec),
            )
        };

        let (label, value) = spec.rsplit_once('+').ok_or_else(invalid)?;
        if label.is_empty() {
            return Err(invalid());
        }
        let value: i16 = value.parse().map_err(|_| invalid())?;
        if value < 1 {
            return Err(invalid());
        }

        Ok(Self::new(label, value))
    }

    pub fn is_met_by(&self, vote: &Vote) -> bool {
        vote.label == self.label && vote.value >= self.value
    }
}

impl std::fmt::Display for RequiredApproval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}+{}", self.label, self.value)
    }
}

impl Default for RequiredApproval {
    fn default() -> Self {
        Self::new("Code-Review", 1)
    }
}

/// Resolved, read-only policy for one `(project, branch)`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PolicySnapshot {
    pub project: String,
    /// Full ref name of the branch the snapshot was resolved for.
    pub branch: String,
    pub backend_id: String,
    /// Explicitly configured dialect; `None` falls back to the backend's
    /// native dialect.
    pub path_expressions: Option<PathExpressionDialect>,
    pub required_approval: RequiredApproval,
    /// Any one of these labels satisfies an override.
    pub override_approvals: Vec<RequiredApproval>,
    pub merge_commit_strategy: MergeCommitStrategy,
    pub implicit_approvals: ImplicitApprovalPolicy,
    pub sticky_approvals: bool,
    pub fallback_code_owners: FallbackCodeOwners,
    /// Empty allows any domain.
    pub allowed_email_domains: BTreeSet<String>,
    /// Unconditional project-wide owners.
    pub global_code_owners: BTreeSet<CodeOwnerReference>,
    /// Emails of users whose uploads bypass the ownership check.
    pub exempted_users: BTreeSet<String>,
    pub disabled: bool,
    /// Ref glob patterns for which the engine is inactive.
    pub disabled_branches: Vec<String>,
    /// Whether the required label refuses self-approval by the uploader.
    pub ignore_self_approval: bool,
    pub enable_validation_on_commit_received: bool,
    pub enable_validation_on_submit: bool,
}

impl PolicySnapshot {
    fn defaults(project: &str, branch: &str, backends: &BackendRegistry) -> Self {
        Self {
            project: project.to_string(),
            branch: paths::full_ref(branch),
            backend_id: backends.default_backend().id().to_string(),
            path_expressions: None,
            required_approval: RequiredApproval::default(),
            override_approvals: Vec::new(),
            merge_commit_strategy: MergeCommitStrategy::default(),
            implicit_approvals: ImplicitApprovalPolicy::default(),
            sticky_approvals: false,
            fallback_code_owners: FallbackCodeOwners::default(),
            allowed_email_domains: BTreeSet::new(),
            global_code_owners: BTreeSet::new(),
            exempted_users: BTreeSet::new(),
            disabled: false,
            disabled_branches: Vec::new(),
            ignore_self_approval: false,
            enable_validation_on_commit_received: true,
            enable_validation_on_submit: true,
        }
    }

    /// Whether the engine is inactive for this snapshot's branch.
    pub fn is_disabled(&self) -> bool {
        if self.disabled {
            return true;
        }
        let matcher = GlobMatcher;
        self.disabled_branches
            .iter()
            .any(|pattern| matcher.matches(pattern, &self.branch))
    }

    /// The matcher to use for per-file path expressions.
    pub fn matcher(
        &self, backend: &'static dyn CodeOwnersBackend,
    ) -> &'static dyn PathExpressionMatcher {
        match self.path_expressions.or(backend.native_dialect()) {
            Some(dialect) => dialect.matcher(),
            None => &super::matcher::NEVER_MATCH,
        }
    }

    /// Whether any of the votes is a valid override.
    pub fn override_votes<'v>(&self, votes: &'v [Vote]) -> Vec<&'v Vote> {
        votes
            .iter()
            .filter(|vote| {
                self.override_approvals
                    .iter()
                    .any(|approval| approval.is_met_by(vote))
            })
            .collect()
    }
}

/// Builds policy snapshots by folding the project inheritance chain.
pub struct PolicyFactory<'a> {
    repos: &'a dyn RepositoryProvider,
    projects: &'a dyn ProjectHierarchy,
    backends: &'a BackendRegistry,
    cancel: CancelFlag,
}

impl<'a> PolicyFactory<'a> {
    pub fn new(
        repos: &'a dyn RepositoryProvider, projects: &'a dyn ProjectHierarchy,
        backends: &'a BackendRegistry, cancel: CancelFlag,
    ) -> Self {
        Self {
            repos,
            projects,
            backends,
            cancel,
        }
    }

    /// Resolve the policy snapshot for `(project, branch)`.
    pub fn snapshot(&self, project: &str, branch: &str) -> Result<PolicySnapshot> {
        let branch = paths::full_ref(branch);
        let mut project_values: HashMap<String, String> = HashMap::new();
        let mut branch_values: HashMap<String, String> = HashMap::new();
        let short_branch = paths::short_branch(&branch).to_string();

        for ancestor in self.projects.ancestry(project)? {
            self.cancel.check()?;
            let Some(content) = self.read_policy_file(&ancestor)? else {
                continue;
            };
            let sections = parse_policy_sections(&ancestor, &content)?;

            for (section, values) in sections {
                let section = section.to_lowercase();
                if section == POLICY_SECTION {
                    merge_values(&mut project_values, values);
                } else if let Some(section_branch) = branch_section(&section) {
                    if section_branch.eq_ignore_ascii_case(&short_branch) {
                        merge_values(&mut branch_values, values);
                    }
                }
            }
        }

        // Branch values sit on top of the project-wide ones.
        merge_values(&mut project_values, branch_values);

        self.materialize(project, &branch, project_values)
    }

    fn read_policy_file(&self, project: &str) -> Result<Option<String>> {
        let Some(revision) = self.repos.resolve_ref(project, DEFAULT_CONFIG_REF)? else {
            return Ok(None);
        };
        let Some(bytes) = self.repos.read_blob(
            project,
            &revision,
            &format!("/{}", POLICY_FILE_NAME),
        )?
        else {
            return Ok(None);
        };
        String::from_utf8(bytes)
            .map(Some)
            .map_err(|_| Error::policy_invalid(project, "policy file is not valid UTF-8"))
    }

    fn materialize(
        &self, project: &str, branch: &str, values: HashMap<String, String>,
    ) -> Result<PolicySnapshot> {
        let mut snapshot = PolicySnapshot::defaults(project, branch, self.backends);

        for (key, value) in &values {
            let value = value.trim();
            match key.to_lowercase().as_str() {
                "backend" => {
                    if self.backends.get(value).is_none() {
                        return Err(Error::policy_invalid(
                            project,
                            &format!("unknown backend '{}'", value),
                        ));
                    }
                    snapshot.backend_id = value.to_string();
                }
                "pathexpressions" => {
                    snapshot.path_expressions =
                        Some(PathExpressionDialect::parse(value).ok_or_else(|| {
                            Error::policy_invalid(
                                project,
                                &format!("unknown path expression dialect '{}'", value),
                            )
                        })?);
                }
                "requiredapproval" => {
                    snapshot.required_approval =
                        RequiredApproval::parse_label_spec(project, value)?;
                }
                "overrideapproval" => {
                    snapshot.override_approvals = split_multi(value)
                        .map(|spec| RequiredApproval::parse_label_spec(project, spec))
                        .collect::<Result<Vec<_>>>()?;
                }
                "mergecommitstrategy" => {
                    snapshot.merge_commit_strategy = match value {
                        "ALL_CHANGED_FILES" => MergeCommitStrategy::AllChangedFiles,
                        "FILES_WITH_CONFLICT_RESOLUTION" => {
                            MergeCommitStrategy::FilesWithConflictResolution
                        }
                        _ => {
                            return Err(Error::policy_invalid(
                                project,
                                &format!("unknown merge commit strategy '{}'", value),
                            ));
                        }
                    };
                }
                "implicitapprovals" => {
                    snapshot.implicit_approvals = match value {
                        "false" => ImplicitApprovalPolicy::Disabled,
                        "true" => ImplicitApprovalPolicy::Enabled,
                        "forced" => ImplicitApprovalPolicy::Forced,
                        _ => {
                            return Err(Error::policy_invalid(
                                project,
                                &format!("invalid implicitApprovals value '{}'", value),
                            ));
                        }
                    };
                }
                "stickyapprovals" => {
                    snapshot.sticky_approvals = parse_bool(project, key, value)?;
                }
                "fallbackcodeowners" => {
                    snapshot.fallback_code_owners = match value {
                        "NONE" => FallbackCodeOwners::None,
                        "ALL_USERS" => FallbackCodeOwners::AllUsers,
                        "PROJECT_OWNERS" => FallbackCodeOwners::ProjectOwners,
                        _ => {
                            return Err(Error::policy_invalid(
                                project,
                                &format!("invalid fallbackCodeOwners value '{}'", value),
                            ));
                        }
                    };
                }
                "allowedemaildomains" => {
                    snapshot.allowed_email_domains =
                        split_multi(value).map(str::to_string).collect();
                }
                "globalcodeowners" => {
                    snapshot.global_code_owners = split_multi(value)
                        .map(CodeOwnerReference::parse)
                        .collect();
                }
                "exemptedusers" => {
                    snapshot.exempted_users =
                        split_multi(value).map(str::to_string).collect();
                }
                "disabled" => {
                    snapshot.disabled = parse_bool(project, key, value)?;
                }
                "disabledbranch" => {
                    snapshot.disabled_branches =
                        split_multi(value).map(str::to_string).collect();
                }
                "ignoreselfapproval" => {
                    snapshot.ignore_self_approval = parse_bool(project, key, value)?;
                }
                "enablevalidationoncommitreceived" => {
                    snapshot.enable_validation_on_commit_received =
                        parse_bool(project, key, value)?;
                }
                "enablevalidationonsubmit" => {
                    snapshot.enable_validation_on_submit = parse_bool(project, key, value)?;
                }
                unknown => {
                    log::warn!(
                        "ignoring unknown policy key '{}' for project {}",
                        unknown,
                        project
                    );
                }
            }
        }

        Ok(snapshot)
    }
}

/// Parse the INI text into `(section name, key -> value)` pairs.
fn parse_policy_sections(
    project: &str, content: &str,
) -> Result<Vec<(String, HashMap<String, String>)>> {
    let cfg = Config::builder()
        .add_source(File::from_str(content, FileFormat::Ini))
        .build()
        .map_err(|e| {
            Error::policy_invalid(
                project,
                &format!("cannot parse {}: {}", POLICY_FILE_NAME, e),
            )
        })?;

    let sections: HashMap<String, HashMap<String, String>> =
        cfg.try_deserialize().map_err(|e| {
            Error::policy_invalid(
                project,
                &format!("cannot parse {}: {}", POLICY_FILE_NAME, e),
            )
        })?;

    let mut ordered: Vec<_> = sections.into_iter().collect();
    ordered.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(ordered)
}

/// `codeOwners "main"` → `main`.
fn branch_section(section: &str) -> Option<&str> {
    section
        .strip_prefix(POLICY_SECTION)?
        .trim()
        .strip_prefix('"')?
        .strip_suffix('"')
}

/// Merge a child's values over accumulated ones: single-value keys replace,
/// multi-value keys extend.
fn merge_values(accumulated: &mut HashMap<String, String>, child: HashMap<String, String>) {
    for (key, value) in child {
        let key = key.to_lowercase();
        if MULTI_VALUE_KEYS.contains(&key.as_str()) {
            accumulated
                .entry(key)
                .and_modify(|existing| {
                    existing.push(',');
                    existing.push_str(&value);
                })
                .or_insert(value);
        } else {
            accumulated.insert(key, value);
        }
    }
}

fn split_multi(value: &str) -> impl Iterator<Item = &str> {
    value.split(',').map(str::trim).filter(|s| !s.is_empty())
}

fn parse_bool(project: &str, key: &str, value: &str) -> Result<bool> {
    match value {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => Err(Error::policy_invalid(
            project,
            &format!("invalid boolean value '{}' for key '{}'", value, key),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::providers::{InMemoryRepositoryProvider, StaticHierarchy};
    use crate::core::types::AccountId;

    fn factory_fixture(
        policies: &[(&str, &str)], parents: &[(&str, &str)],
    ) -> (InMemoryRepositoryProvider, StaticHierarchy, BackendRegistry) {
        let mut repo = InMemoryRepositoryProvider::new();
        for (index, (project, content)) in policies.iter().enumerate() {
            let revision = format!("meta{}", index);
            repo.add_ref(project, DEFAULT_CONFIG_REF, &revision);
            repo.add_file(project, &revision, "/code-owners.config", content);
        }

        let mut hierarchy = StaticHierarchy::new();
        for (child, parent) in parents {
            hierarchy.set_parent(child, parent);
        }

        (repo, hierarchy, BackendRegistry::standard())
    }

    fn snapshot_for(
        fixture: &(InMemoryRepositoryProvider, StaticHierarchy, BackendRegistry),
        project: &str, branch: &str,
    ) -> Result<PolicySnapshot> {
        let (repo, hierarchy, backends) = fixture;
        PolicyFactory::new(repo, hierarchy, backends, CancelFlag::new())
            .snapshot(project, branch)
    }

    #[test]
    fn test_defaults_without_policy_file() -> Result<()> {
        let fixture = factory_fixture(&[], &[]);
        let snapshot = snapshot_for(&fixture, "proj", "main")?;

        assert_eq!(snapshot.backend_id, "find-owners");
        assert_eq!(snapshot.required_approval, RequiredApproval::new("Code-Review", 1));
        assert_eq!(snapshot.fallback_code_owners, FallbackCodeOwners::None);
        assert!(!snapshot.is_disabled());
        assert!(snapshot.override_approvals.is_empty());
        Ok(())
    }

    #[test]
    fn test_reads_project_policy() -> Result<()> {
        let fixture = factory_fixture(
            &[(
                "proj",
                "[codeOwners]\n\
                 requiredApproval = Code-Review+2\n\
                 overrideApproval = Owners-Override+1\n\
                 mergeCommitStrategy = FILES_WITH_CONFLICT_RESOLUTION\n\
                 implicitApprovals = forced\n\
                 stickyApprovals = true\n\
                 fallbackCodeOwners = PROJECT_OWNERS\n\
                 globalCodeOwners = cop@example.com\n\
                 allowedEmailDomains = example.com\n",
            )],
            &[],
        );
        let snapshot = snapshot_for(&fixture, "proj", "main")?;

        assert_eq!(snapshot.required_approval, RequiredApproval::new("Code-Review", 2));
        assert_eq!(
            snapshot.override_approvals,
            vec![RequiredApproval::new("Owners-Override", 1)]
        );
        assert_eq!(
            snapshot.merge_commit_strategy,
            MergeCommitStrategy::FilesWithConflictResolution
        );
        assert_eq!(snapshot.implicit_approvals, ImplicitApprovalPolicy::Forced);
        assert!(snapshot.sticky_approvals);
        assert_eq!(
            snapshot.fallback_code_owners,
            FallbackCodeOwners::ProjectOwners
        );
        assert_eq!(
            snapshot.global_code_owners,
            BTreeSet::from([CodeOwnerReference::email("cop@example.com")])
        );
        assert_eq!(
            snapshot.allowed_email_domains,
            BTreeSet::from(["example.com".to_string()])
        );
        Ok(())
    }

    #[test]
    fn test_inheritance_single_value_overrides_multi_value_extends() -> Result<()> {
        let fixture = factory_fixture(
            &[
                (
                    "parent",
                    "[codeOwners]\n\
                     requiredApproval = Code-Review+1\n\
                     exemptedUsers = bot@example.com\n",
                ),
                (
                    "child",
                    "[codeOwners]\n\
                     requiredApproval = Code-Review+2\n\
                     exemptedUsers = release@example.com\n",
                ),
            ],
            &[("child", "parent")],
        );
        let snapshot = snapshot_for(&fixture, "child", "main")?;

        // Single-value: the child wins.
        assert_eq!(snapshot.required_approval, RequiredApproval::new("Code-Review", 2));
        // Multi-value: parent and child both contribute.
        assert_eq!(
            snapshot.exempted_users,
            BTreeSet::from([
                "bot@example.com".to_string(),
                "release@example.com".to_string()
            ])
        );
        Ok(())
    }

    #[test]
    fn test_branch_section_overrides_project_values() -> Result<()> {
        let fixture = factory_fixture(
            &[(
                "proj",
                "[codeOwners]\nbackend = find-owners\n[codeOwners \"main\"]\nbackend = proto\n",
            )],
            &[],
        );

        assert_eq!(snapshot_for(&fixture, "proj", "main")?.backend_id, "proto");
        assert_eq!(
            snapshot_for(&fixture, "proj", "dev")?.backend_id,
            "find-owners"
        );
        Ok(())
    }

    #[test]
    fn test_unknown_backend_is_policy_invalid() {
        let fixture = factory_fixture(&[("proj", "[codeOwners]\nbackend = magic\n")], &[]);
        let err = snapshot_for(&fixture, "proj", "main").unwrap_err();
        assert!(matches!(err, Error::PolicyInvalid { .. }));
    }

    #[test]
    fn test_invalid_label_spec_is_policy_invalid() {
        let fixture = factory_fixture(
            &[("proj", "[codeOwners]\nrequiredApproval = NoValue\n")],
            &[],
        );
        assert!(snapshot_for(&fixture, "proj", "main").is_err());
    }

    #[test]
    fn test_disabled_branch_globs() -> Result<()> {
        let fixture = factory_fixture(
            &[(
                "proj",
                "[codeOwners]\ndisabledBranch = refs/heads/release/*\n",
            )],
            &[],
        );

        assert!(snapshot_for(&fixture, "proj", "release/1.0")?.is_disabled());
        assert!(!snapshot_for(&fixture, "proj", "main")?.is_disabled());
        Ok(())
    }

    #[test]
    fn test_parse_label_spec() -> Result<()> {
        assert_eq!(
            RequiredApproval::parse_label_spec("proj", "Code-Review+2")?,
            RequiredApproval::new("Code-Review", 2)
        );
        assert!(RequiredApproval::parse_label_spec("proj", "Code-Review").is_err());
        assert!(RequiredApproval::parse_label_spec("proj", "+2").is_err());
        assert!(RequiredApproval::parse_label_spec("proj", "Code-Review+0").is_err());
        Ok(())
    }

    #[test]
    fn test_override_votes() {
        let mut snapshot =
            PolicySnapshot::defaults("proj", "main", &BackendRegistry::standard());
        snapshot.override_approvals = vec![RequiredApproval::new("Owners-Override", 1)];

        let votes = vec![
            Vote::new(AccountId(1), "Code-Review", 2),
            Vote::new(AccountId(2), "Owners-Override", 1),
        ];
        let overrides = snapshot.override_votes(&votes);
        assert_eq!(overrides.len(), 1);
        assert_eq!(overrides[0].account, AccountId(2));
    }
}
