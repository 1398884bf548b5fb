//! # Core Data Types
//!
//! The data model shared by all engine components: OWNERS config files and
//! the rules within them, import references, changed files, per-path
//! approval statuses, and the snapshot of a change under review.
//!
//! The main types are:
//! - `CodeOwnerConfig`: one parsed OWNERS file at `(project, branch, folder, file)`.
//! - `CodeOwnerSet`: a rule within a config, global or per-file.
//! - `ConfigRef` / `ImportMode`: a reference pulling rules from another OWNERS file.
//! - `ChangedFile`: the minimal diff view the engine consumes.
//! - `OwnerStatus` / `PathCodeOwnerStatus` / `FileCodeOwnerStatus`: per-path results.
//! - `ChangeSnapshot` / `Vote`: the review-side inputs supplied by the host.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use super::paths;
use crate::utils::error::{Error, Result};

/// The wildcard owner reference that stands for all users.
pub const ALL_USERS_WILDCARD: &str = "*";

/// The ref that holds default and policy configuration for a project.
pub const DEFAULT_CONFIG_REF: &str = "refs/meta/config";

/// Identifier of an account in the host's identity store.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct AccountId(pub u64);

impl std::fmt::Display for AccountId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a patch set within a change.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct PatchSetId(pub u32);

impl std::fmt::Display for PatchSetId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A textual owner reference as written in an OWNERS file: an email address
/// or the all-users wildcard `*`.
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum CodeOwnerReference {
    AllUsers,
    Email(String),
}

impl CodeOwnerReference {
    pub fn parse(token: &str) -> Self {
        if token == ALL_USERS_WILDCARD {
            CodeOwnerReference::AllUsers
        } else {
            CodeOwnerReference::Email(token.to_string())
        }
    }

    pub fn email(address: &str) -> Self {
        CodeOwnerReference::Email(address.to_string())
    }

    pub fn as_email(&self) -> Option<&str> {
        match self {
            CodeOwnerReference::Email(address) => Some(address),
            CodeOwnerReference::AllUsers => None,
        }
    }
}

impl std::fmt::Display for CodeOwnerReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CodeOwnerReference::AllUsers => write!(f, "{}", ALL_USERS_WILDCARD),
            CodeOwnerReference::Email(address) => write!(f, "{}", address),
        }
    }
}

/// An annotation attached to an owner reference, e.g. `#{LAST_RESORT_SUGGESTION}`.
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Annotation(pub String);

/// Uniquely identifies an OWNERS file: `(project, branch, folder, file name)`.
/// The branch is always a full ref name.
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct ConfigKey {
    pub project: String,
    pub branch: String,
    pub folder_path: String,
    pub file_name: String,
}

impl ConfigKey {
    pub fn new(project: &str, branch: &str, folder_path: &str, file_name: &str) -> Self {
        Self {
            project: project.to_string(),
            branch: paths::full_ref(branch),
            folder_path: folder_path.to_string(),
            file_name: file_name.to_string(),
        }
    }

    /// Absolute path of the config file inside its branch.
    pub fn file_path(&self) -> String {
        paths::join(&self.folder_path, &self.file_name)
    }
}

impl std::fmt::Display for ConfigKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.project, self.branch, self.file_path())
    }
}

/// How much of an imported config takes effect in the importing one.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum ImportMode {
    /// Import global owner sets only.
    GlobalOnly,
    /// Import global sets, matching per-file sets, the ignore-parent flag,
    /// and transitively follow imports of the imported file.
    All,
    /// As `All`, but do not follow the imported file's own imports.
    AllWithoutTransitive,
}

impl ImportMode {
    pub fn imports_per_file_sets(self) -> bool {
        !matches!(self, ImportMode::GlobalOnly)
    }

    pub fn imports_ignore_parent_flag(self) -> bool {
        !matches!(self, ImportMode::GlobalOnly)
    }

    pub fn follows_transitive_imports(self) -> bool {
        matches!(self, ImportMode::All | ImportMode::GlobalOnly)
    }
}

impl std::fmt::Display for ImportMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ImportMode::GlobalOnly => write!(f, "global"),
            ImportMode::All => write!(f, "all"),
            ImportMode::AllWithoutTransitive => write!(f, "all-non-transitive"),
        }
    }
}

/// A reference to another OWNERS file. Missing project or branch default to
/// the importing config's own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigRef {
    pub project: Option<String>,
    pub branch: Option<String>,
    pub file_path: String,
    pub mode: ImportMode,
}

impl ConfigRef {
    pub fn new(
        project: Option<&str>, branch: Option<&str>, file_path: &str, mode: ImportMode,
    ) -> Self {
        Self {
            project: project.map(str::to_string),
            branch: branch.map(paths::full_ref),
            file_path: file_path.to_string(),
            mode,
        }
    }

    /// Resolve this reference into a concrete config key, defaulting project
    /// and branch from the importing config and resolving relative paths
    /// against its folder.
    pub fn resolve(&self, importing: &ConfigKey) -> Result<ConfigKey> {
        let file_path = paths::resolve_against(&importing.folder_path, &self.file_path)?;
        let (folder_path, file_name) = paths::split_folder_file(&file_path)?;

        Ok(ConfigKey {
            project: self
                .project
                .clone()
                .unwrap_or_else(|| importing.project.clone()),
            branch: self
                .branch
                .clone()
                .unwrap_or_else(|| importing.branch.clone()),
            folder_path,
            file_name,
        })
    }
}

impl std::fmt::Display for ConfigRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(project) = &self.project {
            write!(f, "{}:", project)?;
        }
        if let Some(branch) = &self.branch {
            write!(f, "{}:", paths::short_branch(branch))?;
        }
        write!(f, "{}", self.file_path)
    }
}

/// A rule within an OWNERS file. An empty `path_expressions` set makes the
/// rule global (it applies to every file under the config's folder);
/// otherwise the rule is per-file and applies only to matching paths.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct CodeOwnerSet {
    pub path_expressions: BTreeSet<String>,
    pub ignore_global_and_parent_owners: bool,
    pub imports: Vec<ConfigRef>,
    pub code_owners: BTreeSet<CodeOwnerReference>,
    pub annotations: BTreeMap<CodeOwnerReference, BTreeSet<Annotation>>,
}

impl CodeOwnerSet {
    /// A global rule listing the given owners.
    pub fn global<I: IntoIterator<Item = CodeOwnerReference>>(owners: I) -> Self {
        Self {
            code_owners: owners.into_iter().collect(),
            ..Self::default()
        }
    }

    /// A per-file rule for the given path expressions and owners.
    pub fn per_file<E, I>(expressions: E, owners: I) -> Self
    where
        E: IntoIterator<Item = String>,
        I: IntoIterator<Item = CodeOwnerReference>,
    {
        Self {
            path_expressions: expressions.into_iter().collect(),
            code_owners: owners.into_iter().collect(),
            ..Self::default()
        }
    }

    pub fn is_global(&self) -> bool {
        self.path_expressions.is_empty()
    }

    /// Structural validation: a global set must not carry the ignore flag or
    /// imports, and per-file imports must use the global-only import mode.
    pub fn validate(&self, key: &ConfigKey, line: Option<usize>) -> Result<()> {
        if self.is_global() {
            if self.ignore_global_and_parent_owners {
                return Err(Error::config_invalid(
                    &key.project,
                    &key.branch,
                    &key.file_path(),
                    line,
                    "a global owner set cannot ignore global and parent owners",
                ));
            }
            if !self.imports.is_empty() {
                return Err(Error::config_invalid(
                    &key.project,
                    &key.branch,
                    &key.file_path(),
                    line,
                    "a global owner set cannot declare imports",
                ));
            }
        } else {
            for import in &self.imports {
                if import.mode != ImportMode::GlobalOnly {
                    return Err(Error::config_invalid(
                        &key.project,
                        &key.branch,
                        &key.file_path(),
                        line,
                        &format!(
                            "per-file import of {} must use the global-only import mode",
                            import
                        ),
                    ));
                }
            }
        }

        Ok(())
    }
}

/// One parsed OWNERS file. Immutable once parsed; lives for one request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeOwnerConfig {
    pub key: ConfigKey,
    /// When true, no owners are inherited from ancestor configs.
    pub ignore_parent_code_owners: bool,
    /// Imports that apply to the whole config.
    pub imports: Vec<ConfigRef>,
    /// Rules in file order.
    pub code_owner_sets: Vec<CodeOwnerSet>,
    /// Git object id the content was read from, when loaded from a branch.
    pub revision: Option<String>,
}

impl CodeOwnerConfig {
    pub fn new(key: ConfigKey) -> Self {
        Self {
            key,
            ignore_parent_code_owners: false,
            imports: Vec::new(),
            code_owner_sets: Vec::new(),
            revision: None,
        }
    }

    /// Validate every rule against the structural invariants.
    pub fn validate(&self) -> Result<()> {
        for set in &self.code_owner_sets {
            set.validate(&self.key, None)?;
        }
        Ok(())
    }

    /// All owner references mentioned anywhere in the config.
    pub fn referenced_owners(&self) -> BTreeSet<CodeOwnerReference> {
        self.code_owner_sets
            .iter()
            .flat_map(|set| set.code_owners.iter().cloned())
            .collect()
    }
}

/// What happened to a file in a revision.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeKind {
    Add,
    Modify,
    Delete,
    Rename,
    Copy,
}

impl std::fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChangeKind::Add => write!(f, "ADD"),
            ChangeKind::Modify => write!(f, "MODIFY"),
            ChangeKind::Delete => write!(f, "DELETE"),
            ChangeKind::Rename => write!(f, "RENAME"),
            ChangeKind::Copy => write!(f, "COPY"),
        }
    }
}

/// One changed file of a revision. Paths are absolute; a rename carries both
/// paths, adds only the new one, deletes only the old one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangedFile {
    pub new_path: Option<String>,
    pub old_path: Option<String>,
    pub kind: ChangeKind,
}

impl ChangedFile {
    pub fn added(path: &str) -> Self {
        Self {
            new_path: Some(path.to_string()),
            old_path: None,
            kind: ChangeKind::Add,
        }
    }

    pub fn modified(path: &str) -> Self {
        Self {
            new_path: Some(path.to_string()),
            old_path: Some(path.to_string()),
            kind: ChangeKind::Modify,
        }
    }

    pub fn deleted(path: &str) -> Self {
        Self {
            new_path: None,
            old_path: Some(path.to_string()),
            kind: ChangeKind::Delete,
        }
    }

    pub fn renamed(old_path: &str, new_path: &str) -> Self {
        Self {
            new_path: Some(new_path.to_string()),
            old_path: Some(old_path.to_string()),
            kind: ChangeKind::Rename,
        }
    }

    /// The path used for sorting and display.
    pub fn sort_path(&self) -> &str {
        self.new_path
            .as_deref()
            .or(self.old_path.as_deref())
            .unwrap_or("")
    }

    /// Whether the old path needs its own owner approval: deletions and
    /// renames remove content at the old location.
    pub fn old_path_needs_approval(&self) -> bool {
        self.old_path.is_some() && matches!(self.kind, ChangeKind::Delete | ChangeKind::Rename)
    }
}

/// Per-path approval status. Variant order is the dominance order:
/// `Approved` beats `Pending` beats `InsufficientReviewers` beats
/// `NoOwnersDefined`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OwnerStatus {
    NoOwnersDefined,
    InsufficientReviewers,
    Pending,
    Approved,
}

impl std::fmt::Display for OwnerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OwnerStatus::NoOwnersDefined => write!(f, "NO_OWNERS_DEFINED"),
            OwnerStatus::InsufficientReviewers => write!(f, "INSUFFICIENT_REVIEWERS"),
            OwnerStatus::Pending => write!(f, "PENDING"),
            OwnerStatus::Approved => write!(f, "APPROVED"),
        }
    }
}

/// Status of a single absolute path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathCodeOwnerStatus {
    pub path: String,
    pub status: OwnerStatus,
    /// Human-readable reasons for the status, audit-only.
    pub reasons: Vec<String>,
    /// The contributing owners, populated only when the caller asked for
    /// owners to be collected.
    pub owners: Option<BTreeSet<AccountId>>,
}

impl PathCodeOwnerStatus {
    pub fn new(path: &str, status: OwnerStatus) -> Self {
        Self {
            path: path.to_string(),
            status,
            reasons: Vec::new(),
            owners: None,
        }
    }
}

/// Statuses of one changed file: the new path when present, and the old path
/// when the file was deleted or renamed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileCodeOwnerStatus {
    pub changed_file: ChangedFile,
    pub new_path_status: Option<PathCodeOwnerStatus>,
    pub old_path_status: Option<PathCodeOwnerStatus>,
}

impl FileCodeOwnerStatus {
    /// Every present path status is approved.
    pub fn is_approved(&self) -> bool {
        self.new_path_status
            .iter()
            .chain(self.old_path_status.iter())
            .all(|status| status.status == OwnerStatus::Approved)
    }
}

/// Specifies the desired format for command output.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum OutputFormat {
    /// Human-readable plain text, formatted as a table.
    Text,
    /// Machine-readable JSON format.
    Json,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Text => write!(f, "text"),
            OutputFormat::Json => write!(f, "json"),
        }
    }
}

/// A vote on a review label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vote {
    pub account: AccountId,
    pub label: String,
    pub value: i16,
}

impl Vote {
    pub fn new(account: AccountId, label: &str, value: i16) -> Self {
        Self {
            account,
            label: label.to_string(),
            value,
        }
    }
}

/// Snapshot of a change under review, supplied by the host. The engine is a
/// pure function of this snapshot plus the repository state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSnapshot {
    pub project: String,
    /// Destination branch, full ref name.
    pub branch: String,
    /// Commit of the current patch set.
    pub revision: String,
    pub patch_set: PatchSetId,
    pub change_owner: AccountId,
    pub uploader: AccountId,
    pub reviewers: BTreeSet<AccountId>,
    /// Votes on the current patch set.
    pub votes: Vec<Vote>,
    /// Code-owner approvals on previous patch sets, for sticky approvals.
    pub previous_approvals: BTreeMap<PatchSetId, BTreeSet<AccountId>>,
}

impl ChangeSnapshot {
    pub fn new(
        project: &str, branch: &str, revision: &str, change_owner: AccountId,
    ) -> Self {
        Self {
            project: project.to_string(),
            branch: paths::full_ref(branch),
            revision: revision.to_string(),
            patch_set: PatchSetId(1),
            change_owner,
            uploader: change_owner,
            reviewers: BTreeSet::new(),
            votes: Vec::new(),
            previous_approvals: BTreeMap::new(),
        }
    }
}
