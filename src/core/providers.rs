//! # Provider Contracts
//!
//! The engine consumes the surrounding review platform through two narrow
//! seams: a repository provider for Git object access and an account
//! provider for identities and visibility. A third, small seam supplies the
//! project inheritance chain for policy resolution. The engine never writes
//! through any of them.
//!
//! In-memory implementations live here too; they back the unit tests and
//! the CLI's accounts fixture.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use super::types::{AccountId, ChangedFile};
use crate::utils::error::{Error, Result};

/// An account as seen by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub preferred_email: String,
    #[serde(default)]
    pub secondary_emails: BTreeSet<String>,
    #[serde(default = "default_true")]
    pub active: bool,
}

impl Account {
    pub fn new(id: AccountId, preferred_email: &str) -> Self {
        Self {
            id,
            preferred_email: preferred_email.to_string(),
            secondary_emails: BTreeSet::new(),
            active: true,
        }
    }

    /// Whether the address is one of this account's emails.
    pub fn has_email(&self, email: &str) -> bool {
        self.preferred_email == email || self.secondary_emails.contains(email)
    }

    /// Whether the address is a secondary email of this account.
    pub fn is_secondary_email(&self, email: &str) -> bool {
        self.secondary_emails.contains(email)
    }
}

fn default_true() -> bool {
    true
}

/// Read access to Git repositories, keyed by project name.
pub trait RepositoryProvider: Send + Sync {
    /// Whether the project exists at all.
    fn project_exists(&self, project: &str) -> bool;

    /// Resolve a ref name to a revision, `None` when the ref is absent.
    fn resolve_ref(&self, project: &str, ref_name: &str) -> Result<Option<String>>;

    /// Read the blob at an absolute path within a revision's tree.
    fn read_blob(&self, project: &str, revision: &str, path: &str) -> Result<Option<Vec<u8>>>;

    /// All file paths of a revision's tree, absolute and sorted.
    fn walk_tree(&self, project: &str, revision: &str) -> Result<Vec<String>>;

    /// Diff a revision against a base revision (`None` diffs against the
    /// empty tree). The caller chooses rename detection.
    fn diff(
        &self, project: &str, revision: &str, base: Option<&str>, detect_renames: bool,
    ) -> Result<Vec<ChangedFile>>;

    /// Parent revisions of a commit, in order.
    fn parents(&self, project: &str, revision: &str) -> Result<Vec<String>>;

    /// The synthetic auto-merge revision of a merge commit, representing its
    /// conflict-resolved content.
    fn auto_merge(&self, project: &str, merge_revision: &str) -> Result<String>;
}

/// Read access to the host's identity store.
pub trait AccountProvider: Send + Sync {
    /// Accounts that carry the given email (preferred or secondary).
    fn lookup_by_email(&self, email: &str) -> Result<BTreeSet<AccountId>>;

    fn get(&self, account: AccountId) -> Result<Option<Account>>;

    /// Whether the viewer is allowed to see the target account.
    fn can_see(&self, viewer: AccountId, target: AccountId) -> Result<bool>;

    /// Whether the viewer owns the given email address.
    fn has_email(&self, viewer: AccountId, email: &str) -> Result<bool>;

    /// Whether the viewer holds the global capability to modify accounts.
    fn can_modify_accounts(&self, viewer: AccountId) -> Result<bool>;

    fn is_project_owner(&self, viewer: AccountId, project: &str) -> Result<bool>;

    /// All owners of a project, used for bootstrapping and fallback.
    fn project_owners(&self, project: &str) -> Result<BTreeSet<AccountId>>;
}

/// Supplies the project inheritance chain for policy resolution.
pub trait ProjectHierarchy: Send + Sync {
    /// Ancestor chain of a project, root first, ending with the project
    /// itself.
    fn ancestry(&self, project: &str) -> Result<Vec<String>>;
}

/// Host-side cache of pre-computed diffs.
pub trait DiffCache: Send + Sync {
    /// The cached diff of `(project, revision, parent number)`; `None` parent
    /// selects the default (first-parent or auto-merge) base.
    fn lookup(
        &self, project: &str, revision: &str, parent: Option<u32>,
    ) -> Option<Vec<ChangedFile>>;
}

// In-memory implementations

/// Repository contents held in maps, for tests and fixtures. Blobs are keyed
/// by `(project, revision)` and then by absolute path.
#[derive(Default)]
pub struct InMemoryRepositoryProvider {
    refs: HashMap<(String, String), String>,
    trees: HashMap<(String, String), BTreeMap<String, Vec<u8>>>,
    parents: HashMap<(String, String), Vec<String>>,
    auto_merges: HashMap<(String, String), String>,
}

impl InMemoryRepositoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_ref(&mut self, project: &str, ref_name: &str, revision: &str) {
        self.refs.insert(
            (project.to_string(), ref_name.to_string()),
            revision.to_string(),
        );
    }

    pub fn add_file(&mut self, project: &str, revision: &str, path: &str, content: &str) {
        self.trees
            .entry((project.to_string(), revision.to_string()))
            .or_default()
            .insert(path.to_string(), content.as_bytes().to_vec());
    }

    /// Register a revision that exists but has no files.
    pub fn add_empty_revision(&mut self, project: &str, revision: &str) {
        self.trees
            .entry((project.to_string(), revision.to_string()))
            .or_default();
    }

    pub fn set_parents(&mut self, project: &str, revision: &str, parents: &[&str]) {
        self.parents.insert(
            (project.to_string(), revision.to_string()),
            parents.iter().map(|p| p.to_string()).collect(),
        );
    }

    pub fn set_auto_merge(&mut self, project: &str, merge_revision: &str, auto_merge: &str) {
        self.auto_merges.insert(
            (project.to_string(), merge_revision.to_string()),
            auto_merge.to_string(),
        );
    }

    fn tree(&self, project: &str, revision: &str) -> Result<&BTreeMap<String, Vec<u8>>> {
        self.trees
            .get(&(project.to_string(), revision.to_string()))
            .ok_or_else(|| {
                Error::repository(&format!("unknown revision {} in {}", revision, project))
            })
    }
}

impl RepositoryProvider for InMemoryRepositoryProvider {
    fn project_exists(&self, project: &str) -> bool {
        self.refs.keys().any(|(p, _)| p == project)
            || self.trees.keys().any(|(p, _)| p == project)
    }

    fn resolve_ref(&self, project: &str, ref_name: &str) -> Result<Option<String>> {
        Ok(self
            .refs
            .get(&(project.to_string(), ref_name.to_string()))
            .cloned())
    }

    fn read_blob(&self, project: &str, revision: &str, path: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.tree(project, revision)?.get(path).cloned())
    }

    fn walk_tree(&self, project: &str, revision: &str) -> Result<Vec<String>> {
        Ok(self.tree(project, revision)?.keys().cloned().collect())
    }

    fn diff(
        &self, project: &str, revision: &str, base: Option<&str>, detect_renames: bool,
    ) -> Result<Vec<ChangedFile>> {
        let new_tree = self.tree(project, revision)?;
        let empty = BTreeMap::new();
        let old_tree = match base {
            Some(base) => self.tree(project, base)?,
            None => &empty,
        };

        let mut added = Vec::new();
        let mut deleted = Vec::new();
        let mut changed = Vec::new();

        for (path, content) in new_tree {
            match old_tree.get(path) {
                None => added.push((path.clone(), content.clone())),
                Some(old_content) if old_content != content => {
                    changed.push(ChangedFile::modified(path));
                }
                Some(_) => {}
            }
        }
        for (path, content) in old_tree {
            if !new_tree.contains_key(path) {
                deleted.push((path.clone(), content.clone()));
            }
        }

        let mut files = changed;
        if detect_renames {
            // Pair exact-content adds and deletes into renames.
            let mut unmatched_adds = Vec::new();
            for (path, content) in added {
                if let Some(pos) = deleted.iter().position(|(_, c)| *c == content) {
                    let (old_path, _) = deleted.remove(pos);
                    files.push(ChangedFile::renamed(&old_path, &path));
                } else {
                    unmatched_adds.push((path, content));
                }
            }
            added = unmatched_adds;
        }
        files.extend(added.into_iter().map(|(path, _)| ChangedFile::added(&path)));
        files.extend(
            deleted
                .into_iter()
                .map(|(path, _)| ChangedFile::deleted(&path)),
        );

        files.sort_by(|a, b| a.sort_path().cmp(b.sort_path()));
        Ok(files)
    }

    fn parents(&self, project: &str, revision: &str) -> Result<Vec<String>> {
        Ok(self
            .parents
            .get(&(project.to_string(), revision.to_string()))
            .cloned()
            .unwrap_or_default())
    }

    fn auto_merge(&self, project: &str, merge_revision: &str) -> Result<String> {
        self.auto_merges
            .get(&(project.to_string(), merge_revision.to_string()))
            .cloned()
            .ok_or_else(|| {
                Error::repository(&format!(
                    "no auto-merge registered for {} in {}",
                    merge_revision, project
                ))
            })
    }
}

/// JSON record of the CLI accounts fixture.
#[derive(Debug, Deserialize)]
struct AccountRecord {
    id: u64,
    email: String,
    #[serde(default)]
    secondary_emails: Vec<String>,
    #[serde(default = "default_true")]
    active: bool,
    #[serde(default)]
    invisible_to: Vec<u64>,
    #[serde(default)]
    modify_account: bool,
    #[serde(default)]
    project_owner_of: Vec<String>,
}

/// Account store held in maps, for tests and the CLI accounts fixture.
#[derive(Default)]
pub struct StaticAccounts {
    accounts: BTreeMap<AccountId, Account>,
    invisible: BTreeSet<(AccountId, AccountId)>,
    modify_account: BTreeSet<AccountId>,
    project_owners: BTreeMap<String, BTreeSet<AccountId>>,
}

impl StaticAccounts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, account: Account) -> AccountId {
        let id = account.id;
        self.accounts.insert(id, account);
        id
    }

    /// Mark the target account as not visible to the viewer.
    pub fn hide_from(&mut self, viewer: AccountId, target: AccountId) {
        self.invisible.insert((viewer, target));
    }

    pub fn grant_modify_account(&mut self, account: AccountId) {
        self.modify_account.insert(account);
    }

    pub fn add_project_owner(&mut self, project: &str, account: AccountId) {
        self.project_owners
            .entry(project.to_string())
            .or_default()
            .insert(account);
    }

    /// Load the JSON accounts fixture used by the CLI.
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        let records: Vec<AccountRecord> = serde_json::from_slice(bytes)?;

        let mut accounts = Self::new();
        for record in &records {
            let mut account = Account::new(AccountId(record.id), &record.email);
            account.secondary_emails =
                record.secondary_emails.iter().cloned().collect();
            account.active = record.active;
            accounts.add(account);

            for viewer in &record.invisible_to {
                accounts.hide_from(AccountId(*viewer), AccountId(record.id));
            }
            if record.modify_account {
                accounts.grant_modify_account(AccountId(record.id));
            }
            for project in &record.project_owner_of {
                accounts.add_project_owner(project, AccountId(record.id));
            }
        }

        Ok(accounts)
    }
}

impl AccountProvider for StaticAccounts {
    fn lookup_by_email(&self, email: &str) -> Result<BTreeSet<AccountId>> {
        Ok(self
            .accounts
            .values()
            .filter(|account| account.has_email(email))
            .map(|account| account.id)
            .collect())
    }

    fn get(&self, account: AccountId) -> Result<Option<Account>> {
        Ok(self.accounts.get(&account).cloned())
    }

    fn can_see(&self, viewer: AccountId, target: AccountId) -> Result<bool> {
        Ok(!self.invisible.contains(&(viewer, target)))
    }

    fn has_email(&self, viewer: AccountId, email: &str) -> Result<bool> {
        Ok(self
            .accounts
            .get(&viewer)
            .map(|account| account.has_email(email))
            .unwrap_or(false))
    }

    fn can_modify_accounts(&self, viewer: AccountId) -> Result<bool> {
        Ok(self.modify_account.contains(&viewer))
    }

    fn is_project_owner(&self, viewer: AccountId, project: &str) -> Result<bool> {
        Ok(self
            .project_owners
            .get(project)
            .map(|owners| owners.contains(&viewer))
            .unwrap_or(false))
    }

    fn project_owners(&self, project: &str) -> Result<BTreeSet<AccountId>> {
        Ok(self.project_owners.get(project).cloned().unwrap_or_default())
    }
}

/// Parent relationships held in a map; projects without an entry have no
/// parent.
#[derive(Default)]
pub struct StaticHierarchy {
    parents: HashMap<String, String>,
}

impl StaticHierarchy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_parent(&mut self, project: &str, parent: &str) {
        self.parents
            .insert(project.to_string(), parent.to_string());
    }
}

impl ProjectHierarchy for StaticHierarchy {
    fn ancestry(&self, project: &str) -> Result<Vec<String>> {
        let mut chain = vec![project.to_string()];
        let mut current = project.to_string();

        while let Some(parent) = self.parents.get(&current) {
            if chain.contains(parent) {
                return Err(Error::new(&format!(
                    "project inheritance cycle involving {}",
                    parent
                )));
            }
            chain.push(parent.clone());
            current = parent.clone();
        }

        chain.reverse();
        Ok(chain)
    }
}
