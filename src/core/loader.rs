//! # Config Loader
//!
//! Reads OWNERS blobs from Git refs/revisions and parses them through the
//! active backend. Loads are memoized per request by `(key, revision)`, and
//! once a `(project, branch)` pair has been read at some revision during a
//! request, every later load for that pair sticks to the same revision so a
//! branch tip advancing mid-walk cannot produce an inconsistent view.
//!
//! The cache is a plain map owned by the request-scoped loader; requests are
//! single-threaded, so no locking is involved.

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use super::backend::CodeOwnersBackend;
use super::providers::RepositoryProvider;
use super::types::{CodeOwnerConfig, ConfigKey};
use crate::utils::error::{Error, Result};

/// Cooperative cancellation handle. Checked between folder visits, between
/// imports and before provider calls; a canceled operation aborts with
/// [`Error::Canceled`] and produces no side effects.
#[derive(Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_canceled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    pub fn check(&self) -> Result<()> {
        if self.is_canceled() {
            Err(Error::Canceled)
        } else {
            Ok(())
        }
    }
}

/// Request-scoped OWNERS loader.
pub struct ConfigLoader<'a> {
    repos: &'a dyn RepositoryProvider,
    backend: &'static dyn CodeOwnersBackend,
    cancel: CancelFlag,
    cache: RefCell<HashMap<(ConfigKey, String), Option<Arc<CodeOwnerConfig>>>>,
    sticky_revisions: RefCell<HashMap<(String, String), Option<String>>>,
}

impl<'a> ConfigLoader<'a> {
    pub fn new(
        repos: &'a dyn RepositoryProvider, backend: &'static dyn CodeOwnersBackend,
        cancel: CancelFlag,
    ) -> Self {
        Self {
            repos,
            backend,
            cancel,
            cache: RefCell::new(HashMap::new()),
            sticky_revisions: RefCell::new(HashMap::new()),
        }
    }

    pub fn backend(&self) -> &'static dyn CodeOwnersBackend {
        self.backend
    }

    pub fn project_exists(&self, project: &str) -> bool {
        self.repos.project_exists(project)
    }

    pub fn cancel_flag(&self) -> &CancelFlag {
        &self.cancel
    }

    /// Pin the revision used for a `(project, branch)` pair. Used to evaluate
    /// the destination branch at the change's own revision.
    pub fn pin_revision(&self, project: &str, branch: &str, revision: &str) {
        self.sticky_revisions.borrow_mut().insert(
            (project.to_string(), branch.to_string()),
            Some(revision.to_string()),
        );
    }

    /// The revision all loads for `(project, branch)` use during this
    /// request. Resolved from the branch tip and pinned on first use;
    /// `None` when the branch does not exist.
    pub fn sticky_revision(&self, project: &str, branch: &str) -> Result<Option<String>> {
        let map_key = (project.to_string(), branch.to_string());
        if let Some(revision) = self.sticky_revisions.borrow().get(&map_key) {
            return Ok(revision.clone());
        }

        self.cancel.check()?;
        let revision = self.repos.resolve_ref(project, branch)?;
        self.sticky_revisions
            .borrow_mut()
            .insert(map_key, revision.clone());
        Ok(revision)
    }

    /// Load the config at a key, using the sticky revision of the key's
    /// branch. Absence (missing branch or missing file) is `None`; a blob
    /// that fails to parse is an error.
    pub fn load(&self, key: &ConfigKey) -> Result<Option<Arc<CodeOwnerConfig>>> {
        match self.sticky_revision(&key.project, &key.branch)? {
            Some(revision) => self.load_at(key, &revision),
            None => Ok(None),
        }
    }

    /// Load the config at a key from an explicit revision.
    pub fn load_at(&self, key: &ConfigKey, revision: &str) -> Result<Option<Arc<CodeOwnerConfig>>> {
        let cache_key = (key.clone(), revision.to_string());
        if let Some(cached) = self.cache.borrow().get(&cache_key) {
            return Ok(cached.clone());
        }

        self.cancel.check()?;
        let loaded = match self
            .repos
            .read_blob(&key.project, revision, &key.file_path())?
        {
            Some(bytes) => {
                let mut config = self.backend.parse(key, &bytes)?;
                config.revision = Some(revision.to_string());
                Some(Arc::new(config))
            }
            None => None,
        };

        self.cache.borrow_mut().insert(cache_key, loaded.clone());
        Ok(loaded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::backend::FIND_OWNERS_BACKEND;
    use crate::core::providers::InMemoryRepositoryProvider;
    use crate::core::types::ChangedFile;
    use std::sync::atomic::AtomicUsize;

    /// Counts blob reads so the tests can observe memoization.
    struct CountingRepo {
        inner: InMemoryRepositoryProvider,
        blob_reads: AtomicUsize,
        ref_reads: AtomicUsize,
    }

    impl CountingRepo {
        fn new(inner: InMemoryRepositoryProvider) -> Self {
            Self {
                inner,
                blob_reads: AtomicUsize::new(0),
                ref_reads: AtomicUsize::new(0),
            }
        }
    }

    impl RepositoryProvider for CountingRepo {
        fn project_exists(&self, project: &str) -> bool {
            self.inner.project_exists(project)
        }

        fn resolve_ref(&self, project: &str, ref_name: &str) -> Result<Option<String>> {
            self.ref_reads.fetch_add(1, Ordering::Relaxed);
            self.inner.resolve_ref(project, ref_name)
        }

        fn read_blob(
            &self, project: &str, revision: &str, path: &str,
        ) -> Result<Option<Vec<u8>>> {
            self.blob_reads.fetch_add(1, Ordering::Relaxed);
            self.inner.read_blob(project, revision, path)
        }

        fn walk_tree(&self, project: &str, revision: &str) -> Result<Vec<String>> {
            self.inner.walk_tree(project, revision)
        }

        fn diff(
            &self, project: &str, revision: &str, base: Option<&str>, detect_renames: bool,
        ) -> Result<Vec<ChangedFile>> {
            self.inner.diff(project, revision, base, detect_renames)
        }

        fn parents(&self, project: &str, revision: &str) -> Result<Vec<String>> {
            self.inner.parents(project, revision)
        }

        fn auto_merge(&self, project: &str, merge_revision: &str) -> Result<String> {
            self.inner.auto_merge(project, merge_revision)
        }
    }

    fn key(folder: &str) -> ConfigKey {
        ConfigKey::new("proj", "refs/heads/main", folder, "OWNERS")
    }

    #[test]
    fn test_load_memoizes_by_key_and_revision() -> Result<()> {
        let mut inner = InMemoryRepositoryProvider::new();
        inner.add_ref("proj", "refs/heads/main", "r1");
        inner.add_file("proj", "r1", "/OWNERS", "alice@example.com\n");
        let repo = CountingRepo::new(inner);

        let loader = ConfigLoader::new(&repo, &FIND_OWNERS_BACKEND, CancelFlag::new());
        let first = loader.load(&key("/"))?.unwrap();
        let second = loader.load(&key("/"))?.unwrap();

        assert_eq!(first, second);
        assert_eq!(first.revision.as_deref(), Some("r1"));
        assert_eq!(repo.blob_reads.load(Ordering::Relaxed), 1);
        Ok(())
    }

    #[test]
    fn test_missing_file_is_absence_not_error() -> Result<()> {
        let mut inner = InMemoryRepositoryProvider::new();
        inner.add_ref("proj", "refs/heads/main", "r1");
        inner.add_empty_revision("proj", "r1");
        let repo = CountingRepo::new(inner);

        let loader = ConfigLoader::new(&repo, &FIND_OWNERS_BACKEND, CancelFlag::new());
        assert!(loader.load(&key("/"))?.is_none());
        // Absence is cached too.
        assert!(loader.load(&key("/"))?.is_none());
        assert_eq!(repo.blob_reads.load(Ordering::Relaxed), 1);
        Ok(())
    }

    #[test]
    fn test_missing_branch_is_absence() -> Result<()> {
        let mut inner = InMemoryRepositoryProvider::new();
        inner.add_empty_revision("proj", "r1");
        let repo = CountingRepo::new(inner);

        let loader = ConfigLoader::new(&repo, &FIND_OWNERS_BACKEND, CancelFlag::new());
        assert!(loader.load(&key("/"))?.is_none());
        Ok(())
    }

    #[test]
    fn test_parse_failure_is_an_error() {
        let mut inner = InMemoryRepositoryProvider::new();
        inner.add_ref("proj", "refs/heads/main", "r1");
        inner.add_file("proj", "r1", "/OWNERS", "not a valid directive\n");
        let repo = CountingRepo::new(inner);

        let loader = ConfigLoader::new(&repo, &FIND_OWNERS_BACKEND, CancelFlag::new());
        let err = loader.load(&key("/")).unwrap_err();
        assert!(err.is_user_caused());
    }

    #[test]
    fn test_revision_stickiness_survives_ref_updates() -> Result<()> {
        let mut inner = InMemoryRepositoryProvider::new();
        inner.add_ref("proj", "refs/heads/main", "r1");
        inner.add_file("proj", "r1", "/OWNERS", "alice@example.com\n");
        inner.add_file("proj", "r1", "/sub/OWNERS", "bob@example.com\n");
        let repo = CountingRepo::new(inner);

        let loader = ConfigLoader::new(&repo, &FIND_OWNERS_BACKEND, CancelFlag::new());
        let first = loader.load(&key("/"))?.unwrap();
        assert_eq!(first.revision.as_deref(), Some("r1"));

        // Later loads for the same branch must reuse the pinned revision
        // instead of resolving the ref again.
        let second = loader.load(&key("/sub"))?.unwrap();
        assert_eq!(second.revision.as_deref(), Some("r1"));
        assert_eq!(repo.ref_reads.load(Ordering::Relaxed), 1);
        Ok(())
    }

    #[test]
    fn test_pinned_revision_wins_over_branch_tip() -> Result<()> {
        let mut inner = InMemoryRepositoryProvider::new();
        inner.add_ref("proj", "refs/heads/main", "r2");
        inner.add_file("proj", "r1", "/OWNERS", "alice@example.com\n");
        inner.add_file("proj", "r2", "/OWNERS", "bob@example.com\n");
        let repo = CountingRepo::new(inner);

        let loader = ConfigLoader::new(&repo, &FIND_OWNERS_BACKEND, CancelFlag::new());
        loader.pin_revision("proj", "refs/heads/main", "r1");

        let config = loader.load(&key("/"))?.unwrap();
        assert_eq!(config.revision.as_deref(), Some("r1"));
        assert_eq!(repo.ref_reads.load(Ordering::Relaxed), 0);
        Ok(())
    }

    #[test]
    fn test_cancellation_aborts_loads() {
        let mut inner = InMemoryRepositoryProvider::new();
        inner.add_ref("proj", "refs/heads/main", "r1");
        inner.add_file("proj", "r1", "/OWNERS", "alice@example.com\n");
        let repo = CountingRepo::new(inner);

        let cancel = CancelFlag::new();
        let loader = ConfigLoader::new(&repo, &FIND_OWNERS_BACKEND, cancel.clone());
        cancel.cancel();

        assert!(matches!(loader.load(&key("/")), Err(Error::Canceled)));
        assert_eq!(repo.blob_reads.load(Ordering::Relaxed), 0);
    }
}
