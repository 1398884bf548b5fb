//! # Changed-File Extraction
//!
//! Produces the ordered list of changed files the status engine consumes,
//! either by diffing the revision on the spot or by consulting the host's
//! pre-computed diff cache. For merge commits the recompute mode picks the
//! base per the configured strategy: the first parent, or the auto-merge
//! commit when only conflict-resolved files should need approval. Both modes
//! drop synthetic meta paths and return the same structure, sorted by path.

use super::loader::CancelFlag;
use super::policy::MergeCommitStrategy;
use super::providers::{DiffCache, RepositoryProvider};
use super::types::ChangedFile;
use crate::utils::error::Result;

/// Sentinel emitted by diffs for an absent side of a file pair.
const DEV_NULL: &str = "/dev/null";

/// Paths that do not exist in the tree but show up in review diffs.
pub fn default_is_meta_path(path: &str) -> bool {
    matches!(path, "/COMMIT_MSG" | "/MERGE_LIST" | "/PATCHSET_LEVEL")
}

pub struct ChangedFilesExtractor<'a> {
    repos: &'a dyn RepositoryProvider,
    cancel: CancelFlag,
    is_meta_path: &'a (dyn Fn(&str) -> bool + Send + Sync),
}

impl<'a> ChangedFilesExtractor<'a> {
    pub fn new(repos: &'a dyn RepositoryProvider, cancel: CancelFlag) -> Self {
        Self {
            repos,
            cancel,
            is_meta_path: &default_is_meta_path,
        }
    }

    /// Replace the meta-path predicate; the exact set of synthetic paths is
    /// host-specific.
    pub fn with_meta_path_predicate(
        mut self, is_meta_path: &'a (dyn Fn(&str) -> bool + Send + Sync),
    ) -> Self {
        self.is_meta_path = is_meta_path;
        self
    }

    /// Diff the revision against its base. Initial commits diff against the
    /// empty tree; merge commits pick the base per the strategy. Renames are
    /// not detected, so they surface as a delete plus an add.
    pub fn recompute(
        &self, project: &str, revision: &str, strategy: MergeCommitStrategy,
    ) -> Result<Vec<ChangedFile>> {
        self.cancel.check()?;
        let parents = self.repos.parents(project, revision)?;

        let base = match parents.as_slice() {
            [] => None,
            [only] => Some(only.clone()),
            [first, ..] => match strategy {
                MergeCommitStrategy::AllChangedFiles => Some(first.clone()),
                MergeCommitStrategy::FilesWithConflictResolution => {
                    self.cancel.check()?;
                    Some(self.repos.auto_merge(project, revision)?)
                }
            },
        };

        self.cancel.check()?;
        let files = self.repos.diff(project, revision, base.as_deref(), false)?;
        Ok(self.normalize(files))
    }

    /// Consult the host's pre-computed diff for `(project, revision,
    /// parent)`; `None` parent selects the default base. Rename detection is
    /// the cache's business. Returns `None` on a cache miss.
    pub fn from_cache(
        &self, cache: &dyn DiffCache, project: &str, revision: &str, parent: Option<u32>,
    ) -> Result<Option<Vec<ChangedFile>>> {
        self.cancel.check()?;
        Ok(cache
            .lookup(project, revision, parent)
            .map(|files| self.normalize(files)))
    }

    /// Shared post-processing: `/dev/null` sides become absence, meta paths
    /// are dropped, and the result is sorted by path.
    fn normalize(&self, files: Vec<ChangedFile>) -> Vec<ChangedFile> {
        let mut files: Vec<ChangedFile> = files
            .into_iter()
            .map(|mut file| {
                if file.new_path.as_deref() == Some(DEV_NULL) {
                    file.new_path = None;
                }
                if file.old_path.as_deref() == Some(DEV_NULL) {
                    file.old_path = None;
                }
                file
            })
            .filter(|file| {
                let meta = file
                    .new_path
                    .as_deref()
                    .or(file.old_path.as_deref())
                    .map(|path| (self.is_meta_path)(path))
                    .unwrap_or(true);
                !meta
            })
            .collect();

        files.sort_by(|a, b| a.sort_path().cmp(b.sort_path()));
        files
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::providers::InMemoryRepositoryProvider;
    use crate::core::types::ChangeKind;
    use crate::utils::error::Error;
    use std::collections::HashMap;

    fn extractor(repo: &InMemoryRepositoryProvider) -> ChangedFilesExtractor<'_> {
        ChangedFilesExtractor::new(repo, CancelFlag::new())
    }

    #[test]
    fn test_recompute_against_first_parent() -> Result<()> {
        let mut repo = InMemoryRepositoryProvider::new();
        repo.add_file("proj", "base", "/a.txt", "old");
        repo.add_file("proj", "tip", "/a.txt", "new");
        repo.add_file("proj", "tip", "/b.txt", "added");
        repo.set_parents("proj", "tip", &["base"]);

        let files = extractor(&repo).recompute(
            "proj",
            "tip",
            MergeCommitStrategy::AllChangedFiles,
        )?;
        assert_eq!(
            files,
            vec![ChangedFile::modified("/a.txt"), ChangedFile::added("/b.txt")]
        );
        Ok(())
    }

    #[test]
    fn test_recompute_initial_commit_diffs_against_empty_tree() -> Result<()> {
        let mut repo = InMemoryRepositoryProvider::new();
        repo.add_file("proj", "tip", "/a.txt", "content");

        let files = extractor(&repo).recompute(
            "proj",
            "tip",
            MergeCommitStrategy::AllChangedFiles,
        )?;
        assert_eq!(files, vec![ChangedFile::added("/a.txt")]);
        Ok(())
    }

    #[test]
    fn test_recompute_rename_surfaces_as_delete_plus_add() -> Result<()> {
        let mut repo = InMemoryRepositoryProvider::new();
        repo.add_file("proj", "base", "/a.txt", "same content");
        repo.add_file("proj", "tip", "/b.txt", "same content");
        repo.set_parents("proj", "tip", &["base"]);

        let files = extractor(&repo).recompute(
            "proj",
            "tip",
            MergeCommitStrategy::AllChangedFiles,
        )?;
        assert_eq!(
            files,
            vec![
                ChangedFile::deleted("/a.txt"),
                ChangedFile::added("/b.txt"),
            ]
        );
        Ok(())
    }

    #[test]
    fn test_merge_commit_base_selection() -> Result<()> {
        let mut repo = InMemoryRepositoryProvider::new();
        // p1 already has /from-p2.txt's sibling change; the auto-merge holds
        // the combined content.
        repo.add_file("proj", "p1", "/a.txt", "a");
        repo.add_file("proj", "p2", "/b.txt", "b");
        repo.add_file("proj", "automerge", "/a.txt", "a");
        repo.add_file("proj", "automerge", "/b.txt", "b");
        repo.add_file("proj", "merge", "/a.txt", "a");
        repo.add_file("proj", "merge", "/b.txt", "b");
        repo.add_file("proj", "merge", "/resolved.txt", "conflict resolution");
        repo.set_parents("proj", "merge", &["p1", "p2"]);
        repo.set_auto_merge("proj", "merge", "automerge");

        // First-parent strategy sees everything p1 did not have.
        let all = extractor(&repo).recompute(
            "proj",
            "merge",
            MergeCommitStrategy::AllChangedFiles,
        )?;
        assert_eq!(
            all,
            vec![
                ChangedFile::added("/b.txt"),
                ChangedFile::added("/resolved.txt"),
            ]
        );

        // Auto-merge strategy sees only the conflict resolution.
        let conflict_only = extractor(&repo).recompute(
            "proj",
            "merge",
            MergeCommitStrategy::FilesWithConflictResolution,
        )?;
        assert_eq!(conflict_only, vec![ChangedFile::added("/resolved.txt")]);
        Ok(())
    }

    struct MapDiffCache(HashMap<(String, String, Option<u32>), Vec<ChangedFile>>);

    impl DiffCache for MapDiffCache {
        fn lookup(
            &self, project: &str, revision: &str, parent: Option<u32>,
        ) -> Option<Vec<ChangedFile>> {
            self.0
                .get(&(project.to_string(), revision.to_string(), parent))
                .cloned()
        }
    }

    #[test]
    fn test_cache_mode_filters_meta_paths_and_sorts() -> Result<()> {
        let repo = InMemoryRepositoryProvider::new();
        let cache = MapDiffCache(HashMap::from([(
            ("proj".to_string(), "tip".to_string(), None),
            vec![
                ChangedFile::modified("/z.txt"),
                ChangedFile::modified("/COMMIT_MSG"),
                ChangedFile::added("/a.txt"),
                ChangedFile::modified("/MERGE_LIST"),
            ],
        )]));

        let files = extractor(&repo)
            .from_cache(&cache, "proj", "tip", None)?
            .ok_or_else(|| Error::new("expected cache hit"))?;
        assert_eq!(
            files,
            vec![
                ChangedFile::added("/a.txt"),
                ChangedFile::modified("/z.txt"),
            ]
        );

        assert!(extractor(&repo).from_cache(&cache, "proj", "other", None)?.is_none());
        Ok(())
    }

    #[test]
    fn test_dev_null_sides_become_absence() -> Result<()> {
        let repo = InMemoryRepositoryProvider::new();
        let cache = MapDiffCache(HashMap::from([(
            ("proj".to_string(), "tip".to_string(), None),
            vec![ChangedFile {
                new_path: Some("/a.txt".to_string()),
                old_path: Some("/dev/null".to_string()),
                kind: ChangeKind::Add,
            }],
        )]));

        let files = extractor(&repo)
            .from_cache(&cache, "proj", "tip", None)?
            .ok_or_else(|| Error::new("expected cache hit"))?;
        assert_eq!(files, vec![ChangedFile::added("/a.txt")]);
        Ok(())
    }
}
