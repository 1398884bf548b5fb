//! # Git Repository Provider
//!
//! Concrete repository provider over local Git repositories, mapping project
//! names to repository paths. Revisions are commit or tree ids; every lookup
//! peels to the tree, so the synthetic auto-merge result (a bare tree id)
//! flows through the same code paths as a regular commit.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use git2::{
    Delta, DiffFindOptions, DiffOptions, ErrorCode, IndexEntry, IndexTime, ObjectType, Oid,
    Repository, Tree, TreeWalkMode, TreeWalkResult,
};

use super::providers::RepositoryProvider;
use super::types::{ChangeKind, ChangedFile};
use crate::utils::error::{Error, Result};

const DEFAULT_FILE_MODE: u32 = 0o100644;

pub struct GitRepositoryProvider {
    projects: HashMap<String, PathBuf>,
}

impl GitRepositoryProvider {
    pub fn new() -> Self {
        Self {
            projects: HashMap::new(),
        }
    }

    /// Map a project name to a repository path (bare or with worktree).
    pub fn add_project<P: Into<PathBuf>>(&mut self, name: &str, path: P) {
        self.projects.insert(name.to_string(), path.into());
    }

    fn open(&self, project: &str) -> Result<Repository> {
        let path = self.projects.get(project).ok_or_else(|| {
            Error::repository(&format!("unknown project {}", project))
        })?;
        Repository::open(path)
            .map_err(|e| Error::with_source("failed to open repository", Box::new(e)))
    }

    /// Peel a revision string to its tree. Accepts commit and tree ids.
    fn tree_of<'r>(&self, repo: &'r Repository, revision: &str) -> Result<Tree<'r>> {
        let oid = Oid::from_str(revision)
            .map_err(|_| Error::repository(&format!("malformed revision {}", revision)))?;
        let object = repo.find_object(oid, None)?;
        let peeled = object.peel(ObjectType::Tree)?;
        peeled
            .into_tree()
            .map_err(|_| Error::repository(&format!("revision {} has no tree", revision)))
    }
}

impl Default for GitRepositoryProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl RepositoryProvider for GitRepositoryProvider {
    fn project_exists(&self, project: &str) -> bool {
        self.projects.contains_key(project)
    }

    fn resolve_ref(&self, project: &str, ref_name: &str) -> Result<Option<String>> {
        let repo = self.open(project)?;
        match repo.refname_to_id(ref_name) {
            Ok(oid) => Ok(Some(oid.to_string())),
            Err(e) if e.code() == ErrorCode::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn read_blob(&self, project: &str, revision: &str, path: &str) -> Result<Option<Vec<u8>>> {
        let repo = self.open(project)?;
        let tree = self.tree_of(&repo, revision)?;

        let relative = path.trim_start_matches('/');
        let entry = match tree.get_path(Path::new(relative)) {
            Ok(entry) => entry,
            Err(e) if e.code() == ErrorCode::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        if entry.kind() != Some(ObjectType::Blob) {
            return Ok(None);
        }

        let blob = repo.find_blob(entry.id())?;
        Ok(Some(blob.content().to_vec()))
    }

    fn walk_tree(&self, project: &str, revision: &str) -> Result<Vec<String>> {
        let repo = self.open(project)?;
        let tree = self.tree_of(&repo, revision)?;

        let mut paths = Vec::new();
        tree.walk(TreeWalkMode::PreOrder, |root, entry| {
            if entry.kind() == Some(ObjectType::Blob) {
                if let Some(name) = entry.name() {
                    paths.push(format!("/{}{}", root, name));
                }
            }
            TreeWalkResult::Ok
        })?;

        paths.sort();
        Ok(paths)
    }

    fn diff(
        &self, project: &str, revision: &str, base: Option<&str>, detect_renames: bool,
    ) -> Result<Vec<ChangedFile>> {
        let repo = self.open(project)?;
        let new_tree = self.tree_of(&repo, revision)?;
        let old_tree = base.map(|b| self.tree_of(&repo, b)).transpose()?;

        let mut options = DiffOptions::new();
        let mut diff = repo.diff_tree_to_tree(
            old_tree.as_ref(),
            Some(&new_tree),
            Some(&mut options),
        )?;

        if detect_renames {
            let mut find = DiffFindOptions::new();
            find.renames(true);
            diff.find_similar(Some(&mut find))?;
        }

        let mut files = Vec::new();
        for delta in diff.deltas() {
            let new_path = delta
                .new_file()
                .path()
                .map(|p| format!("/{}", p.to_string_lossy()));
            let old_path = delta
                .old_file()
                .path()
                .map(|p| format!("/{}", p.to_string_lossy()));

            let file = match delta.status() {
                Delta::Added => ChangedFile {
                    new_path,
                    old_path: None,
                    kind: ChangeKind::Add,
                },
                Delta::Deleted => ChangedFile {
                    new_path: None,
                    old_path,
                    kind: ChangeKind::Delete,
                },
                Delta::Modified | Delta::Typechange => ChangedFile {
                    new_path,
                    old_path,
                    kind: ChangeKind::Modify,
                },
                Delta::Renamed => ChangedFile {
                    new_path,
                    old_path,
                    kind: ChangeKind::Rename,
                },
                Delta::Copied => ChangedFile {
                    new_path,
                    old_path,
                    kind: ChangeKind::Copy,
                },
                _ => continue,
            };
            files.push(file);
        }

        files.sort_by(|a, b| a.sort_path().cmp(b.sort_path()));
        Ok(files)
    }

    fn parents(&self, project: &str, revision: &str) -> Result<Vec<String>> {
        let repo = self.open(project)?;
        let oid = Oid::from_str(revision)
            .map_err(|_| Error::repository(&format!("malformed revision {}", revision)))?;

        match repo.find_commit(oid) {
            Ok(commit) => Ok(commit.parent_ids().map(|id| id.to_string()).collect()),
            // Tree revisions (e.g. an auto-merge result) have no parents.
            Err(e) if e.code() == ErrorCode::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn auto_merge(&self, project: &str, merge_revision: &str) -> Result<String> {
        let repo = self.open(project)?;
        let oid = Oid::from_str(merge_revision).map_err(|_| {
            Error::repository(&format!("malformed revision {}", merge_revision))
        })?;
        let commit = repo.find_commit(oid)?;
        if commit.parent_count() < 2 {
            return Err(Error::repository(&format!(
                "revision {} is not a merge commit",
                merge_revision
            )));
        }

        let ours = commit.parent(0)?;
        let theirs = commit.parent(1)?;
        let mut index = repo.merge_commits(&ours, &theirs, None)?;

        if index.has_conflicts() {
            // Replace each conflict with conflict-marked content, the same
            // shape the review UI shows for unresolved merges.
            let mut replacements = Vec::new();
            for conflict in index.conflicts()? {
                let conflict = conflict?;
                let side = conflict.our.as_ref().or(conflict.their.as_ref());
                let Some(side) = side else { continue };
                let path = side.path.clone();
                let mode = side.mode;

                let our_content = match &conflict.our {
                    Some(entry) => repo.find_blob(entry.id)?.content().to_vec(),
                    None => Vec::new(),
                };
                let their_content = match &conflict.their {
                    Some(entry) => repo.find_blob(entry.id)?.content().to_vec(),
                    None => Vec::new(),
                };

                let mut merged = Vec::new();
                merged.extend_from_slice(b"<<<<<<< ours\n");
                merged.extend_from_slice(&our_content);
                merged.extend_from_slice(b"=======\n");
                merged.extend_from_slice(&their_content);
                merged.extend_from_slice(b">>>>>>> theirs\n");

                replacements.push((path, mode, merged));
            }

            for (path, mode, content) in replacements {
                let path_str = String::from_utf8_lossy(&path).to_string();
                index.remove_path(Path::new(&path_str))?;

                // The merge index is not repository-backed, so the blob is
                // written explicitly and added as a stage-0 entry.
                let blob_id = repo.blob(&content)?;
                let entry = IndexEntry {
                    ctime: IndexTime::new(0, 0),
                    mtime: IndexTime::new(0, 0),
                    dev: 0,
                    ino: 0,
                    mode: if mode == 0 { DEFAULT_FILE_MODE } else { mode },
                    uid: 0,
                    gid: 0,
                    file_size: content.len() as u32,
                    id: blob_id,
                    flags: 0,
                    flags_extended: 0,
                    path,
                };
                index.add(&entry)?;
            }
        }

        let tree_oid = index.write_tree_to(&repo)?;
        Ok(tree_oid.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    /// Build a tree from `(relative path, content)` pairs, recursing into
    /// subdirectories.
    fn build_tree(repo: &Repository, files: &[(String, String)]) -> Result<Oid> {
        use std::collections::BTreeMap;

        let mut subdirs: BTreeMap<String, Vec<(String, String)>> = BTreeMap::new();
        let mut builder = repo.treebuilder(None)?;

        for (path, content) in files {
            match path.split_once('/') {
                None => {
                    let blob = repo.blob(content.as_bytes())?;
                    builder.insert(path, blob, DEFAULT_FILE_MODE as i32)?;
                }
                Some((dir, rest)) => {
                    subdirs
                        .entry(dir.to_string())
                        .or_default()
                        .push((rest.to_string(), content.clone()));
                }
            }
        }

        for (dir, entries) in subdirs {
            let subtree = build_tree(repo, &entries)?;
            builder.insert(&dir, subtree, 0o040000)?;
        }

        Ok(builder.write()?)
    }

    fn commit(
        repo: &Repository, parents: &[&git2::Commit<'_>], files: &[(&str, &str)],
    ) -> Result<Oid> {
        let files: Vec<(String, String)> = files
            .iter()
            .map(|(path, content)| {
                (path.trim_start_matches('/').to_string(), content.to_string())
            })
            .collect();
        let tree = repo.find_tree(build_tree(repo, &files)?)?;

        let signature = git2::Signature::now("Test", "test@example.com")
            .map_err(|e| Error::with_source("signature", Box::new(e)))?;
        Ok(repo.commit(None, &signature, &signature, "test commit", &tree, parents)?)
    }

    fn fixture() -> Result<(TempDir, GitRepositoryProvider, Oid)> {
        let dir = TempDir::new()?;
        let repo = Repository::init_bare(dir.path())?;

        let root = commit(
            &repo,
            &[],
            &[
                ("/OWNERS", "alice@example.com\n"),
                ("/src/lib.rs", "pub fn lib() {}\n"),
                ("/src/OWNERS", "bob@example.com\n"),
            ],
        )?;
        repo.reference("refs/heads/main", root, true, "test")?;

        let mut provider = GitRepositoryProvider::new();
        provider.add_project("proj", dir.path());
        Ok((dir, provider, root))
    }

    #[test]
    fn test_resolve_ref() -> Result<()> {
        let (_dir, provider, root) = fixture()?;

        assert_eq!(
            provider.resolve_ref("proj", "refs/heads/main")?,
            Some(root.to_string())
        );
        assert_eq!(provider.resolve_ref("proj", "refs/heads/missing")?, None);
        assert!(provider.resolve_ref("unknown", "refs/heads/main").is_err());
        Ok(())
    }

    #[test]
    fn test_read_blob() -> Result<()> {
        let (_dir, provider, root) = fixture()?;
        let revision = root.to_string();

        assert_eq!(
            provider.read_blob("proj", &revision, "/OWNERS")?,
            Some(b"alice@example.com\n".to_vec())
        );
        assert_eq!(
            provider.read_blob("proj", &revision, "/src/OWNERS")?,
            Some(b"bob@example.com\n".to_vec())
        );
        assert_eq!(provider.read_blob("proj", &revision, "/missing")?, None);
        // A directory path is not a blob.
        assert_eq!(provider.read_blob("proj", &revision, "/src")?, None);
        Ok(())
    }

    #[test]
    fn test_walk_tree() -> Result<()> {
        let (_dir, provider, root) = fixture()?;

        assert_eq!(
            provider.walk_tree("proj", &root.to_string())?,
            vec![
                "/OWNERS".to_string(),
                "/src/OWNERS".to_string(),
                "/src/lib.rs".to_string(),
            ]
        );
        Ok(())
    }

    #[test]
    fn test_diff_and_rename_handling() -> Result<()> {
        let (dir, provider, root) = fixture()?;
        let repo = Repository::open(dir.path())?;
        let root_commit = repo.find_commit(root)?;

        let tip = commit(
            &repo,
            &[&root_commit],
            &[
                ("/OWNERS", "alice@example.com\n"),
                // /src/lib.rs renamed, /src/OWNERS modified
                ("/src/renamed.rs", "pub fn lib() {}\n"),
                ("/src/OWNERS", "bob@example.com\ncarol@example.com\n"),
            ],
        )?;

        let files = provider.diff("proj", &tip.to_string(), Some(&root.to_string()), false)?;
        assert_eq!(
            files,
            vec![
                ChangedFile::modified("/src/OWNERS"),
                ChangedFile::deleted("/src/lib.rs"),
                ChangedFile::added("/src/renamed.rs"),
            ]
        );

        let files = provider.diff("proj", &tip.to_string(), Some(&root.to_string()), true)?;
        assert!(files.iter().any(|f| f.kind == ChangeKind::Rename
            && f.old_path.as_deref() == Some("/src/lib.rs")
            && f.new_path.as_deref() == Some("/src/renamed.rs")));
        Ok(())
    }

    #[test]
    fn test_parents_and_auto_merge() -> Result<()> {
        let (dir, provider, root) = fixture()?;
        let repo = Repository::open(dir.path())?;
        let root_commit = repo.find_commit(root)?;

        let left = commit(
            &repo,
            &[&root_commit],
            &[
                ("/OWNERS", "alice@example.com\n"),
                ("/src/lib.rs", "pub fn lib() {}\n"),
                ("/src/OWNERS", "bob@example.com\n"),
                ("/left.txt", "left\n"),
            ],
        )?;
        let right = commit(
            &repo,
            &[&root_commit],
            &[
                ("/OWNERS", "alice@example.com\n"),
                ("/src/lib.rs", "pub fn lib() {}\n"),
                ("/src/OWNERS", "bob@example.com\n"),
                ("/right.txt", "right\n"),
            ],
        )?;
        let left_commit = repo.find_commit(left)?;
        let right_commit = repo.find_commit(right)?;
        let merge = commit(
            &repo,
            &[&left_commit, &right_commit],
            &[
                ("/OWNERS", "alice@example.com\n"),
                ("/src/lib.rs", "pub fn lib() {}\n"),
                ("/src/OWNERS", "bob@example.com\n"),
                ("/left.txt", "left\n"),
                ("/right.txt", "right\n"),
            ],
        )?;

        assert_eq!(
            provider.parents("proj", &merge.to_string())?,
            vec![left.to_string(), right.to_string()]
        );

        // The auto-merge of a clean merge holds both sides; diffing the
        // merge against it shows no changes.
        let auto = provider.auto_merge("proj", &merge.to_string())?;
        let files = provider.diff("proj", &merge.to_string(), Some(&auto), false)?;
        assert!(files.is_empty());

        assert!(provider.auto_merge("proj", &left.to_string()).is_err());
        Ok(())
    }
}
