//! # Path Code Owners Resolution
//!
//! Given one OWNERS config and a target path, produce a resolved view of the
//! config in which only material relevant for that path remains: global
//! rules, per-file rules whose expressions match, and everything pulled in
//! through imports. Import expansion is breadth-first with a visited set, so
//! import cycles terminate silently. Imports that cannot be resolved never
//! fail the resolution; they are collected as diagnostics.

use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;

use super::loader::ConfigLoader;
use super::matcher::{self, PathExpressionMatcher};
use super::paths;
use super::types::{
    CodeOwnerConfig, CodeOwnerReference, CodeOwnerSet, ConfigKey, ConfigRef, ImportMode,
};
use crate::utils::error::{Error, Result};

/// An import that could not be applied, with the reason. Diagnostic only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnresolvedImport {
    /// The config that declared the import.
    pub importing: ConfigKey,
    pub import: ConfigRef,
    pub reason: String,
}

impl UnresolvedImport {
    /// Human-readable warning shown to administrators.
    pub fn message(&self) -> String {
        format!(
            "cannot resolve import '{}' declared in {}: {}",
            self.import,
            self.importing.file_path(),
            self.reason
        )
    }
}

/// The outcome of resolving one config against one path.
#[derive(Debug, Clone)]
pub struct PathCodeOwners {
    /// The target path the resolution was computed for.
    pub path: String,
    /// The resolved config: imports applied, irrelevant per-file rules
    /// dropped.
    pub config: CodeOwnerConfig,
    pub unresolved_imports: Vec<UnresolvedImport>,
}

impl PathCodeOwners {
    /// All owner references relevant for the path.
    pub fn owners(&self) -> BTreeSet<CodeOwnerReference> {
        self.config
            .code_owner_sets
            .iter()
            .flat_map(|set| set.code_owners.iter().cloned())
            .collect()
    }

    pub fn ignore_parent_code_owners(&self) -> bool {
        self.config.ignore_parent_code_owners
    }
}

/// Resolves configs against paths using a request-scoped loader and the
/// policy-selected expression matcher.
pub struct PathOwnersResolver<'a> {
    loader: &'a ConfigLoader<'a>,
    matcher: &'static dyn PathExpressionMatcher,
}

impl<'a> PathOwnersResolver<'a> {
    pub fn new(
        loader: &'a ConfigLoader<'a>, matcher: &'static dyn PathExpressionMatcher,
    ) -> Self {
        Self { loader, matcher }
    }

    /// Resolve `config` for `path` (absolute). The path must live below the
    /// config's folder.
    pub fn resolve(&self, config: &CodeOwnerConfig, path: &str) -> Result<PathCodeOwners> {
        let path = paths::normalize_absolute(path)?;
        let relative = paths::relative_to(&config.key.folder_path, &path).ok_or_else(|| {
            Error::invalid_path(
                &path,
                &format!("not under config folder {}", config.key.folder_path),
            )
        })?;

        let mut unresolved = Vec::new();
        let mut ignore_parent = config.ignore_parent_code_owners;

        // Result sets with the key of the config they came from, so that
        // relative per-file imports resolve against the right folder.
        let mut sets: Vec<(CodeOwnerSet, ConfigKey)> = config
            .code_owner_sets
            .iter()
            .filter(|set| self.set_applies(set, &relative))
            .map(|set| (set.clone(), config.key.clone()))
            .collect();

        // Expand global imports breadth-first, deduplicated by config key.
        let mut seen = BTreeSet::from([config.key.clone()]);
        let mut queue: VecDeque<(ConfigKey, ConfigRef, ImportMode)> = config
            .imports
            .iter()
            .map(|import| (config.key.clone(), import.clone(), import.mode))
            .collect();

        while let Some((importing, import, mode)) = queue.pop_front() {
            self.loader.cancel_flag().check()?;

            let key = match import.resolve(&importing) {
                Ok(key) => key,
                Err(err) => {
                    unresolved.push(UnresolvedImport {
                        importing,
                        import,
                        reason: err.to_string(),
                    });
                    continue;
                }
            };
            if !seen.insert(key.clone()) {
                continue;
            }

            let Some(imported) = self.load_import(&importing, &import, &key, &mut unresolved)?
            else {
                continue;
            };

            if mode.imports_ignore_parent_flag() && imported.ignore_parent_code_owners {
                ignore_parent = true;
            }

            for set in &imported.code_owner_sets {
                if set.is_global() {
                    sets.push((set.clone(), key.clone()));
                } else if mode.imports_per_file_sets() && self.set_applies(set, &relative) {
                    sets.push((set.clone(), key.clone()));
                }
            }

            if mode.follows_transitive_imports() {
                for transitive in &imported.imports {
                    let effective = if mode == ImportMode::GlobalOnly {
                        ImportMode::GlobalOnly
                    } else {
                        transitive.mode
                    };
                    queue.push_back((key.clone(), transitive.clone(), effective));
                }
            }
        }

        // A matching per-file rule that ignores global and parent owners
        // drops every global rule and stops parent inheritance.
        if sets
            .iter()
            .any(|(set, _)| !set.is_global() && set.ignore_global_and_parent_owners)
        {
            ignore_parent = true;
            sets.retain(|(set, _)| !set.is_global());
        }

        // Expand per-file imports: global owners of the referenced configs
        // are merged into the importing per-file rule.
        for (set, origin) in sets.iter_mut() {
            if set.is_global() {
                continue;
            }
            self.expand_per_file_imports(set, origin, &mut unresolved)?;
        }

        let mut resolved = CodeOwnerConfig::new(config.key.clone());
        resolved.revision = config.revision.clone();
        resolved.ignore_parent_code_owners = ignore_parent;
        resolved.code_owner_sets = sets.into_iter().map(|(set, _)| set).collect();

        Ok(PathCodeOwners {
            path,
            config: resolved,
            unresolved_imports: unresolved,
        })
    }

    fn set_applies(&self, set: &CodeOwnerSet, relative: &str) -> bool {
        set.is_global() || matcher::matches_any(self.matcher, &set.path_expressions, relative)
    }

    /// Merge the global owners of every config reachable through the set's
    /// imports into the set itself.
    fn expand_per_file_imports(
        &self, set: &mut CodeOwnerSet, origin: &ConfigKey,
        unresolved: &mut Vec<UnresolvedImport>,
    ) -> Result<()> {
        let mut seen = BTreeSet::from([origin.clone()]);
        let mut queue: VecDeque<(ConfigKey, ConfigRef)> = std::mem::take(&mut set.imports)
            .into_iter()
            .map(|import| (origin.clone(), import))
            .collect();

        while let Some((importing, import)) = queue.pop_front() {
            self.loader.cancel_flag().check()?;

            let key = match import.resolve(&importing) {
                Ok(key) => key,
                Err(err) => {
                    unresolved.push(UnresolvedImport {
                        importing,
                        import,
                        reason: err.to_string(),
                    });
                    continue;
                }
            };
            if !seen.insert(key.clone()) {
                continue;
            }

            let Some(imported) = self.load_import(&importing, &import, &key, unresolved)?
            else {
                continue;
            };

            for imported_set in &imported.code_owner_sets {
                if imported_set.is_global() {
                    set.code_owners
                        .extend(imported_set.code_owners.iter().cloned());
                    for (owner, annotations) in &imported_set.annotations {
                        set.annotations
                            .entry(owner.clone())
                            .or_default()
                            .extend(annotations.iter().cloned());
                    }
                }
            }

            for transitive in &imported.imports {
                queue.push_back((key.clone(), transitive.clone()));
            }
        }

        Ok(())
    }

    /// Load an imported config, converting every absence into an unresolved
    /// diagnostic: missing project, missing branch, missing file, or a file
    /// that fails to parse. Only infrastructure failures propagate.
    fn load_import(
        &self, importing: &ConfigKey, import: &ConfigRef, key: &ConfigKey,
        unresolved: &mut Vec<UnresolvedImport>,
    ) -> Result<Option<Arc<CodeOwnerConfig>>> {
        let mut record = |reason: String| {
            unresolved.push(UnresolvedImport {
                importing: importing.clone(),
                import: import.clone(),
                reason,
            });
        };

        if !self.loader.project_exists(&key.project) {
            record(format!("project {} not found", key.project));
            return Ok(None);
        }

        let revision = match self.loader.sticky_revision(&key.project, &key.branch)? {
            Some(revision) => revision,
            None => {
                record(format!(
                    "branch {} not found in project {}",
                    key.branch, key.project
                ));
                return Ok(None);
            }
        };

        match self.loader.load_at(key, &revision) {
            Ok(Some(config)) => Ok(Some(config)),
            Ok(None) => {
                record(format!(
                    "file {} not found at revision {}",
                    key.file_path(),
                    revision
                ));
                Ok(None)
            }
            Err(err @ Error::ConfigInvalid { .. }) => {
                record(err.to_string());
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::backend::{CodeOwnersBackend, FIND_OWNERS_BACKEND};
    use crate::core::loader::CancelFlag;
    use crate::core::matcher::PathExpressionDialect;
    use crate::core::providers::InMemoryRepositoryProvider;

    fn repo_with(files: &[(&str, &str)]) -> InMemoryRepositoryProvider {
        let mut repo = InMemoryRepositoryProvider::new();
        repo.add_ref("proj", "refs/heads/main", "r1");
        for (path, content) in files {
            repo.add_file("proj", "r1", path, content);
        }
        repo
    }

    fn resolve_for(
        repo: &InMemoryRepositoryProvider, config_path: &str, target: &str,
    ) -> Result<PathCodeOwners> {
        let loader = ConfigLoader::new(repo, &FIND_OWNERS_BACKEND, CancelFlag::new());
        let (folder, file_name) = paths::split_folder_file(config_path)?;
        let key = ConfigKey::new("proj", "refs/heads/main", &folder, &file_name);
        let config = loader
            .load(&key)?
            .ok_or_else(|| Error::new("missing fixture config"))?;

        let resolver =
            PathOwnersResolver::new(&loader, PathExpressionDialect::Glob.matcher());
        resolver.resolve(&config, target)
    }

    fn emails(owners: &BTreeSet<CodeOwnerReference>) -> Vec<String> {
        owners.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn test_keeps_globals_and_matching_per_file_sets() -> Result<()> {
        let repo = repo_with(&[(
            "/OWNERS",
            "alice@example.com\nper-file *.py=bob@example.com\nper-file *.md=carol@example.com\n",
        )]);

        let resolved = resolve_for(&repo, "/OWNERS", "/tools/run.py")?;
        assert_eq!(
            emails(&resolved.owners()),
            vec!["alice@example.com", "bob@example.com"]
        );
        assert!(!resolved.ignore_parent_code_owners());
        assert!(resolved.unresolved_imports.is_empty());
        Ok(())
    }

    #[test]
    fn test_per_file_noparent_drops_globals() -> Result<()> {
        let repo = repo_with(&[(
            "/sub/OWNERS",
            "alice@example.com\nper-file *.py=set noparent\nper-file *.py=bob@example.com\n",
        )]);

        let resolved = resolve_for(&repo, "/sub/OWNERS", "/sub/s.py")?;
        assert_eq!(emails(&resolved.owners()), vec!["bob@example.com"]);
        assert!(resolved.ignore_parent_code_owners());

        // A path the per-file rules do not match keeps the global owners.
        let resolved = resolve_for(&repo, "/sub/OWNERS", "/sub/readme.md")?;
        assert_eq!(emails(&resolved.owners()), vec!["alice@example.com"]);
        assert!(!resolved.ignore_parent_code_owners());
        Ok(())
    }

    #[test]
    fn test_include_imports_everything() -> Result<()> {
        let repo = repo_with(&[
            ("/OWNERS", "include /build/OWNERS\nalice@example.com\n"),
            (
                "/build/OWNERS",
                "set noparent\nbob@example.com\nper-file *.py=carol@example.com\n",
            ),
        ]);

        let resolved = resolve_for(&repo, "/OWNERS", "/x.py")?;
        assert_eq!(
            emails(&resolved.owners()),
            vec![
                "alice@example.com",
                "bob@example.com",
                "carol@example.com"
            ]
        );
        // The imported ignore-parent flag takes effect in ALL mode.
        assert!(resolved.ignore_parent_code_owners());
        Ok(())
    }

    #[test]
    fn test_file_import_is_global_only() -> Result<()> {
        let repo = repo_with(&[
            ("/OWNERS", "file: /build/OWNERS\nalice@example.com\n"),
            (
                "/build/OWNERS",
                "set noparent\nbob@example.com\nper-file *.py=carol@example.com\n",
            ),
        ]);

        let resolved = resolve_for(&repo, "/OWNERS", "/x.py")?;
        // Only the global owners come through; neither the per-file rule nor
        // the ignore-parent flag does.
        assert_eq!(
            emails(&resolved.owners()),
            vec!["alice@example.com", "bob@example.com"]
        );
        assert!(!resolved.ignore_parent_code_owners());
        Ok(())
    }

    #[test]
    fn test_global_only_downgrade_applies_transitively() -> Result<()> {
        let repo = repo_with(&[
            ("/OWNERS", "file: /a/OWNERS\n"),
            ("/a/OWNERS", "include /b/OWNERS\nalice@example.com\n"),
            (
                "/b/OWNERS",
                "set noparent\nbob@example.com\nper-file *.py=carol@example.com\n",
            ),
        ]);

        let resolved = resolve_for(&repo, "/OWNERS", "/x.py")?;
        // /b is reached through a global-only chain: its global owners count,
        // its per-file rule and ignore-parent flag do not.
        assert_eq!(
            emails(&resolved.owners()),
            vec!["alice@example.com", "bob@example.com"]
        );
        assert!(!resolved.ignore_parent_code_owners());
        Ok(())
    }

    #[test]
    fn test_non_transitive_import_stops_following() -> Result<()> {
        let repo = repo_with(&[
            ("/OWNERS", "alice@example.com\n"),
            ("/a/OWNERS", "include /b/OWNERS\nbob@example.com\n"),
            ("/b/OWNERS", "carol@example.com\n"),
        ]);

        // Build the root config by hand to use the non-transitive mode,
        // which has no surface spelling in the grammar.
        let loader = ConfigLoader::new(&repo, &FIND_OWNERS_BACKEND, CancelFlag::new());
        let key = ConfigKey::new("proj", "refs/heads/main", "/", "OWNERS");
        let mut config = (*loader.load(&key)?.unwrap()).clone();
        config.imports.push(ConfigRef::new(
            None,
            None,
            "/a/OWNERS",
            ImportMode::AllWithoutTransitive,
        ));

        let resolver =
            PathOwnersResolver::new(&loader, PathExpressionDialect::Glob.matcher());
        let resolved = resolver.resolve(&config, "/x.txt")?;

        assert_eq!(
            emails(&resolved.owners()),
            vec!["alice@example.com", "bob@example.com"]
        );
        Ok(())
    }

    #[test]
    fn test_import_cycle_terminates() -> Result<()> {
        let repo = repo_with(&[
            ("/OWNERS", "include /a/OWNERS\nalice@example.com\n"),
            ("/a/OWNERS", "include /OWNERS\nbob@example.com\n"),
        ]);

        let resolved = resolve_for(&repo, "/OWNERS", "/x.txt")?;
        assert_eq!(
            emails(&resolved.owners()),
            vec!["alice@example.com", "bob@example.com"]
        );
        assert!(resolved.unresolved_imports.is_empty());
        Ok(())
    }

    #[test]
    fn test_unresolved_project_recorded_once() -> Result<()> {
        let repo = repo_with(&[("/OWNERS", "include proj2:/OWNERS\nalice@example.com\n")]);

        let resolved = resolve_for(&repo, "/OWNERS", "/x.txt")?;
        assert_eq!(emails(&resolved.owners()), vec!["alice@example.com"]);
        assert_eq!(resolved.unresolved_imports.len(), 1);
        assert!(
            resolved.unresolved_imports[0]
                .reason
                .contains("project proj2 not found")
        );
        Ok(())
    }

    #[test]
    fn test_unresolved_file_recorded_with_revision() -> Result<()> {
        let repo = repo_with(&[("/OWNERS", "include /missing/OWNERS\n")]);

        let resolved = resolve_for(&repo, "/OWNERS", "/x.txt")?;
        assert_eq!(resolved.unresolved_imports.len(), 1);
        let reason = &resolved.unresolved_imports[0].reason;
        assert!(reason.contains("/missing/OWNERS"));
        assert!(reason.contains("r1"));
        Ok(())
    }

    #[test]
    fn test_invalid_imported_config_is_diagnostic_not_error() -> Result<()> {
        let repo = repo_with(&[
            ("/OWNERS", "include /bad/OWNERS\nalice@example.com\n"),
            ("/bad/OWNERS", "definitely not owners syntax\n"),
        ]);

        let resolved = resolve_for(&repo, "/OWNERS", "/x.txt")?;
        assert_eq!(emails(&resolved.owners()), vec!["alice@example.com"]);
        assert_eq!(resolved.unresolved_imports.len(), 1);
        Ok(())
    }

    #[test]
    fn test_per_file_import_merges_owners_into_rule() -> Result<()> {
        let repo = repo_with(&[
            (
                "/OWNERS",
                "alice@example.com\nper-file *.py=file=/python/OWNERS\n",
            ),
            ("/python/OWNERS", "bob@example.com\nper-file *.txt=carol@example.com\n"),
        ]);

        let resolved = resolve_for(&repo, "/OWNERS", "/tool.py")?;
        // bob is merged into the *.py rule; carol's per-file rule in the
        // imported file does not come along.
        assert_eq!(
            emails(&resolved.owners()),
            vec!["alice@example.com", "bob@example.com"]
        );

        // For a non-matching path the per-file import contributes nothing.
        let resolved = resolve_for(&repo, "/OWNERS", "/readme.md")?;
        assert_eq!(emails(&resolved.owners()), vec!["alice@example.com"]);
        Ok(())
    }

    #[test]
    fn test_import_relative_path_resolves_against_importer_folder() -> Result<()> {
        let repo = repo_with(&[
            ("/sub/OWNERS", "include common/OWNERS\n"),
            ("/sub/common/OWNERS", "bob@example.com\n"),
        ]);

        let resolved = resolve_for(&repo, "/sub/OWNERS", "/sub/x.txt")?;
        assert_eq!(emails(&resolved.owners()), vec!["bob@example.com"]);
        Ok(())
    }

    #[test]
    fn test_resolution_is_deterministic() -> Result<()> {
        let repo = repo_with(&[
            ("/OWNERS", "include /a/OWNERS\ninclude /b/OWNERS\n"),
            ("/a/OWNERS", "alice@example.com\n"),
            ("/b/OWNERS", "bob@example.com\n"),
        ]);

        let first = resolve_for(&repo, "/OWNERS", "/x.txt")?;
        let second = resolve_for(&repo, "/OWNERS", "/x.txt")?;
        assert_eq!(first.config, second.config);
        assert_eq!(first.unresolved_imports, second.unresolved_imports);
        Ok(())
    }
}
