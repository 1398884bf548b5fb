//! # Config Hierarchy Walk
//!
//! Walks the OWNERS configs that apply to a path, from the innermost folder
//! up to the repository root, and finally the config on the ref that holds
//! default configuration when the walk was not stopped earlier. Each visited
//! config is resolved for the target path before the visitor sees it; a
//! resolved config that ignores parent owners ends the walk.

use super::loader::ConfigLoader;
use super::providers::RepositoryProvider;
use super::resolver::{PathCodeOwners, PathOwnersResolver};
use super::types::{ConfigKey, DEFAULT_CONFIG_REF};
use super::{matcher::PathExpressionMatcher, paths};
use crate::utils::error::Result;

/// Visitor verdict for each resolved config.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisitResult {
    Continue,
    Stop,
}

pub struct HierarchyWalker<'a> {
    loader: &'a ConfigLoader<'a>,
    resolver: PathOwnersResolver<'a>,
    file_name: String,
}

impl<'a> HierarchyWalker<'a> {
    pub fn new(
        loader: &'a ConfigLoader<'a>, matcher: &'static dyn PathExpressionMatcher,
        file_name: &str,
    ) -> Self {
        Self {
            loader,
            resolver: PathOwnersResolver::new(loader, matcher),
            file_name: file_name.to_string(),
        }
    }

    /// Visit every applicable config for `path` on `(project, branch)`,
    /// innermost first. The walk stops when the visitor says so or when a
    /// resolved config ignores parent owners; only when neither happens is
    /// the default-config ref visited as the final fallback.
    pub fn walk(
        &self, project: &str, branch: &str, path: &str,
        visitor: &mut dyn FnMut(&PathCodeOwners) -> Result<VisitResult>,
    ) -> Result<()> {
        for folder in paths::folder_ancestry(path)? {
            self.loader.cancel_flag().check()?;

            let key = ConfigKey::new(project, branch, &folder, &self.file_name);
            if let Some(config) = self.loader.load(&key)? {
                let resolved = self.resolver.resolve(&config, path)?;
                if visitor(&resolved)? == VisitResult::Stop {
                    return Ok(());
                }
                if resolved.ignore_parent_code_owners() {
                    return Ok(());
                }
            }
        }

        if branch != DEFAULT_CONFIG_REF {
            self.loader.cancel_flag().check()?;

            let key = ConfigKey::new(project, DEFAULT_CONFIG_REF, "/", &self.file_name);
            if let Some(config) = self.loader.load(&key)? {
                let resolved = self.resolver.resolve(&config, path)?;
                visitor(&resolved)?;
            }
        }

        Ok(())
    }
}

/// Whether a revision's tree contains any owner config file at all. Used to
/// detect branches that have not been set up for code owners yet.
pub fn branch_has_owner_configs(
    repos: &dyn RepositoryProvider, project: &str, revision: &str, file_name: &str,
) -> Result<bool> {
    Ok(repos
        .walk_tree(project, revision)?
        .iter()
        .any(|path| path.rsplit('/').next() == Some(file_name)))
}
