//! Absolute, repository-rooted path handling.
//!
//! Every path exchanged between engine components is absolute (`/`-prefixed,
//! forward slashes). These helpers normalize, join and split such paths and
//! reject anything that would escape the repository root.

use crate::utils::error::{Error, Result};

/// Normalize a path to absolute repository-rooted form. Collapses duplicate
/// slashes and `.` segments, resolves `..` segments, and fails when the path
/// would leave the repository root.
pub fn normalize(path: &str) -> Result<String> {
    if path.contains('\\') {
        return Err(Error::invalid_path(path, "backslashes are not allowed"));
    }

    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if segments.pop().is_none() {
                    return Err(Error::invalid_path(path, "path leaves the repository root"));
                }
            }
            other => segments.push(other),
        }
    }

    if segments.is_empty() {
        Ok("/".to_string())
    } else {
        Ok(format!("/{}", segments.join("/")))
    }
}

/// Normalize a path that must already be absolute.
pub fn normalize_absolute(path: &str) -> Result<String> {
    if !path.starts_with('/') {
        return Err(Error::invalid_path(path, "path is not absolute"));
    }
    normalize(path)
}

/// Join a file or subfolder name onto an absolute folder path.
pub fn join(folder: &str, name: &str) -> String {
    if folder == "/" {
        format!("/{}", name)
    } else {
        format!("{}/{}", folder, name)
    }
}

/// Resolve an import file path against the importing config's folder.
/// Absolute paths stand on their own; relative paths are resolved against
/// the folder.
pub fn resolve_against(folder: &str, path: &str) -> Result<String> {
    if path.starts_with('/') {
        normalize(path)
    } else {
        normalize(&join(folder, path))
    }
}

/// Split an absolute file path into `(folder, file name)`.
pub fn split_folder_file(path: &str) -> Result<(String, String)> {
    let normalized = normalize_absolute(path)?;
    match normalized.rfind('/') {
        Some(0) if normalized.len() > 1 => {
            Ok(("/".to_string(), normalized[1..].to_string()))
        }
        Some(idx) if idx + 1 < normalized.len() => Ok((
            normalized[..idx].to_string(),
            normalized[idx + 1..].to_string(),
        )),
        _ => Err(Error::invalid_path(path, "path does not name a file")),
    }
}

/// All folders from the file's containing folder up to the root, innermost
/// first. `/a/b/c.txt` yields `["/a/b", "/a", "/"]`.
pub fn folder_ancestry(file_path: &str) -> Result<Vec<String>> {
    let (mut folder, _) = split_folder_file(file_path)?;
    let mut ancestry = vec![folder.clone()];

    while folder != "/" {
        folder = match folder.rfind('/') {
            Some(0) => "/".to_string(),
            Some(idx) => folder[..idx].to_string(),
            None => break,
        };
        ancestry.push(folder.clone());
    }

    Ok(ancestry)
}

/// The path relative to a folder, or `None` when the path is outside of it.
pub fn relative_to(folder: &str, path: &str) -> Option<String> {
    if folder == "/" {
        return path.strip_prefix('/').map(str::to_string);
    }
    path.strip_prefix(folder)
        .and_then(|rest| rest.strip_prefix('/'))
        .map(str::to_string)
}

/// Normalize a branch name to a full ref name.
pub fn full_ref(branch: &str) -> String {
    if branch.starts_with("refs/") {
        branch.to_string()
    } else {
        format!("refs/heads/{}", branch)
    }
}

/// The short branch name of a full ref, when it names a branch.
pub fn short_branch(ref_name: &str) -> &str {
    ref_name.strip_prefix("refs/heads/").unwrap_or(ref_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize() -> Result<()> {
        assert_eq!(normalize("/a/b.txt")?, "/a/b.txt");
        assert_eq!(normalize("a/b.txt")?, "/a/b.txt");
        assert_eq!(normalize("//a//b.txt")?, "/a/b.txt");
        assert_eq!(normalize("/a/./b.txt")?, "/a/b.txt");
        assert_eq!(normalize("/a/x/../b.txt")?, "/a/b.txt");
        assert_eq!(normalize("/")?, "/");
        assert_eq!(normalize("")?, "/");

        assert!(normalize("/../b.txt").is_err());
        assert!(normalize("a/../../b.txt").is_err());
        Ok(())
    }

    #[test]
    fn test_join_and_split() -> Result<()> {
        assert_eq!(join("/", "OWNERS"), "/OWNERS");
        assert_eq!(join("/a/b", "OWNERS"), "/a/b/OWNERS");

        assert_eq!(
            split_folder_file("/OWNERS")?,
            ("/".to_string(), "OWNERS".to_string())
        );
        assert_eq!(
            split_folder_file("/a/b/OWNERS")?,
            ("/a/b".to_string(), "OWNERS".to_string())
        );
        assert!(split_folder_file("/").is_err());
        Ok(())
    }

    #[test]
    fn test_resolve_against() -> Result<()> {
        assert_eq!(resolve_against("/a/b", "/OWNERS")?, "/OWNERS");
        assert_eq!(resolve_against("/a/b", "OWNERS")?, "/a/b/OWNERS");
        assert_eq!(resolve_against("/a/b", "../OWNERS")?, "/a/OWNERS");
        assert!(resolve_against("/", "../OWNERS").is_err());
        Ok(())
    }

    #[test]
    fn test_folder_ancestry() -> Result<()> {
        assert_eq!(
            folder_ancestry("/a/b/c.txt")?,
            vec!["/a/b".to_string(), "/a".to_string(), "/".to_string()]
        );
        assert_eq!(folder_ancestry("/c.txt")?, vec!["/".to_string()]);
        Ok(())
    }

    #[test]
    fn test_relative_to() {
        assert_eq!(relative_to("/", "/a/b.txt"), Some("a/b.txt".to_string()));
        assert_eq!(relative_to("/a", "/a/b.txt"), Some("b.txt".to_string()));
        assert_eq!(relative_to("/a/b", "/a/b.txt"), None);
        assert_eq!(relative_to("/x", "/a/b.txt"), None);
    }

    #[test]
    fn test_full_ref() {
        assert_eq!(full_ref("main"), "refs/heads/main");
        assert_eq!(full_ref("refs/heads/main"), "refs/heads/main");
        assert_eq!(full_ref("refs/meta/config"), "refs/meta/config");
        assert_eq!(short_branch("refs/heads/main"), "main");
        assert_eq!(short_branch("refs/meta/config"), "refs/meta/config");
    }
}
