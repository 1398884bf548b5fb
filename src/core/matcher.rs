//! # Path Expression Matching
//!
//! Matches a single pattern against a path relative to the folder of the
//! OWNERS file that declared it. Three interchangeable dialects are
//! supported, selectable per project/branch through the policy snapshot:
//!
//! - `glob`: gitignore-style globs (`*`, `**`, `?`, character classes),
//!   evaluated through the `ignore` crate.
//! - `simple`: file-name patterns such as `*.ext` or `prefix*`, applied at
//!   any depth below the folder.
//! - `rule`: directory-anchored segment patterns with `*` within a segment
//!   and a trailing `...` subtree wildcard.
//!
//! Backends that do not support path expressions get [`NEVER_MATCH`], which
//! makes per-file rules inert.

use std::path::Path;

use ignore::overrides::OverrideBuilder;
use serde::{Deserialize, Serialize};

/// A single-expression matcher. Paths are always relative (never
/// `/`-prefixed); expressions come verbatim from OWNERS files.
pub trait PathExpressionMatcher: Send + Sync {
    fn matches(&self, expression: &str, relative_path: &str) -> bool;
}

/// Whether any of the expressions matches the path.
pub fn matches_any<'a, I: IntoIterator<Item = &'a String>>(
    matcher: &dyn PathExpressionMatcher, expressions: I, relative_path: &str,
) -> bool {
    expressions
        .into_iter()
        .any(|expression| matcher.matches(expression, relative_path))
}

/// The pattern dialect configured for a project/branch.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum PathExpressionDialect {
    #[default]
    Glob,
    Simple,
    Rule,
}

impl PathExpressionDialect {
    pub fn matcher(self) -> &'static dyn PathExpressionMatcher {
        match self {
            PathExpressionDialect::Glob => &GlobMatcher,
            PathExpressionDialect::Simple => &SimpleMatcher,
            PathExpressionDialect::Rule => &RuleMatcher,
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "glob" => Some(PathExpressionDialect::Glob),
            "simple" => Some(PathExpressionDialect::Simple),
            "rule" => Some(PathExpressionDialect::Rule),
            _ => None,
        }
    }
}

impl std::fmt::Display for PathExpressionDialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PathExpressionDialect::Glob => write!(f, "glob"),
            PathExpressionDialect::Simple => write!(f, "simple"),
            PathExpressionDialect::Rule => write!(f, "rule"),
        }
    }
}

/// Gitignore-style glob matching rooted at the config's folder.
pub struct GlobMatcher;

impl PathExpressionMatcher for GlobMatcher {
    fn matches(&self, expression: &str, relative_path: &str) -> bool {
        let mut builder = OverrideBuilder::new("/");
        if let Err(e) = builder.add(expression) {
            log::warn!("invalid glob expression '{}': {}", expression, e);
            return false;
        }
        let over = match builder.build() {
            Ok(over) => over,
            Err(e) => {
                log::warn!("failed to build matcher for '{}': {}", expression, e);
                return false;
            }
        };

        over.matched(Path::new(&format!("/{}", relative_path)), false)
            .is_whitelist()
    }
}

/// File-name patterns (`*.ext`, `prefix*`, exact names) applied to the final
/// path segment at any depth. An expression containing `/` instead matches
/// the whole relative path, segment by segment.
pub struct SimpleMatcher;

impl PathExpressionMatcher for SimpleMatcher {
    fn matches(&self, expression: &str, relative_path: &str) -> bool {
        if expression.contains('/') {
            segments_match(expression, relative_path, false)
        } else {
            let file_name = relative_path.rsplit('/').next().unwrap_or(relative_path);
            wildcard_match(expression, file_name)
        }
    }
}

/// Directory-anchored patterns: segments are matched one to one with `*`
/// within a segment, and a trailing `...` segment matches any remaining
/// subtree.
pub struct RuleMatcher;

impl PathExpressionMatcher for RuleMatcher {
    fn matches(&self, expression: &str, relative_path: &str) -> bool {
        segments_match(expression, relative_path, true)
    }
}

/// A matcher that never matches, used when a backend declares it does not
/// support path expressions.
pub struct NeverMatch;

impl PathExpressionMatcher for NeverMatch {
    fn matches(&self, _expression: &str, _relative_path: &str) -> bool {
        false
    }
}

pub static NEVER_MATCH: NeverMatch = NeverMatch;

/// Segment-wise matching. With `allow_subtree`, a final `...` segment in the
/// expression swallows the rest of the path.
fn segments_match(expression: &str, relative_path: &str, allow_subtree: bool) -> bool {
    let expr_segments: Vec<&str> = expression.split('/').filter(|s| !s.is_empty()).collect();
    let path_segments: Vec<&str> = relative_path.split('/').filter(|s| !s.is_empty()).collect();

    let subtree = allow_subtree && expr_segments.last() == Some(&"...");
    let fixed = if subtree {
        &expr_segments[..expr_segments.len() - 1]
    } else {
        &expr_segments[..]
    };

    if subtree {
        if path_segments.len() < fixed.len() {
            return false;
        }
    } else if path_segments.len() != fixed.len() {
        return false;
    }

    fixed
        .iter()
        .zip(path_segments.iter())
        .all(|(pattern, segment)| wildcard_match(pattern, segment))
}

/// Single-segment wildcard matching: `*` matches any run of characters
/// within the segment. Iterative backtracking, no recursion.
fn wildcard_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();

    let (mut p, mut t) = (0usize, 0usize);
    let mut star: Option<(usize, usize)> = None;

    while t < text.len() {
        if p < pattern.len() && (pattern[p] == text[t]) {
            p += 1;
            t += 1;
        } else if p < pattern.len() && pattern[p] == '*' {
            star = Some((p, t));
            p += 1;
        } else if let Some((star_p, star_t)) = star {
            p = star_p + 1;
            t = star_t + 1;
            star = Some((star_p, star_t + 1));
        } else {
            return false;
        }
    }

    while p < pattern.len() && pattern[p] == '*' {
        p += 1;
    }

    p == pattern.len()
}
