//! # find-owners Backend
//!
//! The default OWNERS grammar: UTF-8 text, one directive per line, `#`
//! comments. Supported directives:
//!
//! ```text
//! set noparent
//! include <ref>
//! file: <ref>
//! per-file <glob1[,glob2,...]>=<email1[,email2,...]|set noparent|file=<ref>>
//! <email> [#{ANNOTATION}...]
//! *
//! ```
//!
//! `<ref>` is `[project:][branch:]filepath`; relative paths resolve against
//! the importing config's folder. `include` imports everything from the
//! referenced file, `file:` and per-file imports pull global owner sets only.

use std::collections::BTreeSet;

use super::CodeOwnersBackend;
use crate::core::matcher::PathExpressionDialect;
use crate::core::types::{
    ALL_USERS_WILDCARD, Annotation, CodeOwnerConfig, CodeOwnerReference, CodeOwnerSet,
    ConfigKey, ConfigRef, ImportMode,
};
use crate::utils::error::{Error, Result};

pub struct FindOwnersBackend;

impl CodeOwnersBackend for FindOwnersBackend {
    fn id(&self) -> &'static str {
        "find-owners"
    }

    fn default_file_name(&self) -> &'static str {
        "OWNERS"
    }

    fn parse(&self, key: &ConfigKey, bytes: &[u8]) -> Result<CodeOwnerConfig> {
        parse_config(key, bytes)
    }

    fn format(&self, config: &CodeOwnerConfig) -> Result<String> {
        Ok(format_config(config))
    }

    fn supports_imports(&self) -> bool {
        true
    }

    fn native_dialect(&self) -> Option<PathExpressionDialect> {
        Some(PathExpressionDialect::Glob)
    }
}

fn parse_err(key: &ConfigKey, line: Option<usize>, message: &str) -> Error {
    Error::config_invalid(&key.project, &key.branch, &key.file_path(), line, message)
}

fn parse_config(key: &ConfigKey, bytes: &[u8]) -> Result<CodeOwnerConfig> {
    let content = std::str::from_utf8(bytes)
        .map_err(|_| parse_err(key, None, "file is not valid UTF-8"))?;

    let mut config = CodeOwnerConfig::new(key.clone());
    let mut global_set = CodeOwnerSet::default();

    for (index, raw_line) in content.lines().enumerate() {
        let line_number = index + 1;
        let line = strip_comment(raw_line).trim();
        if line.is_empty() {
            continue;
        }

        if line == "set noparent" {
            config.ignore_parent_code_owners = true;
        } else if let Some(rest) = line.strip_prefix("include ") {
            config
                .imports
                .push(parse_config_ref(key, line_number, rest.trim(), ImportMode::All)?);
        } else if let Some(rest) = line.strip_prefix("file:") {
            config.imports.push(parse_config_ref(
                key,
                line_number,
                rest.trim(),
                ImportMode::GlobalOnly,
            )?);
        } else if let Some(rest) = line.strip_prefix("per-file ") {
            let set = parse_per_file(key, line_number, rest.trim())?;
            config.code_owner_sets.push(set);
        } else {
            parse_owner_line(key, line_number, line, &mut global_set)?;
        }
    }

    // The accumulated global owners form the leading rule of the config.
    if !global_set.code_owners.is_empty() {
        config.code_owner_sets.insert(0, global_set);
    }

    config.validate()?;
    Ok(config)
}

/// Cut the line at the first `#` that does not open an `#{ANNOTATION}`.
fn strip_comment(line: &str) -> &str {
    let bytes = line.as_bytes();
    for i in 0..bytes.len() {
        if bytes[i] == b'#' && bytes.get(i + 1) != Some(&b'{') {
            return &line[..i];
        }
    }
    line
}

fn parse_owner_line(
    key: &ConfigKey, line_number: usize, line: &str, global_set: &mut CodeOwnerSet,
) -> Result<()> {
    let mut tokens = line.split_whitespace();
    let owner_token = tokens
        .next()
        .ok_or_else(|| parse_err(key, Some(line_number), "empty owner line"))?;

    validate_owner_token(key, line_number, owner_token)?;
    let reference = CodeOwnerReference::parse(owner_token);

    let mut annotations = BTreeSet::new();
    for token in tokens {
        match token.strip_prefix("#{").and_then(|t| t.strip_suffix('}')) {
            Some(name) if !name.is_empty() => {
                annotations.insert(Annotation(name.to_string()));
            }
            _ => {
                return Err(parse_err(
                    key,
                    Some(line_number),
                    &format!("unexpected token '{}' after owner", token),
                ));
            }
        }
    }

    global_set.code_owners.insert(reference.clone());
    if !annotations.is_empty() {
        global_set
            .annotations
            .entry(reference)
            .or_default()
            .extend(annotations);
    }

    Ok(())
}

fn validate_owner_token(key: &ConfigKey, line_number: usize, token: &str) -> Result<()> {
    if token != ALL_USERS_WILDCARD && !token.contains('@') {
        return Err(parse_err(
            key,
            Some(line_number),
            &format!("unrecognized directive or owner '{}'", token),
        ));
    }
    Ok(())
}

fn parse_per_file(key: &ConfigKey, line_number: usize, rest: &str) -> Result<CodeOwnerSet> {
    let (globs, value) = rest
        .split_once('=')
        .ok_or_else(|| parse_err(key, Some(line_number), "per-file rule is missing '='"))?;

    let path_expressions: BTreeSet<String> = globs
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();
    if path_expressions.is_empty() {
        return Err(parse_err(
            key,
            Some(line_number),
            "per-file rule has no path expressions",
        ));
    }

    let mut set = CodeOwnerSet {
        path_expressions,
        ..CodeOwnerSet::default()
    };

    let value = value.trim();
    if value == "set noparent" {
        set.ignore_global_and_parent_owners = true;
    } else if let Some(import) = value.strip_prefix("file=") {
        set.imports.push(parse_config_ref(
            key,
            line_number,
            import.trim(),
            ImportMode::GlobalOnly,
        )?);
    } else {
        for token in value.split(',') {
            let token = token.trim();
            if token.is_empty() {
                return Err(parse_err(
                    key,
                    Some(line_number),
                    "per-file rule has an empty owner",
                ));
            }
            validate_owner_token(key, line_number, token)?;
            set.code_owners.insert(CodeOwnerReference::parse(token));
        }
    }

    set.validate(key, Some(line_number))?;
    Ok(set)
}

/// Parse `[project:][branch:]filepath`. One segment is a bare file path, two
/// are `project:filepath`, three are `project:branch:filepath`.
fn parse_config_ref(
    key: &ConfigKey, line_number: usize, text: &str, mode: ImportMode,
) -> Result<ConfigRef> {
    if text.is_empty() {
        return Err(parse_err(key, Some(line_number), "import reference is empty"));
    }

    let parts: Vec<&str> = text.split(':').collect();
    if parts.iter().any(|part| part.trim().is_empty()) {
        return Err(parse_err(
            key,
            Some(line_number),
            &format!("malformed import reference '{}'", text),
        ));
    }

    match parts.as_slice() {
        [file_path] => Ok(ConfigRef::new(None, None, file_path.trim(), mode)),
        [project, file_path] => Ok(ConfigRef::new(
            Some(project.trim()),
            None,
            file_path.trim(),
            mode,
        )),
        [project, branch, file_path] => Ok(ConfigRef::new(
            Some(project.trim()),
            Some(branch.trim()),
            file_path.trim(),
            mode,
        )),
        _ => Err(parse_err(
            key,
            Some(line_number),
            &format!("malformed import reference '{}'", text),
        )),
    }
}

fn format_config(config: &CodeOwnerConfig) -> String {
    let mut lines = Vec::new();

    if config.ignore_parent_code_owners {
        lines.push("set noparent".to_string());
    }

    for import in &config.imports {
        match import.mode {
            ImportMode::GlobalOnly => lines.push(format!("file: {}", import)),
            _ => lines.push(format!("include {}", import)),
        }
    }

    for set in &config.code_owner_sets {
        if set.is_global() {
            for owner in &set.code_owners {
                let mut line = owner.to_string();
                if let Some(annotations) = set.annotations.get(owner) {
                    for annotation in annotations {
                        line.push_str(&format!(" #{{{}}}", annotation.0));
                    }
                }
                lines.push(line);
            }
        } else {
            let globs = set
                .path_expressions
                .iter()
                .cloned()
                .collect::<Vec<_>>()
                .join(",");
            if set.ignore_global_and_parent_owners {
                lines.push(format!("per-file {}=set noparent", globs));
            }
            for import in &set.imports {
                lines.push(format!("per-file {}=file={}", globs, import));
            }
            if !set.code_owners.is_empty() {
                let owners = set
                    .code_owners
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(",");
                lines.push(format!("per-file {}={}", globs, owners));
            }
        }
    }

    let mut out = lines.join("\n");
    out.push('\n');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> ConfigKey {
        ConfigKey::new("proj", "main", "/foo", "OWNERS")
    }

    fn parse(content: &str) -> Result<CodeOwnerConfig> {
        FindOwnersBackend.parse(&key(), content.as_bytes())
    }

    #[test]
    fn test_parse_global_owners() -> Result<()> {
        let config = parse("alice@example.com\nbob@example.com\n")?;

        assert_eq!(config.code_owner_sets.len(), 1);
        let set = &config.code_owner_sets[0];
        assert!(set.is_global());
        assert_eq!(
            set.code_owners,
            BTreeSet::from([
                CodeOwnerReference::email("alice@example.com"),
                CodeOwnerReference::email("bob@example.com"),
            ])
        );
        assert!(!config.ignore_parent_code_owners);

        Ok(())
    }

    #[test]
    fn test_parse_wildcard_owner() -> Result<()> {
        let config = parse("*\n")?;
        assert_eq!(
            config.code_owner_sets[0].code_owners,
            BTreeSet::from([CodeOwnerReference::AllUsers])
        );
        Ok(())
    }

    #[test]
    fn test_parse_set_noparent() -> Result<()> {
        let config = parse("set noparent\nalice@example.com\n")?;
        assert!(config.ignore_parent_code_owners);
        Ok(())
    }

    #[test]
    fn test_parse_comments_and_blank_lines() -> Result<()> {
        let config = parse("# header\n\nalice@example.com # trailing note\n   \n")?;
        assert_eq!(config.code_owner_sets.len(), 1);
        assert_eq!(
            config.code_owner_sets[0].code_owners,
            BTreeSet::from([CodeOwnerReference::email("alice@example.com")])
        );
        Ok(())
    }

    #[test]
    fn test_parse_annotations() -> Result<()> {
        let config = parse("alice@example.com #{LAST_RESORT_SUGGESTION}\n")?;
        let set = &config.code_owner_sets[0];
        let annotations = set
            .annotations
            .get(&CodeOwnerReference::email("alice@example.com"))
            .unwrap();
        assert_eq!(
            annotations,
            &BTreeSet::from([Annotation("LAST_RESORT_SUGGESTION".to_string())])
        );
        Ok(())
    }

    #[test]
    fn test_parse_include_and_file_imports() -> Result<()> {
        let config = parse("include /build/OWNERS\nfile: other-proj:/OWNERS\n")?;

        assert_eq!(config.imports.len(), 2);
        assert_eq!(config.imports[0].file_path, "/build/OWNERS");
        assert_eq!(config.imports[0].mode, ImportMode::All);
        assert_eq!(config.imports[0].project, None);

        assert_eq!(config.imports[1].mode, ImportMode::GlobalOnly);
        assert_eq!(config.imports[1].project.as_deref(), Some("other-proj"));
        Ok(())
    }

    #[test]
    fn test_parse_three_segment_import_ref() -> Result<()> {
        let config = parse("include proj2:dev:/OWNERS\n")?;
        let import = &config.imports[0];
        assert_eq!(import.project.as_deref(), Some("proj2"));
        assert_eq!(import.branch.as_deref(), Some("refs/heads/dev"));
        assert_eq!(import.file_path, "/OWNERS");
        Ok(())
    }

    #[test]
    fn test_parse_per_file_owners() -> Result<()> {
        let config = parse("per-file *.py,*.pyi=bob@example.com,carol@example.com\n")?;

        assert_eq!(config.code_owner_sets.len(), 1);
        let set = &config.code_owner_sets[0];
        assert_eq!(
            set.path_expressions,
            BTreeSet::from(["*.py".to_string(), "*.pyi".to_string()])
        );
        assert_eq!(
            set.code_owners,
            BTreeSet::from([
                CodeOwnerReference::email("bob@example.com"),
                CodeOwnerReference::email("carol@example.com"),
            ])
        );
        Ok(())
    }

    #[test]
    fn test_parse_per_file_noparent_and_import() -> Result<()> {
        let config =
            parse("per-file *.py=set noparent\nper-file *.py=bob@example.com\nper-file docs/*=file=/docs/OWNERS\n")?;

        assert_eq!(config.code_owner_sets.len(), 3);
        assert!(config.code_owner_sets[0].ignore_global_and_parent_owners);
        assert!(config.code_owner_sets[0].code_owners.is_empty());
        assert_eq!(
            config.code_owner_sets[1].code_owners,
            BTreeSet::from([CodeOwnerReference::email("bob@example.com")])
        );
        let import_set = &config.code_owner_sets[2];
        assert_eq!(import_set.imports.len(), 1);
        assert_eq!(import_set.imports[0].mode, ImportMode::GlobalOnly);
        assert_eq!(import_set.imports[0].file_path, "/docs/OWNERS");
        Ok(())
    }

    #[test]
    fn test_global_owners_lead_per_file_sets() -> Result<()> {
        let config = parse("per-file *.py=bob@example.com\nalice@example.com\n")?;

        assert_eq!(config.code_owner_sets.len(), 2);
        assert!(config.code_owner_sets[0].is_global());
        assert!(!config.code_owner_sets[1].is_global());
        Ok(())
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse("this is not a directive\n").is_err());
        assert!(parse("per-file =alice@example.com\n").is_err());
        assert!(parse("per-file *.py=\n").is_err());
        assert!(parse("include \n").is_err());
        assert!(parse("include a:b:c:d\n").is_err());
        assert!(parse("alice@example.com trailing\n").is_err());
    }

    #[test]
    fn test_parse_error_carries_line_attribution() {
        let err = parse("alice@example.com\njunk\n").unwrap_err();
        match err {
            Error::ConfigInvalid { line, attribution, .. } => {
                assert_eq!(line, Some(2));
                assert_eq!(attribution.file_path, "/foo/OWNERS");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_format_round_trip() -> Result<()> {
        let content = "set noparent\n\
                       include /build/OWNERS\n\
                       file: other-proj:/OWNERS\n\
                       alice@example.com\n\
                       bob@example.com #{NEVER_SUGGEST}\n\
                       per-file *.py=set noparent\n\
                       per-file *.py=carol@example.com\n\
                       per-file docs/*=file=/docs/OWNERS\n";

        let config = parse(content)?;
        let formatted = FindOwnersBackend.format(&config)?;
        assert_eq!(formatted, content);

        // Formatting is a fixed point.
        let reparsed = FindOwnersBackend.parse(&key(), formatted.as_bytes())?;
        assert_eq!(reparsed, config);
        Ok(())
    }
}
