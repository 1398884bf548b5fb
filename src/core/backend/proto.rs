//! # proto Backend
//!
//! Rule-based OWNERS grammar over a restricted text-proto form, stored in
//! `OWNERS_METADATA` files:
//!
//! ```text
//! owners_config {
//!   ignore_parent_owners: true
//!   owner_sets {
//!     path_expressions: "*.md"
//!     ignore_global_and_parent_owners: false
//!     owners { email: "a@example.com" }
//!   }
//! }
//! ```
//!
//! The grammar has no import support; path expressions use the
//! directory-anchored rule dialect.

use super::CodeOwnersBackend;
use crate::core::matcher::PathExpressionDialect;
use crate::core::types::{
    CodeOwnerConfig, CodeOwnerReference, CodeOwnerSet, ConfigKey,
};
use crate::utils::error::{Error, Result};

pub struct ProtoBackend;

impl CodeOwnersBackend for ProtoBackend {
    fn id(&self) -> &'static str {
        "proto"
    }

    fn default_file_name(&self) -> &'static str {
        "OWNERS_METADATA"
    }

    fn parse(&self, key: &ConfigKey, bytes: &[u8]) -> Result<CodeOwnerConfig> {
        let content = std::str::from_utf8(bytes)
            .map_err(|_| parse_err(key, None, "file is not valid UTF-8"))?;
        Parser::new(key, content).parse_file()
    }

    fn format(&self, config: &CodeOwnerConfig) -> Result<String> {
        Ok(format_config(config))
    }

    fn supports_imports(&self) -> bool {
        false
    }

    fn native_dialect(&self) -> Option<PathExpressionDialect> {
        Some(PathExpressionDialect::Rule)
    }
}

fn parse_err(key: &ConfigKey, line: Option<usize>, message: &str) -> Error {
    Error::config_invalid(&key.project, &key.branch, &key.file_path(), line, message)
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Ident(String),
    Str(String),
    Colon,
    OpenBrace,
    CloseBrace,
}

struct Parser<'a> {
    key: &'a ConfigKey,
    tokens: Vec<(Token, usize)>,
    position: usize,
}

impl<'a> Parser<'a> {
    fn new(key: &'a ConfigKey, content: &str) -> Self {
        Self {
            key,
            tokens: tokenize(content),
            position: 0,
        }
    }

    fn parse_file(mut self) -> Result<CodeOwnerConfig> {
        let mut config = CodeOwnerConfig::new(self.key.clone());

        while let Some((token, line)) = self.peek() {
            match token {
                Token::Ident(name) if name == "owners_config" => {
                    self.advance();
                    self.expect(Token::OpenBrace)?;
                    self.parse_owners_config(&mut config)?;
                }
                _ => {
                    return Err(self.err(line, "expected 'owners_config' block"));
                }
            }
        }

        config.validate()?;
        Ok(config)
    }

    fn parse_owners_config(&mut self, config: &mut CodeOwnerConfig) -> Result<()> {
        loop {
            let (token, line) = self.next_required("'}'")?;
            match token {
                Token::CloseBrace => return Ok(()),
                Token::Ident(name) if name == "ignore_parent_owners" => {
                    self.expect(Token::Colon)?;
                    config.ignore_parent_code_owners = self.parse_bool()?;
                }
                Token::Ident(name) if name == "owner_sets" => {
                    self.expect(Token::OpenBrace)?;
                    let set = self.parse_owner_set()?;
                    config.code_owner_sets.push(set);
                }
                _ => {
                    return Err(self.err(line, "unknown field in owners_config"));
                }
            }
        }
    }

    fn parse_owner_set(&mut self) -> Result<CodeOwnerSet> {
        let mut set = CodeOwnerSet::default();

        loop {
            let (token, line) = self.next_required("'}'")?;
            match token {
                Token::CloseBrace => return Ok(set),
                Token::Ident(name) if name == "path_expressions" => {
                    self.expect(Token::Colon)?;
                    set.path_expressions.insert(self.parse_string()?);
                }
                Token::Ident(name) if name == "ignore_global_and_parent_owners" => {
                    self.expect(Token::Colon)?;
                    set.ignore_global_and_parent_owners = self.parse_bool()?;
                }
                Token::Ident(name) if name == "owners" => {
                    self.expect(Token::OpenBrace)?;
                    let owner = self.parse_owner()?;
                    set.code_owners.insert(owner);
                }
                _ => {
                    return Err(self.err(line, "unknown field in owner_sets"));
                }
            }
        }
    }

    fn parse_owner(&mut self) -> Result<CodeOwnerReference> {
        let mut email = None;

        loop {
            let (token, line) = self.next_required("'}'")?;
            match token {
                Token::CloseBrace => break,
                Token::Ident(name) if name == "email" => {
                    self.expect(Token::Colon)?;
                    email = Some(self.parse_string()?);
                }
                _ => {
                    return Err(self.err(line, "unknown field in owners"));
                }
            }
        }

        match email {
            Some(address) if !address.is_empty() => Ok(CodeOwnerReference::parse(&address)),
            _ => Err(self.err(self.current_line(), "owners block without an email")),
        }
    }

    fn parse_bool(&mut self) -> Result<bool> {
        let (token, line) = self.next_required("'true' or 'false'")?;
        match token {
            Token::Ident(value) if value == "true" => Ok(true),
            Token::Ident(value) if value == "false" => Ok(false),
            _ => Err(self.err(line, "expected 'true' or 'false'")),
        }
    }

    fn parse_string(&mut self) -> Result<String> {
        let (token, line) = self.next_required("quoted string")?;
        match token {
            Token::Str(value) => Ok(value),
            _ => Err(self.err(line, "expected a quoted string")),
        }
    }

    fn expect(&mut self, expected: Token) -> Result<()> {
        let description = match &expected {
            Token::Colon => "':'",
            Token::OpenBrace => "'{'",
            Token::CloseBrace => "'}'",
            _ => "token",
        };
        let (token, line) = self.next_required(description)?;
        if token == expected {
            Ok(())
        } else {
            Err(self.err(line, &format!("expected {}", description)))
        }
    }

    fn peek(&self) -> Option<(Token, usize)> {
        self.tokens.get(self.position).cloned()
    }

    fn advance(&mut self) {
        self.position += 1;
    }

    fn next_required(&mut self, expected: &str) -> Result<(Token, usize)> {
        match self.peek() {
            Some(entry) => {
                self.advance();
                Ok(entry)
            }
            None => Err(self.err(
                self.current_line(),
                &format!("unexpected end of file, expected {}", expected),
            )),
        }
    }

    fn current_line(&self) -> usize {
        self.tokens
            .get(self.position.saturating_sub(1))
            .map(|(_, line)| *line)
            .unwrap_or(1)
    }

    fn err(&self, line: usize, message: &str) -> Error {
        parse_err(self.key, Some(line), message)
    }
}

fn tokenize(content: &str) -> Vec<(Token, usize)> {
    let mut tokens = Vec::new();

    for (index, raw_line) in content.lines().enumerate() {
        let line_number = index + 1;
        let mut chars = raw_line.char_indices().peekable();

        while let Some((start, c)) = chars.next() {
            match c {
                '#' => break,
                c if c.is_whitespace() => {}
                '{' => tokens.push((Token::OpenBrace, line_number)),
                '}' => tokens.push((Token::CloseBrace, line_number)),
                ':' => tokens.push((Token::Colon, line_number)),
                '"' => {
                    let mut value = String::new();
                    let mut closed = false;
                    for (_, c) in chars.by_ref() {
                        if c == '"' {
                            closed = true;
                            break;
                        }
                        value.push(c);
                    }
                    if closed {
                        tokens.push((Token::Str(value), line_number));
                    } else {
                        // Unterminated strings surface as an identifier the
                        // parser rejects with a line number.
                        tokens.push((Token::Ident(format!("\"{}", value)), line_number));
                    }
                }
                _ => {
                    let mut end = start + c.len_utf8();
                    while let Some(&(next_index, next)) = chars.peek() {
                        if next.is_alphanumeric() || next == '_' {
                            end = next_index + next.len_utf8();
                            chars.next();
                        } else {
                            break;
                        }
                    }
                    tokens.push((Token::Ident(raw_line[start..end].to_string()), line_number));
                }
            }
        }
    }

    tokens
}

fn format_config(config: &CodeOwnerConfig) -> String {
    let mut out = String::from("owners_config {\n");

    if config.ignore_parent_code_owners {
        out.push_str("  ignore_parent_owners: true\n");
    }

    for set in &config.code_owner_sets {
        out.push_str("  owner_sets {\n");
        for expression in &set.path_expressions {
            out.push_str(&format!("    path_expressions: \"{}\"\n", expression));
        }
        if set.ignore_global_and_parent_owners {
            out.push_str("    ignore_global_and_parent_owners: true\n");
        }
        for owner in &set.code_owners {
            out.push_str(&format!("    owners {{ email: \"{}\" }}\n", owner));
        }
        out.push_str("  }\n");
    }

    out.push_str("}\n");
    out
}
