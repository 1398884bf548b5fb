//! # OWNERS Backends
//!
//! A backend is a parser/formatter pair implementing one concrete OWNERS
//! grammar. Two backends ship with the engine: `find-owners` (line-oriented
//! directives, the default) and `proto` (a restricted text-proto form). The
//! registry is process-wide and immutable after construction; policy files
//! select a backend per project/branch by id.

pub mod find_owners;
pub mod proto;

use super::matcher::PathExpressionDialect;
use super::types::{CodeOwnerConfig, ConfigKey};
use crate::utils::error::Result;

/// Parser/formatter pair for one OWNERS grammar.
pub trait CodeOwnersBackend: Send + Sync {
    /// Stable identifier used in policy files.
    fn id(&self) -> &'static str;

    /// File name looked up in each folder for configs of this backend.
    fn default_file_name(&self) -> &'static str;

    /// Parse raw blob bytes into a config. The key attributes parse errors.
    fn parse(&self, key: &ConfigKey, bytes: &[u8]) -> Result<CodeOwnerConfig>;

    /// Format a config back into canonical textual form.
    fn format(&self, config: &CodeOwnerConfig) -> Result<String>;

    /// Whether this grammar can declare imports.
    fn supports_imports(&self) -> bool;

    /// The path-expression dialect native to this backend. `None` means the
    /// backend has no expression support and per-file rules are inert.
    fn native_dialect(&self) -> Option<PathExpressionDialect>;
}

pub static FIND_OWNERS_BACKEND: find_owners::FindOwnersBackend =
    find_owners::FindOwnersBackend;
pub static PROTO_BACKEND: proto::ProtoBackend = proto::ProtoBackend;

/// Immutable backend registry.
pub struct BackendRegistry {
    backends: Vec<&'static dyn CodeOwnersBackend>,
}

impl BackendRegistry {
    /// Registry holding the two built-in backends.
    pub fn standard() -> Self {
        Self {
            backends: vec![&FIND_OWNERS_BACKEND, &PROTO_BACKEND],
        }
    }

    pub fn get(&self, id: &str) -> Option<&'static dyn CodeOwnersBackend> {
        self.backends.iter().copied().find(|b| b.id() == id)
    }

    /// The backend used when policy does not select one.
    pub fn default_backend(&self) -> &'static dyn CodeOwnersBackend {
        self.backends[0]
    }

    pub fn ids(&self) -> Vec<&'static str> {
        self.backends.iter().map(|b| b.id()).collect()
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::standard()
    }
}
