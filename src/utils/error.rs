//! # Error Types
//!
//! Central error type for the crate. Every fallible operation returns
//! [`Result`], and the [`Error`] enum distinguishes user-caused failures
//! (invalid OWNERS files, invalid paths, invalid policy) from internal ones
//! (repository I/O, account store, unexpected conditions) so that callers can
//! map them to the right surface: user-caused errors become conflict-style
//! responses with attribution, internal errors propagate.

use std::fmt;

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Identifies the config file a user-caused error originates from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribution {
    pub project: String,
    pub ref_name: String,
    pub file_path: String,
}

impl Attribution {
    pub fn new(project: &str, ref_name: &str, file_path: &str) -> Self {
        Self {
            project: project.to_string(),
            ref_name: ref_name.to_string(),
            file_path: file_path.to_string(),
        }
    }
}

impl fmt::Display for Attribution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.project, self.ref_name, self.file_path)
    }
}

/// All error conditions surfaced by the engine and its host layers.
#[derive(Error, Debug)]
pub enum Error {
    /// An OWNERS file exists but fails to parse or violates a structural
    /// invariant. Always carries attribution so the message can point the
    /// user at the offending file.
    #[error("invalid code-owner config {attribution}: {message}")]
    ConfigInvalid {
        attribution: Attribution,
        line: Option<usize>,
        message: String,
    },

    /// A path expression is malformed or a path escapes the repository root.
    #[error("invalid path {path}: {message}")]
    InvalidPath { path: String, message: String },

    /// The policy file parsed but is semantically rejected (unknown backend,
    /// unresolvable label spec, ...).
    #[error("invalid code-owners policy for project {project}: {message}")]
    PolicyInvalid { project: String, message: String },

    /// Wrapping of repository provider I/O failures.
    #[error("repository error: {message}")]
    Repository {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Wrapping of account provider failures.
    #[error("account error: {message}")]
    Account { message: String },

    /// The operation was canceled via its cancellation handle.
    #[error("operation canceled")]
    Canceled,

    /// Any other unexpected failure.
    #[error("{message}")]
    Internal {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl Error {
    /// Create a new internal error with a message.
    pub fn new(message: &str) -> Self {
        Error::Internal {
            message: message.to_string(),
            source: None,
        }
    }

    /// Create a new internal error with a message and an underlying source.
    pub fn with_source(
        message: &str, source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        Error::Internal {
            message: message.to_string(),
            source: Some(source),
        }
    }

    pub fn config_invalid(
        project: &str, ref_name: &str, file_path: &str, line: Option<usize>, message: &str,
    ) -> Self {
        Error::ConfigInvalid {
            attribution: Attribution::new(project, ref_name, file_path),
            line,
            message: message.to_string(),
        }
    }

    pub fn invalid_path(path: &str, message: &str) -> Self {
        Error::InvalidPath {
            path: path.to_string(),
            message: message.to_string(),
        }
    }

    pub fn policy_invalid(project: &str, message: &str) -> Self {
        Error::PolicyInvalid {
            project: project.to_string(),
            message: message.to_string(),
        }
    }

    pub fn repository(message: &str) -> Self {
        Error::Repository {
            message: message.to_string(),
            source: None,
        }
    }

    pub fn account(message: &str) -> Self {
        Error::Account {
            message: message.to_string(),
        }
    }

    /// Whether this error was caused by user-controlled input (OWNERS files,
    /// path expressions, policy files). User-caused errors map to a
    /// conflict-style response; everything else is internal.
    pub fn is_user_caused(&self) -> bool {
        matches!(
            self,
            Error::ConfigInvalid { .. } | Error::InvalidPath { .. } | Error::PolicyInvalid { .. }
        )
    }

    /// Stable name of the error kind, for machine-readable surfaces.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::ConfigInvalid { .. } => "CONFIG_INVALID",
            Error::InvalidPath { .. } => "INVALID_PATH",
            Error::PolicyInvalid { .. } => "POLICY_INVALID",
            Error::Repository { .. } => "REPOSITORY_ERROR",
            Error::Account { .. } => "ACCOUNT_ERROR",
            Error::Canceled => "CANCELED",
            Error::Internal { .. } => "INTERNAL",
        }
    }
}

impl From<git2::Error> for Error {
    fn from(err: git2::Error) -> Self {
        Error::Repository {
            message: err.message().to_string(),
            source: Some(Box::new(err)),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::with_source("I/O error", Box::new(err))
    }
}

impl From<config::ConfigError> for Error {
    fn from(err: config::ConfigError) -> Self {
        Error::with_source("configuration error", Box::new(err))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::with_source("JSON error", Box::new(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attribution_display() {
        let attribution = Attribution::new("proj", "refs/heads/main", "/foo/OWNERS");
        assert_eq!(attribution.to_string(), "proj:refs/heads/main:/foo/OWNERS");
    }

    #[test]
    fn test_user_caused_classification() {
        assert!(
            Error::config_invalid("p", "refs/heads/main", "/OWNERS", Some(3), "bad directive")
                .is_user_caused()
        );
        assert!(Error::invalid_path("../escape", "leaves repository root").is_user_caused());
        assert!(Error::policy_invalid("p", "unknown backend").is_user_caused());

        assert!(!Error::new("boom").is_user_caused());
        assert!(!Error::repository("read failed").is_user_caused());
        assert!(!Error::account("lookup failed").is_user_caused());
        assert!(!Error::Canceled.is_user_caused());
    }

    #[test]
    fn test_config_invalid_message_carries_attribution() {
        let err = Error::config_invalid("proj", "refs/heads/main", "/OWNERS", None, "bad line");
        let message = err.to_string();
        assert!(message.contains("proj:refs/heads/main:/OWNERS"));
        assert!(message.contains("bad line"));
    }
}
