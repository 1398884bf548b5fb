//! # Submit Rule
//!
//! Surfaces the engine's decision to the host as a submit record. The record
//! is `OK` when every path of every changed file is approved, `NOT_READY`
//! otherwise, and `RULE_ERROR` when the evaluation failed for a user-caused
//! reason (invalid OWNERS file, invalid path, invalid policy). When the
//! engine is disabled for the branch no record is produced at all. Internal
//! errors are not mapped here; they propagate to the caller.

use serde::Serialize;

use super::status;
use super::types::FileCodeOwnerStatus;
use crate::utils::error::Error;

/// Requirement type identifying this engine in submit records.
pub const REQUIREMENT_TYPE: &str = "code-owners";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubmitStatus {
    Ok,
    NotReady,
    RuleError,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitRequirement {
    #[serde(rename = "type")]
    pub requirement_type: String,
    pub fallback_text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitRecord {
    pub status: SubmitStatus,
    pub requirements: Vec<SubmitRequirement>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl SubmitRecord {
    fn requirement() -> SubmitRequirement {
        SubmitRequirement {
            requirement_type: REQUIREMENT_TYPE.to_string(),
            fallback_text: "All changed files must be approved by a code owner".to_string(),
        }
    }

    pub fn ok() -> Self {
        Self {
            status: SubmitStatus::Ok,
            requirements: vec![Self::requirement()],
            error_message: None,
        }
    }

    pub fn not_ready() -> Self {
        Self {
            status: SubmitStatus::NotReady,
            requirements: vec![Self::requirement()],
            error_message: None,
        }
    }

    pub fn rule_error(message: &str) -> Self {
        Self {
            status: SubmitStatus::RuleError,
            requirements: vec![Self::requirement()],
            error_message: Some(message.to_string()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == SubmitStatus::Ok
    }
}

/// Fold the per-file statuses into a record.
pub fn record_from_statuses(statuses: &[FileCodeOwnerStatus]) -> SubmitRecord {
    if status::is_submittable(statuses) {
        SubmitRecord::ok()
    } else {
        SubmitRecord::not_ready()
    }
}

/// Map an evaluation failure: user-caused errors become a rule error with a
/// user-visible message, everything else stays an error for the caller.
pub fn record_from_error(error: Error) -> Result<SubmitRecord, Error> {
    if error.is_user_caused() {
        Ok(SubmitRecord::rule_error(&error.to_string()))
    } else {
        Err(error)
    }
}
