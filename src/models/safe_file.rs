//! Safe file rules and the versioned rule set used for suppression.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;
use validator::Validate;

use crate::config::MatchScope;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq)]
pub struct SafeFileRule {
    pub id: Uuid,
    pub file_path: String,
    /// `None` matches the path whatever its content.
    pub file_hash: Option<String>,
    pub reason: Option<String>,
    pub marked_by: Option<String>,
    pub marked_at: DateTime<Utc>,
}

impl SafeFileRule {
    /// Exact path equality, plus hash equality for hash-scoped rules.
    pub fn matches(&self, file_path: &str, file_hash: &str) -> bool {
        self.file_path == file_path
            && self
                .file_hash
                .as_deref()
                .map_or(true, |hash| hash == file_hash)
    }
}

/// Request body for `POST /safe-files`.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateSafeFileRule {
    #[validate(length(min = 1, max = 1024))]
    pub file_path: String,
    #[validate(length(min = 1, max = 128))]
    pub file_hash: Option<String>,
    pub reason: Option<String>,
    pub marked_by: Option<String>,
}

/// Request for `POST /vulnerabilities/{id}/mark-file-safe`.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct MarkFileSafe {
    pub scope: Option<MatchScope>,
    pub reason: Option<String>,
    pub marked_by: Option<String>,
}

/// Outcome of adding a rule.
#[derive(Debug, Clone, Serialize)]
pub struct RuleApplied {
    pub rule: SafeFileRule,
    /// False when an identical rule already existed.
    pub created: bool,
    pub suppressed: u64,
    pub version: i64,
}

/// Rules in effect at a given rule-set version.
#[derive(Debug, Clone, Serialize, Default)]
pub struct RuleSet {
    pub version: i64,
    pub rules: Vec<SafeFileRule>,
}

impl RuleSet {
    /// First rule matching a file, if any.
    pub fn matching(&self, file_path: &str, file_hash: &str) -> Option<&SafeFileRule> {
        self.rules.iter().find(|r| r.matches(file_path, file_hash))
    }

    pub fn is_suppressed(&self, file_path: &str, file_hash: &str) -> bool {
        self.matching(file_path, file_hash).is_some()
    }

    /// Pair each `(path, hash)` with the rule that suppresses it.
    pub fn classify<'a, I>(&self, files: I) -> Vec<Option<&SafeFileRule>>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        files
            .into_iter()
            .map(|(path, hash)| self.matching(path, hash))
            .collect()
    }
}
