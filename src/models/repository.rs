//! Repository and branch models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "repository_scan_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ScanStatus {
    Pending,
    Scanning,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Repository {
    pub id: Uuid,
    pub url: String,
    pub owner: String,
    pub name: String,
    pub scan_status: ScanStatus,
    pub scan_error: Option<String>,
    pub first_scanned_at: Option<DateTime<Utc>>,
    pub last_scanned_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Repository {
    /// `owner/name` display form.
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Branch {
    pub id: Uuid,
    pub repository_id: Uuid,
    pub name: String,
    pub last_scanned_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Reference to a repository supplied by callers that may not know its id yet.
///
/// `owner` and `name` default to the values parsed from `url`.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RepositoryRef {
    #[validate(length(min = 1, max = 2048))]
    pub url: String,
    #[validate(length(min = 1, max = 255))]
    pub owner: Option<String>,
    #[validate(length(min = 1, max = 255))]
    pub name: Option<String>,
}

impl RepositoryRef {
    pub fn from_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            owner: None,
            name: None,
        }
    }
}

/// Filters for listing repositories.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RepositoryFilters {
    pub scan_status: Option<ScanStatus>,
}

/// Distinct values the presentation layer offers as vulnerability filters.
#[derive(Debug, Clone, Serialize)]
pub struct FilterOptions {
    pub organizations: Vec<String>,
    pub repositories: Vec<RepositoryName>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq, Eq)]
pub struct RepositoryName {
    pub owner: String,
    pub name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scan_status_serialization() {
        let json = serde_json::to_string(&ScanStatus::Scanning).unwrap();
        assert_eq!(json, "\"scanning\"");
        let status: ScanStatus = serde_json::from_str("\"failed\"").unwrap();
        assert_eq!(status, ScanStatus::Failed);
    }

    #[test]
    fn repository_ref_validation() {
        let ok = RepositoryRef::from_url("https://github.com/acme/widgets");
        assert!(ok.validate().is_ok());

        let empty = RepositoryRef::from_url("");
        assert!(empty.validate().is_err());

        let blank_owner = RepositoryRef {
            url: "https://github.com/acme/widgets".to_string(),
            owner: Some(String::new()),
            name: None,
        };
        assert!(blank_owner.validate().is_err());
    }
}
