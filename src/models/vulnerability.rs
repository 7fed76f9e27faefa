//! Vulnerability model, analyst status lifecycle, and scanner candidates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq, Hash)]
#[sqlx(type_name = "severity_level", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
    Info,
}

impl Severity {
    /// Lower rank is more severe.
    pub fn rank(&self) -> u8 {
        match self {
            Self::Critical => 0,
            Self::High => 1,
            Self::Medium => 2,
            Self::Low => 3,
            Self::Info => 4,
        }
    }

    /// The more severe of two levels.
    pub fn most_severe(self, other: Self) -> Self {
        if other.rank() < self.rank() {
            other
        } else {
            self
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "vulnerability_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum VulnerabilityStatus {
    Open,
    Confirmed,
    FalsePositive,
    Fixed,
    Ignored,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Vulnerability {
    pub id: Uuid,
    pub repository_id: Uuid,
    pub branch_id: Option<Uuid>,
    pub file_path: String,
    pub file_hash: String,
    pub vulnerability_type: String,
    pub severity: Severity,
    pub title: String,
    pub description: Option<String>,
    pub line_number: Option<i32>,
    pub code_snippet: Option<String>,
    pub recommendation: Option<String>,
    pub status: VulnerabilityStatus,
    pub manual_analysis: Option<String>,
    pub analyzed_by: Option<String>,
    pub analyzed_at: Option<DateTime<Utc>>,
    pub detected_at: DateTime<Utc>,
}

/// Cross-repository identity of a finding.
///
/// Two rows with the same identity describe the same vulnerable content,
/// whichever repository or branch they were found in.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, FromRow)]
pub struct FindingIdentity {
    pub file_path: String,
    pub file_hash: String,
    pub vulnerability_type: String,
    pub line_number: Option<i32>,
}

impl Vulnerability {
    pub fn identity(&self) -> FindingIdentity {
        FindingIdentity {
            file_path: self.file_path.clone(),
            file_hash: self.file_hash.clone(),
            vulnerability_type: self.vulnerability_type.clone(),
            line_number: self.line_number,
        }
    }
}

/// List row joined with repository and branch names.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct VulnerabilityListItem {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub vulnerability: Vulnerability,
    pub repo_owner: String,
    pub repo_name: String,
    pub repo_url: String,
    pub branch: Option<String>,
    /// Hex fingerprint of the finding identity.
    #[sqlx(skip)]
    pub identity: String,
    #[sqlx(skip)]
    pub source_url: String,
}

/// Filters for listing vulnerabilities.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct VulnerabilityFilters {
    pub severity: Option<Severity>,
    pub status: Option<VulnerabilityStatus>,
    /// Repository owner.
    #[serde(alias = "org")]
    pub organization: Option<String>,
    /// Repository name.
    #[serde(alias = "repo")]
    pub repository: Option<String>,
    pub repository_id: Option<Uuid>,
}

/// Analyst edit of a vulnerability.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AnalysisUpdate {
    pub status: Option<VulnerabilityStatus>,
    pub manual_analysis: Option<String>,
    pub analyzed_by: Option<String>,
}

impl AnalysisUpdate {
    pub fn is_empty(&self) -> bool {
        self.status.is_none() && self.manual_analysis.is_none() && self.analyzed_by.is_none()
    }
}

/// One finding as reported by the external scanner.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScanCandidate {
    pub file_path: String,
    #[serde(default)]
    pub file_hash: String,
    #[serde(alias = "kind", alias = "type")]
    pub vulnerability_type: String,
    pub severity: Option<Severity>,
    pub title: Option<String>,
    #[serde(alias = "message")]
    pub description: Option<String>,
    #[serde(alias = "line")]
    pub line_number: Option<i32>,
    #[serde(alias = "snippet")]
    pub code_snippet: Option<String>,
    pub recommendation: Option<String>,
}

/// Request body for `POST /repositories/{id}/findings`.
#[derive(Debug, Clone, Deserialize)]
pub struct SubmitFindings {
    pub branch: Option<String>,
    pub findings: Vec<ScanCandidate>,
}
