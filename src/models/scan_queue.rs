//! Scan queue entries and their append-only history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;
use validator::Validate;

use crate::models::repository::RepositoryRef;

/// Lowest and highest accepted scheduling priority.
pub const MIN_PRIORITY: i32 = -1000;
pub const MAX_PRIORITY: i32 = 1000;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "queue_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum QueueStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl QueueStatus {
    /// Terminal entries never transition again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ScanQueueEntry {
    pub id: Uuid,
    pub repository_id: Uuid,
    pub priority: i32,
    pub status: QueueStatus,
    pub attempts: i32,
    pub max_attempts: i32,
    pub error_message: Option<String>,
    pub job_name: Option<String>,
    pub queued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Queue listing row with the repository's display name attached.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct ScanQueueItem {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub entry: ScanQueueEntry,
    pub repository_name: Option<String>,
}

/// Request body for `POST /scan`.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct EnqueueRequest {
    #[serde(alias = "repo_url")]
    #[validate(length(min = 1, max = 2048))]
    pub url: String,
    #[validate(length(min = 1, max = 255))]
    pub owner: Option<String>,
    #[validate(length(min = 1, max = 255))]
    pub name: Option<String>,
    #[serde(default)]
    #[validate(range(min = MIN_PRIORITY, max = MAX_PRIORITY))]
    pub priority: i32,
    #[validate(range(min = 1, max = 10))]
    pub max_attempts: Option<i32>,
}

impl EnqueueRequest {
    pub fn repository_ref(&self) -> RepositoryRef {
        RepositoryRef {
            url: self.url.clone(),
            owner: self.owner.clone(),
            name: self.name.clone(),
        }
    }
}

/// Response for `POST /scan`.
#[derive(Debug, Clone, Serialize)]
pub struct EnqueueResponse {
    pub repository_id: Uuid,
    pub scan_queue_id: Uuid,
    pub entry: ScanQueueEntry,
}

/// Request body for `POST /queue/claim`.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ClaimRequest {
    #[validate(length(min = 1, max = 64))]
    pub worker_id: String,
}

/// Result reported by a worker for the attempt it holds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum ScanOutcome {
    Success {
        #[serde(default)]
        vulnerabilities_found: i32,
    },
    Failure {
        error: String,
    },
}

/// Request body for `POST /queue/{id}/complete`.
#[derive(Debug, Clone, Deserialize)]
pub struct CompleteRequest {
    #[serde(flatten)]
    pub outcome: ScanOutcome,
    /// Lease handle returned by claim; rejected when it no longer matches.
    pub job_name: String,
}

/// Filters for listing queue entries.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct QueueFilters {
    pub status: Option<QueueStatus>,
    pub repository_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ScanHistory {
    pub id: Uuid,
    pub repository_id: Uuid,
    pub scan_queue_id: Uuid,
    pub status: QueueStatus,
    pub attempt: i32,
    pub vulnerabilities_found: i32,
    pub duration_seconds: Option<i64>,
    pub error_message: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: DateTime<Utc>,
}
