//! Scan queue scheduling: enqueue, atomic claim, completion with bounded
//! retry, and lease reclaim.
//!
//! Every transition runs inside one transaction that also updates the owning
//! repository's scan status and appends the attempt's history row.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{FromRow, PgConnection, PgPool};
use uuid::Uuid;

use crate::config::{QueueConfig, RetryPriority};
use crate::errors::AppError;
use crate::models::pagination::{PagedResult, Pagination};
use crate::models::repository::{RepositoryRef, ScanStatus};
use crate::models::scan_queue::{
    EnqueueResponse, QueueFilters, QueueStatus, ScanOutcome, ScanQueueEntry, ScanQueueItem,
    MAX_PRIORITY, MIN_PRIORITY,
};
use crate::services::queue_lifecycle::{self, FailureOutcome};
use crate::services::repository;

/// Claim attempts before reporting "no work" after repeated lost races.
const CLAIM_RETRIES: usize = 5;

fn validate_priority(priority: i32) -> Result<(), AppError> {
    if (MIN_PRIORITY..=MAX_PRIORITY).contains(&priority) {
        Ok(())
    } else {
        Err(AppError::Validation(format!(
            "Priority {priority} is outside {MIN_PRIORITY}..={MAX_PRIORITY}"
        )))
    }
}

fn validate_max_attempts(max_attempts: i32) -> Result<(), AppError> {
    if (1..=10).contains(&max_attempts) {
        Ok(())
    } else {
        Err(AppError::Validation(format!(
            "max_attempts {max_attempts} is outside 1..=10"
        )))
    }
}

async fn insert_entry(
    conn: &mut PgConnection,
    repository_id: Uuid,
    priority: i32,
    max_attempts: i32,
) -> Result<ScanQueueEntry, AppError> {
    let entry = sqlx::query_as::<_, ScanQueueEntry>(
        "INSERT INTO scan_queue (id, repository_id, priority, max_attempts) \
         VALUES ($1, $2, $3, $4) RETURNING *",
    )
    .bind(Uuid::now_v7())
    .bind(repository_id)
    .bind(priority)
    .bind(max_attempts)
    .fetch_one(&mut *conn)
    .await?;
    Ok(entry)
}

/// Register the repository if needed and queue a scan for it.
pub async fn enqueue(
    pool: &PgPool,
    repo_ref: &RepositoryRef,
    priority: i32,
    max_attempts: i32,
) -> Result<EnqueueResponse, AppError> {
    validate_priority(priority)?;
    validate_max_attempts(max_attempts)?;

    let mut tx = pool.begin().await?;
    let repo = repository::get_or_create(&mut tx, repo_ref).await?;
    let entry = insert_entry(&mut tx, repo.id, priority, max_attempts).await?;
    tx.commit().await?;

    tracing::info!(
        scan_queue_id = %entry.id,
        repository = %repo.full_name(),
        priority,
        "Queued scan"
    );

    Ok(EnqueueResponse {
        repository_id: repo.id,
        scan_queue_id: entry.id,
        entry,
    })
}

/// Result of a conditional enqueue.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum EnqueueOutcome {
    Queued { entry: ScanQueueEntry },
    Skipped { repository_id: Uuid, reason: String },
}

/// Queue a scan unless one is pending or the last success is younger than `min_rescan_age`.
pub async fn enqueue_if_due(
    pool: &PgPool,
    repo_ref: &RepositoryRef,
    priority: i32,
    max_attempts: i32,
    min_rescan_age: Duration,
) -> Result<EnqueueOutcome, AppError> {
    validate_priority(priority)?;
    validate_max_attempts(max_attempts)?;
    let min_age = chrono::Duration::from_std(min_rescan_age)
        .map_err(|e| AppError::Validation(format!("Invalid rescan age: {e}")))?;

    let mut tx = pool.begin().await?;
    let repo = repository::get_or_create(&mut tx, repo_ref).await?;

    // Serialize concurrent schedulers on the repository row.
    sqlx::query("SELECT 1 FROM repositories WHERE id = $1 FOR UPDATE")
        .bind(repo.id)
        .execute(&mut *tx)
        .await?;

    let active: bool = sqlx::query_scalar(
        "SELECT EXISTS (SELECT 1 FROM scan_queue \
         WHERE repository_id = $1 AND status IN ('queued', 'processing'))",
    )
    .bind(repo.id)
    .fetch_one(&mut *tx)
    .await?;

    if active {
        return Ok(EnqueueOutcome::Skipped {
            repository_id: repo.id,
            reason: "scan already queued or running".to_string(),
        });
    }

    if let (ScanStatus::Completed, Some(last)) = (repo.scan_status, repo.last_scanned_at) {
        // Past the representable range counts as not yet due.
        if last.checked_add_signed(min_age).map_or(true, |due| due > Utc::now()) {
            return Ok(EnqueueOutcome::Skipped {
                repository_id: repo.id,
                reason: format!("last scanned at {last}"),
            });
        }
    }

    let entry = insert_entry(&mut tx, repo.id, priority, max_attempts).await?;
    tx.commit().await?;

    tracing::info!(
        scan_queue_id = %entry.id,
        repository = %repo.full_name(),
        priority,
        "Queued scheduled scan"
    );
    Ok(EnqueueOutcome::Queued { entry })
}

#[derive(Debug, FromRow)]
struct ClaimCandidate {
    #[sqlx(flatten)]
    entry: ScanQueueEntry,
    owner: String,
    name: String,
}

/// Hand the highest-priority queued entry to exactly one worker.
///
/// Returns `None` when nothing is queued. Lost races are retried here and
/// never reach the caller.
pub async fn claim(pool: &PgPool, worker_id: &str) -> Result<Option<ScanQueueEntry>, AppError> {
    if worker_id.is_empty() || worker_id.len() > 64 {
        return Err(AppError::Validation(
            "worker_id must be 1..=64 characters".to_string(),
        ));
    }

    for attempt in 1..=CLAIM_RETRIES {
        match try_claim(pool, worker_id).await {
            Ok(claimed) => return Ok(claimed),
            Err(e) if e.is_retryable() => {
                tracing::debug!(worker_id, attempt, error = %e, "Claim lost a race, retrying");
            }
            Err(e) => return Err(e),
        }
    }

    tracing::warn!(worker_id, "Claim retries exhausted, reporting no work");
    Ok(None)
}

async fn try_claim(pool: &PgPool, worker_id: &str) -> Result<Option<ScanQueueEntry>, AppError> {
    let mut tx = pool.begin().await?;

    let candidate = sqlx::query_as::<_, ClaimCandidate>(
        "SELECT sq.*, r.owner, r.name FROM scan_queue sq \
         JOIN repositories r ON r.id = sq.repository_id \
         WHERE sq.status = 'queued' \
         ORDER BY sq.priority DESC, sq.queued_at ASC, sq.id ASC \
         LIMIT 1 \
         FOR UPDATE OF sq SKIP LOCKED",
    )
    .fetch_optional(&mut *tx)
    .await?;

    let Some(candidate) = candidate else {
        return Ok(None);
    };
    queue_lifecycle::claim(&candidate.entry)?;

    let job_name = queue_lifecycle::job_name(
        worker_id,
        &candidate.owner,
        &candidate.name,
        candidate.entry.id,
        candidate.entry.attempts + 1,
    );

    let claimed = sqlx::query_as::<_, ScanQueueEntry>(
        "UPDATE scan_queue SET status = 'processing', started_at = NOW(), job_name = $2 \
         WHERE id = $1 AND status = 'queued' RETURNING *",
    )
    .bind(candidate.entry.id)
    .bind(&job_name)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or_else(|| {
        AppError::Concurrency(format!("Entry {} was claimed concurrently", candidate.entry.id))
    })?;

    sqlx::query(
        "UPDATE repositories SET scan_status = 'scanning', updated_at = NOW() WHERE id = $1",
    )
    .bind(claimed.repository_id)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    tracing::info!(
        scan_queue_id = %claimed.id,
        worker_id,
        job_name = %job_name,
        attempt = claimed.attempts + 1,
        "Claimed scan"
    );
    Ok(Some(claimed))
}

/// Record the outcome of the attempt a worker holds.
///
/// `job_name` must match the current lease; a mismatch means the lease was
/// reclaimed and the report is rejected as a conflict.
pub async fn complete(
    pool: &PgPool,
    id: Uuid,
    outcome: &ScanOutcome,
    job_name: &str,
    policy: RetryPriority,
) -> Result<ScanQueueEntry, AppError> {
    if let ScanOutcome::Success {
        vulnerabilities_found,
    } = outcome
    {
        if *vulnerabilities_found < 0 {
            return Err(AppError::Validation(
                "vulnerabilities_found must not be negative".to_string(),
            ));
        }
    }

    let mut tx = pool.begin().await?;

    let entry = sqlx::query_as::<_, ScanQueueEntry>(
        "SELECT * FROM scan_queue WHERE id = $1 FOR UPDATE",
    )
    .bind(id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or_else(|| AppError::NotFound("Scan queue entry not found".to_string()))?;

    if entry.status != QueueStatus::Processing {
        return Err(AppError::InvalidTransition(format!(
            "Scan queue entry {id} is {:?}, not processing",
            entry.status
        )));
    }
    if entry.job_name.as_deref() != Some(job_name) {
        return Err(AppError::Conflict(format!(
            "Lease {job_name} no longer holds scan queue entry {id}"
        )));
    }

    let updated = match outcome {
        ScanOutcome::Success {
            vulnerabilities_found,
        } => apply_success(&mut tx, &entry, *vulnerabilities_found).await?,
        ScanOutcome::Failure { error } => apply_failure(&mut tx, &entry, error, policy).await?,
    };

    tx.commit().await?;
    Ok(updated)
}

async fn db_now(conn: &mut PgConnection) -> Result<DateTime<Utc>, AppError> {
    Ok(sqlx::query_scalar("SELECT NOW()").fetch_one(&mut *conn).await?)
}

struct HistoryRecord<'a> {
    entry: &'a ScanQueueEntry,
    status: QueueStatus,
    attempt: i32,
    vulnerabilities_found: i32,
    error_message: Option<&'a str>,
    finished_at: DateTime<Utc>,
}

async fn append_history(conn: &mut PgConnection, record: HistoryRecord<'_>) -> Result<(), AppError> {
    sqlx::query(
        "INSERT INTO scan_history \
         (id, repository_id, scan_queue_id, status, attempt, vulnerabilities_found, \
          duration_seconds, error_message, started_at, completed_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
    )
    .bind(Uuid::now_v7())
    .bind(record.entry.repository_id)
    .bind(record.entry.id)
    .bind(record.status)
    .bind(record.attempt)
    .bind(record.vulnerabilities_found)
    .bind(queue_lifecycle::attempt_duration(record.entry, record.finished_at))
    .bind(record.error_message)
    .bind(record.entry.started_at)
    .bind(record.finished_at)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn apply_success(
    conn: &mut PgConnection,
    entry: &ScanQueueEntry,
    vulnerabilities_found: i32,
) -> Result<ScanQueueEntry, AppError> {
    queue_lifecycle::succeed(entry)?;
    let now = db_now(conn).await?;

    let updated = sqlx::query_as::<_, ScanQueueEntry>(
        "UPDATE scan_queue SET status = 'completed', completed_at = $2, error_message = NULL \
         WHERE id = $1 RETURNING *",
    )
    .bind(entry.id)
    .bind(now)
    .fetch_one(&mut *conn)
    .await?;

    append_history(
        conn,
        HistoryRecord {
            entry,
            status: QueueStatus::Completed,
            attempt: entry.attempts + 1,
            vulnerabilities_found,
            error_message: None,
            finished_at: now,
        },
    )
    .await?;

    sqlx::query(
        "UPDATE repositories SET scan_status = 'completed', scan_error = NULL, \
         last_scanned_at = $2, first_scanned_at = COALESCE(first_scanned_at, $2), \
         updated_at = $2 \
         WHERE id = $1",
    )
    .bind(entry.repository_id)
    .bind(now)
    .execute(&mut *conn)
    .await?;

    tracing::info!(
        scan_queue_id = %entry.id,
        repository_id = %entry.repository_id,
        vulnerabilities_found,
        "Scan completed"
    );
    Ok(updated)
}

async fn apply_failure(
    conn: &mut PgConnection,
    entry: &ScanQueueEntry,
    error: &str,
    policy: RetryPriority,
) -> Result<ScanQueueEntry, AppError> {
    let decision = queue_lifecycle::fail(entry, policy)?;
    let now = db_now(conn).await?;

    let updated = match decision {
        FailureOutcome::Retry { attempts, priority } => {
            sqlx::query_as::<_, ScanQueueEntry>(
                "UPDATE scan_queue SET status = 'queued', attempts = $2, priority = $3, \
                 error_message = $4, queued_at = $5, started_at = NULL, job_name = NULL \
                 WHERE id = $1 RETURNING *",
            )
            .bind(entry.id)
            .bind(attempts)
            .bind(priority)
            .bind(error)
            .bind(now)
            .fetch_one(&mut *conn)
            .await?
        }
        FailureOutcome::Exhausted { attempts } => {
            sqlx::query_as::<_, ScanQueueEntry>(
                "UPDATE scan_queue SET status = 'failed', attempts = $2, error_message = $3, \
                 completed_at = $4 \
                 WHERE id = $1 RETURNING *",
            )
            .bind(entry.id)
            .bind(attempts)
            .bind(error)
            .bind(now)
            .fetch_one(&mut *conn)
            .await?
        }
    };

    append_history(
        conn,
        HistoryRecord {
            entry,
            status: QueueStatus::Failed,
            attempt: decision.attempts(),
            vulnerabilities_found: 0,
            error_message: Some(error),
            finished_at: now,
        },
    )
    .await?;

    let repo_status = match decision {
        FailureOutcome::Retry { .. } => ScanStatus::Pending,
        FailureOutcome::Exhausted { .. } => ScanStatus::Failed,
    };
    sqlx::query(
        "UPDATE repositories SET scan_status = $2, scan_error = $3, updated_at = $4 WHERE id = $1",
    )
    .bind(entry.repository_id)
    .bind(repo_status)
    .bind(error)
    .bind(now)
    .execute(&mut *conn)
    .await?;

    match decision {
        FailureOutcome::Retry { attempts, priority } => tracing::warn!(
            scan_queue_id = %entry.id,
            attempts,
            max_attempts = entry.max_attempts,
            priority,
            error,
            "Scan failed, requeued"
        ),
        FailureOutcome::Exhausted { attempts } => tracing::error!(
            scan_queue_id = %entry.id,
            attempts,
            error,
            "Scan failed, retries exhausted"
        ),
    }
    Ok(updated)
}

/// Push every entry whose lease expired before `now` through the failure path.
pub async fn reclaim_expired(
    pool: &PgPool,
    now: DateTime<Utc>,
    config: &QueueConfig,
) -> Result<Vec<ScanQueueEntry>, AppError> {
    let lease = chrono::Duration::from_std(config.lease_timeout)
        .map_err(|e| AppError::Internal(format!("Invalid lease timeout: {e}")))?;

    let mut tx = pool.begin().await?;

    // Entries a worker is completing right now are skipped until the next sweep.
    let expired = sqlx::query_as::<_, ScanQueueEntry>(
        "SELECT * FROM scan_queue WHERE status = 'processing' AND started_at <= $1 \
         ORDER BY started_at ASC \
         FOR UPDATE SKIP LOCKED",
    )
    .bind(now - lease)
    .fetch_all(&mut *tx)
    .await?;

    let mut reclaimed = Vec::with_capacity(expired.len());
    for entry in expired
        .iter()
        .filter(|e| queue_lifecycle::is_lease_expired(e, now, config.lease_timeout))
    {
        let error = format!(
            "lease expired after {}s (job {})",
            config.lease_timeout.as_secs(),
            entry.job_name.as_deref().unwrap_or("unknown")
        );
        reclaimed.push(apply_failure(&mut tx, entry, &error, config.retry_priority).await?);
    }

    tx.commit().await?;

    if !reclaimed.is_empty() {
        tracing::warn!(count = reclaimed.len(), "Reclaimed expired scan leases");
    }
    Ok(reclaimed)
}

/// Find a queue entry by ID.
pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<ScanQueueEntry, AppError> {
    sqlx::query_as::<_, ScanQueueEntry>("SELECT * FROM scan_queue WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::NotFound("Scan queue entry not found".to_string()))
}

/// List queue entries in claim order.
pub async fn list(
    pool: &PgPool,
    filters: &QueueFilters,
    pagination: &Pagination,
) -> Result<PagedResult<ScanQueueItem>, AppError> {
    let mut conditions = Vec::new();
    let mut param_idx = 0;
    if filters.status.is_some() {
        param_idx += 1;
        conditions.push(format!("sq.status = ${param_idx}"));
    }
    if filters.repository_id.is_some() {
        param_idx += 1;
        conditions.push(format!("sq.repository_id = ${param_idx}"));
    }
    let where_clause = if conditions.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", conditions.join(" AND "))
    };

    let count_sql = format!("SELECT COUNT(*) FROM scan_queue sq {where_clause}");
    let data_sql = format!(
        "SELECT sq.*, CONCAT(r.owner, '/', r.name) AS repository_name \
         FROM scan_queue sq \
         LEFT JOIN repositories r ON r.id = sq.repository_id \
         {where_clause} \
         ORDER BY sq.priority DESC, sq.queued_at ASC, sq.id ASC \
         LIMIT {} OFFSET {}",
        pagination.limit(),
        pagination.offset()
    );

    let mut count_query = sqlx::query_scalar::<_, i64>(&count_sql);
    let mut data_query = sqlx::query_as::<_, ScanQueueItem>(&data_sql);
    if let Some(status) = filters.status {
        count_query = count_query.bind(status);
        data_query = data_query.bind(status);
    }
    if let Some(repository_id) = filters.repository_id {
        count_query = count_query.bind(repository_id);
        data_query = data_query.bind(repository_id);
    }

    let total = count_query.fetch_one(pool).await?;
    let items = data_query.fetch_all(pool).await?;
    Ok(PagedResult::new(items, total, pagination))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_bounds() {
        assert!(validate_priority(MIN_PRIORITY).is_ok());
        assert!(validate_priority(MAX_PRIORITY).is_ok());
        assert!(matches!(
            validate_priority(MAX_PRIORITY + 1),
            Err(AppError::Validation(_))
        ));
        assert!(validate_priority(MIN_PRIORITY - 1).is_err());
    }

    #[test]
    fn max_attempts_bounds() {
        assert!(validate_max_attempts(1).is_ok());
        assert!(validate_max_attempts(10).is_ok());
        assert!(validate_max_attempts(0).is_err());
        assert!(validate_max_attempts(11).is_err());
    }

    #[test]
    fn enqueue_outcome_serialization() {
        let skipped = EnqueueOutcome::Skipped {
            repository_id: Uuid::nil(),
            reason: "scan already queued or running".to_string(),
        };
        let json = serde_json::to_value(&skipped).unwrap();
        assert_eq!(json["result"], "skipped");
        assert_eq!(json["reason"], "scan already queued or running");
    }
}
