//! Deduplicated statistics and per-repository rankings.
//!
//! The headline summary counts each finding identity once, however many
//! repositories or branches carry it. Rankings use raw per-repository counts.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{FromRow, PgConnection, PgPool};
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::vulnerability::{FindingIdentity, Severity, VulnerabilityStatus};

pub const DEFAULT_TOP: i64 = 10;
pub const MAX_TOP: i64 = 1000;

#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct SeverityCounts {
    pub critical: i64,
    pub high: i64,
    pub medium: i64,
    pub low: i64,
    pub info: i64,
}

impl SeverityCounts {
    fn add(&mut self, severity: Severity) {
        match severity {
            Severity::Critical => self.critical += 1,
            Severity::High => self.high += 1,
            Severity::Medium => self.medium += 1,
            Severity::Low => self.low += 1,
            Severity::Info => self.info += 1,
        }
    }
}

/// Deduplicated totals across every repository.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct Summary {
    /// Distinct finding identities.
    pub total_vulnerabilities: i64,
    /// Identities by their most severe observed severity.
    pub by_severity: SeverityCounts,
    /// Identities with at least one open occurrence.
    pub open_vulnerabilities: i64,
    /// Identities whose every occurrence is ignored.
    pub ignored_vulnerabilities: i64,
    /// Stored rows before deduplication.
    pub raw_vulnerabilities: i64,
    pub total_repositories: i64,
    pub scanned_repositories: i64,
}

/// One distinct `(identity, severity, status)` combination.
#[derive(Debug, Clone, FromRow)]
pub struct IdentityRow {
    #[sqlx(flatten)]
    pub identity: FindingIdentity,
    pub severity: Severity,
    pub status: VulnerabilityStatus,
}

#[derive(Debug, Clone, Copy)]
struct IdentityState {
    severity: Severity,
    open: bool,
    all_ignored: bool,
}

/// Fold occurrence rows into identity-level counts.
pub fn summarize(rows: &[IdentityRow]) -> Summary {
    let mut identities: HashMap<&FindingIdentity, IdentityState> = HashMap::new();

    for row in rows {
        let open = row.status == VulnerabilityStatus::Open;
        let ignored = row.status == VulnerabilityStatus::Ignored;
        identities
            .entry(&row.identity)
            .and_modify(|state| {
                state.severity = state.severity.most_severe(row.severity);
                state.open |= open;
                state.all_ignored &= ignored;
            })
            .or_insert(IdentityState {
                severity: row.severity,
                open,
                all_ignored: ignored,
            });
    }

    let mut summary = Summary {
        total_vulnerabilities: identities.len() as i64,
        ..Summary::default()
    };
    for state in identities.values() {
        summary.by_severity.add(state.severity);
        if state.open {
            summary.open_vulnerabilities += 1;
        }
        if state.all_ignored {
            summary.ignored_vulnerabilities += 1;
        }
    }
    summary
}

/// Global deduplicated summary, read from a single snapshot.
pub async fn summary(pool: &PgPool) -> Result<Summary, AppError> {
    let mut tx = pool.begin().await?;
    sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ READ ONLY")
        .execute(&mut *tx)
        .await?;

    let rows = fetch_identity_rows(&mut tx).await?;
    let raw_vulnerabilities = fetch_raw_count(&mut tx).await?;
    let (total_repositories, scanned_repositories) = fetch_repository_counts(&mut tx).await?;
    tx.commit().await?;

    Ok(Summary {
        raw_vulnerabilities,
        total_repositories,
        scanned_repositories,
        ..summarize(&rows)
    })
}

async fn fetch_identity_rows(conn: &mut PgConnection) -> Result<Vec<IdentityRow>, AppError> {
    let rows = sqlx::query_as::<_, IdentityRow>(
        "SELECT DISTINCT file_path, file_hash, vulnerability_type, line_number, severity, status \
         FROM vulnerabilities",
    )
    .fetch_all(&mut *conn)
    .await?;
    Ok(rows)
}

async fn fetch_raw_count(conn: &mut PgConnection) -> Result<i64, AppError> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM vulnerabilities")
        .fetch_one(&mut *conn)
        .await?;
    Ok(count)
}

async fn fetch_repository_counts(conn: &mut PgConnection) -> Result<(i64, i64), AppError> {
    let counts: (i64, i64) = sqlx::query_as(
        "SELECT COUNT(*), COUNT(*) FILTER (WHERE last_scanned_at IS NOT NULL) FROM repositories",
    )
    .fetch_one(&mut *conn)
    .await?;
    Ok(counts)
}

/// Per-repository raw counts.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct RepositoryRanking {
    pub repository_id: Uuid,
    pub owner: String,
    pub name: String,
    pub url: String,
    pub total_vulnerabilities: i64,
    pub critical_count: i64,
    pub high_count: i64,
    pub medium_count: i64,
    pub low_count: i64,
    pub info_count: i64,
    pub open_count: i64,
    pub confirmed_count: i64,
    pub last_detected_at: Option<DateTime<Utc>>,
    pub last_scanned_at: Option<DateTime<Utc>>,
}

/// Clamp a requested ranking size, defaulting when absent.
pub fn top_limit(requested: Option<i64>) -> Result<i64, AppError> {
    match requested {
        None => Ok(DEFAULT_TOP),
        Some(n) if (1..=MAX_TOP).contains(&n) => Ok(n),
        Some(n) => Err(AppError::Validation(format!(
            "limit {n} is outside 1..={MAX_TOP}"
        ))),
    }
}

/// Repositories ranked by raw vulnerability count, ties broken by id.
pub async fn top_repositories(pool: &PgPool, limit: i64) -> Result<Vec<RepositoryRanking>, AppError> {
    let rows = sqlx::query_as::<_, RepositoryRanking>(
        "SELECT r.id AS repository_id, r.owner, r.name, r.url, \
             COUNT(v.id) AS total_vulnerabilities, \
             COUNT(v.id) FILTER (WHERE v.severity = 'critical') AS critical_count, \
             COUNT(v.id) FILTER (WHERE v.severity = 'high') AS high_count, \
             COUNT(v.id) FILTER (WHERE v.severity = 'medium') AS medium_count, \
             COUNT(v.id) FILTER (WHERE v.severity = 'low') AS low_count, \
             COUNT(v.id) FILTER (WHERE v.severity = 'info') AS info_count, \
             COUNT(v.id) FILTER (WHERE v.status = 'open') AS open_count, \
             COUNT(v.id) FILTER (WHERE v.status = 'confirmed') AS confirmed_count, \
             MAX(v.detected_at) AS last_detected_at, \
             r.last_scanned_at \
         FROM repositories r \
         JOIN vulnerabilities v ON v.repository_id = r.id \
         GROUP BY r.id \
         ORDER BY total_vulnerabilities DESC, r.id ASC \
         LIMIT $1",
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}
