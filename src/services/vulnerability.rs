//! Vulnerability store: filtered listing and analyst edits.

use sqlx::PgPool;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::pagination::{PagedResult, Pagination};
use crate::models::vulnerability::{
    AnalysisUpdate, Vulnerability, VulnerabilityFilters, VulnerabilityListItem,
};
use crate::services::fingerprint;

/// List vulnerabilities, most severe first, then most recently detected.
pub async fn list(
    pool: &PgPool,
    filters: &VulnerabilityFilters,
    pagination: &Pagination,
) -> Result<PagedResult<VulnerabilityListItem>, AppError> {
    let mut conditions: Vec<String> = Vec::new();
    let mut param_index = 0u32;

    if filters.severity.is_some() {
        param_index += 1;
        conditions.push(format!("v.severity = ${param_index}"));
    }
    if filters.status.is_some() {
        param_index += 1;
        conditions.push(format!("v.status = ${param_index}"));
    }
    if filters.organization.is_some() {
        param_index += 1;
        conditions.push(format!("r.owner = ${param_index}"));
    }
    if filters.repository.is_some() {
        param_index += 1;
        conditions.push(format!("r.name = ${param_index}"));
    }
    if filters.repository_id.is_some() {
        param_index += 1;
        conditions.push(format!("v.repository_id = ${param_index}"));
    }

    let where_clause = if conditions.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", conditions.join(" AND "))
    };

    let count_sql = format!(
        "SELECT COUNT(*) FROM vulnerabilities v \
         JOIN repositories r ON r.id = v.repository_id {where_clause}"
    );
    // severity_level enum order puts critical first.
    let data_sql = format!(
        "SELECT v.*, r.owner AS repo_owner, r.name AS repo_name, r.url AS repo_url, \
         b.name AS branch \
         FROM vulnerabilities v \
         JOIN repositories r ON r.id = v.repository_id \
         LEFT JOIN branches b ON b.id = v.branch_id \
         {where_clause} \
         ORDER BY v.severity ASC, v.detected_at DESC, v.id ASC \
         LIMIT {} OFFSET {}",
        pagination.limit(),
        pagination.offset()
    );

    let mut count_query = sqlx::query_scalar::<_, i64>(&count_sql);
    let mut data_query = sqlx::query_as::<_, VulnerabilityListItem>(&data_sql);

    macro_rules! bind_both {
        ($val:expr) => {
            count_query = count_query.bind($val);
            data_query = data_query.bind($val);
        };
    }

    if let Some(severity) = filters.severity {
        bind_both!(severity);
    }
    if let Some(status) = filters.status {
        bind_both!(status);
    }
    if let Some(ref organization) = filters.organization {
        bind_both!(organization);
    }
    if let Some(ref repository) = filters.repository {
        bind_both!(repository);
    }
    if let Some(repository_id) = filters.repository_id {
        bind_both!(repository_id);
    }

    let total = count_query.fetch_one(pool).await?;
    let mut items = data_query.fetch_all(pool).await?;
    for item in &mut items {
        decorate(item);
    }

    Ok(PagedResult::new(items, total, pagination))
}

/// Fill in the derived identity fingerprint and source link.
fn decorate(item: &mut VulnerabilityListItem) {
    let v = &item.vulnerability;
    item.identity = fingerprint::compute(&v.identity());
    item.source_url =
        fingerprint::source_url(&item.repo_url, item.branch.as_deref(), &v.file_path, v.line_number);
}

/// Find a vulnerability by ID.
pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Vulnerability, AppError> {
    sqlx::query_as::<_, Vulnerability>("SELECT * FROM vulnerabilities WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::NotFound("Vulnerability not found".to_string()))
}

/// Find a vulnerability with its repository, branch and derived fields.
pub async fn find_detail(pool: &PgPool, id: Uuid) -> Result<VulnerabilityListItem, AppError> {
    let mut item = sqlx::query_as::<_, VulnerabilityListItem>(
        "SELECT v.*, r.owner AS repo_owner, r.name AS repo_name, r.url AS repo_url, \
         b.name AS branch \
         FROM vulnerabilities v \
         JOIN repositories r ON r.id = v.repository_id \
         LEFT JOIN branches b ON b.id = v.branch_id \
         WHERE v.id = $1",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::NotFound("Vulnerability not found".to_string()))?;
    decorate(&mut item);
    Ok(item)
}

/// Apply an analyst edit. Any status may be set, including reopening an
/// automatically ignored row.
pub async fn update_analysis(
    pool: &PgPool,
    id: Uuid,
    update: &AnalysisUpdate,
) -> Result<Vulnerability, AppError> {
    if update.is_empty() {
        return Err(AppError::Validation(
            "At least one of status, manual_analysis or analyzed_by is required".to_string(),
        ));
    }

    let updated = sqlx::query_as::<_, Vulnerability>(
        "UPDATE vulnerabilities SET \
             status = COALESCE($2, status), \
             manual_analysis = COALESCE($3, manual_analysis), \
             analyzed_by = COALESCE($4, analyzed_by), \
             analyzed_at = NOW() \
         WHERE id = $1 RETURNING *",
    )
    .bind(id)
    .bind(update.status)
    .bind(&update.manual_analysis)
    .bind(&update.analyzed_by)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::NotFound("Vulnerability not found".to_string()))?;

    tracing::info!(
        vulnerability_id = %id,
        status = ?updated.status,
        analyzed_by = updated.analyzed_by.as_deref().unwrap_or(""),
        "Vulnerability analysis updated"
    );
    Ok(updated)
}
