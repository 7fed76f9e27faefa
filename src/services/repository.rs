//! Repository registry: URL parsing, get-or-create, listing and deletion.

use std::sync::LazyLock;

use regex::Regex;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::pagination::{PagedResult, Pagination};
use crate::models::repository::{
    FilterOptions, Repository, RepositoryFilters, RepositoryName, RepositoryRef,
};
use crate::models::scan_queue::ScanHistory;

static REPO_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?:https?://(?:[^@/]+@)?(?P<host>[^/:]+)(?::\d+)?/|git@(?P<ssh_host>[^:/]+):)(?P<owner>[A-Za-z0-9_.-]+)/(?P<name>[A-Za-z0-9_.-]+?)(?:\.git)?/?$",
    )
    .expect("repository URL pattern is valid")
});

/// Owner, name and canonical URL extracted from a repository URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedRepoUrl {
    pub host: String,
    pub owner: String,
    pub name: String,
    pub canonical_url: String,
}

/// Parse `https://host/owner/name[.git]` or `git@host:owner/name[.git]`.
pub fn parse_repo_url(url: &str) -> Result<ParsedRepoUrl, AppError> {
    let invalid = || AppError::Validation(format!("Invalid repository URL: {url}"));
    let caps = REPO_URL.captures(url.trim()).ok_or_else(invalid)?;

    let host = caps
        .name("host")
        .or_else(|| caps.name("ssh_host"))
        .map(|m| m.as_str().to_ascii_lowercase())
        .ok_or_else(invalid)?;
    let owner = caps["owner"].to_string();
    let name = caps["name"].to_string();
    if name == "." || name == ".." || owner == "." || owner == ".." {
        return Err(invalid());
    }

    Ok(ParsedRepoUrl {
        canonical_url: format!("https://{host}/{owner}/{name}"),
        host,
        owner,
        name,
    })
}

/// Find the repository for a reference, creating it on first sight.
///
/// Runs on the caller's connection so enqueue can do it inside its transaction.
pub async fn get_or_create(
    conn: &mut PgConnection,
    repo_ref: &RepositoryRef,
) -> Result<Repository, AppError> {
    let parsed = parse_repo_url(&repo_ref.url)?;
    let owner = repo_ref.owner.clone().unwrap_or(parsed.owner);
    let name = repo_ref.name.clone().unwrap_or(parsed.name);

    // A concurrent insert of the same repository makes the INSERT a no-op;
    // the second pass then finds the winner's row.
    for _ in 0..2 {
        let existing = sqlx::query_as::<_, Repository>(
            "SELECT * FROM repositories WHERE url = $1 OR (owner = $2 AND name = $3)",
        )
        .bind(&parsed.canonical_url)
        .bind(&owner)
        .bind(&name)
        .fetch_all(&mut *conn)
        .await?;

        if let Some(repo) = existing.iter().find(|r| r.url == parsed.canonical_url) {
            if repo.owner != owner || repo.name != name {
                return Err(AppError::Conflict(format!(
                    "Repository {} is registered as {}, not {owner}/{name}",
                    repo.url,
                    repo.full_name()
                )));
            }
            return Ok(repo.clone());
        }
        if let Some(repo) = existing.first() {
            return Err(AppError::Conflict(format!(
                "Repository {owner}/{name} is already registered under {}",
                repo.url
            )));
        }

        let inserted = sqlx::query_as::<_, Repository>(
            "INSERT INTO repositories (id, url, owner, name) VALUES ($1, $2, $3, $4) \
             ON CONFLICT DO NOTHING RETURNING *",
        )
        .bind(Uuid::now_v7())
        .bind(&parsed.canonical_url)
        .bind(&owner)
        .bind(&name)
        .fetch_optional(&mut *conn)
        .await?;

        if let Some(repo) = inserted {
            tracing::info!(repository_id = %repo.id, url = %repo.url, "Registered repository");
            return Ok(repo);
        }
    }

    Err(AppError::Conflict(format!(
        "Repository {owner}/{name} was modified concurrently"
    )))
}

/// Find a repository by ID.
pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Repository, AppError> {
    sqlx::query_as::<_, Repository>("SELECT * FROM repositories WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::NotFound("Repository not found".to_string()))
}

/// List repositories, most recently scanned first.
pub async fn list(
    pool: &PgPool,
    filters: &RepositoryFilters,
    pagination: &Pagination,
) -> Result<PagedResult<Repository>, AppError> {
    let where_clause = if filters.scan_status.is_some() {
        "WHERE scan_status = $1"
    } else {
        ""
    };

    let count_sql = format!("SELECT COUNT(*) FROM repositories {where_clause}");
    let data_sql = format!(
        "SELECT * FROM repositories {where_clause} \
         ORDER BY last_scanned_at DESC NULLS LAST, created_at DESC \
         LIMIT {} OFFSET {}",
        pagination.limit(),
        pagination.offset()
    );

    let mut count_query = sqlx::query_scalar::<_, i64>(&count_sql);
    let mut data_query = sqlx::query_as::<_, Repository>(&data_sql);
    if let Some(status) = filters.scan_status {
        count_query = count_query.bind(status);
        data_query = data_query.bind(status);
    }

    let total = count_query.fetch_one(pool).await?;
    let items = data_query.fetch_all(pool).await?;
    Ok(PagedResult::new(items, total, pagination))
}

/// Delete a repository; branches, vulnerabilities, queue entries and history cascade.
pub async fn delete(pool: &PgPool, id: Uuid) -> Result<(), AppError> {
    let result = sqlx::query("DELETE FROM repositories WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("Repository not found".to_string()));
    }
    tracing::info!(repository_id = %id, "Deleted repository");
    Ok(())
}

/// Scan attempts recorded for a repository, newest first.
pub async fn history(pool: &PgPool, id: Uuid) -> Result<Vec<ScanHistory>, AppError> {
    find_by_id(pool, id).await?;
    let rows = sqlx::query_as::<_, ScanHistory>(
        "SELECT * FROM scan_history WHERE repository_id = $1 ORDER BY completed_at DESC",
    )
    .bind(id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Organizations and repositories that currently have vulnerabilities.
pub async fn filter_options(pool: &PgPool) -> Result<FilterOptions, AppError> {
    let (organizations, repositories) = tokio::try_join!(
        sqlx::query_scalar::<_, String>(
            "SELECT DISTINCT r.owner FROM repositories r \
             JOIN vulnerabilities v ON v.repository_id = r.id \
             ORDER BY r.owner",
        )
        .fetch_all(pool),
        sqlx::query_as::<_, RepositoryName>(
            "SELECT DISTINCT r.owner, r.name FROM repositories r \
             JOIN vulnerabilities v ON v.repository_id = r.id \
             ORDER BY r.owner, r.name",
        )
        .fetch_all(pool),
    )?;

    Ok(FilterOptions {
        organizations,
        repositories,
    })
}
