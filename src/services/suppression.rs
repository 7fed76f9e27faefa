//! Global safe-file suppression.
//!
//! Rules are matched by exact path plus optional content hash. Adding a rule
//! retroactively ignores every matching vulnerability in one statement, and
//! ingestion consults the same rules before persisting. Both sides take the
//! same per-path advisory lock, so for a given path a reader sees the rule
//! set either before or after the bulk update, never in between.

use sqlx::{FromRow, PgConnection, PgPool};
use uuid::Uuid;
use validator::Validate;

use crate::config::MatchScope;
use crate::errors::AppError;
use crate::models::safe_file::{CreateSafeFileRule, MarkFileSafe, RuleApplied, RuleSet, SafeFileRule};
use crate::services::vulnerability;

pub const AUTO_IGNORE_NOTE: &str = "Auto-ignored: file marked safe globally";
pub const SYSTEM_ANALYST: &str = "system";

/// Analysis note stamped on rows suppressed by a rule.
pub fn suppression_note(reason: Option<&str>) -> String {
    match reason.map(str::trim).filter(|r| !r.is_empty()) {
        Some(reason) => format!("{AUTO_IGNORE_NOTE}: {reason}"),
        None => AUTO_IGNORE_NOTE.to_string(),
    }
}

/// Analyst recorded on rows suppressed by a rule.
pub fn suppression_analyst(marked_by: Option<&str>) -> &str {
    marked_by
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .unwrap_or(SYSTEM_ANALYST)
}

/// Take the transaction-scoped lock for each distinct path, in sorted order.
pub async fn lock_paths(conn: &mut PgConnection, paths: &[&str]) -> Result<(), AppError> {
    let mut sorted = paths.to_vec();
    sorted.sort_unstable();
    sorted.dedup();

    for path in sorted {
        sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
            .bind(path)
            .execute(&mut *conn)
            .await?;
    }
    Ok(())
}

async fn current_version(conn: &mut PgConnection) -> Result<i64, AppError> {
    Ok(
        sqlx::query_scalar("SELECT version FROM suppression_rule_set WHERE id")
            .fetch_one(&mut *conn)
            .await?,
    )
}

async fn bump_version(conn: &mut PgConnection) -> Result<i64, AppError> {
    Ok(sqlx::query_scalar(
        "UPDATE suppression_rule_set SET version = version + 1, updated_at = NOW() \
         WHERE id RETURNING version",
    )
    .fetch_one(&mut *conn)
    .await?)
}

/// Rules that could match any of `paths`, with the version they were read at.
///
/// Callers hold the path locks, so the result stays valid until commit.
pub async fn load_rule_set_for_paths(
    conn: &mut PgConnection,
    paths: &[String],
) -> Result<RuleSet, AppError> {
    let version = current_version(conn).await?;
    let rules = sqlx::query_as::<_, SafeFileRule>(
        "SELECT * FROM safe_files WHERE file_path = ANY($1) ORDER BY file_path, marked_at DESC",
    )
    .bind(paths)
    .fetch_all(&mut *conn)
    .await?;
    Ok(RuleSet { version, rules })
}

#[derive(Debug, FromRow)]
struct UpsertedRule {
    #[sqlx(flatten)]
    rule: SafeFileRule,
    inserted: bool,
}

/// Upsert a rule and ignore every existing vulnerability it matches.
///
/// Re-adding an existing `(file_path, file_hash)` refreshes its metadata and
/// re-applies it without bumping the rule-set version.
pub async fn add_rule(pool: &PgPool, input: &CreateSafeFileRule) -> Result<RuleApplied, AppError> {
    input.validate()?;

    let mut tx = pool.begin().await?;
    lock_paths(&mut tx, &[input.file_path.as_str()]).await?;

    let upserted = sqlx::query_as::<_, UpsertedRule>(
        "INSERT INTO safe_files (id, file_path, file_hash, reason, marked_by) \
         VALUES ($1, $2, $3, $4, $5) \
         ON CONFLICT ON CONSTRAINT uq_safe_files_path_hash DO UPDATE SET \
             reason = COALESCE(EXCLUDED.reason, safe_files.reason), \
             marked_by = COALESCE(EXCLUDED.marked_by, safe_files.marked_by), \
             marked_at = NOW() \
         RETURNING *, (xmax = 0) AS inserted",
    )
    .bind(Uuid::now_v7())
    .bind(&input.file_path)
    .bind(&input.file_hash)
    .bind(&input.reason)
    .bind(&input.marked_by)
    .fetch_one(&mut *tx)
    .await?;

    let rule = upserted.rule;
    let created = upserted.inserted;
    let version = if created {
        bump_version(&mut tx).await?
    } else {
        current_version(&mut tx).await?
    };

    // Runs on re-adds too: rows reopened since the rule was first added are ignored again.
    let suppressed = sqlx::query(
        "UPDATE vulnerabilities SET status = 'ignored', \
             manual_analysis = CONCAT_WS(E'\\n\\n', NULLIF(manual_analysis, ''), $3::TEXT), \
             analyzed_by = $4, analyzed_at = NOW() \
         WHERE file_path = $1 AND ($2::TEXT IS NULL OR file_hash = $2) \
           AND status <> 'ignored'",
    )
    .bind(&rule.file_path)
    .bind(&rule.file_hash)
    .bind(suppression_note(rule.reason.as_deref()))
    .bind(suppression_analyst(rule.marked_by.as_deref()))
    .execute(&mut *tx)
    .await?
    .rows_affected();

    tx.commit().await?;

    tracing::info!(
        rule_id = %rule.id,
        file_path = %rule.file_path,
        hash_scoped = rule.file_hash.is_some(),
        created,
        suppressed,
        version,
        "Safe file rule applied"
    );

    Ok(RuleApplied {
        rule,
        created,
        suppressed,
        version,
    })
}

/// Delete a rule. Vulnerabilities it suppressed stay ignored.
pub async fn remove_rule(pool: &PgPool, id: Uuid) -> Result<i64, AppError> {
    let mut tx = pool.begin().await?;

    let path: Option<String> = sqlx::query_scalar("SELECT file_path FROM safe_files WHERE id = $1")
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;
    let path = path.ok_or_else(|| AppError::NotFound("Safe file rule not found".to_string()))?;
    lock_paths(&mut tx, &[path.as_str()]).await?;

    let deleted = sqlx::query("DELETE FROM safe_files WHERE id = $1")
        .bind(id)
        .execute(&mut *tx)
        .await?
        .rows_affected();
    if deleted == 0 {
        return Err(AppError::NotFound("Safe file rule not found".to_string()));
    }

    let version = bump_version(&mut tx).await?;
    tx.commit().await?;

    tracing::info!(rule_id = %id, file_path = %path, version, "Safe file rule removed");
    Ok(version)
}

/// Every rule with the current rule-set version.
pub async fn list_rules(pool: &PgPool) -> Result<RuleSet, AppError> {
    let mut tx = pool.begin().await?;
    sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ READ ONLY")
        .execute(&mut *tx)
        .await?;

    let version = current_version(&mut tx).await?;
    let rules = sqlx::query_as::<_, SafeFileRule>(
        "SELECT * FROM safe_files ORDER BY file_path, marked_at DESC",
    )
    .fetch_all(&mut *tx)
    .await?;
    tx.commit().await?;

    Ok(RuleSet { version, rules })
}

/// Build the rule a "mark this file safe" action creates for a vulnerability.
pub fn rule_for_vulnerability(
    file_path: &str,
    file_hash: &str,
    request: &MarkFileSafe,
    default_scope: MatchScope,
) -> Result<CreateSafeFileRule, AppError> {
    let file_hash = match request.scope.unwrap_or(default_scope) {
        MatchScope::Path => None,
        MatchScope::Hash if file_hash.is_empty() => {
            return Err(AppError::Validation(
                "Vulnerability has no content hash, mark it safe with path scope".to_string(),
            ));
        }
        MatchScope::Hash => Some(file_hash.to_string()),
    };

    Ok(CreateSafeFileRule {
        file_path: file_path.to_string(),
        file_hash,
        reason: request.reason.clone(),
        marked_by: request.marked_by.clone(),
    })
}

/// Mark a vulnerability's file safe globally.
pub async fn mark_vulnerability_file_safe(
    pool: &PgPool,
    vulnerability_id: Uuid,
    request: &MarkFileSafe,
    default_scope: MatchScope,
) -> Result<RuleApplied, AppError> {
    let vuln = vulnerability::find_by_id(pool, vulnerability_id).await?;
    let input = rule_for_vulnerability(&vuln.file_path, &vuln.file_hash, request, default_scope)?;
    add_rule(pool, &input).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn note_includes_reason() {
        assert_eq!(suppression_note(None), AUTO_IGNORE_NOTE);
        assert_eq!(suppression_note(Some("  ")), AUTO_IGNORE_NOTE);
        assert_eq!(
            suppression_note(Some("vendored fixture")),
            "Auto-ignored: file marked safe globally: vendored fixture"
        );
    }

    #[test]
    fn analyst_defaults_to_system() {
        assert_eq!(suppression_analyst(None), "system");
        assert_eq!(suppression_analyst(Some("")), "system");
        assert_eq!(suppression_analyst(Some("alice")), "alice");
    }

    #[test]
    fn hash_scope_carries_content_hash() {
        let rule = rule_for_vulnerability("a.yml", "h1", &MarkFileSafe::default(), MatchScope::Hash)
            .unwrap();
        assert_eq!(rule.file_path, "a.yml");
        assert_eq!(rule.file_hash.as_deref(), Some("h1"));
    }

    #[test]
    fn path_scope_drops_hash() {
        let request = MarkFileSafe {
            scope: Some(MatchScope::Path),
            reason: Some("generated".to_string()),
            marked_by: Some("bob".to_string()),
        };
        let rule = rule_for_vulnerability("a.yml", "h1", &request, MatchScope::Hash).unwrap();
        assert!(rule.file_hash.is_none());
        assert_eq!(rule.reason.as_deref(), Some("generated"));
    }

    #[test]
    fn request_scope_overrides_default() {
        let request = MarkFileSafe {
            scope: Some(MatchScope::Hash),
            ..Default::default()
        };
        let rule = rule_for_vulnerability("a.yml", "h1", &request, MatchScope::Path).unwrap();
        assert_eq!(rule.file_hash.as_deref(), Some("h1"));

        let rule =
            rule_for_vulnerability("a.yml", "h1", &MarkFileSafe::default(), MatchScope::Path)
                .unwrap();
        assert!(rule.file_hash.is_none());
    }

    #[test]
    fn hash_scope_requires_hash() {
        let err = rule_for_vulnerability("a.yml", "", &MarkFileSafe::default(), MatchScope::Hash)
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }
}
