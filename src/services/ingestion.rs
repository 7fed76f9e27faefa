//! Scanner ingestion: normalizes candidate findings, applies safe-file rules,
//! and persists the result.
//!
//! Candidates matching a rule are stored directly as `ignored`; they are never
//! visible as `open`. Re-submitted occurrences are skipped by the occurrence
//! unique index so analyst edits survive rescans.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::safe_file::SafeFileRule;
use crate::models::vulnerability::{ScanCandidate, Severity, VulnerabilityStatus};
use crate::services::suppression;

pub const DEFAULT_BRANCH: &str = "main";
const DEFAULT_TITLE: &str = "Security vulnerability detected";
const DEFAULT_RECOMMENDATION: &str = "Review and fix the identified security issue.";
const MAX_TITLE_CHARS: usize = 512;
const WORKFLOW_DIR: &str = ".github";

/// Summary of one findings submission.
#[derive(Debug, Clone, Serialize)]
pub struct IngestionResult {
    pub repository_id: Uuid,
    pub branches: Vec<String>,
    pub total: usize,
    pub persisted_open: usize,
    pub persisted_ignored: usize,
    pub duplicates: usize,
    pub rule_set_version: i64,
}

/// Severity assumed for a scanner finding kind.
pub fn severity_for_kind(kind: &str) -> Severity {
    match kind {
        "expression-injection" | "credentials" => Severity::Critical,
        "dangerous-checkout" | "dangerous-action" | "dangerous-write" | "repo-jacking"
        | "unsecure-commands" | "known-vulnerability" => Severity::High,
        "dangerous-artefact" | "runner-label" | "bot-check" => Severity::Medium,
        "local-action" | "shellcheck" => Severity::Low,
        "oidc-action" => Severity::Info,
        _ => Severity::Medium,
    }
}

/// Remediation advice for a scanner finding kind.
pub fn recommendation_for_kind(kind: &str) -> &'static str {
    match kind {
        "expression-injection" => {
            "Sanitize untrusted input before use in expressions. Use intermediate environment variables."
        }
        "dangerous-checkout" => {
            "Avoid checking out untrusted code in privileged contexts like workflow_run or pull_request_target."
        }
        "dangerous-action" => "Treat artifact data as untrusted. Validate and sanitize before use.",
        "dangerous-write" => {
            "Sanitize inputs before writing to GITHUB_ENV or GITHUB_OUTPUT to prevent command injection."
        }
        "repo-jacking" => "Verify that referenced GitHub actions point to valid organizations/users.",
        "unsecure-commands" => "Remove ACTIONS_ALLOW_UNSECURE_COMMANDS environment variable.",
        "known-vulnerability" => "Update the action to a patched version.",
        "dangerous-artefact" => "Avoid uploading sensitive files like .git/config in artifacts.",
        "credentials" => "Avoid hardcoding credentials. Use GitHub secrets instead.",
        "runner-label" => {
            "Use ephemeral self-hosted runners or GitHub-hosted runners for untrusted code."
        }
        "bot-check" => "Use more robust checks than github.actor for bot identity verification.",
        "local-action" => "Review local action for potential vulnerabilities.",
        "oidc-action" => "Review OIDC action for proper security configuration.",
        "shellcheck" => "Fix shell script issues identified by shellcheck.",
        _ => DEFAULT_RECOMMENDATION,
    }
}

/// Strip a scanner output prefix down to the `.github/...` path.
///
/// Returns the cleaned path and, when present, the segment right before
/// `.github`, which the scanner's download layout uses for the branch.
pub fn normalize_path(raw: &str) -> (String, Option<String>) {
    let unified = raw.replace('\\', "/");
    let parts: Vec<&str> = unified.split('/').collect();

    match parts.iter().position(|part| *part == WORKFLOW_DIR) {
        Some(idx) => {
            let branch = idx
                .checked_sub(1)
                .map(|prev| parts[prev])
                .filter(|b| !b.is_empty() && *b != ".")
                .map(str::to_string);
            (parts[idx..].join("/"), branch)
        }
        None => (unified.trim_start_matches("./").to_string(), None),
    }
}

fn title_from(candidate: &ScanCandidate) -> String {
    let source = candidate
        .title
        .as_deref()
        .or(candidate.description.as_deref())
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .unwrap_or(DEFAULT_TITLE);
    source.chars().take(MAX_TITLE_CHARS).collect()
}

/// A candidate with defaults applied, ready to insert.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedFinding {
    pub branch: String,
    pub file_path: String,
    pub file_hash: String,
    pub vulnerability_type: String,
    pub severity: Severity,
    pub title: String,
    pub description: Option<String>,
    pub line_number: Option<i32>,
    pub code_snippet: Option<String>,
    pub recommendation: String,
}

/// Apply path normalization and kind defaults to a candidate.
pub fn prepare(
    index: usize,
    candidate: &ScanCandidate,
    branch: Option<&str>,
) -> Result<PreparedFinding, AppError> {
    let (file_path, path_branch) = normalize_path(candidate.file_path.trim());
    if file_path.is_empty() {
        return Err(AppError::Validation(format!(
            "Finding {index} has an empty file_path"
        )));
    }
    let kind = candidate.vulnerability_type.trim();
    if kind.is_empty() {
        return Err(AppError::Validation(format!(
            "Finding {index} has an empty vulnerability_type"
        )));
    }

    let branch = branch
        .map(str::trim)
        .filter(|b| !b.is_empty())
        .map(str::to_string)
        .or(path_branch)
        .unwrap_or_else(|| DEFAULT_BRANCH.to_string());

    Ok(PreparedFinding {
        branch,
        file_path,
        file_hash: candidate.file_hash.trim().to_string(),
        vulnerability_type: kind.to_string(),
        severity: candidate.severity.unwrap_or_else(|| severity_for_kind(kind)),
        title: title_from(candidate),
        description: candidate.description.clone(),
        line_number: candidate.line_number,
        code_snippet: candidate.code_snippet.clone(),
        recommendation: candidate
            .recommendation
            .clone()
            .unwrap_or_else(|| recommendation_for_kind(kind).to_string()),
    })
}

/// Persist scanner findings for a repository.
pub async fn submit_findings(
    pool: &PgPool,
    repository_id: Uuid,
    branch: Option<&str>,
    candidates: &[ScanCandidate],
) -> Result<IngestionResult, AppError> {
    let prepared = candidates
        .iter()
        .enumerate()
        .map(|(i, c)| prepare(i, c, branch))
        .collect::<Result<Vec<_>, _>>()?;

    let mut tx = pool.begin().await?;

    // Blocks a concurrent repository delete until commit.
    let exists: Option<Uuid> =
        sqlx::query_scalar("SELECT id FROM repositories WHERE id = $1 FOR KEY SHARE")
            .bind(repository_id)
            .fetch_optional(&mut *tx)
            .await?;
    if exists.is_none() {
        return Err(AppError::NotFound("Repository not found".to_string()));
    }

    let branch_names: BTreeSet<&str> = prepared.iter().map(|f| f.branch.as_str()).collect();
    let mut branch_ids = BTreeMap::new();
    for name in &branch_names {
        let id: Uuid = sqlx::query_scalar(
            "INSERT INTO branches (id, repository_id, name) VALUES ($1, $2, $3) \
             ON CONFLICT (repository_id, name) DO UPDATE SET last_scanned_at = NOW() \
             RETURNING id",
        )
        .bind(Uuid::now_v7())
        .bind(repository_id)
        .bind(*name)
        .fetch_one(&mut *tx)
        .await?;
        branch_ids.insert(*name, id);
    }

    let paths: Vec<&str> = prepared.iter().map(|f| f.file_path.as_str()).collect();
    suppression::lock_paths(&mut tx, &paths).await?;
    let owned_paths: Vec<String> = paths.iter().map(|p| p.to_string()).collect();
    let rule_set = suppression::load_rule_set_for_paths(&mut tx, &owned_paths).await?;
    let verdicts = rule_set.classify(
        prepared
            .iter()
            .map(|f| (f.file_path.as_str(), f.file_hash.as_str())),
    );

    let mut persisted_open = 0;
    let mut persisted_ignored = 0;
    let mut duplicates = 0;

    for (finding, rule) in prepared.iter().zip(verdicts) {
        let (status, analysis, analyst) = suppression_stamp(rule);
        let inserted = sqlx::query(
            "INSERT INTO vulnerabilities \
             (id, repository_id, branch_id, file_path, file_hash, vulnerability_type, severity, \
              title, description, line_number, code_snippet, recommendation, status, \
              manual_analysis, analyzed_by, analyzed_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, \
                     $14, $15, CASE WHEN $15::TEXT IS NULL THEN NULL ELSE NOW() END) \
             ON CONFLICT DO NOTHING",
        )
        .bind(Uuid::now_v7())
        .bind(repository_id)
        .bind(branch_ids.get(finding.branch.as_str()).copied())
        .bind(&finding.file_path)
        .bind(&finding.file_hash)
        .bind(&finding.vulnerability_type)
        .bind(finding.severity)
        .bind(&finding.title)
        .bind(&finding.description)
        .bind(finding.line_number)
        .bind(&finding.code_snippet)
        .bind(&finding.recommendation)
        .bind(status)
        .bind(analysis)
        .bind(analyst)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        match (inserted, rule.is_some()) {
            (0, _) => duplicates += 1,
            (_, true) => persisted_ignored += 1,
            (_, false) => persisted_open += 1,
        }
    }

    tx.commit().await?;

    let result = IngestionResult {
        repository_id,
        branches: branch_names.into_iter().map(str::to_string).collect(),
        total: prepared.len(),
        persisted_open,
        persisted_ignored,
        duplicates,
        rule_set_version: rule_set.version,
    };

    tracing::info!(
        repository_id = %repository_id,
        total = result.total,
        persisted_open,
        persisted_ignored,
        duplicates,
        rule_set_version = result.rule_set_version,
        "Findings ingested"
    );
    Ok(result)
}

/// Status, analysis note and analyst for a finding given its matching rule.
fn suppression_stamp(
    rule: Option<&SafeFileRule>,
) -> (VulnerabilityStatus, Option<String>, Option<String>) {
    match rule {
        Some(rule) => (
            VulnerabilityStatus::Ignored,
            Some(suppression::suppression_note(rule.reason.as_deref())),
            Some(suppression::suppression_analyst(rule.marked_by.as_deref()).to_string()),
        ),
        None => (VulnerabilityStatus::Open, None, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(path: &str, kind: &str) -> ScanCandidate {
        ScanCandidate {
            file_path: path.to_string(),
            file_hash: "h1".to_string(),
            vulnerability_type: kind.to_string(),
            severity: None,
            title: None,
            description: None,
            line_number: Some(14),
            code_snippet: None,
            recommendation: None,
        }
    }

    #[test]
    fn normalize_strips_scanner_prefix() {
        let (path, branch) =
            normalize_path("octoscan-output/acme/widgets/develop/.github/workflows/ci.yml");
        assert_eq!(path, ".github/workflows/ci.yml");
        assert_eq!(branch.as_deref(), Some("develop"));
    }

    #[test]
    fn normalize_keeps_clean_path() {
        let (path, branch) = normalize_path(".github/workflows/ci.yml");
        assert_eq!(path, ".github/workflows/ci.yml");
        assert!(branch.is_none());

        let (path, branch) = normalize_path("src/main.rs");
        assert_eq!(path, "src/main.rs");
        assert!(branch.is_none());
    }

    #[test]
    fn normalize_handles_backslashes() {
        let (path, branch) = normalize_path(r"out\acme\w\main\.github\workflows\a.yml");
        assert_eq!(path, ".github/workflows/a.yml");
        assert_eq!(branch.as_deref(), Some("main"));
    }

    #[test]
    fn severity_map() {
        assert_eq!(severity_for_kind("expression-injection"), Severity::Critical);
        assert_eq!(severity_for_kind("credentials"), Severity::Critical);
        assert_eq!(severity_for_kind("repo-jacking"), Severity::High);
        assert_eq!(severity_for_kind("bot-check"), Severity::Medium);
        assert_eq!(severity_for_kind("shellcheck"), Severity::Low);
        assert_eq!(severity_for_kind("oidc-action"), Severity::Info);
        assert_eq!(severity_for_kind("something-new"), Severity::Medium);
    }

    #[test]
    fn unknown_kind_gets_generic_recommendation() {
        assert_eq!(recommendation_for_kind("nope"), DEFAULT_RECOMMENDATION);
        assert!(recommendation_for_kind("credentials").contains("secrets"));
    }

    #[test]
    fn prepare_applies_defaults() {
        let mut c = candidate("out/a/b/feature/.github/workflows/ci.yml", "expression-injection");
        c.description = Some("Expression injection, \"github.head_ref\" is untrusted".to_string());
        let f = prepare(0, &c, None).unwrap();
        assert_eq!(f.branch, "feature");
        assert_eq!(f.file_path, ".github/workflows/ci.yml");
        assert_eq!(f.severity, Severity::Critical);
        assert!(f.title.starts_with("Expression injection"));
        assert!(f.recommendation.starts_with("Sanitize"));
    }

    #[test]
    fn explicit_branch_wins_and_default_is_main() {
        let c = candidate("out/a/b/feature/.github/workflows/ci.yml", "shellcheck");
        assert_eq!(prepare(0, &c, Some("release")).unwrap().branch, "release");

        let c = candidate(".github/workflows/ci.yml", "shellcheck");
        assert_eq!(prepare(0, &c, None).unwrap().branch, DEFAULT_BRANCH);
    }

    #[test]
    fn explicit_severity_and_title_kept() {
        let mut c = candidate(".github/workflows/ci.yml", "shellcheck");
        c.severity = Some(Severity::High);
        c.title = Some("Custom".to_string());
        let f = prepare(0, &c, None).unwrap();
        assert_eq!(f.severity, Severity::High);
        assert_eq!(f.title, "Custom");
    }

    #[test]
    fn title_is_truncated_on_char_boundary() {
        let mut c = candidate(".github/workflows/ci.yml", "shellcheck");
        c.description = Some("é".repeat(600));
        let f = prepare(0, &c, None).unwrap();
        assert_eq!(f.title.chars().count(), MAX_TITLE_CHARS);
        assert_eq!(f.description.as_deref().map(|d| d.chars().count()), Some(600));
    }

    #[test]
    fn missing_title_falls_back() {
        let c = candidate(".github/workflows/ci.yml", "shellcheck");
        assert_eq!(prepare(0, &c, None).unwrap().title, DEFAULT_TITLE);
    }

    #[test]
    fn rejects_empty_fields() {
        assert!(matches!(
            prepare(3, &candidate("", "shellcheck"), None),
            Err(AppError::Validation(_))
        ));
        assert!(prepare(0, &candidate(".github/a.yml", " "), None).is_err());
    }

    #[test]
    fn suppressed_findings_are_stamped() {
        let rule = SafeFileRule {
            id: Uuid::now_v7(),
            file_path: ".github/a.yml".to_string(),
            file_hash: None,
            reason: Some("fixture".to_string()),
            marked_by: None,
            marked_at: chrono::Utc::now(),
        };
        let (status, note, analyst) = suppression_stamp(Some(&rule));
        assert_eq!(status, VulnerabilityStatus::Ignored);
        assert_eq!(note.as_deref(), Some("Auto-ignored: file marked safe globally: fixture"));
        assert_eq!(analyst.as_deref(), Some("system"));

        assert_eq!(
            suppression_stamp(None),
            (VulnerabilityStatus::Open, None, None)
        );
    }
}
