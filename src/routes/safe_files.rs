//! Safe file rule routes.

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;
use uuid::Uuid;

use crate::errors::{ApiResponse, AppError};
use crate::models::safe_file::{CreateSafeFileRule, RuleApplied, RuleSet};
use crate::services::suppression;
use crate::AppState;

/// GET /api/v1/safe-files: every rule with the current rule-set version.
pub async fn list(State(state): State<AppState>) -> Result<Json<ApiResponse<RuleSet>>, AppError> {
    let rules = suppression::list_rules(&state.db).await?;
    Ok(ApiResponse::success(rules))
}

/// POST /api/v1/safe-files: add a rule and suppress existing matches.
pub async fn create(
    State(state): State<AppState>,
    Json(body): Json<CreateSafeFileRule>,
) -> Result<Json<ApiResponse<RuleApplied>>, AppError> {
    let applied = suppression::add_rule(&state.db, &body).await?;
    Ok(ApiResponse::success(applied))
}

#[derive(Debug, Serialize)]
pub struct RuleRemoved {
    pub id: Uuid,
    pub version: i64,
}

/// DELETE /api/v1/safe-files/{id}: suppressed vulnerabilities stay ignored.
pub async fn delete(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<RuleRemoved>>, AppError> {
    let version = suppression::remove_rule(&state.db, id).await?;
    Ok(ApiResponse::success(RuleRemoved { id, version }))
}
