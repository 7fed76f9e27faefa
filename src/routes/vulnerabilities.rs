//! Vulnerability routes: listing, filter options, analyst edits, mark-file-safe.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use uuid::Uuid;

use crate::errors::{ApiResponse, AppError};
use crate::models::pagination::{PagedResult, Pagination};
use crate::models::repository::FilterOptions;
use crate::models::safe_file::{MarkFileSafe, RuleApplied};
use crate::models::vulnerability::{
    AnalysisUpdate, Vulnerability, VulnerabilityFilters, VulnerabilityListItem,
};
use crate::services::{repository, suppression, vulnerability};
use crate::AppState;

/// GET /api/v1/vulnerabilities
pub async fn list(
    State(state): State<AppState>,
    Query(pagination): Query<Pagination>,
    Query(filters): Query<VulnerabilityFilters>,
) -> Result<Json<ApiResponse<PagedResult<VulnerabilityListItem>>>, AppError> {
    let result = vulnerability::list(&state.db, &filters, &pagination).await?;
    Ok(ApiResponse::success(result))
}

/// GET /api/v1/vulnerabilities/filters: organizations and repositories with findings.
pub async fn filter_options(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<FilterOptions>>, AppError> {
    let options = repository::filter_options(&state.db).await?;
    Ok(ApiResponse::success(options))
}

/// GET /api/v1/vulnerabilities/{id}
pub async fn get_by_id(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<VulnerabilityListItem>>, AppError> {
    let item = vulnerability::find_detail(&state.db, id).await?;
    Ok(ApiResponse::success(item))
}

/// PUT /api/v1/vulnerabilities/{id}/analysis
pub async fn update_analysis(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<AnalysisUpdate>,
) -> Result<Json<ApiResponse<Vulnerability>>, AppError> {
    let updated = vulnerability::update_analysis(&state.db, id, &body).await?;
    Ok(ApiResponse::success(updated))
}

/// POST /api/v1/vulnerabilities/{id}/mark-file-safe: suppress this file globally.
pub async fn mark_file_safe(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    body: Option<Json<MarkFileSafe>>,
) -> Result<Json<ApiResponse<RuleApplied>>, AppError> {
    let request = body.map(|Json(b)| b).unwrap_or_default();
    let applied = suppression::mark_vulnerability_file_safe(
        &state.db,
        id,
        &request,
        state.config.safe_file_default_scope,
    )
    .await?;
    Ok(ApiResponse::success(applied))
}
