//! Repository routes: listing, detail, deletion, history, findings submission.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use uuid::Uuid;

use crate::errors::{ApiResponse, AppError};
use crate::models::pagination::{PagedResult, Pagination};
use crate::models::repository::{Repository, RepositoryFilters};
use crate::models::scan_queue::ScanHistory;
use crate::models::vulnerability::SubmitFindings;
use crate::services::ingestion::{self, IngestionResult};
use crate::services::repository;
use crate::AppState;

/// GET /api/v1/repositories: list repositories, filterable by scan status.
pub async fn list(
    State(state): State<AppState>,
    Query(pagination): Query<Pagination>,
    Query(filters): Query<RepositoryFilters>,
) -> Result<Json<ApiResponse<PagedResult<Repository>>>, AppError> {
    let result = repository::list(&state.db, &filters, &pagination).await?;
    Ok(ApiResponse::success(result))
}

/// GET /api/v1/repositories/{id}
pub async fn get_by_id(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<Repository>>, AppError> {
    let repo = repository::find_by_id(&state.db, id).await?;
    Ok(ApiResponse::success(repo))
}

/// DELETE /api/v1/repositories/{id}: cascades to branches, findings, queue and history.
pub async fn delete(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<Uuid>>, AppError> {
    repository::delete(&state.db, id).await?;
    Ok(ApiResponse::success(id))
}

/// GET /api/v1/repositories/{id}/history
pub async fn history(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<Vec<ScanHistory>>>, AppError> {
    let rows = repository::history(&state.db, id).await?;
    Ok(ApiResponse::success(rows))
}

/// POST /api/v1/repositories/{id}/findings: scanner submits candidate findings.
pub async fn submit_findings(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<SubmitFindings>,
) -> Result<Json<ApiResponse<IngestionResult>>, AppError> {
    let result =
        ingestion::submit_findings(&state.db, id, body.branch.as_deref(), &body.findings).await?;
    Ok(ApiResponse::success(result))
}
