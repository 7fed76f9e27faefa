//! Scan queue routes: enqueue, listing, worker claim/complete, lease reclaim.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::Utc;
use uuid::Uuid;
use validator::Validate;

use crate::errors::{ApiResponse, AppError};
use crate::models::pagination::{PagedResult, Pagination};
use crate::models::scan_queue::{
    ClaimRequest, CompleteRequest, EnqueueRequest, EnqueueResponse, QueueFilters, ScanQueueEntry,
    ScanQueueItem,
};
use crate::services::scan_queue;
use crate::AppState;

/// POST /api/v1/scan: queue a scan for a repository URL.
pub async fn enqueue(
    State(state): State<AppState>,
    Json(body): Json<EnqueueRequest>,
) -> Result<Json<ApiResponse<EnqueueResponse>>, AppError> {
    body.validate()?;
    let max_attempts = body.max_attempts.unwrap_or(state.config.queue.max_attempts);
    let response =
        scan_queue::enqueue(&state.db, &body.repository_ref(), body.priority, max_attempts).await?;
    Ok(ApiResponse::success(response))
}

/// GET /api/v1/queue: list entries in claim order.
pub async fn list(
    State(state): State<AppState>,
    Query(pagination): Query<Pagination>,
    Query(filters): Query<QueueFilters>,
) -> Result<Json<ApiResponse<PagedResult<ScanQueueItem>>>, AppError> {
    let result = scan_queue::list(&state.db, &filters, &pagination).await?;
    Ok(ApiResponse::success(result))
}

/// GET /api/v1/queue/{id}
pub async fn get_by_id(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<ScanQueueEntry>>, AppError> {
    let entry = scan_queue::find_by_id(&state.db, id).await?;
    Ok(ApiResponse::success(entry))
}

/// POST /api/v1/queue/claim: take the next entry; `data` is null when idle.
pub async fn claim(
    State(state): State<AppState>,
    Json(body): Json<ClaimRequest>,
) -> Result<Json<ApiResponse<Option<ScanQueueEntry>>>, AppError> {
    body.validate()?;
    let claimed = scan_queue::claim(&state.db, &body.worker_id).await?;
    Ok(ApiResponse::success(claimed))
}

/// POST /api/v1/queue/{id}/complete: report the outcome of a held attempt.
pub async fn complete(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<CompleteRequest>,
) -> Result<Json<ApiResponse<ScanQueueEntry>>, AppError> {
    let entry = scan_queue::complete(
        &state.db,
        id,
        &body.outcome,
        &body.job_name,
        state.config.queue.retry_priority,
    )
    .await?;
    Ok(ApiResponse::success(entry))
}

/// POST /api/v1/queue/reclaim: force expired leases through the failure path now.
pub async fn reclaim(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<Vec<ScanQueueEntry>>>, AppError> {
    let reclaimed = scan_queue::reclaim_expired(&state.db, Utc::now(), &state.config.queue).await?;
    Ok(ApiResponse::success(reclaimed))
}
