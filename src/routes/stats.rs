//! Aggregate statistics routes.

use axum::{
    extract::{Query, State},
    Json,
};
use serde::Deserialize;

use crate::errors::{ApiResponse, AppError};
use crate::services::aggregation::{self, RepositoryRanking, Summary};
use crate::AppState;

/// GET /api/v1/stats/summary: deduplicated totals.
pub async fn summary(State(state): State<AppState>) -> Result<Json<ApiResponse<Summary>>, AppError> {
    let summary = aggregation::summary(&state.db).await?;
    Ok(ApiResponse::success(summary))
}

#[derive(Debug, Deserialize)]
pub struct TopQuery {
    pub limit: Option<i64>,
}

/// GET /api/v1/stats/top?limit=N: repositories by raw vulnerability count.
pub async fn top(
    State(state): State<AppState>,
    Query(query): Query<TopQuery>,
) -> Result<Json<ApiResponse<Vec<RepositoryRanking>>>, AppError> {
    let limit = aggregation::top_limit(query.limit)?;
    let rows = aggregation::top_repositories(&state.db, limit).await?;
    Ok(ApiResponse::success(rows))
}
