//! Route definitions for the scan queue API.

pub mod health;
pub mod queue;
pub mod repositories;
pub mod safe_files;
pub mod stats;
pub mod vulnerabilities;

use axum::extract::DefaultBodyLimit;
use axum::http::HeaderValue;
use axum::routing::{get, post, put};
use axum::Router;
use tower::ServiceBuilder;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::AppState;

/// Upper bound on request bodies; findings batches are the largest payloads.
pub const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

/// Build the full application router.
pub fn router(state: AppState) -> Router {
    let cors = match state.config.frontend_url.parse::<HeaderValue>() {
        Ok(origin) => CorsLayer::new().allow_origin(origin),
        Err(_) => CorsLayer::new().allow_origin(Any),
    }
    .allow_methods(Any)
    .allow_headers(Any);

    let queue_routes = Router::new()
        .route("/scan", post(queue::enqueue))
        .route("/queue", get(queue::list))
        .route("/queue/claim", post(queue::claim))
        .route("/queue/reclaim", post(queue::reclaim))
        .route("/queue/{id}", get(queue::get_by_id))
        .route("/queue/{id}/complete", post(queue::complete));

    let repository_routes = Router::new()
        .route("/repositories", get(repositories::list))
        .route(
            "/repositories/{id}",
            get(repositories::get_by_id).delete(repositories::delete),
        )
        .route("/repositories/{id}/history", get(repositories::history))
        .route(
            "/repositories/{id}/findings",
            post(repositories::submit_findings),
        );

    let vulnerability_routes = Router::new()
        .route("/vulnerabilities", get(vulnerabilities::list))
        .route(
            "/vulnerabilities/filters",
            get(vulnerabilities::filter_options),
        )
        .route("/vulnerabilities/{id}", get(vulnerabilities::get_by_id))
        .route(
            "/vulnerabilities/{id}/analysis",
            put(vulnerabilities::update_analysis),
        )
        .route(
            "/vulnerabilities/{id}/mark-file-safe",
            post(vulnerabilities::mark_file_safe),
        );

    let safe_file_routes = Router::new()
        .route("/safe-files", get(safe_files::list).post(safe_files::create))
        .route("/safe-files/{id}", axum::routing::delete(safe_files::delete));

    let stats_routes = Router::new()
        .route("/stats/summary", get(stats::summary))
        .route("/stats/top", get(stats::top));

    let api = Router::new()
        .merge(queue_routes)
        .merge(repository_routes)
        .merge(vulnerability_routes)
        .merge(safe_file_routes)
        .merge(stats_routes);

    Router::new()
        .route("/health/live", get(health::live))
        .route("/health/ready", get(health::ready))
        .nest("/api/v1", api)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors)
                .layer(CompressionLayer::new()),
        )
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use sqlx::postgres::PgPoolOptions;
    use tower::ServiceExt;

    use super::*;
    use crate::config::{AppConfig, MatchScope, QueueConfig};

    fn app() -> Router {
        let pool = PgPoolOptions::new()
            .connect_lazy("postgres://localhost/unused")
            .unwrap();
        router(AppState {
            db: pool,
            config: AppConfig {
                database_url: "postgres://localhost/unused".to_string(),
                database_max_connections: 1,
                host: "127.0.0.1".to_string(),
                port: 0,
                frontend_url: "http://localhost:5173".to_string(),
                queue: QueueConfig::default(),
                safe_file_default_scope: MatchScope::Hash,
            },
        })
    }

    #[tokio::test]
    async fn liveness_is_served() {
        let resp = app()
            .oneshot(Request::get("/health/live").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn oversized_body_is_rejected() {
        let body = vec![b' '; MAX_BODY_BYTES + 1];
        let resp = app()
            .oneshot(
                Request::post("/api/v1/scan")
                    .header("content-type", "application/json")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn completion_without_job_name_is_rejected() {
        let resp = app()
            .oneshot(
                Request::post(format!("/api/v1/queue/{}/complete", uuid::Uuid::now_v7()))
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"outcome":"success","vulnerabilities_found":1}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }
}
