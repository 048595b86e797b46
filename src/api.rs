//! REST API server for the math query resolver
//!
//! Exposes the orchestrator via HTTP endpoints. A client that disconnects
//! drops the handler future, which abandons the in-flight resolution.

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

use crate::agent::{Orchestrator, ResolveOptions};
use crate::error::ResolutionError;

/// =============================
/// Request Models
/// =============================

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct SolveRequest {
    pub query: String,
    #[serde(default)]
    pub preferred_engine: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct BatchRequest {
    pub queries: Vec<String>,
}

/// =============================
/// Response Wrapper
/// =============================

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    pub data: Option<serde_json::Value>,
    pub error: Option<String>,
    pub timestamp: String,
}

impl ApiResponse {
    pub fn success<T: Serialize>(data: T) -> Self {
        Self {
            success: true,
            data: serde_json::to_value(data).ok(),
            error: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// =============================
/// API State
/// =============================

#[derive(Clone)]
pub struct ApiState {
    pub orchestrator: Arc<Orchestrator>,
}

fn error_status(err: &ResolutionError) -> StatusCode {
    match err {
        ResolutionError::FallbackFailed(_) => StatusCode::UNPROCESSABLE_ENTITY,
        ResolutionError::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// =============================
/// Health Endpoint
/// =============================

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

async fn list_engines(State(state): State<ApiState>) -> Json<ApiResponse> {
    Json(ApiResponse::success(serde_json::json!({
        "engines": state.orchestrator.engine_names(),
    })))
}

/// =============================
/// Solve Endpoints
/// =============================

async fn solve(
    State(state): State<ApiState>,
    Json(req): Json<SolveRequest>,
) -> (StatusCode, Json<ApiResponse>) {
    let query = req.query.trim();
    if query.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::error("query must not be empty".into())),
        );
    }

    info!("Received solve request: {}", query);

    let options = ResolveOptions {
        preferred_engine: req.preferred_engine,
    };

    match state
        .orchestrator
        .run_with_options(query, &options, &CancellationToken::new())
        .await
    {
        Ok(resolution) => (StatusCode::OK, Json(ApiResponse::success(resolution))),
        Err(e) => {
            warn!(error = %e, "Resolution failed");
            (
                error_status(&e),
                Json(ApiResponse::error(format!("Resolution failed: {}", e))),
            )
        }
    }
}

async fn solve_batch(
    State(state): State<ApiState>,
    Json(req): Json<BatchRequest>,
) -> (StatusCode, Json<ApiResponse>) {
    info!(count = req.queries.len(), "Received batch request");

    let results: Vec<serde_json::Value> = state
        .orchestrator
        .run_batch(&req.queries)
        .await
        .into_iter()
        .map(|result| match result {
            Ok(resolution) => serde_json::json!({ "success": true, "resolution": resolution }),
            Err(e) => serde_json::json!({ "success": false, "error": e.to_string() }),
        })
        .collect();

    (StatusCode::OK, Json(ApiResponse::success(results)))
}

/// =============================
/// Router
/// =============================

pub fn create_router(orchestrator: Arc<Orchestrator>) -> Router {
    let state = ApiState { orchestrator };

    Router::new()
        .route("/health", get(health))
        .route("/api/engines", get(list_engines))
        .route("/api/solve", post(solve))
        .route("/api/solve/batch", post(solve_batch))
        .with_state(state)
        .layer(CorsLayer::permissive())
}

/// =============================
/// Server Startup
/// =============================

pub async fn start_server(
    orchestrator: Arc<Orchestrator>,
    port: u16,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let router = create_router(orchestrator);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;

    info!("API Server listening on http://0.0.0.0:{}", port);
    info!("Local: http://127.0.0.1:{}", port);

    axum::serve(listener, router).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engines::{EngineRegistry, NativeEngine};
    use crate::execution::ExecutionEngine;
    use crate::fallback::UnavailableFallback;
    use crate::translator::KeywordTranslator;
    use crate::verification::create_default_validator;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use std::time::Duration;
    use tower::ServiceExt;

    fn router() -> Router {
        let mut registry = EngineRegistry::new();
        registry.register(Arc::new(NativeEngine::new()));
        let orchestrator = Orchestrator::new(
            Box::new(KeywordTranslator::new()),
            ExecutionEngine::new(registry, Duration::from_secs(5)),
            Box::new(create_default_validator()),
            Box::new(UnavailableFallback),
        );
        create_router(Arc::new(orchestrator))
    }

    async fn post_json(uri: &str, body: serde_json::Value) -> (StatusCode, ApiResponse) {
        let request = Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();

        let response = router().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_health() {
        let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let response = router().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_solve_definite_integral() {
        let (status, body) =
            post_json("/api/solve", serde_json::json!({ "query": "integrate x^2 from 0 to 5" })).await;

        assert_eq!(status, StatusCode::OK);
        assert!(body.success);
        let data = body.data.unwrap();
        assert_eq!(data["answer"]["primary"], "41.6667");
        assert_eq!(data["answer"]["exact"], "125/3");
        assert_eq!(data["source"]["kind"], "engine");
    }

    #[tokio::test]
    async fn test_unsolvable_query_is_unprocessable() {
        let (status, body) =
            post_json("/api/solve", serde_json::json!({ "query": "integrate sin(x)^x" })).await;

        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(!body.success);
        assert!(body.error.unwrap().contains("Fallback solver failed"));
    }

    #[tokio::test]
    async fn test_empty_query_is_bad_request() {
        let (status, body) = post_json("/api/solve", serde_json::json!({ "query": "   " })).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(!body.success);
    }

    #[tokio::test]
    async fn test_batch_reports_each_query() {
        let (status, body) = post_json(
            "/api/solve/batch",
            serde_json::json!({ "queries": ["determinant of [[1,2],[3,4]]", "integrate sin(x)^x"] }),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        let data = body.data.unwrap();
        assert_eq!(data[0]["success"], true);
        assert_eq!(data[0]["resolution"]["answer"]["primary"], "-2");
        assert_eq!(data[1]["success"], false);
    }
}
