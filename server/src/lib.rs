use anyhow::Result;
use axum::{extract::{Path, State}, http::StatusCode, routing::{get, post}, Json, Router};
use bovw_core::{Error, KeyPoint, SearchConfig, SearchHit, Searcher};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

#[derive(Deserialize)]
pub struct SearchRequest {
    /// One query document: its feature vectors.
    pub features: Vec<Vec<f32>>,
    /// Normalized keypoint positions, needed when the index is spatially binned.
    #[serde(default)]
    pub keypoints: Vec<KeyPoint>,
    pub k: Option<usize>,
    pub views: Option<usize>,
}

#[derive(Serialize)]
pub struct SearchResponse {
    pub took_s: f64,
    pub total_hits: usize,
    pub results: Vec<SearchHit>,
}

#[derive(Clone)]
pub struct AppState {
    pub searcher: Arc<Searcher>,
}

type ApiError = (StatusCode, Json<serde_json::Value>);

/// Loads the index named by `config` and builds the router around it.
pub fn build_app(config: SearchConfig) -> Result<Router> {
    let searcher = Searcher::open(&config)?;
    Ok(router(searcher))
}

pub fn router(searcher: Searcher) -> Router {
    let app_state = AppState { searcher: Arc::new(searcher) };

    // CORS: read CORS_ALLOW_ORIGIN (comma-separated) or allow Any by default
    let cors = match std::env::var("CORS_ALLOW_ORIGIN") {
        Ok(val) => {
            let origins: Vec<_> = val
                .split(',')
                .filter_map(|s| s.trim().parse().ok())
                .collect();
            if origins.is_empty() {
                CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any)
            } else {
                CorsLayer::new().allow_origin(AllowOrigin::list(origins)).allow_methods(Any).allow_headers(Any)
            }
        }
        Err(_) => CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any),
    };

    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/search", post(search_handler))
        .route("/doc/:doc_id", get(doc_handler))
        .with_state(app_state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

pub async fn search_handler(
    State(state): State<AppState>,
    Json(req): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, ApiError> {
    let start = std::time::Instant::now();
    let searcher = state.searcher.clone();
    let k = req.k.unwrap_or(searcher.config().num_results);
    let views = req.views.unwrap_or(searcher.config().views_per_group);

    // quantization is CPU bound; keep it off the async workers
    let results = tokio::task::spawn_blocking(move || searcher.search(&req.features, &req.keypoints, k, views))
        .await
        .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?
        .map_err(core_error)?;

    let elapsed = start.elapsed();
    tracing::debug!(hits = results.len(), took_s = elapsed.as_secs_f64(), "search served");
    Ok(Json(SearchResponse { took_s: elapsed.as_secs_f64(), total_hits: results.len(), results }))
}

pub async fn doc_handler(
    State(state): State<AppState>,
    Path(doc_id): Path<u32>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if doc_id >= state.searcher.num_documents() {
        return Err(api_error(StatusCode::NOT_FOUND, "not found".into()));
    }
    let filename = state.searcher.filename(doc_id).map(|p| p.display().to_string());
    Ok(Json(serde_json::json!({ "doc_id": doc_id, "filename": filename })))
}

fn core_error(err: Error) -> ApiError {
    let status = match err {
        Error::InvalidConfiguration(_) | Error::DimensionMismatch { .. } => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    api_error(status, err.to_string())
}

fn api_error(status: StatusCode, message: String) -> ApiError {
    (status, Json(serde_json::json!({ "error": message })))
}
