pub mod artifacts;
pub mod error;
pub mod form;
pub mod health;
pub mod jobs;
pub mod metrics;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, put};
use axum::Router;
use tower_http::compression::CompressionLayer;
use tower_http::trace::TraceLayer;

use crate::app_state::AppState;

/// Room for multipart boundaries and part headers on top of the image itself.
const MULTIPART_OVERHEAD_BYTES: usize = 64 * 1024;

/// Build the coordinator router: job endpoints under the configured base path,
/// `/health` at the root.
///
/// Request bodies are capped by `DefaultBodyLimit`, which the multipart
/// extractor enforces whether or not the client sent `Content-Length`.
pub fn router(state: AppState) -> Router {
    let body_limit = state.config.max_upload_bytes + MULTIPART_OVERHEAD_BYTES;
    let base_path = state.config.normalized_base_path();

    let api = Router::new()
        .route("/upload", put(jobs::upload_image))
        .route("/status/{task_id}", get(jobs::get_status))
        .route(
            "/processed/{image_id}",
            get(jobs::get_processed).post(artifacts::accept_processed),
        )
        .route("/unprocessed/{image_id}", get(artifacts::serve_unprocessed));

    let app = if base_path.is_empty() {
        api
    } else {
        Router::new().nest(&base_path, api)
    };

    app.route("/health", get(health::health_check))
        .with_state(state)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
}
