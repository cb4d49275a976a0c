//! Worker-facing artifact endpoints.

use axum::body::Body;
use axum::extract::{Multipart, Path, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::Json;
use tokio_util::io::ReaderStream;

use crate::app_state::AppState;
use crate::models::job::PublishAck;
use crate::routes::error::ApiResult;
use crate::routes::form::read_image_form;
use crate::services::storage::StoredArtifact;

/// Stream a stored artifact as a JPEG body.
pub(crate) fn jpeg_body(artifact: StoredArtifact) -> ([(header::HeaderName, String); 2], Body) {
    (
        [
            (header::CONTENT_TYPE, "image/jpeg".to_string()),
            (header::CONTENT_LENGTH, artifact.len.to_string()),
        ],
        Body::from_stream(ReaderStream::new(artifact.file)),
    )
}

/// GET /unprocessed/{image_id} — Worker downloads the raw upload.
pub async fn serve_unprocessed(
    State(state): State<AppState>,
    Path(image_id): Path<String>,
) -> ApiResult<Response> {
    let artifact = state.coordinator.serve_unprocessed(&image_id).await?;
    Ok(jpeg_body(artifact).into_response())
}

/// POST /processed/{image_id} — Worker publishes its output. Write-once.
pub async fn accept_processed(
    State(state): State<AppState>,
    Path(image_id): Path<String>,
    multipart: Multipart,
) -> ApiResult<Json<PublishAck>> {
    let form = read_image_form(multipart).await?;
    let ack = state
        .coordinator
        .accept_processed(&image_id, form.image)
        .await?;
    Ok(Json(ack))
}
