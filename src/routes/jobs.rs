use axum::extract::{Multipart, Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::app_state::AppState;
use crate::models::job::{JobStatus, StatusResponse, UploadResponse};
use crate::models::task::Style;
use crate::routes::artifacts::jpeg_body;
use crate::routes::error::{ApiError, ApiResult};
use crate::routes::form::read_image_form;

/// PUT /upload — Submit an image for processing.
pub async fn upload_image(
    State(state): State<AppState>,
    multipart: Multipart,
) -> ApiResult<(StatusCode, Json<UploadResponse>)> {
    let form = read_image_form(multipart).await?;

    let style = match form.prompt_id.as_deref() {
        None => Style::default(),
        Some(raw) => Style::from_prompt_id(raw)
            .ok_or_else(|| ApiError::validation(format!("Unknown prompt_id: {raw}")))?,
    };

    let submission = state.coordinator.submit(form.image, style).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(UploadResponse {
            task_id: submission.task_id,
            image_id: submission.image_id,
            prompt: submission.style,
            status: "accepted".to_string(),
        }),
    ))
}

/// GET /status/{task_id} — Check processing status.
pub async fn get_status(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> ApiResult<(StatusCode, Json<StatusResponse>)> {
    let job = state.coordinator.status(&task_id).await?;

    let code = match job.status {
        JobStatus::Processing => StatusCode::ACCEPTED,
        JobStatus::Completed => StatusCode::OK,
        JobStatus::Failed => StatusCode::INTERNAL_SERVER_ERROR,
    };

    Ok((
        code,
        Json(StatusResponse {
            status: job.status,
            result: job.result,
        }),
    ))
}

/// GET /processed/{image_id} — Download the processed image.
///
/// Never cacheable: the artifact may appear after a client's first 404.
pub async fn get_processed(
    State(state): State<AppState>,
    Path(image_id): Path<String>,
) -> ApiResult<Response> {
    let artifact = state.coordinator.fetch_processed(&image_id).await?;

    Ok((
        [
            (
                header::CACHE_CONTROL,
                "no-store, no-cache, must-revalidate, max-age=0",
            ),
            (header::PRAGMA, "no-cache"),
            (header::EXPIRES, "0"),
        ],
        jpeg_body(artifact),
    )
        .into_response())
}
