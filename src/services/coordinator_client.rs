use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::multipart;
use reqwest::{Client, StatusCode};

use crate::models::job::{Identifier, PublishAck};

/// HTTP client a worker uses to pull inputs from and push results to the coordinator.
///
/// The base URL comes from the task arguments, so one worker can serve tasks
/// dispatched by different coordinators. Timeouts are configured on the
/// shared [`reqwest::Client`].
#[derive(Debug, Clone)]
pub struct CoordinatorClient {
    base_url: String,
    client: Client,
}

impl CoordinatorClient {
    pub fn new(client: Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// GET /unprocessed/{image_id}
    pub async fn fetch_unprocessed(&self, image_id: &Identifier) -> Result<Vec<u8>, ClientError> {
        let url = format!("{}/unprocessed/{}", self.base_url, image_id);
        let response = self
            .client
            .get(&url)
            .header(ACCEPT, "image/jpeg")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(api_error(response).await);
        }

        let body = response.bytes().await?;
        tracing::debug!(image_id = %image_id, bytes = body.len(), "Fetched unprocessed image");
        Ok(body.to_vec())
    }

    /// POST /processed/{image_id}
    pub async fn publish_processed(
        &self,
        image_id: &Identifier,
        data: Vec<u8>,
    ) -> Result<PublishAck, ClientError> {
        let url = format!("{}/processed/{}", self.base_url, image_id);
        let part = multipart::Part::bytes(data)
            .file_name(format!("{image_id}.jpg"))
            .mime_str("image/jpeg")?;
        let form = multipart::Form::new().part("image", part);

        let response = self.client.post(&url).multipart(form).send().await?;

        match response.status() {
            StatusCode::CONFLICT => Err(ClientError::Conflict(image_id.to_string())),
            status if status.is_success() => {
                let is_json = response
                    .headers()
                    .get(CONTENT_TYPE)
                    .and_then(|v| v.to_str().ok())
                    .is_some_and(|v| v.starts_with("application/json"));
                if !is_json {
                    return Err(ClientError::Parse(format!(
                        "expected JSON acknowledgement, got status {status}"
                    )));
                }
                response
                    .json()
                    .await
                    .map_err(|e| ClientError::Parse(e.to_string()))
            }
            _ => Err(api_error(response).await),
        }
    }
}

async fn api_error(response: reqwest::Response) -> ClientError {
    let status = response.status().as_u16();
    let message = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());
    ClientError::Api { status, message }
}

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Coordinator returned status {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Processed image {0} was already published")]
    Conflict(String),

    #[error("Failed to parse coordinator response: {0}")]
    Parse(String),
}
