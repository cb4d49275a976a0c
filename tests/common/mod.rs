//! Shared helpers for coordinator and worker integration tests.

#![allow(dead_code)]

use std::io::Cursor;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Method, Request, Response};
use axum::Router;
use http_body_util::BodyExt;
use tempfile::TempDir;
use tower::ServiceExt;

use fotobox::app_state::AppState;
use fotobox::config::AppConfig;
use fotobox::services::pipeline::Pipeline;
use fotobox::services::queue::InMemoryTaskQueue;
use fotobox::services::storage::ArtifactStore;
use fotobox::services::worker::Worker;

pub const BOUNDARY: &str = "fotobox-test-boundary";

/// A router wired to an in-memory queue and a throwaway artifact root.
pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub queue: Arc<InMemoryTaskQueue>,
    pub root: TempDir,
}

impl TestApp {
    pub fn upload_dir(&self) -> PathBuf {
        self.root.path().join("uploads")
    }

    pub fn processed_dir(&self) -> PathBuf {
        self.root.path().join("processed")
    }

    pub fn scratch_dir(&self) -> PathBuf {
        self.root.path().join("scratch")
    }

    /// A worker that talks to this app over HTTP.
    pub fn worker(&self) -> Worker {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap();
        let pipeline = Pipeline::new(http, self.scratch_dir());
        Worker::new(
            self.queue.clone(),
            Arc::new(pipeline),
            "test-worker",
            1,
            Duration::from_millis(10),
        )
    }
}

/// Config rooted in `root` with a 1 MiB upload limit.
pub fn test_config(root: &Path) -> AppConfig {
    AppConfig {
        upload_dir: root.join("uploads"),
        processed_dir: root.join("processed"),
        scratch_dir: root.join("scratch"),
        max_upload_bytes: 1024 * 1024,
        ..AppConfig::default()
    }
}

pub fn build_test_app() -> TestApp {
    build_test_app_with(|_| {})
}

pub fn build_test_app_with(customize: impl FnOnce(&mut AppConfig)) -> TestApp {
    build_app(tempfile::tempdir().unwrap(), 0, customize)
}

fn build_app(root: TempDir, max_retries: u32, customize: impl FnOnce(&mut AppConfig)) -> TestApp {
    let mut config = test_config(root.path());
    customize(&mut config);
    config.task_max_retries = max_retries;
    std::fs::create_dir_all(&config.scratch_dir).unwrap();

    let storage = ArtifactStore::new(&config.upload_dir, &config.processed_dir).unwrap();
    let queue = Arc::new(InMemoryTaskQueue::new(config.task_max_retries));
    let state = AppState::new(config, storage, queue.clone());
    let router = fotobox::routes::router(state.clone());

    TestApp {
        router,
        state,
        queue,
        root,
    }
}

/// Serve the app on a loopback port so workers can reach it over HTTP.
/// The callback URL handed to workers points at the bound address.
pub async fn spawn_app(max_retries: u32) -> (TestApp, String) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr: SocketAddr = listener.local_addr().unwrap();
    let server_url = format!("http://{addr}");

    let url = server_url.clone();
    let app = build_app(tempfile::tempdir().unwrap(), max_retries, move |config| {
        config.server_url = url;
    });

    let router = app.router.clone();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    (app, server_url)
}

/// One part of a multipart form.
pub struct FormPart<'a> {
    pub name: &'a str,
    pub filename: Option<&'a str>,
    pub data: &'a [u8],
}

impl<'a> FormPart<'a> {
    pub fn image(data: &'a [u8]) -> Self {
        Self {
            name: "image",
            filename: Some("photo.jpg"),
            data,
        }
    }

    pub fn text(name: &'a str, value: &'a str) -> Self {
        Self {
            name,
            filename: None,
            data: value.as_bytes(),
        }
    }
}

/// Encode parts as a `multipart/form-data` body.
pub fn multipart_body(parts: &[FormPart<'_>]) -> Vec<u8> {
    let mut body = Vec::new();
    for part in parts {
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        match part.filename {
            Some(filename) => {
                body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
                        part.name, filename
                    )
                    .as_bytes(),
                );
                body.extend_from_slice(b"Content-Type: image/jpeg\r\n");
            }
            None => body.extend_from_slice(
                format!("Content-Disposition: form-data; name=\"{}\"\r\n", part.name).as_bytes(),
            ),
        }
        body.extend_from_slice(b"\r\n");
        body.extend_from_slice(part.data);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

pub async fn send(router: &Router, request: Request<Body>) -> Response<Body> {
    router.clone().oneshot(request).await.unwrap()
}

pub async fn get(router: &Router, uri: &str) -> Response<Body> {
    send(
        router,
        Request::builder().uri(uri).body(Body::empty()).unwrap(),
    )
    .await
}

pub async fn send_form(
    router: &Router,
    method: Method,
    uri: &str,
    parts: &[FormPart<'_>],
) -> Response<Body> {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(multipart_body(parts)))
        .unwrap();
    send(router, request).await
}

pub async fn body_bytes(response: Response<Body>) -> Vec<u8> {
    response
        .into_body()
        .collect()
        .await
        .unwrap()
        .to_bytes()
        .to_vec()
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

/// Bytes shaped like a JPEG (SOI marker, filler, EOI marker) of exactly `len` bytes.
pub fn fake_jpeg(len: usize) -> Vec<u8> {
    assert!(len >= 4);
    let mut bytes = vec![0xFF, 0xD8];
    bytes.extend((0..len - 4).map(|i| (i * 31 % 256) as u8));
    bytes.extend_from_slice(&[0xFF, 0xD9]);
    bytes
}

/// A real, decodable colour JPEG.
pub fn sample_jpeg(width: u32, height: u32) -> Vec<u8> {
    let img = image::RgbImage::from_fn(width, height, |x, y| {
        image::Rgb([(x * 7 % 256) as u8, (y * 13 % 256) as u8, 128])
    });
    let mut out = Cursor::new(Vec::new());
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut out, image::ImageFormat::Jpeg)
        .unwrap();
    out.into_inner()
}

pub fn dir_entries(dir: &Path) -> usize {
    std::fs::read_dir(dir).map(|d| d.count()).unwrap_or(0)
}

pub fn is_identifier(value: &serde_json::Value) -> bool {
    value.as_str().is_some_and(|s| {
        (10..=50).contains(&s.len()) && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
    })
}
