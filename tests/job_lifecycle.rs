//! Full job lifecycle over loopback HTTP: a client uploads and polls, a worker
//! claims the task from the in-memory queue and calls back into the coordinator.

mod common;

use std::time::Duration;

use reqwest::{multipart, Client, StatusCode};
use serde_json::Value;

use common::*;
use fotobox::models::job::Identifier;
use fotobox::models::task::ProcessImageArgs;
use fotobox::services::pipeline::Pipeline;
use fotobox::services::queue::TaskQueue;
use fotobox::services::storage::Namespace;

fn client() -> Client {
    Client::builder()
        .timeout(Duration::from_secs(10))
        .build()
        .unwrap()
}

async fn upload(server_url: &str, image: Vec<u8>, prompt_id: Option<&str>) -> Value {
    let part = multipart::Part::bytes(image)
        .file_name("photo.jpg")
        .mime_str("image/jpeg")
        .unwrap();
    let mut form = multipart::Form::new().part("image", part);
    if let Some(prompt_id) = prompt_id {
        form = form.text("prompt_id", prompt_id.to_string());
    }

    let response = client()
        .put(format!("{server_url}/upload"))
        .multipart(form)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    response.json().await.unwrap()
}

async fn status(server_url: &str, task_id: &str) -> (StatusCode, Value) {
    let response = client()
        .get(format!("{server_url}/status/{task_id}"))
        .send()
        .await
        .unwrap();
    let code = response.status();
    (code, response.json().await.unwrap())
}

async fn processed(server_url: &str, image_id: &str) -> reqwest::Response {
    client()
        .get(format!("{server_url}/processed/{image_id}"))
        .send()
        .await
        .unwrap()
}

// Scenario A
#[tokio::test]
async fn original_style_round_trips_bytes_exactly() {
    let (app, server_url) = spawn_app(0).await;
    let image = fake_jpeg(10 * 1024);

    let job = upload(&server_url, image.clone(), None).await;
    let task_id = job["task_id"].as_str().unwrap();
    let image_id = job["image_id"].as_str().unwrap();

    let (code, body) = status(&server_url, task_id).await;
    assert_eq!(code, StatusCode::ACCEPTED);
    assert_eq!(body["status"], "Processing");
    assert_eq!(processed(&server_url, image_id).await.status(), StatusCode::NOT_FOUND);

    assert!(app.worker().run_once().await.unwrap());

    let (code, body) = status(&server_url, task_id).await;
    assert_eq!(code, StatusCode::OK);
    assert_eq!(body["status"], "Completed");
    assert_eq!(body["result"]["status"], "success");
    assert_eq!(body["result"]["image_id"], image_id);

    let response = processed(&server_url, image_id).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.bytes().await.unwrap().as_ref(), image.as_slice());

    assert_eq!(dir_entries(&app.scratch_dir()), 0);
    assert!(!app.worker().run_once().await.unwrap());
}

#[tokio::test]
async fn monochrome_style_produces_grayscale_jpeg() {
    let (app, server_url) = spawn_app(0).await;

    let job = upload(&server_url, sample_jpeg(64, 48), Some("1")).await;
    assert_eq!(job["prompt"], "monochrome");
    assert!(app.worker().run_once().await.unwrap());

    let (code, _) = status(&server_url, job["task_id"].as_str().unwrap()).await;
    assert_eq!(code, StatusCode::OK);

    let bytes = processed(&server_url, job["image_id"].as_str().unwrap())
        .await
        .bytes()
        .await
        .unwrap();
    let decoded = image::load_from_memory_with_format(&bytes, image::ImageFormat::Jpeg).unwrap();
    assert_eq!(decoded.color(), image::ColorType::L8);
    assert_eq!((decoded.width(), decoded.height()), (64, 48));
}

#[tokio::test]
async fn mirror_style_keeps_dimensions() {
    let (app, server_url) = spawn_app(0).await;

    let job = upload(&server_url, sample_jpeg(80, 20), Some("2")).await;
    assert!(app.worker().run_once().await.unwrap());

    let bytes = processed(&server_url, job["image_id"].as_str().unwrap())
        .await
        .bytes()
        .await
        .unwrap();
    let decoded = image::load_from_memory(&bytes).unwrap();
    assert_eq!((decoded.width(), decoded.height()), (80, 20));
}

#[tokio::test]
async fn undecodable_input_fails_without_retry_and_cleans_scratch() {
    let (app, server_url) = spawn_app(3).await;

    let job = upload(&server_url, b"definitely not an image".to_vec(), Some("1")).await;
    assert!(app.worker().run_once().await.unwrap());

    let (code, body) = status(&server_url, job["task_id"].as_str().unwrap()).await;
    assert_eq!(code, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["status"], "Failed");
    assert!(body.get("result").is_none());

    assert_eq!(app.queue.pending_len(), 0);
    assert_eq!(
        processed(&server_url, job["image_id"].as_str().unwrap()).await.status(),
        StatusCode::NOT_FOUND
    );
    assert_eq!(dir_entries(&app.scratch_dir()), 0);
}

#[tokio::test]
async fn missing_input_is_retried_then_fails() {
    let (app, server_url) = spawn_app(1).await;

    let job = upload(&server_url, fake_jpeg(256), None).await;
    let task_id = job["task_id"].as_str().unwrap();
    let image_id = Identifier::parse(job["image_id"].as_str().unwrap()).unwrap();
    assert!(app
        .state
        .coordinator
        .store()
        .delete(Namespace::Unprocessed, &image_id)
        .await
        .unwrap());

    let worker = app.worker();
    assert!(worker.run_once().await.unwrap());
    let (code, _) = status(&server_url, task_id).await;
    assert_eq!(code, StatusCode::ACCEPTED, "first failure is retried");
    assert_eq!(app.queue.pending_len(), 1);

    assert!(worker.run_once().await.unwrap());
    let (code, body) = status(&server_url, task_id).await;
    assert_eq!(code, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["status"], "Failed");
    assert_eq!(app.queue.pending_len(), 0);
    assert_eq!(dir_entries(&app.scratch_dir()), 0);
}

#[tokio::test]
async fn redelivered_task_conflicts_and_keeps_first_output() {
    let (app, server_url) = spawn_app(3).await;
    let image = fake_jpeg(4096);

    let job = upload(&server_url, image.clone(), None).await;
    let task_id = job["task_id"].as_str().unwrap();
    let image_id = job["image_id"].as_str().unwrap();

    // A worker claims the task and publishes, then dies before settling it.
    let message = app.queue.claim("w1").await.unwrap().unwrap();
    let args: ProcessImageArgs = serde_json::from_value(message.args.clone()).unwrap();
    let pipeline = Pipeline::new(client(), app.scratch_dir());
    pipeline.process_image(&args).await.unwrap();
    assert_eq!(app.queue.recover("w1").await.unwrap(), 1);

    // The redelivered copy runs again and hits the write-once rule.
    assert!(app.worker().run_once().await.unwrap());

    let (code, body) = status(&server_url, task_id).await;
    assert_eq!(code, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["status"], "Failed");
    assert_eq!(app.queue.pending_len(), 0, "conflicts are not retried");

    let response = processed(&server_url, image_id).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.bytes().await.unwrap().as_ref(), image.as_slice());
    assert_eq!(dir_entries(&app.scratch_dir()), 0);
}

#[tokio::test]
async fn worker_restarted_under_new_id_finishes_crashed_task() {
    let (app, server_url) = spawn_app(0).await;
    let image = fake_jpeg(2048);

    let job = upload(&server_url, image.clone(), None).await;
    let task_id = job["task_id"].as_str().unwrap();

    // The previous worker process claimed the task and crashed.
    app.queue
        .claim("worker-3f1c0a52-crashed")
        .await
        .unwrap()
        .unwrap();
    let worker = app.worker();
    assert!(!worker.run_once().await.unwrap());

    assert_eq!(worker.recover().await.unwrap(), 1);
    assert!(worker.run_once().await.unwrap());

    let (code, body) = status(&server_url, task_id).await;
    assert_eq!(code, StatusCode::OK);
    assert_eq!(body["status"], "Completed");
    let response = processed(&server_url, job["image_id"].as_str().unwrap()).await;
    assert_eq!(response.bytes().await.unwrap().as_ref(), image.as_slice());
}

// P3, over HTTP.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_publishes_over_http_have_one_winner() {
    let (_app, server_url) = spawn_app(0).await;
    let image_id = Identifier::generate().to_string();
    let url = format!("{server_url}/processed/{image_id}");

    let payloads: Vec<Vec<u8>> = vec![b"writer one".to_vec(), b"writer two".to_vec()];
    let attempts = payloads.iter().map(|payload| {
        let part = multipart::Part::bytes(payload.clone()).file_name("processed.jpg");
        client()
            .post(&url)
            .multipart(multipart::Form::new().part("image", part))
            .send()
    });
    let codes: Vec<StatusCode> = futures::future::join_all(attempts)
        .await
        .into_iter()
        .map(|response| response.unwrap().status())
        .collect();

    let winners: Vec<usize> = codes
        .iter()
        .enumerate()
        .filter(|(_, code)| **code == StatusCode::OK)
        .map(|(i, _)| i)
        .collect();
    assert_eq!(winners.len(), 1, "{codes:?}");
    assert!(codes.contains(&StatusCode::CONFLICT), "{codes:?}");

    let response = processed(&server_url, &image_id).await;
    assert_eq!(response.bytes().await.unwrap().as_ref(), payloads[winners[0]].as_slice());
}

#[tokio::test]
async fn worker_loop_drains_queue_until_shutdown() {
    let (app, server_url) = spawn_app(0).await;

    let mut jobs = Vec::new();
    for len in [512, 1024, 2048] {
        jobs.push(upload(&server_url, fake_jpeg(len), None).await);
    }

    let worker = app.worker();
    let shutdown = async {
        for _ in 0..500 {
            if app.queue.pending_len() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    };
    worker.run(shutdown).await;

    for job in &jobs {
        let (code, body) = status(&server_url, job["task_id"].as_str().unwrap()).await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body["status"], "Completed");
    }
    assert_eq!(dir_entries(&app.scratch_dir()), 0);
}
