//! Integration tests for the HTTP job service client.
//!
//! Each test spins up an Axum server on a random port that mimics the
//! cloaking service (`/protect`, `/status/{id}`, `/download/{id}`) and drives
//! the real reqwest client against it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{Json, Router};
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::time::timeout;

use cloak_client::config::ClientConfig;
use cloak_client::error::{Error, ServiceError};
use cloak_client::service::{
    HttpJobService, InputFile, JobOutcome, JobService, OutputFormat, SecurityLevel,
};
use cloak_client::task::{TaskController, TaskState};

/// Maximum time any test is allowed to run before we consider it hung.
const TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// One `/protect` request as seen by the fake service.
#[derive(Debug, Clone)]
struct RecordedUpload {
    query: HashMap<String, String>,
    content_type: String,
    body: String,
}

#[derive(Default)]
struct FakeService {
    uploads: Mutex<Vec<RecordedUpload>>,
    status_calls: AtomicUsize,
    /// Number of PENDING answers before reporting success.
    pending_polls: usize,
}

async fn protect(
    State(svc): State<Arc<FakeService>>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> Json<Value> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    svc.uploads.lock().unwrap().push(RecordedUpload {
        query,
        content_type,
        body: String::from_utf8_lossy(&body).into_owned(),
    });
    Json(json!({ "task_id": "job-42-abcdefgh", "upload_id": "u-1" }))
}

async fn status(State(svc): State<Arc<FakeService>>, Path(task_id): Path<String>) -> Response {
    match task_id.as_str() {
        "boom" => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
        "garbled" => "not json".into_response(),
        _ => {
            let call = svc.status_calls.fetch_add(1, Ordering::SeqCst);
            if call < svc.pending_polls {
                Json(json!({ "task_id": task_id, "status": "PENDING", "result": null }))
                    .into_response()
            } else {
                Json(json!({
                    "task_id": task_id,
                    "status": "SUCCESS",
                    "result": { "status": 1, "result_paths": ["/tmp/a_cloaked.png"], "elapsed_time": 12.4 }
                }))
                .into_response()
            }
        }
    }
}

async fn download(Path(task_id): Path<String>) -> Response {
    if task_id == "missing" {
        return (StatusCode::NOT_FOUND, "No protected images found").into_response();
    }
    (
        [(header::CONTENT_TYPE, "application/zip")],
        format!("PK-{task_id}"),
    )
        .into_response()
}

/// Start the fake service on a random port, return (config, state).
async fn start_server(pending_polls: usize) -> (ClientConfig, Arc<FakeService>) {
    let svc = Arc::new(FakeService {
        pending_polls,
        ..Default::default()
    });
    let app = Router::new()
        .route("/protect", post(protect))
        .route("/status/{task_id}", get(status))
        .route("/download/{task_id}", get(download))
        .with_state(Arc::clone(&svc));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    // Give the server a moment to start accepting connections.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let config = ClientConfig::with_base_url(&format!("http://127.0.0.1:{port}")).unwrap();
    (config, svc)
}

fn images() -> Vec<InputFile> {
    vec![
        InputFile::new("a.png", b"\x89PNG-a".to_vec()),
        InputFile::new("b.jpg", b"\xff\xd8-b".to_vec()),
    ]
}

#[tokio::test]
async fn submit_sends_multipart_with_parameters() {
    timeout(TEST_TIMEOUT, async {
        let (config, svc) = start_server(0).await;
        let client = HttpJobService::new(&config);

        let job_id = client
            .submit(&images(), SecurityLevel::Maximum, OutputFormat::Jpg)
            .await
            .unwrap();
        assert_eq!(job_id, "job-42-abcdefgh");

        let uploads = svc.uploads.lock().unwrap().clone();
        assert_eq!(uploads.len(), 1);
        let upload = &uploads[0];
        assert_eq!(upload.query.get("mode").map(String::as_str), Some("maximum"));
        assert_eq!(upload.query.get("format").map(String::as_str), Some("jpg"));
        assert!(upload.content_type.starts_with("multipart/form-data"));
        assert_eq!(upload.body.matches(r#"name="files""#).count(), 2);
        assert!(upload.body.contains(r#"filename="a.png""#));
        assert!(upload.body.contains(r#"filename="b.jpg""#));
        assert!(upload.body.contains("image/jpeg"));
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn status_and_download() {
    timeout(TEST_TIMEOUT, async {
        let (config, _svc) = start_server(1).await;
        let client = HttpJobService::new(&config);

        let first = client.status("job-42").await.unwrap();
        assert_eq!(first.outcome(), JobOutcome::Running);

        let second = client.status("job-42").await.unwrap();
        assert_eq!(
            second.outcome(),
            JobOutcome::Succeeded {
                elapsed_time: Some(12.4)
            }
        );

        let artifact = client.download("job-42").await.unwrap();
        assert_eq!(artifact, b"PK-job-42");
        assert_eq!(
            client.download_url("job-42"),
            format!("{}download/job-42", config.base_url)
        );
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn http_errors_are_reported() {
    timeout(TEST_TIMEOUT, async {
        let (config, _svc) = start_server(0).await;
        let client = HttpJobService::new(&config);

        let err = client.status("boom").await.unwrap_err();
        assert!(matches!(err, ServiceError::Http { status: 500, .. }), "{err:?}");

        let err = client.status("garbled").await.unwrap_err();
        assert!(matches!(err, ServiceError::InvalidResponse { .. }), "{err:?}");

        let err = client.download("missing").await.unwrap_err();
        assert!(matches!(err, ServiceError::Http { status: 404, .. }), "{err:?}");
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn unreachable_service_fails_request() {
    timeout(TEST_TIMEOUT, async {
        // Reserve a port, then free it so nothing is listening.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let config = ClientConfig::with_base_url(&format!("http://127.0.0.1:{port}")).unwrap();
        let client = HttpJobService::new(&config);
        let err = client
            .submit(&images(), SecurityLevel::Standard, OutputFormat::Png)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::RequestFailed { .. }), "{err:?}");
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn controller_runs_full_lifecycle_over_http() {
    timeout(TEST_TIMEOUT, async {
        let (base, svc) = start_server(2).await;
        let config = ClientConfig {
            poll_interval: Duration::from_millis(20),
            estimate_interval: Duration::from_millis(10),
            elapsed_interval: Duration::from_millis(10),
            ..base
        };
        let controller = TaskController::from_config(config);

        controller.select_files(images()).await.unwrap();
        let job_id = controller
            .submit(SecurityLevel::Standard, OutputFormat::Png)
            .await
            .unwrap();
        assert_eq!(job_id, "job-42-abcdefgh");

        while !controller.state().await.is_terminal() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let snap = controller.snapshot().await;
        assert_eq!(snap.state, TaskState::Complete);
        assert_eq!(snap.progress_percent, 100.0);
        assert_eq!(snap.elapsed_seconds, 12);
        assert_eq!(svc.status_calls.load(Ordering::SeqCst), 3);
        assert_eq!(controller.active_timers().await, 0);
        assert!(controller.log().contains("Task ID: job-42-a..."));
        assert!(controller.log().contains("Total Time: 12.4s"));

        let artifact = controller.download().await.unwrap();
        assert_eq!(artifact, b"PK-job-42-abcdefgh");
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn controller_surfaces_submission_failure() {
    timeout(TEST_TIMEOUT, async {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let config = ClientConfig::with_base_url(&format!("http://127.0.0.1:{port}")).unwrap();
        let controller = TaskController::from_config(config);
        controller.select_files(images()).await.unwrap();

        assert!(
            controller
                .submit(SecurityLevel::Enhanced, OutputFormat::Png)
                .await
                .is_err()
        );
        assert_eq!(controller.state().await, TaskState::Error);
        assert!(controller.log().contains("CRITICAL: Upload Negotiation Failed."));
        assert!(matches!(controller.download().await, Err(Error::Task(_))));
    })
    .await
    .expect("test timed out");
}
