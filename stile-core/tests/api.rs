use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;

use stile_core::{
    router, ApiState, DispatchQueue, ErrorCode, TaskOutcome, TaskRegistry, TaskRequest,
};

struct Harness {
    registry: Arc<TaskRegistry>,
    queue: DispatchQueue,
    app: Router,
}

fn harness() -> Harness {
    let registry = Arc::new(TaskRegistry::new());
    let queue = DispatchQueue::new();
    let app = router(ApiState::new(Arc::clone(&registry), queue.clone()));
    Harness {
        registry,
        queue,
        app,
    }
}

async fn get(app: &Router, uri: &str) -> (StatusCode, Value) {
    let response = app
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

#[tokio::test]
async fn create_returns_task_id_and_enqueues() {
    let h = harness();
    let (status, body) = get(
        &h.app,
        "/turnstile?url=https://example.com/login&sitekey=0x4AAAAAAA&action=login",
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let id: uuid::Uuid = body["task_id"].as_str().unwrap().parse().unwrap();
    let task = h.registry.get(id).unwrap();
    assert_eq!(task.request.url, "https://example.com/login");
    assert_eq!(task.request.site_key, "0x4AAAAAAA");
    assert_eq!(task.request.action.as_deref(), Some("login"));
    assert!(task.request.cdata.is_none());

    // The task is dispatched in the same request.
    assert_eq!(h.queue.dequeue().await, Some(id));
}

#[tokio::test]
async fn missing_parameters_are_rejected() {
    let h = harness();
    for uri in [
        "/turnstile",
        "/turnstile?url=https://example.com",
        "/turnstile?sitekey=0x4AAAAAAA",
        "/turnstile?url=&sitekey=0x4AAAAAAA",
        "/turnstile?url=https://example.com&sitekey=",
    ] {
        let (status, body) = get(&h.app, uri).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "expected 400 for {uri}");
        assert!(body["error"].is_string());
    }
    assert!(h.registry.is_empty(), "rejected requests must not create tasks");
}

#[tokio::test]
async fn malformed_url_is_rejected() {
    let h = harness();
    let (status, body) = get(&h.app, "/turnstile?url=not-a-url&sitekey=0x4AAAAAAA").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid url");
}

#[tokio::test]
async fn pending_task_polls_as_processing() {
    let h = harness();
    let task = h.registry.create(TaskRequest {
        url: "https://example.com".into(),
        site_key: "0x4AAAAAAA".into(),
        action: None,
        cdata: None,
    });

    let (status, body) = get(&h.app, &format!("/result?id={}", task.id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, serde_json::json!({ "status": "processing" }));

    // Same shape while a worker owns the task.
    h.registry.begin(task.id).unwrap();
    let (_, body) = get(&h.app, &format!("/result?id={}", task.id)).await;
    assert_eq!(body, serde_json::json!({ "status": "processing" }));
}

#[tokio::test]
async fn ready_task_reports_token_and_elapsed() {
    let h = harness();
    let task = h.registry.create(TaskRequest {
        url: "https://example.com".into(),
        site_key: "0x4AAAAAAA".into(),
        action: None,
        cdata: None,
    });
    h.registry.begin(task.id).unwrap();
    h.registry
        .finish(
            task.id,
            TaskOutcome::Solved {
                token: "0.KBtT-r".into(),
                elapsed: Duration::from_millis(7604),
            },
        )
        .unwrap();

    let (status, first) = get(&h.app, &format!("/result?id={}", task.id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["status"], "ready");
    assert_eq!(first["value"], "0.KBtT-r");
    assert_eq!(first["elapsed_time"], 7.604);

    // Terminal results are stable across reads.
    let (_, second) = get(&h.app, &format!("/result?id={}", task.id)).await;
    assert_eq!(second, first);
}

#[tokio::test]
async fn failed_task_reports_error_tag() {
    let h = harness();
    let task = h.registry.create(TaskRequest {
        url: "https://example.com".into(),
        site_key: "0x4AAAAAAA".into(),
        action: None,
        cdata: None,
    });
    h.registry.begin(task.id).unwrap();
    h.registry
        .finish(
            task.id,
            TaskOutcome::Failed {
                code: ErrorCode::SolveTimeout,
                elapsed: Duration::from_secs(30),
            },
        )
        .unwrap();

    let (status, body) = get(&h.app, &format!("/result?id={}", task.id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "fail");
    assert_eq!(body["value"], "SOLVE_TIMEOUT");
    assert_eq!(body["elapsed_time"], 30.0);
}

#[tokio::test]
async fn result_treats_bad_and_unknown_ids_alike() {
    let h = harness();

    let (status, _) = get(&h.app, "/result").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // An id that was never issued answers not-found whether or not it even
    // parses as one.
    for id in ["not-a-real-id", &uuid::Uuid::new_v4().to_string()] {
        let (status, body) = get(&h.app, &format!("/result?id={id}")).await;
        assert_eq!(status, StatusCode::NOT_FOUND, "expected 404 for {id}");
        assert_eq!(body["error"], "task not found");
    }
}

#[tokio::test]
async fn create_after_queue_close_is_unavailable() {
    let h = harness();
    h.queue.close();
    let (status, body) = get(&h.app, "/turnstile?url=https://example.com&sitekey=0x4AAAAAAA").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"], "service is shutting down");
    // The refused submission leaves no stranded queued task behind.
    assert!(h.registry.is_empty());
}

#[tokio::test]
async fn index_page_serves_usage_html() {
    let h = harness();
    let response = h
        .app
        .clone()
        .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let html = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(html.contains("/turnstile"));
    assert!(html.contains("/result"));
}
