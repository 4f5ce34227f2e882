use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};
use url::Url;
use uuid::Uuid;

use crate::queue::DispatchQueue;
use crate::registry::TaskRegistry;
use crate::task::{TaskRequest, TaskState};

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("missing required parameter: {0}")]
    MissingParam(&'static str),
    #[error("invalid url")]
    InvalidUrl,
    #[error("task not found")]
    NotFound,
    #[error("service is shutting down")]
    Unavailable,
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::MissingParam(_) | ApiError::InvalidUrl => StatusCode::BAD_REQUEST,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(serde_json::json!({ "error": self.to_string() }));
        (self.status(), body).into_response()
    }
}

/// Shared state handed to every handler. Thin by design: handlers only
/// translate HTTP into registry/queue calls and never block on workers.
#[derive(Clone)]
pub struct ApiState {
    registry: Arc<TaskRegistry>,
    queue: DispatchQueue,
}

impl ApiState {
    pub fn new(registry: Arc<TaskRegistry>, queue: DispatchQueue) -> Self {
        Self { registry, queue }
    }
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/turnstile", get(create_task_handler))
        .route("/result", get(task_result_handler))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct TurnstileParams {
    url: Option<String>,
    sitekey: Option<String>,
    action: Option<String>,
    cdata: Option<String>,
}

#[derive(Debug, Serialize)]
struct CreatedResponse {
    task_id: Uuid,
}

async fn create_task_handler(
    State(state): State<ApiState>,
    Query(params): Query<TurnstileParams>,
) -> Result<Json<CreatedResponse>, ApiError> {
    let url = params
        .url
        .filter(|value| !value.is_empty())
        .ok_or(ApiError::MissingParam("url"))?;
    let site_key = params
        .sitekey
        .filter(|value| !value.is_empty())
        .ok_or(ApiError::MissingParam("sitekey"))?;
    Url::parse(&url).map_err(|_| ApiError::InvalidUrl)?;

    let task = state.registry.create(TaskRequest {
        url,
        site_key,
        action: params.action.filter(|value| !value.is_empty()),
        cdata: params.cdata.filter(|value| !value.is_empty()),
    });
    if state.queue.enqueue(task.id).is_err() {
        // Nothing will ever dequeue it; do not strand a queued task.
        state.registry.remove(task.id);
        return Err(ApiError::Unavailable);
    }

    info!(task = %task.id, url = %task.request.url, "task accepted");
    Ok(Json(CreatedResponse { task_id: task.id }))
}

#[derive(Debug, Deserialize)]
struct ResultParams {
    id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum ResultResponse {
    Pending {
        status: &'static str,
    },
    Terminal {
        status: &'static str,
        value: String,
        elapsed_time: f64,
    },
}

async fn task_result_handler(
    State(state): State<ApiState>,
    Query(params): Query<ResultParams>,
) -> Result<Json<ResultResponse>, ApiError> {
    let id = params
        .id
        .filter(|value| !value.is_empty())
        .ok_or(ApiError::MissingParam("id"))?;
    // Ids that never parse can never have been issued; same answer as an
    // unknown or evicted id.
    let id = Uuid::parse_str(&id).map_err(|_| ApiError::NotFound)?;

    let task = state.registry.get(id).ok_or(ApiError::NotFound)?;
    debug!(task = %id, state = %task.state, "result polled");

    let elapsed_time = task.elapsed_seconds().unwrap_or_default();
    let response = match task.state {
        TaskState::Queued | TaskState::Processing => ResultResponse::Pending {
            status: "processing",
        },
        TaskState::Ready => ResultResponse::Terminal {
            status: "ready",
            value: task.result.unwrap_or_default(),
            elapsed_time,
        },
        TaskState::Fail => ResultResponse::Terminal {
            status: "fail",
            value: task
                .error_code
                .map(|code| code.as_str().to_string())
                .unwrap_or_default(),
            elapsed_time,
        },
    };
    Ok(Json(response))
}

async fn index_handler() -> Html<&'static str> {
    Html(
        r#"<!DOCTYPE html>
<html lang="en">
<head><meta charset="UTF-8"><title>stile</title></head>
<body>
<h1>stile</h1>
<p>Submit a challenge with <code>GET /turnstile?url=&amp;sitekey=</code>
(optional <code>action</code> and <code>cdata</code>), then poll
<code>GET /result?id=&lt;task_id&gt;</code> until the response is terminal.</p>
</body>
</html>
"#,
    )
}
