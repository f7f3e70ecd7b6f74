use axum::Json;
use axum::extract::{Path, State};
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use std::convert::Infallible;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tracing::instrument;

use crate::a2a::state::{A2aState, AgentJob, spawn_outcome_waiter};
use crate::a2a::types::{
    CancelRequest, ErrorBody, SendRequest, StreamEvent, TaskState, TasksView,
};

const A2A_CONTENT_TYPE: &str = "application/a2a+json";

/// Build an A2A JSON response with the protocol content type.
fn a2a_json<T: serde::Serialize>(status: StatusCode, body: &T) -> Response {
    let mut response = (status, Json(body).into_response()).into_response();
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(A2A_CONTENT_TYPE),
    );
    response
}

fn error_response(status: StatusCode, code: &str, message: &str) -> Response {
    a2a_json(
        status,
        &ErrorBody {
            code: code.to_string(),
            message: message.to_string(),
        },
    )
}

/// GET /.well-known/agent-card.json
#[instrument(skip(state))]
pub async fn agent_card_handler(State(state): State<A2aState>) -> Response {
    a2a_json(StatusCode::OK, state.card())
}

/// Resolve the task for a send request: reuse an existing conversation or
/// start a new one. Returns the task id and the extracted user text.
async fn accept_message(state: &A2aState, body: &SendRequest) -> Result<(String, String), Response> {
    let text = body.message.text();
    if text.trim().is_empty() {
        return Err(error_response(
            StatusCode::BAD_REQUEST,
            "empty_message",
            "message has no text parts",
        ));
    }

    let task_id = match &body.task_id {
        Some(existing) => match state.get_task(existing).await {
            Some(record) if record.status.is_terminal() && record.status != TaskState::Completed => {
                return Err(error_response(
                    StatusCode::CONFLICT,
                    "task_terminal",
                    "task can no longer accept messages",
                ));
            }
            Some(_) => {
                state.append_history(existing, body.message.clone()).await;
                existing.clone()
            }
            None => {
                return Err(error_response(
                    StatusCode::NOT_FOUND,
                    "task_not_found",
                    "task not found",
                ));
            }
        },
        None => state.create_task(body.message.clone()).await,
    };
    Ok((task_id, text))
}

/// POST /message:send — run one turn. Blocks for the answer unless the
/// request configuration asks otherwise.
#[instrument(skip(state, body))]
pub async fn message_send_handler(
    State(state): State<A2aState>,
    Json(body): Json<SendRequest>,
) -> Response {
    let (task_id, text) = match accept_message(&state, &body).await {
        Ok(accepted) => accepted,
        Err(response) => return response,
    };

    let (reply_tx, reply_rx) = tokio::sync::oneshot::channel();
    let job = AgentJob {
        task_id: task_id.clone(),
        text,
        reply: reply_tx,
    };
    if let Err(e) = state.submit(job).await {
        return error_response(StatusCode::INTERNAL_SERVER_ERROR, "submit_failed", &e);
    }
    state
        .publish(
            &task_id,
            StreamEvent::StatusUpdate {
                task_id: task_id.clone(),
                status: TaskState::Working,
            },
        )
        .await;

    let blocking = body
        .configuration
        .as_ref()
        .and_then(|c| c.blocking)
        .unwrap_or(true);
    if blocking {
        let outcome = reply_rx
            .await
            .unwrap_or_else(|_| Err("agent worker dropped the turn".to_string()));
        state.apply_outcome(&task_id, outcome).await;
    } else {
        spawn_outcome_waiter(state.clone(), task_id.clone(), reply_rx);
    }

    match state.get_task(&task_id).await {
        Some(record) => a2a_json(StatusCode::OK, &record.view()),
        None => error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal", "task vanished"),
    }
}

/// POST /message:stream — run one turn, streaming progress over SSE.
#[instrument(skip(state, body))]
pub async fn message_stream_handler(
    State(state): State<A2aState>,
    Json(body): Json<SendRequest>,
) -> Response {
    let (task_id, text) = match accept_message(&state, &body).await {
        Ok(accepted) => accepted,
        Err(response) => return response,
    };

    let rx = state.subscribe(&task_id).await;

    let (reply_tx, reply_rx) = tokio::sync::oneshot::channel();
    let job = AgentJob {
        task_id: task_id.clone(),
        text,
        reply: reply_tx,
    };
    if let Err(e) = state.submit(job).await {
        return error_response(StatusCode::INTERNAL_SERVER_ERROR, "submit_failed", &e);
    }
    state
        .publish(
            &task_id,
            StreamEvent::StatusUpdate {
                task_id: task_id.clone(),
                status: TaskState::Working,
            },
        )
        .await;
    spawn_outcome_waiter(state.clone(), task_id.clone(), reply_rx);

    sse_response(rx)
}

/// GET /tasks — list all conversations.
#[instrument(skip(state))]
pub async fn list_tasks_handler(State(state): State<A2aState>) -> Response {
    let tasks = state
        .list_tasks()
        .await
        .into_iter()
        .map(|r| r.view())
        .collect();
    a2a_json(StatusCode::OK, &TasksView { tasks })
}

/// GET /tasks/{id}
#[instrument(skip(state))]
pub async fn get_task_handler(State(state): State<A2aState>, Path(id): Path<String>) -> Response {
    match state.get_task(&id).await {
        Some(record) => a2a_json(StatusCode::OK, &record.view()),
        None => error_response(StatusCode::NOT_FOUND, "task_not_found", "task not found"),
    }
}

/// POST /tasks/{id}:cancel
#[instrument(skip(state, _body))]
pub async fn cancel_task_handler(
    State(state): State<A2aState>,
    Path(id): Path<String>,
    _body: Option<Json<CancelRequest>>,
) -> Response {
    match state.get_task(&id).await {
        Some(record) => {
            if record.status.is_terminal() {
                return error_response(
                    StatusCode::CONFLICT,
                    "task_terminal",
                    "task is already in a terminal state",
                );
            }
            state.cancel(&id).await;
            match state.get_task(&id).await {
                Some(updated) => a2a_json(StatusCode::OK, &updated.view()),
                None => error_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal",
                    "task vanished",
                ),
            }
        }
        None => error_response(StatusCode::NOT_FOUND, "task_not_found", "task not found"),
    }
}

/// POST /tasks/{id}:subscribe — SSE for an existing task.
#[instrument(skip(state))]
pub async fn subscribe_task_handler(
    State(state): State<A2aState>,
    Path(id): Path<String>,
) -> Response {
    match state.get_task(&id).await {
        Some(_) => {
            let rx = state.subscribe(&id).await;
            sse_response(rx)
        }
        None => error_response(StatusCode::NOT_FOUND, "task_not_found", "task not found"),
    }
}

fn sse_response(rx: tokio::sync::broadcast::Receiver<StreamEvent>) -> Response {
    let stream = BroadcastStream::new(rx).map(|result| match result {
        Ok(event) => {
            let data = serde_json::to_string(&event).unwrap_or_default();
            Ok::<_, Infallible>(Event::default().data(data))
        }
        Err(_) => Ok(Event::default().data("{\"type\":\"error\",\"message\":\"stream lagged\"}")),
    });
    Sse::new(stream)
        .keep_alive(axum::response::sse::KeepAlive::default())
        .into_response()
}
