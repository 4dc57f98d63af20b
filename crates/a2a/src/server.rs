//! HTTP front of a hosted agent
//!
//! `GET /.well-known/agent-card.json` serves the card, `POST /` takes
//! JSON-RPC requests. `message/stream` answers with server-sent events,
//! one JSON-RPC response per task event.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::State;
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::Value;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use waypoint_bus::{AgentMessage, EventReceiver, StreamEvent, Task, TaskPublisher};

use crate::card::{AgentCard, CARD_PATH};
use crate::executor::{AgentExecutor, RequestContext};
use crate::jsonrpc::{self, methods, JsonRpcRequest, JsonRpcResponse, MessageSendParams, TaskIdParams};
use crate::Result;

#[derive(Clone)]
struct AppState {
    card: Arc<AgentCard>,
    executor: Arc<dyn AgentExecutor>,
}

/// Serves one executor under one card
pub struct A2aServer {
    state: AppState,
}

impl A2aServer {
    pub fn new(card: AgentCard, executor: Arc<dyn AgentExecutor>) -> Self {
        Self {
            state: AppState {
                card: Arc::new(card),
                executor,
            },
        }
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route(CARD_PATH, get(agent_card))
            .route("/", post(handle_rpc))
            .with_state(self.state.clone())
    }

    /// Serve until the listener fails
    pub async fn serve(self, listener: TcpListener) -> Result<()> {
        let addr = listener.local_addr()?;
        info!("{} listening on http://{}", self.state.card.name, addr);
        info!("agent card at http://{}{}", addr, CARD_PATH);

        axum::serve(listener, self.router()).await?;
        Ok(())
    }

    /// Bind `addr` and serve
    pub async fn bind(self, addr: &str) -> Result<()> {
        let listener = TcpListener::bind(addr).await?;
        self.serve(listener).await
    }
}

async fn agent_card(State(state): State<AppState>) -> Json<AgentCard> {
    Json(state.card.as_ref().clone())
}

async fn handle_rpc(State(state): State<AppState>, body: String) -> Response {
    let request: JsonRpcRequest = match serde_json::from_str(&body) {
        Ok(request) => request,
        Err(e) => {
            return Json(JsonRpcResponse::failure(
                Value::Null,
                jsonrpc::PARSE_ERROR,
                format!("Parse error: {}", e),
            ))
            .into_response()
        }
    };

    if request.jsonrpc != jsonrpc::VERSION {
        return Json(JsonRpcResponse::failure(
            request.id,
            jsonrpc::INVALID_REQUEST,
            "Invalid request: jsonrpc must be \"2.0\"",
        ))
        .into_response();
    }

    debug!(method = %request.method, "json-rpc request");

    match request.method.as_str() {
        methods::SEND => match message_params(&request) {
            Ok(params) => Json(send_message(&state, request.id, params.message).await).into_response(),
            Err(response) => Json(response).into_response(),
        },
        methods::STREAM => match message_params(&request) {
            Ok(params) => stream_message(&state, request.id, params.message).into_response(),
            Err(response) => Json(response).into_response(),
        },
        methods::CANCEL => {
            let response = match serde_json::from_value::<TaskIdParams>(request.params) {
                Ok(params) => {
                    state.executor.cancel_task(&params.id).await;
                    JsonRpcResponse::success(request.id, Value::Null)
                }
                Err(e) => JsonRpcResponse::failure(
                    request.id,
                    jsonrpc::INVALID_PARAMS,
                    format!("Invalid params: {}", e),
                ),
            };
            Json(response).into_response()
        }
        other => Json(JsonRpcResponse::failure(
            request.id,
            jsonrpc::METHOD_NOT_FOUND,
            format!("Method not found: {}", other),
        ))
        .into_response(),
    }
}

fn message_params(request: &JsonRpcRequest) -> std::result::Result<MessageSendParams, JsonRpcResponse> {
    serde_json::from_value(request.params.clone()).map_err(|e| {
        JsonRpcResponse::failure(
            request.id.clone(),
            jsonrpc::INVALID_PARAMS,
            format!("Invalid params: {}", e),
        )
    })
}

/// Hand the request to the executor on its own task
fn start(state: &AppState, message: AgentMessage) -> EventReceiver {
    let request = RequestContext::new(message);
    let (publisher, receiver) = TaskPublisher::channel(&request.task_id, &request.context_id);
    let executor = Arc::clone(&state.executor);

    tokio::spawn(async move {
        let task_id = request.task_id.clone();
        if let Err(e) = executor.execute(request, publisher).await {
            warn!(task_id = %task_id, "task aborted: {}", e);
        }
    });

    receiver
}

/// Run to the end and answer with the finished task, or the direct reply
async fn send_message(state: &AppState, id: Value, message: AgentMessage) -> JsonRpcResponse {
    let mut receiver = start(state, message);
    let mut task: Option<Task> = None;

    while let Some(event) = receiver.recv().await {
        match event {
            StreamEvent::Task(announced) => task = Some(announced),
            StreamEvent::StatusUpdate(update) => {
                if let Some(task) = task.as_mut() {
                    if let Some(message) = &update.status.message {
                        task.history.push(message.clone());
                    }
                    task.status = update.status;
                }
            }
            StreamEvent::Message(reply) if task.is_none() => return event_response(id, StreamEvent::Message(reply)),
            StreamEvent::Message(note) => {
                if let Some(task) = task.as_mut() {
                    task.history.push(note);
                }
            }
        }
    }

    match task {
        Some(task) => event_response(id, StreamEvent::Task(task)),
        None => JsonRpcResponse::failure(id, jsonrpc::INTERNAL_ERROR, "Executor finished without a response"),
    }
}

fn event_response(id: Value, event: StreamEvent) -> JsonRpcResponse {
    match serde_json::to_value(&event) {
        Ok(result) => JsonRpcResponse::success(id, result),
        Err(e) => JsonRpcResponse::failure(id, jsonrpc::INTERNAL_ERROR, e.to_string()),
    }
}

fn stream_message(
    state: &AppState,
    id: Value,
    message: AgentMessage,
) -> Sse<impl futures::Stream<Item = std::result::Result<SseEvent, Infallible>>> {
    let mut receiver = start(state, message);

    let stream = async_stream::stream! {
        while let Some(event) = receiver.recv().await {
            let response = event_response(id.clone(), event);
            match serde_json::to_string(&response) {
                Ok(data) => yield Ok(SseEvent::default().data(data)),
                Err(e) => warn!("failed to encode stream event: {}", e),
            }
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}
