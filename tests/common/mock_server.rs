//! In-process mock of a vLLM Responses server.
//!
//! `/v1/responses` answers from a script: each request pops the next
//! scripted reply. When the script runs dry it answers with a plain message.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{Value, json};
use tokio::net::TcpListener;

/// One scripted reply from `/v1/responses`.
#[derive(Debug, Clone)]
pub enum Reply {
    /// A complete JSON response with these output items.
    Items(Vec<Value>),
    /// An SSE stream emitting these output items, then `response.completed`.
    Stream(Vec<Value>),
    /// A bare status code with a text body.
    Status(u16, String),
}

#[derive(Default)]
struct MockState {
    script: Mutex<VecDeque<Reply>>,
    requests: Mutex<Vec<Value>>,
    healthy: Mutex<bool>,
}

/// Mock server bound to an ephemeral local port.
pub struct MockServer {
    addr: SocketAddr,
    state: Arc<MockState>,
    _handle: tokio::task::JoinHandle<()>,
}

impl MockServer {
    /// Starts a server that replies with `script` in order.
    pub async fn start(script: Vec<Reply>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .unwrap_or_else(|_| unreachable!());
        let addr = listener.local_addr().unwrap_or_else(|_| unreachable!());

        let state = Arc::new(MockState {
            script: Mutex::new(script.into()),
            requests: Mutex::new(Vec::new()),
            healthy: Mutex::new(true),
        });

        let app = Router::new()
            .route("/health", get(health))
            .route("/v1/responses", post(responses))
            .route("/v1/models", get(models))
            .with_state(Arc::clone(&state));

        let handle = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Self {
            addr,
            state,
            _handle: handle,
        }
    }

    /// Base URL including the `/v1` prefix.
    pub fn base_url(&self) -> String {
        format!("http://{}/v1", self.addr)
    }

    /// Makes `/health` answer 503.
    pub fn set_unhealthy(&self) {
        *self.state.healthy.lock().unwrap_or_else(|_| unreachable!()) = false;
    }

    /// Request bodies received by `/v1/responses`, oldest first.
    pub fn requests(&self) -> Vec<Value> {
        self.state
            .requests
            .lock()
            .unwrap_or_else(|_| unreachable!())
            .clone()
    }
}

async fn health(State(state): State<Arc<MockState>>) -> StatusCode {
    if *state.healthy.lock().unwrap_or_else(|_| unreachable!()) {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

async fn models() -> Json<Value> {
    Json(json!({
        "object": "list",
        "data": [{ "id": "openai/gpt-oss-20b", "object": "model" }]
    }))
}

async fn responses(State(state): State<Arc<MockState>>, Json(body): Json<Value>) -> Response {
    state
        .requests
        .lock()
        .unwrap_or_else(|_| unreachable!())
        .push(body);

    let next = state
        .script
        .lock()
        .unwrap_or_else(|_| unreachable!())
        .pop_front()
        .unwrap_or_else(|| Reply::Items(vec![message_item("done")]));

    match next {
        Reply::Items(items) => Json(json!({
            "id": "resp_mock",
            "object": "response",
            "status": "completed",
            "output": items,
        }))
        .into_response(),
        Reply::Stream(items) => {
            let mut body = String::new();
            body.push_str(&sse_frame(&json!({ "type": "response.created" })));
            for item in items {
                body.push_str(&sse_frame(
                    &json!({ "type": "response.output_item.done", "item": item }),
                ));
            }
            body.push_str(&sse_frame(&json!({ "type": "response.completed" })));
            ([(header::CONTENT_TYPE, "text/event-stream")], body).into_response()
        }
        Reply::Status(code, text) => (
            StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            text,
        )
            .into_response(),
    }
}

fn sse_frame(payload: &Value) -> String {
    format!("data: {payload}\n\n")
}

/// A `message` output item.
pub fn message_item(text: &str) -> Value {
    json!({
        "type": "message",
        "role": "assistant",
        "content": [{ "type": "output_text", "text": text }]
    })
}

/// A `reasoning` output item.
pub fn reasoning_item(text: &str) -> Value {
    json!({
        "type": "reasoning",
        "content": [{ "type": "reasoning_text", "text": text }]
    })
}

/// A client-side `function_call` output item.
pub fn function_call_item(call_id: &str, name: &str, arguments: &str) -> Value {
    json!({
        "type": "function_call",
        "call_id": call_id,
        "name": name,
        "arguments": arguments,
        "status": "completed"
    })
}
