//! vLLM provider speaking the OpenAI Responses API.
//!
//! Requests go to `{base_url}/responses`. The liveness probe goes to
//! `/health` on the same host with the API prefix removed, since vLLM serves
//! it outside `/v1`.

use std::collections::VecDeque;
use std::fmt::Display;
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{Stream, StreamExt, stream};
use reqwest::{StatusCode, Url};
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::agent::config::Settings;
use crate::agent::event::{Event, EventKind, EventStream};
use crate::agent::message::ConversationEntry;
use crate::agent::provider::{HealthStatus, LlmProvider, TurnRequest};
use crate::agent::retry::{AttemptError, RetryPolicy, retry};
use crate::agent::tool::{ToolCall, ToolFailure, ToolOrigin, ToolOutput};
use crate::error::AgentError;

/// vLLM (or any Responses-compatible) server.
pub struct VllmProvider {
    http: reqwest::Client,
    base_url: String,
    health_url: String,
    api_key: Option<String>,
    timeout: Duration,
    health_timeout: Duration,
    retry: RetryPolicy,
}

impl VllmProvider {
    /// Creates a provider from settings.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::Configuration`] if the base URL cannot be turned
    /// into a health URL or the HTTP client cannot be built.
    pub fn new(settings: &Settings) -> Result<Self, AgentError> {
        let http = reqwest::Client::builder()
            .connect_timeout(settings.timeout)
            .build()
            .map_err(|e| AgentError::Configuration {
                message: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            http,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            health_url: health_url_for(&settings.base_url)?,
            api_key: settings.api_key.clone(),
            timeout: settings.timeout,
            health_timeout: settings.health_timeout,
            retry: RetryPolicy::with_max_retries(settings.max_retries),
        })
    }

    /// URL of the liveness probe.
    #[must_use]
    pub fn health_url(&self) -> &str {
        &self.health_url
    }

    fn authorized(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }

    async fn post_with_retry(
        &self,
        url: &str,
        body: &Value,
        streaming: bool,
    ) -> Result<reqwest::Response, AgentError> {
        retry(&self.retry, url, |attempt| {
            let mut builder = self.authorized(self.http.post(url)).json(body);
            // A streamed body can legitimately outlive the request timeout;
            // the turn deadline bounds it instead.
            if !streaming {
                builder = builder.timeout(self.timeout);
            }
            async move {
                debug!(url, attempt, "sending request");
                let response = builder.send().await.map_err(classify_send_error)?;
                check_status(response).await
            }
        })
        .await
    }
}

/// Derives the health URL from a base URL: same scheme, host and port, path
/// replaced by `/health`.
///
/// # Errors
///
/// Returns [`AgentError::Configuration`] if the base URL does not parse.
pub fn health_url_for(base_url: &str) -> Result<String, AgentError> {
    let mut url = Url::parse(base_url).map_err(|e| AgentError::Configuration {
        message: format!("invalid base URL '{base_url}': {e}"),
    })?;
    url.set_path("/health");
    url.set_query(None);
    url.set_fragment(None);
    Ok(url.to_string())
}

fn classify_send_error(err: reqwest::Error) -> AttemptError {
    if err.is_connect() || err.is_timeout() || err.is_request() {
        AttemptError::Transient {
            reason: err.to_string(),
        }
    } else {
        AttemptError::Fatal(AgentError::Stream {
            message: err.to_string(),
        })
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, AttemptError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    if is_retryable_status(status) {
        Err(AttemptError::Transient {
            reason: format!("HTTP {}: {body}", status.as_u16()),
        })
    } else {
        Err(AttemptError::Fatal(AgentError::ServerRejected {
            status: status.as_u16(),
            body,
        }))
    }
}

/// Server-side and throttling statuses are retried; other client errors are not.
#[must_use]
pub fn is_retryable_status(status: StatusCode) -> bool {
    status.is_server_error()
        || matches!(
            status,
            StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS
        )
}

/// Builds the `/responses` request body.
#[must_use]
pub fn request_body(request: &TurnRequest<'_>, streaming: bool) -> Value {
    let input: Vec<Value> = request
        .conversation
        .sent_entries()
        .filter_map(input_item)
        .collect();

    let mut body = json!({
        "model": request.model,
        "instructions": request.instructions,
        "input": input,
        "stream": streaming,
    });

    if !request.tools.is_empty() {
        let tools: Vec<Value> = request
            .tools
            .iter()
            .map(|t| {
                json!({
                    "type": "function",
                    "name": t.name,
                    "description": t.description,
                    "parameters": t.parameters,
                })
            })
            .collect();
        body["tools"] = Value::Array(tools);
    }
    body
}

fn input_item(entry: &ConversationEntry) -> Option<Value> {
    match entry {
        ConversationEntry::User { content } => Some(json!({ "role": "user", "content": content })),
        ConversationEntry::Assistant { content } => {
            Some(json!({ "role": "assistant", "content": content }))
        }
        ConversationEntry::ToolCall(call) => Some(json!({
            "type": "function_call",
            "call_id": call.id,
            "name": call.name,
            "arguments": call.arguments,
        })),
        ConversationEntry::ToolOutput(output) => Some(json!({
            "type": "function_call_output",
            "call_id": output.call_id,
            "output": output.content,
        })),
        ConversationEntry::Failure { .. } => None,
    }
}

fn joined_text(parts: Option<&Value>, accept: &[&str]) -> String {
    parts
        .and_then(Value::as_array)
        .map(|parts| {
            parts
                .iter()
                .filter(|p| {
                    p.get("type")
                        .and_then(Value::as_str)
                        .is_none_or(|t| accept.contains(&t))
                })
                .filter_map(|p| p.get("text").and_then(Value::as_str))
                .collect::<Vec<_>>()
                .join("\n")
        })
        .unwrap_or_default()
}

fn string_field(item: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|k| match item.get(*k) {
        Some(Value::String(s)) => Some(s.clone()),
        Some(Value::Null) | None => None,
        Some(other) => Some(other.to_string()),
    })
}

/// Maps one Responses API output item to events.
///
/// Unknown item types yield nothing. A server-executed `*_call` item that
/// already reports completion carries its own output, so it yields both the
/// call and the output.
#[must_use]
pub fn parse_output_item(item: &Value) -> Vec<EventKind> {
    let kind = item.get("type").and_then(Value::as_str).unwrap_or_default();
    match kind {
        "reasoning" => {
            let mut text = joined_text(item.get("content"), &["reasoning_text", "text"]);
            if text.is_empty() {
                text = joined_text(item.get("summary"), &["summary_text", "text"]);
            }
            vec![EventKind::Reasoning { text }]
        }
        "message" => vec![EventKind::Message {
            text: joined_text(item.get("content"), &["output_text", "text"]),
        }],
        "function_call" => vec![EventKind::ToolCall(ToolCall {
            id: string_field(item, &["call_id", "id"]).unwrap_or_default(),
            name: string_field(item, &["name"]).unwrap_or_default(),
            arguments: string_field(item, &["arguments"]).unwrap_or_else(|| "{}".to_string()),
            origin: ToolOrigin::Client,
        })],
        "function_call_output" => vec![EventKind::ToolOutput(ToolOutput {
            call_id: string_field(item, &["call_id"]).unwrap_or_default(),
            content: string_field(item, &["output"]).unwrap_or_default(),
            failure: None,
        })],
        server if server.ends_with("_call") => server_call_events(server, item),
        other => {
            debug!(item_type = other, "ignoring output item");
            Vec::new()
        }
    }
}

fn server_call_events(kind: &str, item: &Value) -> Vec<EventKind> {
    let id = string_field(item, &["call_id", "id"]).unwrap_or_default();
    let name = kind.trim_end_matches("_call").to_string();
    let call = ToolCall {
        id: id.clone(),
        name: name.clone(),
        arguments: string_field(item, &["action", "arguments", "input"])
            .unwrap_or_else(|| "{}".to_string()),
        origin: ToolOrigin::Server,
    };

    let status = item.get("status").and_then(Value::as_str);
    let content = string_field(item, &["output", "results", "result"]);
    let output = match (status, content) {
        (Some("failed" | "incomplete"), content) => Some(ToolOutput {
            call_id: id,
            content: content.unwrap_or_else(|| format!("{name} did not complete")),
            failure: Some(ToolFailure::Execution),
        }),
        (_, Some(content)) => Some(ToolOutput::success(id, content)),
        (Some("completed"), None) => Some(ToolOutput::success(id, format!("{name} completed"))),
        _ => None,
    };

    let mut events = vec![EventKind::ToolCall(call)];
    events.extend(output.map(EventKind::ToolOutput));
    events
}

/// Maps a complete (non-streaming) response body to events.
///
/// # Errors
///
/// Returns [`AgentError::ResponseParse`] if the body has no `output` array
/// or reports an error.
pub fn parse_response(body: &Value) -> Result<Vec<EventKind>, AgentError> {
    if let Some(message) = error_message(body) {
        return Err(AgentError::ResponseParse { message });
    }
    let output = body
        .get("output")
        .and_then(Value::as_array)
        .ok_or_else(|| AgentError::ResponseParse {
            message: "response has no 'output' array".to_string(),
        })?;
    Ok(output.iter().flat_map(parse_output_item).collect())
}

fn error_message(body: &Value) -> Option<String> {
    let err = body
        .get("error")
        .or_else(|| body.get("response").and_then(|r| r.get("error")))
        .filter(|e| !e.is_null())?;
    Some(
        err.get("message")
            .and_then(Value::as_str)
            .map_or_else(|| err.to_string(), String::from),
    )
}

/// One parsed SSE frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseFrame {
    /// Completed output items.
    Items(Vec<EventKind>),
    /// End of the response.
    Done,
    /// Deltas, keep-alives and bookkeeping frames.
    Ignored,
}

/// Parses one SSE frame (the text between blank lines).
///
/// # Errors
///
/// Returns [`AgentError::Stream`] for `error`/`response.failed` frames and
/// for data that is not JSON.
pub fn parse_sse_frame(frame: &str) -> Result<SseFrame, AgentError> {
    let mut event_name = None;
    let mut data = Vec::new();
    for line in frame.lines() {
        let line = line.trim_end_matches('\r');
        if let Some(rest) = line.strip_prefix("data:") {
            data.push(rest.strip_prefix(' ').unwrap_or(rest));
        } else if let Some(rest) = line.strip_prefix("event:") {
            event_name = Some(rest.trim());
        }
    }

    let data = data.join("\n");
    if data.trim().is_empty() {
        return Ok(SseFrame::Ignored);
    }
    if data.trim() == "[DONE]" {
        return Ok(SseFrame::Done);
    }

    let payload: Value = serde_json::from_str(&data).map_err(|e| AgentError::Stream {
        message: format!("invalid SSE payload: {e}"),
    })?;
    let kind = payload
        .get("type")
        .and_then(Value::as_str)
        .or(event_name)
        .unwrap_or_default();

    match kind {
        "response.output_item.done" => Ok(SseFrame::Items(
            payload.get("item").map(parse_output_item).unwrap_or_default(),
        )),
        "response.completed" => Ok(SseFrame::Done),
        "error" | "response.failed" => Err(AgentError::Stream {
            message: error_message(&payload)
                .or_else(|| string_field(&payload, &["message"]))
                .unwrap_or_else(|| "server reported a stream failure".to_string()),
        }),
        _ => Ok(SseFrame::Ignored),
    }
}

fn frame_end(buffer: &[u8]) -> Option<(usize, usize)> {
    let lf = buffer.windows(2).position(|w| w == b"\n\n").map(|i| (i, 2));
    let crlf = buffer.windows(4).position(|w| w == b"\r\n\r\n").map(|i| (i, 4));
    match (lf, crlf) {
        (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
        (a, b) => a.or(b),
    }
}

struct SseState<S> {
    body: Pin<Box<S>>,
    buffer: Vec<u8>,
    queue: VecDeque<EventKind>,
    seq: usize,
    finished: bool,
}

impl<S> SseState<S> {
    fn apply(&mut self, frame: &[u8]) -> Result<(), AgentError> {
        match parse_sse_frame(&String::from_utf8_lossy(frame))? {
            SseFrame::Items(kinds) => self.queue.extend(kinds),
            SseFrame::Done => self.finished = true,
            SseFrame::Ignored => {}
        }
        Ok(())
    }
}

/// Turns an SSE byte stream into events.
///
/// The sequence ends on `response.completed`, `[DONE]`, or end of body.
/// A stream that ends without a message item is still a normal end; the
/// assembler decides what it means.
pub fn sse_events<S, B, E>(body: S) -> EventStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send,
    E: Display + Send,
{
    let state = SseState {
        body: Box::pin(body),
        buffer: Vec::new(),
        queue: VecDeque::new(),
        seq: 0,
        finished: false,
    };

    Box::pin(stream::unfold(state, |mut st| async move {
        loop {
            if let Some(kind) = st.queue.pop_front() {
                let event = Event::new(st.seq, kind);
                st.seq += 1;
                return Some((Ok(event), st));
            }
            if st.finished {
                return None;
            }

            if let Some((end, delim)) = frame_end(&st.buffer) {
                let frame: Vec<u8> = st.buffer.drain(..end + delim).take(end).collect();
                if let Err(e) = st.apply(&frame) {
                    st.finished = true;
                    return Some((Err(e), st));
                }
                continue;
            }

            match st.body.next().await {
                Some(Ok(bytes)) => st.buffer.extend_from_slice(bytes.as_ref()),
                Some(Err(e)) => {
                    st.finished = true;
                    return Some((
                        Err(AgentError::Stream {
                            message: format!("stream read error: {e}"),
                        }),
                        st,
                    ));
                }
                None => {
                    let rest = std::mem::take(&mut st.buffer);
                    st.finished = true;
                    if !rest.iter().all(u8::is_ascii_whitespace) {
                        if let Err(e) = st.apply(&rest) {
                            return Some((Err(e), st));
                        }
                    }
                }
            }
        }
    }))
}

fn into_stream(kinds: Vec<EventKind>) -> EventStream {
    let events: Vec<Result<Event, AgentError>> = kinds
        .into_iter()
        .enumerate()
        .map(|(seq, kind)| Ok(Event::new(seq, kind)))
        .collect();
    Box::pin(stream::iter(events))
}

#[async_trait]
impl LlmProvider for VllmProvider {
    fn name(&self) -> &'static str {
        "vllm"
    }

    async fn probe_health(&self) -> HealthStatus {
        let result = self
            .authorized(self.http.get(&self.health_url))
            .timeout(self.health_timeout)
            .send()
            .await;

        match result {
            Ok(resp) if resp.status().is_success() => HealthStatus::Healthy,
            Ok(resp) => HealthStatus::Unreachable {
                reason: format!("HTTP {}", resp.status().as_u16()),
            },
            Err(e) => HealthStatus::Unreachable {
                reason: e.to_string(),
            },
        }
    }

    async fn send_turn(
        &self,
        request: &TurnRequest<'_>,
        streaming: bool,
    ) -> Result<EventStream, AgentError> {
        let url = format!("{}/responses", self.base_url);
        let body = request_body(request, streaming);
        info!(
            model = request.model,
            streaming,
            entries = request.conversation.len(),
            tools = request.tools.len(),
            "sending turn"
        );

        let response = self.post_with_retry(&url, &body, streaming).await?;

        if streaming {
            return Ok(sse_events(response.bytes_stream()));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| AgentError::ResponseParse {
                message: e.to_string(),
            })?;
        let kinds = parse_response(&body)?;
        if kinds.is_empty() {
            warn!("response contained no output items");
        }
        Ok(into_stream(kinds))
    }

    async fn list_models(&self) -> Result<Vec<String>, AgentError> {
        let url = format!("{}/models", self.base_url);
        let response = retry(&self.retry, &url, |_| {
            let builder = self.authorized(self.http.get(&url)).timeout(self.timeout);
            async move {
                let response = builder.send().await.map_err(classify_send_error)?;
                check_status(response).await
            }
        })
        .await?;

        let body: Value = response
            .json()
            .await
            .map_err(|e| AgentError::ResponseParse {
                message: e.to_string(),
            })?;
        Ok(body
            .get("data")
            .and_then(Value::as_array)
            .map(|models| {
                models
                    .iter()
                    .filter_map(|m| m.get("id").and_then(Value::as_str).map(String::from))
                    .collect()
            })
            .unwrap_or_default())
    }
}
