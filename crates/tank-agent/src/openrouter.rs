//! OpenAI-compatible streaming chat client (OpenRouter by default).
//!
//! Server-sent events are parsed line-by-line and forwarded as `LlmEvent`s
//! through a channel; dropping the returned stream stops the pump task and
//! with it the HTTP request.

use std::pin::Pin;
use std::task::{Context, Poll};

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::errors::{AgentError, Result};
use crate::history::HistoryItem;
use crate::llm::{ChatBackend, ChatRequest, EventStream, LlmEvent};

pub struct OpenRouterChat {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl OpenRouterChat {
    pub fn new(http: reqwest::Client, api_key: String, base_url: String, model: String) -> Self {
        Self {
            http,
            api_key,
            base_url,
            model,
        }
    }
}

#[async_trait]
impl ChatBackend for OpenRouterChat {
    async fn stream_chat(&self, request: ChatRequest) -> Result<EventStream> {
        let body = build_body(&self.model, &request);
        let url = format!(
            "{}/chat/completions",
            self.base_url.trim_end_matches('/')
        );
        debug!(model = %self.model, messages = request.history.len() + 1, "LLM stream request");

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .header("HTTP-Referer", "http://localhost:3000")
            .header("X-Title", "Tank Voice Assistant")
            .json(&body)
            .send()
            .await
            .map_err(|e| AgentError::Model(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(AgentError::Model(format!(
                "LLM endpoint returned {status}: {}",
                detail.chars().take(300).collect::<String>()
            )));
        }

        let (tx, rx) = mpsc::channel(32);
        tokio::spawn(pump_sse(response, tx));
        Ok(Box::pin(ChannelStream(rx)))
    }
}

struct ChannelStream(mpsc::Receiver<Result<LlmEvent>>);

impl Stream for ChannelStream {
    type Item = Result<LlmEvent>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.0.poll_recv(cx)
    }
}

async fn pump_sse(response: reqwest::Response, tx: mpsc::Sender<Result<LlmEvent>>) {
    let mut body = response.bytes_stream();
    let mut buffer: Vec<u8> = Vec::new();

    while let Some(chunk) = body.next().await {
        let bytes = match chunk {
            Ok(bytes) => bytes,
            Err(e) => {
                let _ = tx
                    .send(Err(AgentError::Model(format!("stream read failed: {e}"))))
                    .await;
                return;
            }
        };
        buffer.extend_from_slice(&bytes);

        while let Some(pos) = buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            match parse_sse_line(line.trim_end_matches(['\n', '\r'])) {
                SseLine::Done => {
                    let _ = tx.send(Ok(LlmEvent::Done)).await;
                    return;
                }
                SseLine::Events(events) => {
                    for event in events {
                        if tx.send(Ok(event)).await.is_err() {
                            // consumer dropped the stream; stop pulling
                            return;
                        }
                    }
                }
                SseLine::Skip => {}
            }
        }
    }

    // Upstream closed without an explicit terminator.
    let _ = tx.send(Ok(LlmEvent::Done)).await;
}

enum SseLine {
    Done,
    Events(Vec<LlmEvent>),
    Skip,
}

fn parse_sse_line(line: &str) -> SseLine {
    let line = line.trim();
    if line.is_empty() || line.starts_with(':') {
        return SseLine::Skip;
    }
    let Some(payload) = line.strip_prefix("data:") else {
        return SseLine::Skip;
    };
    let payload = payload.trim();
    if payload == "[DONE]" {
        return SseLine::Done;
    }
    match serde_json::from_str::<Value>(payload) {
        Ok(value) => SseLine::Events(events_from_chunk(&value)),
        Err(e) => {
            warn!("dropping unparseable SSE payload: {e}");
            SseLine::Skip
        }
    }
}

fn events_from_chunk(value: &Value) -> Vec<LlmEvent> {
    let mut events = Vec::new();
    let Some(delta) = value
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("delta"))
    else {
        return events;
    };

    let reasoning = delta
        .get("reasoning_content")
        .or_else(|| delta.get("reasoning"))
        .and_then(Value::as_str);
    if let Some(text) = reasoning {
        if !text.is_empty() {
            events.push(LlmEvent::ThoughtDelta(text.to_string()));
        }
    }

    if let Some(content) = delta.get("content").and_then(Value::as_str) {
        if !content.is_empty() {
            events.push(LlmEvent::TextDelta(content.to_string()));
        }
    }

    if let Some(calls) = delta.get("tool_calls").and_then(Value::as_array) {
        for call in calls {
            let index = call.get("index").and_then(Value::as_u64).unwrap_or(0) as usize;
            let id = call
                .get("id")
                .and_then(Value::as_str)
                .map(str::to_string);
            let function = call.get("function");
            let name = function
                .and_then(|f| f.get("name"))
                .and_then(Value::as_str)
                .map(str::to_string);
            let arguments = function
                .and_then(|f| f.get("arguments"))
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            events.push(LlmEvent::ToolCallDelta {
                index,
                id,
                name,
                arguments,
            });
        }
    }

    events
}

fn build_body(model: &str, request: &ChatRequest) -> Value {
    let mut messages = vec![json!({
        "role": "system",
        "content": request.system_prompt,
    })];

    for item in &request.history {
        match item {
            HistoryItem::User { text, .. } => {
                messages.push(json!({ "role": "user", "content": text }));
            }
            HistoryItem::Assistant { text } => {
                messages.push(json!({ "role": "assistant", "content": text }));
            }
            HistoryItem::ToolCall { id, name, arguments } => {
                let call = json!({
                    "id": id,
                    "type": "function",
                    "function": { "name": name, "arguments": arguments },
                });
                // Tool calls belong to the assistant message that produced
                // them; fold consecutive calls into the same message.
                let attach_to_last = matches!(
                    messages.last().and_then(|m| m.get("role")).and_then(Value::as_str),
                    Some("assistant")
                );
                if attach_to_last {
                    let last = messages.last_mut().expect("non-empty");
                    match last.get_mut("tool_calls").and_then(Value::as_array_mut) {
                        Some(calls) => calls.push(call),
                        None => {
                            last["tool_calls"] = json!([call]);
                        }
                    }
                } else {
                    messages.push(json!({
                        "role": "assistant",
                        "content": "",
                        "tool_calls": [call],
                    }));
                }
            }
            HistoryItem::ToolResult { id, content } => {
                messages.push(json!({
                    "role": "tool",
                    "tool_call_id": id,
                    "content": content,
                }));
            }
        }
    }

    let mut body = json!({
        "model": model,
        "messages": messages,
        "temperature": request.temperature,
        "max_tokens": request.max_tokens,
        "stream": true,
        "stream_options": { "include_usage": true },
    });

    if !request.tools.is_empty() {
        let tools: Vec<Value> = request
            .tools
            .iter()
            .map(|spec| {
                json!({
                    "type": "function",
                    "function": {
                        "name": spec.name,
                        "description": spec.description,
                        "parameters": spec.parameters,
                    },
                })
            })
            .collect();
        body["tools"] = Value::Array(tools);
    }

    body
}
