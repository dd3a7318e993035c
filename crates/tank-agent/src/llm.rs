//! Streaming LLM seam.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use crate::errors::Result;
use crate::history::HistoryItem;
use crate::tools::ToolSpec;

#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub system_prompt: String,
    pub history: Vec<HistoryItem>,
    pub tools: Vec<ToolSpec>,
    pub temperature: f32,
    pub max_tokens: u32,
}

/// One event from the model's response stream.
///
/// Tool-call arguments arrive in fragments; the consumer accumulates them
/// per `index` until the stream completes.
#[derive(Debug, Clone, PartialEq)]
pub enum LlmEvent {
    ThoughtDelta(String),
    TextDelta(String),
    ToolCallDelta {
        index: usize,
        id: Option<String>,
        name: Option<String>,
        arguments: String,
    },
    Done,
}

pub type EventStream = Pin<Box<dyn Stream<Item = Result<LlmEvent>> + Send>>;

/// Streaming chat backend. Dropping the returned stream terminates the
/// underlying request.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn stream_chat(&self, request: ChatRequest) -> Result<EventStream>;
}
