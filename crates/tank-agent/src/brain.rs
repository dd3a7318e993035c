//! The reasoning-with-tools loop.
//!
//! One `Brain` per session drives the streaming LLM, accumulates partial
//! tool calls, runs tools in declaration order, and emits `BrainUpdate`s in
//! causal order. Every await observes the turn's cancellation token.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use tank_core::{AssistantConfig, Language};

use crate::errors::{AgentError, Result};
use crate::history::{ConversationHistory, HistoryItem};
use crate::llm::{ChatBackend, ChatRequest, LlmEvent};
use crate::tools::{validate_args, ToolRegistry};

/// Soft minimum characters per speakable chunk.
pub const TTS_MIN_CHUNK_CHARS: usize = 40;

const EXHAUSTED_REPLY: &str = "I was unable to complete that in the allotted steps.";
const SERVICE_UNAVAILABLE_REPLY: &str = "服务暂时不可用 / Service temporarily unavailable";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolStatus {
    Ok,
    Error,
}

impl ToolStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Error => "error",
        }
    }
}

/// One streamed update from the Brain. `msg_id` is stable for a whole
/// assistant reply; `turn` increments per reasoning iteration.
#[derive(Debug, Clone, PartialEq)]
pub struct BrainUpdate {
    pub msg_id: String,
    pub turn: u32,
    pub kind: UpdateKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum UpdateKind {
    Thought { delta: String },
    TextDelta { delta: String },
    ToolCallStart { index: usize, name: String, arguments: String },
    ToolCallArgsDelta { index: usize, delta: String },
    ToolCallEnd { index: usize, status: ToolStatus },
    ToolResult { index: usize, name: String, content: String, status: ToolStatus },
    Error { message: String },
    TurnEnd,
}

/// One chunk of assistant text queued for synthesis.
#[derive(Debug, Clone, PartialEq)]
pub struct TtsRequest {
    pub text: String,
    pub language: Language,
    pub voice_hint: Option<String>,
    pub msg_id: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TurnOutcome {
    pub msg_id: String,
    /// Final assistant text worth speaking; empty when there is nothing to
    /// synthesize (error fallbacks, silent turns).
    pub reply_text: String,
    pub language: Language,
}

#[derive(Debug, Clone)]
pub struct BrainConfig {
    pub system_prompt: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub max_history_items: usize,
    pub max_tool_iterations: usize,
    pub tool_timeout: Duration,
    pub llm_inactivity_timeout: Duration,
    pub default_language: Language,
}

impl BrainConfig {
    pub fn from_assistant(cfg: &AssistantConfig) -> Self {
        Self {
            system_prompt: cfg.system_prompt.clone(),
            temperature: cfg.llm_temperature,
            max_tokens: cfg.llm_max_tokens,
            max_history_items: cfg.max_conversation_history,
            max_tool_iterations: cfg.max_tool_iterations,
            tool_timeout: Duration::from_secs(cfg.tool_timeout_s),
            llm_inactivity_timeout: Duration::from_secs(cfg.llm_inactivity_timeout_s),
            default_language: cfg.fallback_language(),
        }
    }
}

impl Default for BrainConfig {
    fn default() -> Self {
        Self {
            system_prompt: "You are a helpful voice assistant.".to_string(),
            temperature: 0.7,
            max_tokens: 2000,
            max_history_items: 20,
            max_tool_iterations: 5,
            tool_timeout: Duration::from_secs(30),
            llm_inactivity_timeout: Duration::from_secs(60),
            default_language: Language::Zh,
        }
    }
}

#[derive(Debug, Default, Clone)]
struct PendingToolCall {
    id: String,
    name: String,
    arguments: String,
    announced: bool,
}

enum TurnStep {
    Reply(String),
    ToolsUsed,
}

pub struct Brain {
    backend: Arc<dyn ChatBackend>,
    tools: Arc<ToolRegistry>,
    cfg: BrainConfig,
    history: ConversationHistory,
}

impl Brain {
    pub fn new(backend: Arc<dyn ChatBackend>, tools: Arc<ToolRegistry>, cfg: BrainConfig) -> Self {
        let history = ConversationHistory::new(cfg.max_history_items);
        Self {
            backend,
            tools,
            cfg,
            history,
        }
    }

    pub fn history(&self) -> &ConversationHistory {
        &self.history
    }

    /// Language for the reply's voice: last user turn, then configured
    /// fallback.
    pub fn reply_language(&self) -> Language {
        self.history
            .last_user_language()
            .filter(|l| *l != Language::Unknown)
            .unwrap_or(self.cfg.default_language)
    }

    /// Run one full assistant reply for the given user input. Updates are
    /// emitted in causal order onto `updates`; the outcome carries the text
    /// to hand to TTS.
    ///
    /// On interruption the history is rolled back past any tool call that
    /// never received its result, and `AgentError::Interrupted` is returned.
    pub async fn run_turn(
        &mut self,
        text: &str,
        language: Language,
        updates: &mpsc::Sender<BrainUpdate>,
        cancel: &CancellationToken,
    ) -> Result<TurnOutcome> {
        let text = text.trim();
        if text.is_empty() {
            return Err(AgentError::InvalidInput("input text is empty".to_string()));
        }

        self.history.push(HistoryItem::User {
            text: text.to_string(),
            language,
        });
        let msg_id = format!("assistant_{}", Uuid::new_v4().simple());
        info!(%msg_id, "brain turn started");

        let mut turn: u32 = 0;
        let outcome = loop {
            match self.one_turn(&msg_id, turn, updates, cancel).await {
                Ok(TurnStep::Reply(reply)) => break Ok(reply),
                Ok(TurnStep::ToolsUsed) => {
                    turn += 1;
                    if turn as usize >= self.cfg.max_tool_iterations {
                        warn!(%msg_id, turn, "tool iteration budget exhausted");
                        self.history.push(HistoryItem::Assistant {
                            text: EXHAUSTED_REPLY.to_string(),
                        });
                        self.send(updates, cancel, &msg_id, turn, UpdateKind::TextDelta {
                            delta: EXHAUSTED_REPLY.to_string(),
                        })
                        .await?;
                        break Ok(EXHAUSTED_REPLY.to_string());
                    }
                }
                Err(e) => break Err(e),
            }
        };

        match outcome {
            Ok(reply) => {
                self.send(updates, cancel, &msg_id, turn, UpdateKind::TurnEnd).await?;
                info!(%msg_id, turns = turn + 1, "brain turn complete");
                Ok(TurnOutcome {
                    msg_id,
                    reply_text: reply,
                    language: self.reply_language(),
                })
            }
            Err(AgentError::Interrupted) => {
                self.history.truncate_dangling_tool_calls();
                info!(%msg_id, "brain turn interrupted");
                Err(AgentError::Interrupted)
            }
            Err(err @ (AgentError::Model(_) | AgentError::ModelTimeout(_))) => {
                // Recoverable mid-turn failure: report it, close the turn
                // with the bilingual fallback, keep the session alive.
                warn!(%msg_id, error = %err, "LLM failed mid-turn");
                self.history.truncate_dangling_tool_calls();
                self.history.push(HistoryItem::Assistant {
                    text: SERVICE_UNAVAILABLE_REPLY.to_string(),
                });
                self.send(updates, cancel, &msg_id, turn, UpdateKind::Error {
                    message: err.to_string(),
                })
                .await?;
                self.send(updates, cancel, &msg_id, turn, UpdateKind::TextDelta {
                    delta: SERVICE_UNAVAILABLE_REPLY.to_string(),
                })
                .await?;
                self.send(updates, cancel, &msg_id, turn, UpdateKind::TurnEnd).await?;
                Ok(TurnOutcome {
                    msg_id,
                    reply_text: String::new(),
                    language: self.reply_language(),
                })
            }
            Err(other) => Err(other),
        }
    }

    async fn one_turn(
        &mut self,
        msg_id: &str,
        turn: u32,
        updates: &mpsc::Sender<BrainUpdate>,
        cancel: &CancellationToken,
    ) -> Result<TurnStep> {
        let request = ChatRequest {
            system_prompt: self.cfg.system_prompt.clone(),
            history: self.history.snapshot(),
            tools: self.tools.specs(),
            temperature: self.cfg.temperature,
            max_tokens: self.cfg.max_tokens,
        };
        let mut stream = tokio::select! {
            _ = cancel.cancelled() => return Err(AgentError::Interrupted),
            started = self.backend.stream_chat(request) => started?,
        };

        let mut text = String::new();
        let mut calls: Vec<PendingToolCall> = Vec::new();

        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => return Err(AgentError::Interrupted),
                next = timeout(self.cfg.llm_inactivity_timeout, stream.next()) => match next {
                    Err(_) => {
                        return Err(AgentError::ModelTimeout(
                            self.cfg.llm_inactivity_timeout.as_secs(),
                        ))
                    }
                    Ok(None) => break,
                    Ok(Some(Err(e))) => return Err(e),
                    Ok(Some(Ok(event))) => event,
                },
            };

            match event {
                LlmEvent::ThoughtDelta(delta) => {
                    self.send(updates, cancel, msg_id, turn, UpdateKind::Thought { delta })
                        .await?;
                }
                LlmEvent::TextDelta(delta) => {
                    text.push_str(&delta);
                    self.send(updates, cancel, msg_id, turn, UpdateKind::TextDelta { delta })
                        .await?;
                }
                LlmEvent::ToolCallDelta {
                    index,
                    id,
                    name,
                    arguments,
                } => {
                    while calls.len() <= index {
                        calls.push(PendingToolCall::default());
                    }
                    let call = &mut calls[index];
                    if let Some(id) = id {
                        call.id = id;
                    }
                    if let Some(name) = name {
                        call.name.push_str(&name);
                    }
                    call.arguments.push_str(&arguments);

                    if !call.announced {
                        call.announced = true;
                        let kind = UpdateKind::ToolCallStart {
                            index,
                            name: call.name.clone(),
                            arguments: call.arguments.clone(),
                        };
                        self.send(updates, cancel, msg_id, turn, kind).await?;
                    } else if !arguments.is_empty() {
                        let kind = UpdateKind::ToolCallArgsDelta {
                            index,
                            delta: arguments,
                        };
                        self.send(updates, cancel, msg_id, turn, kind).await?;
                    }
                }
                LlmEvent::Done => break,
            }
        }

        if calls.is_empty() {
            self.history.push(HistoryItem::Assistant { text: text.clone() });
            return Ok(TurnStep::Reply(text));
        }

        self.history.push(HistoryItem::Assistant { text });
        for (index, call) in calls.iter_mut().enumerate() {
            if call.id.is_empty() {
                call.id = format!("call_{}", Uuid::new_v4().simple());
            }
            self.send(updates, cancel, msg_id, turn, UpdateKind::ToolCallEnd {
                index,
                status: ToolStatus::Ok,
            })
            .await?;
            self.history.push(HistoryItem::ToolCall {
                id: call.id.clone(),
                name: call.name.clone(),
                arguments: call.arguments.clone(),
            });
        }

        for (index, call) in calls.iter().enumerate() {
            let (content, status) = self.invoke_tool(call, cancel).await?;
            self.send(updates, cancel, msg_id, turn, UpdateKind::ToolResult {
                index,
                name: call.name.clone(),
                content: content.clone(),
                status,
            })
            .await?;
            self.history.push(HistoryItem::ToolResult {
                id: call.id.clone(),
                content,
            });
        }

        Ok(TurnStep::ToolsUsed)
    }

    /// Run one tool call. Tool-level failures (bad JSON, unknown tool,
    /// schema violation, timeout, invocation error) become error results and
    /// never abort the turn; only interruption propagates as `Err`.
    async fn invoke_tool(
        &self,
        call: &PendingToolCall,
        cancel: &CancellationToken,
    ) -> Result<(String, ToolStatus)> {
        let raw_args = if call.arguments.trim().is_empty() {
            "{}"
        } else {
            call.arguments.as_str()
        };
        let args: Value = match serde_json::from_str(raw_args) {
            Ok(value) => value,
            Err(e) => {
                return Ok((
                    format!("Error: tool `{}` received invalid arguments JSON: {e}", call.name),
                    ToolStatus::Error,
                ))
            }
        };

        let Some(tool) = self.tools.get(&call.name) else {
            return Ok((
                format!("Error: unknown tool `{}`", call.name),
                ToolStatus::Error,
            ));
        };

        if let Err(reason) = validate_args(&tool.parameters_schema(), &args) {
            return Ok((
                format!("Error: invalid arguments for `{}`: {reason}", call.name),
                ToolStatus::Error,
            ));
        }

        info!(tool = %call.name, "invoking tool");
        tokio::select! {
            _ = cancel.cancelled() => Err(AgentError::Interrupted),
            finished = timeout(self.cfg.tool_timeout, tool.invoke(args)) => match finished {
                Err(_) => Ok((
                    format!(
                        "Error: tool `{}` timed out after {}s",
                        call.name,
                        self.cfg.tool_timeout.as_secs()
                    ),
                    ToolStatus::Error,
                )),
                Ok(Ok(content)) => Ok((content, ToolStatus::Ok)),
                Ok(Err(e)) => Ok((format!("Error: {e}"), ToolStatus::Error)),
            },
        }
    }

    async fn send(
        &self,
        updates: &mpsc::Sender<BrainUpdate>,
        cancel: &CancellationToken,
        msg_id: &str,
        turn: u32,
        kind: UpdateKind,
    ) -> Result<()> {
        let update = BrainUpdate {
            msg_id: msg_id.to_string(),
            turn,
            kind,
        };
        tokio::select! {
            _ = cancel.cancelled() => Err(AgentError::Interrupted),
            sent = updates.send(update) => sent.map_err(|_| AgentError::UpdatesClosed),
        }
    }
}

/// Split assistant text into speakable chunks on sentence boundaries, with
/// a soft minimum length to balance first-byte latency against prosody.
pub fn split_speakable_chunks(text: &str, min_chars: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_chars = 0usize;

    for ch in text.chars() {
        current.push(ch);
        current_chars += 1;
        let boundary = matches!(ch, '.' | '!' | '?' | '。' | '！' | '？');
        if boundary && current_chars >= min_chars {
            let chunk = current.trim();
            if !chunk.is_empty() {
                chunks.push(chunk.to_string());
            }
            current.clear();
            current_chars = 0;
        }
    }

    let tail = current.trim();
    if !tail.is_empty() {
        chunks.push(tail.to_string());
    }
    chunks
}
