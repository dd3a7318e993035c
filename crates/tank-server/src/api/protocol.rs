//! JSON control-frame codec for the `/ws/{session_id}` channel.
//!
//! Binary frames carry raw Int16LE PCM and bypass this module. Unknown JSON
//! fields are ignored; unknown `type` values decode to `ClientFrame::Unknown`
//! so the router can log and drop them without closing the connection.

use serde::{Deserialize, Serialize};
use tank_core::{Transcript, TranscriptError};
use tank_agent::{BrainUpdate, UpdateKind};

/// Inbound control frames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Direct text turn (typed input).
    Input { content: String },
    /// Explicit cancel of the current Brain and TTS work.
    Interrupt,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerFrameKind {
    Signal,
    Transcript,
    Text,
    Update,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FrameMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub update_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub turn: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl FrameMetadata {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Outbound JSON frame: `{type, content, is_final?, metadata?, msg_id?, session_id?}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerFrame {
    #[serde(rename = "type")]
    pub kind: ServerFrameKind,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_final: Option<bool>,
    #[serde(default, skip_serializing_if = "FrameMetadata::is_empty")]
    pub metadata: FrameMetadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl ServerFrame {
    pub fn signal(content: &str) -> Self {
        Self {
            kind: ServerFrameKind::Signal,
            content: content.to_string(),
            is_final: None,
            metadata: FrameMetadata::default(),
            msg_id: None,
            session_id: None,
        }
    }

    pub fn transcript(transcript: &Transcript) -> Self {
        Self {
            kind: ServerFrameKind::Transcript,
            content: transcript.text.clone(),
            is_final: Some(transcript.is_final),
            metadata: FrameMetadata {
                language: Some(transcript.language.as_str().to_string()),
                confidence: Some(transcript.confidence),
                ..FrameMetadata::default()
            },
            msg_id: None,
            session_id: None,
        }
    }

    /// Transcription failure: empty text plus error metadata, per the error
    /// handling contract.
    pub fn transcript_error(error: &TranscriptError) -> Self {
        Self {
            kind: ServerFrameKind::Transcript,
            content: String::new(),
            is_final: Some(true),
            metadata: FrameMetadata {
                status: Some("error".to_string()),
                error: Some(error.to_string()),
                ..FrameMetadata::default()
            },
            msg_id: None,
            session_id: None,
        }
    }

    pub fn from_update(update: BrainUpdate) -> Self {
        let BrainUpdate { msg_id, turn, kind } = update;
        let msg_id = Some(msg_id);
        let turn_meta = |metadata: FrameMetadata| FrameMetadata {
            turn: Some(turn),
            ..metadata
        };
        match kind {
            UpdateKind::TextDelta { delta } => Self {
                kind: ServerFrameKind::Text,
                content: delta,
                is_final: Some(false),
                metadata: turn_meta(FrameMetadata::default()),
                msg_id,
                session_id: None,
            },
            UpdateKind::TurnEnd => Self {
                kind: ServerFrameKind::Text,
                content: String::new(),
                is_final: Some(true),
                metadata: turn_meta(FrameMetadata::default()),
                msg_id,
                session_id: None,
            },
            UpdateKind::Thought { delta } => Self {
                kind: ServerFrameKind::Update,
                content: delta,
                is_final: Some(false),
                metadata: turn_meta(FrameMetadata {
                    update_type: Some("THOUGHT".to_string()),
                    ..FrameMetadata::default()
                }),
                msg_id,
                session_id: None,
            },
            UpdateKind::ToolCallStart { index, name, arguments } => Self {
                kind: ServerFrameKind::Update,
                content: String::new(),
                is_final: Some(false),
                metadata: turn_meta(FrameMetadata {
                    update_type: Some("TOOL_CALL".to_string()),
                    index: Some(index),
                    name: Some(name),
                    arguments: Some(arguments),
                    status: Some("calling".to_string()),
                    ..FrameMetadata::default()
                }),
                msg_id,
                session_id: None,
            },
            UpdateKind::ToolCallArgsDelta { index, delta } => Self {
                kind: ServerFrameKind::Update,
                content: String::new(),
                is_final: Some(false),
                metadata: turn_meta(FrameMetadata {
                    update_type: Some("TOOL_CALL".to_string()),
                    index: Some(index),
                    arguments: Some(delta),
                    status: Some("calling".to_string()),
                    ..FrameMetadata::default()
                }),
                msg_id,
                session_id: None,
            },
            UpdateKind::ToolCallEnd { index, status } => Self {
                kind: ServerFrameKind::Update,
                content: String::new(),
                is_final: Some(false),
                metadata: turn_meta(FrameMetadata {
                    update_type: Some("TOOL_CALL".to_string()),
                    index: Some(index),
                    status: Some(status.as_str().to_string()),
                    ..FrameMetadata::default()
                }),
                msg_id,
                session_id: None,
            },
            UpdateKind::ToolResult { index, name, content, status } => Self {
                kind: ServerFrameKind::Update,
                content,
                is_final: Some(false),
                metadata: turn_meta(FrameMetadata {
                    update_type: Some("TOOL_RESULT".to_string()),
                    index: Some(index),
                    name: Some(name),
                    status: Some(status.as_str().to_string()),
                    ..FrameMetadata::default()
                }),
                msg_id,
                session_id: None,
            },
            UpdateKind::Error { message } => Self {
                kind: ServerFrameKind::Update,
                content: message,
                is_final: Some(true),
                metadata: turn_meta(FrameMetadata {
                    update_type: Some("ERROR".to_string()),
                    status: Some("error".to_string()),
                    ..FrameMetadata::default()
                }),
                msg_id,
                session_id: None,
            },
        }
    }
}

/// Everything the session writes toward the client, in emission order.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundFrame {
    Text(ServerFrame),
    /// Int16LE mono PCM at the configured output rate.
    Binary(Vec<u8>),
    /// WebSocket pong payload, echoed by the writer task.
    Pong(Vec<u8>),
}
