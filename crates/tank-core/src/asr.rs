//! Speech-to-text seam.
//!
//! The recognizer is a process-wide singleton shared across sessions; calls
//! may block and must be dispatched through the blocking pool by the caller.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::audio::Utterance;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Zh,
    En,
    Unknown,
}

impl Language {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Zh => "zh",
            Self::En => "en",
            Self::Unknown => "unknown",
        }
    }

    /// Parse an ISO-ish language code. Region suffixes ("zh-CN") are accepted.
    pub fn from_code(code: &str) -> Self {
        let code = code.trim().to_ascii_lowercase();
        if code.starts_with("zh") {
            Self::Zh
        } else if code.starts_with("en") {
            Self::En
        } else {
            Self::Unknown
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transcript {
    pub text: String,
    pub language: Language,
    pub confidence: f32,
    pub is_final: bool,
}

impl Transcript {
    pub fn final_text(text: impl Into<String>, language: Language, confidence: f32) -> Self {
        Self {
            text: text.into(),
            language,
            confidence,
            is_final: true,
        }
    }
}

#[derive(Debug, Error)]
pub enum TranscriptError {
    #[error("ASR engine failure: {0}")]
    Engine(String),
    #[error("ASR engine is not available: {0}")]
    Unavailable(String),
}

/// Utterance-level speech recognizer. Implementations own their model state
/// and must be safe to call concurrently from multiple sessions.
pub trait SpeechRecognizer: Send + Sync {
    fn transcribe(&self, utterance: &Utterance) -> Result<Transcript, TranscriptError>;
}
