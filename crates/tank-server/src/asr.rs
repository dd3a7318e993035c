//! Server-side ASR seam.
//!
//! The recognizer engine itself is a deployment concern bound at startup;
//! sessions only see the `SpeechRecognizer` trait. Until an engine binding
//! is configured, transcription requests surface as error transcripts
//! instead of tearing the session down.

use tank_core::{SpeechRecognizer, Transcript, TranscriptError, Utterance};

/// Stand-in recognizer for deployments without an ASR engine binding.
/// Every utterance is answered with `TranscriptError::Unavailable`, which
/// the session turns into an empty transcript frame with error metadata.
pub struct UnboundRecognizer {
    engine: String,
}

impl UnboundRecognizer {
    pub fn new(engine: impl Into<String>) -> Self {
        Self {
            engine: engine.into(),
        }
    }
}

impl SpeechRecognizer for UnboundRecognizer {
    fn transcribe(&self, _utterance: &Utterance) -> Result<Transcript, TranscriptError> {
        Err(TranscriptError::Unavailable(format!(
            "ASR engine '{}' has no binding in this build",
            self.engine
        )))
    }
}
