pub mod asr;
pub mod audio;
pub mod config;
pub mod error;

pub use asr::{Language, SpeechRecognizer, Transcript, TranscriptError};
pub use audio::ingest::{AudioIngest, FrameQueue};
pub use audio::segmenter::{
    EnergyVad, SegmenterConfig, SegmenterEvent, UtteranceSegmenter, VoiceActivityDetector,
};
pub use audio::{AudioChunk, AudioFrame, Utterance};
pub use config::AssistantConfig;
pub use error::{CoreError, Result};
