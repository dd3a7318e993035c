//! Assistant configuration: TOML file layered under `TANK_*` environment
//! variables, with defaults matching the reference deployment.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::asr::Language;
use crate::audio::segmenter::SegmenterConfig;
use crate::error::{CoreError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssistantConfig {
    /// Credential for the LLM backend. Required.
    #[serde(default)]
    pub llm_api_key: String,
    #[serde(default = "default_llm_model")]
    pub llm_model: String,
    #[serde(default = "default_llm_base_url")]
    pub llm_base_url: String,
    #[serde(default = "default_llm_temperature")]
    pub llm_temperature: f32,
    #[serde(default = "default_llm_max_tokens")]
    pub llm_max_tokens: u32,

    #[serde(default = "default_asr_engine")]
    pub asr_engine: String,
    #[serde(default = "default_whisper_model_size")]
    pub whisper_model_size: String,

    /// Fallback language when the last user turn carries no usable language.
    #[serde(default = "default_language")]
    pub default_language: String,
    #[serde(default = "default_tts_voice_en")]
    pub tts_voice_en: String,
    #[serde(default = "default_tts_voice_zh")]
    pub tts_voice_zh: String,

    #[serde(default = "default_sample_rate_in")]
    pub sample_rate_in: u32,
    #[serde(default = "default_sample_rate_out")]
    pub sample_rate_out: u32,
    #[serde(default = "default_frame_ms")]
    pub frame_ms: u32,

    #[serde(default = "default_pre_roll_ms")]
    pub pre_roll_ms: u32,
    #[serde(default = "default_min_silence_ms")]
    pub min_silence_ms: u32,
    #[serde(default = "default_min_speech_ms")]
    pub min_speech_ms: u32,
    #[serde(default = "default_max_utterance_ms")]
    pub max_utterance_ms: u32,

    #[serde(default = "default_max_conversation_history")]
    pub max_conversation_history: usize,
    #[serde(default = "default_max_tool_iterations")]
    pub max_tool_iterations: usize,
    #[serde(default = "default_tool_timeout_s")]
    pub tool_timeout_s: u64,
    #[serde(default = "default_llm_inactivity_timeout_s")]
    pub llm_inactivity_timeout_s: u64,
    #[serde(default = "default_tts_chunk_timeout_s")]
    pub tts_chunk_timeout_s: u64,

    #[serde(default = "default_max_frames_queue")]
    pub max_frames_queue: usize,

    /// Enables the web-search tool when present.
    #[serde(default)]
    pub serper_api_key: Option<String>,

    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
}

fn default_llm_model() -> String {
    "anthropic/claude-3-5-nano".to_string()
}

fn default_llm_base_url() -> String {
    "https://openrouter.ai/api/v1".to_string()
}

fn default_llm_temperature() -> f32 {
    0.7
}

fn default_llm_max_tokens() -> u32 {
    2000
}

fn default_asr_engine() -> String {
    "whisper".to_string()
}

fn default_whisper_model_size() -> String {
    "base".to_string()
}

fn default_language() -> String {
    "zh".to_string()
}

fn default_tts_voice_en() -> String {
    "en-US-JennyNeural".to_string()
}

fn default_tts_voice_zh() -> String {
    "zh-CN-XiaoxiaoNeural".to_string()
}

fn default_sample_rate_in() -> u32 {
    16000
}

fn default_sample_rate_out() -> u32 {
    24000
}

fn default_frame_ms() -> u32 {
    20
}

fn default_pre_roll_ms() -> u32 {
    300
}

fn default_min_silence_ms() -> u32 {
    600
}

fn default_min_speech_ms() -> u32 {
    250
}

fn default_max_utterance_ms() -> u32 {
    15000
}

fn default_max_conversation_history() -> usize {
    20
}

fn default_max_tool_iterations() -> usize {
    5
}

fn default_tool_timeout_s() -> u64 {
    30
}

fn default_llm_inactivity_timeout_s() -> u64 {
    60
}

fn default_tts_chunk_timeout_s() -> u64 {
    15
}

fn default_max_frames_queue() -> usize {
    256
}

fn default_system_prompt() -> String {
    "You are a helpful bilingual (Chinese/English) voice assistant. Reply in the \
     language the user spoke. Use concise spoken-friendly language, avoid markdown, \
     and keep responses brief unless asked for details."
        .to_string()
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            llm_api_key: String::new(),
            llm_model: default_llm_model(),
            llm_base_url: default_llm_base_url(),
            llm_temperature: default_llm_temperature(),
            llm_max_tokens: default_llm_max_tokens(),
            asr_engine: default_asr_engine(),
            whisper_model_size: default_whisper_model_size(),
            default_language: default_language(),
            tts_voice_en: default_tts_voice_en(),
            tts_voice_zh: default_tts_voice_zh(),
            sample_rate_in: default_sample_rate_in(),
            sample_rate_out: default_sample_rate_out(),
            frame_ms: default_frame_ms(),
            pre_roll_ms: default_pre_roll_ms(),
            min_silence_ms: default_min_silence_ms(),
            min_speech_ms: default_min_speech_ms(),
            max_utterance_ms: default_max_utterance_ms(),
            max_conversation_history: default_max_conversation_history(),
            max_tool_iterations: default_max_tool_iterations(),
            tool_timeout_s: default_tool_timeout_s(),
            llm_inactivity_timeout_s: default_llm_inactivity_timeout_s(),
            tts_chunk_timeout_s: default_tts_chunk_timeout_s(),
            max_frames_queue: default_max_frames_queue(),
            serper_api_key: None,
            system_prompt: default_system_prompt(),
        }
    }
}

impl AssistantConfig {
    /// Load configuration from an optional TOML file, letting `TANK_*`
    /// environment variables override file values.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }
        let settings = builder
            .add_source(config::Environment::with_prefix("TANK").try_parsing(true))
            .build()
            .map_err(|e| CoreError::Config(e.to_string()))?;

        let cfg: AssistantConfig = settings
            .try_deserialize()
            .map_err(|e| CoreError::Config(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.llm_api_key.trim().is_empty() {
            return Err(CoreError::Config(
                "llm_api_key is required but not set (TANK_LLM_API_KEY)".to_string(),
            ));
        }
        if self.serper_api_key.as_deref().map_or(true, str::is_empty) {
            tracing::warn!("serper_api_key is not set; the web-search tool will be unavailable");
        }
        if self.frame_ms == 0 || self.sample_rate_in == 0 {
            return Err(CoreError::Config(
                "frame_ms and sample_rate_in must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Samples per inbound frame.
    pub fn frame_samples(&self) -> usize {
        (self.sample_rate_in as usize * self.frame_ms as usize) / 1000
    }

    pub fn segmenter(&self) -> SegmenterConfig {
        SegmenterConfig {
            frame_ms: self.frame_ms,
            pre_roll_ms: self.pre_roll_ms,
            min_silence_ms: self.min_silence_ms,
            min_speech_ms: self.min_speech_ms,
            max_utterance_ms: self.max_utterance_ms,
        }
    }

    pub fn fallback_language(&self) -> Language {
        match self.default_language.as_str() {
            "en" => Language::En,
            "zh" => Language::Zh,
            _ => Language::Unknown,
        }
    }

    /// TTS voice for a reply language.
    pub fn voice_for_language(&self, language: Language) -> &str {
        let effective = match language {
            Language::Unknown => self.fallback_language(),
            other => other,
        };
        match effective {
            Language::En => &self.tts_voice_en,
            _ => &self.tts_voice_zh,
        }
    }
}
