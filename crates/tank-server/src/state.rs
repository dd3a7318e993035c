//! Application state: process-wide singleton adapters shared by every
//! session through dependency injection.

use std::sync::Arc;

use tracing::{info, warn};

use tank_agent::{
    CalculatorTool, ChatBackend, ClockTool, FetchWebpageTool, OpenRouterChat, ToolRegistry,
    WeatherTool, WebSearchTool,
};
use tank_core::{AssistantConfig, EnergyVad, SpeechRecognizer};

use crate::asr::UnboundRecognizer;
use crate::session::SessionDeps;
use crate::tts::{edge::EdgeSpeech, SpeechSynthesizer};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AssistantConfig>,
    pub http: reqwest::Client,
    pub asr: Arc<dyn SpeechRecognizer>,
    pub llm: Arc<dyn ChatBackend>,
    pub tts: Arc<dyn SpeechSynthesizer>,
    pub tools: Arc<ToolRegistry>,
}

impl AppState {
    pub fn new(config: AssistantConfig) -> Self {
        let config = Arc::new(config);
        let http = reqwest::Client::new();

        let llm: Arc<dyn ChatBackend> = Arc::new(OpenRouterChat::new(
            http.clone(),
            config.llm_api_key.clone(),
            config.llm_base_url.clone(),
            config.llm_model.clone(),
        ));
        let tts: Arc<dyn SpeechSynthesizer> = Arc::new(EdgeSpeech);

        let asr: Arc<dyn SpeechRecognizer> =
            Arc::new(UnboundRecognizer::new(config.asr_engine.clone()));
        warn!(
            engine = %config.asr_engine,
            "no ASR engine binding in this build; voice input will report transcription errors"
        );

        let mut tools = ToolRegistry::new();
        tools.register(ClockTool);
        tools.register(CalculatorTool);
        tools.register(WeatherTool);
        tools.register(FetchWebpageTool::new(http.clone()));
        match config.serper_api_key.as_deref().filter(|k| !k.is_empty()) {
            Some(key) => tools.register(WebSearchTool::new(http.clone(), key.to_string())),
            None => info!("serper_api_key not configured; web_search tool not registered"),
        }

        Self {
            config,
            http,
            asr,
            llm,
            tts,
            tools: Arc::new(tools),
        }
    }

    /// Collaborators for one new session. The voice-activity detector is
    /// per-session state; everything else is shared.
    pub fn session_deps(&self) -> SessionDeps {
        SessionDeps {
            config: Arc::clone(&self.config),
            asr: Arc::clone(&self.asr),
            llm: Arc::clone(&self.llm),
            tts: Arc::clone(&self.tts),
            tools: Arc::clone(&self.tools),
            vad: Box::new(EnergyVad::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn web_search_registration_is_gated_on_credentials() {
        let state = AppState::new(AssistantConfig {
            llm_api_key: "sk-test".to_string(),
            ..AssistantConfig::default()
        });
        assert!(state.tools.get("get_time").is_some());
        assert!(state.tools.get("calculate").is_some());
        assert!(state.tools.get("get_weather").is_some());
        assert!(state.tools.get("fetch_webpage").is_some());
        assert!(state.tools.get("web_search").is_none());

        let state = AppState::new(AssistantConfig {
            llm_api_key: "sk-test".to_string(),
            serper_api_key: Some("serper-key".to_string()),
            ..AssistantConfig::default()
        });
        assert!(state.tools.get("web_search").is_some());
    }
}
