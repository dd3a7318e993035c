pub mod brain;
pub mod errors;
pub mod history;
pub mod llm;
pub mod openrouter;
pub mod tools;

pub use brain::{
    split_speakable_chunks, Brain, BrainConfig, BrainUpdate, ToolStatus, TtsRequest, TurnOutcome,
    UpdateKind, TTS_MIN_CHUNK_CHARS,
};
pub use errors::{AgentError, Result};
pub use history::{ConversationHistory, HistoryItem};
pub use llm::{ChatBackend, ChatRequest, EventStream, LlmEvent};
pub use openrouter::OpenRouterChat;
pub use tools::{
    CalculatorTool, ClockTool, FetchWebpageTool, Tool, ToolRegistry, ToolSpec, WeatherTool,
    WebSearchTool,
};
