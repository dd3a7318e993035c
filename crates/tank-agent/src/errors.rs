use thiserror::Error;

pub type Result<T> = std::result::Result<T, AgentError>;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("LLM error: {0}")]
    Model(String),
    #[error("LLM stream produced no event within {0}s")]
    ModelTimeout(u64),
    #[error("Tool error: {0}")]
    Tool(String),
    #[error("Interrupted")]
    Interrupted,
    #[error("Update channel closed")]
    UpdatesClosed,
}
