use async_trait::async_trait;
use serde_json::Value;

use crate::errors::{AgentError, Result};
use crate::tools::{string_arg_schema, Tool};

/// Placeholder weather lookup; answers with a canned report until a real
/// provider is wired in.
#[derive(Debug, Clone, Copy, Default)]
pub struct WeatherTool;

#[async_trait]
impl Tool for WeatherTool {
    fn name(&self) -> &'static str {
        "get_weather"
    }

    fn description(&self) -> &'static str {
        "Get current weather information for a location"
    }

    fn parameters_schema(&self) -> Value {
        string_arg_schema(
            "location",
            "The location to get weather for (e.g., 'New York', 'Beijing')",
        )
    }

    async fn invoke(&self, args: Value) -> Result<String> {
        let location = args
            .get("location")
            .and_then(Value::as_str)
            .ok_or_else(|| AgentError::Tool("`location` must be a string".to_string()))?;
        Ok(format!(
            "The weather in {location} is sunny with a temperature of 22°C"
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn echoes_the_requested_location() {
        let out = WeatherTool
            .invoke(json!({"location": "Beijing"}))
            .await
            .unwrap();
        assert!(out.contains("Beijing"));
    }
}
