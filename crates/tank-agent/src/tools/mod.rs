//! Callable tools exposed to the model.

mod calculator;
mod clock;
mod scraper;
mod weather;
mod web_search;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::info;

use crate::errors::Result;

pub use calculator::CalculatorTool;
pub use clock::ClockTool;
pub use scraper::FetchWebpageTool;
pub use weather::WeatherTool;
pub use web_search::WebSearchTool;

/// Tool description as advertised to the LLM.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// JSON-Schema-shaped object: `{type: object, properties, required}`.
    pub parameters: Value,
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str;

    fn parameters_schema(&self) -> Value;

    async fn invoke(&self, args: Value) -> Result<String>;
}

#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: Vec::new() }
    }

    pub fn register<T>(&mut self, tool: T)
    where
        T: Tool + 'static,
    {
        info!(name = tool.name(), "registered tool");
        self.tools.push(Arc::new(tool));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.iter().find(|tool| tool.name() == name).cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn specs(&self) -> Vec<ToolSpec> {
        self.tools
            .iter()
            .map(|tool| ToolSpec {
                name: tool.name().to_string(),
                description: tool.description().to_string(),
                parameters: tool.parameters_schema(),
            })
            .collect()
    }
}

/// Check arguments against a `{type: object, properties, required}` schema.
/// Returns a human-readable description of the first violation.
pub fn validate_args(schema: &Value, args: &Value) -> std::result::Result<(), String> {
    let Some(args_obj) = args.as_object() else {
        return Err("arguments must be a JSON object".to_string());
    };

    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for name in required.iter().filter_map(Value::as_str) {
            if !args_obj.contains_key(name) {
                return Err(format!("missing required argument `{name}`"));
            }
        }
    }

    let Some(properties) = schema.get("properties").and_then(Value::as_object) else {
        return Ok(());
    };
    for (name, value) in args_obj {
        let Some(expected) = properties.get(name).and_then(|p| p.get("type")).and_then(Value::as_str)
        else {
            continue;
        };
        let ok = match expected {
            "string" => value.is_string(),
            "number" => value.is_number(),
            "integer" => value.is_i64() || value.is_u64(),
            "boolean" => value.is_boolean(),
            "array" => value.is_array(),
            "object" => value.is_object(),
            _ => true,
        };
        if !ok {
            return Err(format!("argument `{name}` must be of type {expected}"));
        }
    }
    Ok(())
}

/// Schema helper for single-string-argument tools.
pub(crate) fn string_arg_schema(name: &str, description: &str) -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            name: { "type": "string", "description": description }
        },
        "required": [name]
    })
}
