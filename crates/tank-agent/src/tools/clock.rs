use async_trait::async_trait;
use chrono::Local;
use serde_json::{json, Value};

use crate::errors::Result;
use crate::tools::Tool;

#[derive(Debug, Clone, Copy, Default)]
pub struct ClockTool;

#[async_trait]
impl Tool for ClockTool {
    fn name(&self) -> &'static str {
        "get_time"
    }

    fn description(&self) -> &'static str {
        "Get current time and date"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {},
            "required": []
        })
    }

    async fn invoke(&self, _args: Value) -> Result<String> {
        let now = Local::now().format("%Y-%m-%d %H:%M:%S");
        Ok(format!("The current time is {now}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn reports_a_formatted_timestamp() {
        let out = ClockTool.invoke(json!({})).await.unwrap();
        assert!(out.starts_with("The current time is "));
        // YYYY-MM-DD HH:MM:SS
        let stamp = out.trim_start_matches("The current time is ");
        assert_eq!(stamp.len(), 19);
        assert_eq!(&stamp[4..5], "-");
        assert_eq!(&stamp[13..14], ":");
    }
}
