//! Tool definitions and dispatch for the log analysis agent.
//!
//! The agent sees one flat tool list: the built-in time tools followed by
//! every tool aggregated from the providers. Calls are routed back to
//! whichever side owns the tool.

use crate::agent::time_tools;
use crate::mcp::ToolDescriptor;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

/// Tool definition for Ollama's tool-calling API.
#[derive(Debug, Clone, Serialize)]
pub struct ToolDefinition {
    #[serde(rename = "type")]
    pub tool_type: String,
    pub function: FunctionDefinition,
}

#[derive(Debug, Clone, Serialize)]
pub struct FunctionDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

impl ToolDefinition {
    fn function(name: &str, description: &str, parameters: Value) -> Self {
        Self {
            tool_type: "function".to_string(),
            function: FunctionDefinition {
                name: name.to_string(),
                description: description.to_string(),
                parameters,
            },
        }
    }
}

/// A tool call made by the LLM.
#[derive(Debug, Clone, Deserialize)]
pub struct ToolCall {
    pub function: FunctionCall,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

/// Result of executing a tool.
#[derive(Debug, Clone, Serialize)]
pub struct ToolResult {
    pub success: bool,
    pub output: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolResult {
    pub fn success(output: String) -> Self {
        Self {
            success: true,
            output,
            error: None,
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            output: String::new(),
            error: Some(message),
        }
    }

    fn json<T: Serialize>(value: &T) -> Self {
        match serde_json::to_string_pretty(value) {
            Ok(text) => Self::success(text),
            Err(e) => Self::error(format!("Failed to encode tool output: {}", e)),
        }
    }

    /// Text handed back to the model as the tool message.
    pub fn into_message(self) -> String {
        if self.success {
            self.output
        } else {
            format!("Error: {}", self.error.unwrap_or_default())
        }
    }
}

/// Names of the tools implemented in-process.
pub const LOCAL_TOOLS: [&str; 4] = [
    "current_time",
    "validate_log_timestamps",
    "format_time_analysis",
    "get_time_filter_suggestion",
];

/// Routes tool calls to the time tools or to provider sessions.
pub struct ToolExecutor {
    remote: Vec<ToolDescriptor>,
}

impl ToolExecutor {
    pub fn new(remote: Vec<ToolDescriptor>) -> Self {
        Self { remote }
    }

    /// Number of tools visible to the model.
    pub fn tool_count(&self) -> usize {
        LOCAL_TOOLS.len() + self.remote.len()
    }

    /// Definitions for every tool, time tools first.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut definitions = local_tool_definitions();
        definitions.extend(self.remote.iter().map(|tool| {
            let description = if tool.description.is_empty() {
                format!("Tool provided by {}", tool.provider)
            } else {
                tool.description.clone()
            };
            ToolDefinition::function(&tool.name, &description, tool.input_schema.clone())
        }));
        definitions
    }

    /// Execute a tool call and return the result.
    pub async fn execute(&self, call: &ToolCall) -> ToolResult {
        let name = call.function.name.as_str();
        let args = &call.function.arguments;

        debug!("Executing tool: {} with args: {}", name, args);

        match name {
            "current_time" => ToolResult::success(time_tools::current_time()),
            "validate_log_timestamps" => validate_timestamps(args),
            "format_time_analysis" => format_analysis(args),
            "get_time_filter_suggestion" => suggest_window(args),
            _ => self.execute_remote(name, args).await,
        }
    }

    async fn execute_remote(&self, name: &str, args: &Value) -> ToolResult {
        // Duplicate names across providers: the first provider wins.
        let Some(tool) = self.remote.iter().find(|t| t.name == name) else {
            return ToolResult::error(format!("Unknown tool: {}", name));
        };

        let arguments = if args.is_null() { json!({}) } else { args.clone() };
        match tool.invoke(arguments).await {
            Ok(output) => ToolResult::success(output),
            Err(e) => {
                warn!("Tool {} on {} failed: {}", name, tool.provider, e);
                ToolResult::error(e.to_string())
            }
        }
    }
}

fn validate_timestamps(args: &Value) -> ToolResult {
    match args.get("log_timestamps").and_then(Value::as_str) {
        Some(list) => ToolResult::json(&time_tools::validate_log_timestamps(list)),
        None => ToolResult::error("Missing required parameter: log_timestamps".to_string()),
    }
}

fn format_analysis(args: &Value) -> ToolResult {
    // Models sometimes pass the validation result as an object instead of a string.
    let data = match args.get("analysis_data") {
        Some(Value::String(s)) => s.clone(),
        Some(other) if other.is_object() => other.to_string(),
        _ => return ToolResult::error("Missing required parameter: analysis_data".to_string()),
    };

    match time_tools::format_time_analysis(&data) {
        Ok(report) => ToolResult::success(report),
        Err(e) => ToolResult::error(e.to_string()),
    }
}

fn suggest_window(args: &Value) -> ToolResult {
    let days = match args.get("time_range_days") {
        None | Some(Value::Null) => 30,
        Some(v) => match v
            .as_u64()
            .or_else(|| v.as_str().and_then(|s| s.trim().parse().ok()))
            .and_then(|d| u32::try_from(d).ok())
        {
            Some(d) => d,
            None => {
                return ToolResult::error(
                    "time_range_days must be a non-negative integer".to_string(),
                )
            }
        },
    };

    match time_tools::time_filter_suggestion(days) {
        Ok(suggestion) => ToolResult::json(&suggestion),
        Err(e) => ToolResult::error(e.to_string()),
    }
}

fn local_tool_definitions() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition::function(
            "current_time",
            "Get the current UTC time. Use it as the reference point for any time reasoning.",
            json!({"type": "object", "properties": {}, "required": []}),
        ),
        ToolDefinition::function(
            "validate_log_timestamps",
            "Check log timestamps against the current time. Flags future timestamps, unparsable entries and spans longer than a year.",
            json!({
                "type": "object",
                "properties": {
                    "log_timestamps": {
                        "type": "string",
                        "description": "Comma-separated timestamps, e.g. \"2025-02-13 02:42:16,2025-07-15 23:26:11\""
                    }
                },
                "required": ["log_timestamps"]
            }),
        ),
        ToolDefinition::function(
            "format_time_analysis",
            "Turn the JSON output of validate_log_timestamps into a readable report.",
            json!({
                "type": "object",
                "properties": {
                    "analysis_data": {
                        "type": "string",
                        "description": "JSON returned by validate_log_timestamps"
                    }
                },
                "required": ["analysis_data"]
            }),
        ),
        ToolDefinition::function(
            "get_time_filter_suggestion",
            "Suggest query time windows (today, last 7 days, last 30 days and a custom range) based on the current time.",
            json!({
                "type": "object",
                "properties": {
                    "time_range_days": {
                        "type": "integer",
                        "description": "Length of the custom window in days (default: 30)"
                    }
                },
                "required": []
            }),
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(name: &str, arguments: Value) -> ToolCall {
        ToolCall {
            function: FunctionCall {
                name: name.to_string(),
                arguments,
            },
        }
    }

    #[test]
    fn test_tool_definitions() {
        let executor = ToolExecutor::new(Vec::new());
        let tools = executor.definitions();
        assert_eq!(tools.len(), 4);
        assert_eq!(executor.tool_count(), 4);

        let names: Vec<_> = tools.iter().map(|t| t.function.name.as_str()).collect();
        assert_eq!(names, LOCAL_TOOLS.to_vec());

        let json = serde_json::to_value(&tools[1]).unwrap();
        assert_eq!(json["type"], "function");
        assert_eq!(json["function"]["parameters"]["required"][0], "log_timestamps");
    }

    #[tokio::test]
    async fn test_validate_timestamps_tool() {
        let executor = ToolExecutor::new(Vec::new());
        let result = executor
            .execute(&call(
                "validate_log_timestamps",
                json!({"log_timestamps": "2099-01-01 00:00:00,oops"}),
            ))
            .await;

        assert!(result.success);
        let value: Value = serde_json::from_str(&result.output).unwrap();
        assert_eq!(value["invalid_timestamps"][0], "oops");
    }

    #[tokio::test]
    async fn test_format_analysis_accepts_object_argument() {
        let executor = ToolExecutor::new(Vec::new());
        let result = executor
            .execute(&call(
                "format_time_analysis",
                json!({"analysis_data": {"total_timestamps": 1, "invalid_timestamps": ["x"]}}),
            ))
            .await;

        assert!(result.success);
        assert!(result.output.contains("Total timestamps: 1"));
    }

    #[tokio::test]
    async fn test_time_filter_suggestion_argument_handling() {
        let executor = ToolExecutor::new(Vec::new());

        let default_window = executor.execute(&call("get_time_filter_suggestion", Value::Null)).await;
        assert!(default_window.output.contains("Last 30 days"));

        let textual = executor
            .execute(&call("get_time_filter_suggestion", json!({"time_range_days": "3"})))
            .await;
        assert!(textual.output.contains("Last 3 days"));

        let negative = executor
            .execute(&call("get_time_filter_suggestion", json!({"time_range_days": -2})))
            .await;
        assert!(!negative.success);
    }

    #[tokio::test]
    async fn test_unknown_tool_and_missing_arguments() {
        let executor = ToolExecutor::new(Vec::new());

        let unknown = executor.execute(&call("drop_tables", json!({}))).await;
        assert_eq!(unknown.into_message(), "Error: Unknown tool: drop_tables");

        let missing = executor.execute(&call("validate_log_timestamps", json!({}))).await;
        assert!(!missing.success);
    }
}
