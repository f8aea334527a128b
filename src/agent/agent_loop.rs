//! Agent loop for tool-based log analysis.
//!
//! The reasoning agent is reached through the [`ReasoningAgent`] trait.
//! The shipped implementation drives an Ollama model with tool calling:
//! each query runs until the model answers without requesting tools or
//! the iteration budget is spent.

use crate::agent::tools::{FunctionCall, ToolCall, ToolExecutor};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info};

/// Anything that can answer a query, given the tools it was built with.
#[async_trait]
pub trait ReasoningAgent: Send {
    async fn respond(&mut self, query: &str) -> Result<AgentResponse>;

    /// Number of tools the agent can call.
    fn tool_count(&self) -> usize;

    fn system_prompt(&self) -> &str;
}

/// The shapes an agent reply can take, in extraction priority order.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentResponse {
    Message(String),
    Content(String),
    Text(String),
    Raw(Value),
}

impl AgentResponse {
    /// Classify a JSON reply: `message`, then `content`, then `text`.
    pub fn from_json(value: Value) -> Self {
        if let Some(message) = value.get("message") {
            match message {
                Value::String(s) => return AgentResponse::Message(s.clone()),
                Value::Object(_) => {
                    if let Some(content) = message.get("content").and_then(Value::as_str) {
                        return AgentResponse::Message(content.to_string());
                    }
                }
                _ => {}
            }
        }
        if let Some(content) = value.get("content").and_then(Value::as_str) {
            return AgentResponse::Content(content.to_string());
        }
        if let Some(text) = value.get("text").and_then(Value::as_str) {
            return AgentResponse::Text(text.to_string());
        }
        AgentResponse::Raw(value)
    }

    pub fn into_text(self) -> String {
        match self {
            AgentResponse::Message(s) | AgentResponse::Content(s) | AgentResponse::Text(s) => s,
            AgentResponse::Raw(Value::String(s)) => s,
            AgentResponse::Raw(other) => other.to_string(),
        }
    }
}

/// Configuration for the agent.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub ollama_url: String,
    pub model_name: String,
    pub temperature: f32,
    pub max_iterations: usize,
    pub timeout_seconds: u64,
    /// Max tool results to keep in context (sliding window)
    pub max_context_messages: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            ollama_url: "http://localhost:11434".to_string(),
            model_name: "qwen2.5:14b".to_string(),
            temperature: 0.1,
            max_iterations: 20,
            timeout_seconds: 300,
            max_context_messages: 12,
        }
    }
}

impl From<&crate::config::ModelConfig> for AgentConfig {
    fn from(model: &crate::config::ModelConfig) -> Self {
        Self {
            ollama_url: model.ollama_url.trim_end_matches('/').to_string(),
            model_name: model.name.clone(),
            temperature: model.temperature,
            max_iterations: model.max_iterations,
            timeout_seconds: model.timeout_seconds,
            max_context_messages: model.max_context_messages,
        }
    }
}

/// Message in the chat history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCallMessage>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
}

impl ChatMessage {
    fn new(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: content.into(),
            tool_calls: None,
            tool_name: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallMessage {
    pub function: ToolCallFunction,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallFunction {
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

/// Ollama chat API request.
#[derive(Debug, Serialize)]
struct OllamaChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<Value>,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: String,
    #[serde(default)]
    tool_calls: Option<Vec<ToolCallMessage>>,
}

/// Log analysis agent backed by an Ollama model.
pub struct LogAnalysisAgent {
    config: AgentConfig,
    http_client: reqwest::Client,
    tool_executor: ToolExecutor,
    tools_json: Vec<Value>,
    messages: Vec<ChatMessage>,
}

impl LogAnalysisAgent {
    /// Create an agent that can call the given tools.
    pub fn new(config: AgentConfig, tool_executor: ToolExecutor) -> Result<Self> {
        info!(
            "Initializing agent with model {} and {} tools",
            config.model_name,
            tool_executor.tool_count()
        );

        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .context("Failed to create HTTP client")?;

        let tools_json = tool_executor
            .definitions()
            .iter()
            .map(serde_json::to_value)
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to encode tool definitions")?;

        Ok(Self {
            config,
            http_client,
            tool_executor,
            tools_json,
            messages: Vec::new(),
        })
    }

    /// Prune old tool messages to keep context small (sliding window).
    fn prune_old_messages(&mut self) {
        // Keep: system prompt + user query + last N messages
        let keep_start = 2;
        let max_keep = self.config.max_context_messages + keep_start;

        if self.messages.len() > max_keep {
            let remove_count = self.messages.len() - max_keep;
            self.messages.drain(keep_start..keep_start + remove_count);
            debug!("Pruned {} old messages to save context", remove_count);
        }
    }

    /// Send the conversation to Ollama; returns the raw body and the parsed message.
    async fn chat_with_tools(&mut self) -> Result<(Value, ResponseMessage)> {
        let url = format!("{}/api/chat", self.config.ollama_url);

        let request = OllamaChatRequest {
            model: &self.config.model_name,
            messages: &self.messages,
            tools: self.tools_json.clone(),
            stream: false,
            options: OllamaOptions {
                temperature: self.config.temperature,
            },
        };

        debug!("Sending chat request with {} messages", self.messages.len());

        let response = self
            .http_client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    anyhow::anyhow!(
                        "Request timeout after {}s waiting for the model",
                        self.config.timeout_seconds
                    )
                } else if e.is_connect() {
                    anyhow::anyhow!(
                        "Connection to Ollama at {} failed. Is Ollama running?",
                        self.config.ollama_url
                    )
                } else {
                    anyhow::anyhow!("Failed to send request: {}", e)
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!("Ollama API error {}: {}", status, body));
        }

        let body: Value = response
            .json()
            .await
            .context("Failed to parse Ollama response")?;

        let message: ResponseMessage = serde_json::from_value(
            body.get("message").cloned().unwrap_or(Value::Null),
        )
        .context("Ollama response has no usable message")?;

        self.messages.push(ChatMessage {
            role: "assistant".to_string(),
            content: message.content.clone(),
            tool_calls: message.tool_calls.clone(),
            tool_name: None,
        });

        Ok((body, message))
    }
}

#[async_trait]
impl ReasoningAgent for LogAnalysisAgent {
    async fn respond(&mut self, query: &str) -> Result<AgentResponse> {
        self.messages = vec![
            ChatMessage::new("system", SYSTEM_PROMPT),
            ChatMessage::new("user", query),
        ];

        for iteration in 0..self.config.max_iterations {
            debug!("Agent iteration {}", iteration + 1);

            let (body, reply) = self.chat_with_tools().await?;

            let calls = match reply.tool_calls {
                Some(calls) if !calls.is_empty() => calls,
                _ => return Ok(AgentResponse::from_json(body)),
            };

            for tool_call in calls {
                let call = ToolCall {
                    function: FunctionCall {
                        name: tool_call.function.name.clone(),
                        arguments: tool_call.function.arguments.clone(),
                    },
                };

                let result = self.tool_executor.execute(&call).await;

                self.messages.push(ChatMessage {
                    role: "tool".to_string(),
                    content: result.into_message(),
                    tool_calls: None,
                    tool_name: Some(call.function.name.clone()),
                });

                info!("Tool {} executed", call.function.name);
            }

            self.prune_old_messages();
        }

        Err(anyhow::anyhow!(
            "Model kept requesting tools after {} iterations without answering",
            self.config.max_iterations
        ))
    }

    fn tool_count(&self) -> usize {
        self.tool_executor.tool_count()
    }

    fn system_prompt(&self) -> &str {
        SYSTEM_PROMPT
    }
}

/// System prompt for the log analysis agent
const SYSTEM_PROMPT: &str = r#"You are a log analysis assistant specialised in business log data.

Capabilities:
1. Understand the intent behind natural-language questions about logs
2. Query log data sources through the available provider tools
3. Identify patterns, trends and anomalies in the data
4. Validate time data with the time tools:
   - current_time: the current UTC time
   - validate_log_timestamps: check timestamps for future or malformed values
   - format_time_analysis: turn a validation result into a report
   - get_time_filter_suggestion: propose sensible query windows
5. Produce clear, structured analysis reports

Output rules:
1. Plain text only, no Markdown
2. Organise the answer in paragraphs separated by one blank line
3. Mark list items with the bullet "•"
4. Write statistics as "Metric: value"
5. State time ranges explicitly, formatted as YYYY-MM-DD HH:MM:SS
6. Give percentages with two decimals and always include units

Report template:
Analysis Summary:
• Key finding

Detailed Statistics:
• Total records: N
• Time range: YYYY-MM-DD to YYYY-MM-DD

Trend Analysis:
• Trend

Anomaly Detection:
• Anomaly

Recommendations:
• Recommendation

When log data contains timestamps, validate them with validate_log_timestamps against current_time and call out future timestamps as anomalies. If the data is insufficient, say so plainly."#;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    #[test]
    fn test_agent_config_default() {
        let config = AgentConfig::default();
        assert_eq!(config.ollama_url, "http://localhost:11434");
        assert_eq!(config.max_iterations, 20);
    }

    #[test]
    fn test_response_extraction_priority() {
        let ollama = json!({"message": {"role": "assistant", "content": "from message"}, "content": "ignored"});
        assert_eq!(
            AgentResponse::from_json(ollama),
            AgentResponse::Message("from message".into())
        );

        let content = json!({"content": "from content", "text": "ignored"});
        assert_eq!(
            AgentResponse::from_json(content).into_text(),
            "from content"
        );

        let text = json!({"text": "from text"});
        assert_eq!(AgentResponse::from_json(text), AgentResponse::Text("from text".into()));

        let raw = json!({"result": 42});
        assert_eq!(AgentResponse::from_json(raw).into_text(), r#"{"result":42}"#);
        assert_eq!(AgentResponse::Raw(json!("plain")).into_text(), "plain");
    }

    #[test]
    fn test_prune_keeps_system_and_query() {
        let config = AgentConfig {
            max_context_messages: 2,
            ..AgentConfig::default()
        };
        let mut agent = LogAnalysisAgent::new(config, ToolExecutor::new(Vec::new())).unwrap();
        agent.messages = (0..6).map(|i| ChatMessage::new("tool", format!("m{}", i))).collect();

        agent.prune_old_messages();

        let contents: Vec<_> = agent.messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["m0", "m1", "m4", "m5"]);
    }

    async fn read_request(socket: &mut TcpStream) -> Value {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let n = socket.read(&mut chunk).await.unwrap();
            if n == 0 {
                return Value::Null;
            }
            buf.extend_from_slice(&chunk[..n]);

            if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                let head = String::from_utf8_lossy(&buf[..pos]).to_lowercase();
                let length = head
                    .lines()
                    .find_map(|l| l.strip_prefix("content-length:"))
                    .and_then(|v| v.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                let start = pos + 4;
                if buf.len() >= start + length {
                    return serde_json::from_slice(&buf[start..start + length]).unwrap();
                }
            }
        }
    }

    /// Minimal HTTP endpoint answering each request with the next canned body.
    async fn fake_ollama(replies: Vec<Value>) -> (String, tokio::task::JoinHandle<Vec<Value>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = tokio::spawn(async move {
            let mut requests = Vec::new();
            for reply in replies {
                let (mut socket, _) = listener.accept().await.unwrap();
                requests.push(read_request(&mut socket).await);

                let payload = reply.to_string();
                let response = format!(
                    "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                    payload.len(),
                    payload
                );
                socket.write_all(response.as_bytes()).await.unwrap();
                let _ = socket.shutdown().await;
            }
            requests
        });

        (format!("http://{}", addr), handle)
    }

    #[tokio::test]
    async fn test_respond_runs_tool_round_trip() {
        let (url, server) = fake_ollama(vec![
            json!({
                "message": {
                    "role": "assistant",
                    "content": "",
                    "tool_calls": [{"function": {"name": "current_time", "arguments": {}}}]
                },
                "done": true
            }),
            json!({
                "message": {"role": "assistant", "content": "Analysis Summary:\n• all quiet"},
                "done": true
            }),
        ])
        .await;

        let config = AgentConfig {
            ollama_url: url,
            timeout_seconds: 5,
            ..AgentConfig::default()
        };
        let mut agent = LogAnalysisAgent::new(config, ToolExecutor::new(Vec::new())).unwrap();

        let response = agent.respond("show error counts").await.unwrap();
        assert_eq!(response.into_text(), "Analysis Summary:\n• all quiet");

        let requests = server.await.unwrap();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0]["messages"][1]["content"], "show error counts");
        assert_eq!(requests[0]["tools"].as_array().map(Vec::len), Some(4));
        let second = requests[1]["messages"].as_array().unwrap();
        let tool_message = second.iter().find(|m| m["role"] == "tool").unwrap();
        assert_eq!(tool_message["tool_name"], "current_time");
    }

    #[tokio::test]
    async fn test_respond_reports_unreachable_server() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let config = AgentConfig {
            ollama_url: format!("http://{}", addr),
            timeout_seconds: 5,
            ..AgentConfig::default()
        };
        let mut agent = LogAnalysisAgent::new(config, ToolExecutor::new(Vec::new())).unwrap();

        let err = agent.respond("anything").await.unwrap_err();
        assert!(err.to_string().contains("Connection to Ollama"));
    }
}
