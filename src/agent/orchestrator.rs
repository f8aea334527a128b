//! Query handling around the reasoning agent.
//!
//! The orchestrator validates a query, adds analysis context, calls the
//! agent and turns whatever comes back (an answer, an empty reply or an
//! error) into text for the user. Agent errors never escape.

use crate::agent::agent_loop::ReasoningAgent;
use crate::report::TextNormalizer;
use tracing::{error, info};

/// Queries containing any of these are passed through unchanged.
const ACTION_KEYWORDS: &[&str] = &["分析", "统计", "查询", "显示", "analyze", "stat", "query", "show"];

const ANALYSIS_PREFIX: &str = "Please analyze: ";

/// Answers shorter than this (in characters) are rejected as too brief.
const MIN_ANSWER_CHARS: usize = 10;

pub const EMPTY_QUERY: &str = "Please enter a query, for example: \"show today's error log statistics\".";
pub const NO_SPECIFIC_RESULT: &str =
    "Analysis finished, but no specific result was produced. Try more specific query conditions.";
pub const TOO_BRIEF: &str = "The analysis result is too brief. Try a more detailed query.";

const TIMEOUT_HELP: &str = "The query timed out. Possible causes:
• The query range is too large, narrow the time range
• The data source is responding slowly, retry later
• The network connection is unstable

Suggestion: query the last few hours or a specific time period.";

const CONNECTION_HELP: &str = "Failed to connect to the data source:
• Check the network connection
• Confirm the data source configuration is correct
• Verify the access permission settings

If the problem persists, contact your system administrator.";

const AUTH_HELP: &str = "Permission check failed:
• Check the access credential configuration
• Confirm the account permissions
• Verify the data source access policy

Ask an administrator to review the permission configuration.";

/// Outcome of one query.
#[derive(Debug, Clone, PartialEq)]
enum Reply {
    /// The agent produced a usable answer.
    Answer(String),
    /// A fixed prompt or remediation text.
    Notice(String),
}

impl Reply {
    fn into_text(self) -> String {
        match self {
            Reply::Answer(text) | Reply::Notice(text) => text,
        }
    }
}

/// Agent details for the `status` command.
#[derive(Debug, Clone)]
pub struct AgentInfo {
    pub status: &'static str,
    pub tools_count: usize,
    pub system_prompt_length: usize,
}

/// Wraps a reasoning agent with query preprocessing and error remediation.
pub struct QueryOrchestrator<A> {
    agent: A,
    normalizer: TextNormalizer,
}

impl<A: ReasoningAgent> QueryOrchestrator<A> {
    pub fn new(agent: A) -> Self {
        Self {
            agent,
            normalizer: TextNormalizer::new(),
        }
    }

    /// Answer a query. Always returns text; failures become remediation hints.
    pub async fn handle(&mut self, query: &str) -> String {
        self.reply(query).await.into_text()
    }

    /// Like [`handle`](Self::handle), with agent answers normalized for display.
    pub async fn render(&mut self, query: &str) -> String {
        match self.reply(query).await {
            Reply::Answer(text) => self.normalizer.format_result(&text),
            Reply::Notice(text) => text,
        }
    }

    pub fn info(&self) -> AgentInfo {
        AgentInfo {
            status: "initialized",
            tools_count: self.agent.tool_count(),
            system_prompt_length: self.agent.system_prompt().chars().count(),
        }
    }

    async fn reply(&mut self, query: &str) -> Reply {
        let query = query.trim();
        if query.is_empty() {
            return Reply::Notice(EMPTY_QUERY.to_string());
        }

        let preview: String = query.chars().take(100).collect();
        info!("Processing query: {}", preview);

        let prepared = prepare_query(query);
        match self.agent.respond(&prepared).await {
            Ok(response) => {
                let text = response.into_text();
                let text = text.trim();
                info!("Query completed");
                if text.is_empty() {
                    Reply::Notice(NO_SPECIFIC_RESULT.to_string())
                } else if text.chars().count() < MIN_ANSWER_CHARS {
                    Reply::Notice(TOO_BRIEF.to_string())
                } else {
                    Reply::Answer(text.to_string())
                }
            }
            Err(e) => {
                error!("Query failed: {:#}", e);
                Reply::Notice(remediation(&format!("{:#}", e)))
            }
        }
    }
}

fn prepare_query(query: &str) -> String {
    let lower = query.to_lowercase();
    if ACTION_KEYWORDS.iter().any(|k| lower.contains(k)) {
        query.to_string()
    } else {
        format!("{}{}", ANALYSIS_PREFIX, query)
    }
}

fn remediation(detail: &str) -> String {
    let lower = detail.to_lowercase();
    if lower.contains("timeout") {
        TIMEOUT_HELP.to_string()
    } else if lower.contains("connection") {
        CONNECTION_HELP.to_string()
    } else if lower.contains("permission") || lower.contains("auth") {
        AUTH_HELP.to_string()
    } else {
        format!(
            "A problem occurred while processing the query:
• Error details: {}
• Suggestion: rephrase the query or contact technical support

You can try:
• Using simpler query conditions
• Narrowing the data range
• Checking the query syntax",
            detail
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::agent_loop::AgentResponse;
    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::VecDeque;

    /// Agent that replays scripted outcomes and records the queries it saw.
    struct ScriptedAgent {
        outcomes: VecDeque<Result<AgentResponse>>,
        seen: Vec<String>,
    }

    impl ScriptedAgent {
        fn new(outcomes: Vec<Result<AgentResponse>>) -> Self {
            Self {
                outcomes: outcomes.into(),
                seen: Vec::new(),
            }
        }
    }

    #[async_trait]
    impl ReasoningAgent for ScriptedAgent {
        async fn respond(&mut self, query: &str) -> Result<AgentResponse> {
            self.seen.push(query.to_string());
            self.outcomes
                .pop_front()
                .unwrap_or_else(|| Err(anyhow!("no scripted outcome")))
        }

        fn tool_count(&self) -> usize {
            7
        }

        fn system_prompt(&self) -> &str {
            "prompt"
        }
    }

    fn orchestrator(outcomes: Vec<Result<AgentResponse>>) -> QueryOrchestrator<ScriptedAgent> {
        QueryOrchestrator::new(ScriptedAgent::new(outcomes))
    }

    #[test]
    fn test_empty_query_skips_agent() {
        let mut orchestrator = orchestrator(Vec::new());
        let reply = tokio_test::block_on(orchestrator.handle("   "));

        assert_eq!(reply, EMPTY_QUERY);
        assert!(orchestrator.agent.seen.is_empty());
    }

    #[test]
    fn test_action_keywords_and_prefix() {
        let answer = || Ok(AgentResponse::Content("a sufficiently long answer".into()));
        let mut orchestrator = orchestrator(vec![answer(), answer(), answer()]);

        tokio_test::block_on(orchestrator.handle("统计今天的错误"));
        tokio_test::block_on(orchestrator.handle("Show me login failures"));
        tokio_test::block_on(orchestrator.handle("  what broke last night  "));

        assert_eq!(
            orchestrator.agent.seen,
            vec![
                "统计今天的错误".to_string(),
                "Show me login failures".to_string(),
                "Please analyze: what broke last night".to_string(),
            ]
        );
    }

    #[test]
    fn test_response_variants_are_extracted() {
        let mut orchestrator = orchestrator(vec![
            Ok(AgentResponse::Message("message wins here".into())),
            Ok(AgentResponse::Text("text variant answer".into())),
            Ok(AgentResponse::Raw(json!({"rows": 12}))),
        ]);

        assert_eq!(tokio_test::block_on(orchestrator.handle("query 1")), "message wins here");
        assert_eq!(tokio_test::block_on(orchestrator.handle("query 2")), "text variant answer");
        assert_eq!(tokio_test::block_on(orchestrator.handle("query 3")), r#"{"rows":12}"#);
    }

    #[test]
    fn test_empty_and_brief_answers() {
        let mut orchestrator = orchestrator(vec![
            Ok(AgentResponse::Content("   ".into())),
            Ok(AgentResponse::Content("ok".into())),
        ]);

        assert_eq!(tokio_test::block_on(orchestrator.handle("show a")), NO_SPECIFIC_RESULT);
        assert_eq!(tokio_test::block_on(orchestrator.handle("show b")), TOO_BRIEF);
    }

    #[test]
    fn test_errors_map_to_remediation() {
        let mut orchestrator = orchestrator(vec![
            Err(anyhow!("Request timeout after 300s waiting for the model")),
            Err(anyhow!("Connection to Ollama at http://localhost:11434 failed")),
            Err(anyhow!("Permission denied for index")),
            Err(anyhow!("OAuth token rejected")),
            Err(anyhow!("model exploded")),
        ]);

        assert_eq!(tokio_test::block_on(orchestrator.handle("show 1")), TIMEOUT_HELP);
        assert_eq!(tokio_test::block_on(orchestrator.handle("show 2")), CONNECTION_HELP);
        assert_eq!(tokio_test::block_on(orchestrator.handle("show 3")), AUTH_HELP);
        assert_eq!(tokio_test::block_on(orchestrator.handle("show 4")), AUTH_HELP);

        let generic = tokio_test::block_on(orchestrator.handle("show 5"));
        assert!(generic.contains("• Error details: model exploded"));
    }

    #[test]
    fn test_render_normalizes_answers_only() {
        let mut orchestrator = orchestrator(vec![Ok(AgentResponse::Content(
            "## Summary\n**errors**: 12\n\n\n\n- api down".into(),
        ))]);

        let rendered = tokio_test::block_on(orchestrator.render("show errors"));
        assert_eq!(rendered, "Summary:\n\nerrors: 12\n\n• api down");

        let notice = tokio_test::block_on(orchestrator.render(""));
        assert_eq!(notice, EMPTY_QUERY);
    }

    #[test]
    fn test_info() {
        let orchestrator = orchestrator(Vec::new());
        let info = orchestrator.info();
        assert_eq!(info.tools_count, 7);
        assert_eq!(info.system_prompt_length, 6);
    }
}
