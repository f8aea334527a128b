//! LLM agent modules for log analysis.
//!
//! This module provides the tool-calling agent, the time tools it can call
//! in-process, and the orchestrator that wraps queries around it.

pub mod agent_loop;
pub mod orchestrator;
pub mod time_tools;
pub mod tools;

pub use agent_loop::{AgentConfig, AgentResponse, LogAnalysisAgent, ReasoningAgent};
pub use orchestrator::QueryOrchestrator;
pub use tools::ToolExecutor;
