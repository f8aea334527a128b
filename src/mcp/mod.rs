//! MCP tool providers.
//!
//! Sessions speak JSON-RPC to provider processes; the manager owns the
//! set of sessions and aggregates their tools for the agent.

pub mod manager;
pub mod protocol;
pub mod session;

pub use manager::{ConnectionManager, ToolDescriptor};
pub use session::StdioConnector;
