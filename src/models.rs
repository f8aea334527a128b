//! Data models for the log analysis assistant.
//!
//! This module contains the core data structures shared between the
//! configuration layer, the provider connection manager and the CLI.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Launch description of one tool provider.
///
/// Built field by field by the configuration layer from the provider
/// file and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderSpec {
    /// Unique provider name (the key in `mcpServers`).
    pub name: String,
    /// Executable to launch.
    pub command: String,
    /// Arguments passed to the executable, in order.
    pub args: Vec<String>,
    /// Extra environment variables for the child process.
    pub env: BTreeMap<String, String>,
    /// Disabled providers are skipped at startup.
    pub disabled: bool,
    /// Tool names the provider allows without confirmation (`autoApprove`).
    pub auto_approve: BTreeSet<String>,
}

impl ProviderSpec {
    /// Create a spec with no arguments or environment.
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
            disabled: false,
            auto_approve: BTreeSet::new(),
        }
    }

    /// Replace the argument list.
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Human-readable command line, used in log messages.
    pub fn command_line(&self) -> String {
        if self.args.is_empty() {
            self.command.clone()
        } else {
            format!("{} {}", self.command, self.args.join(" "))
        }
    }
}

/// Lifecycle state of a provider session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Liveness {
    /// Handle constructed, nothing spawned yet.
    #[default]
    Unopened,
    /// Session handshake completed.
    Open,
    /// Session released; cannot be reopened.
    Closed,
}

impl fmt::Display for Liveness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Liveness::Unopened => write!(f, "unopened"),
            Liveness::Open => write!(f, "open"),
            Liveness::Closed => write!(f, "closed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_line() {
        let spec = ProviderSpec::new("logs", "uvx").with_args(["log-mcp", "--stdio"]);
        assert_eq!(spec.command_line(), "uvx log-mcp --stdio");
        assert_eq!(ProviderSpec::new("x", "node").command_line(), "node");
    }

    #[test]
    fn test_liveness_default_is_unopened() {
        assert_eq!(Liveness::default(), Liveness::Unopened);
        assert_eq!(Liveness::Closed.to_string(), "closed");
    }
}
