//! Interactive query loop.

use crate::agent::{QueryOrchestrator, ReasoningAgent};
use crate::mcp::ConnectionManager;
use crate::report::{format_status_message, format_summary, StatusKind};
use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::json;
use std::io::Write;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::debug;

const PROMPT: &str = "loglens> ";

const HELP: &str = "Commands:
• help, 帮助: show this help
• status: show agent and provider status
• health: probe every configured provider
• exit, quit, 退出: leave

Anything else is sent to the assistant as a query, for example:
• show today's error count by service
• 统计最近一小时的登录失败次数
• analyze the latency trend of the payment API";

/// One line of user input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Empty,
    Help,
    Exit,
    Status,
    Health,
    Query(String),
}

impl Command {
    pub fn parse(line: &str) -> Self {
        let line = line.trim();
        match line.to_lowercase().as_str() {
            "" => Command::Empty,
            "help" | "帮助" => Command::Help,
            "exit" | "quit" | "退出" => Command::Exit,
            "status" => Command::Status,
            "health" => Command::Health,
            _ => Command::Query(line.to_string()),
        }
    }
}

/// Probe every provider and render one status line per connection.
pub async fn health_report(manager: &ConnectionManager) -> String {
    let connections = manager.connections();
    if connections.is_empty() {
        return format_status_message("No providers configured", StatusKind::Warning);
    }

    let results = manager.health_check().await;
    let mut lines = Vec::with_capacity(connections.len());
    for (index, connection) in connections.iter().enumerate() {
        let healthy = results.get(&index).copied().unwrap_or(false);
        let line = if healthy {
            format_status_message(&format!("{}: healthy", connection.name()), StatusKind::Success)
        } else {
            format_status_message(&format!("{}: unreachable", connection.name()), StatusKind::Error)
        };
        lines.push(line);
    }
    lines.join("\n")
}

/// Read-eval-print loop over an orchestrator and the provider set.
pub struct Repl<'a, A> {
    orchestrator: QueryOrchestrator<A>,
    manager: &'a ConnectionManager,
    show_spinner: bool,
}

impl<'a, A: ReasoningAgent> Repl<'a, A> {
    pub fn new(orchestrator: QueryOrchestrator<A>, manager: &'a ConnectionManager) -> Self {
        Self {
            orchestrator,
            manager,
            show_spinner: false,
        }
    }

    /// Show a spinner on stderr while a query runs.
    pub fn with_spinner(mut self, show: bool) -> Self {
        self.show_spinner = show;
        self
    }

    /// Run until `exit` or end of input.
    pub async fn run<R, W>(&mut self, input: R, out: &mut W) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: Write,
    {
        let mut lines = input.lines();

        writeln!(
            out,
            "{}",
            format_status_message(
                "Log analysis assistant ready. Type `help` for commands.",
                StatusKind::Success
            )
        )?;

        loop {
            write!(out, "{}", PROMPT)?;
            out.flush()?;

            let Some(line) = lines.next_line().await? else {
                writeln!(out)?;
                break;
            };

            let command = Command::parse(&line);
            debug!("REPL command: {:?}", command);

            match command {
                Command::Empty => continue,
                Command::Exit => break,
                Command::Help => writeln!(out, "{}", HELP)?,
                Command::Status => {
                    let status = self.status().await;
                    writeln!(out, "{}", status)?;
                }
                Command::Health => {
                    let report = health_report(self.manager).await;
                    writeln!(out, "{}", report)?;
                }
                Command::Query(query) => {
                    let answer = self.ask(&query).await;
                    writeln!(out, "\n{}\n", answer)?;
                }
            }
        }

        writeln!(out, "{}", format_status_message("Goodbye", StatusKind::Info))?;
        Ok(())
    }

    async fn ask(&mut self, query: &str) -> String {
        let spinner = self.show_spinner.then(|| {
            let pb = ProgressBar::new_spinner();
            if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg} [{elapsed}]") {
                pb.set_style(style);
            }
            pb.set_message("Analyzing...");
            pb.enable_steady_tick(Duration::from_millis(100));
            pb
        });

        let answer = self.orchestrator.render(query).await;

        if let Some(pb) = spinner {
            pb.finish_and_clear();
        }
        answer
    }

    async fn status(&self) -> String {
        let info = self.orchestrator.info();
        let mut report = format_summary(&[
            ("agent", json!(info.status)),
            ("tools_count", json!(info.tools_count)),
            ("system_prompt_length", json!(info.system_prompt_length)),
            ("providers", json!(self.manager.connections().len())),
            ("active_providers", json!(self.manager.active_count())),
            ("provider_tools", json!(self.manager.tools().len())),
        ]);

        for connection in self.manager.connections() {
            report.push_str(&format!(
                "\n  {}: {}",
                connection.name(),
                connection.liveness().await
            ));
        }
        report
    }
}
