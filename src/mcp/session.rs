//! Provider sessions.
//!
//! A session is an explicit handle around one tool provider: it is
//! constructed cheaply, opened (process spawn + handshake), used for
//! listing and calling tools, and closed. Nothing is released
//! implicitly except the child process itself, which is killed if the
//! handle is dropped while still running.

use crate::mcp::protocol::{
    initialize_params, CallToolResult, JsonRpcMessage, JsonRpcNotification, JsonRpcRequest,
    ListToolsResult, RemoteTool,
};
use crate::models::{Liveness, ProviderSpec};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::{debug, warn};

/// Upper bound on `tools/list` pages followed for one provider.
const MAX_TOOL_PAGES: usize = 64;

/// How long a provider gets to exit after its stdin is closed.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Errors raised by a provider session.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("failed to launch `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot construct connection for `{0}`: {1}")]
    Construct(String, String),

    #[error("connection I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid protocol message: {0}")]
    Json(#[from] serde_json::Error),

    #[error("connection closed by provider")]
    Disconnected,

    #[error("request `{method}` timeout after {seconds}s")]
    Timeout { method: String, seconds: u64 },

    #[error("provider returned error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("tool `{tool}` failed: {message}")]
    ToolFailed { tool: String, message: String },

    #[error("session is not open")]
    NotOpen,

    #[error("session already closed")]
    Closed,
}

/// One live (or not yet live) connection to a tool provider.
#[async_trait]
pub trait ProviderSession: Send {
    fn liveness(&self) -> Liveness;

    /// Open the session. Opening an open session is a no-op.
    async fn open(&mut self) -> Result<(), SessionError>;

    async fn list_tools(&mut self) -> Result<Vec<RemoteTool>, SessionError>;

    async fn call_tool(&mut self, name: &str, arguments: Value) -> Result<String, SessionError>;

    /// Release the session. Closing twice is a no-op.
    async fn close(&mut self) -> Result<(), SessionError>;
}

/// Builds session handles from provider specs without opening them.
pub trait Connector: Send + Sync {
    fn connect(&self, spec: &ProviderSpec) -> Result<Box<dyn ProviderSession>, SessionError>;
}

/// Open a session, list its tools and close it again on every path.
///
/// Returns the number of tools the provider advertised.
pub async fn probe_session(session: &mut dyn ProviderSession) -> Result<usize, SessionError> {
    let outcome = match session.open().await {
        Ok(()) => session.list_tools().await.map(|tools| tools.len()),
        Err(e) => Err(e),
    };

    if let Err(e) = session.close().await {
        warn!("Failed to release probe session: {}", e);
    }

    outcome
}

/// Connector for providers launched as child processes speaking MCP over stdio.
#[derive(Debug, Clone)]
pub struct StdioConnector {
    request_timeout: Duration,
}

impl StdioConnector {
    pub fn new(request_timeout: Duration) -> Self {
        Self { request_timeout }
    }
}

impl Connector for StdioConnector {
    fn connect(&self, spec: &ProviderSpec) -> Result<Box<dyn ProviderSession>, SessionError> {
        let command = Path::new(&spec.command);
        // Bare names are resolved through PATH at spawn time.
        if command.components().count() > 1 && !command.exists() {
            return Err(SessionError::Construct(
                spec.name.clone(),
                format!("executable {} does not exist", command.display()),
            ));
        }

        Ok(Box::new(StdioSession::new(spec.clone(), self.request_timeout)))
    }
}

/// MCP client session over a child process' stdin/stdout.
pub struct StdioSession {
    spec: ProviderSpec,
    request_timeout: Duration,
    state: Liveness,
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    stdout: Option<Lines<BufReader<ChildStdout>>>,
    next_id: u64,
}

impl StdioSession {
    pub fn new(spec: ProviderSpec, request_timeout: Duration) -> Self {
        Self {
            spec,
            request_timeout,
            state: Liveness::Unopened,
            child: None,
            stdin: None,
            stdout: None,
            next_id: 1,
        }
    }

    fn spawn(&mut self) -> Result<(), SessionError> {
        debug!("Launching provider {}: {}", self.spec.name, self.spec.command_line());

        let mut child = Command::new(&self.spec.command)
            .args(&self.spec.args)
            .envs(&self.spec.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| SessionError::Spawn {
                command: self.spec.command_line(),
                source,
            })?;

        self.stdin = child.stdin.take();
        self.stdout = child.stdout.take().map(|out| BufReader::new(out).lines());
        self.child = Some(child);
        Ok(())
    }

    async fn handshake(&mut self) -> Result<(), SessionError> {
        let result = self.request("initialize", initialize_params()).await?;
        if let Some(server) = result.get("serverInfo").and_then(|s| s.get("name")) {
            debug!("Provider {} identifies as {}", self.spec.name, server);
        }
        self.notify("notifications/initialized").await
    }

    async fn write_line(&mut self, line: &str) -> Result<(), SessionError> {
        let stdin = self.stdin.as_mut().ok_or(SessionError::NotOpen)?;
        stdin.write_all(line.as_bytes()).await?;
        stdin.write_all(b"\n").await?;
        stdin.flush().await?;
        Ok(())
    }

    async fn notify(&mut self, method: &str) -> Result<(), SessionError> {
        let line = serde_json::to_string(&JsonRpcNotification::new(method))?;
        self.write_line(&line).await
    }

    async fn request(&mut self, method: &str, params: Value) -> Result<Value, SessionError> {
        let id = self.next_id;
        self.next_id += 1;

        let line = serde_json::to_string(&JsonRpcRequest::new(id, method, params))?;
        self.write_line(&line).await?;

        let limit = self.request_timeout;
        match tokio::time::timeout(limit, self.read_response(id)).await {
            Ok(result) => result,
            Err(_) => Err(SessionError::Timeout {
                method: method.to_string(),
                seconds: limit.as_secs(),
            }),
        }
    }

    async fn read_response(&mut self, id: u64) -> Result<Value, SessionError> {
        loop {
            let stdout = self.stdout.as_mut().ok_or(SessionError::NotOpen)?;
            let Some(line) = stdout.next_line().await? else {
                return Err(SessionError::Disconnected);
            };

            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let message: JsonRpcMessage = match serde_json::from_str(line) {
                Ok(m) => m,
                Err(e) => {
                    debug!("Ignoring non-protocol output from {}: {}", self.spec.name, e);
                    continue;
                }
            };

            if message.answers(id) {
                if let Some(err) = message.error {
                    return Err(SessionError::Rpc {
                        code: err.code,
                        message: err.message,
                    });
                }
                return Ok(message.result.unwrap_or(Value::Null));
            }

            // Server-initiated request: answer pings, refuse everything else.
            if let (Some(method), Some(request_id)) = (message.method.as_deref(), message.id) {
                let reply = if method == "ping" {
                    json!({"jsonrpc": "2.0", "id": request_id, "result": {}})
                } else {
                    json!({
                        "jsonrpc": "2.0",
                        "id": request_id,
                        "error": {"code": -32601, "message": "method not supported by client"}
                    })
                };
                self.write_line(&reply.to_string()).await?;
            }
        }
    }

    fn ensure_open(&self) -> Result<(), SessionError> {
        match self.state {
            Liveness::Open => Ok(()),
            Liveness::Unopened => Err(SessionError::NotOpen),
            Liveness::Closed => Err(SessionError::Closed),
        }
    }

    async fn terminate(&mut self) -> Result<(), SessionError> {
        // Closing stdin is the protocol's shutdown signal.
        drop(self.stdin.take());
        self.stdout = None;

        let Some(mut child) = self.child.take() else {
            return Ok(());
        };

        match tokio::time::timeout(SHUTDOWN_GRACE, child.wait()).await {
            Ok(status) => {
                debug!("Provider {} exited: {:?}", self.spec.name, status?);
            }
            Err(_) => {
                warn!(
                    "Provider {} did not exit within {}s, killing it",
                    self.spec.name,
                    SHUTDOWN_GRACE.as_secs()
                );
                child.kill().await?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ProviderSession for StdioSession {
    fn liveness(&self) -> Liveness {
        self.state
    }

    async fn open(&mut self) -> Result<(), SessionError> {
        match self.state {
            Liveness::Open => return Ok(()),
            Liveness::Closed => return Err(SessionError::Closed),
            Liveness::Unopened => {}
        }

        self.spawn()?;
        if let Err(e) = self.handshake().await {
            if let Err(kill_err) = self.terminate().await {
                warn!("Failed to stop provider {}: {}", self.spec.name, kill_err);
            }
            self.state = Liveness::Closed;
            return Err(e);
        }

        self.state = Liveness::Open;
        Ok(())
    }

    async fn list_tools(&mut self) -> Result<Vec<RemoteTool>, SessionError> {
        self.ensure_open()?;

        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;

        for _ in 0..MAX_TOOL_PAGES {
            let params = match cursor.take() {
                Some(c) => json!({ "cursor": c }),
                None => Value::Null,
            };
            let page: ListToolsResult =
                serde_json::from_value(self.request("tools/list", params).await?)?;
            tools.extend(page.tools);

            match page.next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => return Ok(tools),
            }
        }

        warn!(
            "Provider {} kept paginating tools/list, stopping after {} pages",
            self.spec.name, MAX_TOOL_PAGES
        );
        Ok(tools)
    }

    async fn call_tool(&mut self, name: &str, arguments: Value) -> Result<String, SessionError> {
        self.ensure_open()?;

        let params = json!({ "name": name, "arguments": arguments });
        let result: CallToolResult =
            serde_json::from_value(self.request("tools/call", params).await?)?;

        if result.is_error {
            return Err(SessionError::ToolFailed {
                tool: name.to_string(),
                message: result.text(),
            });
        }
        Ok(result.text())
    }

    async fn close(&mut self) -> Result<(), SessionError> {
        let previous = std::mem::replace(&mut self.state, Liveness::Closed);
        if previous == Liveness::Open {
            self.terminate().await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session_for(spec: ProviderSpec) -> StdioSession {
        StdioSession::new(spec, Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_open_missing_executable_fails() {
        let mut session = session_for(ProviderSpec::new("ghost", "loglens-no-such-binary"));
        let err = session.open().await.unwrap_err();

        assert!(matches!(err, SessionError::Spawn { .. }));
        assert_eq!(session.liveness(), Liveness::Unopened);
        assert!(session.close().await.is_ok());
        assert_eq!(session.liveness(), Liveness::Closed);
    }

    #[tokio::test]
    async fn test_list_tools_requires_open_session() {
        let mut session = session_for(ProviderSpec::new("logs", "log-mcp"));
        assert!(matches!(session.list_tools().await, Err(SessionError::NotOpen)));

        session.close().await.unwrap();
        assert!(matches!(session.list_tools().await, Err(SessionError::Closed)));
        assert!(matches!(session.open().await, Err(SessionError::Closed)));
    }

    #[test]
    fn test_connector_rejects_missing_path() {
        let connector = StdioConnector::new(Duration::from_secs(1));
        let spec = ProviderSpec::new("logs", "/definitely/not/here/log-mcp");
        assert!(matches!(
            connector.connect(&spec),
            Err(SessionError::Construct(ref name, _)) if name == "logs"
        ));

        let bare = ProviderSpec::new("logs", "log-mcp");
        let session = connector.connect(&bare).unwrap();
        assert_eq!(session.liveness(), Liveness::Unopened);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stdio_round_trip_with_scripted_provider() {
        // Answers initialize (id 1) and tools/list (id 2), then waits for EOF.
        let script = concat!(
            "read init; ",
            r#"printf '%s\n' '{"jsonrpc":"2.0","id":1,"result":{"protocolVersion":"2024-11-05","capabilities":{},"serverInfo":{"name":"fake","version":"0"}}}'; "#,
            "read initialized; read list; ",
            r#"printf '%s\n' 'not json at all'; "#,
            r#"printf '%s\n' '{"jsonrpc":"2.0","id":2,"result":{"tools":[{"name":"search_logs","description":"Search logs","inputSchema":{"type":"object"}}]}}'; "#,
            "cat > /dev/null"
        );
        let spec = ProviderSpec::new("fake", "sh").with_args(["-c", script]);
        let mut session = session_for(spec);

        session.open().await.unwrap();
        assert_eq!(session.liveness(), Liveness::Open);
        session.open().await.unwrap();

        let tools = session.list_tools().await.unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "search_logs");

        session.close().await.unwrap();
        assert_eq!(session.liveness(), Liveness::Closed);
        session.close().await.unwrap();
    }
}
