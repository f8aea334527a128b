//! Connection manager for tool providers.
//!
//! Owns every provider connection for the lifetime of the process,
//! tracks which ones have been opened, aggregates their tools into one
//! flat list and guarantees that teardown releases everything that was
//! opened, no matter how far startup got.

use crate::config::{validate_spec, ConfigError};
use crate::mcp::protocol::RemoteTool;
use crate::mcp::session::{probe_session, Connector, ProviderSession, SessionError};
use crate::models::{Liveness, ProviderSpec};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Session handle shared between a connection and the tools it exposes.
pub type SharedSession = Arc<Mutex<Box<dyn ProviderSession>>>;

/// A provider connection built from a [`ProviderSpec`].
pub struct Connection {
    spec: ProviderSpec,
    session: SharedSession,
}

impl Connection {
    fn new(spec: ProviderSpec, session: Box<dyn ProviderSession>) -> Self {
        Self {
            spec,
            session: Arc::new(Mutex::new(session)),
        }
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn spec(&self) -> &ProviderSpec {
        &self.spec
    }

    pub async fn liveness(&self) -> Liveness {
        self.session.lock().await.liveness()
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("name", &self.spec.name)
            .field("command", &self.spec.command_line())
            .finish()
    }
}

/// A tool exposed by one provider, invocable through that provider's session.
#[derive(Clone)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
    /// Name of the provider that advertised the tool.
    pub provider: String,
    session: SharedSession,
}

impl ToolDescriptor {
    fn new(tool: RemoteTool, connection: &Connection) -> Self {
        Self {
            name: tool.name,
            description: tool.description.unwrap_or_default(),
            input_schema: tool.input_schema,
            provider: connection.spec.name.clone(),
            session: Arc::clone(&connection.session),
        }
    }

    /// Invoke the tool on its provider and return the text result.
    pub async fn invoke(&self, arguments: Value) -> Result<String, SessionError> {
        debug!("Calling {}::{}", self.provider, self.name);
        self.session.lock().await.call_tool(&self.name, arguments).await
    }
}

impl fmt::Debug for ToolDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolDescriptor")
            .field("name", &self.name)
            .field("provider", &self.provider)
            .finish()
    }
}

/// Manages provider connections and the aggregated tool list.
///
/// All operations take `&mut self` (or `&self` for the read-only probe),
/// so a single instance is never mutated from two places at once.
pub struct ConnectionManager {
    connector: Arc<dyn Connector>,
    connections: Vec<Connection>,
    /// Indices into `connections`, in activation order.
    active: Vec<usize>,
    tools: Vec<ToolDescriptor>,
}

impl ConnectionManager {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self {
            connector,
            connections: Vec::new(),
            active: Vec::new(),
            tools: Vec::new(),
        }
    }

    /// Build a connection for every spec, skipping the ones that fail.
    ///
    /// Only constructs the handles; nothing is spawned until
    /// [`get_all_tools`](Self::get_all_tools). A malformed spec (empty
    /// name or command) rejects the whole batch before anything changes.
    pub async fn initialize(
        &mut self,
        specs: &[ProviderSpec],
    ) -> Result<&[Connection], ConfigError> {
        for spec in specs {
            validate_spec(spec)?;
        }

        if !self.connections.is_empty() {
            warn!("Re-initializing connection manager, releasing previous connections");
            self.cleanup().await;
        }

        for spec in specs {
            match self.connector.connect(spec) {
                Ok(session) => {
                    info!("Prepared provider {} ({})", spec.name, spec.command_line());
                    self.connections.push(Connection::new(spec.clone(), session));
                }
                Err(e) => {
                    error!("Failed to set up provider {}: {}", spec.name, e);
                }
            }
        }

        Ok(&self.connections)
    }

    /// Open every connection not opened yet and collect all tools.
    ///
    /// A provider that fails to open or list contributes nothing but stays
    /// tracked so that [`cleanup`](Self::cleanup) still releases it.
    pub async fn get_all_tools(&mut self) -> Vec<ToolDescriptor> {
        let mut all_tools = Vec::new();

        for (index, connection) in self.connections.iter().enumerate() {
            let mut session = connection.session.lock().await;

            if !self.active.contains(&index) {
                self.active.push(index);
                if let Err(e) = session.open().await {
                    error!("Failed to open provider {}: {}", connection.name(), e);
                    continue;
                }
                info!("Connected to provider {}", connection.name());
            }

            match session.list_tools().await {
                Ok(tools) => {
                    info!("Provider {} offers {} tools", connection.name(), tools.len());
                    all_tools.extend(tools.into_iter().map(|t| ToolDescriptor::new(t, connection)));
                }
                Err(e) => {
                    error!("Failed to list tools from {}: {}", connection.name(), e);
                }
            }
        }

        info!("Aggregated {} tools from {} providers", all_tools.len(), self.connections.len());
        self.tools = all_tools.clone();
        all_tools
    }

    /// Probe every known provider with a throwaway session.
    ///
    /// The probe never touches the tracked connections; each probe
    /// session is closed before moving on.
    pub async fn health_check(&self) -> BTreeMap<usize, bool> {
        let mut status = BTreeMap::new();

        for (index, connection) in self.connections.iter().enumerate() {
            let healthy = match self.connector.connect(connection.spec()) {
                Ok(mut probe) => match probe_session(probe.as_mut()).await {
                    Ok(count) => {
                        debug!("Provider {} healthy ({} tools)", connection.name(), count);
                        true
                    }
                    Err(e) => {
                        error!("Health check failed for {}: {}", connection.name(), e);
                        false
                    }
                },
                Err(e) => {
                    error!("Health check could not reach {}: {}", connection.name(), e);
                    false
                }
            };
            status.insert(index, healthy);
        }

        status
    }

    /// Close every opened connection and return to the empty state.
    ///
    /// Safe to call repeatedly and before [`initialize`](Self::initialize).
    pub async fn cleanup(&mut self) {
        for index in self.active.drain(..) {
            let Some(connection) = self.connections.get(index) else {
                continue;
            };
            if let Err(e) = connection.session.lock().await.close().await {
                error!("Failed to close provider {}: {}", connection.name(), e);
            } else {
                debug!("Closed provider {}", connection.name());
            }
        }

        let released = self.connections.len();
        self.connections.clear();
        self.tools.clear();
        if released > 0 {
            info!("Released {} provider connections", released);
        }
    }

    pub fn connections(&self) -> &[Connection] {
        &self.connections
    }

    /// Tools from the most recent aggregation.
    pub fn tools(&self) -> &[ToolDescriptor] {
        &self.tools
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }
}
