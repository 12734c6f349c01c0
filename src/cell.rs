//! The cell: a host that serves local tools, resources and prompts over MCP
//! and re-exposes the tools of connected remote endpoints.
//!
//! ```no_run
//! # async fn run() -> Result<(), soma::cell::CellError> {
//! use soma::catalog::ToolDef;
//! use soma::cell::{Cell, CellOptions};
//!
//! let cell = Cell::new(CellOptions::new("demo"));
//! cell.add_tool(ToolDef::new("ping", |_| async { Ok("pong".to_string()) }));
//! let addr = cell.start("127.0.0.1:3000".parse().unwrap()).await?;
//! println!("serving on http://{addr}/mcp");
//! cell.stop().await?;
//! # Ok(())
//! # }
//! ```

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::json;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::api::artifacts::Artifact;
use crate::api::{self, dashboard, AppState};
use crate::catalog::{Catalog, PromptDef, ResourceDef, ToolDef};
use crate::config::{resolve_cell_name, CellConfig, EndpointConfig, TelemetrySink};
use crate::federation::{
    create_proxied_tools, ConnectionRegistry, EndpointInfo, HttpTransport, RemoteTransport,
};
use crate::mcp::introspection;
use crate::telemetry::{
    now_ms, wrap_prompt, wrap_resource, wrap_tool, LogTelemetry, NoopTelemetry, TelemetryCollector,
    TelemetryEvent, TelemetryEventType,
};

/// How long `stop` waits for in-flight HTTP connections before aborting them.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum CellError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("cell is already running")]
    AlreadyRunning,
    #[error("cell is not running")]
    NotRunning,
    #[error("server error: {0}")]
    Serve(#[source] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CellStatus {
    Running,
    Stopped,
    Error,
}

impl CellStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EndpointCounts {
    pub connected: usize,
    pub total: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CellHealth {
    pub name: String,
    pub status: CellStatus,
    /// Milliseconds since the Unix epoch; 0 if never started.
    pub started_at: u64,
    /// Milliseconds.
    pub uptime: u64,
    pub active_sessions: usize,
    pub endpoints: EndpointCounts,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CapabilityEntry {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceCapability {
    pub name: String,
    pub uri: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// What the cell's owner registered. Built-in and proxied tools are not
/// listed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CellCapabilities {
    pub tools: Vec<CapabilityEntry>,
    pub resources: Vec<ResourceCapability>,
    pub prompts: Vec<CapabilityEntry>,
}

fn upsert<T>(entries: &mut Vec<T>, entry: T, same: impl Fn(&T, &T) -> bool) {
    match entries.iter_mut().find(|e| same(e, &entry)) {
        Some(existing) => *existing = entry,
        None => entries.push(entry),
    }
}

#[derive(Debug, Clone, Copy)]
struct Lifecycle {
    status: CellStatus,
    started_at: u64,
}

/// Name, version and usage instructions announced to MCP clients.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellIdentity {
    pub name: String,
    pub version: String,
    pub instructions: Option<String>,
}

/// Live facts about a cell, shared with everything that reports on it.
///
/// Holds no reference to the catalog, so tools that report health can live
/// inside the catalog without forming a cycle.
#[derive(Clone)]
pub struct CellMonitor {
    name: Arc<str>,
    lifecycle: Arc<RwLock<Lifecycle>>,
    sessions: Arc<AtomicUsize>,
    next_session_id: Arc<AtomicU64>,
    capabilities: Arc<RwLock<CellCapabilities>>,
    registry: ConnectionRegistry,
}

impl CellMonitor {
    fn new(name: &str, registry: ConnectionRegistry) -> Self {
        Self {
            name: Arc::from(name),
            lifecycle: Arc::new(RwLock::new(Lifecycle {
                status: CellStatus::Stopped,
                started_at: 0,
            })),
            sessions: Arc::new(AtomicUsize::new(0)),
            next_session_id: Arc::new(AtomicU64::new(1)),
            capabilities: Arc::new(RwLock::new(CellCapabilities::default())),
            registry,
        }
    }

    pub fn health(&self) -> CellHealth {
        let lifecycle = *self.lifecycle.read();
        let uptime = if lifecycle.started_at > 0 {
            now_ms().saturating_sub(lifecycle.started_at)
        } else {
            0
        };
        CellHealth {
            name: self.name.to_string(),
            status: lifecycle.status,
            started_at: lifecycle.started_at,
            uptime,
            active_sessions: self.active_sessions(),
            endpoints: EndpointCounts {
                connected: self.registry.connected_count(),
                total: self.registry.total_count(),
            },
        }
    }

    pub fn capabilities(&self) -> CellCapabilities {
        self.capabilities.read().clone()
    }

    pub fn connections(&self) -> Vec<EndpointInfo> {
        self.registry.info_all()
    }

    pub fn active_sessions(&self) -> usize {
        self.sessions.load(Ordering::Acquire)
    }

    /// Count a new MCP session and hand out its id.
    pub fn session_opened(&self) -> u64 {
        self.sessions.fetch_add(1, Ordering::AcqRel);
        self.next_session_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn session_closed(&self) {
        let _ = self
            .sessions
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }

    fn set_status(&self, status: CellStatus) {
        self.lifecycle.write().status = status;
    }

    fn mark_started(&self, started_at: u64) {
        let mut lifecycle = self.lifecycle.write();
        lifecycle.started_at = started_at;
        lifecycle.status = CellStatus::Running;
    }
}

pub struct CellOptions {
    pub name: String,
    pub version: String,
    pub instructions: Option<String>,
    pub endpoints: Vec<EndpointConfig>,
    pub telemetry: Arc<dyn TelemetryCollector>,
    pub transport: Arc<dyn RemoteTransport>,
    pub enable_introspection: bool,
    pub enable_dashboard: bool,
    pub artifacts: Vec<Artifact>,
}

impl CellOptions {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            instructions: None,
            endpoints: Vec::new(),
            telemetry: Arc::new(NoopTelemetry),
            transport: Arc::new(HttpTransport),
            enable_introspection: true,
            enable_dashboard: true,
            artifacts: Vec::new(),
        }
    }

    /// Options as described by a config file.
    pub fn from_config(config: &CellConfig) -> Self {
        let telemetry: Arc<dyn TelemetryCollector> = match config.telemetry.sink {
            TelemetrySink::Log => Arc::new(LogTelemetry::new(config.telemetry.prefix.clone())),
            TelemetrySink::None => Arc::new(NoopTelemetry),
        };
        let mut options = Self::new(resolve_cell_name(&config.server))
            .with_telemetry(telemetry)
            .with_introspection(config.server.introspection)
            .with_dashboard(config.server.dashboard);
        if let Some(version) = &config.server.version {
            options.version = version.clone();
        }
        options.instructions = config.server.instructions.clone();
        options.endpoints = config.endpoints.clone();
        options
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    pub fn with_endpoint(mut self, endpoint: EndpointConfig) -> Self {
        self.endpoints.push(endpoint);
        self
    }

    pub fn with_telemetry(mut self, telemetry: Arc<dyn TelemetryCollector>) -> Self {
        self.telemetry = telemetry;
        self
    }

    pub fn with_transport(mut self, transport: Arc<dyn RemoteTransport>) -> Self {
        self.transport = transport;
        self
    }

    pub fn with_introspection(mut self, enabled: bool) -> Self {
        self.enable_introspection = enabled;
        self
    }

    pub fn with_dashboard(mut self, enabled: bool) -> Self {
        self.enable_dashboard = enabled;
        self
    }

    pub fn with_artifact(mut self, artifact: Artifact) -> Self {
        self.artifacts.push(artifact);
        self
    }
}

struct RunningServer {
    addr: SocketAddr,
    shutdown: CancellationToken,
    task: JoinHandle<std::io::Result<()>>,
}

pub struct Cell {
    state: AppState,
    artifacts: Vec<Artifact>,
    /// Names of proxy tools installed by the last `start`.
    proxies: Mutex<Vec<String>>,
    server: Mutex<Option<RunningServer>>,
    /// Serializes `start` and `stop`.
    lifecycle: tokio::sync::Mutex<()>,
}

impl Cell {
    pub fn new(options: CellOptions) -> Self {
        let registry = ConnectionRegistry::with_transport(options.transport, options.telemetry.clone());
        for endpoint in options.endpoints {
            registry.add(endpoint);
        }

        let monitor = CellMonitor::new(&options.name, registry);
        let catalog = Catalog::new();
        if options.enable_introspection {
            for tool in introspection::introspection_tools(&monitor) {
                catalog.insert_tool(tool);
            }
        }

        let mut artifacts = options.artifacts;
        if options.enable_dashboard {
            artifacts.push(dashboard::dashboard_artifact(monitor.clone()));
        }

        Self {
            state: AppState {
                identity: Arc::new(CellIdentity {
                    name: options.name,
                    version: options.version,
                    instructions: options.instructions,
                }),
                catalog,
                monitor,
                telemetry: options.telemetry,
            },
            artifacts,
            proxies: Mutex::new(Vec::new()),
            server: Mutex::new(None),
            lifecycle: tokio::sync::Mutex::new(()),
        }
    }

    pub fn name(&self) -> &str {
        &self.state.identity.name
    }

    pub fn identity(&self) -> &CellIdentity {
        &self.state.identity
    }

    /// Everything currently served: user units, built-ins and proxies.
    pub fn catalog(&self) -> &Catalog {
        &self.state.catalog
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.state.monitor.registry
    }

    pub fn monitor(&self) -> &CellMonitor {
        &self.state.monitor
    }

    pub fn telemetry(&self) -> &Arc<dyn TelemetryCollector> {
        &self.state.telemetry
    }

    pub fn health(&self) -> CellHealth {
        self.state.monitor.health()
    }

    pub fn capabilities(&self) -> CellCapabilities {
        self.state.monitor.capabilities()
    }

    /// Address the HTTP server is bound to, while running.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.server.lock().as_ref().map(|s| s.addr)
    }

    pub fn add_tool(&self, tool: ToolDef) {
        let entry = CapabilityEntry {
            name: tool.name.clone(),
            description: tool.description.clone(),
        };
        self.state
            .catalog
            .insert_tool(wrap_tool(tool, self.state.telemetry.clone()));
        upsert(&mut self.state.monitor.capabilities.write().tools, entry, |a, b| {
            a.name == b.name
        });
    }

    pub fn add_tools(&self, tools: impl IntoIterator<Item = ToolDef>) {
        for tool in tools {
            self.add_tool(tool);
        }
    }

    pub fn add_resource(&self, resource: ResourceDef) {
        let entry = ResourceCapability {
            name: resource.name.clone(),
            uri: resource.uri.clone(),
            description: resource.description.clone(),
        };
        self.state
            .catalog
            .insert_resource(wrap_resource(resource, self.state.telemetry.clone()));
        upsert(
            &mut self.state.monitor.capabilities.write().resources,
            entry,
            |a, b| a.uri == b.uri,
        );
    }

    pub fn add_resources(&self, resources: impl IntoIterator<Item = ResourceDef>) {
        for resource in resources {
            self.add_resource(resource);
        }
    }

    pub fn add_prompt(&self, prompt: PromptDef) {
        let entry = CapabilityEntry {
            name: prompt.name.clone(),
            description: prompt.description.clone(),
        };
        self.state
            .catalog
            .insert_prompt(wrap_prompt(prompt, self.state.telemetry.clone()));
        upsert(&mut self.state.monitor.capabilities.write().prompts, entry, |a, b| {
            a.name == b.name
        });
    }

    pub fn add_prompts(&self, prompts: impl IntoIterator<Item = PromptDef>) {
        for prompt in prompts {
            self.add_prompt(prompt);
        }
    }

    pub fn remove_tool(&self, name: &str) -> bool {
        self.state.monitor.capabilities.write().tools.retain(|t| t.name != name);
        self.state.catalog.remove_tool(name)
    }

    /// Remove a resource by name.
    pub fn remove_resource(&self, name: &str) -> bool {
        self.state
            .monitor
            .capabilities
            .write()
            .resources
            .retain(|r| r.name != name);
        self.state.catalog.remove_resource(name)
    }

    pub fn remove_prompt(&self, name: &str) -> bool {
        self.state.monitor.capabilities.write().prompts.retain(|p| p.name != name);
        self.state.catalog.remove_prompt(name)
    }

    pub(crate) fn app_state(&self) -> &AppState {
        &self.state
    }

    /// The full HTTP surface, for embedding in another server or for tests.
    pub fn router(&self) -> axum::Router {
        api::router(self.state.clone(), &self.artifacts)
    }

    /// Bind and serve, then connect every endpoint and install proxies for
    /// those that came up.
    ///
    /// Returns once endpoint connection attempts have settled. Endpoints that
    /// failed keep retrying in the background but get no proxies until the
    /// next start.
    pub async fn start(&self, bind: SocketAddr) -> Result<SocketAddr, CellError> {
        let _guard = self.lifecycle.lock().await;
        if self.server.lock().is_some() {
            return Err(CellError::AlreadyRunning);
        }

        let started_at = now_ms();
        self.state.telemetry.record_event(
            TelemetryEvent::new(TelemetryEventType::CellStart, self.name()).at(started_at),
        );

        let listener = TcpListener::bind(bind)
            .await
            .map_err(|source| CellError::Bind { addr: bind, source })?;
        let addr = listener
            .local_addr()
            .map_err(|source| CellError::Bind { addr: bind, source })?;

        let shutdown = CancellationToken::new();
        let signal = shutdown.clone();
        let monitor = self.state.monitor.clone();
        let router = self.router();
        let task = tokio::spawn(async move {
            let result = axum::serve(listener, router)
                .with_graceful_shutdown(async move { signal.cancelled().await })
                .await;
            if let Err(ref e) = result {
                tracing::error!(error = %e, "cell server failed");
                monitor.set_status(CellStatus::Error);
            }
            result
        });

        self.state.monitor.mark_started(started_at);
        *self.server.lock() = Some(RunningServer {
            addr,
            shutdown,
            task,
        });
        tracing::info!(cell = %self.name(), %addr, "cell listening");

        self.registry().connect_all().await;
        self.install_proxies();

        Ok(addr)
    }

    fn install_proxies(&self) {
        let mut installed = self.proxies.lock();
        for connection in self.registry().all() {
            if !connection.is_connected() || !connection.config().proxy_tools {
                continue;
            }
            let tools = create_proxied_tools(&connection);
            tracing::info!(
                endpoint = %connection.id(),
                tools = tools.len(),
                "installing proxy tools"
            );
            for tool in tools {
                if self.state.catalog.tool(&tool.name).is_some() {
                    tracing::warn!(
                        endpoint = %connection.id(),
                        tool = %tool.name,
                        "skipping proxy tool: name already registered"
                    );
                    continue;
                }
                installed.push(tool.name.clone());
                self.state.catalog.insert_tool(tool);
            }
        }
    }

    /// Disconnect every endpoint, shut the server down and flush telemetry.
    pub async fn stop(&self) -> Result<(), CellError> {
        let _guard = self.lifecycle.lock().await;
        let server = self.server.lock().take().ok_or(CellError::NotRunning)?;

        self.registry().disconnect_all().await;
        for name in self.proxies.lock().drain(..) {
            self.state.catalog.remove_tool(&name);
        }

        server.shutdown.cancel();
        let mut task = server.task;
        let outcome = match tokio::time::timeout(SHUTDOWN_GRACE, &mut task).await {
            Ok(Ok(result)) => result.map_err(CellError::Serve),
            Ok(Err(join_error)) => Err(CellError::Serve(std::io::Error::other(join_error))),
            Err(_) => {
                tracing::warn!(cell = %self.name(), "graceful shutdown timed out, aborting connections");
                task.abort();
                Ok(())
            }
        };

        if outcome.is_ok() {
            self.state.monitor.set_status(CellStatus::Stopped);
        }
        self.state.telemetry.record_event(
            TelemetryEvent::new(TelemetryEventType::CellStop, self.name())
                .with_data(json!({ "uptime": self.health().uptime })),
        );
        self.state.telemetry.flush().await;
        tracing::info!(cell = %self.name(), "cell stopped");
        outcome
    }
}

impl std::fmt::Debug for Cell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cell")
            .field("identity", &self.state.identity)
            .field("addr", &self.local_addr())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{JsonObject, PromptArgs};
    use crate::federation::transport::testing::{Behavior, MockTransport};
    use crate::federation::{ConnectionStatus, RemoteTool};
    use crate::telemetry::MemoryTelemetry;
    use futures::future::BoxFuture;

    fn bind_any() -> SocketAddr {
        "127.0.0.1:0".parse().unwrap()
    }

    fn cell_with(telemetry: Arc<MemoryTelemetry>) -> Cell {
        Cell::new(CellOptions::new("test-cell").with_telemetry(telemetry))
    }

    #[derive(Default)]
    struct FlushCounter {
        flushes: AtomicUsize,
    }

    impl TelemetryCollector for FlushCounter {
        fn record_event(&self, _event: TelemetryEvent) {}

        fn flush(&self) -> BoxFuture<'_, ()> {
            Box::pin(async move {
                self.flushes.fetch_add(1, Ordering::SeqCst);
            })
        }
    }

    #[test]
    fn introspection_tools_are_served_but_not_listed_as_capabilities() {
        let cell = Cell::new(CellOptions::new("c"));
        let names: Vec<_> = cell.catalog().tools().into_iter().map(|t| t.name).collect();
        assert_eq!(names, vec!["soma_health", "soma_capabilities", "soma_connections"]);
        assert!(cell.capabilities().tools.is_empty());
    }

    #[test]
    fn introspection_can_be_disabled() {
        let cell = Cell::new(CellOptions::new("c").with_introspection(false));
        assert!(cell.catalog().tools().is_empty());
    }

    #[tokio::test]
    async fn added_units_are_wrapped_and_recorded() {
        let telemetry = Arc::new(MemoryTelemetry::new());
        let cell = cell_with(telemetry.clone());
        cell.add_tool(
            ToolDef::new("ping", |_| async { Ok("pong".to_string()) }).with_description("Pong"),
        );
        cell.add_resource(
            ResourceDef::new("soma://r", "r", || async { Ok("data".to_string()) })
                .with_description("A resource"),
        );
        cell.add_prompt(PromptDef::new("p", |_: PromptArgs| async { Ok("text".to_string()) }));

        let caps = cell.capabilities();
        assert_eq!(
            caps.tools,
            vec![CapabilityEntry {
                name: "ping".into(),
                description: Some("Pong".into())
            }]
        );
        assert_eq!(caps.resources[0].uri, "soma://r");
        assert_eq!(caps.prompts[0].name, "p");

        let tool = cell.catalog().tool("ping").unwrap();
        assert_eq!(tool.execute(JsonObject::new()).await.unwrap(), "pong");
        cell.catalog().resource("soma://r").unwrap().load().await.unwrap();
        cell.catalog().prompt("p").unwrap().load(PromptArgs::new()).await.unwrap();

        let types: Vec<_> = telemetry.events().iter().map(|e| e.event_type).collect();
        assert_eq!(
            types,
            vec![
                TelemetryEventType::ToolExecute,
                TelemetryEventType::ResourceLoad,
                TelemetryEventType::PromptLoad,
            ]
        );
    }

    #[test]
    fn re_adding_replaces_capability_entry() {
        let cell = Cell::new(CellOptions::new("c"));
        cell.add_tool(ToolDef::new("t", |_| async { Ok(String::new()) }).with_description("v1"));
        cell.add_tool(ToolDef::new("t", |_| async { Ok(String::new()) }).with_description("v2"));
        let caps = cell.capabilities();
        assert_eq!(caps.tools.len(), 1);
        assert_eq!(caps.tools[0].description.as_deref(), Some("v2"));
    }

    #[test]
    fn remove_drops_unit_and_capability() {
        let cell = Cell::new(CellOptions::new("c"));
        cell.add_tools([
            ToolDef::new("a", |_| async { Ok(String::new()) }),
            ToolDef::new("b", |_| async { Ok(String::new()) }),
        ]);
        cell.add_resources([ResourceDef::new("soma://x", "x", || async { Ok(String::new()) })]);
        cell.add_prompts([PromptDef::new("p", |_: PromptArgs| async { Ok(String::new()) })]);

        assert!(cell.remove_tool("a"));
        assert!(!cell.remove_tool("a"));
        assert!(cell.remove_resource("x"));
        assert!(cell.remove_prompt("p"));

        let caps = cell.capabilities();
        assert_eq!(caps.tools.len(), 1);
        assert!(caps.resources.is_empty());
        assert!(caps.prompts.is_empty());
        assert!(cell.catalog().tool("a").is_none());
        assert!(cell.catalog().resource("soma://x").is_none());
    }

    #[test]
    fn health_before_start() {
        let cell = Cell::new(
            CellOptions::new("c")
                .with_endpoint(EndpointConfig::new("a", "http://a.test/mcp"))
                .with_transport(Arc::new(MockTransport::new())),
        );
        let health = cell.health();
        assert_eq!(health.name, "c");
        assert_eq!(health.status, CellStatus::Stopped);
        assert_eq!(health.started_at, 0);
        assert_eq!(health.uptime, 0);
        assert_eq!(health.active_sessions, 0);
        assert_eq!(health.endpoints, EndpointCounts { connected: 0, total: 1 });

        let json = serde_json::to_value(&health).unwrap();
        assert_eq!(json["status"], "stopped");
        assert!(json.get("startedAt").is_some());
        assert!(json.get("activeSessions").is_some());
    }

    #[test]
    fn session_counter_never_underflows() {
        let cell = Cell::new(CellOptions::new("c"));
        let monitor = cell.monitor();
        let first = monitor.session_opened();
        let second = monitor.session_opened();
        assert_ne!(first, second);
        assert_eq!(monitor.active_sessions(), 2);
        monitor.session_closed();
        monitor.session_closed();
        monitor.session_closed();
        assert_eq!(monitor.active_sessions(), 0);
    }

    #[tokio::test]
    async fn start_and_stop_lifecycle() {
        let telemetry = Arc::new(MemoryTelemetry::new());
        let cell = cell_with(telemetry.clone());

        assert!(matches!(cell.stop().await, Err(CellError::NotRunning)));

        let addr = cell.start(bind_any()).await.unwrap();
        assert_ne!(addr.port(), 0);
        assert_eq!(cell.local_addr(), Some(addr));
        let health = cell.health();
        assert_eq!(health.status, CellStatus::Running);
        assert!(health.started_at > 0);

        assert!(matches!(
            cell.start(bind_any()).await,
            Err(CellError::AlreadyRunning)
        ));

        cell.stop().await.unwrap();
        assert_eq!(cell.health().status, CellStatus::Stopped);
        assert!(cell.local_addr().is_none());
        assert!(matches!(cell.stop().await, Err(CellError::NotRunning)));

        let types: Vec<_> = telemetry.events().iter().map(|e| e.event_type).collect();
        assert_eq!(
            types,
            vec![TelemetryEventType::CellStart, TelemetryEventType::CellStop]
        );
    }

    #[tokio::test]
    async fn bind_failure_is_reported() {
        let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = taken.local_addr().unwrap();
        let cell = Cell::new(CellOptions::new("c"));
        assert!(matches!(
            cell.start(addr).await,
            Err(CellError::Bind { .. })
        ));
        assert!(cell.local_addr().is_none());
    }

    #[tokio::test]
    async fn stop_flushes_telemetry() {
        let counter = Arc::new(FlushCounter::default());
        let cell = Cell::new(CellOptions::new("c").with_telemetry(counter.clone()));
        cell.start(bind_any()).await.unwrap();
        cell.stop().await.unwrap();
        assert_eq!(counter.flushes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn start_installs_proxies_for_connected_endpoints() {
        let transport = Arc::new(MockTransport::new());
        transport.set(
            "http://b.test/mcp",
            Behavior::Serve(vec![RemoteTool::new("echo", Some("Echo"))]),
        );
        transport.set(
            "http://c.test/mcp",
            Behavior::Serve(vec![RemoteTool::new("hidden", None)]),
        );
        let cell = Cell::new(
            CellOptions::new("host")
                .with_transport(transport)
                .with_endpoint(EndpointConfig::new("a", "http://down.test/mcp").with_reconnect(false))
                .with_endpoint(EndpointConfig::new("b", "http://b.test/mcp"))
                .with_endpoint(EndpointConfig::new("c", "http://c.test/mcp").with_proxy_tools(false)),
        );

        cell.start(bind_any()).await.unwrap();

        let info = cell.monitor().connections();
        assert_eq!(info[0].status, ConnectionStatus::Error);
        assert_eq!(info[1].status, ConnectionStatus::Connected);
        assert_eq!(info[2].status, ConnectionStatus::Connected);
        assert_eq!(cell.health().endpoints, EndpointCounts { connected: 2, total: 3 });

        let proxy = cell.catalog().tool("b_echo").expect("proxy installed");
        assert_eq!(proxy.description.as_deref(), Some("[b] Echo"));
        assert!(cell.catalog().tool("c_hidden").is_none());
        assert!(cell.capabilities().tools.is_empty());

        cell.stop().await.unwrap();
        assert!(cell.catalog().tool("b_echo").is_none());
        assert_eq!(cell.health().endpoints.connected, 0);
    }

    #[tokio::test]
    async fn proxies_never_displace_registered_tools() {
        let transport = Arc::new(MockTransport::new());
        transport.set(
            "http://b.test/mcp",
            Behavior::Serve(vec![
                RemoteTool::new("echo", Some("Echo")),
                RemoteTool::new("other", None),
            ]),
        );
        let cell = Cell::new(
            CellOptions::new("host")
                .with_transport(transport)
                .with_endpoint(EndpointConfig::new("b", "http://b.test/mcp")),
        );
        cell.add_tool(ToolDef::new("b_echo", |_| async { Ok("local".to_string()) }));

        cell.start(bind_any()).await.unwrap();
        let tool = cell.catalog().tool("b_echo").unwrap();
        assert_eq!(tool.execute(JsonObject::new()).await.unwrap(), "local");
        assert!(cell.catalog().tool("b_other").is_some());

        cell.stop().await.unwrap();
        let tool = cell.catalog().tool("b_echo").expect("user tool survives stop");
        assert_eq!(tool.execute(JsonObject::new()).await.unwrap(), "local");
        assert!(cell.catalog().tool("b_other").is_none());
        let caps: Vec<_> = cell.capabilities().tools.into_iter().map(|t| t.name).collect();
        assert_eq!(caps, vec!["b_echo"]);
    }

    #[test]
    fn options_from_config() {
        let config: CellConfig = toml::from_str(
            r#"
            [server]
            name = "from-file"
            version = "9.9.9"
            instructions = "be nice"
            introspection = false
            dashboard = false

            [telemetry]
            sink = "none"

            [[endpoints]]
            id = "a"
            url = "http://10.0.0.1:3000/mcp"
            "#,
        )
        .unwrap();
        let options = CellOptions::from_config(&config);
        assert_eq!(options.name, "from-file");
        assert_eq!(options.version, "9.9.9");
        assert_eq!(options.instructions.as_deref(), Some("be nice"));
        assert!(!options.enable_introspection);
        assert!(!options.enable_dashboard);
        assert_eq!(options.endpoints.len(), 1);
    }
}
