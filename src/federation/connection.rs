use std::sync::{Arc, Weak};
use std::time::Instant;

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use crate::catalog::JsonObject;
use crate::config::EndpointConfig;
use crate::federation::transport::{RemoteSession, RemoteTool, RemoteTransport, TransportError};
use crate::telemetry::{now_ms, TelemetryCollector, TelemetryEvent, TelemetryEventType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Read-only snapshot of one endpoint, recomputed on every request.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointInfo {
    pub id: String,
    pub name: String,
    pub url: String,
    pub status: ConnectionStatus,
    pub remote_tools: Vec<RemoteTool>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("endpoint {0} is not connected")]
    NotConnected(String),
    #[error(transparent)]
    Remote(#[from] TransportError),
}

struct PendingReconnect {
    id: u64,
    cancel: CancellationToken,
}

struct State {
    status: ConnectionStatus,
    tools: Vec<RemoteTool>,
    /// Present only while connected. An attempt in flight owns its session
    /// until it settles.
    session: Option<Arc<dyn RemoteSession>>,
    /// Present only while a retry is scheduled and status is not connected.
    reconnect: Option<PendingReconnect>,
    /// Bumped by every connect and disconnect. An attempt whose generation is
    /// stale when it settles is discarded.
    generation: u64,
    next_timer_id: u64,
}

impl State {
    fn cancel_reconnect(&mut self) {
        if let Some(pending) = self.reconnect.take() {
            pending.cancel.cancel();
        }
    }
}

struct Inner {
    config: EndpointConfig,
    transport: Arc<dyn RemoteTransport>,
    telemetry: Arc<dyn TelemetryCollector>,
    state: Mutex<State>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.state.get_mut().cancel_reconnect();
    }
}

/// The session lifecycle of a single remote endpoint.
///
/// Cheap to clone; clones share state. All mutation goes through
/// [`connect`](Self::connect), [`disconnect`](Self::disconnect) and the
/// reconnect timer, and a `disconnect` always wins over an attempt that was
/// still in flight when it was issued.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

/// How an attempt ended, decided under the lock and acted on outside it.
enum Settled {
    Superseded(Option<Arc<dyn RemoteSession>>),
    Connected(usize),
    Failed(String, bool),
}

impl Connection {
    pub fn new(
        config: EndpointConfig,
        transport: Arc<dyn RemoteTransport>,
        telemetry: Arc<dyn TelemetryCollector>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                transport,
                telemetry,
                state: Mutex::new(State {
                    status: ConnectionStatus::Disconnected,
                    tools: Vec::new(),
                    session: None,
                    reconnect: None,
                    generation: 0,
                    next_timer_id: 0,
                }),
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.config.id
    }

    /// Display name, falling back to the id.
    pub fn name(&self) -> &str {
        self.inner.config.display_name()
    }

    pub fn config(&self) -> &EndpointConfig {
        &self.inner.config
    }

    pub fn status(&self) -> ConnectionStatus {
        self.inner.state.lock().status
    }

    pub fn is_connected(&self) -> bool {
        self.status() == ConnectionStatus::Connected
    }

    /// The remote catalog as of the last successful connect. Empty otherwise.
    pub fn tools(&self) -> Vec<RemoteTool> {
        self.inner.state.lock().tools.clone()
    }

    pub fn has_pending_reconnect(&self) -> bool {
        self.inner.state.lock().reconnect.is_some()
    }

    pub fn info(&self) -> EndpointInfo {
        let state = self.inner.state.lock();
        EndpointInfo {
            id: self.inner.config.id.clone(),
            name: self.name().to_string(),
            url: self.inner.config.url.clone(),
            status: state.status,
            remote_tools: state.tools.clone(),
        }
    }

    /// Open a session and fetch the remote tool catalog.
    ///
    /// Never fails: the outcome is visible through [`status`](Self::status)
    /// and telemetry. A failed attempt schedules one retry when the endpoint
    /// allows reconnecting.
    pub async fn connect(&self) {
        let generation = {
            let mut state = self.inner.state.lock();
            if state.status == ConnectionStatus::Connected {
                return;
            }
            state.cancel_reconnect();
            state.generation += 1;
            state.status = ConnectionStatus::Connecting;
            state.generation
        };

        let started_at = now_ms();
        let started = Instant::now();
        let outcome = self.establish().await;
        let duration_ms = started.elapsed().as_millis() as u64;

        let settled = {
            let mut state = self.inner.state.lock();
            if state.generation != generation {
                Settled::Superseded(outcome.ok().map(|(session, _)| session))
            } else {
                match outcome {
                    Ok((session, tools)) => {
                        let count = tools.len();
                        state.session = Some(session);
                        state.tools = tools;
                        state.status = ConnectionStatus::Connected;
                        Settled::Connected(count)
                    }
                    Err(e) => {
                        state.status = ConnectionStatus::Error;
                        let retry = self.inner.config.reconnect;
                        if retry {
                            self.schedule_reconnect(&mut state);
                        }
                        Settled::Failed(e.to_string(), retry)
                    }
                }
            }
        };

        let config = &self.inner.config;
        match settled {
            Settled::Superseded(session) => {
                tracing::debug!(endpoint = %config.id, "discarding superseded connection attempt");
                if let Some(session) = session {
                    let _ = session.close().await;
                }
            }
            Settled::Connected(count) => {
                tracing::info!(endpoint = %config.id, url = %config.url, tools = count, "endpoint connected");
                self.inner.telemetry.record_event(
                    TelemetryEvent::new(TelemetryEventType::EndpointConnect, self.name())
                        .at(started_at)
                        .with_duration_ms(duration_ms)
                        .with_data(json!({
                            "id": config.id,
                            "url": config.url,
                            "remoteToolCount": count,
                        })),
                );
            }
            Settled::Failed(error, retry) => {
                if retry {
                    tracing::warn!(
                        endpoint = %config.id,
                        url = %config.url,
                        error = %error,
                        retry_in_ms = config.reconnect_interval_ms,
                        "endpoint connection failed, retry scheduled"
                    );
                } else {
                    tracing::warn!(endpoint = %config.id, url = %config.url, error = %error, "endpoint connection failed");
                }
                self.inner.telemetry.record_event(
                    TelemetryEvent::new(TelemetryEventType::EndpointError, self.name())
                        .at(started_at)
                        .with_error(error)
                        .with_data(json!({ "id": config.id, "url": config.url })),
                );
            }
        }
    }

    /// Tear down the session and cancel any scheduled retry.
    ///
    /// Idempotent, and never fails: errors while closing the session are
    /// logged and dropped.
    pub async fn disconnect(&self) {
        let session = {
            let mut state = self.inner.state.lock();
            state.cancel_reconnect();
            state.generation += 1;
            state.tools.clear();
            state.status = ConnectionStatus::Disconnected;
            state.session.take()
        };

        if let Some(session) = session {
            if let Err(e) = session.close().await {
                tracing::debug!(endpoint = %self.id(), error = %e, "ignoring close error");
            }
        }

        tracing::info!(endpoint = %self.id(), "endpoint disconnected");
        self.inner.telemetry.record_event(
            TelemetryEvent::new(TelemetryEventType::EndpointDisconnect, self.name())
                .with_data(json!({ "id": self.id() })),
        );
    }

    /// Forward a tool call to the remote endpoint.
    ///
    /// Fails immediately, without touching the network, unless connected.
    pub async fn call_tool(&self, name: &str, arguments: JsonObject) -> Result<Value, ConnectionError> {
        let session = {
            let state = self.inner.state.lock();
            match (state.status, &state.session) {
                (ConnectionStatus::Connected, Some(session)) => session.clone(),
                _ => return Err(ConnectionError::NotConnected(self.id().to_string())),
            }
        };
        Ok(session.call_tool(name.to_string(), arguments).await?)
    }

    async fn establish(&self) -> Result<(Arc<dyn RemoteSession>, Vec<RemoteTool>), TransportError> {
        let config = &self.inner.config;
        let attempt = async {
            let session = self.inner.transport.open(config).await?;
            match session.list_tools().await {
                Ok(tools) => Ok((session, tools)),
                Err(e) => {
                    let _ = session.close().await;
                    Err(e)
                }
            }
        };

        match config.connect_timeout() {
            Some(limit) => tokio::time::timeout(limit, attempt).await.map_err(|_| {
                TransportError::Connect(format!("connect timed out after {} ms", limit.as_millis()))
            })?,
            None => attempt.await,
        }
    }

    /// Arm the retry timer unless one is already pending.
    fn schedule_reconnect(&self, state: &mut State) {
        if state.reconnect.is_some() {
            return;
        }
        state.next_timer_id += 1;
        let id = state.next_timer_id;
        let cancel = CancellationToken::new();
        state.reconnect = Some(PendingReconnect {
            id,
            cancel: cancel.clone(),
        });

        let delay = self.inner.config.reconnect_interval();
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
            let Some(inner) = weak.upgrade() else {
                return;
            };
            {
                let mut state = inner.state.lock();
                match &state.reconnect {
                    Some(pending) if pending.id == id => state.reconnect = None,
                    _ => return,
                }
            }
            Connection { inner }.connect().await;
        });
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id())
            .field("url", &self.inner.config.url)
            .field("status", &self.status())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::federation::transport::testing::{Behavior, MockTransport};
    use crate::telemetry::MemoryTelemetry;
    use std::time::Duration;
    use tokio::sync::Notify;

    const UP: &str = "http://up.test/mcp";
    const DOWN: &str = "http://down.test/mcp";

    struct Harness {
        transport: Arc<MockTransport>,
        telemetry: Arc<MemoryTelemetry>,
    }

    impl Harness {
        fn new() -> Self {
            Self::with_transport(MockTransport::new())
        }

        fn with_transport(transport: MockTransport) -> Self {
            transport.set(
                UP,
                Behavior::Serve(vec![
                    RemoteTool::new("echo", Some("Echoes input")),
                    RemoteTool::new("explode", None),
                ]),
            );
            Self {
                transport: Arc::new(transport),
                telemetry: Arc::new(MemoryTelemetry::new()),
            }
        }

        fn connection(&self, config: EndpointConfig) -> Connection {
            Connection::new(config, self.transport.clone(), self.telemetry.clone())
        }
    }

    async fn yield_until(mut cond: impl FnMut() -> bool) {
        for _ in 0..1000 {
            if cond() {
                return;
            }
            tokio::task::yield_now().await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn starts_disconnected_with_no_tools() {
        let h = Harness::new();
        let conn = h.connection(EndpointConfig::new("a", UP));
        assert_eq!(conn.status(), ConnectionStatus::Disconnected);
        assert!(conn.tools().is_empty());
        assert!(!conn.has_pending_reconnect());

        let info = conn.info();
        assert_eq!(info.id, "a");
        assert_eq!(info.name, "a");
        assert_eq!(info.url, UP);
        assert_eq!(info.status, ConnectionStatus::Disconnected);
        assert!(info.remote_tools.is_empty());
    }

    #[tokio::test]
    async fn name_prefers_display_name() {
        let h = Harness::new();
        let conn = h.connection(EndpointConfig::new("a", UP).with_name("Alpha"));
        assert_eq!(conn.name(), "Alpha");
        assert_eq!(conn.info().name, "Alpha");
    }

    #[tokio::test]
    async fn connect_success_stores_catalog_and_records_event() {
        let h = Harness::new();
        let conn = h.connection(EndpointConfig::new("a", UP));
        conn.connect().await;

        assert_eq!(conn.status(), ConnectionStatus::Connected);
        let names: Vec<_> = conn.tools().into_iter().map(|t| t.name).collect();
        assert_eq!(names, vec!["echo", "explode"]);

        let events = h.telemetry.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, TelemetryEventType::EndpointConnect);
        assert!(events[0].duration_ms.is_some());
        let data = events[0].data.as_ref().unwrap();
        assert_eq!(data["remoteToolCount"], 2);
        assert_eq!(data["url"], UP);
    }

    #[tokio::test]
    async fn connect_when_connected_is_a_noop() {
        let h = Harness::new();
        let conn = h.connection(EndpointConfig::new("a", UP));
        conn.connect().await;
        conn.connect().await;
        assert_eq!(h.transport.opens(), 1);
        assert_eq!(h.telemetry.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn unreachable_endpoint_errors_and_schedules_one_retry() {
        let h = Harness::new();
        let conn = h.connection(EndpointConfig::new("a", DOWN));
        conn.connect().await;

        assert_eq!(conn.status(), ConnectionStatus::Error);
        assert!(conn.has_pending_reconnect());
        assert!(conn.tools().is_empty());

        let events = h.telemetry.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, TelemetryEventType::EndpointError);
        assert_eq!(events[0].data.as_ref().unwrap()["url"], DOWN);
        assert!(events[0].error.as_deref().unwrap().contains("connection refused"));

        conn.disconnect().await;
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_disabled_stays_in_error() {
        let h = Harness::new();
        let conn = h.connection(EndpointConfig::new("a", DOWN).with_reconnect(false));
        conn.connect().await;

        assert_eq!(conn.status(), ConnectionStatus::Error);
        assert!(!conn.has_pending_reconnect());

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(h.transport.opens(), 1);
        assert_eq!(conn.status(), ConnectionStatus::Error);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_chain_until_the_endpoint_comes_up() {
        let h = Harness::new();
        let conn = h.connection(EndpointConfig::new("a", DOWN).with_reconnect_interval_ms(1000));
        conn.connect().await;
        assert_eq!(h.transport.opens(), 1);

        tokio::time::sleep(Duration::from_millis(1001)).await;
        assert_eq!(h.transport.opens(), 2);
        assert_eq!(conn.status(), ConnectionStatus::Error);
        assert!(conn.has_pending_reconnect());

        h.transport.set(DOWN, Behavior::Serve(vec![RemoteTool::new("late", None)]));
        tokio::time::sleep(Duration::from_millis(1000)).await;
        yield_until(|| conn.is_connected()).await;

        assert_eq!(h.transport.opens(), 3);
        assert!(!conn.has_pending_reconnect());
        assert_eq!(conn.tools()[0].name, "late");
        assert_eq!(h.telemetry.events_of(TelemetryEventType::EndpointError).len(), 2);
        assert_eq!(h.telemetry.events_of(TelemetryEventType::EndpointConnect).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn manual_connect_does_not_duplicate_pending_retry() {
        let h = Harness::new();
        let conn = h.connection(EndpointConfig::new("a", DOWN).with_reconnect_interval_ms(1000));
        conn.connect().await;
        conn.connect().await;
        assert_eq!(h.transport.opens(), 2);
        assert!(conn.has_pending_reconnect());

        // Exactly one timer fires per interval.
        tokio::time::sleep(Duration::from_millis(1001)).await;
        assert_eq!(h.transport.opens(), 3);

        conn.disconnect().await;
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_cancels_pending_retry() {
        let h = Harness::new();
        let conn = h.connection(EndpointConfig::new("a", DOWN).with_reconnect_interval_ms(1000));
        conn.connect().await;
        conn.disconnect().await;

        assert_eq!(conn.status(), ConnectionStatus::Disconnected);
        assert!(!conn.has_pending_reconnect());

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(h.transport.opens(), 1);
        assert_eq!(conn.status(), ConnectionStatus::Disconnected);
    }

    #[tokio::test]
    async fn disconnect_is_idempotent() {
        let h = Harness::new();
        let conn = h.connection(EndpointConfig::new("a", UP));
        conn.disconnect().await;
        conn.disconnect().await;
        assert_eq!(conn.status(), ConnectionStatus::Disconnected);
        assert_eq!(
            h.telemetry.events_of(TelemetryEventType::EndpointDisconnect).len(),
            2
        );
    }

    #[tokio::test]
    async fn disconnect_clears_session_and_catalog() {
        let h = Harness::new();
        let conn = h.connection(EndpointConfig::new("a", UP));
        conn.connect().await;
        conn.disconnect().await;

        assert_eq!(conn.status(), ConnectionStatus::Disconnected);
        assert!(conn.tools().is_empty());
        assert_eq!(h.transport.closes(), 1);
        assert!(matches!(
            conn.call_tool("echo", JsonObject::new()).await,
            Err(ConnectionError::NotConnected(_))
        ));
    }

    #[tokio::test]
    async fn disconnect_swallows_close_errors() {
        let h = Harness::with_transport(MockTransport::failing_close());
        let conn = h.connection(EndpointConfig::new("a", UP));
        conn.connect().await;
        conn.disconnect().await;
        assert_eq!(h.transport.closes(), 1);
        assert_eq!(conn.status(), ConnectionStatus::Disconnected);
    }

    #[tokio::test]
    async fn disconnect_wins_over_in_flight_connect() {
        let h = Harness::new();
        let gate = Arc::new(Notify::new());
        h.transport.set(
            "http://slow.test/mcp",
            Behavior::Gated(gate.clone(), vec![RemoteTool::new("slow", None)]),
        );
        let conn = h.connection(EndpointConfig::new("slow", "http://slow.test/mcp"));

        let attempt = tokio::spawn({
            let conn = conn.clone();
            async move { conn.connect().await }
        });
        yield_until(|| conn.status() == ConnectionStatus::Connecting).await;

        conn.disconnect().await;
        gate.notify_one();
        attempt.await.unwrap();

        assert_eq!(conn.status(), ConnectionStatus::Disconnected);
        assert!(conn.tools().is_empty());
        // The late session was closed rather than adopted.
        assert_eq!(h.transport.closes(), 1);
        assert!(h
            .telemetry
            .events_of(TelemetryEventType::EndpointConnect)
            .is_empty());
    }

    #[tokio::test]
    async fn catalog_failure_is_a_connection_failure() {
        let h = Harness::new();
        h.transport.set("http://broken.test/mcp", Behavior::BrokenCatalog);
        let conn = h.connection(
            EndpointConfig::new("b", "http://broken.test/mcp").with_reconnect(false),
        );
        conn.connect().await;

        assert_eq!(conn.status(), ConnectionStatus::Error);
        assert!(conn.tools().is_empty());
        assert_eq!(h.transport.closes(), 1);
        let errors = h.telemetry.events_of(TelemetryEventType::EndpointError);
        assert!(errors[0].error.as_deref().unwrap().contains("listing tools failed"));
    }

    #[tokio::test(start_paused = true)]
    async fn connect_timeout_abandons_hung_attempt() {
        let h = Harness::new();
        h.transport.set("http://hang.test/mcp", Behavior::Hang);
        let conn = h.connection(
            EndpointConfig::new("h", "http://hang.test/mcp")
                .with_reconnect(false)
                .with_connect_timeout_ms(50),
        );
        conn.connect().await;

        assert_eq!(conn.status(), ConnectionStatus::Error);
        let errors = h.telemetry.events_of(TelemetryEventType::EndpointError);
        assert!(errors[0].error.as_deref().unwrap().contains("timed out after 50 ms"));
    }

    #[tokio::test]
    async fn call_tool_requires_connection() {
        let h = Harness::new();
        let conn = h.connection(EndpointConfig::new("a", DOWN).with_reconnect(false));

        let err = conn.call_tool("echo", JsonObject::new()).await.unwrap_err();
        assert!(err.to_string().contains("not connected"));

        conn.connect().await;
        assert_eq!(conn.status(), ConnectionStatus::Error);
        let err = conn.call_tool("echo", JsonObject::new()).await.unwrap_err();
        assert!(matches!(err, ConnectionError::NotConnected(ref id) if id == "a"));

        assert!(h.transport.calls.lock().is_empty());
        assert!(h
            .telemetry
            .events()
            .iter()
            .all(|e| e.event_type == TelemetryEventType::EndpointError));
    }

    #[tokio::test]
    async fn call_tool_forwards_arguments_and_result() {
        let h = Harness::new();
        let conn = h.connection(EndpointConfig::new("a", UP));
        conn.connect().await;

        let mut args = JsonObject::new();
        args.insert("text".into(), json!("hi"));
        let result = conn.call_tool("echo", args.clone()).await.unwrap();
        assert_eq!(result["content"][0]["text"], "echo called");
        assert_eq!(result["arguments"]["text"], "hi");

        let calls = h.transport.calls.lock().clone();
        assert_eq!(calls, vec![("echo".to_string(), args)]);
    }

    #[tokio::test]
    async fn remote_failure_propagates() {
        let h = Harness::new();
        let conn = h.connection(EndpointConfig::new("a", UP));
        conn.connect().await;

        let err = conn.call_tool("explode", JsonObject::new()).await.unwrap_err();
        assert!(matches!(
            err,
            ConnectionError::Remote(TransportError::Call(ref msg)) if msg == "remote tool exploded"
        ));
        assert_eq!(conn.status(), ConnectionStatus::Connected);
    }

    #[test]
    fn info_serializes_for_dashboards() {
        let h = Harness::new();
        let conn = h.connection(EndpointConfig::new("a", UP).with_name("Alpha"));
        let json = serde_json::to_value(conn.info()).unwrap();
        assert_eq!(json["status"], "disconnected");
        assert_eq!(json["name"], "Alpha");
        assert!(json["remoteTools"].as_array().unwrap().is_empty());
    }
}
