//! Structured telemetry events and the sinks that record them.
//!
//! Everything in the cell reports through a [`TelemetryCollector`]. Recording
//! is best-effort and never fails the caller.

pub mod wrap;

use std::time::{SystemTime, UNIX_EPOCH};

use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{Map, Value};

pub use wrap::{wrap_prompt, wrap_resource, wrap_tool};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum TelemetryEventType {
    #[serde(rename = "cell.start")]
    CellStart,
    #[serde(rename = "cell.stop")]
    CellStop,
    #[serde(rename = "tool.execute")]
    ToolExecute,
    #[serde(rename = "tool.error")]
    ToolError,
    #[serde(rename = "resource.load")]
    ResourceLoad,
    #[serde(rename = "resource.error")]
    ResourceError,
    #[serde(rename = "prompt.load")]
    PromptLoad,
    #[serde(rename = "prompt.error")]
    PromptError,
    #[serde(rename = "endpoint.connect")]
    EndpointConnect,
    #[serde(rename = "endpoint.disconnect")]
    EndpointDisconnect,
    #[serde(rename = "endpoint.error")]
    EndpointError,
    #[serde(rename = "session.connect")]
    SessionConnect,
    #[serde(rename = "session.disconnect")]
    SessionDisconnect,
}

impl TelemetryEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CellStart => "cell.start",
            Self::CellStop => "cell.stop",
            Self::ToolExecute => "tool.execute",
            Self::ToolError => "tool.error",
            Self::ResourceLoad => "resource.load",
            Self::ResourceError => "resource.error",
            Self::PromptLoad => "prompt.load",
            Self::PromptError => "prompt.error",
            Self::EndpointConnect => "endpoint.connect",
            Self::EndpointDisconnect => "endpoint.disconnect",
            Self::EndpointError => "endpoint.error",
            Self::SessionConnect => "session.connect",
            Self::SessionDisconnect => "session.disconnect",
        }
    }
}

impl std::fmt::Display for TelemetryEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single append-only telemetry record.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryEvent {
    pub name: String,
    #[serde(rename = "type")]
    pub event_type: TelemetryEventType,
    /// Milliseconds since the Unix epoch.
    pub timestamp: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Map<String, Value>>,
}

impl TelemetryEvent {
    /// Event stamped with the current wall-clock time.
    pub fn new(event_type: TelemetryEventType, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            event_type,
            timestamp: now_ms(),
            duration_ms: None,
            error: None,
            data: None,
        }
    }

    pub fn at(mut self, timestamp: u64) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    /// Attach a data payload. Non-object values are ignored.
    pub fn with_data(mut self, data: Value) -> Self {
        if let Value::Object(map) = data {
            self.data = Some(map);
        }
        self
    }
}

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// A write-only sink for telemetry events.
pub trait TelemetryCollector: Send + Sync {
    fn record_event(&self, event: TelemetryEvent);

    /// Push out anything buffered. Called once when the cell stops.
    fn flush(&self) -> BoxFuture<'_, ()> {
        Box::pin(async {})
    }
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTelemetry;

impl TelemetryCollector for NoopTelemetry {
    fn record_event(&self, _event: TelemetryEvent) {}
}

/// Writes each event through `tracing` as a single JSON line.
#[derive(Debug, Clone)]
pub struct LogTelemetry {
    prefix: String,
}

impl LogTelemetry {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// The line logged for `event`, without the tracing envelope.
    pub fn format(&self, event: &TelemetryEvent) -> String {
        let json = serde_json::to_string(event).unwrap_or_default();
        format!("{} {} {}", self.prefix, event.event_type, json)
    }
}

impl Default for LogTelemetry {
    fn default() -> Self {
        Self::new("[soma]")
    }
}

impl TelemetryCollector for LogTelemetry {
    fn record_event(&self, event: TelemetryEvent) {
        let line = self.format(&event);
        if event.error.is_some() {
            tracing::error!(target: "soma::telemetry", "{line}");
        } else {
            tracing::info!(target: "soma::telemetry", "{line}");
        }
    }
}

/// Keeps every event in memory, in arrival order.
#[derive(Debug, Default)]
pub struct MemoryTelemetry {
    events: Mutex<Vec<TelemetryEvent>>,
}

impl MemoryTelemetry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<TelemetryEvent> {
        self.events.lock().clone()
    }

    pub fn events_of(&self, event_type: TelemetryEventType) -> Vec<TelemetryEvent> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.event_type == event_type)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl TelemetryCollector for MemoryTelemetry {
    fn record_event(&self, event: TelemetryEvent) {
        self.events.lock().push(event);
    }
}
