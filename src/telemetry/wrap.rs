//! Telemetry-recording wrappers for tools, resources and prompts.
//!
//! A wrapped unit keeps its metadata. Its body reports one event per call
//! and hands back the original result or error untouched.

use std::sync::Arc;
use std::time::Instant;

use serde_json::json;

use super::{now_ms, TelemetryCollector, TelemetryEvent, TelemetryEventType};
use crate::catalog::{
    JsonObject, PromptArgs, PromptDef, PromptFuture, ResourceDef, ResourceFuture, ToolDef, ToolFuture,
};

/// Wall-clock start for the event plus a monotonic clock for its duration.
struct CallTimer {
    started_at: u64,
    started: Instant,
}

impl CallTimer {
    fn start() -> Self {
        Self {
            started_at: now_ms(),
            started: Instant::now(),
        }
    }
}

/// Event types for a successful and a failed call.
type Outcomes = (TelemetryEventType, TelemetryEventType);

fn record<T>(
    telemetry: &dyn TelemetryCollector,
    timer: CallTimer,
    outcome: &anyhow::Result<T>,
    (success, failure): Outcomes,
    name: &str,
    data: serde_json::Value,
) {
    let duration_ms = timer.started.elapsed().as_millis() as u64;
    let event = match outcome {
        Ok(_) => TelemetryEvent::new(success, name),
        Err(e) => TelemetryEvent::new(failure, name).with_error(e.to_string()),
    };
    telemetry.record_event(
        event
            .at(timer.started_at)
            .with_duration_ms(duration_ms)
            .with_data(data),
    );
}

pub fn wrap_tool(tool: ToolDef, telemetry: Arc<dyn TelemetryCollector>) -> ToolDef {
    let inner = tool.handler.clone();
    let name = tool.name.clone();
    tool.with_handler(Arc::new(move |args: JsonObject| -> ToolFuture {
        let inner = inner.clone();
        let telemetry = telemetry.clone();
        let name = name.clone();
        Box::pin(async move {
            let timer = CallTimer::start();
            let outcome = inner(args).await;
            record(
                telemetry.as_ref(),
                timer,
                &outcome,
                (TelemetryEventType::ToolExecute, TelemetryEventType::ToolError),
                &name,
                json!({ "name": name }),
            );
            outcome
        })
    }))
}

pub fn wrap_resource(resource: ResourceDef, telemetry: Arc<dyn TelemetryCollector>) -> ResourceDef {
    let inner = resource.loader.clone();
    let name = resource.name.clone();
    let uri = resource.uri.clone();
    resource.with_loader(Arc::new(move || -> ResourceFuture {
        let inner = inner.clone();
        let telemetry = telemetry.clone();
        let name = name.clone();
        let uri = uri.clone();
        Box::pin(async move {
            let timer = CallTimer::start();
            let outcome = inner().await;
            record(
                telemetry.as_ref(),
                timer,
                &outcome,
                (TelemetryEventType::ResourceLoad, TelemetryEventType::ResourceError),
                &name,
                json!({ "name": name, "uri": uri }),
            );
            outcome
        })
    }))
}

pub fn wrap_prompt(prompt: PromptDef, telemetry: Arc<dyn TelemetryCollector>) -> PromptDef {
    let inner = prompt.loader.clone();
    let name = prompt.name.clone();
    prompt.with_loader(Arc::new(move |args: PromptArgs| -> PromptFuture {
        let inner = inner.clone();
        let telemetry = telemetry.clone();
        let name = name.clone();
        Box::pin(async move {
            let timer = CallTimer::start();
            let outcome = inner(args).await;
            record(
                telemetry.as_ref(),
                timer,
                &outcome,
                (TelemetryEventType::PromptLoad, TelemetryEventType::PromptError),
                &name,
                json!({ "name": name }),
            );
            outcome
        })
    }))
}
