// Built-in tools that let an MCP client ask the cell about itself.

use rmcp::model::ToolAnnotations;
use serde::Serialize;

use crate::catalog::ToolDef;
use crate::cell::CellMonitor;

pub const HEALTH_TOOL: &str = "soma_health";
pub const CAPABILITIES_TOOL: &str = "soma_capabilities";
pub const CONNECTIONS_TOOL: &str = "soma_connections";

pub fn introspection_tools(monitor: &CellMonitor) -> Vec<ToolDef> {
    vec![
        report_tool(
            HEALTH_TOOL,
            "Returns health and status information for this cell including uptime, sessions, and endpoint status",
            monitor.clone(),
            |m| m.health(),
        ),
        report_tool(
            CAPABILITIES_TOOL,
            "Lists all tools, resources, and prompts registered on this cell",
            monitor.clone(),
            |m| m.capabilities(),
        ),
        report_tool(
            CONNECTIONS_TOOL,
            "Lists all connections to remote endpoints with their status and available tools",
            monitor.clone(),
            |m| m.connections(),
        ),
    ]
}

/// A read-only tool that answers with a pretty-printed snapshot.
fn report_tool<T, F>(name: &str, description: &str, monitor: CellMonitor, snapshot: F) -> ToolDef
where
    T: Serialize,
    F: Fn(&CellMonitor) -> T + Send + Sync + 'static,
{
    ToolDef::new(name, move |_args| {
        let report = serde_json::to_string_pretty(&snapshot(&monitor));
        async move { report.map_err(anyhow::Error::from) }
    })
    .with_description(description)
    .with_annotations(ToolAnnotations::new().read_only(true))
}
