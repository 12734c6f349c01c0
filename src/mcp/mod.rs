pub mod introspection;
pub mod prompts;
pub mod resources;
pub mod tools;

use std::sync::Arc;

use rmcp::{model::*, service::RequestContext, RoleServer, ServerHandler};
use serde_json::json;

use crate::api::AppState;
use crate::cell::CellMonitor;
use crate::telemetry::{TelemetryCollector, TelemetryEvent, TelemetryEventType};

/// Counts one MCP session for as long as its handler lives.
struct SessionGuard {
    id: u64,
    cell: String,
    monitor: CellMonitor,
    telemetry: Arc<dyn TelemetryCollector>,
}

impl SessionGuard {
    fn open(state: &AppState) -> Self {
        let id = state.monitor.session_opened();
        let cell = state.identity.name.clone();
        tracing::debug!(session = id, "mcp session opened");
        state.telemetry.record_event(
            TelemetryEvent::new(TelemetryEventType::SessionConnect, cell.as_str())
                .with_data(json!({ "sessionId": id })),
        );
        Self {
            id,
            cell,
            monitor: state.monitor.clone(),
            telemetry: state.telemetry.clone(),
        }
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.monitor.session_closed();
        tracing::debug!(session = self.id, "mcp session closed");
        self.telemetry.record_event(
            TelemetryEvent::new(TelemetryEventType::SessionDisconnect, self.cell.as_str())
                .with_data(json!({ "sessionId": self.id })),
        );
    }
}

/// Serves the cell's catalog to one MCP client.
#[derive(Clone)]
pub struct CellMcpServer {
    state: AppState,
    /// Shared by every clone of this handler; dropped with the last one.
    session: Option<Arc<SessionGuard>>,
}

impl CellMcpServer {
    pub fn new(state: AppState) -> Self {
        Self {
            state,
            session: None,
        }
    }

    /// Count this handler as a live session until it is dropped.
    pub fn with_session_tracking(mut self) -> Self {
        self.session = Some(Arc::new(SessionGuard::open(&self.state)));
        self
    }

    pub fn session_id(&self) -> Option<u64> {
        self.session.as_ref().map(|s| s.id)
    }
}

impl ServerHandler for CellMcpServer {
    fn get_info(&self) -> ServerInfo {
        let identity = &self.state.identity;
        ServerInfo {
            protocol_version: ProtocolVersion::V_2024_11_05,
            capabilities: ServerCapabilities::builder()
                .enable_tools()
                .enable_resources()
                .enable_prompts()
                .build(),
            server_info: Implementation {
                name: identity.name.clone(),
                title: None,
                version: identity.version.clone(),
                description: None,
                icons: None,
                website_url: None,
            },
            instructions: identity.instructions.clone(),
        }
    }

    async fn list_tools(
        &self,
        _request: Option<PaginatedRequestParams>,
        _: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, ErrorData> {
        Ok(tools::list_tools(&self.state.catalog))
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParams,
        _: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, ErrorData> {
        tools::call_tool(&self.state.catalog, request).await
    }

    async fn list_resources(
        &self,
        _request: Option<PaginatedRequestParams>,
        _: RequestContext<RoleServer>,
    ) -> Result<ListResourcesResult, ErrorData> {
        Ok(resources::list_resources(&self.state.catalog))
    }

    async fn read_resource(
        &self,
        request: ReadResourceRequestParams,
        _: RequestContext<RoleServer>,
    ) -> Result<ReadResourceResult, ErrorData> {
        resources::read_resource(&self.state.catalog, request).await
    }

    async fn list_prompts(
        &self,
        _request: Option<PaginatedRequestParams>,
        _: RequestContext<RoleServer>,
    ) -> Result<ListPromptsResult, ErrorData> {
        Ok(prompts::list_prompts(&self.state.catalog))
    }

    async fn get_prompt(
        &self,
        request: GetPromptRequestParams,
        _: RequestContext<RoleServer>,
    ) -> Result<GetPromptResult, ErrorData> {
        prompts::get_prompt(&self.state.catalog, request).await
    }
}
