//! The seam between a `Connection` and the wire.
//!
//! A [`RemoteTransport`] opens sessions; a [`RemoteSession`] lists and calls
//! tools on one remote endpoint. [`HttpTransport`] is the production
//! implementation over MCP Streamable HTTP.

use std::sync::Arc;

use futures::future::BoxFuture;
use parking_lot::Mutex;
use rmcp::model::{CallToolRequestParams, Tool};
use rmcp::service::RunningService;
use rmcp::transport::StreamableHttpClientTransport;
use rmcp::{Peer, RoleClient, ServiceExt};
use serde::Serialize;
use serde_json::Value;

use crate::catalog::{empty_object_schema, JsonObject};
use crate::config::EndpointConfig;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("listing tools failed: {0}")]
    ListTools(String),
    #[error("tool call failed: {0}")]
    Call(String),
    #[error("close failed: {0}")]
    Close(String),
}

/// One entry of a remote endpoint's tool catalog.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RemoteTool {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip)]
    pub input_schema: Arc<JsonObject>,
}

impl RemoteTool {
    pub fn new(name: impl Into<String>, description: Option<&str>) -> Self {
        Self {
            name: name.into(),
            description: description.map(str::to_string),
            input_schema: Arc::new(empty_object_schema()),
        }
    }
}

impl From<Tool> for RemoteTool {
    fn from(tool: Tool) -> Self {
        Self {
            name: tool.name.to_string(),
            description: tool.description.map(|d| d.to_string()),
            input_schema: tool.input_schema,
        }
    }
}

/// Opens sessions to remote endpoints.
pub trait RemoteTransport: Send + Sync {
    fn open<'a>(
        &'a self,
        endpoint: &'a EndpointConfig,
    ) -> BoxFuture<'a, Result<Arc<dyn RemoteSession>, TransportError>>;
}

/// An established, handshaken session with one remote endpoint.
pub trait RemoteSession: Send + Sync {
    fn list_tools(&self) -> BoxFuture<'_, Result<Vec<RemoteTool>, TransportError>>;

    /// Invoke a remote tool. The result is returned as the remote sent it.
    fn call_tool(
        &self,
        name: String,
        arguments: JsonObject,
    ) -> BoxFuture<'_, Result<Value, TransportError>>;

    fn close(&self) -> BoxFuture<'_, Result<(), TransportError>>;
}

/// MCP over Streamable HTTP, via the rmcp client.
#[derive(Debug, Clone, Copy, Default)]
pub struct HttpTransport;

impl RemoteTransport for HttpTransport {
    fn open<'a>(
        &'a self,
        endpoint: &'a EndpointConfig,
    ) -> BoxFuture<'a, Result<Arc<dyn RemoteSession>, TransportError>> {
        Box::pin(async move {
            let transport = StreamableHttpClientTransport::from_uri(endpoint.url.clone());
            let service = ()
                .serve(transport)
                .await
                .map_err(|e| TransportError::Connect(e.to_string()))?;
            let session: Arc<dyn RemoteSession> = Arc::new(HttpSession {
                peer: service.peer().clone(),
                service: Mutex::new(Some(service)),
            });
            Ok(session)
        })
    }
}

struct HttpSession {
    peer: Peer<RoleClient>,
    service: Mutex<Option<RunningService<RoleClient, ()>>>,
}

impl RemoteSession for HttpSession {
    fn list_tools(&self) -> BoxFuture<'_, Result<Vec<RemoteTool>, TransportError>> {
        Box::pin(async move {
            let tools = self
                .peer
                .list_all_tools()
                .await
                .map_err(|e| TransportError::ListTools(e.to_string()))?;
            Ok(tools.into_iter().map(RemoteTool::from).collect())
        })
    }

    fn call_tool(
        &self,
        name: String,
        arguments: JsonObject,
    ) -> BoxFuture<'_, Result<Value, TransportError>> {
        Box::pin(async move {
            let params: CallToolRequestParams = serde_json::from_value(serde_json::json!({
                "name": name,
                "arguments": arguments,
            }))
            .map_err(|e| TransportError::Call(format!("invalid call parameters: {e}")))?;
            let result = self
                .peer
                .call_tool(params)
                .await
                .map_err(|e| TransportError::Call(e.to_string()))?;
            serde_json::to_value(result).map_err(|e| TransportError::Call(e.to_string()))
        })
    }

    fn close(&self) -> BoxFuture<'_, Result<(), TransportError>> {
        Box::pin(async move {
            let service = self.service.lock().take();
            if let Some(service) = service {
                service
                    .cancel()
                    .await
                    .map_err(|e| TransportError::Close(e.to_string()))?;
            }
            Ok(())
        })
    }
}
