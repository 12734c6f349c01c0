// MCP tool handlers
//
// Serves every ToolDef in the catalog: user tools, built-in introspection
// tools and proxies for remote endpoints alike.

use rmcp::model::*;

use crate::catalog::Catalog;

pub fn list_tools(catalog: &Catalog) -> ListToolsResult {
    ListToolsResult {
        meta: None,
        next_cursor: None,
        tools: catalog.tools().iter().map(|t| t.to_mcp()).collect(),
    }
}

/// Run a tool by name.
///
/// An unknown name is a protocol error. A failing tool body is reported as a
/// tool result with `isError` set, carrying the error text.
pub async fn call_tool(
    catalog: &Catalog,
    request: CallToolRequestParams,
) -> Result<CallToolResult, ErrorData> {
    let name: &str = &request.name;
    let tool = catalog
        .tool(name)
        .ok_or_else(|| ErrorData::invalid_params(format!("tool not found: {name}"), None))?;

    match tool.execute(request.arguments.unwrap_or_default()).await {
        Ok(text) => Ok(CallToolResult::success(vec![Content::text(text)])),
        Err(e) => {
            tracing::debug!(tool = %name, error = %e, "tool call failed");
            Ok(CallToolResult::error(vec![Content::text(e.to_string())]))
        }
    }
}
