#![allow(dead_code)]

use std::net::SocketAddr;

use serde_json::{json, Value};
use soma::catalog::{JsonObject, PromptDef, ResourceDef, ToolDef};
use soma::cell::{Cell, CellOptions};

pub fn bind_any() -> SocketAddr {
    "127.0.0.1:0".parse().unwrap()
}

/// A cell with an `echo` tool, a failing `fail` tool, one resource and one
/// prompt.
pub fn demo_cell(options: CellOptions) -> Cell {
    let cell = Cell::new(options);
    cell.add_tool(
        ToolDef::new("echo", |args: JsonObject| async move {
            Ok(args
                .get("text")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string())
        })
        .with_description("Echo"),
    );
    cell.add_tool(ToolDef::new("fail", |_| async {
        Err(anyhow::anyhow!("boom"))
    }));
    cell.add_resource(
        ResourceDef::new("soma://motd", "motd", || async {
            Ok("hello from the cell".to_string())
        })
        .with_mime_type("text/plain"),
    );
    cell.add_prompt(
        PromptDef::new("greet", |args| async move {
            Ok(format!("Say hello to {}", args.get("who").cloned().unwrap_or_default()))
        })
        .with_description("Greets someone")
        .with_argument("who", Some("Who to greet"), true),
    );
    cell
}

/// Extract the JSON-RPC response from an SSE event stream body.
/// SSE events look like:
///   id: 0\nretry: 3000\ndata: \n\nevent: message\ndata: {"jsonrpc":"2.0",...}\n\n
pub fn extract_jsonrpc_from_sse(body: &str) -> Value {
    for event in body.split("\n\n").collect::<Vec<_>>().iter().rev() {
        for line in event.lines() {
            if let Some(data) = line.strip_prefix("data: ") {
                if let Ok(json) = serde_json::from_str::<Value>(data) {
                    if json.get("jsonrpc").is_some() {
                        return json;
                    }
                }
            }
        }
    }
    panic!("No JSON-RPC response found in SSE body:\n{body}");
}

/// Assert that a tool call result is NOT an error (`isError` false, absent or null).
pub fn assert_not_error(json: &Value) {
    let is_error = &json["result"]["isError"];
    assert!(
        is_error.is_null() || is_error == false,
        "Expected isError to be false/absent/null, got: {is_error}"
    );
}

/// First text content of a `tools/call` response.
pub fn tool_text(json: &Value) -> &str {
    json["result"]["content"][0]["text"]
        .as_str()
        .unwrap_or_else(|| panic!("no text content in {json}"))
}

/// Minimal MCP client speaking raw JSON-RPC over Streamable HTTP.
pub struct McpHttpClient {
    client: reqwest::Client,
    url: String,
    pub session_id: String,
    pub initialize: Value,
}

impl McpHttpClient {
    /// Run the initialize handshake and send `notifications/initialized`.
    pub async fn connect(addr: SocketAddr) -> Self {
        let client = reqwest::Client::new();
        let url = format!("http://{addr}/mcp");
        let response = client
            .post(&url)
            .header("Content-Type", "application/json")
            .header("Accept", "application/json, text/event-stream")
            .body(
                r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{"protocolVersion":"2024-11-05","capabilities":{},"clientInfo":{"name":"test","version":"0.1"}}}"#,
            )
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);

        let session_id = response
            .headers()
            .get("mcp-session-id")
            .expect("initialize response should have Mcp-Session-Id header")
            .to_str()
            .unwrap()
            .to_string();
        let initialize = extract_jsonrpc_from_sse(&response.text().await.unwrap());

        let this = Self {
            client,
            url,
            session_id,
            initialize,
        };
        this.notify("notifications/initialized").await;
        this
    }

    pub async fn notify(&self, method: &str) {
        self.client
            .post(&self.url)
            .header("Content-Type", "application/json")
            .header("Accept", "application/json, text/event-stream")
            .header("Mcp-Session-Id", &self.session_id)
            .body(json!({"jsonrpc": "2.0", "method": method}).to_string())
            .send()
            .await
            .unwrap();
    }

    pub async fn request(&self, id: u64, method: &str, params: Value) -> Value {
        let response = self
            .client
            .post(&self.url)
            .header("Content-Type", "application/json")
            .header("Accept", "application/json, text/event-stream")
            .header("Mcp-Session-Id", &self.session_id)
            .body(json!({"jsonrpc": "2.0", "id": id, "method": method, "params": params}).to_string())
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200, "MCP endpoint should return 200 OK");
        let json = extract_jsonrpc_from_sse(&response.text().await.unwrap());
        assert_eq!(json["id"], id);
        json
    }

    pub async fn call_tool(&self, id: u64, name: &str, arguments: Value) -> Value {
        self.request(id, "tools/call", json!({"name": name, "arguments": arguments}))
            .await
    }

    /// End the session with an HTTP DELETE.
    pub async fn close(self) {
        self.client
            .delete(&self.url)
            .header("Mcp-Session-Id", &self.session_id)
            .send()
            .await
            .unwrap();
    }
}
