use rmcp::model::ToolAnnotations;

use crate::catalog::{JsonObject, ToolDef};
use crate::federation::connection::Connection;

const FALLBACK_DESCRIPTION: &str = "Remote tool";

/// Local stand-ins for every tool in the endpoint's current catalog.
///
/// The catalog is captured now. Tools the remote adds or drops later are not
/// reflected until proxies are generated again.
pub fn create_proxied_tools(connection: &Connection) -> Vec<ToolDef> {
    let prefix = connection.config().tool_prefix();
    let label = connection.name().to_string();

    connection
        .tools()
        .into_iter()
        .map(|remote| {
            let description = format!(
                "[{label}] {}",
                remote.description.as_deref().unwrap_or(FALLBACK_DESCRIPTION)
            );
            let remote_name = remote.name.clone();
            let target = connection.clone();
            ToolDef::new(format!("{prefix}{}", remote.name), move |args: JsonObject| {
                let target = target.clone();
                let remote_name = remote_name.clone();
                async move {
                    let result = target.call_tool(&remote_name, args).await?;
                    Ok(serde_json::to_string_pretty(&result)?)
                }
            })
            .with_description(description)
            .with_input_schema(remote.input_schema.clone())
            .with_annotations(ToolAnnotations::new().read_only(true).open_world(true))
        })
        .collect()
}
