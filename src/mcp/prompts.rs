// MCP prompt handlers
//
// Each prompt renders to one user message.

use rmcp::model::*;
use serde_json::Value;

use crate::catalog::{Catalog, JsonObject, PromptArgs};

pub fn list_prompts(catalog: &Catalog) -> ListPromptsResult {
    ListPromptsResult {
        prompts: catalog.prompts().iter().map(|p| p.to_mcp()).collect(),
        next_cursor: None,
        meta: None,
    }
}

pub async fn get_prompt(
    catalog: &Catalog,
    request: GetPromptRequestParams,
) -> Result<GetPromptResult, ErrorData> {
    let name = request.name.as_str();
    let prompt = catalog
        .prompt(name)
        .ok_or_else(|| ErrorData::invalid_params(format!("unknown prompt: {name}"), None))?;

    let args = prompt_args(request.arguments.unwrap_or_default());
    let text = prompt
        .load(args)
        .await
        .map_err(|e| ErrorData::invalid_params(format!("prompt {name}: {e}"), None))?;

    Ok(GetPromptResult {
        description: prompt.description.clone(),
        messages: vec![PromptMessage::new_text(PromptMessageRole::User, text)],
    })
}

/// Prompt arguments arrive as JSON; loaders see strings.
fn prompt_args(arguments: JsonObject) -> PromptArgs {
    arguments
        .into_iter()
        .map(|(key, value)| {
            let value = match value {
                Value::String(s) => s,
                other => other.to_string(),
            };
            (key, value)
        })
        .collect()
}
