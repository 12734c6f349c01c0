// MCP resource handlers
//
// Resources are addressed by URI and read as a single text content.

use rmcp::model::*;

use crate::catalog::Catalog;

pub fn list_resources(catalog: &Catalog) -> ListResourcesResult {
    ListResourcesResult {
        meta: None,
        next_cursor: None,
        resources: catalog.resources().iter().map(|r| r.to_mcp()).collect(),
    }
}

/// Read a resource by URI.
pub async fn read_resource(
    catalog: &Catalog,
    request: ReadResourceRequestParams,
) -> Result<ReadResourceResult, ErrorData> {
    let uri = &request.uri;
    let resource = catalog
        .resource(uri)
        .ok_or_else(|| ErrorData::resource_not_found(format!("unknown resource: {uri}"), None))?;

    let text = resource.load().await.map_err(|e| {
        ErrorData::internal_error(format!("failed to load {uri}: {e}"), None)
    })?;

    let mut contents = ResourceContents::text(text, uri.clone());
    if let (Some(mime), ResourceContents::TextResourceContents { mime_type, .. }) =
        (&resource.mime_type, &mut contents)
    {
        *mime_type = Some(mime.clone());
    }

    Ok(ReadResourceResult {
        contents: vec![contents],
    })
}
