//! Locally invocable units (tools, resources, prompts) and the catalog that
//! holds them while the cell serves them over MCP.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use parking_lot::RwLock;
use rmcp::model::{
    AnnotateAble, Prompt, PromptArgument, RawResource, Resource, Tool, ToolAnnotations,
};
use serde_json::Value;

pub type JsonObject = serde_json::Map<String, Value>;

pub type ToolFuture = BoxFuture<'static, anyhow::Result<String>>;
pub type ToolHandler = Arc<dyn Fn(JsonObject) -> ToolFuture + Send + Sync>;

pub type ResourceFuture = BoxFuture<'static, anyhow::Result<String>>;
pub type ResourceLoader = Arc<dyn Fn() -> ResourceFuture + Send + Sync>;

pub type PromptArgs = HashMap<String, String>;
pub type PromptFuture = BoxFuture<'static, anyhow::Result<String>>;
pub type PromptLoader = Arc<dyn Fn(PromptArgs) -> PromptFuture + Send + Sync>;

/// `{"type": "object", "properties": {}}`
pub fn empty_object_schema() -> JsonObject {
    let mut schema = JsonObject::new();
    schema.insert("type".into(), Value::String("object".into()));
    schema.insert("properties".into(), Value::Object(JsonObject::new()));
    schema
}

/// JSON schema for a parameter struct, as MCP expects it in `inputSchema`.
pub fn schema_for<T: schemars::JsonSchema>() -> Arc<JsonObject> {
    match serde_json::to_value(schemars::schema_for!(T)) {
        Ok(Value::Object(map)) => Arc::new(map),
        _ => Arc::new(empty_object_schema()),
    }
}

/// A callable tool: metadata plus an async body producing text.
#[derive(Clone)]
pub struct ToolDef {
    pub name: String,
    pub description: Option<String>,
    pub input_schema: Arc<JsonObject>,
    pub annotations: Option<ToolAnnotations>,
    pub handler: ToolHandler,
}

impl ToolDef {
    pub fn new<F, Fut>(name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(JsonObject) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<String>> + Send + 'static,
    {
        Self {
            name: name.into(),
            description: None,
            input_schema: Arc::new(empty_object_schema()),
            annotations: None,
            handler: Arc::new(move |args: JsonObject| -> ToolFuture { Box::pin(handler(args)) }),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_input_schema(mut self, schema: Arc<JsonObject>) -> Self {
        self.input_schema = schema;
        self
    }

    /// Derive the input schema from a parameter struct.
    pub fn with_params<T: schemars::JsonSchema>(self) -> Self {
        self.with_input_schema(schema_for::<T>())
    }

    pub fn with_annotations(mut self, annotations: ToolAnnotations) -> Self {
        self.annotations = Some(annotations);
        self
    }

    /// Same metadata, different body.
    pub fn with_handler(mut self, handler: ToolHandler) -> Self {
        self.handler = handler;
        self
    }

    pub async fn execute(&self, args: JsonObject) -> anyhow::Result<String> {
        (self.handler)(args).await
    }

    pub fn to_mcp(&self) -> Tool {
        let mut tool = Tool::new(
            self.name.clone(),
            self.description.clone().unwrap_or_default(),
            self.input_schema.clone(),
        );
        if self.description.is_none() {
            tool.description = None;
        }
        tool.annotations = self.annotations.clone();
        tool
    }
}

impl std::fmt::Debug for ToolDef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolDef")
            .field("name", &self.name)
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

/// A readable resource addressed by URI.
#[derive(Clone)]
pub struct ResourceDef {
    pub uri: String,
    pub name: String,
    pub description: Option<String>,
    pub mime_type: Option<String>,
    pub loader: ResourceLoader,
}

impl ResourceDef {
    pub fn new<F, Fut>(uri: impl Into<String>, name: impl Into<String>, loader: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<String>> + Send + 'static,
    {
        Self {
            uri: uri.into(),
            name: name.into(),
            description: None,
            mime_type: None,
            loader: Arc::new(move || -> ResourceFuture { Box::pin(loader()) }),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }

    pub fn with_loader(mut self, loader: ResourceLoader) -> Self {
        self.loader = loader;
        self
    }

    pub async fn load(&self) -> anyhow::Result<String> {
        (self.loader)().await
    }

    pub fn to_mcp(&self) -> Resource {
        let mut raw = RawResource::new(self.uri.clone(), self.name.clone());
        raw.description = self.description.clone();
        raw.mime_type = self.mime_type.clone();
        raw.no_annotation()
    }
}

impl std::fmt::Debug for ResourceDef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceDef")
            .field("uri", &self.uri)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptArgumentDef {
    pub name: String,
    pub description: Option<String>,
    pub required: bool,
}

/// A prompt template rendered to a single user message.
#[derive(Clone)]
pub struct PromptDef {
    pub name: String,
    pub description: Option<String>,
    pub arguments: Vec<PromptArgumentDef>,
    pub loader: PromptLoader,
}

impl PromptDef {
    pub fn new<F, Fut>(name: impl Into<String>, loader: F) -> Self
    where
        F: Fn(PromptArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<String>> + Send + 'static,
    {
        Self {
            name: name.into(),
            description: None,
            arguments: Vec::new(),
            loader: Arc::new(move |args: PromptArgs| -> PromptFuture { Box::pin(loader(args)) }),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_argument(
        mut self,
        name: impl Into<String>,
        description: Option<&str>,
        required: bool,
    ) -> Self {
        self.arguments.push(PromptArgumentDef {
            name: name.into(),
            description: description.map(str::to_string),
            required,
        });
        self
    }

    pub fn with_loader(mut self, loader: PromptLoader) -> Self {
        self.loader = loader;
        self
    }

    /// Fails if a required argument is absent, otherwise renders the prompt.
    pub async fn load(&self, args: PromptArgs) -> anyhow::Result<String> {
        if let Some(missing) = self
            .arguments
            .iter()
            .find(|a| a.required && !args.contains_key(&a.name))
        {
            anyhow::bail!("missing required argument: {}", missing.name);
        }
        (self.loader)(args).await
    }

    pub fn to_mcp(&self) -> Prompt {
        let arguments = if self.arguments.is_empty() {
            None
        } else {
            Some(
                self.arguments
                    .iter()
                    .map(|a| PromptArgument {
                        name: a.name.clone(),
                        title: None,
                        description: a.description.clone(),
                        required: Some(a.required),
                    })
                    .collect(),
            )
        };
        Prompt::new(self.name.clone(), self.description.clone(), arguments)
    }
}

impl std::fmt::Debug for PromptDef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PromptDef")
            .field("name", &self.name)
            .field("arguments", &self.arguments)
            .finish_non_exhaustive()
    }
}

/// Name (or URI) indexed storage for everything the cell serves.
///
/// Insertion order is kept so listings are deterministic. Inserting under an
/// existing key replaces the old entry in place.
#[derive(Clone, Default)]
pub struct Catalog {
    tools: Arc<RwLock<Vec<ToolDef>>>,
    resources: Arc<RwLock<Vec<ResourceDef>>>,
    prompts: Arc<RwLock<Vec<PromptDef>>>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_tool(&self, tool: ToolDef) {
        let mut tools = self.tools.write();
        match tools.iter_mut().find(|t| t.name == tool.name) {
            Some(existing) => *existing = tool,
            None => tools.push(tool),
        }
    }

    pub fn remove_tool(&self, name: &str) -> bool {
        let mut tools = self.tools.write();
        let len_before = tools.len();
        tools.retain(|t| t.name != name);
        tools.len() < len_before
    }

    pub fn tool(&self, name: &str) -> Option<ToolDef> {
        self.tools.read().iter().find(|t| t.name == name).cloned()
    }

    pub fn tools(&self) -> Vec<ToolDef> {
        self.tools.read().clone()
    }

    pub fn insert_resource(&self, resource: ResourceDef) {
        let mut resources = self.resources.write();
        match resources.iter_mut().find(|r| r.uri == resource.uri) {
            Some(existing) => *existing = resource,
            None => resources.push(resource),
        }
    }

    /// Remove by resource name.
    pub fn remove_resource(&self, name: &str) -> bool {
        let mut resources = self.resources.write();
        let len_before = resources.len();
        resources.retain(|r| r.name != name);
        resources.len() < len_before
    }

    pub fn resource(&self, uri: &str) -> Option<ResourceDef> {
        self.resources.read().iter().find(|r| r.uri == uri).cloned()
    }

    pub fn resources(&self) -> Vec<ResourceDef> {
        self.resources.read().clone()
    }

    pub fn insert_prompt(&self, prompt: PromptDef) {
        let mut prompts = self.prompts.write();
        match prompts.iter_mut().find(|p| p.name == prompt.name) {
            Some(existing) => *existing = prompt,
            None => prompts.push(prompt),
        }
    }

    pub fn remove_prompt(&self, name: &str) -> bool {
        let mut prompts = self.prompts.write();
        let len_before = prompts.len();
        prompts.retain(|p| p.name != name);
        prompts.len() < len_before
    }

    pub fn prompt(&self, name: &str) -> Option<PromptDef> {
        self.prompts.read().iter().find(|p| p.name == name).cloned()
    }

    pub fn prompts(&self) -> Vec<PromptDef> {
        self.prompts.read().clone()
    }
}
