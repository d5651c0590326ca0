//! Read-only registries of tools, resources, prompts, and models.
//!
//! The embedding application supplies these at server construction; the
//! router consults them on every call but never mutates them, so a single
//! [`ServerRegistry`] behind an `Arc` is safe for any number of concurrent
//! sessions.

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Error returned by a registered handler (tool, resource reader, prompt
/// getter, model callback).
///
/// Surfaced to the peer as a JSON-RPC error with code -32000, with `detail`
/// (typically a backtrace or structured context) in the error's `data`.
#[derive(Debug, Clone)]
pub struct HandlerError {
    /// Human-readable failure description.
    pub message: String,
    /// Optional structured context carried in the error response's `data`.
    pub detail: Option<Value>,
}

impl HandlerError {
    /// Creates an error from a message alone.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            detail: None,
        }
    }

    /// Attaches structured context to the error.
    #[must_use]
    pub fn with_detail(mut self, detail: Value) -> Self {
        self.detail = Some(detail);
        self
    }
}

impl std::fmt::Display for HandlerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for HandlerError {}

impl From<String> for HandlerError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for HandlerError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

/// Result type for all registered handlers.
pub type HandlerResult = Result<Value, HandlerError>;

/// An async tool handler: flattened arguments in, raw result payload out.
pub type ToolHandler = Arc<dyn Fn(Value) -> BoxFuture<'static, HandlerResult> + Send + Sync>;

/// Resolves a resource by id or URI.
pub type ResourceReader = Arc<dyn Fn(String) -> BoxFuture<'static, HandlerResult> + Send + Sync>;

/// Resolves a prompt by name with optional arguments.
pub type PromptGetter =
    Arc<dyn Fn(String, Option<Value>) -> BoxFuture<'static, HandlerResult> + Send + Sync>;

/// Looks a model up by name; `Ok(None)` means unknown.
pub type ModelGetter = Arc<
    dyn Fn(String) -> BoxFuture<'static, Result<Option<ModelEntry>, HandlerError>> + Send + Sync,
>;

/// Reacts to a model being selected.
pub type ModelSelector =
    Arc<dyn Fn(String) -> BoxFuture<'static, Result<(), HandlerError>> + Send + Sync>;

/// Produces the current metadata map.
pub type MetadataGetter = Arc<
    dyn Fn() -> BoxFuture<'static, Result<Map<String, Value>, HandlerError>> + Send + Sync,
>;

/// A tool definition as advertised by `tools/list`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDefinition {
    /// Unique tool name.
    pub name: String,
    /// Human-readable description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON Schema for the tool's input parameters.
    pub input_schema: Value,
}

/// A tool definition paired with its handler.
#[derive(Clone)]
pub struct ToolRegistration {
    /// The advertised definition.
    pub tool: ToolDefinition,
    /// The invocation handler.
    pub handler: ToolHandler,
}

impl ToolRegistration {
    /// Pairs a definition with an async handler function.
    pub fn new<F, Fut>(tool: ToolDefinition, handler: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = HandlerResult> + Send + 'static,
    {
        Self {
            tool,
            handler: Arc::new(move |args| Box::pin(handler(args))),
        }
    }
}

impl std::fmt::Debug for ToolRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistration")
            .field("tool", &self.tool)
            .finish_non_exhaustive()
    }
}

/// A named resource as advertised by `resources/list`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceEntry {
    /// Stable resource identifier.
    pub id: String,
    /// Display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Resource URI.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    /// Content type hint.
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// Human-readable description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// One declared argument of a prompt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptArgument {
    /// Argument name.
    pub name: String,
    /// Human-readable description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Whether the argument must be supplied.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required: Option<bool>,
}

/// A parameterised prompt as advertised by `prompts/list`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptEntry {
    /// Unique prompt name.
    pub name: String,
    /// Human-readable description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Declared arguments.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub arguments: Vec<PromptArgument>,
}

/// A selectable model as advertised by `models/list`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelEntry {
    /// Unique model name.
    pub name: String,
    /// Display label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Human-readable description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Originating provider.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
}

/// Everything the embedding application exposes through the server.
///
/// Built once, then shared read-only. Session-scoped state (selected model,
/// initialisation flag) lives in [`crate::mcp::session::Session`], never
/// here.
#[derive(Default)]
pub struct ServerRegistry {
    tools: HashMap<String, ToolRegistration>,
    resources: Vec<ResourceEntry>,
    read_resource: Option<ResourceReader>,
    prompts: Vec<PromptEntry>,
    get_prompt: Option<PromptGetter>,
    models: Vec<ModelEntry>,
    get_model: Option<ModelGetter>,
    select_model: Option<ModelSelector>,
    metadata: Map<String, Value>,
    get_metadata: Option<MetadataGetter>,
    instructions: Option<Value>,
}

impl ServerRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a tool. Later registrations with the same name replace
    /// earlier ones.
    #[must_use]
    pub fn with_tool(mut self, registration: ToolRegistration) -> Self {
        self.tools
            .insert(registration.tool.name.clone(), registration);
        self
    }

    /// Sets the static resource list.
    #[must_use]
    pub fn with_resources(mut self, resources: Vec<ResourceEntry>) -> Self {
        self.resources = resources;
        self
    }

    /// Installs the resource reader used by `resources/read`.
    #[must_use]
    pub fn with_resource_reader<F, Fut>(mut self, reader: F) -> Self
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = HandlerResult> + Send + 'static,
    {
        self.read_resource = Some(Arc::new(move |key| Box::pin(reader(key))));
        self
    }

    /// Sets the static prompt list.
    #[must_use]
    pub fn with_prompts(mut self, prompts: Vec<PromptEntry>) -> Self {
        self.prompts = prompts;
        self
    }

    /// Installs the prompt getter used by `prompts/get`.
    #[must_use]
    pub fn with_prompt_getter<F, Fut>(mut self, getter: F) -> Self
    where
        F: Fn(String, Option<Value>) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = HandlerResult> + Send + 'static,
    {
        self.get_prompt = Some(Arc::new(move |name, args| Box::pin(getter(name, args))));
        self
    }

    /// Sets the static model list.
    #[must_use]
    pub fn with_models(mut self, models: Vec<ModelEntry>) -> Self {
        self.models = models;
        self
    }

    /// Installs a model getter consulted before the static list.
    #[must_use]
    pub fn with_model_getter<F, Fut>(mut self, getter: F) -> Self
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<Option<ModelEntry>, HandlerError>>
            + Send
            + 'static,
    {
        self.get_model = Some(Arc::new(move |name| Box::pin(getter(name))));
        self
    }

    /// Installs a selector invoked by `models/select`.
    #[must_use]
    pub fn with_model_selector<F, Fut>(mut self, selector: F) -> Self
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        self.select_model = Some(Arc::new(move |name| Box::pin(selector(name))));
        self
    }

    /// Sets the static metadata map.
    #[must_use]
    pub fn with_metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = metadata;
        self
    }

    /// Installs a metadata getter consulted instead of the static map.
    #[must_use]
    pub fn with_metadata_getter<F, Fut>(mut self, getter: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<Map<String, Value>, HandlerError>>
            + Send
            + 'static,
    {
        self.get_metadata = Some(Arc::new(move || Box::pin(getter())));
        self
    }

    /// Sets the instructions value returned from `initialize`.
    #[must_use]
    pub fn with_instructions(mut self, instructions: Value) -> Self {
        self.instructions = Some(instructions);
        self
    }

    /// Looks a tool up by name.
    #[must_use]
    pub fn tool(&self, name: &str) -> Option<&ToolRegistration> {
        self.tools.get(name)
    }

    /// Returns the advertised tool definitions.
    #[must_use]
    pub fn tool_definitions(&self) -> Vec<&ToolDefinition> {
        let mut defs: Vec<&ToolDefinition> = self.tools.values().map(|r| &r.tool).collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// Returns the static resource list.
    #[must_use]
    pub fn resources(&self) -> &[ResourceEntry] {
        &self.resources
    }

    /// Returns the resource reader, if configured.
    #[must_use]
    pub fn resource_reader(&self) -> Option<&ResourceReader> {
        self.read_resource.as_ref()
    }

    /// Returns the static prompt list.
    #[must_use]
    pub fn prompts(&self) -> &[PromptEntry] {
        &self.prompts
    }

    /// Returns the prompt getter, if configured.
    #[must_use]
    pub fn prompt_getter(&self) -> Option<&PromptGetter> {
        self.get_prompt.as_ref()
    }

    /// Returns the static model list.
    #[must_use]
    pub fn models(&self) -> &[ModelEntry] {
        &self.models
    }

    /// Returns the model getter, if configured.
    #[must_use]
    pub fn model_getter(&self) -> Option<&ModelGetter> {
        self.get_model.as_ref()
    }

    /// Returns the model selector, if configured.
    #[must_use]
    pub fn model_selector(&self) -> Option<&ModelSelector> {
        self.select_model.as_ref()
    }

    /// Returns the static metadata map.
    #[must_use]
    pub fn metadata(&self) -> &Map<String, Value> {
        &self.metadata
    }

    /// Returns the metadata getter, if configured.
    #[must_use]
    pub fn metadata_getter(&self) -> Option<&MetadataGetter> {
        self.get_metadata.as_ref()
    }

    /// Returns the instructions value, if configured.
    #[must_use]
    pub fn instructions(&self) -> Option<&Value> {
        self.instructions.as_ref()
    }

    /// Computes the capability map advertised from `initialize`.
    ///
    /// Optional method groups are only advertised when the corresponding
    /// handler or static list was actually configured.
    #[must_use]
    pub fn capabilities(&self) -> Value {
        let mut caps = Map::new();

        caps.insert("tools".to_string(), json!({ "list": true, "call": true }));

        if !self.resources.is_empty() || self.read_resource.is_some() {
            caps.insert(
                "resources".to_string(),
                json!({ "list": true, "read": self.read_resource.is_some() }),
            );
        }

        if !self.prompts.is_empty() || self.get_prompt.is_some() {
            caps.insert(
                "prompts".to_string(),
                json!({ "list": true, "get": self.get_prompt.is_some() }),
            );
        }

        if !self.models.is_empty() || self.get_model.is_some() || self.select_model.is_some() {
            caps.insert(
                "models".to_string(),
                json!({
                    "list": true,
                    "get": self.get_model.is_some() || !self.models.is_empty(),
                    "select": self.select_model.is_some(),
                }),
            );
        }

        caps.insert(
            "metadata".to_string(),
            json!({ "current": true, "get": true }),
        );

        Value::Object(caps)
    }
}

impl std::fmt::Debug for ServerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerRegistry")
            .field("tools", &self.tools.keys().collect::<Vec<_>>())
            .field("resources", &self.resources.len())
            .field("prompts", &self.prompts.len())
            .field("models", &self.models.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tool() -> ToolRegistration {
        ToolRegistration::new(
            ToolDefinition {
                name: "noop".to_string(),
                description: None,
                input_schema: json!({ "type": "object" }),
            },
            |_args| async { Ok(json!(null)) },
        )
    }

    #[test]
    fn capabilities_reflect_configuration() {
        let bare = ServerRegistry::new().with_tool(sample_tool());
        let caps = bare.capabilities();
        assert_eq!(caps["tools"]["list"], json!(true));
        assert!(caps.get("resources").is_none());
        assert!(caps.get("prompts").is_none());
        assert!(caps.get("models").is_none());
        assert_eq!(caps["metadata"]["current"], json!(true));

        let full = ServerRegistry::new()
            .with_resources(vec![ResourceEntry {
                id: "r".to_string(),
                name: None,
                uri: None,
                kind: None,
                description: None,
            }])
            .with_prompt_getter(|_name, _args| async { Ok(json!({})) })
            .with_models(vec![ModelEntry {
                name: "m".to_string(),
                label: None,
                description: None,
                provider: None,
            }]);
        let caps = full.capabilities();
        assert_eq!(caps["resources"]["read"], json!(false));
        assert_eq!(caps["prompts"]["get"], json!(true));
        assert_eq!(caps["models"]["get"], json!(true));
        assert_eq!(caps["models"]["select"], json!(false));
    }

    #[test]
    fn tool_lookup_and_listing() {
        let registry = ServerRegistry::new().with_tool(sample_tool());
        assert!(registry.tool("noop").is_some());
        assert!(registry.tool("missing").is_none());
        assert_eq!(registry.tool_definitions().len(), 1);
    }

    #[test]
    fn duplicate_tool_name_replaces() {
        let registry = ServerRegistry::new()
            .with_tool(sample_tool())
            .with_tool(ToolRegistration::new(
                ToolDefinition {
                    name: "noop".to_string(),
                    description: Some("second".to_string()),
                    input_schema: json!({ "type": "object" }),
                },
                |_args| async { Ok(json!(1)) },
            ));
        assert_eq!(registry.tool_definitions().len(), 1);
        assert_eq!(
            registry.tool("noop").unwrap().tool.description.as_deref(),
            Some("second")
        );
    }

    #[test]
    fn tool_definition_serialises_camel_case() {
        let def = ToolDefinition {
            name: "t".to_string(),
            description: None,
            input_schema: json!({ "type": "object" }),
        };
        let json = serde_json::to_string(&def).unwrap();
        assert!(json.contains("inputSchema"));
        assert!(!json.contains("description"));
    }
}
