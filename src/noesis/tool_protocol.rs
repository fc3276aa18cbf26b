//! Tool registry and JSON-schema builder for the inbound tool surface.
//!
//! Every reasoning operation the server exposes is described by a
//! [`ToolMetadata`] (name, description, typed parameters) and backed by an
//! async [`ToolHandler`]. The registry is reader-writer locked; execution
//! holds the lock only for the handler lookup, never across the handler's
//! await.
//!
//! A subset of tools is marked **safe for agents** (no side effects, no
//! recursion), and only that subset is ever surfaced to the agentic loop.
//! The excluded names (storage writes, the agent runner itself, graph
//! lifecycle mutations, checkpoint mutations) are enforced both at
//! registration and again when the tool definitions for a run are built.

use crate::noesis::error::NoesisError;
use crate::noesis::llm::ToolUseDefinition;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

/// Tools that must never be exposed to an agent, regardless of how they were
/// registered: they mutate durable state, drive lifecycles, or would recurse
/// into the agent loop.
pub const AGENT_EXCLUDED_TOOLS: [&str; 9] = [
    "run-agent",
    "got-initialize",
    "got-prune",
    "got-finalize",
    "create-checkpoint",
    "restore-checkpoint",
    "fork-from-checkpoint",
    "prune-branch",
    "embed-multimodal",
];

/// Parameter type vocabulary for tool schemas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolParameterType {
    String,
    Number,
    Integer,
    Boolean,
    Array,
}

impl ToolParameterType {
    fn json_name(&self) -> &'static str {
        match self {
            ToolParameterType::String => "string",
            ToolParameterType::Number => "number",
            ToolParameterType::Integer => "integer",
            ToolParameterType::Boolean => "boolean",
            ToolParameterType::Array => "array",
        }
    }
}

/// A named, typed tool parameter (builder style).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolParameter {
    pub name: String,
    #[serde(rename = "type")]
    pub param_type: ToolParameterType,
    pub description: Option<String>,
    pub required: bool,
    pub default: Option<Value>,
    pub enum_values: Option<Vec<Value>>,
    pub minimum: Option<f64>,
    pub maximum: Option<f64>,
    pub min_items: Option<usize>,
    pub max_items: Option<usize>,
    /// Item type for array parameters.
    pub items: Option<ToolParameterType>,
}

impl ToolParameter {
    pub fn new(name: impl Into<String>, param_type: ToolParameterType) -> Self {
        Self {
            name: name.into(),
            param_type,
            description: None,
            required: false,
            default: None,
            enum_values: None,
            minimum: None,
            maximum: None,
            min_items: None,
            max_items: None,
            items: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }

    pub fn with_enum(mut self, values: Vec<Value>) -> Self {
        self.enum_values = Some(values);
        self
    }

    pub fn with_range(mut self, minimum: f64, maximum: f64) -> Self {
        self.minimum = Some(minimum);
        self.maximum = Some(maximum);
        self
    }

    pub fn with_items(mut self, items: ToolParameterType) -> Self {
        self.items = Some(items);
        self
    }

    pub fn with_item_bounds(mut self, min_items: usize, max_items: usize) -> Self {
        self.min_items = Some(min_items);
        self.max_items = Some(max_items);
        self
    }

    fn to_schema(&self) -> Value {
        let mut schema = serde_json::Map::new();
        schema.insert("type".to_string(), json!(self.param_type.json_name()));
        if let Some(description) = &self.description {
            schema.insert("description".to_string(), json!(description));
        }
        if let Some(default) = &self.default {
            schema.insert("default".to_string(), default.clone());
        }
        if let Some(values) = &self.enum_values {
            schema.insert("enum".to_string(), json!(values));
        }
        if let Some(minimum) = self.minimum {
            schema.insert("minimum".to_string(), json!(minimum));
        }
        if let Some(maximum) = self.maximum {
            schema.insert("maximum".to_string(), json!(maximum));
        }
        if let Some(items) = &self.items {
            schema.insert("items".to_string(), json!({"type": items.json_name()}));
        }
        if let Some(min_items) = self.min_items {
            schema.insert("minItems".to_string(), json!(min_items));
        }
        if let Some(max_items) = self.max_items {
            schema.insert("maxItems".to_string(), json!(max_items));
        }
        Value::Object(schema)
    }
}

/// Tool identity and interface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolMetadata {
    pub name: String,
    pub description: String,
    pub parameters: Vec<ToolParameter>,
    /// Whether the tool may be surfaced to the agentic loop.
    pub safe_for_agents: bool,
}

impl ToolMetadata {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: Vec::new(),
            safe_for_agents: false,
        }
    }

    pub fn with_parameter(mut self, parameter: ToolParameter) -> Self {
        self.parameters.push(parameter);
        self
    }

    /// Mark the tool as side-effect free and agent-exposable.
    pub fn safe_for_agents(mut self) -> Self {
        self.safe_for_agents = true;
        self
    }

    /// Build the JSON Schema for the tool's input object. Strict schemas set
    /// `additionalProperties: false`.
    pub fn input_schema(&self, strict: bool) -> Value {
        let mut properties = serde_json::Map::new();
        let mut required = Vec::new();
        for parameter in &self.parameters {
            properties.insert(parameter.name.clone(), parameter.to_schema());
            if parameter.required {
                required.push(json!(parameter.name));
            }
        }
        let mut schema = serde_json::Map::new();
        schema.insert("type".to_string(), json!("object"));
        schema.insert("properties".to_string(), Value::Object(properties));
        if !required.is_empty() {
            schema.insert("required".to_string(), Value::Array(required));
        }
        if strict {
            schema.insert("additionalProperties".to_string(), json!(false));
        }
        Value::Object(schema)
    }

    /// Convert into the definition shape forwarded to a tool-use LLM.
    pub fn to_tool_definition(&self) -> ToolUseDefinition {
        ToolUseDefinition {
            name: self.name.clone(),
            description: self.description.clone(),
            input_schema: self.input_schema(true),
        }
    }
}

/// Async tool handler: cancellation token and JSON parameters in, JSON out.
pub type ToolHandler = Arc<
    dyn Fn(
            CancellationToken,
            Value,
        ) -> Pin<Box<dyn Future<Output = Result<Value, NoesisError>> + Send>>
        + Send
        + Sync,
>;

struct RegisteredTool {
    metadata: ToolMetadata,
    handler: ToolHandler,
}

/// Name → tool registry with reader-writer locking.
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, RegisteredTool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: RwLock::new(HashMap::new()),
        }
    }

    /// Register a tool. Duplicate names fail; excluded names cannot be
    /// registered as agent-safe.
    pub async fn register(
        &self,
        metadata: ToolMetadata,
        handler: ToolHandler,
    ) -> Result<(), NoesisError> {
        if metadata.safe_for_agents && AGENT_EXCLUDED_TOOLS.contains(&metadata.name.as_str()) {
            return Err(NoesisError::Validation(format!(
                "tool {} is on the agent exclusion list and cannot be marked safe",
                metadata.name
            )));
        }
        let mut tools = self.tools.write().await;
        if tools.contains_key(&metadata.name) {
            return Err(NoesisError::Validation(format!(
                "tool already registered: {}",
                metadata.name
            )));
        }
        tools.insert(metadata.name.clone(), RegisteredTool { metadata, handler });
        Ok(())
    }

    pub async fn unregister(&self, name: &str) -> bool {
        self.tools.write().await.remove(name).is_some()
    }

    pub async fn get_metadata(&self, name: &str) -> Option<ToolMetadata> {
        self.tools.read().await.get(name).map(|t| t.metadata.clone())
    }

    pub async fn list(&self) -> Vec<ToolMetadata> {
        let tools = self.tools.read().await;
        let mut all: Vec<ToolMetadata> = tools.values().map(|t| t.metadata.clone()).collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    /// Definitions of the agent-exposable subset, excluded names filtered
    /// out even if a registration slipped one through.
    pub async fn safe_tool_definitions(&self) -> Vec<ToolUseDefinition> {
        let tools = self.tools.read().await;
        let mut safe: Vec<&RegisteredTool> = tools
            .values()
            .filter(|t| t.metadata.safe_for_agents)
            .filter(|t| !AGENT_EXCLUDED_TOOLS.contains(&t.metadata.name.as_str()))
            .collect();
        safe.sort_by(|a, b| a.metadata.name.cmp(&b.metadata.name));
        safe.iter().map(|t| t.metadata.to_tool_definition()).collect()
    }

    /// Execute a tool by name. The read lock is released before the handler
    /// future is awaited.
    pub async fn execute(
        &self,
        cancel: &CancellationToken,
        name: &str,
        parameters: Value,
    ) -> Result<Value, NoesisError> {
        let handler = {
            let tools = self.tools.read().await;
            tools
                .get(name)
                .map(|t| t.handler.clone())
                .ok_or_else(|| NoesisError::Validation(format!("unknown tool: {}", name)))?
        };
        handler(cancel.clone(), parameters).await
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Wrap an async closure into a [`ToolHandler`].
pub fn handler<F, Fut>(f: F) -> ToolHandler
where
    F: Fn(CancellationToken, Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, NoesisError>> + Send + 'static,
{
    Arc::new(move |cancel, params| Box::pin(f(cancel, params)))
}
