//! Tool registry and dispatch
//!
//! Capabilities are looked up by exact name. Dispatch never fails: unknown
//! tools, invalid arguments, failing or panicking capabilities and unusable
//! payloads all come back as [`ToolResult::Error`].

pub mod distance;
pub mod function;

pub use distance::DistanceTool;
pub use function::FunctionTool;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};
use waypoint_provider::{Tool, ToolCall};

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// A named capability the model can invoke
#[async_trait]
pub trait ToolTrait: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    /// JSON schema of the argument object
    fn parameters(&self) -> Value;
    async fn execute(&self, args: Map<String, Value>) -> Result<ToolOutput, BoxError>;
}

pub fn to_provider_tool(tool: &dyn ToolTrait) -> Tool {
    Tool::new(tool.name(), tool.description(), tool.parameters())
}

/// One item of raw tool output
#[derive(Debug, Clone, PartialEq)]
pub enum ToolContent {
    Text(String),
    Json(Value),
}

/// Raw payload returned by a capability
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolOutput {
    pub content: Vec<ToolContent>,
    pub is_error: bool,
}

impl ToolOutput {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ToolContent::Text(text.into())],
            is_error: false,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            content: vec![ToolContent::Text(message.into())],
            is_error: true,
        }
    }

    pub fn json(value: Value) -> Self {
        Self {
            content: vec![ToolContent::Json(value)],
            is_error: false,
        }
    }

    fn first_text(&self) -> Option<&str> {
        match self.content.first() {
            Some(ToolContent::Text(text)) => Some(text),
            _ => None,
        }
    }
}

/// Outcome of one tool call: exactly one of text or error
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolResult {
    Text(String),
    Error(String),
}

impl ToolResult {
    /// Normalise a loose `{text?, error?}` pair; both or neither is an error
    pub fn from_parts(text: Option<String>, error: Option<String>) -> Self {
        match (text, error) {
            (Some(text), None) => ToolResult::Text(text),
            (None, Some(error)) => ToolResult::Error(error),
            (Some(_), Some(error)) => {
                ToolResult::Error(format!("tool returned both a result and an error: {}", error))
            }
            (None, None) => ToolResult::Error("tool returned neither a result nor an error".to_string()),
        }
    }

    /// First content item must be text; anything else is an error
    pub fn from_output(tool: &str, output: ToolOutput) -> Self {
        match (output.is_error, output.first_text()) {
            (true, text) => Self::failure(tool, text.unwrap_or_default()),
            (false, Some(text)) => ToolResult::Text(text.to_string()),
            (false, None) => ToolResult::Error(format!("Tool {} returned no text content", tool)),
        }
    }

    /// Error result that always names the tool when the message is empty
    pub fn failure(tool: &str, message: impl Into<String>) -> Self {
        let message = message.into();
        if message.trim().is_empty() {
            ToolResult::Error(format!("Tool {} failed without a message", tool))
        } else {
            ToolResult::Error(message)
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, ToolResult::Error(_))
    }

    pub fn text(&self) -> Option<&str> {
        match self {
            ToolResult::Text(text) => Some(text),
            ToolResult::Error(_) => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            ToolResult::Error(error) => Some(error),
            ToolResult::Text(_) => None,
        }
    }

    /// Text that goes into the tool-role message
    pub fn into_content(self) -> String {
        match self {
            ToolResult::Text(text) | ToolResult::Error(text) => text,
        }
    }
}

/// Check arguments against the required keys and primitive types of a schema
pub fn validate_arguments(schema: &Value, args: &Map<String, Value>) -> Result<(), String> {
    if let Some(required) = schema["required"].as_array() {
        for key in required.iter().filter_map(Value::as_str) {
            if args.get(key).map_or(true, Value::is_null) {
                return Err(format!("missing required argument '{}'", key));
            }
        }
    }

    let Some(properties) = schema["properties"].as_object() else {
        return Ok(());
    };

    for (key, value) in args {
        let Some(expected) = properties.get(key).and_then(|p| p["type"].as_str()) else {
            continue;
        };
        let matches = match expected {
            "string" => value.is_string(),
            "number" => value.is_number(),
            "integer" => value.is_i64() || value.is_u64(),
            "boolean" => value.is_boolean(),
            "object" => value.is_object(),
            "array" => value.is_array(),
            "null" => value.is_null(),
            _ => true,
        };
        if !matches {
            return Err(format!("argument '{}' should be of type {}", key, expected));
        }
    }

    Ok(())
}

/// Read-only after setup; shared across concurrent dispatches
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn ToolTrait>>,
    order: Vec<String>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
            order: Vec::new(),
        }
    }

    pub fn register<T: ToolTrait + 'static>(&mut self, tool: T) {
        self.register_arc(Arc::new(tool));
    }

    /// Register a shared capability; a later tool with the same name replaces it
    pub fn register_arc(&mut self, tool: Arc<dyn ToolTrait>) {
        let name = tool.name().to_string();
        if self.tools.insert(name.clone(), tool).is_some() {
            warn!("tool {} registered twice, keeping the latest", name);
        } else {
            self.order.push(name);
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ToolTrait>> {
        self.tools.get(name).cloned()
    }

    pub fn has(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Names in registration order
    pub fn names(&self) -> Vec<String> {
        self.order.clone()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Tool catalogue in registration order
    pub fn definitions(&self) -> Vec<Tool> {
        self.order
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|t| to_provider_tool(t.as_ref()))
            .collect()
    }

    /// Invoke one call and normalise the outcome
    pub async fn dispatch(&self, call: &ToolCall) -> ToolResult {
        let args = Value::Object(call.arguments.clone());
        info!(tool = %call.name, args = %args, "calling tool");

        let Some(tool) = self.get(&call.name) else {
            warn!("tool {} not found", call.name);
            return ToolResult::Error(format!("Tool {} not found", call.name));
        };

        if let Err(reason) = validate_arguments(&tool.parameters(), &call.arguments) {
            return ToolResult::Error(format!("Invalid arguments for tool {}: {}", call.name, reason));
        }

        let result = match tool.execute(call.arguments.clone()).await {
            Ok(output) => ToolResult::from_output(&call.name, output),
            Err(e) => ToolResult::failure(&call.name, e.to_string()),
        };

        debug!(tool = %call.name, error = result.is_error(), "tool finished");
        result
    }

    /// Run every call on its own task; results keep the call order
    pub async fn dispatch_all(self: &Arc<Self>, calls: &[ToolCall]) -> Vec<ToolResult> {
        let handles: Vec<_> = calls
            .iter()
            .cloned()
            .map(|call| {
                let registry = Arc::clone(self);
                tokio::spawn(async move { registry.dispatch(&call).await })
            })
            .collect();

        futures::future::join_all(handles)
            .await
            .into_iter()
            .zip(calls)
            .map(|(joined, call)| {
                joined.unwrap_or_else(|e| ToolResult::Error(format!("Tool {} crashed: {}", call.name, e)))
            })
            .collect()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
