//! Chat transport for language-model backends
//!
//! A [`Provider`] sends a conversation plus a tool catalogue to a backend and
//! returns either one completed [`ChatResponse`] or a [`ChunkStream`] of
//! partial fragments that [`StreamAggregator`] folds back into one message.

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use thiserror::Error;
use tracing::{debug, trace};

pub mod aggregate;
pub mod ollama;

pub use aggregate::{aggregate, StreamAggregator};
pub use ollama::OllamaProvider;

/// Chat transport errors
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("backend rejected request: {0}")]
    Api(String),

    #[error("backend unavailable: {0}")]
    Unavailable(String),

    #[error("backend did not answer within {0:?}")]
    Timeout(Duration),

    #[error("stream interrupted: {0}")]
    Stream(String),

    #[error("invalid response from backend")]
    InvalidResponse,
}

pub type Result<T> = std::result::Result<T, ProviderError>;

/// Author of a conversation turn
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    #[default]
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "system" => Some(Role::System),
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            "tool" => Some(Role::Tool),
            _ => None,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A tool invocation requested by the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    #[serde(default)]
    pub arguments: Map<String, Value>,
}

impl ToolCall {
    pub fn new(name: impl Into<String>, arguments: Map<String, Value>) -> Self {
        Self {
            name: name.into(),
            arguments,
        }
    }

    /// Build from an arbitrary JSON value; non-object arguments become empty
    pub fn from_value(name: impl Into<String>, arguments: Value) -> Self {
        let arguments = match arguments {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self::new(name, arguments)
    }
}

/// One turn in a conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    #[serde(default)]
    pub content: String,
    /// Reasoning trace; `None` means the backend produced none
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// Name of the tool whose result a tool-role message carries
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
}

impl Message {
    fn with_role(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            thinking: None,
            tool_calls: Vec::new(),
            tool_name: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::with_role(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::with_role(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::with_role(Role::Assistant, content)
    }

    pub fn tool(name: impl Into<String>, result: impl Into<String>) -> Self {
        let mut msg = Self::with_role(Role::Tool, result);
        msg.tool_name = Some(name.into());
        msg
    }

    pub fn with_thinking(mut self, thinking: impl Into<String>) -> Self {
        self.thinking = Some(thinking.into());
        self
    }

    pub fn with_tool_calls(mut self, calls: Vec<ToolCall>) -> Self {
        self.tool_calls = calls;
        self
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// Tool catalogue entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tool {
    #[serde(rename = "type")]
    pub tool_type: String,
    pub function: FunctionDef,
}

impl Tool {
    pub fn new(name: impl Into<String>, description: impl Into<String>, parameters: Value) -> Self {
        Self {
            tool_type: "function".to_string(),
            function: FunctionDef {
                name: name.into(),
                description: description.into(),
                parameters,
            },
        }
    }

    pub fn name(&self) -> &str {
        &self.function.name
    }
}

/// Function schema
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDef {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// Backend runtime options
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatOptions {
    pub num_thread: Option<u32>,
    pub num_predict: Option<i32>,
}

/// One chat request
#[derive(Debug, Clone)]
pub struct ChatParams {
    pub model: String,
    pub messages: Vec<Message>,
    /// Empty catalogue means the model cannot request tools
    pub tools: Vec<Tool>,
    pub stream: bool,
    pub think: bool,
    pub options: ChatOptions,
}

impl Default for ChatParams {
    fn default() -> Self {
        Self {
            model: String::new(),
            messages: Vec::new(),
            tools: Vec::new(),
            stream: false,
            think: false,
            options: ChatOptions::default(),
        }
    }
}

/// Token and timing statistics reported by the backend
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Stats {
    pub prompt_eval_count: u32,
    pub eval_count: u32,
    /// Nanoseconds
    pub total_duration: u64,
    /// Nanoseconds
    pub eval_duration: u64,
}

/// Completed model response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatResponse {
    #[serde(default)]
    pub model: String,
    pub message: Message,
    #[serde(default)]
    pub done: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub done_reason: Option<String>,
    #[serde(default)]
    pub stats: Stats,
}

impl ChatResponse {
    pub fn has_tool_calls(&self) -> bool {
        self.message.has_tool_calls()
    }

    pub fn text(content: impl Into<String>) -> Self {
        Self::from_message(Message::assistant(content))
    }

    pub fn tool_calls(calls: Vec<ToolCall>) -> Self {
        Self::from_message(Message::assistant("").with_tool_calls(calls))
    }

    pub fn from_message(message: Message) -> Self {
        Self {
            model: String::new(),
            message,
            done: true,
            done_reason: Some("stop".to_string()),
            stats: Stats::default(),
        }
    }
}

/// One incremental fragment of a streamed response
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatChunk {
    pub model: Option<String>,
    pub role: Option<Role>,
    pub content: String,
    pub thinking: Option<String>,
    pub tool_calls: Vec<ToolCall>,
    pub done: bool,
    pub done_reason: Option<String>,
    pub stats: Option<Stats>,
}

impl ChatChunk {
    pub fn content(delta: impl Into<String>) -> Self {
        Self {
            content: delta.into(),
            ..Default::default()
        }
    }

    pub fn thinking(delta: impl Into<String>) -> Self {
        Self {
            thinking: Some(delta.into()),
            ..Default::default()
        }
    }

    pub fn finished(mut self) -> Self {
        self.done = true;
        self
    }
}

/// Ordered fragments of one streamed response
pub type ChunkStream = BoxStream<'static, Result<ChatChunk>>;

/// Language-model backend
#[async_trait]
pub trait Provider: Send + Sync {
    /// Single completed response
    async fn chat(&self, params: ChatParams) -> Result<ChatResponse>;

    /// Incremental fragments in arrival order
    async fn chat_stream(&self, params: ChatParams) -> Result<ChunkStream>;

    /// Check that the backend answers for `model`
    async fn probe(&self, model: String, think: bool) -> Result<()>;

    fn default_model(&self) -> String;
}

/// Run one exchange in the requested mode under a hard timeout.
///
/// Streaming responses are merged with [`StreamAggregator`]. Expiry is
/// reported as [`ProviderError::Timeout`] and never retried.
pub async fn exchange<P>(provider: &P, params: ChatParams, timeout: Duration) -> Result<ChatResponse>
where
    P: Provider + ?Sized,
{
    trace!(
        stream = params.stream,
        tools = params.tools.len(),
        messages = params.messages.len(),
        "chat exchange"
    );

    let request = async {
        if params.stream {
            let stream = provider.chat_stream(params).await?;
            aggregate(stream).await
        } else {
            provider.chat(params).await
        }
    };

    let response = tokio::time::timeout(timeout, request)
        .await
        .map_err(|_| ProviderError::Timeout(timeout))??;

    debug!(
        tool_calls = response.message.tool_calls.len(),
        "chat exchange complete"
    );
    Ok(response)
}

/// Build an object schema of string properties
pub fn object_schema(properties: Vec<(String, String, bool)>) -> Value {
    let mut props = serde_json::Map::new();
    let mut required = Vec::new();

    for (name, description, is_required) in properties {
        props.insert(
            name.clone(),
            serde_json::json!({
                "type": "string",
                "description": description
            }),
        );
        if is_required {
            required.push(name);
        }
    }

    serde_json::json!({
        "type": "object",
        "properties": props,
        "required": required
    })
}
