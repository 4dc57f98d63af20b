//! Closure-backed tools

use std::future::Future;
use std::pin::Pin;

use async_trait::async_trait;
use serde_json::{Map, Value};

use super::{BoxError, ToolOutput, ToolTrait};

type Handler = dyn Fn(Map<String, Value>) -> Pin<Box<dyn Future<Output = Result<ToolOutput, BoxError>> + Send>>
    + Send
    + Sync;

/// Tool whose behaviour is an async closure
pub struct FunctionTool {
    name: String,
    description: String,
    parameters: Value,
    handler: Box<Handler>,
}

impl FunctionTool {
    pub fn new<F, Fut>(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Value,
        handler: F,
    ) -> Self
    where
        F: Fn(Map<String, Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ToolOutput, BoxError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
            handler: Box::new(move |args| Box::pin(handler(args))),
        }
    }
}

#[async_trait]
impl ToolTrait for FunctionTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters(&self) -> Value {
        self.parameters.clone()
    }

    async fn execute(&self, args: Map<String, Value>) -> Result<ToolOutput, BoxError> {
        (self.handler)(args).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_function_tool_runs_closure() {
        let tool = FunctionTool::new(
            "echo",
            "Echo the text argument",
            json!({"type": "object", "properties": {"text": {"type": "string"}}}),
            |args| async move {
                let text = args.get("text").and_then(Value::as_str).unwrap_or_default();
                Ok::<_, BoxError>(ToolOutput::text(text.to_uppercase()))
            },
        );

        assert_eq!(tool.name(), "echo");
        assert_eq!(tool.description(), "Echo the text argument");

        let mut args = Map::new();
        args.insert("text".to_string(), json!("hattingen"));
        let output = tool.execute(args).await.unwrap();
        assert_eq!(output, ToolOutput::text("HATTINGEN"));
    }

    #[tokio::test]
    async fn test_function_tool_propagates_error() {
        let tool = FunctionTool::new("fails", "Always fails", json!({}), |_| async move {
            Err::<ToolOutput, BoxError>("upstream timeout".into())
        });

        let err = tool.execute(Map::new()).await.unwrap_err();
        assert_eq!(err.to_string(), "upstream timeout");
    }
}
