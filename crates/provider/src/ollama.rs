//! Ollama backend
//!
//! Speaks the `/api/chat` endpoint in both single-shot and newline-delimited
//! streaming mode, and `/api/generate` for the availability probe.

use std::time::Duration;

use async_stream::try_stream;
use futures::StreamExt;
use reqwest::Client;
use serde_json::{json, Value};

use crate::*;

const PROBE_PROMPT: &str = "Hello, respond with just \"OK\" if you can hear me.";

/// Ollama chat node
pub struct OllamaProvider {
    client: Client,
    base_url: String,
    default_model: String,
}

impl OllamaProvider {
    /// `timeout` bounds each whole request, body included
    pub fn new(
        base_url: impl Into<String>,
        default_model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            default_model: default_model.into(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn build_request(&self, params: &ChatParams, stream: bool) -> Value {
        let model = if params.model.is_empty() {
            self.default_model.clone()
        } else {
            params.model.clone()
        };

        let messages: Vec<Value> = params
            .messages
            .iter()
            .map(|m| {
                let mut obj = json!({ "role": m.role.as_str(), "content": &m.content });
                if let Some(thinking) = &m.thinking {
                    obj["thinking"] = json!(thinking);
                }
                if !m.tool_calls.is_empty() {
                    let calls: Vec<Value> = m
                        .tool_calls
                        .iter()
                        .map(|c| json!({ "function": { "name": &c.name, "arguments": &c.arguments } }))
                        .collect();
                    obj["tool_calls"] = json!(calls);
                }
                if let Some(name) = &m.tool_name {
                    obj["tool_name"] = json!(name);
                }
                obj
            })
            .collect();

        let mut body = json!({
            "model": model,
            "messages": messages,
            "stream": stream,
            "think": params.think,
        });

        if !params.tools.is_empty() {
            body["tools"] = json!(params.tools);
        }

        let options = options_json(&params.options);
        if !options.is_empty() {
            body["options"] = Value::Object(options);
        }

        body
    }

    async fn post(&self, path: &str, body: &Value) -> Result<reqwest::Response> {
        let url = format!("{}{}", self.base_url, path);
        trace!("POST {}", url);

        let response = self.client.post(&url).json(body).send().await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<Value>(&text)
                .ok()
                .and_then(|v| v["error"].as_str().map(str::to_string))
                .unwrap_or(text);
            return Err(ProviderError::Api(format!("{}: {}", status.as_u16(), message)));
        }

        Ok(response)
    }
}

fn options_json(options: &ChatOptions) -> serde_json::Map<String, Value> {
    let mut map = serde_json::Map::new();
    if let Some(threads) = options.num_thread {
        map.insert("num_thread".to_string(), json!(threads));
    }
    if let Some(predict) = options.num_predict {
        map.insert("num_predict".to_string(), json!(predict));
    }
    map
}

fn parse_tool_calls(message: &Value) -> Vec<ToolCall> {
    message["tool_calls"]
        .as_array()
        .map(|calls| {
            calls
                .iter()
                .map(|call| {
                    let function = &call["function"];
                    let name = function["name"].as_str().unwrap_or_default();
                    // Some backends send arguments as an encoded string
                    let arguments = match &function["arguments"] {
                        Value::String(s) => serde_json::from_str(s).unwrap_or(Value::Null),
                        other => other.clone(),
                    };
                    ToolCall::from_value(name, arguments)
                })
                .collect()
        })
        .unwrap_or_default()
}

fn parse_stats(json: &Value) -> Option<Stats> {
    json.get("eval_count")?;
    Some(Stats {
        prompt_eval_count: json["prompt_eval_count"].as_u64().unwrap_or(0) as u32,
        eval_count: json["eval_count"].as_u64().unwrap_or(0) as u32,
        total_duration: json["total_duration"].as_u64().unwrap_or(0),
        eval_duration: json["eval_duration"].as_u64().unwrap_or(0),
    })
}

fn parse_chunk(json: &Value) -> Result<ChatChunk> {
    if let Some(error) = json["error"].as_str() {
        return Err(ProviderError::Api(error.to_string()));
    }
    let message = &json["message"];

    Ok(ChatChunk {
        model: json["model"].as_str().map(str::to_string),
        role: message["role"].as_str().and_then(Role::parse),
        content: message["content"].as_str().unwrap_or_default().to_string(),
        thinking: message["thinking"].as_str().map(str::to_string),
        tool_calls: parse_tool_calls(message),
        done: json["done"].as_bool().unwrap_or(false),
        done_reason: json["done_reason"].as_str().map(str::to_string),
        stats: parse_stats(json),
    })
}

fn parse_response(json: &Value) -> Result<ChatResponse> {
    if json.get("message").map_or(true, |m| !m.is_object()) {
        if let Some(error) = json["error"].as_str() {
            return Err(ProviderError::Api(error.to_string()));
        }
        return Err(ProviderError::InvalidResponse);
    }

    let mut aggregator = StreamAggregator::new();
    aggregator.push(parse_chunk(json)?);
    Ok(aggregator.finish())
}

/// Parse one NDJSON line; blank lines yield nothing
fn parse_line(line: &[u8]) -> Result<Option<ChatChunk>> {
    let line = String::from_utf8_lossy(line);
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let json: Value = serde_json::from_str(line)?;
    parse_chunk(&json).map(Some)
}

#[async_trait::async_trait]
impl Provider for OllamaProvider {
    async fn chat(&self, params: ChatParams) -> Result<ChatResponse> {
        let body = self.build_request(&params, false);
        let json: Value = self.post("/api/chat", &body).await?.json().await?;

        debug!(
            "chat response with {} tool calls",
            json["message"]["tool_calls"]
                .as_array()
                .map(|v| v.len())
                .unwrap_or(0)
        );

        parse_response(&json)
    }

    async fn chat_stream(&self, params: ChatParams) -> Result<ChunkStream> {
        let body = self.build_request(&params, true);
        let response = self.post("/api/chat", &body).await?;
        let mut bytes = response.bytes_stream();

        let stream = try_stream! {
            let mut buffer: Vec<u8> = Vec::new();

            while let Some(next) = bytes.next().await {
                let next = next.map_err(|e| ProviderError::Stream(e.to_string()))?;
                buffer.extend_from_slice(&next);

                while let Some(end) = buffer.iter().position(|b| *b == b'\n') {
                    let line: Vec<u8> = buffer.drain(..=end).collect();
                    if let Some(chunk) = parse_line(&line)? {
                        yield chunk;
                    }
                }
            }

            if let Some(chunk) = parse_line(&buffer)? {
                yield chunk;
            }
        };

        Ok(Box::pin(stream))
    }

    async fn probe(&self, model: String, think: bool) -> Result<()> {
        let mut body = json!({
            "model": model,
            "prompt": PROBE_PROMPT,
            "stream": false,
            "think": think,
        });
        if !think {
            body["options"] = json!({ "num_predict": 10 });
        }

        let json: Value = self
            .post("/api/generate", &body)
            .await
            .map_err(|e| ProviderError::Unavailable(e.to_string()))?
            .json()
            .await
            .map_err(|e| ProviderError::Unavailable(e.to_string()))?;

        let answered = ["response", "thinking"]
            .iter()
            .any(|key| json[*key].as_str().is_some_and(|s| !s.is_empty()));

        if answered {
            Ok(())
        } else {
            Err(ProviderError::Unavailable(format!(
                "model {} returned an empty probe response",
                model
            )))
        }
    }

    fn default_model(&self) -> String {
        self.default_model.clone()
    }
}
