//! Client for a remote agent

use async_stream::try_stream;
use futures::stream::BoxStream;
use futures::StreamExt;
use reqwest::header::ACCEPT;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::{debug, trace};

use waypoint_bus::{AgentMessage, StreamEvent};

use crate::card::{card_url, AgentCard, CARD_PATH};
use crate::jsonrpc::{methods, JsonRpcRequest, JsonRpcResponse, MessageSendParams};
use crate::{A2aError, Result};

/// Events of one streamed exchange, in emission order
pub type EventStream = BoxStream<'static, Result<StreamEvent>>;

pub struct A2aClient {
    http: Client,
    card: AgentCard,
    endpoint: String,
}

impl A2aClient {
    /// Fetch the card at `url` and talk to the endpoint it names.
    ///
    /// `url` may be the agent's base URL or the card URL itself.
    pub async fn from_card_url(url: &str) -> Result<Self> {
        Self::from_card_url_with(Client::new(), url).await
    }

    pub async fn from_card_url_with(http: Client, url: &str) -> Result<Self> {
        let url = card_url(url);
        debug!("fetching agent card from {}", url);

        let card: AgentCard = http.get(&url).send().await?.error_for_status()?.json().await?;

        let endpoint = if card.url.is_empty() {
            url.trim_end_matches(CARD_PATH).to_string() + "/"
        } else {
            card.url.clone()
        };

        debug!(agent = %card.name, skills = card.skills.len(), "agent card loaded");
        Ok(Self { http, card, endpoint })
    }

    pub fn card(&self) -> &AgentCard {
        &self.card
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Single-shot exchange; the result is the finished task or a direct reply
    pub async fn send_message(&self, message: AgentMessage) -> Result<StreamEvent> {
        let params = serde_json::to_value(MessageSendParams { message })?;
        let result = self.call(methods::SEND, params).await?;
        Ok(serde_json::from_value(result)?)
    }

    /// Streaming exchange over server-sent events
    pub async fn send_message_stream(&self, message: AgentMessage) -> Result<EventStream> {
        let params = serde_json::to_value(MessageSendParams { message })?;
        let request = JsonRpcRequest::new(methods::STREAM, params);

        let response = self
            .http
            .post(&self.endpoint)
            .header(ACCEPT, "text/event-stream")
            .json(&request)
            .send()
            .await?
            .error_for_status()?;
        let mut bytes = response.bytes_stream();

        let stream = try_stream! {
            let mut buffer = String::new();

            while let Some(next) = bytes.next().await {
                buffer.push_str(&String::from_utf8_lossy(&next?));

                while let Some(end) = buffer.find('\n') {
                    let line: String = buffer.drain(..=end).collect();
                    if let Some(event) = parse_sse_line(&line)? {
                        yield event;
                    }
                }
            }

            if let Some(event) = parse_sse_line(&buffer)? {
                yield event;
            }
        };

        Ok(Box::pin(stream))
    }

    /// Ask the agent to cancel a task
    pub async fn cancel_task(&self, task_id: &str) -> Result<()> {
        self.call(methods::CANCEL, json!({ "id": task_id })).await?;
        Ok(())
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value> {
        let request = JsonRpcRequest::new(method, params);
        trace!(method, "json-rpc call");

        let response: JsonRpcResponse = self
            .http
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        response.into_result()
    }
}

/// Parse one SSE line; anything but a `data` field yields nothing
fn parse_sse_line(line: &str) -> Result<Option<StreamEvent>> {
    let line = line.trim_end_matches(['\r', '\n']);
    let Some(data) = line.strip_prefix("data:") else {
        return Ok(None);
    };
    let data = data.trim();
    if data.is_empty() {
        return Ok(None);
    }

    let response: JsonRpcResponse = serde_json::from_str(data)?;
    let result = response.into_result()?;
    if result.is_null() {
        return Err(A2aError::InvalidResponse("stream event without result".to_string()));
    }
    Ok(Some(serde_json::from_value(result)?))
}
