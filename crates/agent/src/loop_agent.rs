//! Agent loop - core processing engine
//!
//! One [`AgentLoop`] owns one conversation. Each user request runs
//! `request -> dispatch -> fold results -> request` until the model stops
//! asking for tools or the round bound is hit, in which case one last
//! request is made without any tool catalogue.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use waypoint_config::{Config, DEFAULT_MAX_TOOL_LOOPS};
use waypoint_provider::{exchange, ChatOptions, ChatParams, Message, Provider, Role, Tool};

use crate::tools::ToolRegistry;
use crate::{AgentError, Result};

/// Per-session knobs of the loop
#[derive(Debug, Clone)]
pub struct LoopSettings {
    pub model: String,
    /// Maximum tool rounds per user request; zero means the default
    pub max_tool_loops: u32,
    pub stream: bool,
    pub think: bool,
    pub show_thoughts: bool,
    pub show_tool_results: bool,
    /// Hard limit for one chat exchange
    pub timeout: Duration,
    pub options: ChatOptions,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl LoopSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            model: config.agent.model.clone(),
            max_tool_loops: config.max_tool_loops(),
            stream: config.agent.stream,
            think: config.agent.think,
            show_thoughts: config.agent.show_thoughts,
            show_tool_results: config.agent.show_tool_results,
            timeout: config.timeout(),
            options: ChatOptions {
                num_thread: config.agent.num_threads,
                num_predict: None,
            },
        }
    }

    pub fn bound(&self) -> u32 {
        if self.max_tool_loops == 0 {
            DEFAULT_MAX_TOOL_LOOPS
        } else {
            self.max_tool_loops
        }
    }
}

/// Cooperative abort for the request a loop is currently running.
///
/// Aborting stops further rounds; tool calls already in flight finish and
/// their results are discarded.
#[derive(Debug, Clone, Default)]
pub struct AbortHandle {
    current: Arc<Mutex<CancellationToken>>,
}

impl AbortHandle {
    pub fn abort(&self) {
        if let Ok(token) = self.current.lock() {
            token.cancel();
        }
    }

    /// Fresh token for a new request
    fn begin(&self) -> CancellationToken {
        let token = CancellationToken::new();
        if let Ok(mut current) = self.current.lock() {
            *current = token.clone();
        }
        token
    }
}

/// The agent loop drives one conversation through model and tool rounds
pub struct AgentLoop<P: Provider> {
    name: String,
    provider: Arc<P>,
    tools: Arc<ToolRegistry>,
    settings: LoopSettings,
    conversation: Vec<Message>,
    available: bool,
    abort: AbortHandle,
}

impl<P: Provider> AgentLoop<P> {
    /// Create a new agent loop; call [`AgentLoop::initialize`] before use
    pub fn new(
        name: impl Into<String>,
        provider: Arc<P>,
        tools: Arc<ToolRegistry>,
        settings: LoopSettings,
    ) -> Self {
        Self {
            name: name.into(),
            provider,
            tools,
            settings,
            conversation: Vec::new(),
            available: false,
            abort: AbortHandle::default(),
        }
    }

    pub fn from_config(config: &Config, provider: Arc<P>, tools: Arc<ToolRegistry>) -> Self {
        Self::new(
            config.agent.name.clone(),
            provider,
            tools,
            LoopSettings::from_config(config),
        )
    }

    /// Seed the conversation with a system prompt
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.conversation.retain(|m| m.role != Role::System);
        self.conversation.insert(0, Message::system(prompt));
        self
    }

    /// Probe the backend once; requests fail fast when this returns false
    pub async fn initialize(&mut self) -> bool {
        info!("Initializing {} with model {}", self.name, self.settings.model);

        let probe = self
            .provider
            .probe(self.settings.model.clone(), self.settings.think);

        self.available = match tokio::time::timeout(self.settings.timeout, probe).await {
            Ok(Ok(())) => {
                info!("Model backend is connected and working");
                true
            }
            Ok(Err(e)) => {
                warn!("Model backend unavailable, {} will refuse requests: {}", self.name, e);
                false
            }
            Err(_) => {
                warn!("Model backend did not answer the probe within {:?}", self.settings.timeout);
                false
            }
        };

        self.available
    }

    /// Independent session sharing the backend and the tool registry
    pub fn fork(&self) -> Self {
        Self {
            name: self.name.clone(),
            provider: Arc::clone(&self.provider),
            tools: Arc::clone(&self.tools),
            settings: self.settings.clone(),
            conversation: self
                .conversation
                .iter()
                .filter(|m| m.role == Role::System)
                .cloned()
                .collect(),
            available: self.available,
            abort: AbortHandle::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_available(&self) -> bool {
        self.available
    }

    pub fn settings(&self) -> &LoopSettings {
        &self.settings
    }

    pub fn tools(&self) -> &Arc<ToolRegistry> {
        &self.tools
    }

    pub fn conversation(&self) -> &[Message] {
        &self.conversation
    }

    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    /// Process one user request and return the final assistant message
    pub async fn process_user_input(&mut self, input: &str) -> Result<Message> {
        self.process_user_input_with(input, |_| {}).await
    }

    /// Like [`AgentLoop::process_user_input`], calling `on_round` with every
    /// assistant message that requested tools.
    ///
    /// On error the conversation is left exactly as it was before the call.
    pub async fn process_user_input_with<F>(&mut self, input: &str, mut on_round: F) -> Result<Message>
    where
        F: FnMut(&Message) + Send,
    {
        if !self.available {
            return Err(AgentError::Unavailable(format!(
                "{} could not reach model {}; make the backend available and restart",
                self.name, self.settings.model
            )));
        }

        debug!("Processing request: {}", truncate(input, 100));

        let token = self.abort.begin();
        let checkpoint = self.conversation.len();

        let result = self.run(input, &token, &mut on_round).await;
        if let Err(e) = &result {
            warn!("Request failed, rolling back conversation: {}", e);
            self.conversation.truncate(checkpoint);
        }
        result
    }

    async fn run<F>(&mut self, input: &str, token: &CancellationToken, on_round: &mut F) -> Result<Message>
    where
        F: FnMut(&Message) + Send,
    {
        self.conversation.push(Message::user(input));

        let catalogue = self.tools.definitions();
        let bound = self.settings.bound();

        let mut answer = self.request(catalogue.clone(), token).await?;
        self.conversation.push(answer.clone());
        let mut rounds = 0;

        while answer.has_tool_calls() {
            rounds += 1;
            self.show_thoughts(&answer);
            on_round(&answer);

            info!(round = rounds, calls = answer.tool_calls.len(), "Calling tools");
            let results = self.tools.dispatch_all(&answer.tool_calls).await;

            if token.is_cancelled() {
                return Err(AgentError::Cancelled);
            }

            for (call, result) in answer.tool_calls.iter().zip(results) {
                if self.settings.show_tool_results {
                    info!(tool = %call.name, error = result.is_error(), "Tool result: {}", result_preview(&result));
                }
                self.conversation.push(Message::tool(&call.name, result.into_content()));
            }

            if rounds < bound {
                answer = self.request(catalogue.clone(), token).await?;
                self.conversation.push(answer.clone());
            } else {
                warn!(
                    "Reached maximum of {} tool rounds for a single request, asking for a final answer without tools",
                    bound
                );
                let mut last = self.request(Vec::new(), token).await?;
                if last.has_tool_calls() {
                    warn!("Dropping {} tool calls from the final answer", last.tool_calls.len());
                    last.tool_calls.clear();
                }
                self.conversation.push(last.clone());
                answer = last;
                break;
            }
        }

        self.show_thoughts(&answer);
        Ok(answer)
    }

    async fn request(&self, tools: Vec<Tool>, token: &CancellationToken) -> Result<Message> {
        if token.is_cancelled() {
            return Err(AgentError::Cancelled);
        }

        debug!(
            messages = self.conversation.len(),
            tools = tools.len(),
            stream = self.settings.stream,
            "Requesting model response"
        );

        let params = ChatParams {
            model: self.settings.model.clone(),
            messages: self.conversation.clone(),
            tools,
            stream: self.settings.stream,
            think: self.settings.think,
            options: self.settings.options.clone(),
        };

        tokio::select! {
            _ = token.cancelled() => Err(AgentError::Cancelled),
            response = exchange(self.provider.as_ref(), params, self.settings.timeout) => {
                let mut message = response?.message;
                message.role = Role::Assistant;
                Ok(message)
            }
        }
    }

    fn show_thoughts(&self, message: &Message) {
        if !self.settings.show_thoughts {
            return;
        }
        if let Some(thinking) = &message.thinking {
            info!("Thoughts of {}: {}", self.name, thinking);
        }
    }
}

fn result_preview(result: &crate::ToolResult) -> &str {
    match result {
        crate::ToolResult::Text(text) | crate::ToolResult::Error(text) => truncate(text, 200),
    }
}

fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_bound_fallback() {
        let mut settings = LoopSettings::default();
        assert_eq!(settings.bound(), 4);

        settings.max_tool_loops = 0;
        assert_eq!(settings.bound(), 4);

        settings.max_tool_loops = 2;
        assert_eq!(settings.bound(), 2);
    }

    #[test]
    fn test_settings_from_config() {
        let mut config = Config::default();
        config.agent.max_tool_loops = -1;
        config.agent.stream = true;
        config.agent.num_threads = Some(6);

        let settings = LoopSettings::from_config(&config);
        assert_eq!(settings.max_tool_loops, 4);
        assert!(settings.stream);
        assert_eq!(settings.options.num_thread, Some(6));
        assert_eq!(settings.timeout, Duration::from_secs(600));
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("Hattingen", 3), "Hat");
        assert_eq!(truncate("Hütte", 2), "Hü");
        assert_eq!(truncate("ok", 10), "ok");
    }

    #[test]
    fn test_abort_handle_targets_current_request() {
        let handle = AbortHandle::default();
        let first = handle.begin();
        handle.abort();
        assert!(first.is_cancelled());

        let second = handle.begin();
        assert!(!second.is_cancelled());
    }
}
