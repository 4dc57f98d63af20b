//! Stream aggregation
//!
//! Folds an ordered sequence of [`ChatChunk`] fragments into one
//! [`ChatResponse`]. Per field:
//!
//! - `content`: concatenated
//! - `thinking`: concatenated, absent until a fragment first carries it
//! - `tool_calls`: concatenated in arrival order
//! - `role`, `done`, `done_reason`, `stats`: latest fragment wins
//! - `model`: first fragment that names one wins

use futures::{Stream, StreamExt};
use tracing::{trace, warn};

use crate::{ChatChunk, ChatResponse, Message, Result, Role, Stats, ToolCall};

/// Accumulator for one streamed response
#[derive(Debug, Default)]
pub struct StreamAggregator {
    model: Option<String>,
    role: Option<Role>,
    content: String,
    thinking: Option<String>,
    tool_calls: Vec<ToolCall>,
    done: bool,
    done_reason: Option<String>,
    stats: Stats,
    fragments: usize,
}

impl StreamAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge one fragment
    pub fn push(&mut self, chunk: ChatChunk) {
        self.fragments += 1;

        if self.model.is_none() {
            self.model = chunk.model;
        }
        if chunk.role.is_some() {
            self.role = chunk.role;
        }

        self.content.push_str(&chunk.content);

        if let Some(delta) = chunk.thinking {
            self.thinking.get_or_insert_with(String::new).push_str(&delta);
        }

        self.tool_calls.extend(chunk.tool_calls);

        self.done = chunk.done;
        if chunk.done_reason.is_some() {
            self.done_reason = chunk.done_reason;
        }
        if let Some(stats) = chunk.stats {
            self.stats = stats;
        }
    }

    /// Number of fragments merged so far
    pub fn fragments(&self) -> usize {
        self.fragments
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Produce the accumulated response
    pub fn finish(self) -> ChatResponse {
        ChatResponse {
            model: self.model.unwrap_or_default(),
            message: Message {
                role: self.role.unwrap_or(Role::Assistant),
                content: self.content,
                thinking: self.thinking,
                tool_calls: self.tool_calls,
                tool_name: None,
            },
            done: self.done,
            done_reason: self.done_reason,
            stats: self.stats,
        }
    }
}

/// Drain a fragment stream into one response.
///
/// The first stream error aborts aggregation and is returned as is.
pub async fn aggregate<S>(mut stream: S) -> Result<ChatResponse>
where
    S: Stream<Item = Result<ChatChunk>> + Unpin,
{
    let mut aggregator = StreamAggregator::new();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        trace!(fragment = aggregator.fragments(), done = chunk.done, "stream fragment");
        aggregator.push(chunk);
    }

    if !aggregator.is_done() {
        warn!(
            "stream ended after {} fragments without a done marker",
            aggregator.fragments()
        );
    }

    Ok(aggregator.finish())
}
