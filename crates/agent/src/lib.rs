//! Tool-augmented agent core
//!
//! Drives a chat session through model rounds and tool dispatch until the
//! model produces a final answer or the round bound is reached.

use thiserror::Error;

pub mod context;
pub mod loop_agent;
pub mod tools;

pub use context::ContextBuilder;
pub use loop_agent::{AbortHandle, AgentLoop, LoopSettings};
pub use tools::{ToolOutput, ToolRegistry, ToolResult, ToolTrait};

use waypoint_provider::ProviderError;

/// Agent errors
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("model backend unavailable: {0}")]
    Unavailable(String),

    #[error("chat request failed: {0}")]
    Provider(#[from] ProviderError),

    #[error("request cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, AgentError>;
