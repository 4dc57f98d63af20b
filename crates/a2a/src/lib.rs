//! Remote agent protocol
//!
//! Agents discover each other through an agent card and exchange messages
//! over JSON-RPC 2.0. Long-running requests are reported as a task whose
//! lifecycle events are streamed back as server-sent events.
//!
//! - [`server`] hosts an [`AgentExecutor`] behind the protocol
//! - [`client`] talks to a remote agent
//! - [`bridge`] turns remote skills into local tools

use thiserror::Error;

pub mod bridge;
pub mod card;
pub mod client;
pub mod executor;
pub mod jsonrpc;
pub mod server;

pub use bridge::{DelegationBridge, RemoteSkillTool};
pub use card::{AgentCapabilities, AgentCard, AgentSkill, CARD_PATH, PROTOCOL_VERSION};
pub use client::A2aClient;
pub use executor::{AgentExecutor, LoopExecutor, RequestContext, DEFAULT_MAX_SESSIONS};
pub use server::A2aServer;

use waypoint_bus::ProtocolError;

/// Protocol errors
#[derive(Error, Debug)]
pub enum A2aError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("remote agent error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("{0}")]
    Protocol(#[from] ProtocolError),

    #[error("unexpected response: {0}")]
    InvalidResponse(String),
}

pub type Result<T> = std::result::Result<T, A2aError>;
