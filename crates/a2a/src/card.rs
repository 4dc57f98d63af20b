//! Agent card: the capability catalogue an agent publishes

use serde::{Deserialize, Serialize};

use waypoint_config::Config;

/// Well-known location of the card, relative to the agent's base URL
pub const CARD_PATH: &str = "/.well-known/agent-card.json";

pub const PROTOCOL_VERSION: &str = "0.3.0";

/// A skill the agent offers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSkill {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentCapabilities {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub streaming: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentCard {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_protocol_version")]
    pub protocol_version: String,
    #[serde(default)]
    pub version: String,
    /// JSON-RPC endpoint of the agent
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub skills: Vec<AgentSkill>,
    #[serde(default)]
    pub capabilities: AgentCapabilities,
    #[serde(default = "default_modes")]
    pub default_input_modes: Vec<String>,
    #[serde(default = "default_modes")]
    pub default_output_modes: Vec<String>,
}

fn default_protocol_version() -> String {
    PROTOCOL_VERSION.to_string()
}

fn default_modes() -> Vec<String> {
    vec!["text".to_string()]
}

impl AgentCard {
    /// Card for the locally hosted agent
    pub fn from_config(config: &Config) -> Self {
        Self {
            name: config.agent.name.clone(),
            description: config.server.description.clone(),
            protocol_version: default_protocol_version(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            url: config.server_url(),
            skills: config
                .server
                .skills
                .iter()
                .map(|skill| AgentSkill {
                    id: skill.id.clone(),
                    name: skill.name.clone(),
                    description: skill.description.clone(),
                    tags: skill.tags.clone(),
                })
                .collect(),
            capabilities: AgentCapabilities {
                streaming: Some(true),
            },
            default_input_modes: default_modes(),
            default_output_modes: default_modes(),
        }
    }

    /// Agents that do not state otherwise are assumed to stream
    pub fn supports_streaming(&self) -> bool {
        self.capabilities.streaming.unwrap_or(true)
    }
}

/// Card URL for an agent; full card URLs are returned as they are
pub fn card_url(agent_url: &str) -> String {
    if agent_url.ends_with(".json") {
        agent_url.to_string()
    } else {
        format!("{}{}", agent_url.trim_end_matches('/'), CARD_PATH)
    }
}
