//! Delegation bridge: remote skills as local tools
//!
//! Every skill on a remote agent's card becomes one tool taking a single
//! free-text request. Calling the tool submits that request as a new task
//! to the remote agent and resolves to the task's final answer.

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{Map, Value};
use tracing::{debug, info};

use waypoint_agent::tools::BoxError;
use waypoint_agent::{ToolOutput, ToolRegistry, ToolTrait};
use waypoint_bus::{AgentMessage, Progress, TaskTracker};
use waypoint_provider::object_schema;

use crate::card::AgentSkill;
use crate::client::A2aClient;
use crate::Result;

/// One skill of a remote agent
pub struct RemoteSkillTool {
    client: Arc<A2aClient>,
    skill: AgentSkill,
}

impl RemoteSkillTool {
    pub fn new(client: Arc<A2aClient>, skill: AgentSkill) -> Self {
        Self { client, skill }
    }

    pub fn agent_name(&self) -> &str {
        &self.client.card().name
    }

    /// The outbound request embedding the skill and the caller's text
    pub fn request_text(&self, text: &str) -> String {
        format!(
            "Perform the task \"{}\" which is \"{}\". Use the following information \"{}\".",
            self.skill.id, self.skill.description, text
        )
    }

    async fn delegate(&self, message: AgentMessage) -> Result<String> {
        let mut tracker = TaskTracker::new();

        if self.client.card().supports_streaming() {
            let mut events = self.client.send_message_stream(message).await?;
            while let Some(event) = events.next().await {
                let progress = tracker.observe(event?)?;
                self.report(&progress);
            }
        } else {
            let event = self.client.send_message(message).await?;
            let progress = tracker.observe(event)?;
            self.report(&progress);
        }

        Ok(tracker.finish()?)
    }

    fn report(&self, progress: &Progress) {
        match progress {
            Progress::Started(task_id) => debug!(agent = %self.agent_name(), task_id = %task_id, "remote task started"),
            Progress::Working(Some(text)) | Progress::Note(text) => {
                debug!(agent = %self.agent_name(), "intermediate message: {}", text)
            }
            Progress::Working(None) => {}
            Progress::Completed(_) | Progress::Reply(_) => {
                debug!(agent = %self.agent_name(), skill = %self.skill.id, "remote task finished")
            }
        }
    }
}

#[async_trait]
impl ToolTrait for RemoteSkillTool {
    fn name(&self) -> &str {
        &self.skill.id
    }

    fn description(&self) -> &str {
        &self.skill.description
    }

    fn parameters(&self) -> Value {
        object_schema(vec![(
            "text".to_string(),
            "An english request which contains all relevant information for this tool.".to_string(),
            true,
        )])
    }

    async fn execute(&self, args: Map<String, Value>) -> std::result::Result<ToolOutput, BoxError> {
        let text = args.get("text").and_then(Value::as_str).unwrap_or_default();
        info!(agent = %self.agent_name(), skill = %self.skill.id, "delegating: {}", text);

        let message = AgentMessage::user(self.request_text(text));
        let answer = self.delegate(message).await?;
        Ok(ToolOutput::text(answer))
    }
}

/// Remote agents whose skills are offered as tools
pub struct DelegationBridge {
    clients: Vec<Arc<A2aClient>>,
}

impl DelegationBridge {
    /// Fetch the card of every agent once; an unreachable agent fails the
    /// whole setup
    pub async fn connect<S: AsRef<str>>(urls: &[S]) -> Result<Self> {
        let cards = futures::future::join_all(urls.iter().map(|url| A2aClient::from_card_url(url.as_ref()))).await;

        let mut clients = Vec::with_capacity(cards.len());
        for client in cards {
            let client = client?;
            info!(
                "connected to remote agent {} with {} skills",
                client.card().name,
                client.card().skills.len()
            );
            clients.push(Arc::new(client));
        }

        Ok(Self { clients })
    }

    pub fn from_clients(clients: Vec<A2aClient>) -> Self {
        Self {
            clients: clients.into_iter().map(Arc::new).collect(),
        }
    }

    pub fn clients(&self) -> &[Arc<A2aClient>] {
        &self.clients
    }

    /// Register one tool per remote skill; returns the number registered
    pub fn register(&self, registry: &mut ToolRegistry) -> usize {
        let mut count = 0;
        for client in &self.clients {
            for skill in &client.card().skills {
                registry.register(RemoteSkillTool::new(Arc::clone(client), skill.clone()));
                count += 1;
            }
        }
        count
    }
}
