//! Task lifecycle bus
//!
//! Event vocabulary for delegated tasks and both ends of one task's event
//! stream: [`TaskPublisher`] emits events in lifecycle order and
//! [`TaskTracker`] checks them on the receiving side.
//!
//! A task moves `submitted -> working* -> terminal`. Exactly one terminal
//! event is emitted and nothing may follow it.

use chrono::{DateTime, Utc};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, trace};

pub mod tracker;

pub use tracker::{Progress, ProtocolError, TaskTracker};

/// Publishing side errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BusError {
    #[error("task {0} has not been submitted")]
    NotSubmitted(String),

    #[error("task {0} was already submitted")]
    AlreadySubmitted(String),

    #[error("task {0} already reached a terminal state")]
    AlreadyFinished(String),

    #[error("no receiver left for task {0}")]
    Closed(String),
}

/// Sender of a protocol message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Agent,
}

/// One part of a protocol message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Part {
    Text { text: String },
    Data { data: serde_json::Value },
}

/// Message exchanged between agents
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename = "message", rename_all = "camelCase")]
pub struct AgentMessage {
    pub message_id: String,
    pub role: MessageRole,
    #[serde(default)]
    pub parts: Vec<Part>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
}

impl AgentMessage {
    /// Create a message with a fresh id
    pub fn new(role: MessageRole, parts: Vec<Part>) -> Self {
        Self {
            message_id: uuid::Uuid::new_v4().to_string(),
            role,
            parts,
            context_id: None,
            task_id: None,
        }
    }

    /// Single text part from the user side
    pub fn user(text: impl Into<String>) -> Self {
        Self::new(MessageRole::User, vec![Part::Text { text: text.into() }])
    }

    /// Single text part from the agent side
    pub fn agent(text: impl Into<String>) -> Self {
        Self::new(MessageRole::Agent, vec![Part::Text { text: text.into() }])
    }

    /// Attach conversation and task identifiers
    pub fn in_task(mut self, context_id: impl Into<String>, task_id: impl Into<String>) -> Self {
        self.context_id = Some(context_id.into());
        self.task_id = Some(task_id.into());
        self
    }

    /// First textual part, if any
    pub fn first_text(&self) -> Option<&str> {
        self.parts.iter().find_map(|part| match part {
            Part::Text { text } => Some(text.as_str()),
            Part::Data { .. } => None,
        })
    }
}

/// Lifecycle state of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskState {
    Submitted,
    Working,
    Completed,
    Failed,
    Canceled,
    Rejected,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TaskState::Submitted | TaskState::Working)
    }

    /// Terminal states other than `completed`
    pub fn is_failure(&self) -> bool {
        self.is_terminal() && *self != TaskState::Completed
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Submitted => "submitted",
            TaskState::Working => "working",
            TaskState::Completed => "completed",
            TaskState::Failed => "failed",
            TaskState::Canceled => "canceled",
            TaskState::Rejected => "rejected",
        }
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Current status of a task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskStatus {
    pub state: TaskState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<AgentMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl TaskStatus {
    pub fn new(state: TaskState, message: Option<AgentMessage>) -> Self {
        Self {
            state,
            message,
            timestamp: Some(Utc::now()),
        }
    }

    /// Text of the attached message, if any
    pub fn text(&self) -> Option<&str> {
        self.message.as_ref().and_then(AgentMessage::first_text)
    }
}

/// A delegated unit of work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename = "task", rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub context_id: String,
    pub status: TaskStatus,
    #[serde(default)]
    pub history: Vec<AgentMessage>,
}

/// State change of a running task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename = "status-update", rename_all = "camelCase")]
pub struct TaskStatusUpdateEvent {
    pub task_id: String,
    pub context_id: String,
    pub status: TaskStatus,
    #[serde(rename = "final", default)]
    pub is_final: bool,
}

/// One event on a task stream, discriminated by `kind`.
///
/// Each payload writes its own `kind`, so standalone messages and tasks
/// carry it as well.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum StreamEvent {
    Task(Task),
    StatusUpdate(TaskStatusUpdateEvent),
    Message(AgentMessage),
}

const EVENT_KINDS: &[&str] = &["task", "status-update", "message"];

impl<'de> Deserialize<'de> for StreamEvent {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = serde_json::Value::deserialize(deserializer)?;
        let kind = value
            .get("kind")
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| D::Error::missing_field("kind"))?;

        let event = match kind {
            "task" => serde_json::from_value(value).map(StreamEvent::Task),
            "status-update" => serde_json::from_value(value).map(StreamEvent::StatusUpdate),
            "message" => serde_json::from_value(value).map(StreamEvent::Message),
            other => return Err(D::Error::unknown_variant(other, EVENT_KINDS)),
        };
        event.map_err(D::Error::custom)
    }
}

impl StreamEvent {
    /// Task the event belongs to; direct messages may carry none
    pub fn task_id(&self) -> Option<&str> {
        match self {
            StreamEvent::Task(task) => Some(&task.id),
            StreamEvent::StatusUpdate(update) => Some(&update.task_id),
            StreamEvent::Message(message) => message.task_id.as_deref(),
        }
    }

    /// Whether the event ends its stream
    pub fn is_final(&self) -> bool {
        match self {
            StreamEvent::Task(task) => task.status.state.is_terminal(),
            StreamEvent::StatusUpdate(update) => update.is_final,
            StreamEvent::Message(_) => false,
        }
    }
}

/// Channel types for task events
pub type EventSender = mpsc::UnboundedSender<StreamEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<StreamEvent>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Pending,
    Submitted,
    Finished,
}

/// Emits the events of one task in lifecycle order.
///
/// Out-of-order calls are refused with a [`BusError`] and nothing is sent.
#[derive(Debug)]
pub struct TaskPublisher {
    task_id: String,
    context_id: String,
    sender: EventSender,
    phase: Phase,
}

impl TaskPublisher {
    pub fn new(task_id: impl Into<String>, context_id: impl Into<String>, sender: EventSender) -> Self {
        Self {
            task_id: task_id.into(),
            context_id: context_id.into(),
            sender,
            phase: Phase::Pending,
        }
    }

    /// Publisher plus the receiving end of its stream
    pub fn channel(task_id: impl Into<String>, context_id: impl Into<String>) -> (Self, EventReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(task_id, context_id, tx), rx)
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn context_id(&self) -> &str {
        &self.context_id
    }

    /// Whether a terminal event or direct reply was sent
    pub fn is_finished(&self) -> bool {
        self.phase == Phase::Finished
    }

    /// Announce the task; must be the first event
    pub fn submitted(&mut self, request: AgentMessage) -> Result<(), BusError> {
        match self.phase {
            Phase::Pending => {}
            Phase::Submitted => return Err(BusError::AlreadySubmitted(self.task_id.clone())),
            Phase::Finished => return Err(BusError::AlreadyFinished(self.task_id.clone())),
        }

        let request = request.in_task(&self.context_id, &self.task_id);
        let task = Task {
            id: self.task_id.clone(),
            context_id: self.context_id.clone(),
            status: TaskStatus::new(TaskState::Submitted, None),
            history: vec![request],
        };

        debug!(task_id = %self.task_id, "task submitted");
        self.send(StreamEvent::Task(task))?;
        self.phase = Phase::Submitted;
        Ok(())
    }

    /// Progress report, optionally carrying an intermediate message
    pub fn working(&mut self, message: Option<AgentMessage>) -> Result<(), BusError> {
        self.ensure_running()?;
        trace!(task_id = %self.task_id, "task working");
        self.status(TaskState::Working, message, false)
    }

    /// Progress report with a text message from the agent
    pub fn working_text(&mut self, text: impl Into<String>) -> Result<(), BusError> {
        self.working(Some(AgentMessage::agent(text)))
    }

    /// Successful terminal event carrying the final answer
    pub fn complete(&mut self, answer: impl Into<String>) -> Result<(), BusError> {
        self.finish(TaskState::Completed, answer.into())
    }

    /// Failure terminal event carrying the reason
    pub fn fail(&mut self, reason: impl Into<String>) -> Result<(), BusError> {
        self.finish(TaskState::Failed, reason.into())
    }

    /// Answer directly without a task; only valid before submission
    pub fn reply(&mut self, message: AgentMessage) -> Result<(), BusError> {
        match self.phase {
            Phase::Pending => {}
            Phase::Submitted => return Err(BusError::AlreadySubmitted(self.task_id.clone())),
            Phase::Finished => return Err(BusError::AlreadyFinished(self.task_id.clone())),
        }

        let mut message = message;
        message.context_id = Some(self.context_id.clone());
        self.send(StreamEvent::Message(message))?;
        self.phase = Phase::Finished;
        Ok(())
    }

    fn finish(&mut self, state: TaskState, text: String) -> Result<(), BusError> {
        self.ensure_running()?;
        debug!(task_id = %self.task_id, %state, "task finished");
        self.status(state, Some(AgentMessage::agent(text)), true)?;
        self.phase = Phase::Finished;
        Ok(())
    }

    fn ensure_running(&self) -> Result<(), BusError> {
        match self.phase {
            Phase::Submitted => Ok(()),
            Phase::Pending => Err(BusError::NotSubmitted(self.task_id.clone())),
            Phase::Finished => Err(BusError::AlreadyFinished(self.task_id.clone())),
        }
    }

    fn status(&self, state: TaskState, message: Option<AgentMessage>, is_final: bool) -> Result<(), BusError> {
        let message = message.map(|m| m.in_task(&self.context_id, &self.task_id));
        self.send(StreamEvent::StatusUpdate(TaskStatusUpdateEvent {
            task_id: self.task_id.clone(),
            context_id: self.context_id.clone(),
            status: TaskStatus::new(state, message),
            is_final,
        }))
    }

    fn send(&self, event: StreamEvent) -> Result<(), BusError> {
        self.sender
            .send(event)
            .map_err(|_| BusError::Closed(self.task_id.clone()))
    }
}
