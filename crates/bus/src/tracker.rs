//! Consumer side of a task stream
//!
//! [`TaskTracker`] is fed events in arrival order and enforces the lifecycle:
//! one task announcement, any number of `working` updates, one terminal.
//! Anything else is reported as a [`ProtocolError`].

use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::{EventReceiver, StreamEvent, TaskState, TaskStatus};

/// Lifecycle violations and unsuccessful outcomes seen by a consumer
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("status update for task {0} before the task was announced")]
    NotStarted(String),

    #[error("task {0} announced twice")]
    DuplicateTask(String),

    #[error("event for task {actual} on the stream of task {expected}")]
    TaskMismatch { expected: String, actual: String },

    #[error("invalid transition of task {task_id} to {state} (final: {is_final})")]
    InvalidTransition {
        task_id: String,
        state: TaskState,
        is_final: bool,
    },

    #[error("event received after task {0} finished")]
    EventAfterTerminal(String),

    #[error("task {0} completed without an answer")]
    EmptyAnswer(String),

    #[error("remote task {state}: {reason}")]
    TaskFailed { state: TaskState, reason: String },

    #[error("stream ended before task {0} reached a terminal state")]
    MissingTerminal(String),
}

/// What one accepted event meant
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Progress {
    /// Task announced
    Started(String),
    /// Still running, with the intermediate text if any
    Working(Option<String>),
    /// Message event inside a running task
    Note(String),
    /// Successful terminal with the answer
    Completed(String),
    /// Direct reply without a task
    Reply(String),
}

impl Progress {
    pub fn is_final(&self) -> bool {
        matches!(self, Progress::Completed(_) | Progress::Reply(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Phase {
    Idle,
    Running(String),
    Done(String),
}

/// Lifecycle checker for one task stream
#[derive(Debug)]
pub struct TaskTracker {
    phase: Phase,
    answer: Option<String>,
    events: usize,
}

impl Default for TaskTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskTracker {
    pub fn new() -> Self {
        Self {
            phase: Phase::Idle,
            answer: None,
            events: 0,
        }
    }

    /// Number of events observed, accepted or not
    pub fn events(&self) -> usize {
        self.events
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.phase, Phase::Done(_))
    }

    /// Check one event against the lifecycle.
    ///
    /// A failure terminal is returned as [`ProtocolError::TaskFailed`] and
    /// still finishes the task, so later events are violations too.
    pub fn observe(&mut self, event: StreamEvent) -> Result<Progress, ProtocolError> {
        self.events += 1;
        trace!(event = self.events, kind = event_kind(&event), "task event");

        if let Phase::Done(task_id) = &self.phase {
            warn!(task_id = %task_id, "event after terminal");
            return Err(ProtocolError::EventAfterTerminal(task_id.clone()));
        }

        match event {
            StreamEvent::Task(task) => {
                if let Phase::Running(current) = &self.phase {
                    return Err(ProtocolError::DuplicateTask(current.clone()));
                }
                debug!(task_id = %task.id, state = %task.status.state, "task announced");
                self.phase = Phase::Running(task.id.clone());

                // A single-shot exchange answers with the task already finished
                if task.status.state.is_terminal() {
                    self.terminal(task.id, task.status)
                } else {
                    Ok(Progress::Started(task.id))
                }
            }
            StreamEvent::StatusUpdate(update) => {
                let current = match &self.phase {
                    Phase::Running(id) => id.clone(),
                    _ => return Err(ProtocolError::NotStarted(update.task_id)),
                };
                if update.task_id != current {
                    return Err(ProtocolError::TaskMismatch {
                        expected: current,
                        actual: update.task_id,
                    });
                }

                let state = update.status.state;
                match (state, update.is_final) {
                    (TaskState::Working, false) => {
                        Ok(Progress::Working(update.status.text().map(str::to_string)))
                    }
                    (state, true) if state.is_terminal() => self.terminal(current, update.status),
                    (state, is_final) => Err(ProtocolError::InvalidTransition {
                        task_id: current,
                        state,
                        is_final,
                    }),
                }
            }
            StreamEvent::Message(message) => {
                let text = message.first_text().map(str::to_string);
                if matches!(self.phase, Phase::Running(_)) {
                    return Ok(Progress::Note(text.unwrap_or_default()));
                }

                let id = message.task_id.unwrap_or(message.message_id);
                self.phase = Phase::Done(id.clone());
                match text {
                    Some(text) if !text.is_empty() => {
                        self.answer = Some(text.clone());
                        Ok(Progress::Reply(text))
                    }
                    _ => Err(ProtocolError::EmptyAnswer(id)),
                }
            }
        }
    }

    fn terminal(&mut self, task_id: String, status: TaskStatus) -> Result<Progress, ProtocolError> {
        self.phase = Phase::Done(task_id.clone());
        let text = status.text().map(str::to_string);

        if status.state.is_failure() {
            debug!(task_id = %task_id, state = %status.state, "task failed");
            return Err(ProtocolError::TaskFailed {
                state: status.state,
                reason: text.unwrap_or_else(|| "no reason given".to_string()),
            });
        }

        match text {
            Some(text) if !text.is_empty() => {
                debug!(task_id = %task_id, "task completed");
                self.answer = Some(text.clone());
                Ok(Progress::Completed(text))
            }
            _ => Err(ProtocolError::EmptyAnswer(task_id)),
        }
    }

    /// Final answer once the stream has ended
    pub fn finish(self) -> Result<String, ProtocolError> {
        match (self.answer, self.phase) {
            (Some(answer), _) => Ok(answer),
            (None, Phase::Running(task_id)) | (None, Phase::Done(task_id)) => {
                Err(ProtocolError::MissingTerminal(task_id))
            }
            (None, Phase::Idle) => Err(ProtocolError::MissingTerminal("<none>".to_string())),
        }
    }

    /// Consume a local event channel until it closes
    pub async fn follow<F>(mut receiver: EventReceiver, mut on_progress: F) -> Result<String, ProtocolError>
    where
        F: FnMut(&Progress),
    {
        let mut tracker = Self::new();
        while let Some(event) = receiver.recv().await {
            let progress = tracker.observe(event)?;
            on_progress(&progress);
        }
        tracker.finish()
    }
}

fn event_kind(event: &StreamEvent) -> &'static str {
    match event {
        StreamEvent::Task(_) => "task",
        StreamEvent::StatusUpdate(_) => "status-update",
        StreamEvent::Message(_) => "message",
    }
}
