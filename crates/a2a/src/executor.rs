//! Executors turn an incoming request into task lifecycle events

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use waypoint_agent::AgentLoop;
use waypoint_bus::{AgentMessage, BusError, TaskPublisher};
use waypoint_provider::{Message, Provider};

/// One incoming request as seen by an executor
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub task_id: String,
    pub context_id: String,
    pub user_message: AgentMessage,
}

impl RequestContext {
    /// Assign a fresh task id; the conversation id is taken from the
    /// message when the caller supplied one
    pub fn new(user_message: AgentMessage) -> Self {
        let context_id = user_message
            .context_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        Self {
            task_id: uuid::Uuid::new_v4().to_string(),
            context_id,
            user_message,
        }
    }
}

/// Runs requests and reports their progress through a [`TaskPublisher`]
#[async_trait]
pub trait AgentExecutor: Send + Sync {
    /// Handle one request. The publisher is dropped on return, which ends
    /// the event stream.
    async fn execute(&self, request: RequestContext, publisher: TaskPublisher) -> Result<(), BusError>;

    /// Cancellation is accepted and ignored unless an executor overrides it
    async fn cancel_task(&self, task_id: &str) {
        info!(task_id, "cancel requested, nothing to do");
    }
}

type Session<P> = Arc<Mutex<AgentLoop<P>>>;

/// Conversations kept per executor before the least recently used is dropped
pub const DEFAULT_MAX_SESSIONS: usize = 64;

struct Sessions<P: Provider> {
    by_context: HashMap<String, Session<P>>,
    /// Least recently used first
    recent: VecDeque<String>,
}

impl<P: Provider> Sessions<P> {
    fn touch(&mut self, context_id: &str) {
        if let Some(pos) = self.recent.iter().position(|c| c == context_id) {
            self.recent.remove(pos);
        }
        self.recent.push_back(context_id.to_string());
    }
}

/// Hosts an agent loop behind the protocol.
///
/// Requests carrying a `contextId` share one session per id, up to
/// `max_sessions` of them. Requests without one run on a fresh session that
/// is dropped afterwards.
pub struct LoopExecutor<P: Provider> {
    template: AgentLoop<P>,
    sessions: Mutex<Sessions<P>>,
    max_sessions: usize,
}

impl<P: Provider + 'static> LoopExecutor<P> {
    /// `template` should already be initialized; new sessions are forked from it
    pub fn new(template: AgentLoop<P>) -> Self {
        Self {
            template,
            sessions: Mutex::new(Sessions {
                by_context: HashMap::new(),
                recent: VecDeque::new(),
            }),
            max_sessions: DEFAULT_MAX_SESSIONS,
        }
    }

    /// Keep at most `max` conversations; zero keeps none
    pub fn with_max_sessions(mut self, max: usize) -> Self {
        self.max_sessions = max;
        self
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.lock().await.by_context.len()
    }

    async fn session(&self, context_id: Option<&str>) -> Session<P> {
        let Some(context_id) = context_id.filter(|_| self.max_sessions > 0) else {
            return Arc::new(Mutex::new(self.template.fork()));
        };

        let mut sessions = self.sessions.lock().await;
        sessions.touch(context_id);
        if let Some(session) = sessions.by_context.get(context_id) {
            return Arc::clone(session);
        }

        while sessions.by_context.len() >= self.max_sessions {
            let Some(oldest) = sessions.recent.pop_front() else {
                break;
            };
            if sessions.by_context.remove(&oldest).is_some() {
                debug!(context_id = %oldest, "dropping least recently used session");
            }
        }

        debug!(context_id, "starting new session");
        let session = Arc::new(Mutex::new(self.template.fork()));
        sessions
            .by_context
            .insert(context_id.to_string(), Arc::clone(&session));
        session
    }
}

#[async_trait]
impl<P: Provider + 'static> AgentExecutor for LoopExecutor<P> {
    async fn execute(&self, request: RequestContext, mut publisher: TaskPublisher) -> Result<(), BusError> {
        let text = request
            .user_message
            .first_text()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string);
        let caller_context = request.user_message.context_id.clone();

        publisher.submitted(request.user_message)?;

        let Some(text) = text else {
            warn!(task_id = %request.task_id, "request without text");
            return publisher.fail("Failed to resolve your request: it contained no text.");
        };

        info!(task_id = %request.task_id, "received request: {}", text);

        let session = self.session(caller_context.as_deref()).await;
        let mut agent = session.lock().await;

        let result = agent
            .process_user_input_with(&text, |round| {
                if let Err(e) = publisher.working(round_message(round)) {
                    debug!("dropping progress update: {}", e);
                }
            })
            .await;

        match result {
            Ok(answer) if answer.content.trim().is_empty() => publisher.fail("The agent returned an empty answer."),
            Ok(answer) => publisher.complete(answer.content),
            Err(e) => {
                warn!(task_id = %request.task_id, "request failed: {}", e);
                publisher.fail(e.to_string())
            }
        }
    }
}

/// Intermediate text of a tool round: the reasoning if any, else the content
fn round_message(round: &Message) -> Option<AgentMessage> {
    round
        .thinking
        .as_deref()
        .filter(|t| !t.trim().is_empty())
        .or_else(|| Some(round.content.as_str()).filter(|c| !c.trim().is_empty()))
        .map(AgentMessage::agent)
}
