//! End-to-end tests: a hosted agent loop reached through the delegation bridge

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::net::TcpListener;

use waypoint_a2a::{
    A2aClient, A2aServer, AgentCard, AgentExecutor, DelegationBridge, LoopExecutor, RequestContext,
};
use waypoint_agent::tools::DistanceTool;
use waypoint_agent::{AgentLoop, LoopSettings, ToolRegistry};
use waypoint_bus::{AgentMessage, BusError, MessageRole, Part, StreamEvent, TaskPublisher, TaskState};
use waypoint_config::Config;
use waypoint_provider::{
    ChatParams, ChatResponse, ChunkStream, Message, Provider, ProviderError, ToolCall,
};

/// Backend that replays canned responses and records every request
#[derive(Default)]
struct ScriptedProvider {
    replies: Mutex<VecDeque<ChatResponse>>,
    requests: Mutex<Vec<ChatParams>>,
}

impl ScriptedProvider {
    fn new(replies: Vec<ChatResponse>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            ..Default::default()
        }
    }

    fn requests(&self) -> Vec<ChatParams> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    async fn chat(&self, params: ChatParams) -> Result<ChatResponse, ProviderError> {
        self.requests.lock().unwrap().push(params);
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| ProviderError::Api("script exhausted".to_string()))
    }

    async fn chat_stream(&self, _params: ChatParams) -> Result<ChunkStream, ProviderError> {
        Err(ProviderError::Stream("not scripted".to_string()))
    }

    async fn probe(&self, _model: String, _think: bool) -> Result<(), ProviderError> {
        Ok(())
    }

    fn default_model(&self) -> String {
        "scripted".to_string()
    }
}

/// Replies for one request that takes a single distance round
fn distance_script() -> Vec<ChatResponse> {
    let call = ToolCall::from_value(
        "distance",
        json!({
            "point1": {"lat": 51.4, "lon": 7.18},
            "point2": {"lat": 51.48, "lon": 7.22}
        }),
    );
    vec![
        ChatResponse::from_message(
            Message::assistant("")
                .with_thinking("I should measure the distance first")
                .with_tool_calls(vec![call]),
        ),
        ChatResponse::text("The Henrichshütte is in Hattingen, about 9 km from Bochum."),
    ]
}

async fn hosted_loop(provider: Arc<ScriptedProvider>) -> LoopExecutor<ScriptedProvider> {
    let mut tools = ToolRegistry::new();
    tools.register(DistanceTool);

    let mut agent = AgentLoop::new("Agent Athur", provider, Arc::new(tools), LoopSettings::default());
    assert!(agent.initialize().await);
    LoopExecutor::new(agent)
}

/// Serve `executor` on an ephemeral port and return the base URL
async fn spawn_server(executor: Arc<dyn AgentExecutor>, streaming: bool) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let mut card = AgentCard::from_config(&Config::default());
    card.name = "Agent Athur".to_string();
    card.url = format!("http://{}/", addr);
    card.capabilities.streaming = Some(streaming);

    tokio::spawn(A2aServer::new(card, executor).serve(listener));
    format!("http://{}", addr)
}

fn skill_call(text: &str) -> ToolCall {
    ToolCall::from_value("find-a-place", json!({ "text": text }))
}

async fn bridged_registry(url: &str) -> ToolRegistry {
    let bridge = DelegationBridge::connect(&[url]).await.unwrap();
    let mut registry = ToolRegistry::new();
    assert_eq!(bridge.register(&mut registry), 1);
    registry
}

#[tokio::test]
async fn test_streamed_delegation_resolves_to_answer() {
    let provider = Arc::new(ScriptedProvider::new(distance_script()));
    let executor = Arc::new(hosted_loop(Arc::clone(&provider)).await);
    let url = spawn_server(executor, true).await;

    let registry = bridged_registry(&url).await;
    let definitions = registry.definitions();
    assert_eq!(definitions[0].name(), "find-a-place");
    assert_eq!(definitions[0].function.description, "Find a place by name or location.");

    let result = registry.dispatch(&skill_call("Where is the Henrichshütte?")).await;
    assert_eq!(
        result.text(),
        Some("The Henrichshütte is in Hattingen, about 9 km from Bochum.")
    );

    let requests = provider.requests();
    assert_eq!(requests.len(), 2);
    let user = &requests[0].messages.last().unwrap().content;
    assert_eq!(
        user,
        "Perform the task \"find-a-place\" which is \"Find a place by name or location.\". \
         Use the following information \"Where is the Henrichshütte?\"."
    );
}

#[tokio::test]
async fn test_single_shot_delegation_resolves_to_answer() {
    let provider = Arc::new(ScriptedProvider::new(distance_script()));
    let executor = Arc::new(hosted_loop(provider).await);
    let url = spawn_server(executor, false).await;

    let registry = bridged_registry(&url).await;
    let result = registry.dispatch(&skill_call("Where is the Henrichshütte?")).await;
    assert_eq!(
        result.text(),
        Some("The Henrichshütte is in Hattingen, about 9 km from Bochum.")
    );
}

#[tokio::test]
async fn test_remote_loop_failure_becomes_tool_error() {
    let provider = Arc::new(ScriptedProvider::new(vec![]));
    let executor = Arc::new(hosted_loop(provider).await);
    let url = spawn_server(executor, true).await;

    let registry = bridged_registry(&url).await;
    let result = registry.dispatch(&skill_call("Where is Bochum?")).await;

    let error = result.error().expect("remote failure must be an error");
    assert!(error.contains("failed"), "got {}", error);
    assert!(error.contains("script exhausted"), "got {}", error);
}

#[tokio::test]
async fn test_stream_is_wire_ordered() {
    let provider = Arc::new(ScriptedProvider::new(distance_script()));
    let executor = Arc::new(hosted_loop(provider).await);
    let url = spawn_server(executor, true).await;

    let client = A2aClient::from_card_url(&url).await.unwrap();
    let mut events = client
        .send_message_stream(AgentMessage::user("Where is the Henrichshütte?"))
        .await
        .unwrap();

    let mut seen = Vec::new();
    while let Some(event) = futures::StreamExt::next(&mut events).await {
        seen.push(match event.unwrap() {
            StreamEvent::Task(task) => format!("task:{}", task.status.state),
            StreamEvent::StatusUpdate(update) => {
                format!("{}:{}", update.status.state, update.is_final)
            }
            StreamEvent::Message(_) => "message".to_string(),
        });
    }

    assert_eq!(seen, vec!["task:submitted", "working:false", "completed:true"]);
}

#[tokio::test]
async fn test_message_without_text_is_failed_task() {
    let provider = Arc::new(ScriptedProvider::new(vec![]));
    let executor = Arc::new(hosted_loop(Arc::clone(&provider)).await);
    let url = spawn_server(executor, true).await;

    let client = A2aClient::from_card_url(&url).await.unwrap();
    let message = AgentMessage::new(MessageRole::User, vec![Part::Data { data: json!({"lat": 51.4}) }]);

    match client.send_message(message).await.unwrap() {
        StreamEvent::Task(task) => {
            assert_eq!(task.status.state, TaskState::Failed);
            assert!(task.status.text().unwrap().contains("no text"));
        }
        other => panic!("Expected task, got {:?}", other),
    }
    assert!(provider.requests().is_empty());
}

#[tokio::test]
async fn test_sessions_follow_context_id() {
    let replies = vec![
        ChatResponse::text("first"),
        ChatResponse::text("second"),
        ChatResponse::text("third"),
    ];
    let provider = Arc::new(ScriptedProvider::new(replies));
    let executor = Arc::new(hosted_loop(Arc::clone(&provider)).await);
    let url = spawn_server(Arc::clone(&executor) as Arc<dyn AgentExecutor>, false).await;
    let client = A2aClient::from_card_url(&url).await.unwrap();

    for text in ["one", "two"] {
        let mut message = AgentMessage::user(text);
        message.context_id = Some("ctx-shared".to_string());
        client.send_message(message).await.unwrap();
    }
    client.send_message(AgentMessage::user("three")).await.unwrap();

    assert_eq!(executor.session_count().await, 1);

    // The second request of the shared session sees the first exchange
    let requests = provider.requests();
    let contents: Vec<&str> = requests[1].messages.iter().map(|m| m.content.as_str()).collect();
    assert!(contents.contains(&"one"));
    assert!(contents.contains(&"first"));
    assert!(!requests[2].messages.iter().any(|m| m.content == "one"));
}

#[tokio::test]
async fn test_delegated_calls_leave_no_session_behind() {
    let replies = (0..5).map(|i| ChatResponse::text(format!("answer {}", i))).collect();
    let provider = Arc::new(ScriptedProvider::new(replies));
    let executor = Arc::new(hosted_loop(Arc::clone(&provider)).await);
    let url = spawn_server(Arc::clone(&executor) as Arc<dyn AgentExecutor>, true).await;

    let registry = bridged_registry(&url).await;
    for i in 0..5 {
        let result = registry.dispatch(&skill_call("Where is Bochum?")).await;
        assert_eq!(result.text(), Some(format!("answer {}", i).as_str()));
    }

    assert_eq!(executor.session_count().await, 0);
    // Every call starts from an empty conversation
    assert!(provider.requests().iter().all(|r| r.messages.len() == 1));
}

#[tokio::test]
async fn test_least_recently_used_session_is_dropped() {
    let replies = ["a1", "b1", "c1", "a2"].into_iter().map(ChatResponse::text).collect();
    let provider = Arc::new(ScriptedProvider::new(replies));
    let executor = Arc::new(hosted_loop(Arc::clone(&provider)).await.with_max_sessions(2));
    let url = spawn_server(Arc::clone(&executor) as Arc<dyn AgentExecutor>, false).await;
    let client = A2aClient::from_card_url(&url).await.unwrap();

    for context in ["a", "b", "c", "a"] {
        let mut message = AgentMessage::user(format!("from {}", context));
        message.context_id = Some(context.to_string());
        client.send_message(message).await.unwrap();
    }

    assert_eq!(executor.session_count().await, 2);
    // "a" was evicted by "c", so its second request starts over
    let requests = provider.requests();
    assert_eq!(requests[3].messages.len(), 1);
}

/// Executor that stops reporting before the task finishes
struct AbandoningExecutor;

#[async_trait]
impl AgentExecutor for AbandoningExecutor {
    async fn execute(&self, request: RequestContext, mut publisher: TaskPublisher) -> Result<(), BusError> {
        publisher.submitted(request.user_message)?;
        publisher.working_text("thinking")?;
        publisher.working_text("almost")
    }
}

#[tokio::test]
async fn test_stream_without_terminal_is_tool_error() {
    let url = spawn_server(Arc::new(AbandoningExecutor), true).await;

    let registry = bridged_registry(&url).await;
    let result = registry.dispatch(&skill_call("Where is Bochum?")).await;

    assert!(result.text().is_none());
    let error = result.error().unwrap();
    assert!(error.contains("terminal"), "got {}", error);
}

#[tokio::test]
async fn test_card_and_rpc_errors() {
    let url = spawn_server(Arc::new(AbandoningExecutor), true).await;
    let http = reqwest::Client::new();

    let card: Value = http
        .get(format!("{}/.well-known/agent-card.json", url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(card["name"], "Agent Athur");
    assert_eq!(card["protocolVersion"], "0.3.0");
    assert_eq!(card["skills"][0]["id"], "find-a-place");

    let unknown: Value = http
        .post(format!("{}/", url))
        .json(&json!({"jsonrpc": "2.0", "id": 1, "method": "tasks/resubscribe", "params": {}}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(unknown["error"]["code"], -32601);
    assert_eq!(unknown["id"], 1);

    let garbage: Value = http
        .post(format!("{}/", url))
        .body("{not json")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(garbage["error"]["code"], -32700);

    let bad_params: Value = http
        .post(format!("{}/", url))
        .json(&json!({"jsonrpc": "2.0", "id": 2, "method": "message/send", "params": {}}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(bad_params["error"]["code"], -32602);
}

#[tokio::test]
async fn test_cancel_is_accepted() {
    let url = spawn_server(Arc::new(AbandoningExecutor), true).await;
    let client = A2aClient::from_card_url(&url).await.unwrap();
    client.cancel_task("any-task").await.unwrap();
}
