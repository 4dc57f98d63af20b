//! Mock Provider Tests
//!
//! Exercises `exchange` against a mockall double of the Provider trait.

use std::time::Duration;

use async_trait::async_trait;
use futures::stream;
use mockall::mock;
use waypoint_provider::{
    exchange, ChatChunk, ChatParams, ChatResponse, ChunkStream, Message, Provider, ProviderError,
};

mock! {
    pub Provider {}

    #[async_trait]
    impl Provider for Provider {
        async fn chat(&self, params: ChatParams) -> Result<ChatResponse, ProviderError>;
        async fn chat_stream(&self, params: ChatParams) -> Result<ChunkStream, ProviderError>;
        async fn probe(&self, model: String, think: bool) -> Result<(), ProviderError>;
        fn default_model(&self) -> String;
    }
}

/// Provider whose response never arrives
struct StalledProvider;

#[async_trait]
impl Provider for StalledProvider {
    async fn chat(&self, _params: ChatParams) -> Result<ChatResponse, ProviderError> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(ChatResponse::text("too late"))
    }

    async fn chat_stream(&self, _params: ChatParams) -> Result<ChunkStream, ProviderError> {
        Ok(Box::pin(stream::pending::<Result<ChatChunk, ProviderError>>()))
    }

    async fn probe(&self, _model: String, _think: bool) -> Result<(), ProviderError> {
        Ok(())
    }

    fn default_model(&self) -> String {
        "stalled".to_string()
    }
}

#[tokio::test]
async fn test_exchange_non_streaming_uses_chat() {
    let mut mock = MockProvider::new();
    mock.expect_chat()
        .times(1)
        .withf(|params| !params.stream && params.messages.len() == 1)
        .returning(|_| Ok(ChatResponse::text("Hello from mock!")));
    mock.expect_chat_stream().times(0);

    let params = ChatParams {
        messages: vec![Message::user("hi")],
        ..Default::default()
    };
    let response = exchange(&mock, params, Duration::from_secs(5)).await.unwrap();

    assert_eq!(response.message.content, "Hello from mock!");
}

#[tokio::test]
async fn test_exchange_streaming_aggregates_fragments() {
    let mut mock = MockProvider::new();
    mock.expect_chat().times(0);
    mock.expect_chat_stream()
        .times(1)
        .withf(|params| params.stream)
        .returning(|_| {
            let chunks: Vec<Result<ChatChunk, ProviderError>> = vec![
                Ok(ChatChunk::thinking("The user ")),
                Ok(ChatChunk::thinking("greets me.")),
                Ok(ChatChunk::content("Hel")),
                Ok(ChatChunk::content("lo").finished()),
            ];
            Ok(Box::pin(stream::iter(chunks)) as ChunkStream)
        });

    let params = ChatParams {
        stream: true,
        ..Default::default()
    };
    let response = exchange(&mock, params, Duration::from_secs(5)).await.unwrap();

    assert_eq!(response.message.content, "Hello");
    assert_eq!(
        response.message.thinking.as_deref(),
        Some("The user greets me.")
    );
    assert!(response.done);
}

#[tokio::test]
async fn test_exchange_propagates_backend_error() {
    let mut mock = MockProvider::new();
    mock.expect_chat()
        .times(1)
        .returning(|_| Err(ProviderError::Api("model not found".to_string())));

    let result = exchange(&mock, ChatParams::default(), Duration::from_secs(5)).await;
    match result {
        Err(ProviderError::Api(msg)) => assert_eq!(msg, "model not found"),
        other => panic!("Expected Api error, got {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn test_exchange_times_out_single_shot() {
    let result = exchange(&StalledProvider, ChatParams::default(), Duration::from_secs(600)).await;
    assert!(matches!(result, Err(ProviderError::Timeout(d)) if d == Duration::from_secs(600)));
}

#[tokio::test(start_paused = true)]
async fn test_exchange_times_out_stalled_stream() {
    let params = ChatParams {
        stream: true,
        ..Default::default()
    };
    let result = exchange(&StalledProvider, params, Duration::from_secs(60)).await;
    assert!(matches!(result, Err(ProviderError::Timeout(_))));
}

#[test]
fn test_mock_provider_default_model() {
    let mut mock = MockProvider::new();
    mock.expect_default_model()
        .times(1)
        .returning(|| "mock-model-v1".to_string());

    assert_eq!(mock.default_model(), "mock-model-v1");
}
