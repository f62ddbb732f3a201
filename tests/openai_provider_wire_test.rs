// tests/openai_provider_wire_test.rs
// Exercises `OpenAiProvider` against a mocked HTTP endpoint: chat-completion
// parsing and SSE-framed streaming token extraction. No network calls leave
// the test process.

use dbnotebook_core::llm::provider::openai::OpenAiProvider;
use dbnotebook_core::llm::{LlmProvider, Message};
use futures_util::StreamExt;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn chat_parses_message_content_and_usage() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "choices": [{"message": {"content": "SELECT 1"}}],
            "usage": {"prompt_tokens": 12, "completion_tokens": 4}
        })))
        .mount(&server)
        .await;

    let provider = OpenAiProvider::new(server.uri(), "test-key", "gpt-test", 5);
    let response = provider
        .chat(&[Message::user("give me sql")], 0.0)
        .await
        .expect("chat should succeed");

    assert_eq!(response.content, "SELECT 1");
    assert_eq!(response.usage.prompt_tokens, 12);
    assert_eq!(response.usage.completion_tokens, 4);
    assert_eq!(response.usage.total(), 16);
}

#[tokio::test]
async fn chat_surfaces_non_success_status_as_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(500).set_body_string("upstream exploded"))
        .mount(&server)
        .await;

    let provider = OpenAiProvider::new(server.uri(), "test-key", "gpt-test", 5);
    let err = provider
        .chat(&[Message::user("hello")], 0.0)
        .await
        .expect_err("non-success status should surface as an error");
    assert!(err.to_string().contains("500"));
}

#[tokio::test]
async fn stream_extracts_tokens_from_sse_chunks_and_stops_at_done() {
    let server = MockServer::start().await;
    let body = concat!(
        "data: {\"choices\":[{\"delta\":{\"content\":\"Hello\"}}]}\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\", world\"}}]}\n",
        "data: [DONE]\n",
    );
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(body, "text/event-stream"),
        )
        .mount(&server)
        .await;

    let provider = OpenAiProvider::new(server.uri(), "test-key", "gpt-test", 5);
    let stream = provider
        .stream(&[Message::user("say hi")], 0.0)
        .await
        .expect("stream should start");

    let tokens: Vec<String> = stream.collect::<Vec<_>>().await.into_iter().collect::<Result<_, _>>().expect("no token errors");
    assert_eq!(tokens.join(""), "Hello, world");
}
