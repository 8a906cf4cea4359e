//! Integration tests for the OpenAI-compatible chat client against a mock
//! provider.

use serde_json::json;
use tablite::AppError;
use tablite::llm::{
    ChatMessage, ChatModel, ChatRequest, OpenAiClient, ProviderKind, ResolvedProvider, ToolChoice,
    ToolDefinition,
};
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client(server: &MockServer) -> OpenAiClient {
    OpenAiClient::new(ResolvedProvider {
        kind: ProviderKind::DeepSeek,
        api_key: "sk-test".to_string(),
        base_url: format!("{}/v1", server.uri()),
        model: "deepseek-chat".to_string(),
    })
    .unwrap()
}

fn request() -> ChatRequest {
    ChatRequest::new("deepseek-chat", vec![ChatMessage::user("how many users?")])
}

#[tokio::test]
async fn test_complete_parses_content_and_tool_calls() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("authorization", "Bearer sk-test"))
        .and(body_partial_json(json!({
            "model": "deepseek-chat",
            "tool_choice": "required",
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": {"name": "Table", "arguments": "{\"rows\":[\"users\"]}"}
                    }]
                }
            }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let tool = ToolDefinition::function("Table", "Get relevant tables", json!({"type": "object"}));
    let completion = client(&server)
        .complete(request().with_tool(tool, ToolChoice::Required))
        .await
        .unwrap();
    assert_eq!(completion.content, "");
    assert_eq!(completion.tool_calls.len(), 1);
    assert_eq!(completion.tool_calls[0].name, "Table");
    assert_eq!(completion.tool_calls[0].arguments, r#"{"rows":["users"]}"#);
}

#[tokio::test]
async fn test_complete_plain_text() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{"message": {"role": "assistant", "content": "```sql\nSELECT 1\n```"}}]
        })))
        .mount(&server)
        .await;

    let completion = client(&server).complete(request()).await.unwrap();
    assert_eq!(completion.content, "```sql\nSELECT 1\n```");
    assert!(completion.tool_calls.is_empty());
}

#[tokio::test]
async fn test_stream_yields_fragments_until_done() {
    let server = MockServer::start().await;
    let body = concat!(
        "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\"SELECT \"}}]}\n\n",
        ": keep-alive\n\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\"COUNT(*) FROM users\"}}]}\n\n",
        "data: [DONE]\n\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\" ignored\"}}]}\n\n",
    );
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_partial_json(json!({"stream": true})))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string(body),
        )
        .mount(&server)
        .await;

    let stream = client(&server).stream(request()).await.unwrap();
    assert_eq!(stream.drain().await.unwrap(), "SELECT COUNT(*) FROM users");
}

#[tokio::test]
async fn test_error_status_carries_provider_message() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "error": {"message": "Authentication Fails, Your api key is invalid", "type": "authentication_error"}
        })))
        .mount(&server)
        .await;

    let err = client(&server).complete(request()).await.unwrap_err();
    assert_eq!(err.status(), Some(401));
    assert!(err.to_string().contains("api key is invalid"));
    assert!(!err.is_soft());
}

#[tokio::test]
async fn test_error_without_body_uses_reason() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let err = client(&server).stream(request()).await.unwrap_err();
    match err {
        AppError::Model { status, message } => {
            assert_eq!(status, Some(503));
            assert_eq!(message, "Service Unavailable");
        }
        other => panic!("unexpected error {:?}", other),
    }
}
