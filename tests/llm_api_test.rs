use std::time::Duration;

use serde_json::json;
use sqlmate::llm_interaction::{ChatMessage, GroqProvider, LlmError, ModelProvider};
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn provider(server: &MockServer) -> GroqProvider {
    GroqProvider::new(&server.uri(), "llama-3.1-8b-instant", Duration::from_secs(5)).unwrap()
}

#[test_log::test(tokio::test)]
async fn test_completion_sends_key_model_and_stop() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", "Bearer gsk_test"))
        .and(body_partial_json(json!({
            "model": "llama-3.1-8b-instant",
            "temperature": 0.0,
            "stop": ["\nObservation:"],
            "messages": [{"role": "user", "content": "How many students?"}]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "chatcmpl-1",
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": "Final Answer: 5"},
                "finish_reason": "stop"
            }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let model = provider(&server).build("gsk_test");
    let reply = model
        .complete(&[ChatMessage::user("How many students?")], &["\nObservation:"])
        .await
        .unwrap();

    assert_eq!(reply, "Final Answer: 5");
}

#[test_log::test(tokio::test)]
async fn test_api_error_is_reported_with_status_and_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(401).set_body_string("invalid api key"))
        .mount(&server)
        .await;

    let model = provider(&server).build("wrong");
    let err = model.complete(&[ChatMessage::user("hi")], &[]).await.unwrap_err();

    match err {
        LlmError::Api { status, body } => {
            assert_eq!(status, 401);
            assert_eq!(body, "invalid api key");
        }
        other => panic!("unexpected error {:?}", other),
    }
}

#[test_log::test(tokio::test)]
async fn test_empty_choices() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "choices": [] })))
        .mount(&server)
        .await;

    let model = provider(&server).build("gsk_test");
    let err = model.complete(&[ChatMessage::user("hi")], &[]).await.unwrap_err();

    assert!(matches!(err, LlmError::EmptyResponse));
}
