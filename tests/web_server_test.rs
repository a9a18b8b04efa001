use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum_test::{TestServer, TestServerConfig};
use serde_json::{json, Value};
use sqlmate::agent::AgentConfig;
use sqlmate::cache::DatabaseCache;
use sqlmate::chat::ChatService;
use sqlmate::database::SqlxConnector;
use sqlmate::llm_interaction::GroqProvider;
use sqlmate::seed::seed_student_db;
use sqlmate::web_server::{build_router, AppState};
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn test_server() -> TestServer {
    let provider =
        GroqProvider::new("http://127.0.0.1:9", "llama-3.1-8b-instant", Duration::from_secs(1))
            .unwrap();
    let service = ChatService::new(
        DatabaseCache::new(Arc::new(SqlxConnector::default()), Duration::from_secs(60)),
        Arc::new(provider),
        AgentConfig::default(),
        PathBuf::from("student.db"),
    );
    let state = AppState::new(Arc::new(service), "llama-3.1-8b-instant");
    TestServer::new(build_router(state)).unwrap()
}

#[tokio::test]
async fn test_index_renders_chat_page() {
    let server = test_server();
    let response = server.get("/").await;

    response.assert_status_ok();
    let body = response.text();
    assert!(body.contains("SQLMate : Chat with your SQL DB"));
    assert!(body.contains("How can I help you?"));
    assert!(body.contains("Groq API Key"));
    assert!(body.contains("Clear message history"));
    assert!(body.contains("Model: llama-3.1-8b-instant"));
}

#[tokio::test]
async fn test_health() {
    let server = test_server();
    let response = server.get("/health").await;
    response.assert_status_ok();
    response.assert_text("ok");
}

#[tokio::test]
async fn test_static_files() {
    let server = test_server();
    let response = server.get("/static/app.js").await;
    response.assert_status_ok();
    let script = response.text();
    assert!(script.contains("new WebSocket"));
    assert!(script.contains("case \"Answer\""));
    assert!(script.contains("showPending(question)"));

    server
        .get("/static/missing.js")
        .await
        .assert_status_not_found();
}

/// Web server over a seeded SQLite file, with Groq answering from `replies` in order.
async fn websocket_server(groq: &MockServer, replies: &[&str]) -> (TempDir, TestServer) {
    for reply in replies {
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{ "message": { "role": "assistant", "content": reply } }]
            })))
            .up_to_n_times(1)
            .mount(groq)
            .await;
    }

    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("student.db");
    seed_student_db(&db_path).await.unwrap();

    let provider =
        GroqProvider::new(&groq.uri(), "llama-3.1-8b-instant", Duration::from_secs(5)).unwrap();
    let service = ChatService::new(
        DatabaseCache::new(Arc::new(SqlxConnector::default()), Duration::from_secs(60)),
        Arc::new(provider),
        AgentConfig::default(),
        db_path,
    );
    let state = AppState::new(Arc::new(service), "llama-3.1-8b-instant");
    let config = TestServerConfig::builder().http_transport().build();
    let server = TestServer::new_with_config(build_router(state), config).unwrap();
    (dir, server)
}

#[test_log::test(tokio::test)]
async fn test_websocket_configure_ask_and_clear() {
    let groq = MockServer::start().await;
    let (_dir, server) = websocket_server(
        &groq,
        &[
            "Thought: Count the rows.\nAction: sql_db_query\nAction Input: SELECT COUNT(*) FROM STUDENT",
            "Thought: I now know the final answer\nFinal Answer: There are 5 students.",
        ],
    )
    .await;
    let mut websocket = server.get_websocket("/ws").await.into_websocket().await;

    let hello: Value = websocket.receive_json().await;
    assert_eq!(hello["message_type"], "Transcript");
    assert_eq!(hello["payload"]["messages"].as_array().unwrap().len(), 1);
    assert_eq!(hello["payload"]["messages"][0]["content"], "How can I help you?");

    // No API key yet: the question is turned away and nothing is recorded.
    websocket
        .send_json(&json!({ "type": "ask", "question": "How many students?" }))
        .await;
    let notice: Value = websocket.receive_json().await;
    assert_eq!(notice["message_type"], "Notice");
    assert_eq!(notice["payload"]["message"], "Please add the Groq API key");
    assert!(groq.received_requests().await.unwrap().is_empty());

    websocket
        .send_json(&json!({
            "type": "configure",
            "form": { "kind": "local", "api_key": "gsk_test" }
        }))
        .await;
    let schema: Value = websocket.receive_json().await;
    assert_eq!(schema["message_type"], "Schema");
    assert_eq!(schema["payload"]["tables"][0]["name"], "STUDENT");
    assert_eq!(schema["payload"]["tables"][0]["columns"][0]["name"], "NAME");

    websocket
        .send_json(&json!({ "type": "ask", "question": "How many students?" }))
        .await;
    let step: Value = websocket.receive_json().await;
    assert_eq!(step["message_type"], "AgentStep");
    assert_eq!(step["payload"]["tool"], "sql_db_query");
    assert_eq!(step["payload"]["observation"], "[(5)]");

    let answer: Value = websocket.receive_json().await;
    assert_eq!(answer["message_type"], "Answer");
    assert_eq!(answer["payload"]["output"], "There are 5 students.");

    let transcript: Value = websocket.receive_json().await;
    assert_eq!(transcript["message_type"], "Transcript");
    let messages = transcript["payload"]["messages"].as_array().unwrap();
    let roles: Vec<&str> = messages.iter().map(|m| m["role"].as_str().unwrap()).collect();
    assert_eq!(roles, vec!["assistant", "user", "assistant"]);
    assert_eq!(messages[1]["content"], "How many students?");
    assert_eq!(messages[2]["content"], "There are 5 students.");

    let history: Value = websocket.receive_json().await;
    assert_eq!(history["message_type"], "QueryHistory");
    assert_eq!(history["payload"]["entries"], json!(["1. How many students?"]));

    websocket.send_json(&json!({ "type": "clear" })).await;
    let cleared: Value = websocket.receive_json().await;
    assert_eq!(cleared["message_type"], "Transcript");
    let messages = cleared["payload"]["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0]["role"], "assistant");
    assert_eq!(messages[0]["content"], "How can I help you?");
}

#[tokio::test]
async fn test_websocket_rejects_malformed_messages() {
    let groq = MockServer::start().await;
    let (_dir, server) = websocket_server(&groq, &[]).await;
    let mut websocket = server.get_websocket("/ws").await.into_websocket().await;

    let _hello: Value = websocket.receive_json().await;
    websocket.send_text("not json").await;
    let error: Value = websocket.receive_json().await;
    assert_eq!(error["message_type"], "Error");
    assert_eq!(error["payload"]["message"], "Malformed message");

    // The session stays usable afterwards.
    websocket.send_json(&json!({ "type": "clear" })).await;
    let cleared: Value = websocket.receive_json().await;
    assert_eq!(cleared["message_type"], "Transcript");
}
