//! HTTP contract tests for the embedding and chat clients

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use expense_audit_core::config::{ChatConfig, EmbeddingConfig, EmbeddingProvider};
use expense_audit_core::rag::{
    ChatMessage, Embedder, HttpChatClient, HttpEmbeddingClient, JudgmentClient, RagError, RagService,
};
use expense_audit_core::vector::{DocumentChunk, VectorStore};

fn embedding_config(server: &MockServer) -> EmbeddingConfig {
    EmbeddingConfig {
        provider: EmbeddingProvider::Http,
        endpoint: format!("{}/v1/embeddings", server.uri()),
        model: "embed-small".to_string(),
        api_key: Some("secret-key".to_string()),
        timeout_ms: 2000,
    }
}

fn chat_config(server: &MockServer, timeout_ms: u64) -> ChatConfig {
    ChatConfig {
        endpoint: format!("{}/v1/chat/completions", server.uri()),
        model: "judge-large".to_string(),
        api_key: None,
        temperature: 0.1,
        max_tokens: 256,
        timeout_ms,
    }
}

fn chat_body(content: &str, total_tokens: u32) -> serde_json::Value {
    json!({
        "id": "chatcmpl-1",
        "model": "judge-large",
        "choices": [{"index": 0, "message": {"role": "assistant", "content": content}}],
        "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": total_tokens}
    })
}

#[tokio::test]
async fn test_embedding_request_contract() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/embeddings"))
        .and(header("authorization", "Bearer secret-key"))
        .and(body_partial_json(json!({"model": "embed-small", "input": ["first", "second"]})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [
                {"index": 1, "embedding": [0.0, 1.0]},
                {"index": 0, "embedding": [1.0, 0.0]}
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = HttpEmbeddingClient::new(&embedding_config(&server)).unwrap();
    let vectors = client
        .embed_batch(&["first".to_string(), "second".to_string()])
        .await
        .unwrap();
    assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
}

#[tokio::test]
async fn test_embedding_error_is_retrieval_error_without_retry() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
        .expect(1)
        .mount(&server)
        .await;

    let client = HttpEmbeddingClient::new(&embedding_config(&server)).unwrap();
    let err = client.embed("hello").await.unwrap_err();
    match err {
        RagError::Retrieval(message) => assert!(message.contains("503")),
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_chat_request_contract_and_validation() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_partial_json(json!({
            "model": "judge-large",
            "max_tokens": 256,
            "messages": [{"role": "system", "content": "persona"}, {"role": "user", "content": "question"}]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_body("The claim complies with policy.", 15)))
        .expect(1)
        .mount(&server)
        .await;

    let config = chat_config(&server, 2000);
    let judgment = JudgmentClient::new(Arc::new(HttpChatClient::new(&config).unwrap()), &config)
        .judge(vec![ChatMessage::system("persona"), ChatMessage::user("question")])
        .await
        .unwrap();
    assert_eq!(judgment.content, "The claim complies with policy.");
    assert_eq!(judgment.total_tokens, 15);
    assert_eq!(judgment.model, "judge-large");
    assert_eq!(judgment.response_id, "chatcmpl-1");
}

#[tokio::test]
async fn test_chat_zero_usage_is_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_body("A complete but unmetered answer.", 0)))
        .mount(&server)
        .await;

    let config = chat_config(&server, 2000);
    let err = JudgmentClient::new(Arc::new(HttpChatClient::new(&config).unwrap()), &config)
        .judge(vec![ChatMessage::user("question")])
        .await
        .unwrap_err();
    assert!(matches!(err, RagError::ResponseValidation(_)));
}

#[tokio::test]
async fn test_chat_timeout_is_judgment_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(chat_body("Eventually answered.", 5))
                .set_delay(Duration::from_millis(500)),
        )
        .mount(&server)
        .await;

    let config = chat_config(&server, 100);
    let err = JudgmentClient::new(Arc::new(HttpChatClient::new(&config).unwrap()), &config)
        .judge(vec![ChatMessage::user("question")])
        .await
        .unwrap_err();
    assert!(matches!(err, RagError::Judgment(_)));
}

#[tokio::test]
async fn test_query_over_http_endpoints() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/embeddings"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{"embedding": [1.0, 0.0, 0.0]}]
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_body(
            "Hotels are capped at 500 per night [Document 1].",
            40,
        )))
        .mount(&server)
        .await;

    let store = VectorStore::in_memory(3);
    store
        .insert(DocumentChunk {
            id: "hotel#0000".to_string(),
            document_id: "hotel".to_string(),
            content: "Hotel stays are capped at 500 per night.".to_string(),
            embedding: vec![1.0, 0.0, 0.0],
            category: "travel".to_string(),
            metadata: Default::default(),
            created_at: chrono::Utc::now(),
        })
        .await
        .unwrap();

    let chat = chat_config(&server, 2000);
    let rag = RagService::new(
        Arc::new(HttpEmbeddingClient::new(&embedding_config(&server)).unwrap()),
        store,
        JudgmentClient::new(Arc::new(HttpChatClient::new(&chat).unwrap()), &chat),
    );

    let answer = rag.query("What is the hotel cap?", 0).await.unwrap();
    assert_eq!(answer.confidence, 0.8);
    assert_eq!(answer.references.len(), 1);
    assert_eq!(answer.supporting_references, 1);
    assert_eq!(answer.tokens_used, 40);
    assert!(answer.decision.is_none());
}
