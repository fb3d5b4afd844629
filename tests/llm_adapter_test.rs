//! LLM adapter behavior against a fake local inference server: generation,
//! JSON-mode summaries (including malformed output degrading to "no
//! summary"), embeddings, and the streaming deadline contract.

use serde_json::json;
use std::time::Duration;
use tokio::sync::watch;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use portsight_backend::llm::{
    parse_summary_response, GenerateOptions, OllamaClient,
};

fn client_for(server: &MockServer) -> OllamaClient {
    OllamaClient::new(
        server.uri(),
        Duration::from_secs(5),
        true,
        "llama3".to_string(),
    )
}

#[tokio::test]
async fn generate_returns_response_text() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "response": "the market looks calm",
            "done": true
        })))
        .mount(&server)
        .await;

    let text = client_for(&server)
        .generate("llama3", "how does the market look?", &GenerateOptions::default())
        .await
        .expect("generate");
    assert_eq!(text, "the market looks calm");
}

#[tokio::test]
async fn json_mode_sets_format_flag() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .and(body_partial_json(json!({"format": "json"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "response": "{\"summary\": \"ok\"}",
            "done": true
        })))
        .mount(&server)
        .await;

    let opts = GenerateOptions {
        json_mode: true,
        ..Default::default()
    };
    let text = client_for(&server)
        .generate("llama3", "summarize", &opts)
        .await
        .expect("json-mode generate");
    assert!(parse_summary_response(&text).is_some());
}

#[tokio::test]
async fn malformed_summary_json_degrades_to_none() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "response": "Sorry, I can't produce JSON today.",
            "done": true
        })))
        .mount(&server)
        .await;

    let text = client_for(&server)
        .generate("llama3", "summarize", &GenerateOptions::default())
        .await
        .expect("generate");
    // Caller contract: malformed output is "no summary", not an error
    assert!(parse_summary_response(&text).is_none());
}

#[tokio::test]
async fn embed_returns_vector() {
    let server = MockServer::start().await;
    let embedding: Vec<f32> = (0..768).map(|i| i as f32 / 768.0).collect();
    Mock::given(method("POST"))
        .and(path("/api/embeddings"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"embedding": embedding})),
        )
        .mount(&server)
        .await;

    let result = client_for(&server)
        .embed("some article text", "nomic-embed-text")
        .await
        .expect("embed");
    assert_eq!(result.len(), 768);
}

#[tokio::test]
async fn disabled_backend_refuses_calls() {
    let client = OllamaClient::new(
        "http://localhost:1".to_string(),
        Duration::from_secs(1),
        false,
        "llama3".to_string(),
    );
    assert!(client
        .generate("llama3", "hi", &GenerateOptions::default())
        .await
        .is_err());
    assert!(client.embed("hi", "nomic-embed-text").await.is_err());
}

#[tokio::test]
async fn list_tags_returns_model_names() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/tags"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "models": [{"name": "llama3"}, {"name": "nomic-embed-text"}]
        })))
        .mount(&server)
        .await;

    let tags = client_for(&server).list_tags().await.expect("tags");
    assert_eq!(tags, vec!["llama3", "nomic-embed-text"]);
}

#[tokio::test]
async fn stream_yields_chunks_in_order() {
    let server = MockServer::start().await;
    let body = concat!(
        "{\"response\": \"alpha \", \"done\": false}\n",
        "{\"response\": \"beta\", \"done\": true}\n",
    );
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "application/x-ndjson"))
        .mount(&server)
        .await;

    let (_cancel_tx, cancel_rx) = watch::channel(false);
    let stream = client_for(&server)
        .stream("llama3", "stream it", &GenerateOptions::default(), cancel_rx)
        .await
        .expect("stream");

    let text = stream.collect_text().await;
    assert_eq!(text, "alpha beta");
}

#[tokio::test]
async fn stream_respects_cancellation() {
    let server = MockServer::start().await;
    // A response that trickles in slower than the test will wait
    let body = "{\"response\": \"first\", \"done\": false}\n";
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(body, "application/x-ndjson")
                .set_delay(Duration::from_millis(50)),
        )
        .mount(&server)
        .await;

    let (cancel_tx, cancel_rx) = watch::channel(false);
    let mut stream = client_for(&server)
        .stream("llama3", "stream it", &GenerateOptions::default(), cancel_rx)
        .await
        .expect("stream");

    cancel_tx.send(true).unwrap();
    assert!(stream.next_chunk().await.is_none());
}
