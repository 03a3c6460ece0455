//! Synthesis against a mocked OpenAI-compatible endpoint
//!
//! Run with: cargo test --test synthesis_tests

use opgen::operations::{Column, Operation, OperationKind, SchemaDefinition, Table};
use opgen::synthesis::{probe_connection, HttpLlmProvider, ProviderId, Synthesizer};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn provider(server: &MockServer) -> HttpLlmProvider {
    HttpLlmProvider::new(
        ProviderId::OpenAi,
        format!("{}/v1/chat/completions", server.uri()),
        "gpt-test",
        "sk-test",
        Duration::from_secs(5),
    )
    .unwrap()
}

fn chat_reply(content: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "choices": [{ "message": { "role": "assistant", "content": content } }]
    }))
}

fn schema() -> SchemaDefinition {
    SchemaDefinition {
        tables: vec![Table {
            name: "artists".into(),
            variable: Some("artists".into()),
            columns: vec![Column {
                name: "popularity".into(),
                column_type: "integer".into(),
                primary_key: false,
                not_null: false,
            }],
        }],
        references: Default::default(),
    }
}

fn operation() -> Operation {
    Operation::new(OperationKind::Mutation, "increment artist popularity by 10").with_parameter("artistId", "string")
}

#[tokio::test]
async fn test_synthesis_over_http() {
    let server = MockServer::start().await;
    let artifact = json!({
        "input_type": "z.object({ artistId: z.string() })",
        "function": "async (corsair, data) => corsair.db.update(corsair.schema.artists)",
        "notes": "Caps popularity at 100",
        "pseudocode": "1. load artist\n2. add 10",
        "function_name": "incrementArtistPopularity",
    });
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("authorization", "Bearer sk-test"))
        .and(body_string_contains("increment artist popularity by 10"))
        .respond_with(chat_reply(&format!("```json\n{}\n```", artifact)))
        .expect(1)
        .mount(&server)
        .await;

    let result = Synthesizer::new(Arc::new(provider(&server)))
        .synthesize(&operation(), &schema(), Some("cap at 100"))
        .await
        .unwrap();
    assert!(!result.fallback);
    assert_eq!(result.function_name, "incrementArtistPopularity");
    assert_eq!(result.notes, "Caps popularity at 100");
}

#[tokio::test]
async fn test_server_error_falls_back_to_template() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503).set_body_json(json!({ "error": { "message": "overloaded" } })))
        .mount(&server)
        .await;

    let result = Synthesizer::new(Arc::new(provider(&server)))
        .synthesize(&operation(), &schema(), None)
        .await
        .unwrap();
    assert!(result.fallback);
    assert!(result.function.contains("artists"));
}

#[tokio::test]
async fn test_malformed_reply_without_tables_is_unavailable() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(chat_reply("I cannot help with that"))
        .mount(&server)
        .await;

    let err = Synthesizer::new(Arc::new(provider(&server)))
        .synthesize(&operation(), &SchemaDefinition::default(), None)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "SYNTHESIS_UNAVAILABLE");
}

#[tokio::test]
async fn test_connection_probe() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(chat_reply(r#"{"message": "Hello! LLM connection successful.", "timestamp": "2026-10-18T12:00:00Z"}"#))
        .mount(&server)
        .await;

    let probe = probe_connection(&provider(&server)).await.unwrap();
    assert_eq!(probe.message, "Hello! LLM connection successful.");
    assert_eq!(probe.timestamp, "2026-10-18T12:00:00Z");
}
