//! Integration tests for `LlmOracleClient` using wiremock HTTP mocks.

use std::time::Duration;

use chrono::TimeZone;
use optrack_core::Stance;
use optrack_oracle::{
    ComparisonQuestion, LlmOracleClient, LlmOracleSettings, OracleCandidate, OracleError,
    OracleRelation, OracleRequest, OracleSpeaker, RelationOracle,
};
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn test_client(base_url: &str, timeout_secs: u64, max_retries: u32) -> LlmOracleClient {
    LlmOracleClient::new(LlmOracleSettings {
        base_url: format!("{base_url}/v1"),
        api_key: "sk-test".to_owned(),
        model: "gpt-4o-mini".to_owned(),
        timeout_secs,
        max_retries,
        backoff_base_ms: 0,
    })
    .expect("client construction should not fail")
}

fn candidate(id: &str, title: &str, month: u32) -> OracleCandidate {
    OracleCandidate {
        id: id.to_owned(),
        title: title.to_owned(),
        description: format!("{title} (description)"),
        source_unit_date: chrono::Utc.with_ymd_and_hms(2024, month, 1, 0, 0, 0).unwrap(),
        speakers: vec![OracleSpeaker {
            speaker_id: "alice".to_owned(),
            stance: Stance::Support,
            reasoning: None,
        }],
        excerpt: String::new(),
    }
}

fn request() -> OracleRequest {
    OracleRequest {
        question: ComparisonQuestion::EvolutionOrContradiction,
        category: "economy".to_owned(),
        candidates: vec![
            candidate("c1", "Rates will fall fast", 1),
            candidate("c2", "Rates falling but slower", 3),
        ],
    }
}

fn completion(content: &str) -> serde_json::Value {
    serde_json::json!({
        "id": "chatcmpl-1",
        "object": "chat.completion",
        "choices": [
            {
                "index": 0,
                "message": { "role": "assistant", "content": content },
                "finish_reason": "stop"
            }
        ]
    })
}

#[tokio::test]
async fn verify_returns_validated_verdict() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("authorization", "Bearer sk-test"))
        .and(body_partial_json(serde_json::json!({
            "model": "gpt-4o-mini",
            "response_format": { "type": "json_object" }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion(
            r#"{"status":"ok","relation":"EVOLUTION","confidence":0.8,"rationale":"speaker shifted on pace"}"#,
        )))
        .expect(1)
        .mount(&server)
        .await;

    let client = test_client(&server.uri(), 5, 0);
    let verdict = client.verify(&request()).await.expect("should verify");

    assert_eq!(verdict.relation, OracleRelation::Evolution);
    assert!((verdict.confidence - 0.8).abs() < 1e-6);
    assert_eq!(verdict.rationale, "speaker shifted on pace");
}

#[tokio::test]
async fn verify_unwraps_fenced_content() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion(
            "```json\n{\"status\":\"ok\",\"relation\":\"CONTRADICTION\",\"confidence\":0.66}\n```",
        )))
        .mount(&server)
        .await;

    let client = test_client(&server.uri(), 5, 0);
    let verdict = client.verify(&request()).await.expect("should verify");
    assert_eq!(verdict.relation, OracleRelation::Contradiction);
}

#[tokio::test]
async fn malformed_content_is_not_retried() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(completion("these look related to me")),
        )
        .expect(1)
        .mount(&server)
        .await;

    let client = test_client(&server.uri(), 5, 3);
    let err = client.verify(&request()).await.unwrap_err();
    assert!(matches!(err, OracleError::MalformedResponse { .. }));
}

#[tokio::test]
async fn missing_choices_is_malformed() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "choices": [] })))
        .mount(&server)
        .await;

    let client = test_client(&server.uri(), 5, 0);
    let err = client.verify(&request()).await.unwrap_err();
    assert!(err.to_string().contains("no message content"));
}

#[tokio::test]
async fn server_error_is_retried_then_succeeds() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion(
            r#"{"status":"ok","relation":"SAME","confidence":0.9}"#,
        )))
        .mount(&server)
        .await;

    let client = test_client(&server.uri(), 5, 2);
    let verdict = client.verify(&request()).await.expect("should recover");
    assert_eq!(verdict.relation, OracleRelation::Same);
}

#[tokio::test]
async fn throttled_reply_is_retried_after_stated_delay() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "0"))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion(
            r#"{"status":"ok","relation":"RELATED","confidence":0.6}"#,
        )))
        .mount(&server)
        .await;

    let client = test_client(&server.uri(), 5, 1);
    let verdict = client.verify(&request()).await.expect("should recover");
    assert_eq!(verdict.relation, OracleRelation::Related);
}

#[tokio::test]
async fn throttled_reply_carries_retry_after() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "7"))
        .expect(1)
        .mount(&server)
        .await;

    let client = test_client(&server.uri(), 5, 0);
    let err = client.verify(&request()).await.unwrap_err();
    assert!(matches!(
        err,
        OracleError::Throttled { status: 429, retry_after: Some(wait) } if wait == Duration::from_secs(7)
    ));
}

#[tokio::test]
async fn client_error_is_not_retried() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;

    let client = test_client(&server.uri(), 5, 3);
    let err = client.verify(&request()).await.unwrap_err();
    assert!(matches!(err, OracleError::Http(_)));
}

#[tokio::test]
async fn slow_reply_times_out() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(completion(
                    r#"{"status":"ok","relation":"SAME","confidence":0.9}"#,
                ))
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&server)
        .await;

    let client = test_client(&server.uri(), 1, 0);
    let err = client.verify(&request()).await.unwrap_err();
    assert!(matches!(err, OracleError::Timeout { after_secs: 1 }));
}

#[tokio::test]
async fn error_reply_is_rejected() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion(
            r#"{"status":"error","kind":"insufficient_context","message":"excerpts too short"}"#,
        )))
        .mount(&server)
        .await;

    let client = test_client(&server.uri(), 5, 0);
    let err = client.verify(&request()).await.unwrap_err();
    assert!(matches!(err, OracleError::Rejected { ref kind, .. } if kind == "insufficient_context"));
}
