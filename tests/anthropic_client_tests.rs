//! HTTP-level tests for the Anthropic client

use mail_triage::error::TriageError;
use mail_triage::llm::{
    AnthropicClient, BatchItemResult, BatchRequest, InferenceClient, InferenceSettings,
    ProcessingStatus, StopReason,
};
use mail_triage::models::{ContentBlock, Message};
use mail_triage::tools;
use secrecy::SecretString;
use serde_json::{json, Value};
use std::time::Duration;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const MODEL: &str = "claude-3-5-haiku-20241022";

fn settings(with_tools: bool) -> InferenceSettings {
    InferenceSettings {
        model: MODEL.to_string(),
        max_tokens: 1024,
        system: "You sort email.".to_string(),
        tools: if with_tools { tools::catalog(false) } else { Vec::new() },
    }
}

fn client(server: &MockServer, with_tools: bool) -> AnthropicClient {
    AnthropicClient::new(
        SecretString::from("sk-ant-test".to_string()),
        &server.uri(),
        Duration::from_secs(5),
        settings(with_tools),
    )
    .unwrap()
}

fn message_body(stop_reason: &str, content: Value) -> Value {
    json!({
        "id": "msg_01",
        "type": "message",
        "role": "assistant",
        "model": MODEL,
        "content": content,
        "stop_reason": stop_reason,
        "usage": {"input_tokens": 100, "output_tokens": 20}
    })
}

fn batch_body(id: &str, status: &str, results_url: Option<String>) -> Value {
    json!({
        "id": id,
        "type": "message_batch",
        "processing_status": status,
        "request_counts": {"processing": 0, "succeeded": 1, "errored": 1, "canceled": 0, "expired": 0},
        "results_url": results_url
    })
}

async fn last_body(server: &MockServer) -> Value {
    let requests = server.received_requests().await.unwrap();
    requests.last().unwrap().body_json().unwrap()
}

#[tokio::test]
async fn test_complete_sends_headers_and_parameters() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .and(header("x-api-key", "sk-ant-test"))
        .and(header("anthropic-version", "2023-06-01"))
        .respond_with(ResponseTemplate::new(200).set_body_json(message_body(
            "tool_use",
            json!([
                {"type": "text", "text": "Filing."},
                {"type": "tool_use", "id": "toolu_01", "name": "moveEmail", "input": {"emailId": "m-1"}}
            ]),
        )))
        .expect(1)
        .mount(&server)
        .await;

    let response = client(&server, true)
        .complete(&[Message::user_text("Sort this email")])
        .await
        .unwrap();

    assert_eq!(response.stop_reason, Some(StopReason::ToolUse));
    assert!(matches!(response.content[1], ContentBlock::ToolUse { ref name, .. } if name == "moveEmail"));

    let body = last_body(&server).await;
    assert_eq!(body["model"], MODEL);
    assert_eq!(body["max_tokens"], 1024);
    assert_eq!(body["system"], "You sort email.");
    assert_eq!(body["messages"], json!([{"role": "user", "content": "Sort this email"}]));
    assert_eq!(body["tools"][0]["name"], "moveEmail");
    assert_eq!(
        body["tool_choice"],
        json!({"type": "auto", "disable_parallel_tool_use": true})
    );
}

#[tokio::test]
async fn test_complete_without_tools_omits_tool_choice() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(message_body("end_turn", json!([{"type": "text", "text": "ok"}]))),
        )
        .mount(&server)
        .await;

    client(&server, false)
        .complete(&[Message::user_text("hi")])
        .await
        .unwrap();

    let body = last_body(&server).await;
    assert!(body.get("tools").is_none());
    assert!(body.get("tool_choice").is_none());
}

#[tokio::test]
async fn test_api_error_maps_to_inference_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(ResponseTemplate::new(529).set_body_json(json!({
            "type": "error",
            "error": {"type": "overloaded_error", "message": "Overloaded"}
        })))
        .mount(&server)
        .await;

    let err = client(&server, true)
        .complete(&[Message::user_text("hi")])
        .await
        .unwrap_err();

    match err {
        TriageError::InferenceFailure(message) => {
            assert!(message.contains("529"));
            assert!(message.contains("overloaded_error"));
        }
        other => panic!("unexpected error {:?}", other),
    }
}

#[tokio::test]
async fn test_submit_batch_body_shape() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages/batches"))
        .and(body_partial_json(json!({
            "requests": [{"custom_id": "session-a"}, {"custom_id": "session-b"}]
        })))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(batch_body("msgbatch_01", "in_progress", None)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let requests = vec![
        BatchRequest {
            custom_id: "session-a".to_string(),
            messages: vec![Message::user_text("first")],
        },
        BatchRequest {
            custom_id: "session-b".to_string(),
            messages: vec![Message::user_text("second")],
        },
    ];
    let handle = client(&server, true).submit_batch(&requests).await.unwrap();

    assert_eq!(handle.id, "msgbatch_01");
    assert_eq!(handle.processing_status, ProcessingStatus::InProgress);

    let body = last_body(&server).await;
    let params = &body["requests"][1]["params"];
    assert_eq!(params["model"], MODEL);
    assert_eq!(params["messages"][0]["content"], "second");
    assert_eq!(params["tool_choice"]["disable_parallel_tool_use"], true);
}

#[tokio::test]
async fn test_batch_status_and_cancel() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/messages/batches/msgbatch_01"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(batch_body("msgbatch_01", "in_progress", None)),
        )
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/messages/batches/msgbatch_01/cancel"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(batch_body("msgbatch_01", "canceling", None)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&server, true);
    let status = client.batch_status("msgbatch_01").await.unwrap();
    assert!(!status.is_ended());

    let cancelled = client.cancel_batch("msgbatch_01").await.unwrap();
    assert_eq!(cancelled.processing_status, ProcessingStatus::Canceling);
}

#[tokio::test]
async fn test_batch_results_parsed_from_jsonl() {
    let server = MockServer::start().await;
    let results_url = format!("{}/v1/messages/batches/msgbatch_01/results", server.uri());

    let lines = [
        json!({
            "custom_id": "session-a",
            "result": {"type": "succeeded", "message": message_body("end_turn", json!([{"type": "text", "text": "ok"}]))}
        }),
        json!({
            "custom_id": "session-b",
            "result": {"type": "errored", "error": {"type": "error", "error": {"type": "api_error", "message": "boom"}}}
        }),
    ]
    .iter()
    .map(|line| line.to_string())
    .collect::<Vec<_>>()
    .join("\n");

    Mock::given(method("GET"))
        .and(path("/v1/messages/batches/msgbatch_01/results"))
        .and(header("x-api-key", "sk-ant-test"))
        .respond_with(ResponseTemplate::new(200).set_body_string(format!("{}\n", lines)))
        .expect(1)
        .mount(&server)
        .await;

    let handle = serde_json::from_value(batch_body("msgbatch_01", "ended", Some(results_url))).unwrap();
    let outcomes = client(&server, true).batch_results(&handle).await.unwrap();

    assert_eq!(outcomes.len(), 2);
    assert_eq!(outcomes[0].custom_id.as_deref(), Some("session-a"));
    assert!(matches!(outcomes[0].result, BatchItemResult::Succeeded(_)));
    assert!(matches!(outcomes[1].result, BatchItemResult::Failed(ref reason) if reason.contains("boom")));
}

#[tokio::test]
async fn test_batch_results_rejects_malformed_line() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/messages/batches/msgbatch_02/results"))
        .respond_with(ResponseTemplate::new(200).set_body_string("{not json}\n"))
        .mount(&server)
        .await;

    let handle = serde_json::from_value(batch_body("msgbatch_02", "ended", None)).unwrap();
    let result = client(&server, true).batch_results(&handle).await;

    assert!(result.is_err());
}
