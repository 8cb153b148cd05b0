mod common;

use axum::body::{ to_bytes, Body };
use axum::http::{ header, Request, StatusCode };
use axum::Router;
use chat_relay::client::reassembler::StreamReassembler;
use chat_relay::client::ClientError;
use chat_relay::models::chat::{ ChatReply, Role };
use chat_relay::server::api::router;
use common::{ quota_error, relay_with, ScriptedClient };
use serde_json::{ json, Value };
use std::sync::Arc;
use tower::ServiceExt;

async fn send(app: &Router, req: Request<Body>) -> (StatusCode, header::HeaderMap, Vec<u8>) {
    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let headers = resp.headers().clone();
    let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    (status, headers, body.to_vec())
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn reassemble(body: &[u8]) -> (Result<ChatReply, ClientError>, Vec<String>) {
    let mut seen = Vec::new();
    let mut on_delta = |s: &str| seen.push(s.to_string());
    let mut reassembler = StreamReassembler::new(None);
    let result = match reassembler.feed(body, &mut on_delta) {
        Ok(Some(reply)) => Ok(reply),
        Ok(None) => reassembler.finish(&mut on_delta),
        Err(e) => Err(e),
    };
    (result, seen)
}

#[tokio::test]
async fn health_reports_ok() {
    let (relay, _) = relay_with(Arc::new(ScriptedClient::replying(&[])));
    let app = router(relay);
    let (status, _, body) = send(
        &app,
        Request::get("/api/health").body(Body::empty()).unwrap()
    ).await;
    assert_eq!(status, StatusCode::OK);
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["status"], "ok");
}

#[tokio::test]
async fn new_conversation_ids_are_distinct_and_empty() {
    let (relay, store) = relay_with(Arc::new(ScriptedClient::replying(&[])));
    let app = router(relay);

    let mut ids = Vec::new();
    for _ in 0..2 {
        let (status, _, body) = send(
            &app,
            Request::post("/api/chat/new").body(Body::empty()).unwrap()
        ).await;
        assert_eq!(status, StatusCode::OK);
        let json: Value = serde_json::from_slice(&body).unwrap();
        ids.push(json["conversationId"].as_str().unwrap().to_string());
    }
    assert_ne!(ids[0], ids[1]);
    for id in &ids {
        assert!(store.get(id).await.messages.is_empty());
    }
}

#[tokio::test]
async fn deleting_unknown_conversation_succeeds() {
    let (relay, store) = relay_with(Arc::new(ScriptedClient::replying(&[])));
    store.append("known", chat_relay::models::chat::ChatMessage::user("hi")).await;
    let app = router(relay);

    for id in ["known", "known", "never-created"] {
        let (status, _, body) = send(
            &app,
            Request::delete(format!("/api/chat/{}", id)).body(Body::empty()).unwrap()
        ).await;
        assert_eq!(status, StatusCode::OK);
        let json: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["message"], "Conversation cleared");
    }
    assert_eq!(store.len().await, 0);
}

#[tokio::test]
async fn provider_introspection() {
    let (relay, _) = relay_with(Arc::new(ScriptedClient::replying(&[])));
    let app = router(relay);
    let (status, _, body) = send(
        &app,
        Request::get("/api/chat/provider").body(Body::empty()).unwrap()
    ).await;
    assert_eq!(status, StatusCode::OK);
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json, json!({ "provider": "openai", "model": "gpt-3.5-turbo", "hasApiKey": true }));
}

#[tokio::test]
async fn chat_streams_frames_and_records_both_turns() {
    let (relay, store) = relay_with(Arc::new(ScriptedClient::replying(&["Hi", " there"])));
    let app = router(relay);

    let (status, headers, body) = send(
        &app,
        post_json("/api/chat", json!({ "message": "Hello", "conversationId": "abc123" }))
    ).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers[header::CONTENT_TYPE], "text/event-stream");
    assert_eq!(headers[header::CACHE_CONTROL], "no-cache, no-transform");

    let text = String::from_utf8(body.clone()).unwrap();
    assert_eq!(
        text,
        "data: {\"content\":\"Hi\",\"done\":false}\n\n\
         data: {\"content\":\" there\",\"done\":false}\n\n\
         data: {\"done\":true,\"conversationId\":\"abc123\"}\n\n"
    );

    let (result, seen) = reassemble(&body);
    assert_eq!(result.unwrap(), ChatReply {
        response: "Hi there".to_string(),
        conversation_id: Some("abc123".to_string()),
    });
    assert_eq!(seen, vec!["Hi", " there"]);

    let history = store.get("abc123").await.messages;
    let turns: Vec<(Role, &str)> = history
        .iter()
        .map(|m| (m.role, m.content.as_str()))
        .collect();
    assert_eq!(turns, vec![(Role::User, "Hello"), (Role::Assistant, "Hi there")]);
}

#[tokio::test]
async fn chat_without_id_gets_server_generated_id() {
    let (relay, store) = relay_with(Arc::new(ScriptedClient::replying(&["ok"])));
    let app = router(relay);
    let (status, _, body) = send(&app, post_json("/api/chat", json!({ "message": "Hello" }))).await;
    assert_eq!(status, StatusCode::OK);

    let reply = reassemble(&body).0.unwrap();
    let id = reply.conversation_id.expect("done frame carries an id");
    assert_eq!(store.get(&id).await.messages.len(), 2);
}

#[tokio::test]
async fn invalid_messages_are_rejected_before_streaming() {
    let (relay, store) = relay_with(Arc::new(ScriptedClient::replying(&["never"])));
    let app = router(relay);

    let bodies = vec![
        post_json("/api/chat", json!({})),
        post_json("/api/chat", json!({ "message": "" })),
        post_json("/api/chat", json!({ "message": 42 })),
        Request::post("/api/chat")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{not json"))
            .unwrap()
    ];
    for req in bodies {
        let (status, headers, body) = send(&app, req).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(headers[header::CONTENT_TYPE], "application/json");
        let json: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"], true);
        assert_eq!(json["status"], 400);
        assert!(json["message"].as_str().unwrap().contains("Message is required"));
    }
    assert_eq!(store.len().await, 0);
}

#[tokio::test]
async fn upstream_rejection_before_streaming_is_plain_json() {
    let (relay, store) = relay_with(Arc::new(ScriptedClient::rejecting(quota_error())));
    let app = router(relay);
    let (status, _, body) = send(
        &app,
        post_json("/api/chat", json!({ "message": "Hello", "conversationId": "q0" }))
    ).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["error"], true);
    assert_eq!(json["status"], 429);
    assert_eq!(store.get("q0").await.messages.len(), 1);
}

#[tokio::test]
async fn quota_failure_after_headers_is_one_error_frame() {
    let (relay, store) = relay_with(
        Arc::new(ScriptedClient::failing_mid_stream(vec![Err(quota_error())]))
    );
    let app = router(relay);
    let (status, headers, body) = send(
        &app,
        post_json("/api/chat", json!({ "message": "Hello", "conversationId": "q1" }))
    ).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers[header::CONTENT_TYPE], "text/event-stream");

    let text = String::from_utf8(body.clone()).unwrap();
    assert_eq!(text.matches("data:").count(), 1);
    assert!(!text.contains("conversationId"));

    match reassemble(&body).0 {
        Err(ClientError::Stream { status, .. }) => assert_eq!(status, Some(429)),
        other => panic!("unexpected result {:?}", other),
    }

    let history = store.get("q1").await.messages;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].role, Role::User);
}

#[tokio::test]
async fn concurrent_chats_on_one_conversation_both_complete() {
    let (relay, store) = relay_with(Arc::new(ScriptedClient::replying(&["a", "b"])));
    let app = router(relay);

    let (first, second) = tokio::join!(
        send(&app, post_json("/api/chat", json!({ "message": "one", "conversationId": "same" }))),
        send(&app, post_json("/api/chat", json!({ "message": "two", "conversationId": "same" })))
    );
    assert_eq!(reassemble(&first.2).0.unwrap().response, "ab");
    assert_eq!(reassemble(&second.2).0.unwrap().response, "ab");

    let history = store.get("same").await.messages;
    assert_eq!(history.len(), 4);
    let users: Vec<&str> = history
        .iter()
        .filter(|m| m.role == Role::User)
        .map(|m| m.content.as_str())
        .collect();
    assert!(users.contains(&"one") && users.contains(&"two"));
}
