mod common;

use anyhow::Result;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use common::{FakeAiService, StubApi};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;
use veritas_client::chat::{ChatSession, ChatSessionConfig, Role};
use veritas_client::transport::TransportConfig;
use veritas_client::{create_router, AppState};

async fn app(service: &FakeAiService, api: StubApi, conversation: Option<&str>) -> Router {
    let api = Arc::new(api);
    let config = ChatSessionConfig {
        transport: TransportConfig {
            base_url: service.base_url.clone(),
            connect_timeout: Duration::from_secs(2),
        },
        ready_timeout: Duration::from_secs(3),
        ..ChatSessionConfig::default()
    };
    let (chat, _task) = ChatSession::spawn(config, api.clone(), conversation.map(str::to_string));
    create_router(AppState::new(chat, api))
}

async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> Result<(StatusCode, Value)> {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(match body {
            Some(body) => Body::from(body.to_string()),
            None => Body::empty(),
        })?;

    let response = app.clone().oneshot(request).await?;
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await?;
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
    };

    Ok((status, value))
}

fn stored() -> StubApi {
    StubApi::signed_in().with_history(
        "7",
        &[
            (Role::User, "m1", "Summarize the report"),
            (Role::Assistant, "m2", "The report covers Q3 revenue."),
        ],
    )
}

#[tokio::test]
async fn test_health_check() -> Result<()> {
    let service = FakeAiService::start().await?;
    let app = app(&service, StubApi::signed_in(), None).await;

    let (status, body) = call(&app, "GET", "/health", None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, Value::String("OK".to_string()));

    Ok(())
}

#[tokio::test]
async fn test_quote_then_send() -> Result<()> {
    let mut service = FakeAiService::start().await?;
    let app = app(&service, stored(), Some("7")).await;
    let mut peer = service.connection_matching("session_id=7").await?;

    // Wait for history to land
    let mut loaded = false;
    for _ in 0..50 {
        let (_, chat) = call(&app, "GET", "/chat", None).await?;
        if chat["messages"].as_array().map(Vec::len) == Some(2) {
            loaded = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(loaded);

    let selection = json!({
        "text": "Q3 revenue",
        "collapsed": false,
        "message_id": "m2",
        "bounds": {"top": 100.0, "left": 20.0, "width": 80.0, "height": 16.0}
    });
    let (status, highlight) = call(&app, "POST", "/chat/selection", Some(selection)).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(highlight["source_message_id"], "m2");

    let (status, quote) = call(&app, "POST", "/chat/quote", None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(quote["text"], "Q3 revenue");

    let (status, chat) = call(&app, "POST", "/chat/messages", Some(json!({"text": "Expand on this"}))).await?;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(chat["messages"].as_array().map(Vec::len), Some(3));
    assert_eq!(chat["quote"], Value::Null);

    let frame = peer.recv_json().await?;
    assert_eq!(frame["payload"]["selected_text"], "Q3 revenue");

    // Nothing selected any more
    let (status, _) = call(&app, "POST", "/chat/quote", None).await?;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = call(&app, "DELETE", "/chat/quote", None).await?;
    assert_eq!(status, StatusCode::NO_CONTENT);

    Ok(())
}

#[tokio::test]
async fn test_empty_message_rejected() -> Result<()> {
    let service = FakeAiService::start().await?;
    let app = app(&service, StubApi::signed_in(), None).await;

    let (status, body) = call(&app, "POST", "/chat/messages", Some(json!({"text": "  "}))).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Message text is empty");

    Ok(())
}

#[tokio::test]
async fn test_failed_creation_returns_draft() -> Result<()> {
    let service = FakeAiService::start().await?;
    let api = StubApi {
        fail_create: true,
        ..StubApi::signed_in()
    };
    let app = app(&service, api, None).await;

    let (status, body) = call(&app, "POST", "/chat/messages", Some(json!({"text": "Summarize the report"}))).await?;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["draft"], "Summarize the report");

    Ok(())
}

#[tokio::test]
async fn test_disconnected_send_is_unavailable() -> Result<()> {
    let service = FakeAiService::start().await?;
    let app = app(&service, StubApi::default().with_history("7", &[]), Some("7")).await;

    let (status, body) = call(&app, "POST", "/chat/messages", Some(json!({"text": "hello"}))).await?;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(body["error"].as_str().is_some_and(|e| e.contains("disconnected")));

    Ok(())
}

#[tokio::test]
async fn test_switch_and_list_conversations() -> Result<()> {
    let mut service = FakeAiService::start().await?;
    let app = app(&service, stored(), None).await;

    let (status, chat) = call(&app, "POST", "/chat/conversation", Some(json!({"id": "7"}))).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(chat["conversation_id"], "7");
    assert_eq!(chat["messages"][1]["content"], "The report covers Q3 revenue.");
    service.connection_matching("session_id=7").await?;

    let (status, list) = call(&app, "GET", "/conversations", None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list[0]["id"], "7");

    Ok(())
}
