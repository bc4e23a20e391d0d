//! HTTP 接入：生命周期接口与消息服务 Webhook
//!
//! - POST /start-ai-agent `{channel_id, channel_type?}`
//! - POST /stop-ai-agent `{channel_id}`
//! - POST /token `{user_id}`
//! - POST /webhook 消息服务推送的频道事件，转发到 EventBus
//! - GET /health

use std::sync::Arc;

use axum::{extract::State, http::StatusCode, routing::{get, post}, Json, Router};
use serde_json::{json, Value};

use super::lifecycle::{
    AgentLifecycle, LifecycleError, StartAgentRequest, StartAgentResponse, StopAgentRequest, StopAgentResponse,
    TokenRequest, TokenResponse,
};
use crate::chat::ChatEvent;

type ApiError = (StatusCode, Json<Value>);

/// 创建路由
pub fn create_router(lifecycle: Arc<AgentLifecycle>) -> Router {
    Router::new()
        .route("/start-ai-agent", post(start_agent))
        .route("/stop-ai-agent", post(stop_agent))
        .route("/token", post(issue_token))
        .route("/webhook", post(webhook_receive))
        .route("/health", get(|| async { "OK" }))
        .with_state(lifecycle)
}

fn api_error(err: LifecycleError) -> ApiError {
    match &err {
        LifecycleError::InvalidRequest(_) => (StatusCode::BAD_REQUEST, Json(json!({ "error": err.to_string() }))),
        _ => {
            tracing::error!(error = %err, reason = ?err.reason(), "lifecycle operation failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": err.to_string(), "reason": err.reason() })),
            )
        }
    }
}

async fn start_agent(
    State(lifecycle): State<Arc<AgentLifecycle>>,
    Json(req): Json<StartAgentRequest>,
) -> Result<Json<StartAgentResponse>, ApiError> {
    lifecycle.start_agent(req).await.map(Json).map_err(api_error)
}

async fn stop_agent(
    State(lifecycle): State<Arc<AgentLifecycle>>,
    Json(req): Json<StopAgentRequest>,
) -> Result<Json<StopAgentResponse>, ApiError> {
    lifecycle.stop_agent(req).await.map(Json).map_err(api_error)
}

async fn issue_token(
    State(lifecycle): State<Arc<AgentLifecycle>>,
    Json(req): Json<TokenRequest>,
) -> Result<Json<TokenResponse>, ApiError> {
    lifecycle.issue_token(req).map(Json).map_err(api_error)
}

/// 频道事件推送：返回投递到的订阅者数量
async fn webhook_receive(
    State(lifecycle): State<Arc<AgentLifecycle>>,
    Json(event): Json<ChatEvent>,
) -> Json<Value> {
    tracing::debug!(event = %event.kind, cid = ?event.cid, "webhook event received");
    let delivered = lifecycle.chat().events().publish(event);
    Json(json!({ "delivered": delivered }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{AgentRegistry, SessionSettings};
    use crate::chat::{ChatCall, MockChatClient};
    use crate::llm::{MessageContent, RunEvent, ScriptedBackend};
    use crate::tools::{ToolDispatcher, ToolRegistry};
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    struct TestApp {
        router: Router,
        lifecycle: Arc<AgentLifecycle>,
        chat: Arc<MockChatClient>,
        backend: Arc<ScriptedBackend>,
    }

    fn test_app() -> TestApp {
        let chat = Arc::new(MockChatClient::new());
        let backend = Arc::new(ScriptedBackend::new());
        let lifecycle = Arc::new(AgentLifecycle::new(
            chat.clone(),
            backend.clone(),
            Arc::new(ToolDispatcher::new(ToolRegistry::new(), 5)),
            Arc::new(AgentRegistry::new()),
            SessionSettings::new("asst_1"),
        ));
        TestApp {
            router: create_router(lifecycle.clone()),
            lifecycle,
            chat,
            backend,
        }
    }

    fn app() -> (Router, Arc<AgentLifecycle>) {
        let t = test_app();
        (t.router, t.lifecycle)
    }

    async fn body_json(resp: axum::response::Response) -> Value {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn wait_until(cond: impl Fn() -> bool) {
        for _ in 0..400 {
            if cond() {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        panic!("condition not reached");
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_start_route() {
        let (app, lifecycle) = app();
        let resp = app
            .oneshot(post_json("/start-ai-agent", json!({"channel_id": "room-1"})))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(lifecycle.registry().is_active("ai-bot-room-1"));
    }

    #[tokio::test]
    async fn test_missing_channel_is_bad_request() {
        let (app, _) = app();
        let resp = app.oneshot(post_json("/start-ai-agent", json!({}))).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_token_route() {
        let (app, _) = app();
        let resp = app
            .oneshot(post_json("/token", json!({"user_id": "user-1"})))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_stop_route_deletes_bot() {
        let t = test_app();
        t.router
            .clone()
            .oneshot(post_json("/start-ai-agent", json!({"channel_id": "room-1"})))
            .await
            .unwrap();
        assert!(t.lifecycle.registry().is_active("ai-bot-room-1"));

        let resp = t
            .router
            .oneshot(post_json("/stop-ai-agent", json!({"channel_id": "room-1"})))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await, json!({"success": true}));
        assert_eq!(t.lifecycle.registry().active_count(), 0);
        assert!(t.chat.calls().contains(&ChatCall::DeleteUser {
            user_id: "ai-bot-room-1".into(),
            hard_delete: true
        }));
    }

    #[tokio::test]
    async fn test_stop_route_reports_failure_reason() {
        let t = test_app();
        t.router
            .clone()
            .oneshot(post_json("/start-ai-agent", json!({"channel_id": "room-1"})))
            .await
            .unwrap();
        t.chat.fail_on("delete_user");

        let resp = t
            .router
            .oneshot(post_json("/stop-ai-agent", json!({"channel_id": "room-1"})))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(resp).await;
        assert!(body["error"].is_string());
        assert!(body["reason"].as_str().unwrap().contains("delete_user failed"));
    }

    #[tokio::test]
    async fn test_webhook_message_drives_reply() {
        let t = test_app();
        t.router
            .clone()
            .oneshot(post_json("/start-ai-agent", json!({"channel_id": "room-1"})))
            .await
            .unwrap();
        t.backend.push_events(vec![
            RunEvent::RunCreated { run_id: "run_1".into() },
            RunEvent::MessageCompleted {
                content: MessageContent::Text("Sunny".into()),
            },
            RunEvent::RunCompleted,
        ]);

        let event = json!({
            "type": "message.new",
            "cid": "messaging:room-1",
            "message": {"id": "m-1", "text": "weather?", "user": {"id": "user-1"}}
        });
        let resp = t.router.oneshot(post_json("/webhook", event)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await, json!({"delivered": 1}));

        let chat = t.chat.clone();
        wait_until(move || chat.updates_for("msg-0").last().map(String::as_str) == Some("Sunny")).await;
        assert_eq!(t.backend.messages(), vec![("thread_0".to_string(), "weather?".to_string())]);
        let registry = t.lifecycle.registry().clone();
        wait_until(move || registry.active_count() == 0).await;
    }

    #[tokio::test]
    async fn test_webhook_for_unwatched_channel_delivers_nothing() {
        let (app, _) = app();
        let event = json!({"type": "message.new", "cid": "messaging:elsewhere"});
        let resp = app.oneshot(post_json("/webhook", event)).await.unwrap();
        assert_eq!(body_json(resp).await, json!({"delivered": 0}));
    }

    #[tokio::test]
    async fn test_health() {
        let (app, _) = app();
        let resp = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }
}
