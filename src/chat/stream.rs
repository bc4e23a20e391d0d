//! Stream Chat REST 客户端
//!
//! 服务端调用：`api_key` 放在 query，服务端 JWT 放在 Authorization 头，并带 `stream-auth-type: jwt`。
//! 入站事件不走长连接，由 HTTP Webhook 收到后调用 `events().publish` 分发。

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method};
use serde_json::{json, Value};

use super::events::{EventBus, IndicatorEvent};
use super::token;
use super::traits::{ChannelRef, ChatClient, ChatError, ChatMessage, ChatUser, MessageUpdate, NewMessage};
use crate::config::ChatSection;

pub const DEFAULT_BASE_URL: &str = "https://chat.stream-io-api.com";

/// Stream Chat 服务端客户端
pub struct StreamChatClient {
    http: Client,
    base_url: String,
    api_key: String,
    api_secret: String,
    server_token: String,
    events: EventBus,
}

impl StreamChatClient {
    /// 缺少 key / secret 时回退到环境变量 STREAM_API_KEY / STREAM_API_SECRET，仍缺失则报错
    pub fn new(
        base_url: &str,
        api_key: Option<&str>,
        api_secret: Option<&str>,
        timeout_secs: u64,
    ) -> Result<Self, ChatError> {
        let api_key = api_key
            .map(String::from)
            .or_else(|| std::env::var("STREAM_API_KEY").ok())
            .filter(|k| !k.is_empty())
            .ok_or_else(|| ChatError::Config("STREAM_API_KEY must be set".to_string()))?;
        let api_secret = api_secret
            .map(String::from)
            .or_else(|| std::env::var("STREAM_API_SECRET").ok())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ChatError::Config("STREAM_API_SECRET must be set".to_string()))?;

        let server_token = token::server_token(&api_secret)?;
        let http = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| ChatError::Config(e.to_string()))?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            api_secret,
            server_token,
            events: EventBus::new(),
        })
    }

    pub fn from_config(cfg: &ChatSection) -> Result<Self, ChatError> {
        Self::new(
            &cfg.base_url,
            cfg.api_key.as_deref(),
            cfg.api_secret.as_deref(),
            cfg.request_timeout_secs,
        )
    }

    fn channel_path(channel: &ChannelRef) -> String {
        format!("/channels/{}/{}", channel.kind, channel.id)
    }

    async fn request(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<Value>,
    ) -> Result<Value, ChatError> {
        let url = format!("{}{}", self.base_url, path);
        let mut req = self
            .http
            .request(method.clone(), &url)
            .query(&[("api_key", self.api_key.as_str())])
            .query(query)
            .header("Authorization", &self.server_token)
            .header("stream-auth-type", "jwt");
        if let Some(body) = body {
            req = req.json(&body);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| ChatError::Request(e.to_string()))?;
        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| ChatError::Request(e.to_string()))?;
        if !status.is_success() {
            tracing::warn!(%method, path, status = status.as_u16(), "chat service request rejected");
            return Err(ChatError::Api {
                status: status.as_u16(),
                body: text,
            });
        }
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text).map_err(|e| ChatError::Decode(e.to_string()))
    }
}

#[async_trait]
impl ChatClient for StreamChatClient {
    async fn upsert_user(&self, user: &ChatUser) -> Result<(), ChatError> {
        let mut users = serde_json::Map::new();
        users.insert(
            user.id.clone(),
            serde_json::to_value(user).map_err(|e| ChatError::Decode(e.to_string()))?,
        );
        self.request(Method::POST, "/users", &[], Some(json!({ "users": users })))
            .await
            .map(|_| ())
    }

    async fn delete_user(&self, user_id: &str, hard_delete: bool) -> Result<(), ChatError> {
        let hard = if hard_delete { "true" } else { "false" };
        self.request(
            Method::DELETE,
            &format!("/users/{}", user_id),
            &[("hard_delete", hard)],
            None,
        )
        .await
        .map(|_| ())
    }

    async fn add_members(&self, channel: &ChannelRef, user_ids: &[String]) -> Result<(), ChatError> {
        self.request(
            Method::POST,
            &Self::channel_path(channel),
            &[],
            Some(json!({ "add_members": user_ids })),
        )
        .await
        .map(|_| ())
    }

    async fn watch_channel(&self, channel: &ChannelRef, as_user: &str) -> Result<(), ChatError> {
        self.request(
            Method::POST,
            &format!("{}/query", Self::channel_path(channel)),
            &[],
            Some(json!({
                "state": true,
                "watch": true,
                "data": { "created_by_id": as_user },
            })),
        )
        .await
        .map(|_| ())
    }

    async fn send_message(&self, channel: &ChannelRef, message: NewMessage) -> Result<ChatMessage, ChatError> {
        let resp = self
            .request(
                Method::POST,
                &format!("{}/message", Self::channel_path(channel)),
                &[],
                Some(json!({ "message": message })),
            )
            .await?;
        serde_json::from_value(resp["message"].clone()).map_err(|e| ChatError::Decode(e.to_string()))
    }

    async fn send_event(
        &self,
        channel: &ChannelRef,
        as_user: &str,
        event: &IndicatorEvent,
    ) -> Result<(), ChatError> {
        let mut body = serde_json::to_value(event).map_err(|e| ChatError::Decode(e.to_string()))?;
        if let Some(obj) = body.as_object_mut() {
            obj.insert("user_id".to_string(), Value::String(as_user.to_string()));
        }
        self.request(
            Method::POST,
            &format!("{}/event", Self::channel_path(channel)),
            &[],
            Some(json!({ "event": body })),
        )
        .await
        .map(|_| ())
    }

    async fn partial_update_message(
        &self,
        message_id: &str,
        as_user: &str,
        update: MessageUpdate,
    ) -> Result<(), ChatError> {
        self.request(
            Method::PUT,
            &format!("/messages/{}", message_id),
            &[],
            Some(json!({ "set": update.set, "user_id": as_user })),
        )
        .await
        .map(|_| ())
    }

    fn create_token(
        &self,
        user_id: &str,
        expires_at: Option<i64>,
        issued_at: Option<i64>,
    ) -> Result<String, ChatError> {
        token::user_token(&self.api_secret, user_id, expires_at, issued_at)
    }

    fn events(&self) -> &EventBus {
        &self.events
    }
}
