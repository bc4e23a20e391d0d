//! 消息服务客户端抽象
//!
//! 所有实现（Stream Chat REST / Mock）实现 ChatClient：用户管理、频道成员、消息写入、
//! 频道事件发送与入站事件订阅。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use super::events::{EventBus, IndicatorEvent};

/// 消息服务错误
#[derive(Error, Debug, Clone)]
pub enum ChatError {
    #[error("Chat service request failed: {0}")]
    Request(String),

    #[error("Chat service returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Invalid chat service response: {0}")]
    Decode(String),

    #[error("Chat client misconfigured: {0}")]
    Config(String),

    #[error("Token signing failed: {0}")]
    Token(String),
}

/// 频道引用：类型 + id，cid 形如 `messaging:room-1`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelRef {
    pub kind: String,
    pub id: String,
}

impl ChannelRef {
    pub fn new(kind: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            id: id.into(),
        }
    }

    pub fn cid(&self) -> String {
        format!("{}:{}", self.kind, self.id)
    }
}

/// 用户资料（upsert 用）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatUser {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// 新消息请求体
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NewMessage {
    pub text: String,
    pub user_id: String,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub ai_generated: bool,
}

/// 服务端返回的消息（只关心 id 与文本）
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ChatMessage {
    pub id: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub cid: Option<String>,
}

/// 部分更新的 `set` 字段集合
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessageUpdate {
    pub set: Map<String, Value>,
}

impl MessageUpdate {
    pub fn text(text: impl Into<String>) -> Self {
        let mut set = Map::new();
        set.insert("text".to_string(), Value::String(text.into()));
        Self { set }
    }

    pub fn text_value(&self) -> Option<&str> {
        self.set.get("text").and_then(|v| v.as_str())
    }
}

/// 消息服务客户端 trait
#[async_trait]
pub trait ChatClient: Send + Sync {
    async fn upsert_user(&self, user: &ChatUser) -> Result<(), ChatError>;

    async fn delete_user(&self, user_id: &str, hard_delete: bool) -> Result<(), ChatError>;

    async fn add_members(&self, channel: &ChannelRef, user_ids: &[String]) -> Result<(), ChatError>;

    /// 以 `as_user` 身份查询并关注频道（确认频道存在且可写）
    async fn watch_channel(&self, channel: &ChannelRef, as_user: &str) -> Result<(), ChatError>;

    async fn send_message(&self, channel: &ChannelRef, message: NewMessage) -> Result<ChatMessage, ChatError>;

    /// 发送频道自定义事件（AI 指示器）
    async fn send_event(
        &self,
        channel: &ChannelRef,
        as_user: &str,
        event: &IndicatorEvent,
    ) -> Result<(), ChatError>;

    async fn partial_update_message(
        &self,
        message_id: &str,
        as_user: &str,
        update: MessageUpdate,
    ) -> Result<(), ChatError>;

    /// 签发用户 token；时间为 Unix 秒
    fn create_token(
        &self,
        user_id: &str,
        expires_at: Option<i64>,
        issued_at: Option<i64>,
    ) -> Result<String, ChatError>;

    /// 入站事件总线（Webhook 推入，会话订阅）
    fn events(&self) -> &EventBus;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_cid() {
        let channel = ChannelRef::new("messaging", "room-1");
        assert_eq!(channel.cid(), "messaging:room-1");
    }

    #[test]
    fn test_new_message_omits_false_ai_flag() {
        let msg = NewMessage {
            text: "hi".into(),
            user_id: "u1".into(),
            ai_generated: false,
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert!(json.get("ai_generated").is_none());
    }
}
