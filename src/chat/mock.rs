//! Mock 消息服务客户端（用于测试，无需网络）
//!
//! 记录每一次调用，可注入失败与调用延迟，便于检查指示器顺序、部分更新次数等。

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::events::{EventBus, IndicatorEvent};
use super::token;
use super::traits::{ChannelRef, ChatClient, ChatError, ChatMessage, ChatUser, MessageUpdate, NewMessage};

/// 一次被记录的调用
#[derive(Debug, Clone, PartialEq)]
pub enum ChatCall {
    UpsertUser(ChatUser),
    DeleteUser { user_id: String, hard_delete: bool },
    AddMembers { cid: String, user_ids: Vec<String> },
    Watch { cid: String, user_id: String },
    SendMessage { cid: String, message: NewMessage },
    SendEvent { cid: String, event: IndicatorEvent },
    PartialUpdate { message_id: String, update: MessageUpdate },
}

/// Mock 客户端
#[derive(Default)]
pub struct MockChatClient {
    calls: Mutex<Vec<ChatCall>>,
    failing: Mutex<HashSet<&'static str>>,
    latency: Mutex<Option<Duration>>,
    next_message: AtomicU64,
    events: EventBus,
}

impl MockChatClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// 让指定操作返回错误：upsert_user / delete_user / add_members / watch_channel /
    /// send_message / send_event / partial_update_message
    pub fn fail_on(&self, op: &'static str) {
        self.failing.lock().insert(op);
    }

    /// 每次异步调用前等待的时间（用于放大并发窗口）
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = Some(latency);
    }

    pub fn calls(&self) -> Vec<ChatCall> {
        self.calls.lock().clone()
    }

    pub fn indicator_events(&self) -> Vec<IndicatorEvent> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                ChatCall::SendEvent { event, .. } => Some(event.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn clear_count(&self) -> usize {
        self.indicator_events().iter().filter(|e| e.is_clear()).count()
    }

    /// 某条消息收到的所有部分更新的 text 值（按顺序）
    pub fn updates_for(&self, message_id: &str) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                ChatCall::PartialUpdate { message_id: id, update } if id == message_id => {
                    update.text_value().map(String::from)
                }
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, pred: impl Fn(&ChatCall) -> bool) -> usize {
        self.calls.lock().iter().filter(|c| pred(c)).count()
    }

    async fn enter(&self, op: &'static str, call: ChatCall) -> Result<(), ChatError> {
        let latency = *self.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if self.failing.lock().contains(op) {
            return Err(ChatError::Api {
                status: 500,
                body: format!("{} failed", op),
            });
        }
        self.calls.lock().push(call);
        Ok(())
    }
}

#[async_trait]
impl ChatClient for MockChatClient {
    async fn upsert_user(&self, user: &ChatUser) -> Result<(), ChatError> {
        self.enter("upsert_user", ChatCall::UpsertUser(user.clone())).await
    }

    async fn delete_user(&self, user_id: &str, hard_delete: bool) -> Result<(), ChatError> {
        self.enter(
            "delete_user",
            ChatCall::DeleteUser {
                user_id: user_id.to_string(),
                hard_delete,
            },
        )
        .await
    }

    async fn add_members(&self, channel: &ChannelRef, user_ids: &[String]) -> Result<(), ChatError> {
        self.enter(
            "add_members",
            ChatCall::AddMembers {
                cid: channel.cid(),
                user_ids: user_ids.to_vec(),
            },
        )
        .await
    }

    async fn watch_channel(&self, channel: &ChannelRef, as_user: &str) -> Result<(), ChatError> {
        self.enter(
            "watch_channel",
            ChatCall::Watch {
                cid: channel.cid(),
                user_id: as_user.to_string(),
            },
        )
        .await
    }

    async fn send_message(&self, channel: &ChannelRef, message: NewMessage) -> Result<ChatMessage, ChatError> {
        let text = message.text.clone();
        self.enter(
            "send_message",
            ChatCall::SendMessage {
                cid: channel.cid(),
                message,
            },
        )
        .await?;
        let n = self.next_message.fetch_add(1, Ordering::Relaxed);
        Ok(ChatMessage {
            id: format!("msg-{}", n),
            text,
            cid: Some(channel.cid()),
        })
    }

    async fn send_event(
        &self,
        channel: &ChannelRef,
        _as_user: &str,
        event: &IndicatorEvent,
    ) -> Result<(), ChatError> {
        self.enter(
            "send_event",
            ChatCall::SendEvent {
                cid: channel.cid(),
                event: event.clone(),
            },
        )
        .await
    }

    async fn partial_update_message(
        &self,
        message_id: &str,
        _as_user: &str,
        update: MessageUpdate,
    ) -> Result<(), ChatError> {
        self.enter(
            "partial_update_message",
            ChatCall::PartialUpdate {
                message_id: message_id.to_string(),
                update,
            },
        )
        .await
    }

    fn create_token(
        &self,
        user_id: &str,
        expires_at: Option<i64>,
        issued_at: Option<i64>,
    ) -> Result<String, ChatError> {
        token::user_token("mock-secret", user_id, expires_at, issued_at)
    }

    fn events(&self) -> &EventBus {
        &self.events
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_records_calls_in_order() {
        let mock = MockChatClient::new();
        let channel = ChannelRef::new("messaging", "room-1");
        mock.send_event(&channel, "bot", &IndicatorEvent::clear("messaging:room-1", "m1"))
            .await
            .unwrap();
        mock.partial_update_message("m1", "bot", MessageUpdate::text("hello"))
            .await
            .unwrap();

        assert_eq!(mock.clear_count(), 1);
        assert_eq!(mock.updates_for("m1"), vec!["hello".to_string()]);
        assert_eq!(mock.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_injected_failure_is_not_recorded() {
        let mock = MockChatClient::new();
        mock.fail_on("upsert_user");
        let user = ChatUser {
            id: "u".into(),
            name: None,
        };
        assert!(mock.upsert_user(&user).await.is_err());
        assert!(mock.calls().is_empty());
    }
}
