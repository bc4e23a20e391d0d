//! 频道事件：出站 AI 指示器与入站事件总线
//!
//! 出站：`ai_indicator.update` / `ai_indicator.clear`，由会话发送到频道。
//! 入站：消息服务通过 Webhook 推送的事件（`ai_indicator.stop`、`message.new` 等）
//! 发布到 EventBus，会话持有 Subscription 订阅自己频道的事件，释放时取消订阅。

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

pub const EVENT_AI_STOP: &str = "ai_indicator.stop";
pub const EVENT_MESSAGE_NEW: &str = "message.new";

/// 指示器状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AiState {
    #[serde(rename = "AI_STATE_THINKING")]
    Thinking,
    #[serde(rename = "AI_STATE_GENERATING")]
    Generating,
    #[serde(rename = "AI_STATE_EXTERNAL_SOURCES")]
    ExternalSources,
    #[serde(rename = "AI_STATE_ERROR")]
    Error,
}

/// 出站指示器事件
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum IndicatorEvent {
    #[serde(rename = "ai_indicator.update")]
    Update {
        ai_state: AiState,
        cid: String,
        message_id: String,
    },
    #[serde(rename = "ai_indicator.clear")]
    Clear { cid: String, message_id: String },
}

impl IndicatorEvent {
    pub fn update(ai_state: AiState, cid: &str, message_id: &str) -> Self {
        IndicatorEvent::Update {
            ai_state,
            cid: cid.to_string(),
            message_id: message_id.to_string(),
        }
    }

    pub fn clear(cid: &str, message_id: &str) -> Self {
        IndicatorEvent::Clear {
            cid: cid.to_string(),
            message_id: message_id.to_string(),
        }
    }

    pub fn is_clear(&self) -> bool {
        matches!(self, IndicatorEvent::Clear { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventUser {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundMessage {
    pub id: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub user: Option<EventUser>,
    #[serde(default)]
    pub ai_generated: Option<bool>,
}

/// 入站事件（字段按需取用，其余忽略）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatEvent {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub cid: Option<String>,
    #[serde(default)]
    pub message_id: Option<String>,
    #[serde(default)]
    pub message: Option<InboundMessage>,
    #[serde(default)]
    pub user: Option<EventUser>,
}

impl ChatEvent {
    pub fn stop(cid: &str, message_id: &str) -> Self {
        Self {
            kind: EVENT_AI_STOP.to_string(),
            cid: Some(cid.to_string()),
            message_id: Some(message_id.to_string()),
            message: None,
            user: None,
        }
    }

    pub fn new_message(cid: &str, message_id: &str, user_id: &str, text: &str) -> Self {
        let user = EventUser {
            id: user_id.to_string(),
        };
        Self {
            kind: EVENT_MESSAGE_NEW.to_string(),
            cid: Some(cid.to_string()),
            message_id: Some(message_id.to_string()),
            message: Some(InboundMessage {
                id: message_id.to_string(),
                text: text.to_string(),
                user: Some(user.clone()),
                ai_generated: None,
            }),
            user: Some(user),
        }
    }

    /// 事件发送者（优先取消息作者）
    pub fn sender_id(&self) -> Option<&str> {
        self.message
            .as_ref()
            .and_then(|m| m.user.as_ref())
            .or(self.user.as_ref())
            .map(|u| u.id.as_str())
    }
}

struct Subscriber {
    cid: Option<String>,
    tx: mpsc::UnboundedSender<ChatEvent>,
}

#[derive(Default)]
struct BusInner {
    next_id: AtomicU64,
    subscribers: Mutex<HashMap<u64, Subscriber>>,
}

/// 进程内入站事件总线
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// 订阅事件；`cid` 为 None 时接收全部事件。返回订阅句柄与接收端
    pub fn subscribe(&self, cid: Option<String>) -> (Subscription, mpsc::UnboundedReceiver<ChatEvent>) {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.subscribers.lock().insert(id, Subscriber { cid, tx });
        let subscription = Subscription {
            id,
            bus: Arc::downgrade(&self.inner),
            attached: true,
        };
        (subscription, rx)
    }

    /// 发布事件给匹配的订阅者；没有 cid 的事件投递给所有订阅者。返回投递数
    pub fn publish(&self, event: ChatEvent) -> usize {
        let subscribers = self.inner.subscribers.lock();
        let mut delivered = 0;
        for sub in subscribers.values() {
            let matches = match (&sub.cid, &event.cid) {
                (Some(filter), Some(cid)) => filter == cid,
                _ => true,
            };
            if matches && sub.tx.send(event.clone()).is_ok() {
                delivered += 1;
            }
        }
        delivered
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.lock().len()
    }
}

/// 订阅句柄；`unsubscribe` 消费句柄并只摘除一次，未显式摘除时在 Drop 中摘除
pub struct Subscription {
    id: u64,
    bus: Weak<BusInner>,
    attached: bool,
}

impl Subscription {
    /// 取消订阅；返回本次是否真正摘除了订阅者
    pub fn unsubscribe(mut self) -> bool {
        self.detach()
    }

    fn detach(&mut self) -> bool {
        if !self.attached {
            return false;
        }
        self.attached = false;
        match self.bus.upgrade() {
            Some(inner) => inner.subscribers.lock().remove(&self.id).is_some(),
            None => false,
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.detach();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("attached", &self.attached)
            .finish()
    }
}
