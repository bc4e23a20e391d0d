//! StreamRelay：把单个 run 的事件流转成频道里的可见副作用
//!
//! - message-delta 累积文本，按 flush_interval 节流写入占位消息（第一个 delta 立即写入并开启窗口）
//! - message-completed 写入权威文本并清除指示器
//! - run-step-created（message_creation）发送 GENERATING 指示器
//! - requires-action 发送 EXTERNAL_SOURCES 指示器，并把整批工具调用交还给会话
//!
//! 会话一旦停止或释放，所有写入都变为空操作。

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::chat::{AiState, ChannelRef, ChatClient, IndicatorEvent, MessageUpdate};
use crate::core::{AgentError, SessionSupervisor};
use crate::llm::{MessageContent, RunEvent, ToolCall, STEP_MESSAGE_CREATION};

/// 处理单个事件后给 run 循环的信号
#[derive(Debug, Clone, PartialEq)]
pub enum RelaySignal {
    Continue,
    /// 暂停读流，解决工具调用后用 run_id 提交输出
    AwaitTools { run_id: String, calls: Vec<ToolCall> },
    Completed,
    Cancelled,
}

/// 单个 run 的累积状态
#[derive(Debug, Default)]
pub struct RunState {
    pub run_id: Option<String>,
    /// 所有 delta 按到达顺序拼接的文本
    pub text: String,
    last_flush: Option<Instant>,
}

pub struct StreamRelay {
    chat: Arc<dyn ChatClient>,
    channel: ChannelRef,
    cid: String,
    bot_id: String,
    message_id: String,
    flush_interval: Duration,
    supervisor: Arc<SessionSupervisor>,
    state: RunState,
}

impl StreamRelay {
    pub fn new(
        chat: Arc<dyn ChatClient>,
        channel: ChannelRef,
        bot_id: impl Into<String>,
        message_id: impl Into<String>,
        flush_interval: Duration,
        supervisor: Arc<SessionSupervisor>,
    ) -> Self {
        let cid = channel.cid();
        Self {
            chat,
            channel,
            cid,
            bot_id: bot_id.into(),
            message_id: message_id.into(),
            flush_interval,
            supervisor,
            state: RunState::default(),
        }
    }

    pub fn state(&self) -> &RunState {
        &self.state
    }

    pub fn run_id(&self) -> Option<&str> {
        self.state.run_id.as_deref()
    }

    /// 按到达顺序处理一个事件
    pub async fn handle(&mut self, event: RunEvent) -> Result<RelaySignal, AgentError> {
        match event {
            RunEvent::RunCreated { run_id } => {
                tracing::debug!(run_id = %run_id, cid = %self.cid, "run created");
                self.state.run_id = Some(run_id);
            }
            RunEvent::MessageDelta { text } => {
                self.state.text.push_str(&text);
                let now = Instant::now();
                let due = match self.state.last_flush {
                    None => true,
                    Some(last) => now.duration_since(last) >= self.flush_interval,
                };
                if due {
                    self.state.last_flush = Some(now);
                    let text = self.state.text.clone();
                    self.write_text(text).await?;
                }
            }
            RunEvent::MessageCompleted { content } => {
                let text = match content {
                    MessageContent::Text(text) => text,
                    MessageContent::NonText(kind) => {
                        tracing::debug!(content_type = %kind, "non-text completion, keeping accumulated text");
                        self.state.text.clone()
                    }
                };
                self.write_text(text).await?;
                self.send_indicator(IndicatorEvent::clear(&self.cid, &self.message_id))
                    .await?;
            }
            RunEvent::RunStepCreated { step_type } => {
                if step_type == STEP_MESSAGE_CREATION {
                    self.send_indicator(IndicatorEvent::update(
                        AiState::Generating,
                        &self.cid,
                        &self.message_id,
                    ))
                    .await?;
                }
            }
            RunEvent::RequiresAction { run_id, tool_calls } => {
                tracing::info!(run_id = %run_id, calls = tool_calls.len(), "run requires tool outputs");
                self.state.run_id = Some(run_id.clone());
                self.send_indicator(IndicatorEvent::update(
                    AiState::ExternalSources,
                    &self.cid,
                    &self.message_id,
                ))
                .await?;
                return Ok(RelaySignal::AwaitTools {
                    run_id,
                    calls: tool_calls,
                });
            }
            RunEvent::RunCompleted => return Ok(RelaySignal::Completed),
            RunEvent::RunFailed { message } => {
                return Err(AgentError::Run(
                    message.unwrap_or_else(|| "Run failed".to_string()),
                ));
            }
            RunEvent::RunCancelled => return Ok(RelaySignal::Cancelled),
            RunEvent::RunExpired => return Err(AgentError::Run("Run expired".to_string())),
            RunEvent::Other { event } => {
                tracing::trace!(event = %event, "ignoring run event");
            }
        }
        Ok(RelaySignal::Continue)
    }

    /// 失败路径：ERROR 指示器 + 把错误文本写进占位消息；写入失败只记日志
    pub async fn fail(&self, message: &str) {
        let indicator = IndicatorEvent::update(AiState::Error, &self.cid, &self.message_id);
        if let Err(e) = self.send_indicator(indicator).await {
            tracing::warn!(error = %e, cid = %self.cid, "failed to send error indicator");
        }
        if let Err(e) = self.write_text(format!("Error: {}", message)).await {
            tracing::warn!(error = %e, cid = %self.cid, "failed to write error text");
        }
    }

    /// stop 已开始或会话已释放
    fn halted(&self) -> bool {
        self.supervisor.is_disposed() || self.supervisor.cancel_token().is_cancelled()
    }

    async fn write_text(&self, text: String) -> Result<(), AgentError> {
        if self.halted() {
            return Ok(());
        }
        self.chat
            .partial_update_message(&self.message_id, &self.bot_id, MessageUpdate::text(text))
            .await?;
        Ok(())
    }

    async fn send_indicator(&self, event: IndicatorEvent) -> Result<(), AgentError> {
        if self.halted() {
            return Ok(());
        }
        self.chat.send_event(&self.channel, &self.bot_id, &event).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::MockChatClient;

    fn relay(chat: &Arc<MockChatClient>, supervisor: &Arc<SessionSupervisor>) -> StreamRelay {
        StreamRelay::new(
            chat.clone(),
            ChannelRef::new("messaging", "room-1"),
            "ai-bot-room-1",
            "msg-0",
            Duration::from_millis(1000),
            supervisor.clone(),
        )
    }

    fn delta(text: &str) -> RunEvent {
        RunEvent::MessageDelta {
            text: text.to_string(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_deltas_are_coalesced_per_window() {
        let chat = Arc::new(MockChatClient::new());
        let supervisor = Arc::new(SessionSupervisor::new());
        let mut relay = relay(&chat, &supervisor);

        let mut expected = String::new();
        for i in 0..=20 {
            if i > 0 {
                tokio::time::advance(Duration::from_millis(100)).await;
            }
            let fragment = format!("w{} ", i);
            expected.push_str(&fragment);
            assert_eq!(relay.handle(delta(&fragment)).await.unwrap(), RelaySignal::Continue);
        }

        let writes = chat.updates_for("msg-0");
        assert!(writes.len() <= 3, "got {} writes", writes.len());
        assert_eq!(relay.state().text, expected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_completed_text_overrides_partial_flush() {
        let chat = Arc::new(MockChatClient::new());
        let supervisor = Arc::new(SessionSupervisor::new());
        let mut relay = relay(&chat, &supervisor);

        relay.handle(delta("Hel")).await.unwrap();
        relay.handle(delta("lo wor")).await.unwrap();
        relay
            .handle(RunEvent::MessageCompleted {
                content: MessageContent::Text("Hello world".into()),
            })
            .await
            .unwrap();

        let writes = chat.updates_for("msg-0");
        assert_eq!(writes.first().map(String::as_str), Some("Hel"));
        assert_eq!(writes.last().map(String::as_str), Some("Hello world"));
        assert_eq!(chat.clear_count(), 1);
    }

    #[tokio::test]
    async fn test_non_text_completion_falls_back_to_accumulated() {
        let chat = Arc::new(MockChatClient::new());
        let supervisor = Arc::new(SessionSupervisor::new());
        let mut relay = relay(&chat, &supervisor);

        relay.handle(delta("partial answer")).await.unwrap();
        relay
            .handle(RunEvent::MessageCompleted {
                content: MessageContent::NonText("image_file".into()),
            })
            .await
            .unwrap();
        assert_eq!(
            chat.updates_for("msg-0").last().map(String::as_str),
            Some("partial answer")
        );
    }

    #[tokio::test]
    async fn test_requires_action_emits_external_sources() {
        let chat = Arc::new(MockChatClient::new());
        let supervisor = Arc::new(SessionSupervisor::new());
        let mut relay = relay(&chat, &supervisor);

        let calls = vec![ToolCall {
            id: "call_1".into(),
            name: "web_search".into(),
            arguments: r#"{"query":"rust"}"#.into(),
        }];
        let signal = relay
            .handle(RunEvent::RequiresAction {
                run_id: "run_1".into(),
                tool_calls: calls.clone(),
            })
            .await
            .unwrap();
        assert_eq!(
            signal,
            RelaySignal::AwaitTools {
                run_id: "run_1".into(),
                calls
            }
        );
        assert_eq!(relay.run_id(), Some("run_1"));
        assert_eq!(
            chat.indicator_events(),
            vec![IndicatorEvent::update(
                AiState::ExternalSources,
                "messaging:room-1",
                "msg-0"
            )]
        );
    }

    #[tokio::test]
    async fn test_message_creation_step_emits_generating() {
        let chat = Arc::new(MockChatClient::new());
        let supervisor = Arc::new(SessionSupervisor::new());
        let mut relay = relay(&chat, &supervisor);

        relay
            .handle(RunEvent::RunStepCreated {
                step_type: "tool_calls".into(),
            })
            .await
            .unwrap();
        relay
            .handle(RunEvent::RunStepCreated {
                step_type: STEP_MESSAGE_CREATION.into(),
            })
            .await
            .unwrap();
        assert_eq!(chat.indicator_events().len(), 1);
    }

    #[tokio::test]
    async fn test_run_failed_is_run_error() {
        let chat = Arc::new(MockChatClient::new());
        let supervisor = Arc::new(SessionSupervisor::new());
        let mut relay = relay(&chat, &supervisor);

        let err = relay
            .handle(RunEvent::RunFailed {
                message: Some("rate limited".into()),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Run(ref m) if m == "rate limited"));

        relay.fail(&err.to_string()).await;
        assert_eq!(
            chat.updates_for("msg-0"),
            vec!["Error: rate limited".to_string()]
        );
    }

    #[tokio::test]
    async fn test_cancelled_and_expired_runs() {
        let chat = Arc::new(MockChatClient::new());
        let supervisor = Arc::new(SessionSupervisor::new());
        let mut relay = relay(&chat, &supervisor);

        assert_eq!(relay.handle(RunEvent::RunCancelled).await.unwrap(), RelaySignal::Cancelled);
        let err = relay.handle(RunEvent::RunExpired).await.unwrap_err();
        assert!(matches!(err, AgentError::Run(ref m) if m == "Run expired"));
        assert!(chat.calls().is_empty());
    }

    #[tokio::test]
    async fn test_no_writes_after_dispose() {
        let chat = Arc::new(MockChatClient::new());
        let supervisor = Arc::new(SessionSupervisor::new());
        let mut relay = relay(&chat, &supervisor);

        supervisor.mark_disposed();
        relay.handle(delta("late")).await.unwrap();
        relay
            .handle(RunEvent::MessageCompleted {
                content: MessageContent::Text("late".into()),
            })
            .await
            .unwrap();
        assert!(chat.calls().is_empty());
        assert_eq!(relay.state().text, "late");
    }
}
