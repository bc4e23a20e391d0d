//! AgentSession：一个频道对应一个会话
//!
//! 持有后端线程与频道绑定，驱动 run → StreamRelay →（工具调用 → 重新提交）的循环，
//! 负责取消与释放。阶段转换见 [`AgentPhase`]；释放（dispose）幂等，且保证只解除一次事件订阅。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use parking_lot::Mutex;

use crate::agent::relay::{RelaySignal, StreamRelay};
use crate::chat::{
    AiState, ChannelRef, ChatClient, ChatEvent, IndicatorEvent, NewMessage, Subscription, EVENT_AI_STOP,
    EVENT_MESSAGE_NEW,
};
use crate::config::AppConfig;
use crate::core::{AgentError, AgentPhase, SessionSupervisor};
use crate::llm::{AssistantBackend, RunEvent, RunStream};
use crate::tools::ToolDispatcher;

/// 释放时调用的回调（注册表用它删除自己的条目）
pub type DisposeHook = Box<dyn FnOnce(&AgentSession) + Send>;

/// 会话运行参数
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub assistant_id: String,
    /// 部分更新的最小间隔
    pub flush_interval: Duration,
    /// 等待下一条流事件的最长时间
    pub idle_timeout: Option<Duration>,
    pub restart_after_completion: bool,
}

impl SessionSettings {
    pub fn new(assistant_id: impl Into<String>) -> Self {
        Self {
            assistant_id: assistant_id.into(),
            flush_interval: Duration::from_millis(1000),
            idle_timeout: None,
            restart_after_completion: false,
        }
    }

    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            assistant_id: cfg.llm.resolved_assistant_id().unwrap_or_default(),
            flush_interval: cfg.agent.flush_interval(),
            idle_timeout: cfg.agent.idle_timeout(),
            restart_after_completion: cfg.agent.restart_after_completion,
        }
    }
}

#[derive(Debug, Clone)]
struct ActiveRun {
    /// 占位消息 id（流式文本写入这里）
    message_id: String,
    run_id: Option<String>,
}

enum RunOutcome {
    Completed,
    Cancelled,
}

pub struct AgentSession {
    /// 会话实例 id，用于区分同一 bot id 先后的会话
    id: String,
    bot_id: String,
    channel: ChannelRef,
    chat: Arc<dyn ChatClient>,
    backend: Arc<dyn AssistantBackend>,
    dispatcher: Arc<ToolDispatcher>,
    settings: SessionSettings,
    supervisor: Arc<SessionSupervisor>,
    thread_id: Mutex<Option<String>>,
    active: Mutex<Option<ActiveRun>>,
    stopping: AtomicBool,
    subscription: Mutex<Option<Subscription>>,
    on_dispose: Mutex<Option<DisposeHook>>,
}

impl AgentSession {
    pub fn new(
        bot_id: impl Into<String>,
        channel: ChannelRef,
        chat: Arc<dyn ChatClient>,
        backend: Arc<dyn AssistantBackend>,
        dispatcher: Arc<ToolDispatcher>,
        settings: SessionSettings,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: format!("session_{}", uuid::Uuid::new_v4()),
            bot_id: bot_id.into(),
            channel,
            chat,
            backend,
            dispatcher,
            settings,
            supervisor: Arc::new(SessionSupervisor::new()),
            thread_id: Mutex::new(None),
            active: Mutex::new(None),
            stopping: AtomicBool::new(false),
            subscription: Mutex::new(None),
            on_dispose: Mutex::new(None),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn bot_id(&self) -> &str {
        &self.bot_id
    }

    pub fn phase(&self) -> AgentPhase {
        self.supervisor.phase()
    }

    pub fn is_disposed(&self) -> bool {
        self.supervisor.is_disposed()
    }

    pub fn thread_id(&self) -> Option<String> {
        self.thread_id.lock().clone()
    }

    pub fn active_message_id(&self) -> Option<String> {
        self.active.lock().as_ref().map(|a| a.message_id.clone())
    }

    pub fn active_run_id(&self) -> Option<String> {
        self.active.lock().as_ref().and_then(|a| a.run_id.clone())
    }

    /// 注册释放回调；会话已释放时不保存并返回 false
    pub fn set_on_dispose(&self, hook: DisposeHook) -> bool {
        let mut slot = self.on_dispose.lock();
        if self.is_disposed() {
            return false;
        }
        *slot = Some(hook);
        true
    }

    /// 绑定频道并创建后端线程，成功后订阅频道入站事件
    pub async fn init(self: &Arc<Self>) -> Result<(), AgentError> {
        if !self.supervisor.transition(AgentPhase::Initializing) {
            return Err(AgentError::Initialization(format!(
                "cannot initialize session in phase {}",
                self.phase()
            )));
        }

        let thread_id = match self.bind().await {
            Ok(thread_id) => thread_id,
            Err(e) => {
                self.supervisor.transition(AgentPhase::Failed);
                return Err(e);
            }
        };
        *self.thread_id.lock() = Some(thread_id.clone());
        self.start_listener();

        if !self.supervisor.transition(AgentPhase::Ready) {
            return Err(AgentError::Initialization(
                "session disposed during initialization".to_string(),
            ));
        }
        tracing::info!(session_id = %self.id, bot_id = %self.bot_id, thread_id = %thread_id, "agent session ready");
        Ok(())
    }

    async fn bind(&self) -> Result<String, AgentError> {
        self.chat
            .watch_channel(&self.channel, &self.bot_id)
            .await
            .map_err(|e| AgentError::Initialization(e.to_string()))?;
        self.backend
            .create_thread()
            .await
            .map_err(|e| AgentError::Initialization(e.to_string()))
    }

    fn start_listener(self: &Arc<Self>) {
        let (subscription, mut rx) = self.chat.events().subscribe(Some(self.channel.cid()));
        *self.subscription.lock() = Some(subscription);

        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let Some(session) = weak.upgrade() else { break };
                if session.is_disposed() {
                    break;
                }
                session.handle_event(event).await;
            }
        });
    }

    async fn handle_event(self: &Arc<Self>, event: ChatEvent) {
        match event.kind.as_str() {
            EVENT_AI_STOP => {
                let active = self.active_message_id();
                if event.message_id.is_some() && event.message_id == active {
                    self.stop().await;
                }
            }
            EVENT_MESSAGE_NEW => {
                if let Err(e) = self.handle_user_message(&event).await {
                    tracing::warn!(error = %e, bot_id = %self.bot_id, "failed to handle user message");
                }
            }
            other => tracing::trace!(event = %other, "ignoring channel event"),
        }
    }

    /// 用户发言：写入线程、发送空占位消息、THINKING 指示器，然后在后台开始 run
    ///
    /// 返回是否开始了新的 run。机器人自己或 AI 生成的消息、以及 run 进行中到达的消息都被忽略。
    pub async fn handle_user_message(self: &Arc<Self>, event: &ChatEvent) -> Result<bool, AgentError> {
        let Some(message) = event.message.as_ref() else {
            return Ok(false);
        };
        let sender = event.sender_id().unwrap_or_default();
        if sender.is_empty() || sender == self.bot_id || message.ai_generated == Some(true) {
            return Ok(false);
        }
        if message.text.trim().is_empty() {
            return Ok(false);
        }
        if self.phase() != AgentPhase::Ready || self.active.lock().is_some() {
            tracing::info!(bot_id = %self.bot_id, message_id = %message.id, "run already active, ignoring message");
            return Ok(false);
        }

        let thread_id = self.require_thread()?;
        self.backend.add_message(&thread_id, &message.text).await?;

        let placeholder = self
            .chat
            .send_message(
                &self.channel,
                NewMessage {
                    text: String::new(),
                    user_id: self.bot_id.clone(),
                    ai_generated: true,
                },
            )
            .await?;
        let thinking = IndicatorEvent::update(AiState::Thinking, &self.channel.cid(), &placeholder.id);
        self.chat.send_event(&self.channel, &self.bot_id, &thinking).await?;

        if !self.begin_run(&placeholder.id) {
            // 占位消息发出后会话已被 stop / 释放或已有其他 run
            tracing::info!(bot_id = %self.bot_id, message_id = %placeholder.id, "session no longer ready, clearing indicator");
            if !self.is_disposed() {
                let clear = IndicatorEvent::clear(&self.channel.cid(), &placeholder.id);
                self.chat.send_event(&self.channel, &self.bot_id, &clear).await?;
            }
            return Ok(false);
        }
        let session = Arc::clone(self);
        tokio::spawn(async move {
            session.execute_run(placeholder.id).await;
        });
        Ok(true)
    }

    /// Ready → Running，驱动 run 直到终态；返回本次 run 的结果阶段
    ///
    /// 所有错误都在这里吸收：失败时发送 ERROR 指示器并把错误写进占位消息。
    /// 结束后会话被释放，除非开启了 restart_after_completion 且 run 正常完成。
    pub async fn run(self: &Arc<Self>, message_id: impl Into<String>) -> AgentPhase {
        let message_id = message_id.into();
        if !self.begin_run(&message_id) {
            tracing::warn!(bot_id = %self.bot_id, phase = %self.phase(), "run requested while session is not ready");
            return self.phase();
        }
        self.execute_run(message_id).await
    }

    fn begin_run(&self, message_id: &str) -> bool {
        let mut active = self.active.lock();
        if active.is_some() || !self.supervisor.transition(AgentPhase::Running) {
            return false;
        }
        *active = Some(ActiveRun {
            message_id: message_id.to_string(),
            run_id: None,
        });
        true
    }

    async fn execute_run(self: &Arc<Self>, message_id: String) -> AgentPhase {
        let mut guard = RunGuard {
            session: Arc::clone(self),
            keep: false,
        };
        let mut relay = StreamRelay::new(
            Arc::clone(&self.chat),
            self.channel.clone(),
            self.bot_id.clone(),
            message_id,
            self.settings.flush_interval,
            Arc::clone(&self.supervisor),
        );

        let phase = match self.drive(&mut relay).await {
            Ok(RunOutcome::Completed) => {
                self.supervisor.transition(AgentPhase::Completed);
                tracing::info!(bot_id = %self.bot_id, run_id = ?relay.run_id(), "run completed");
                if self.settings.restart_after_completion {
                    self.active.lock().take();
                    guard.keep = self.supervisor.transition(AgentPhase::Ready);
                }
                AgentPhase::Completed
            }
            Ok(RunOutcome::Cancelled) => {
                self.supervisor.transition(AgentPhase::Cancelled);
                tracing::info!(bot_id = %self.bot_id, run_id = ?relay.run_id(), "run cancelled");
                AgentPhase::Cancelled
            }
            Err(e) => {
                tracing::error!(error = %e, bot_id = %self.bot_id, run_id = ?relay.run_id(), "agent run failed");
                self.supervisor.transition(AgentPhase::Failed);
                relay.fail(&e.to_string()).await;
                AgentPhase::Failed
            }
        };
        drop(guard);
        phase
    }

    /// run 循环：打开流 → 逐个事件交给 relay → 遇到工具调用时解决并重新提交，直到终态
    async fn drive(&self, relay: &mut StreamRelay) -> Result<RunOutcome, AgentError> {
        let thread_id = self.require_thread()?;
        let token = self.supervisor.cancel_token();

        let mut stream = tokio::select! {
            _ = token.cancelled() => return Ok(RunOutcome::Cancelled),
            opened = self.backend.create_run(&thread_id, &self.settings.assistant_id) => opened?,
        };

        loop {
            let next = tokio::select! {
                _ = token.cancelled() => return Ok(RunOutcome::Cancelled),
                next = self.next_event(&mut stream) => next?,
            };
            let Some(event) = next else {
                return Err(AgentError::StreamFault(
                    "stream ended before a terminal event".to_string(),
                ));
            };
            if self.is_disposed() {
                return Ok(RunOutcome::Cancelled);
            }

            let signal = relay.handle(event).await?;
            if let Some(run_id) = relay.run_id() {
                self.set_run_id(run_id);
            }

            match signal {
                RelaySignal::Continue => {}
                RelaySignal::Completed => return Ok(RunOutcome::Completed),
                RelaySignal::Cancelled => return Ok(RunOutcome::Cancelled),
                RelaySignal::AwaitTools { run_id, calls } => {
                    self.supervisor.transition(AgentPhase::AwaitingTool);
                    let outputs = tokio::select! {
                        _ = token.cancelled() => return Ok(RunOutcome::Cancelled),
                        outputs = self.dispatcher.resolve_outputs(calls) => outputs,
                    };
                    if self.is_disposed() || token.is_cancelled() {
                        return Ok(RunOutcome::Cancelled);
                    }
                    self.supervisor.transition(AgentPhase::Running);
                    stream = tokio::select! {
                        _ = token.cancelled() => return Ok(RunOutcome::Cancelled),
                        resumed = self.backend.submit_tool_outputs(&thread_id, &run_id, &outputs) => resumed?,
                    };
                }
            }
        }
    }

    async fn next_event(&self, stream: &mut RunStream) -> Result<Option<RunEvent>, AgentError> {
        let next = match self.settings.idle_timeout {
            Some(limit) => tokio::time::timeout(limit, stream.next())
                .await
                .map_err(|_| AgentError::StreamFault(format!("no stream event within {:?}", limit)))?,
            None => stream.next().await,
        };
        next.transpose().map_err(AgentError::from)
    }

    fn require_thread(&self) -> Result<String, AgentError> {
        self.thread_id()
            .ok_or_else(|| AgentError::Initialization("session has no thread".to_string()))
    }

    fn set_run_id(&self, run_id: &str) {
        if let Some(active) = self.active.lock().as_mut() {
            active.run_id = Some(run_id.to_string());
        }
    }

    /// 停止进行中的 run：取消后端 run（尽力而为）、清除指示器、释放会话
    ///
    /// 没有进行中的 run、已释放或已在停止中时为空操作，返回 false。
    pub async fn stop(&self) -> bool {
        if self.is_disposed() {
            return false;
        }
        // stopping 与 active 在同一把锁下读写：RunGuard 要么先清空 active（本次 stop 为空操作），
        // 要么看到 stopping 并把释放留给 stop
        let active = {
            let slot = self.active.lock();
            let Some(active) = slot.clone() else {
                tracing::debug!(bot_id = %self.bot_id, "stop requested without an active run");
                return false;
            };
            if self.stopping.swap(true, Ordering::SeqCst) {
                return false;
            }
            active
        };

        tracing::info!(bot_id = %self.bot_id, message_id = %active.message_id, "stopping agent run");
        self.supervisor.cancel();

        let thread_id = self.thread_id();
        if let (Some(thread_id), Some(run_id)) = (thread_id, active.run_id.as_deref()) {
            if let Err(e) = self.backend.cancel_run(&thread_id, run_id).await {
                let fault = AgentError::Cancellation(e.to_string());
                tracing::warn!(error = %fault, run_id = %run_id, "failed to cancel run");
            }
        }

        // 期间被外部释放（StopAgent / 关闭）时不再写频道
        if !self.is_disposed() {
            let clear = IndicatorEvent::clear(&self.channel.cid(), &active.message_id);
            if let Err(e) = self.chat.send_event(&self.channel, &self.bot_id, &clear).await {
                tracing::warn!(error = %e, bot_id = %self.bot_id, "failed to clear indicator");
            }
        }

        self.dispose();
        true
    }

    /// 释放会话：解除订阅并调用释放回调，只在第一次调用时生效
    pub fn dispose(&self) -> bool {
        if !self.supervisor.mark_disposed() {
            return false;
        }
        let subscription = self.subscription.lock().take();
        if let Some(subscription) = subscription {
            subscription.unsubscribe();
        }
        let hook = self.on_dispose.lock().take();
        if let Some(hook) = hook {
            hook(self);
        }
        tracing::info!(session_id = %self.id, bot_id = %self.bot_id, "agent session disposed");
        true
    }
}

/// run 的作用域清理：清空进行中的 run，除非保留会话否则释放
///
/// stop 进行中时由 stop 负责释放（取消 → 清除指示器 → 释放）。
struct RunGuard {
    session: Arc<AgentSession>,
    keep: bool,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        let stopping = {
            let mut active = self.session.active.lock();
            active.take();
            self.session.stopping.load(Ordering::SeqCst)
        };
        if !self.keep && !stopping {
            self.session.dispose();
        }
    }
}
