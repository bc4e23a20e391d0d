//! 生命周期接口：StartAgent / StopAgent / IssueToken
//!
//! 与传输层无关；HTTP 路由只做请求解析与状态码映射。会话内部的失败都在会话边界吸收，
//! 这里只报告本次操作是否成功。

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::agent::{bot_user_id, AgentRegistry, AgentSession, CommitOutcome, SessionSettings};
use crate::chat::{ChannelRef, ChatClient, ChatUser};
use crate::config::AppConfig;
use crate::llm::AssistantBackend;
use crate::tools::ToolDispatcher;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StartAgentRequest {
    #[serde(default)]
    pub channel_id: String,
    /// 未提供时使用配置的默认频道类型（messaging）
    #[serde(default)]
    pub channel_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct StartAgentResponse {
    pub started: bool,
    pub message: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StopAgentRequest {
    #[serde(default)]
    pub channel_id: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct StopAgentResponse {
    pub success: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TokenRequest {
    #[serde(default)]
    pub user_id: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct TokenResponse {
    pub token: String,
    /// Unix 秒
    pub expires_at: i64,
}

/// 生命周期操作失败
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LifecycleError {
    #[error("Missing required field: {0}")]
    InvalidRequest(&'static str),

    #[error("Failed to start AI Agent")]
    StartFailed { reason: String },

    #[error("Failed to stop AI Agent")]
    StopFailed { reason: String },

    #[error("Failed to create token")]
    TokenFailed { reason: String },
}

impl LifecycleError {
    pub fn reason(&self) -> Option<&str> {
        match self {
            LifecycleError::InvalidRequest(_) => None,
            LifecycleError::StartFailed { reason }
            | LifecycleError::StopFailed { reason }
            | LifecycleError::TokenFailed { reason } => Some(reason),
        }
    }
}

/// 启动期间持有 pending 标记；无论成功失败都会释放
struct PendingGuard<'a> {
    registry: &'a AgentRegistry,
    bot_id: &'a str,
    armed: bool,
}

impl PendingGuard<'_> {
    /// commit 已在锁内清除 pending；之后的 pending 属于新的 StartAgent
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.registry.release_pending(self.bot_id);
        }
    }
}

pub struct AgentLifecycle {
    chat: Arc<dyn ChatClient>,
    backend: Arc<dyn AssistantBackend>,
    dispatcher: Arc<ToolDispatcher>,
    registry: Arc<AgentRegistry>,
    settings: SessionSettings,
    bot_name: String,
    default_channel_type: String,
    token_ttl_secs: i64,
}

impl AgentLifecycle {
    pub fn new(
        chat: Arc<dyn ChatClient>,
        backend: Arc<dyn AssistantBackend>,
        dispatcher: Arc<ToolDispatcher>,
        registry: Arc<AgentRegistry>,
        settings: SessionSettings,
    ) -> Self {
        Self {
            chat,
            backend,
            dispatcher,
            registry,
            settings,
            bot_name: "AI Writing Assistant".to_string(),
            default_channel_type: "messaging".to_string(),
            token_ttl_secs: 60 * 60,
        }
    }

    pub fn from_config(
        cfg: &AppConfig,
        chat: Arc<dyn ChatClient>,
        backend: Arc<dyn AssistantBackend>,
        registry: Arc<AgentRegistry>,
    ) -> Self {
        let dispatcher = Arc::new(ToolDispatcher::from_config(&cfg.tools));
        let mut lifecycle = Self::new(chat, backend, dispatcher, registry, SessionSettings::from_config(cfg));
        lifecycle.bot_name = cfg.chat.bot_name.clone();
        lifecycle.default_channel_type = cfg.chat.default_channel_type.clone();
        lifecycle.token_ttl_secs = cfg.chat.token_ttl_secs;
        lifecycle
    }

    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.registry
    }

    pub fn chat(&self) -> &Arc<dyn ChatClient> {
        &self.chat
    }

    /// 为频道启动会话；已存在或正在启动时直接返回成功
    pub async fn start_agent(&self, req: StartAgentRequest) -> Result<StartAgentResponse, LifecycleError> {
        let channel_id = req.channel_id.trim();
        if channel_id.is_empty() {
            return Err(LifecycleError::InvalidRequest("channel_id"));
        }
        let channel_type = req
            .channel_type
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| self.default_channel_type.clone());
        let channel = ChannelRef::new(channel_type, channel_id);
        let bot_id = bot_user_id(channel_id);
        tracing::info!(cid = %channel.cid(), bot_id = %bot_id, "start agent requested");

        if !self.registry.reserve(&bot_id) {
            tracing::info!(bot_id = %bot_id, "agent already exists or is pending");
            return Ok(StartAgentResponse {
                started: true,
                message: "AI Agent already running".to_string(),
            });
        }
        let mut pending = PendingGuard {
            registry: &self.registry,
            bot_id: &bot_id,
            armed: true,
        };

        let start_failed = |e: &dyn std::fmt::Display| LifecycleError::StartFailed { reason: e.to_string() };

        self.chat
            .upsert_user(&ChatUser {
                id: bot_id.clone(),
                name: Some(self.bot_name.clone()),
            })
            .await
            .map_err(|e| start_failed(&e))?;
        self.chat
            .add_members(&channel, std::slice::from_ref(&bot_id))
            .await
            .map_err(|e| start_failed(&e))?;

        let session = AgentSession::new(
            bot_id.clone(),
            channel,
            Arc::clone(&self.chat),
            Arc::clone(&self.backend),
            Arc::clone(&self.dispatcher),
            self.settings.clone(),
        );
        if let Err(e) = session.init().await {
            tracing::error!(error = %e, bot_id = %bot_id, "agent initialization failed");
            session.dispose();
            return Err(start_failed(&e));
        }

        let outcome = self.registry.commit(&bot_id, session);
        pending.disarm();
        match outcome {
            CommitOutcome::Installed | CommitOutcome::Duplicate => Ok(StartAgentResponse {
                started: true,
                message: "AI Agent started".to_string(),
            }),
            CommitOutcome::Disposed => Err(LifecycleError::StartFailed {
                reason: "session was disposed during start".to_string(),
            }),
        }
    }

    /// 停止并释放会话，随后硬删除机器人用户；不存在会话时直接成功
    pub async fn stop_agent(&self, req: StopAgentRequest) -> Result<StopAgentResponse, LifecycleError> {
        let channel_id = req.channel_id.trim();
        if channel_id.is_empty() {
            return Err(LifecycleError::InvalidRequest("channel_id"));
        }
        let bot_id = bot_user_id(channel_id);

        let Some(session) = self.registry.get(&bot_id) else {
            tracing::info!(bot_id = %bot_id, "no agent to stop");
            return Ok(StopAgentResponse { success: true });
        };

        session.stop().await;
        session.dispose();
        self.registry.remove_session(&bot_id, &session);

        self.chat
            .delete_user(&bot_id, true)
            .await
            .map_err(|e| LifecycleError::StopFailed { reason: e.to_string() })?;
        tracing::info!(bot_id = %bot_id, "agent stopped");
        Ok(StopAgentResponse { success: true })
    }

    /// 签发 1 小时（token_ttl_secs）有效的用户 token
    pub fn issue_token(&self, req: TokenRequest) -> Result<TokenResponse, LifecycleError> {
        let user_id = req.user_id.trim();
        if user_id.is_empty() {
            return Err(LifecycleError::InvalidRequest("user_id"));
        }
        let issued_at = chrono::Utc::now().timestamp();
        let expires_at = issued_at + self.token_ttl_secs;
        let token = self
            .chat
            .create_token(user_id, Some(expires_at), Some(issued_at))
            .map_err(|e| LifecycleError::TokenFailed { reason: e.to_string() })?;
        Ok(TokenResponse { token, expires_at })
    }
}
