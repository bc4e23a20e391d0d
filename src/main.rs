//! chatbee 服务入口
//!
//! 加载配置、初始化日志、构建消息服务与 AI 后端客户端，启动 HTTP 服务；
//! 收到 Ctrl+C / SIGTERM 后停止接收请求，并释放所有活跃会话。
//!
//! 环境变量（配置缺失时的回退）:
//! - STREAM_API_KEY / STREAM_API_SECRET: 消息服务凭据（必需）
//! - OPENAI_API_KEY / OPENAI_ASSISTANT_ID: Assistants 后端
//! - TAVILY_API_KEY: web_search 工具

use std::sync::Arc;

use anyhow::Context;
use chatbee::agent::AgentRegistry;
use chatbee::chat::StreamChatClient;
use chatbee::config::load_config;
use chatbee::core::shutdown::run_with_graceful_shutdown;
use chatbee::core::{RegistryCleanup, ShutdownCoordinator, ShutdownManager, ShutdownReason};
use chatbee::gateway::{create_router, AgentLifecycle};
use chatbee::llm::OpenAiAssistants;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    chatbee::observability::init();

    let config_path = std::env::args().nth(1).map(std::path::PathBuf::from);
    let cfg = load_config(config_path).context("Failed to load configuration")?;
    if cfg.llm.resolved_assistant_id().is_none() {
        tracing::warn!("no assistant id configured; runs will be rejected by the backend");
    }

    let chat = Arc::new(StreamChatClient::from_config(&cfg.chat).context("Failed to create chat client")?);
    let backend = Arc::new(OpenAiAssistants::from_config(&cfg.llm));
    let registry = Arc::new(AgentRegistry::new());
    let lifecycle = Arc::new(AgentLifecycle::from_config(&cfg, chat, backend, Arc::clone(&registry)));

    let app = create_router(lifecycle);
    let listener = tokio::net::TcpListener::bind(&cfg.app.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", cfg.app.bind_addr))?;
    tracing::info!(
        "{} listening on http://{}",
        cfg.app.name.as_deref().unwrap_or("chatbee"),
        cfg.app.bind_addr
    );

    let shutdown = Arc::new(ShutdownManager::new());
    let mut coordinator = ShutdownCoordinator::new(cfg.app.shutdown_timeout());
    coordinator.register(RegistryCleanup::new(registry));

    let server_shutdown = Arc::clone(&shutdown);
    let server = async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "HTTP server failed");
            server_shutdown.shutdown(ShutdownReason::FatalError(e.to_string()));
        }
    };

    run_with_graceful_shutdown(shutdown, server, || async move { coordinator.run_cleanup().await }).await;

    Ok(())
}
