//! 优雅关闭处理
//!
//! 提供统一的关闭信号监听和清理逻辑，确保：
//! - 所有活跃 Agent 会话在退出前被释放（取消订阅、清除指示器）
//! - 日志 flush
//! - 正在进行的 run 有机会被取消

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::agent::AgentRegistry;

/// 关闭信号管理器
pub struct ShutdownManager {
    shutdown_token: CancellationToken,
    /// 第一次触发关闭的原因
    reason: Mutex<Option<ShutdownReason>>,
}

/// 关闭原因
#[derive(Debug, Clone, PartialEq)]
pub enum ShutdownReason {
    /// Ctrl+C
    UserInitiated,
    /// SIGTERM 信号
    Signal,
    /// 致命错误
    FatalError(String),
}

impl ShutdownManager {
    pub fn new() -> Self {
        Self {
            shutdown_token: CancellationToken::new(),
            reason: Mutex::new(None),
        }
    }

    pub fn shutdown(&self, reason: ShutdownReason) {
        {
            let mut slot = self.reason.lock();
            if slot.is_none() {
                *slot = Some(reason);
            }
        }
        self.shutdown_token.cancel();
    }

    pub fn reason(&self) -> Option<ShutdownReason> {
        self.reason.lock().clone()
    }

    pub async fn wait_for_shutdown(&self) {
        self.shutdown_token.cancelled().await;
    }

    /// 安装系统信号处理器 (Ctrl+C, SIGTERM)
    pub fn install_signal_handlers(self: &Arc<Self>) {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            if let Ok(()) = tokio::signal::ctrl_c().await {
                tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
                manager.shutdown(ShutdownReason::UserInitiated);
            }
        });

        #[cfg(unix)]
        {
            let manager = Arc::clone(self);
            tokio::spawn(async move {
                use tokio::signal::unix::{signal, SignalKind};
                if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                    sigterm.recv().await;
                    tracing::info!("Received SIGTERM, initiating graceful shutdown...");
                    manager.shutdown(ShutdownReason::Signal);
                }
            });
        }
    }
}

impl Default for ShutdownManager {
    fn default() -> Self {
        Self::new()
    }
}

/// 关闭时需要执行的清理任务
#[async_trait::async_trait]
pub trait ShutdownCleanup: Send + Sync {
    async fn cleanup(&self) -> anyhow::Result<()>;

    /// 清理任务名称（用于日志）
    fn name(&self) -> &'static str;
}

/// 关闭协调器：管理多个清理任务
pub struct ShutdownCoordinator {
    cleanup_tasks: Vec<Arc<dyn ShutdownCleanup>>,
    /// 等待单个清理任务完成的超时时间
    timeout: Duration,
}

impl ShutdownCoordinator {
    pub fn new(timeout: Duration) -> Self {
        Self {
            cleanup_tasks: Vec::new(),
            timeout,
        }
    }

    pub fn register<T: ShutdownCleanup + 'static>(&mut self, task: T) {
        self.cleanup_tasks.push(Arc::new(task));
    }

    /// 依次执行所有清理任务，单个失败或超时不影响后续任务
    pub async fn run_cleanup(&self) {
        tracing::info!("Running {} cleanup tasks...", self.cleanup_tasks.len());

        for task in &self.cleanup_tasks {
            let name = task.name();
            match tokio::time::timeout(self.timeout, task.cleanup()).await {
                Ok(Ok(())) => {
                    tracing::info!("Cleanup task '{}' completed successfully", name);
                }
                Ok(Err(e)) => {
                    tracing::warn!("Cleanup task '{}' failed: {}", name, e);
                }
                Err(_) => {
                    tracing::warn!("Cleanup task '{}' timed out after {:?}", name, self.timeout);
                }
            }
        }

        tracing::info!("All cleanup tasks finished");
    }
}

/// 注册表清理任务：释放所有活跃会话
pub struct RegistryCleanup {
    registry: Arc<AgentRegistry>,
}

impl RegistryCleanup {
    pub fn new(registry: Arc<AgentRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait::async_trait]
impl ShutdownCleanup for RegistryCleanup {
    async fn cleanup(&self) -> anyhow::Result<()> {
        let disposed = self.registry.shutdown();
        tracing::info!("Disposed {} active agent sessions", disposed);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "AgentRegistry"
    }
}

/// 运行主应用直到收到关闭信号，然后执行清理
pub async fn run_with_graceful_shutdown<F, Fut>(
    shutdown_manager: Arc<ShutdownManager>,
    app: F,
    cleanup: impl FnOnce() -> Fut,
) where
    F: Future<Output = ()>,
    Fut: Future<Output = ()>,
{
    shutdown_manager.install_signal_handlers();

    tokio::select! {
        _ = app => {
            tracing::info!("Application finished normally");
        }
        _ = shutdown_manager.wait_for_shutdown() => {
            tracing::info!(reason = ?shutdown_manager.reason(), "Shutdown signal received");
        }
    }

    cleanup().await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_first_shutdown_reason_wins() {
        let manager = ShutdownManager::new();
        assert_eq!(manager.reason(), None);
        manager.shutdown(ShutdownReason::FatalError("bind failed".into()));
        manager.shutdown(ShutdownReason::UserInitiated);
        manager.wait_for_shutdown().await;
        assert_eq!(manager.reason(), Some(ShutdownReason::FatalError("bind failed".into())));
    }

    #[tokio::test]
    async fn test_fatal_error_runs_cleanup() {
        let manager = Arc::new(ShutdownManager::new());
        let registry = Arc::new(AgentRegistry::new());
        assert!(registry.reserve("ai-bot-room-1"));
        let mut coordinator = ShutdownCoordinator::new(Duration::from_secs(1));
        coordinator.register(RegistryCleanup::new(Arc::clone(&registry)));

        let failing = Arc::clone(&manager);
        let app = async move {
            failing.shutdown(ShutdownReason::FatalError("server crashed".into()));
            std::future::pending::<()>().await;
        };
        run_with_graceful_shutdown(Arc::clone(&manager), app, || async move { coordinator.run_cleanup().await })
            .await;

        assert!(!registry.is_pending("ai-bot-room-1"));
        assert!(matches!(manager.reason(), Some(ShutdownReason::FatalError(_))));
    }

    #[tokio::test]
    async fn test_registry_cleanup_empties_registry() {
        let registry = Arc::new(AgentRegistry::new());
        assert!(registry.reserve("ai-bot-room-1"));

        let mut coordinator = ShutdownCoordinator::new(Duration::from_secs(5));
        coordinator.register(RegistryCleanup::new(Arc::clone(&registry)));
        coordinator.run_cleanup().await;

        assert_eq!(registry.active_count(), 0);
        assert!(!registry.is_pending("ai-bot-room-1"));
    }
}
