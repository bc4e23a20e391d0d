//! AI 后端抽象
//!
//! 线程（Thread）是后端持久的对话上下文；每次 create_run / submit_tool_outputs 都返回一条
//! 全新的、有限的事件流（RunStream），流不可复用，由 run 循环负责在流之间切换。

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::Stream;
use thiserror::Error;

use super::events::{RunEvent, ToolOutput};

/// AI 后端错误
#[derive(Error, Debug, Clone)]
pub enum BackendError {
    #[error("Backend request failed: {0}")]
    Request(String),

    #[error("Backend returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Invalid backend payload: {0}")]
    Decode(String),

    #[error("Stream error: {0}")]
    Stream(String),
}

/// 单次 run 的事件流
pub type RunStream = Pin<Box<dyn Stream<Item = Result<RunEvent, BackendError>> + Send>>;

/// AI 后端 trait：线程、run、取消与工具输出提交
#[async_trait]
pub trait AssistantBackend: Send + Sync {
    /// 创建线程，返回线程 id
    async fn create_thread(&self) -> Result<String, BackendError>;

    /// 向线程追加一条用户消息
    async fn add_message(&self, thread_id: &str, content: &str) -> Result<(), BackendError>;

    /// 在线程上开启新 run，返回事件流
    async fn create_run(&self, thread_id: &str, assistant_id: &str) -> Result<RunStream, BackendError>;

    /// 取消进行中的 run
    async fn cancel_run(&self, thread_id: &str, run_id: &str) -> Result<(), BackendError>;

    /// 提交整批工具输出并恢复 run，返回新的事件流
    async fn submit_tool_outputs(
        &self,
        thread_id: &str,
        run_id: &str,
        outputs: &[ToolOutput],
    ) -> Result<RunStream, BackendError>;
}
