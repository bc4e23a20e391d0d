//! 会话级错误分类与单次工具调用错误
//!
//! AgentError 对应会话生命周期中的五类失败；所有失败都在会话边界内被吸收，
//! 生命周期接口只报告自身操作是否成功。

use serde_json::{json, Value};
use thiserror::Error;

use crate::chat::ChatError;
use crate::llm::BackendError;

/// 会话运行过程中可能出现的错误
#[derive(Error, Debug)]
pub enum AgentError {
    /// 创建会话时绑定外部线程 / 频道失败，会话不会被注册
    #[error("Initialization failed: {0}")]
    Initialization(String),

    /// 后端在流中报告 run 失败
    #[error("{0}")]
    Run(String),

    /// 遍历事件流时出现意外错误（含空闲超时、流提前结束）
    #[error("Stream fault: {0}")]
    StreamFault(String),

    /// 取消外部 run 失败，仅记录日志
    #[error("Cancellation failed: {0}")]
    Cancellation(String),

    #[error("Chat error: {0}")]
    Chat(#[from] ChatError),
}

impl From<BackendError> for AgentError {
    fn from(e: BackendError) -> Self {
        AgentError::StreamFault(e.to_string())
    }
}

/// 单次工具调用失败；降级为该调用自己的错误输出，不中断整批
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ToolError {
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("{0} is not set")]
    MissingCredential(&'static str),

    #[error("Web search failed with status code {status}")]
    Http { status: u16 },

    #[error("Web search failed")]
    Network(String),

    #[error("Unsupported tool: {0}")]
    Unsupported(String),

    #[error("Tool timeout: {0}")]
    Timeout(String),
}

impl ToolError {
    /// 提交给后端的错误负载：`{"error": ..., "status": ...}`（status 仅在 HTTP 相关时出现）
    pub fn payload(&self) -> Value {
        match self {
            ToolError::Http { status } => json!({ "error": self.to_string(), "status": status }),
            ToolError::Network(_) => json!({ "error": self.to_string(), "status": 500 }),
            _ => json!({ "error": self.to_string() }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_payload_carries_status() {
        let payload = ToolError::Http { status: 503 }.payload();
        assert_eq!(payload["status"], 503);
        assert_eq!(payload["error"], "Web search failed with status code 503");
    }

    #[test]
    fn test_network_payload_reports_500() {
        let payload = ToolError::Network("connection refused".into()).payload();
        assert_eq!(payload["status"], 500);
        assert_eq!(payload["error"], "Web search failed");
    }

    #[test]
    fn test_plain_payload_has_no_status() {
        let payload = ToolError::Unsupported("calculator".into()).payload();
        assert_eq!(payload["error"], "Unsupported tool: calculator");
        assert!(payload.get("status").is_none());
    }

    #[test]
    fn test_backend_error_becomes_stream_fault() {
        let err: AgentError = BackendError::Stream("broken pipe".into()).into();
        assert!(matches!(err, AgentError::StreamFault(_)));
    }
}
