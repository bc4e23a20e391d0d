//! 工具调度器
//!
//! 持有 ToolRegistry 与单次调用超时。resolve(batch) 并发执行一批工具调用并保持原始顺序；
//! 任一调用失败（参数非法、凭据缺失、超时、未知工具）只降级为该调用自己的错误输出，不影响整批。
//! 每次调用输出结构化审计日志（JSON）。

use std::time::{Duration, Instant};

use futures_util::future::join_all;
use tokio::time::timeout;

use crate::config::ToolsSection;
use crate::core::ToolError;
use crate::llm::{ToolCall, ToolOutput};
use crate::tools::{ToolRegistry, WebSearchTool};

/// 一次已解决的工具调用及其结果
#[derive(Debug, Clone, PartialEq)]
pub struct PendingToolCall {
    pub call: ToolCall,
    pub result: Result<String, ToolError>,
}

impl PendingToolCall {
    pub fn is_error(&self) -> bool {
        self.result.is_err()
    }

    /// 提交给后端的输出；失败的调用输出 `{"error": ...}` 负载
    pub fn into_output(self) -> ToolOutput {
        let output = match self.result {
            Ok(content) => content,
            Err(e) => e.payload().to_string(),
        };
        ToolOutput {
            tool_call_id: self.call.id,
            output,
        }
    }
}

/// 工具调度器：对每次调用施加超时，失败降级为该调用的错误结果
pub struct ToolDispatcher {
    registry: ToolRegistry,
    timeout: Duration,
}

impl ToolDispatcher {
    pub fn new(registry: ToolRegistry, timeout_secs: u64) -> Self {
        Self {
            registry,
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    /// 默认工具集（web_search）
    pub fn from_config(cfg: &ToolsSection) -> Self {
        let mut registry = ToolRegistry::new();
        registry.register(WebSearchTool::from_config(&cfg.search));
        tracing::info!(tools = ?registry.tool_names(), timeout_secs = cfg.tool_timeout_secs, "tool dispatcher ready");
        Self::new(registry, cfg.tool_timeout_secs)
    }

    /// 并发解决一批调用，返回顺序与输入一致
    pub async fn resolve(&self, calls: Vec<ToolCall>) -> Vec<PendingToolCall> {
        let futures = calls.into_iter().map(|call| async move {
            let result = self.resolve_one(&call).await;
            PendingToolCall { call, result }
        });
        join_all(futures).await
    }

    /// 解决一批调用并直接打包为后端输出
    pub async fn resolve_outputs(&self, calls: Vec<ToolCall>) -> Vec<ToolOutput> {
        let resolved = self.resolve(calls).await;
        let failed = resolved.iter().filter(|p| p.is_error()).count();
        if failed > 0 {
            tracing::warn!(failed, total = resolved.len(), "tool calls degraded to error outputs");
        }
        resolved.into_iter().map(PendingToolCall::into_output).collect()
    }

    async fn resolve_one(&self, call: &ToolCall) -> Result<String, ToolError> {
        let start = Instant::now();
        let args_preview = args_preview(&call.arguments);

        let result = match self.registry.get(&call.name) {
            None => Err(ToolError::Unsupported(call.name.clone())),
            Some(tool) => match parse_arguments(&call.arguments) {
                Err(e) => Err(e),
                Ok(args) => match timeout(self.timeout, tool.execute(args)).await {
                    Ok(result) => result,
                    Err(_) => Err(ToolError::Timeout(call.name.clone())),
                },
            },
        };

        let outcome = match &result {
            Ok(_) => "ok",
            Err(ToolError::Timeout(_)) => "timeout",
            Err(ToolError::Unsupported(_)) => "unsupported",
            Err(_) => "error",
        };
        let audit = serde_json::json!({
            "event": "tool_audit",
            "tool": call.name,
            "tool_call_id": call.id,
            "ok": result.is_ok(),
            "outcome": outcome,
            "duration_ms": start.elapsed().as_millis() as u64,
            "args_preview": args_preview,
        });
        tracing::info!(audit = %audit.to_string(), "tool");

        result
    }
}

/// 空参数视为 `{}`
fn parse_arguments(raw: &str) -> Result<serde_json::Value, ToolError> {
    if raw.trim().is_empty() {
        return Ok(serde_json::json!({}));
    }
    serde_json::from_str(raw).map_err(|e| ToolError::InvalidArguments(e.to_string()))
}

fn args_preview(raw: &str) -> String {
    if raw.chars().count() > 200 {
        format!("{}...", raw.chars().take(200).collect::<String>())
    } else {
        raw.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::Tool;
    use async_trait::async_trait;
    use serde_json::Value;

    struct Echo;

    #[async_trait]
    impl Tool for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        async fn execute(&self, args: Value) -> Result<String, ToolError> {
            args["text"]
                .as_str()
                .map(String::from)
                .ok_or_else(|| ToolError::InvalidArguments("missing text".into()))
        }
    }

    struct Slow;

    #[async_trait]
    impl Tool for Slow {
        fn name(&self) -> &str {
            "slow"
        }

        async fn execute(&self, _args: Value) -> Result<String, ToolError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(String::new())
        }
    }

    fn call(id: &str, name: &str, arguments: &str) -> ToolCall {
        ToolCall {
            id: id.to_string(),
            name: name.to_string(),
            arguments: arguments.to_string(),
        }
    }

    fn dispatcher() -> ToolDispatcher {
        let mut registry = ToolRegistry::new();
        registry.register(Echo);
        registry.register(Slow);
        ToolDispatcher::new(registry, 5)
    }

    #[tokio::test]
    async fn test_mixed_batch_keeps_order() {
        let d = dispatcher();
        let resolved = d
            .resolve(vec![
                call("c1", "echo", "{not json"),
                call("c2", "echo", r#"{"text":"hello"}"#),
            ])
            .await;
        assert_eq!(resolved.len(), 2);
        assert_eq!(resolved[0].call.id, "c1");
        assert!(resolved[0].is_error());
        assert_eq!(resolved[1].result, Ok("hello".to_string()));

        let outputs: Vec<ToolOutput> = resolved.into_iter().map(PendingToolCall::into_output).collect();
        let first: Value = serde_json::from_str(&outputs[0].output).unwrap();
        assert!(first["error"].as_str().unwrap().starts_with("Invalid arguments"));
        assert_eq!(outputs[1].output, "hello");
    }

    #[tokio::test]
    async fn test_unknown_tool_gets_error_output() {
        let d = dispatcher();
        let outputs = d.resolve_outputs(vec![call("c9", "calculator", "{}")]).await;
        assert_eq!(outputs.len(), 1);
        assert_eq!(outputs[0].tool_call_id, "c9");
        let value: Value = serde_json::from_str(&outputs[0].output).unwrap();
        assert_eq!(value["error"], "Unsupported tool: calculator");
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_degrades_single_call() {
        let d = dispatcher();
        let resolved = d
            .resolve(vec![
                call("c1", "slow", "{}"),
                call("c2", "echo", r#"{"text":"ok"}"#),
            ])
            .await;
        assert_eq!(resolved[0].result, Err(ToolError::Timeout("slow".into())));
        assert_eq!(resolved[1].result, Ok("ok".to_string()));
    }

    #[test]
    fn test_args_preview_truncates() {
        let long = "x".repeat(300);
        assert_eq!(args_preview(&long).len(), 203);
        assert_eq!(args_preview("{}"), "{}");
    }
}
