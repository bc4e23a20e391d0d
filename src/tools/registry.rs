//! 工具注册表
//!
//! 所有工具实现 Tool trait（name / execute），由 ToolRegistry 按名注册与查找；
//! ToolDispatcher 在调用时加超时并把失败降级为该调用的错误输出。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::core::ToolError;

/// 工具 trait：名称 + 异步执行（args 为已解析的 JSON）
#[async_trait]
pub trait Tool: Send + Sync {
    /// 工具名称（与后端 function.name 对应）
    fn name(&self) -> &str;

    /// 执行工具，成功时返回提交给后端的输出字符串
    async fn execute(&self, args: Value) -> Result<String, ToolError>;
}

/// 工具注册表：按名称存储 Arc<dyn Tool>
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: impl Tool + 'static) {
        let name = tool.name().to_string();
        self.tools.insert(name, Arc::new(tool));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn tool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }
}
