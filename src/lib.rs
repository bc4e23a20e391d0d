//! chatbee - 聊天频道 AI 助手会话协调器
//!
//! 每个聊天频道对应一个流式 Agent 会话：把后端 Assistants run 的事件流转成频道中的
//! 占位消息更新与 AI 指示器，处理中途的工具调用，并保证同一频道至多一个活跃会话。
//!
//! 模块划分：
//! - **agent**: AgentSession、StreamRelay、AgentRegistry
//! - **chat**: 消息服务客户端抽象与实现（Stream Chat REST / Mock）、指示器事件、入站事件总线
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误分类、会话阶段、会话监管、优雅关闭
//! - **gateway**: 生命周期接口（StartAgent / StopAgent / IssueToken）与 HTTP 路由
//! - **llm**: Assistants 后端抽象与实现（OpenAI Assistants v2 / 脚本化 Mock）
//! - **observability**: 日志初始化
//! - **tools**: 工具注册表、web_search、ToolDispatcher

pub mod agent;
pub mod chat;
pub mod config;
pub mod core;
pub mod gateway;
pub mod llm;
pub mod observability;
pub mod tools;
