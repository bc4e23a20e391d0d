//! 网关：与传输无关的生命周期接口，以及（server 特性下）HTTP 路由
//!
//! 外部请求 → AgentLifecycle → AgentRegistry 预留 → 构造并初始化 AgentSession → 登记。
//! 消息服务的频道事件经 /webhook 进入 EventBus，由各会话自行订阅。

#[cfg(feature = "server")]
pub mod http;
pub mod lifecycle;

#[cfg(feature = "server")]
pub use http::create_router;
pub use lifecycle::{
    AgentLifecycle, LifecycleError, StartAgentRequest, StartAgentResponse, StopAgentRequest, StopAgentResponse,
    TokenRequest, TokenResponse,
};
