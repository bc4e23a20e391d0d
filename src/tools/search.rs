//! web_search 工具：调用外部搜索 API（Tavily 兼容）
//!
//! 单次调用、不重试。非 2xx 与网络层失败都不是异常，而是带 status 的结构化错误输出；
//! 只有参数非法与凭据缺失会作为 ToolError 返回。

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::config::SearchSection;
use crate::core::ToolError;
use crate::tools::Tool;

pub const WEB_SEARCH: &str = "web_search";

#[derive(Debug, Deserialize)]
struct SearchArgs {
    query: String,
}

/// 搜索工具：持有 HTTP Client、端点与凭据
pub struct WebSearchTool {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
    max_results: u32,
    search_depth: String,
}

impl WebSearchTool {
    /// api_key 为 None 时回退到 TAVILY_API_KEY；仍缺失时工具在调用时报错，而不是构造时
    pub fn new(endpoint: &str, api_key: Option<&str>, timeout_secs: u64) -> Self {
        let api_key = api_key
            .map(String::from)
            .or_else(|| std::env::var("TAVILY_API_KEY").ok())
            .filter(|k| !k.is_empty());
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .unwrap_or_default();
        Self {
            client,
            endpoint: endpoint.to_string(),
            api_key,
            max_results: 5,
            search_depth: "advanced".to_string(),
        }
    }

    pub fn from_config(cfg: &SearchSection) -> Self {
        let mut tool = Self::new(&cfg.endpoint, cfg.api_key.as_deref(), cfg.timeout_secs);
        tool.max_results = cfg.max_results;
        tool.search_depth = cfg.search_depth.clone();
        tool
    }

    /// 执行搜索；返回 `{"results", "status"}` 或 `{"error", "status"}` 的 JSON 字符串
    pub async fn search(&self, query: &str) -> Result<String, ToolError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or(ToolError::MissingCredential("TAVILY_API_KEY"))?;

        tracing::info!(query = %query, "performing web search");
        let resp = self
            .client
            .post(&self.endpoint)
            .bearer_auth(api_key)
            .json(&json!({
                "query": query,
                "search_depth": self.search_depth,
                "max_results": self.max_results,
                "include_answer": true,
                "include_raw_content": false,
            }))
            .send()
            .await;

        let resp = match resp {
            Ok(resp) => resp,
            Err(e) => {
                tracing::error!(error = %e, "web search request failed");
                return Ok(ToolError::Network(e.to_string()).payload().to_string());
            }
        };

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            tracing::warn!(status, query = %query, "web search rejected");
            return Ok(ToolError::Http { status }.payload().to_string());
        }

        match resp.json::<Value>().await {
            Ok(results) => {
                tracing::info!(query = %query, "web search successful");
                Ok(json!({ "results": results, "status": status }).to_string())
            }
            Err(e) => {
                tracing::error!(error = %e, "web search returned unreadable body");
                Ok(ToolError::Network(e.to_string()).payload().to_string())
            }
        }
    }
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        WEB_SEARCH
    }

    async fn execute(&self, args: Value) -> Result<String, ToolError> {
        let args: SearchArgs =
            serde_json::from_value(args).map_err(|e| ToolError::InvalidArguments(e.to_string()))?;
        let query = args.query.trim();
        if query.is_empty() {
            return Err(ToolError::InvalidArguments("query is empty".to_string()));
        }
        self.search(query).await
    }
}
