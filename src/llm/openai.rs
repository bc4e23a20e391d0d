//! OpenAI Assistants (v2) 客户端
//!
//! 线程 / run / 工具输出提交走 REST；run 与工具输出提交以 `stream: true` 打开 SSE，
//! 由 SseDecoder 切帧后解析为 RunEvent。可配置 base_url 以接入兼容端点或代理。

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{stream, StreamExt};
use reqwest::{Client, RequestBuilder, Response};
use serde::Deserialize;
use serde_json::{json, Value};

use super::events::{RunEvent, ToolOutput};
use super::sse::SseDecoder;
use super::traits::{AssistantBackend, BackendError, RunStream};
use crate::config::LlmSection;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

#[derive(Deserialize)]
struct ThreadObject {
    id: String,
}

/// Assistants API 客户端：持有 HTTP Client、base_url 与 API Key
pub struct OpenAiAssistants {
    client: Client,
    base_url: String,
    api_key: String,
    /// 非流式请求的超时；流式请求只受连接超时约束
    request_timeout: Duration,
}

impl OpenAiAssistants {
    pub fn new(base_url: Option<&str>, api_key: Option<&str>, request_timeout_secs: u64) -> Self {
        let api_key = api_key
            .map(String::from)
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .unwrap_or_else(|| "sk-placeholder".to_string());
        let base_url = base_url
            .unwrap_or(DEFAULT_BASE_URL)
            .trim_end_matches('/')
            .to_string();
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();

        Self {
            client,
            base_url,
            api_key,
            request_timeout: Duration::from_secs(request_timeout_secs),
        }
    }

    pub fn from_config(cfg: &LlmSection) -> Self {
        Self::new(cfg.base_url.as_deref(), cfg.api_key.as_deref(), cfg.timeouts.request)
    }

    fn post(&self, path: &str) -> RequestBuilder {
        self.client
            .post(format!("{}{}", self.base_url, path))
            .bearer_auth(&self.api_key)
            .header("OpenAI-Beta", "assistants=v2")
    }

    async fn send(req: RequestBuilder) -> Result<Response, BackendError> {
        let resp = req
            .send()
            .await
            .map_err(|e| BackendError::Request(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(BackendError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(resp)
    }

    async fn send_json(&self, path: &str, body: Value) -> Result<Response, BackendError> {
        Self::send(self.post(path).timeout(self.request_timeout).json(&body)).await
    }

    async fn open_stream(&self, path: &str, body: Value) -> Result<RunStream, BackendError> {
        let resp = Self::send(self.post(path).json(&body)).await?;
        Ok(into_run_stream(resp))
    }
}

/// 将 SSE 响应体转换为 RunEvent 流
fn into_run_stream(resp: Response) -> RunStream {
    let mut decoder = SseDecoder::new();
    let events = resp.bytes_stream().flat_map(move |chunk| {
        let items: Vec<Result<RunEvent, BackendError>> = match chunk {
            Ok(bytes) => decoder
                .push(&bytes)
                .into_iter()
                .filter_map(|frame| RunEvent::from_sse(&frame.event, &frame.data).transpose())
                .collect(),
            Err(e) => vec![Err(BackendError::Stream(e.to_string()))],
        };
        stream::iter(items)
    });
    Box::pin(events)
}

#[async_trait]
impl AssistantBackend for OpenAiAssistants {
    async fn create_thread(&self) -> Result<String, BackendError> {
        let resp = self.send_json("/threads", json!({})).await?;
        let thread: ThreadObject = resp
            .json()
            .await
            .map_err(|e| BackendError::Decode(e.to_string()))?;
        tracing::info!(thread_id = %thread.id, "assistant thread created");
        Ok(thread.id)
    }

    async fn add_message(&self, thread_id: &str, content: &str) -> Result<(), BackendError> {
        self.send_json(
            &format!("/threads/{}/messages", thread_id),
            json!({ "role": "user", "content": content }),
        )
        .await
        .map(|_| ())
    }

    async fn create_run(&self, thread_id: &str, assistant_id: &str) -> Result<RunStream, BackendError> {
        self.open_stream(
            &format!("/threads/{}/runs", thread_id),
            json!({ "assistant_id": assistant_id, "stream": true }),
        )
        .await
    }

    async fn cancel_run(&self, thread_id: &str, run_id: &str) -> Result<(), BackendError> {
        self.send_json(&format!("/threads/{}/runs/{}/cancel", thread_id, run_id), json!({}))
            .await
            .map(|_| ())
    }

    async fn submit_tool_outputs(
        &self,
        thread_id: &str,
        run_id: &str,
        outputs: &[ToolOutput],
    ) -> Result<RunStream, BackendError> {
        self.open_stream(
            &format!("/threads/{}/runs/{}/submit_tool_outputs", thread_id, run_id),
            json!({ "tool_outputs": outputs, "stream": true }),
        )
        .await
    }
}
