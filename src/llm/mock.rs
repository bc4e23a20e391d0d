//! 脚本化 AI 后端（用于测试，无需 API）
//!
//! 每次 create_run / submit_tool_outputs 按顺序取出一段预置脚本作为事件流；
//! 脚本可以插入等待点（Notify）或延时，用于构造 stop 与 run 并发的场景。

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream;
use parking_lot::Mutex;
use tokio::sync::Notify;

use super::events::{RunEvent, ToolOutput};
use super::traits::{AssistantBackend, BackendError, RunStream};

/// 脚本中的一步
#[derive(Debug, Clone)]
pub enum ScriptStep {
    Event(RunEvent),
    /// 产出一个流错误
    Fail(String),
    /// 等待外部 notify 后继续
    Wait(Arc<Notify>),
    Sleep(Duration),
}

/// 一次工具输出提交的记录
#[derive(Debug, Clone, PartialEq)]
pub struct Submission {
    pub thread_id: String,
    pub run_id: String,
    pub outputs: Vec<ToolOutput>,
}

#[derive(Default)]
pub struct ScriptedBackend {
    scripts: Mutex<VecDeque<Vec<ScriptStep>>>,
    threads: AtomicUsize,
    runs: AtomicUsize,
    messages: Mutex<Vec<(String, String)>>,
    cancels: Mutex<Vec<(String, String)>>,
    submissions: Mutex<Vec<Submission>>,
    fail_create_thread: AtomicBool,
    fail_cancel: AtomicBool,
    cancel_latency: Mutex<Duration>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加一段脚本（供下一次打开流时使用）
    pub fn push_script(&self, steps: Vec<ScriptStep>) {
        self.scripts.lock().push_back(steps);
    }

    /// 只包含事件的脚本
    pub fn push_events(&self, events: Vec<RunEvent>) {
        self.push_script(events.into_iter().map(ScriptStep::Event).collect());
    }

    pub fn fail_create_thread(&self) {
        self.fail_create_thread.store(true, Ordering::SeqCst);
    }

    pub fn fail_cancel(&self) {
        self.fail_cancel.store(true, Ordering::SeqCst);
    }

    /// cancel_run 返回前的延迟
    pub fn set_cancel_latency(&self, latency: Duration) {
        *self.cancel_latency.lock() = latency;
    }

    pub fn threads_created(&self) -> usize {
        self.threads.load(Ordering::SeqCst)
    }

    pub fn runs_created(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }

    pub fn messages(&self) -> Vec<(String, String)> {
        self.messages.lock().clone()
    }

    pub fn cancels(&self) -> Vec<(String, String)> {
        self.cancels.lock().clone()
    }

    pub fn submissions(&self) -> Vec<Submission> {
        self.submissions.lock().clone()
    }

    fn next_stream(&self) -> Result<RunStream, BackendError> {
        let steps = self.scripts.lock().pop_front().ok_or_else(|| BackendError::Api {
            status: 404,
            body: "no scripted stream left".to_string(),
        })?;
        let events = stream::unfold(steps.into_iter(), |mut steps| async move {
            loop {
                match steps.next()? {
                    ScriptStep::Event(event) => return Some((Ok(event), steps)),
                    ScriptStep::Fail(message) => return Some((Err(BackendError::Stream(message)), steps)),
                    ScriptStep::Wait(notify) => notify.notified().await,
                    ScriptStep::Sleep(duration) => tokio::time::sleep(duration).await,
                }
            }
        });
        Ok(Box::pin(events))
    }
}

#[async_trait]
impl AssistantBackend for ScriptedBackend {
    async fn create_thread(&self) -> Result<String, BackendError> {
        if self.fail_create_thread.load(Ordering::SeqCst) {
            return Err(BackendError::Request("connection refused".to_string()));
        }
        let n = self.threads.fetch_add(1, Ordering::SeqCst);
        Ok(format!("thread_{}", n))
    }

    async fn add_message(&self, thread_id: &str, content: &str) -> Result<(), BackendError> {
        self.messages
            .lock()
            .push((thread_id.to_string(), content.to_string()));
        Ok(())
    }

    async fn create_run(&self, _thread_id: &str, _assistant_id: &str) -> Result<RunStream, BackendError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        self.next_stream()
    }

    async fn cancel_run(&self, thread_id: &str, run_id: &str) -> Result<(), BackendError> {
        self.cancels
            .lock()
            .push((thread_id.to_string(), run_id.to_string()));
        let latency = *self.cancel_latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        if self.fail_cancel.load(Ordering::SeqCst) {
            return Err(BackendError::Api {
                status: 400,
                body: "run is not cancellable".to_string(),
            });
        }
        Ok(())
    }

    async fn submit_tool_outputs(
        &self,
        thread_id: &str,
        run_id: &str,
        outputs: &[ToolOutput],
    ) -> Result<RunStream, BackendError> {
        self.submissions.lock().push(Submission {
            thread_id: thread_id.to_string(),
            run_id: run_id.to_string(),
            outputs: outputs.to_vec(),
        });
        self.next_stream()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    #[tokio::test]
    async fn test_scripts_are_consumed_in_order() {
        let backend = ScriptedBackend::new();
        backend.push_events(vec![RunEvent::RunCompleted]);
        backend.push_script(vec![ScriptStep::Fail("boom".into())]);

        let mut first = backend.create_run("t", "a").await.unwrap();
        assert_eq!(first.next().await.unwrap().unwrap(), RunEvent::RunCompleted);
        assert!(first.next().await.is_none());

        let mut second = backend.submit_tool_outputs("t", "r", &[]).await.unwrap();
        assert!(second.next().await.unwrap().is_err());

        assert!(backend.create_run("t", "a").await.is_err());
        assert_eq!(backend.submissions().len(), 1);
    }
}
