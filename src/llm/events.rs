//! Run 事件：后端流式事件的判别联合
//!
//! 只解析会话关心的字段；未知事件归为 `Other`，由 StreamRelay 忽略。

use serde::{Deserialize, Serialize};

use super::traits::BackendError;

/// 后端请求调用的工具
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    /// 原始 JSON 参数字符串（未校验）
    pub arguments: String,
}

/// 提交给后端的单个工具输出
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolOutput {
    pub tool_call_id: String,
    pub output: String,
}

/// message.completed 的内容
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageContent {
    Text(String),
    /// 非文本内容（如 image_file），只保留类型名
    NonText(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunEvent {
    RunCreated { run_id: String },
    MessageDelta { text: String },
    MessageCompleted { content: MessageContent },
    RunStepCreated { step_type: String },
    RequiresAction { run_id: String, tool_calls: Vec<ToolCall> },
    RunCompleted,
    RunFailed { message: Option<String> },
    RunCancelled,
    RunExpired,
    Other { event: String },
}

pub const STEP_MESSAGE_CREATION: &str = "message_creation";

#[derive(Deserialize)]
struct RunObject {
    id: String,
    #[serde(default)]
    required_action: Option<RequiredAction>,
    #[serde(default)]
    last_error: Option<LastError>,
}

#[derive(Deserialize)]
struct RequiredAction {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    submit_tool_outputs: Option<SubmitToolOutputs>,
}

#[derive(Deserialize)]
struct SubmitToolOutputs {
    #[serde(default)]
    tool_calls: Vec<RawToolCall>,
}

#[derive(Deserialize)]
struct RawToolCall {
    id: String,
    function: RawFunction,
}

#[derive(Deserialize)]
struct RawFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Deserialize)]
struct LastError {
    #[serde(default)]
    message: Option<String>,
}

#[derive(Deserialize)]
struct ContentPart {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<TextPart>,
}

#[derive(Deserialize)]
struct TextPart {
    #[serde(default)]
    value: String,
}

#[derive(Deserialize)]
struct MessageDeltaObject {
    delta: DeltaBody,
}

#[derive(Deserialize)]
struct DeltaBody {
    #[serde(default)]
    content: Vec<ContentPart>,
}

#[derive(Deserialize)]
struct MessageObject {
    #[serde(default)]
    content: Vec<ContentPart>,
}

#[derive(Deserialize)]
struct RunStepObject {
    step_details: StepDetails,
}

#[derive(Deserialize)]
struct StepDetails {
    #[serde(rename = "type")]
    kind: String,
}

fn decode<'a, T: Deserialize<'a>>(event: &str, data: &'a str) -> Result<T, BackendError> {
    serde_json::from_str(data).map_err(|e| BackendError::Decode(format!("{}: {}", event, e)))
}

impl RunEvent {
    /// 由一帧 SSE（事件名 + data）解析；`done` 帧返回 None，`error` 帧返回 Err
    pub fn from_sse(event: &str, data: &str) -> Result<Option<RunEvent>, BackendError> {
        let parsed = match event {
            "done" => return Ok(None),
            "error" => return Err(BackendError::Stream(data.to_string())),
            "thread.run.created" => {
                let run: RunObject = decode(event, data)?;
                RunEvent::RunCreated { run_id: run.id }
            }
            "thread.message.delta" => {
                let delta: MessageDeltaObject = decode(event, data)?;
                match delta.delta.content.into_iter().next() {
                    Some(ContentPart {
                        kind,
                        text: Some(text),
                    }) if kind == "text" => RunEvent::MessageDelta { text: text.value },
                    _ => RunEvent::Other {
                        event: event.to_string(),
                    },
                }
            }
            "thread.message.completed" => {
                let message: MessageObject = decode(event, data)?;
                let content = match message.content.into_iter().next() {
                    Some(ContentPart {
                        kind,
                        text: Some(text),
                    }) if kind == "text" => MessageContent::Text(text.value),
                    Some(part) => MessageContent::NonText(part.kind),
                    None => MessageContent::NonText("empty".to_string()),
                };
                RunEvent::MessageCompleted { content }
            }
            "thread.run.step.created" => {
                let step: RunStepObject = decode(event, data)?;
                RunEvent::RunStepCreated {
                    step_type: step.step_details.kind,
                }
            }
            "thread.run.requires_action" => {
                let run: RunObject = decode(event, data)?;
                match run.required_action {
                    Some(action) if action.kind == "submit_tool_outputs" => RunEvent::RequiresAction {
                        run_id: run.id,
                        tool_calls: action
                            .submit_tool_outputs
                            .map(|s| s.tool_calls)
                            .unwrap_or_default()
                            .into_iter()
                            .map(|c| ToolCall {
                                id: c.id,
                                name: c.function.name,
                                arguments: c.function.arguments,
                            })
                            .collect(),
                    },
                    _ => RunEvent::Other {
                        event: event.to_string(),
                    },
                }
            }
            "thread.run.completed" => RunEvent::RunCompleted,
            "thread.run.failed" => {
                let run: RunObject = decode(event, data)?;
                RunEvent::RunFailed {
                    message: run.last_error.and_then(|e| e.message),
                }
            }
            "thread.run.cancelled" => RunEvent::RunCancelled,
            "thread.run.expired" => RunEvent::RunExpired,
            other => RunEvent::Other {
                event: other.to_string(),
            },
        };
        Ok(Some(parsed))
    }
}
