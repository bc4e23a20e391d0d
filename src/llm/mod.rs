//! AI 后端层：Assistants 抽象与实现（OpenAI Assistants v2 / 脚本化 Mock）、Run 事件与 SSE 解码

pub mod events;
pub mod mock;
pub mod openai;
pub mod sse;
pub mod traits;

pub use events::{MessageContent, RunEvent, ToolCall, ToolOutput, STEP_MESSAGE_CREATION};
pub use mock::{ScriptStep, ScriptedBackend, Submission};
pub use openai::OpenAiAssistants;
pub use traits::{AssistantBackend, BackendError, RunStream};
