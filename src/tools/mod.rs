pub mod dispatcher;
pub mod registry;
pub mod search;

pub use dispatcher::{PendingToolCall, ToolDispatcher};
pub use registry::{Tool, ToolRegistry};
pub use search::{WebSearchTool, WEB_SEARCH};
