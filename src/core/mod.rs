//! 核心层：错误分类、会话阶段、会话监管、优雅关闭

pub mod error;
pub mod session_supervisor;
pub mod shutdown;
pub mod state;

pub use error::{AgentError, ToolError};
pub use session_supervisor::SessionSupervisor;
pub use shutdown::{RegistryCleanup, ShutdownCoordinator, ShutdownManager, ShutdownReason};
pub use state::AgentPhase;
