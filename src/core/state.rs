//! 会话阶段定义
//!
//! `Uninitialized → Initializing → Ready → Running ⇄ AwaitingTool → Completed | Failed | Cancelled → Disposed`

use serde::Serialize;

/// AgentSession 的生命周期阶段
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentPhase {
    Uninitialized,
    Initializing,
    Ready,
    Running,
    AwaitingTool,
    Completed,
    Failed,
    Cancelled,
    Disposed,
}

impl AgentPhase {
    /// 合法转换表；Disposed 可从任意阶段进入，Completed 在重启模式下可回到 Ready
    pub fn can_transition_to(self, next: AgentPhase) -> bool {
        use AgentPhase::*;
        if next == Disposed {
            return self != Disposed;
        }
        matches!(
            (self, next),
            (Uninitialized, Initializing)
                | (Initializing, Ready)
                | (Initializing, Failed)
                | (Ready, Running)
                | (Running, AwaitingTool)
                | (AwaitingTool, Running)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Cancelled)
                | (AwaitingTool, Failed)
                | (AwaitingTool, Cancelled)
                | (Ready, Cancelled)
                | (Completed, Ready)
        )
    }
}

impl std::fmt::Display for AgentPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AgentPhase::Uninitialized => "uninitialized",
            AgentPhase::Initializing => "initializing",
            AgentPhase::Ready => "ready",
            AgentPhase::Running => "running",
            AgentPhase::AwaitingTool => "awaiting_tool",
            AgentPhase::Completed => "completed",
            AgentPhase::Failed => "failed",
            AgentPhase::Cancelled => "cancelled",
            AgentPhase::Disposed => "disposed",
        };
        write!(f, "{}", s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_loop_transitions() {
        assert!(AgentPhase::Running.can_transition_to(AgentPhase::AwaitingTool));
        assert!(AgentPhase::AwaitingTool.can_transition_to(AgentPhase::Running));
        assert!(!AgentPhase::Ready.can_transition_to(AgentPhase::AwaitingTool));
    }

    #[test]
    fn test_disposed_is_absorbing() {
        assert!(AgentPhase::Running.can_transition_to(AgentPhase::Disposed));
        assert!(AgentPhase::Uninitialized.can_transition_to(AgentPhase::Disposed));
        assert!(!AgentPhase::Disposed.can_transition_to(AgentPhase::Disposed));
        assert!(!AgentPhase::Disposed.can_transition_to(AgentPhase::Ready));
    }
}
