//! 会话监管：阶段、释放标记、取消令牌
//!
//! 持有 CancellationToken，stop 时取消当前 run 的等待点；disposed 标记单调置位，
//! 置位后 run 循环与 StreamRelay 的所有副作用都变为空操作。

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;

use super::state::AgentPhase;

/// 会话级生命周期管理：阶段、释放标记与取消令牌
#[derive(Debug)]
pub struct SessionSupervisor {
    cancel_token: CancellationToken,
    disposed: AtomicBool,
    phase: RwLock<AgentPhase>,
}

impl SessionSupervisor {
    pub fn new() -> Self {
        Self {
            cancel_token: CancellationToken::new(),
            disposed: AtomicBool::new(false),
            phase: RwLock::new(AgentPhase::Uninitialized),
        }
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    /// 取消 run 循环的所有等待点
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// 置位 disposed；只有第一次调用返回 true
    pub fn mark_disposed(&self) -> bool {
        let first = !self.disposed.swap(true, Ordering::SeqCst);
        if first {
            *self.phase.write() = AgentPhase::Disposed;
            self.cancel_token.cancel();
        }
        first
    }

    pub fn phase(&self) -> AgentPhase {
        *self.phase.read()
    }

    /// 按转换表推进阶段；非法转换（含已释放）被拒绝并返回 false
    pub fn transition(&self, next: AgentPhase) -> bool {
        let mut phase = self.phase.write();
        if *phase == AgentPhase::Disposed || !phase.can_transition_to(next) {
            tracing::debug!(from = %*phase, to = %next, "rejected phase transition");
            return false;
        }
        *phase = next;
        true
    }
}

impl Default for SessionSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mark_disposed_once() {
        let supervisor = SessionSupervisor::new();
        assert!(supervisor.mark_disposed());
        assert!(!supervisor.mark_disposed());
        assert!(supervisor.is_disposed());
        assert_eq!(supervisor.phase(), AgentPhase::Disposed);
        assert!(supervisor.cancel_token().is_cancelled());
    }

    #[test]
    fn test_transition_rejected_after_dispose() {
        let supervisor = SessionSupervisor::new();
        assert!(supervisor.transition(AgentPhase::Initializing));
        supervisor.mark_disposed();
        assert!(!supervisor.transition(AgentPhase::Ready));
        assert_eq!(supervisor.phase(), AgentPhase::Disposed);
    }
}
