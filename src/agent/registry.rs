//! 会话注册表：bot id → 活跃会话，以及构造中的 pending 标记
//!
//! 同一 bot id 在任意时刻至多处于 active / pending 之一。所有修改都在同一把锁内完成；
//! 释放会话（可能触发回调再次进入注册表）总是在锁外进行。

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use super::session::AgentSession;

/// commit 的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    Installed,
    /// 已有活跃会话，新会话被释放
    Duplicate,
    /// 新会话在提交前已被释放，不再登记
    Disposed,
}

#[derive(Default)]
struct RegistryState {
    active: HashMap<String, Arc<AgentSession>>,
    pending: HashSet<String>,
}

/// 进程内会话注册表
#[derive(Default)]
pub struct AgentRegistry {
    state: Mutex<RegistryState>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 标记 pending；id 已活跃或已 pending 时返回 false，调用方不得继续构造
    pub fn reserve(&self, bot_id: &str) -> bool {
        let mut state = self.state.lock();
        if state.active.contains_key(bot_id) || state.pending.contains(bot_id) {
            return false;
        }
        state.pending.insert(bot_id.to_string());
        true
    }

    /// pending → active；已有活跃会话时释放新会话
    pub fn commit(self: &Arc<Self>, bot_id: &str, session: Arc<AgentSession>) -> CommitOutcome {
        let outcome = {
            let mut state = self.state.lock();
            state.pending.remove(bot_id);
            if state.active.contains_key(bot_id) {
                CommitOutcome::Duplicate
            } else if session.set_on_dispose(self.removal_hook(bot_id)) {
                state.active.insert(bot_id.to_string(), Arc::clone(&session));
                CommitOutcome::Installed
            } else {
                CommitOutcome::Disposed
            }
        };

        match outcome {
            CommitOutcome::Installed => {
                tracing::info!(bot_id = %bot_id, session_id = %session.id(), "agent session registered")
            }
            CommitOutcome::Duplicate => {
                tracing::warn!(bot_id = %bot_id, "session already active, disposing duplicate");
                session.dispose();
            }
            CommitOutcome::Disposed => {
                tracing::warn!(bot_id = %bot_id, "session disposed before registration")
            }
        }
        outcome
    }

    /// 无条件清除 pending 标记
    pub fn release_pending(&self, bot_id: &str) {
        self.state.lock().pending.remove(bot_id);
    }

    pub fn get(&self, bot_id: &str) -> Option<Arc<AgentSession>> {
        self.state.lock().active.get(bot_id).cloned()
    }

    /// 移除条目，不释放会话（由调用方先释放）
    pub fn remove(&self, bot_id: &str) -> Option<Arc<AgentSession>> {
        self.state.lock().active.remove(bot_id)
    }

    pub fn is_pending(&self, bot_id: &str) -> bool {
        self.state.lock().pending.contains(bot_id)
    }

    pub fn is_active(&self, bot_id: &str) -> bool {
        self.state.lock().active.contains_key(bot_id)
    }

    pub fn active_count(&self) -> usize {
        self.state.lock().active.len()
    }

    /// 释放所有活跃会话并清空注册表，返回释放的数量
    pub fn shutdown(&self) -> usize {
        let sessions: Vec<Arc<AgentSession>> = {
            let mut state = self.state.lock();
            state.pending.clear();
            state.active.drain().map(|(_, session)| session).collect()
        };
        let count = sessions.len();
        for session in sessions {
            tracing::debug!(bot_id = %session.bot_id(), session_id = %session.id(), "disposing session on shutdown");
            session.dispose();
        }
        tracing::info!(count, "agent registry shut down");
        count
    }

    /// 会话释放时删除自己的条目（只删除指向同一会话的条目）
    fn removal_hook(self: &Arc<Self>, bot_id: &str) -> Box<dyn FnOnce(&AgentSession) + Send> {
        let registry: Weak<Self> = Arc::downgrade(self);
        let bot_id = bot_id.to_string();
        Box::new(move |session: &AgentSession| {
            if let Some(registry) = registry.upgrade() {
                registry.remove_session(&bot_id, session);
            }
        })
    }

    /// 只在条目仍指向 `session` 时移除
    pub fn remove_session(&self, bot_id: &str, session: &AgentSession) -> bool {
        let mut state = self.state.lock();
        let same = state
            .active
            .get(bot_id)
            .is_some_and(|current| std::ptr::eq(Arc::as_ptr(current), session));
        if same {
            state.active.remove(bot_id);
            tracing::debug!(bot_id = %bot_id, session_id = %session.id(), "session entry removed");
        }
        same
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::session::SessionSettings;
    use crate::chat::{ChannelRef, MockChatClient};
    use crate::llm::ScriptedBackend;
    use crate::tools::{ToolDispatcher, ToolRegistry};

    fn session(bot_id: &str) -> Arc<AgentSession> {
        AgentSession::new(
            bot_id,
            ChannelRef::new("messaging", "room-1"),
            Arc::new(MockChatClient::new()),
            Arc::new(ScriptedBackend::new()),
            Arc::new(ToolDispatcher::new(ToolRegistry::new(), 5)),
            SessionSettings::new("asst_1"),
        )
    }

    #[test]
    fn test_reserve_is_exclusive() {
        let registry = AgentRegistry::new();
        assert!(registry.reserve("ai-bot-a"));
        assert!(!registry.reserve("ai-bot-a"));
        registry.release_pending("ai-bot-a");
        assert!(registry.reserve("ai-bot-a"));
    }

    #[test]
    fn test_commit_moves_pending_to_active() {
        let registry = Arc::new(AgentRegistry::new());
        assert!(registry.reserve("ai-bot-a"));
        let s = session("ai-bot-a");
        assert_eq!(registry.commit("ai-bot-a", s.clone()), CommitOutcome::Installed);
        assert!(!registry.is_pending("ai-bot-a"));
        assert!(registry.is_active("ai-bot-a"));
        assert!(!registry.reserve("ai-bot-a"));
        assert!(Arc::ptr_eq(&registry.get("ai-bot-a").unwrap(), &s));
    }

    #[test]
    fn test_commit_disposes_duplicate() {
        let registry = Arc::new(AgentRegistry::new());
        let first = session("ai-bot-a");
        let second = session("ai-bot-a");
        registry.commit("ai-bot-a", first.clone());
        assert_eq!(registry.commit("ai-bot-a", second.clone()), CommitOutcome::Duplicate);
        assert!(second.is_disposed());
        assert!(!first.is_disposed());
        assert!(Arc::ptr_eq(&registry.get("ai-bot-a").unwrap(), &first));
    }

    #[test]
    fn test_disposed_session_is_not_installed() {
        let registry = Arc::new(AgentRegistry::new());
        registry.reserve("ai-bot-a");
        let s = session("ai-bot-a");
        s.dispose();
        assert_eq!(registry.commit("ai-bot-a", s), CommitOutcome::Disposed);
        assert_eq!(registry.active_count(), 0);
        assert!(!registry.is_pending("ai-bot-a"));
    }

    #[test]
    fn test_dispose_removes_own_entry_only() {
        let registry = Arc::new(AgentRegistry::new());
        let first = session("ai-bot-a");
        registry.commit("ai-bot-a", first.clone());
        first.dispose();
        assert!(registry.get("ai-bot-a").is_none());

        // 旧会话的回调不会删除替换后的新条目
        let stale = session("ai-bot-b");
        registry.commit("ai-bot-b", stale.clone());
        registry.remove("ai-bot-b");
        let fresh = session("ai-bot-b");
        registry.commit("ai-bot-b", fresh.clone());
        stale.dispose();
        assert!(Arc::ptr_eq(&registry.get("ai-bot-b").unwrap(), &fresh));
    }

    #[test]
    fn test_shutdown_disposes_everything() {
        let registry = Arc::new(AgentRegistry::new());
        let a = session("ai-bot-a");
        let b = session("ai-bot-b");
        registry.commit("ai-bot-a", a.clone());
        registry.commit("ai-bot-b", b.clone());
        registry.reserve("ai-bot-c");

        assert_eq!(registry.shutdown(), 2);
        assert!(a.is_disposed() && b.is_disposed());
        assert_eq!(registry.active_count(), 0);
        assert!(!registry.is_pending("ai-bot-c"));
    }
}
