//! 会话层：每个频道一个 AgentSession，由 AgentRegistry 保证同一频道至多一个活跃会话

pub mod registry;
pub mod relay;
pub mod session;

pub use registry::{AgentRegistry, CommitOutcome};
pub use relay::{RelaySignal, RunState, StreamRelay};
pub use session::{AgentSession, DisposeHook, SessionSettings};

/// 频道对应的机器人用户 id：`ai-bot-` + 去掉所有 `!` 的频道 id
pub fn bot_user_id(channel_id: &str) -> String {
    format!("ai-bot-{}", channel_id.replace('!', ""))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bot_user_id_strips_bang() {
        assert_eq!(bot_user_id("room-1"), "ai-bot-room-1");
        assert_eq!(bot_user_id("!members-abc!def"), "ai-bot-members-abcdef");
    }
}
