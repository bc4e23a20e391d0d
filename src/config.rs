//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `CHATBEE__*` 覆盖（双下划线表示嵌套，如 `CHATBEE__AGENT__FLUSH_INTERVAL_MS=500`）。
//! 凭据缺失时各客户端再回退到惯用环境变量（STREAM_API_KEY、OPENAI_API_KEY、TAVILY_API_KEY 等）。

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub chat: ChatSection,
    pub llm: LlmSection,
    pub agent: AgentSection,
    pub tools: ToolsSection,
}

/// [app] 段：服务名与监听地址
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppSection {
    pub name: Option<String>,
    pub bind_addr: String,
    /// 关闭时单个清理任务的超时（秒）
    pub shutdown_timeout_secs: u64,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: None,
            bind_addr: "0.0.0.0:3000".to_string(),
            shutdown_timeout_secs: 5,
        }
    }
}

impl AppSection {
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

/// [chat] 段：消息服务凭据、机器人资料、token 有效期
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChatSection {
    pub api_key: Option<String>,
    pub api_secret: Option<String>,
    pub base_url: String,
    /// 机器人用户的显示名
    pub bot_name: String,
    pub default_channel_type: String,
    /// 用户 token 有效期（秒）
    pub token_ttl_secs: i64,
    pub request_timeout_secs: u64,
}

impl Default for ChatSection {
    fn default() -> Self {
        Self {
            api_key: None,
            api_secret: None,
            base_url: crate::chat::stream::DEFAULT_BASE_URL.to_string(),
            bot_name: "AI Writing Assistant".to_string(),
            default_channel_type: "messaging".to_string(),
            token_ttl_secs: 60 * 60,
            request_timeout_secs: 30,
        }
    }
}

/// [llm] 段：Assistants 后端
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct LlmSection {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    /// 未设置时回退到 OPENAI_ASSISTANT_ID
    pub assistant_id: Option<String>,
    pub timeouts: LlmTimeoutsSection,
}

impl LlmSection {
    pub fn resolved_assistant_id(&self) -> Option<String> {
        self.assistant_id
            .clone()
            .or_else(|| std::env::var("OPENAI_ASSISTANT_ID").ok())
            .filter(|id| !id.is_empty())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmTimeoutsSection {
    /// 非流式请求超时（秒）
    pub request: u64,
}

impl Default for LlmTimeoutsSection {
    fn default() -> Self {
        Self { request: 60 }
    }
}

/// [agent] 段：部分更新节流、空闲超时、完成后是否保留会话
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentSection {
    pub flush_interval_ms: u64,
    /// 等待下一条流事件的最长时间；未设置则不做内部超时
    pub idle_timeout_secs: Option<u64>,
    /// run 正常完成后回到 Ready 等待下一条消息，而不是释放会话
    pub restart_after_completion: bool,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            flush_interval_ms: 1000,
            idle_timeout_secs: None,
            restart_after_completion: false,
        }
    }
}

impl AgentSection {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout_secs.map(Duration::from_secs)
    }
}

/// [tools] 段：单次工具超时与搜索服务
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToolsSection {
    pub tool_timeout_secs: u64,
    pub search: SearchSection,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            tool_timeout_secs: 30,
            search: SearchSection::default(),
        }
    }
}

/// [tools.search] 段：搜索 API 端点、凭据与结果数量
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SearchSection {
    /// 未设置时回退到 TAVILY_API_KEY
    pub api_key: Option<String>,
    pub endpoint: String,
    pub max_results: u32,
    pub search_depth: String,
    pub timeout_secs: u64,
}

impl Default for SearchSection {
    fn default() -> Self {
        Self {
            api_key: None,
            endpoint: "https://api.tavily.com/search".to_string(),
            max_results: 5,
            search_depth: "advanced".to_string(),
            timeout_secs: 15,
        }
    }
}

/// 从 config 目录加载配置，环境变量 CHATBEE__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 CHATBEE__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("CHATBEE")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.agent.flush_interval(), Duration::from_millis(1000));
        assert_eq!(cfg.agent.idle_timeout(), None);
        assert_eq!(cfg.chat.token_ttl_secs, 3600);
        assert_eq!(cfg.chat.default_channel_type, "messaging");
        assert_eq!(cfg.tools.search.max_results, 5);
        assert_eq!(cfg.app.shutdown_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_load_explicit_file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[agent]\nflush_interval_ms = 250\nidle_timeout_secs = 600\n\n[chat]\nbot_name = \"Helper\""
        )
        .unwrap();

        let cfg = load_config(Some(file.path().to_path_buf())).unwrap();
        assert_eq!(cfg.agent.flush_interval_ms, 250);
        assert_eq!(cfg.agent.idle_timeout(), Some(Duration::from_secs(600)));
        assert_eq!(cfg.chat.bot_name, "Helper");
        // 未出现的键保持默认
        assert_eq!(cfg.chat.token_ttl_secs, 3600);
    }
}
