//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `DATATALK__*` 覆盖（双下划线表示嵌套，如 `DATATALK__LLM__MODEL=gpt-4o-mini`）。

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::core::AgentError;

pub const MISSING_API_KEY: &str = "❌ Missing OPENAI_API_KEY";

/// 未提供提示词文件时使用的系统提示词
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a friendly, modern data analysis assistant. You can explore CSV datasets, describe their contents, and safely execute Python code for analysis or visualization.";

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub agent: AgentSection,
    pub tools: ToolsSection,
    pub web: WebSection,
}

/// [app] 段：数据目录、会话目录、历史与会话上限
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppSection {
    /// CSV 数据目录（启动时创建）
    pub data_dir: PathBuf,
    /// 会话快照目录；未设置时会话只保存在内存中
    pub sessions_dir: Option<PathBuf>,
    /// 每个会话保留的最近轮数，0 表示不限制
    pub max_turns: usize,
    /// 内存中最多保留的会话数
    pub max_sessions: usize,
    /// 直接给出的系统提示词；未设置时读取 config/prompts/system.md
    pub system_prompt: Option<String>,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            sessions_dir: None,
            max_turns: 20,
            max_sessions: 100,
            system_prompt: None,
        }
    }
}

/// [llm] 段：OpenAI 兼容接口
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    pub model: String,
    pub base_url: Option<String>,
    pub temperature: Option<f32>,
    /// 未设置时读取环境变量 OPENAI_API_KEY
    pub api_key: Option<String>,
    pub request_timeout_secs: u64,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            model: "gpt-4o".to_string(),
            base_url: None,
            temperature: Some(0.3),
            api_key: None,
            request_timeout_secs: 60,
        }
    }
}

/// [agent] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentSection {
    /// 单轮内最多的工具往返次数
    pub max_round_trips: usize,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            max_round_trips: 10,
        }
    }
}

/// [tools] 段：工具超时与数据集预览参数
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToolsSection {
    /// 单次工具调用超时（秒）
    pub tool_timeout_secs: u64,
    pub preview_rows: usize,
    /// 列数超过此值时 describe_dataset 附带每列类型
    pub column_info_threshold: usize,
    pub code: CodeSection,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            tool_timeout_secs: 60,
            preview_rows: 5,
            column_info_threshold: 5,
            code: CodeSection::default(),
        }
    }
}

/// [tools.code] 段：run_code 工具
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CodeSection {
    /// 是否注册 run_code（可执行任意代码，无沙箱）
    pub allow_unsafe_exec: bool,
    pub python: String,
    pub timeout_secs: u64,
}

impl Default for CodeSection {
    fn default() -> Self {
        Self {
            allow_unsafe_exec: false,
            python: "python3".to_string(),
            timeout_secs: 30,
        }
    }
}

/// [web] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WebSection {
    pub host: String,
    pub port: u16,
}

impl Default for WebSection {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 7860,
        }
    }
}

impl AppConfig {
    /// 解析 API Key：llm.api_key 优先，其次环境变量 OPENAI_API_KEY；都没有时报错
    pub fn require_api_key(&self) -> Result<String, AgentError> {
        self.llm
            .api_key
            .clone()
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .ok_or_else(|| AgentError::ConfigError(MISSING_API_KEY.to_string()))
    }

    /// 系统提示词：app.system_prompt，其次 config/prompts/system.md，最后内置默认值
    pub fn system_prompt(&self) -> String {
        if let Some(p) = self.app.system_prompt.as_ref().filter(|p| !p.trim().is_empty()) {
            return p.trim().to_string();
        }
        ["config/prompts/system.md", "../config/prompts/system.md"]
            .into_iter()
            .find_map(|p| std::fs::read_to_string(p).ok())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string())
    }
}

/// 从 config 目录加载配置，环境变量 DATATALK__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 DATATALK__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<&Path>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("DATATALK")
            .separator("__")
            .try_parsing(true),
    );

    builder.build()?.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.llm.model, "gpt-4o");
        assert_eq!(cfg.llm.temperature, Some(0.3));
        assert_eq!(cfg.agent.max_round_trips, 10);
        assert_eq!(cfg.web.port, 7860);
        assert_eq!(cfg.app.data_dir, PathBuf::from("data"));
        assert_eq!(cfg.tools.preview_rows, 5);
        assert!(!cfg.tools.code.allow_unsafe_exec);
    }

    #[test]
    fn test_explicit_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        std::fs::write(
            &path,
            "[agent]\nmax_round_trips = 3\n\n[tools.code]\nallow_unsafe_exec = true\n\n[web]\nport = 9000\n",
        )
        .unwrap();
        let cfg = load_config(Some(&path)).unwrap();
        assert_eq!(cfg.agent.max_round_trips, 3);
        assert!(cfg.tools.code.allow_unsafe_exec);
        assert_eq!(cfg.tools.code.python, "python3");
        assert_eq!(cfg.web.port, 9000);
    }

    #[test]
    fn test_api_key_from_config() {
        let mut cfg = AppConfig::default();
        cfg.llm.api_key = Some("  sk-test ".to_string());
        assert_eq!(cfg.require_api_key().unwrap(), "sk-test");
    }

    #[test]
    fn test_inline_system_prompt_wins() {
        let mut cfg = AppConfig::default();
        cfg.app.system_prompt = Some("Be brief.".to_string());
        assert_eq!(cfg.system_prompt(), "Be brief.");
    }
}
