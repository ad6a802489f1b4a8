//! Agent 错误类型
//!
//! 工具级错误（ToolNotFound / ToolExecutionFailed / ToolTimeout）在注册表与执行器内渲染为字符串，对话继续；
//! LLM 错误直接中止当前轮次。

use thiserror::Error;

use crate::llm::LlmError;

/// Agent 运行过程中可能出现的错误（工具、LLM、对话不变量、配置、路径逃逸等）
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Tool '{0}' not found")]
    ToolNotFound(String),

    #[error("Tool execution failed: {0}")]
    ToolExecutionFailed(String),

    #[error("Tool {tool} timed out after {secs}s")]
    ToolTimeout { tool: String, secs: u64 },

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    /// 违反对话不变量（如 Tool 结果 id 与上一条 Assistant 的调用不匹配）
    #[error("Transcript violation: {0}")]
    TranscriptViolation(String),

    #[error("Cancelled")]
    Cancelled,

    #[error("Config error: {0}")]
    ConfigError(String),

    #[error("Path escape attempt: {0}")]
    PathEscape(String),
}
