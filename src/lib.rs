//! datatalk - 与 CSV 数据对话的智能体
//!
//! 模块划分：
//! - **agent**: 无头 Agent 运行时（供终端 REPL / HTTP 调用）
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误类型与调度状态
//! - **dispatch**: 单轮调度循环（模型 ⇄ 工具往返）与过程事件
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / 脚本化 Mock）
//! - **memory**: 对话历史、会话管理与持久化
//! - **presentation**: 聊天界面渲染
//! - **tools**: 数据集工具、代码执行工具、注册表与执行器

pub mod agent;
pub mod config;
pub mod core;
pub mod dispatch;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod presentation;
pub mod tools;

pub use agent::{create_agent_components, AgentComponents};
pub use config::{load_config, AppConfig};
pub use core::{AgentError, StopReason};
