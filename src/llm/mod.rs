//! LLM 层：客户端抽象与实现（OpenAI 兼容 / 脚本化 Mock）

pub mod mock;
pub mod openai;
pub mod traits;

pub use mock::{RecordedRequest, ScriptedLlmClient};
pub use openai::{OpenAiClient, TokenUsage, OPENAI_BASE_URL};
pub use traits::{LlmClient, LlmError, ToolDeclaration};
