//! 工具注册表
//!
//! 所有工具实现 Tool trait（name / description / parameters_schema / execute），由 ToolRegistry 按名注册与查找。
//! invoke 永不失败：未知工具与工具内部错误都会渲染为以 ❌ 开头的字符串，作为工具结果交还模型。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::core::AgentError;
use crate::llm::ToolDeclaration;

/// 工具 trait：名称、描述（供 LLM 理解）、参数 schema、异步执行（args 为 JSON）
#[async_trait]
pub trait Tool: Send + Sync {
    /// 工具名称（注册表内唯一）
    fn name(&self) -> &str;

    /// 工具描述（供 LLM 理解功能）
    fn description(&self) -> &str;

    /// 参数 JSON Schema；默认无参数
    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {},
            "required": []
        })
    }

    /// 执行工具；Err 中的字符串会被渲染为 `❌ Error running <name>: <msg>`
    async fn execute(&self, args: Value) -> Result<String, String>;
}

/// 工具注册表：按名称存储 Arc<dyn Tool>，保留注册顺序
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    order: Vec<String>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册工具；同名工具会被替换
    pub fn register(&mut self, tool: impl Tool + 'static) {
        let name = tool.name().to_string();
        if self.tools.insert(name.clone(), Arc::new(tool)).is_some() {
            tracing::warn!(tool = %name, "tool registered twice, replacing");
        } else {
            self.order.push(name);
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// 执行工具，错误以 AgentError 返回（供执行器加超时与审计）
    pub async fn execute(&self, name: &str, args: Value) -> Result<String, AgentError> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| AgentError::ToolNotFound(name.to_string()))?;
        tool.execute(args).await.map_err(AgentError::ToolExecutionFailed)
    }

    /// 执行工具并总是返回文本结果
    pub async fn invoke(&self, name: &str, args: Value) -> String {
        match self.execute(name, args).await {
            Ok(output) => output,
            Err(e) => render_tool_error(name, &e),
        }
    }

    /// 按注册顺序返回工具名
    pub fn tool_names(&self) -> Vec<String> {
        self.order.clone()
    }

    /// 返回 (name, description) 列表
    pub fn tool_descriptions(&self) -> Vec<(String, String)> {
        self.order
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|tool| (tool.name().to_string(), tool.description().to_string()))
            .collect()
    }

    /// 生成发给模型的工具声明
    pub fn declarations(&self) -> Vec<ToolDeclaration> {
        self.order
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|tool| ToolDeclaration {
                name: tool.name().to_string(),
                description: tool.description().to_string(),
                parameters: tool.parameters_schema(),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// 工具错误的文本形式（作为 Tool 结果写回对话）
pub fn render_tool_error(name: &str, err: &AgentError) -> String {
    match err {
        AgentError::ToolNotFound(missing) => format!("❌ Tool '{}' not found.", missing),
        AgentError::ToolExecutionFailed(msg) => format!("❌ Error running {}: {}", name, msg),
        AgentError::ToolTimeout { secs, .. } => {
            format!("❌ Error running {}: timed out after {}s", name, secs)
        }
        other => format!("❌ Error running {}: {}", name, other),
    }
}
