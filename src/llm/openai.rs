//! OpenAI 兼容 API 客户端
//!
//! 通过 reqwest 调用任意 OpenAI 兼容的 /chat/completions 端点（可配置 base_url），
//! 使用原生 tool calling：请求携带 tools 声明，响应中的 tool_calls 解析为 ToolCall。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::llm::{LlmClient, LlmError, ToolDeclaration};
use crate::memory::{Message, Role, ToolCall};

pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Token 使用统计（累计值）
#[derive(Debug, Clone, Default)]
pub struct TokenUsage {
    pub prompt_tokens: Arc<AtomicU64>,
    pub completion_tokens: Arc<AtomicU64>,
    pub total_tokens: Arc<AtomicU64>,
}

impl TokenUsage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, prompt: u64, completion: u64) {
        self.prompt_tokens.fetch_add(prompt, Ordering::Relaxed);
        self.completion_tokens.fetch_add(completion, Ordering::Relaxed);
        self.total_tokens.fetch_add(prompt + completion, Ordering::Relaxed);
    }

    pub fn get(&self) -> (u64, u64, u64) {
        (
            self.prompt_tokens.load(Ordering::Relaxed),
            self.completion_tokens.load(Ordering::Relaxed),
            self.total_tokens.load(Ordering::Relaxed),
        )
    }
}

/// OpenAI 兼容客户端：持有 HTTP Client、端点、模型名与温度
pub struct OpenAiClient {
    http: reqwest::Client,
    chat_url: String,
    api_key: String,
    model: String,
    temperature: Option<f32>,
    /// 累计 token 使用统计
    pub usage: TokenUsage,
}

impl OpenAiClient {
    pub fn new(
        base_url: Option<&str>,
        model: &str,
        api_key: &str,
        temperature: Option<f32>,
        timeout_secs: u64,
    ) -> Self {
        let base = base_url.unwrap_or(OPENAI_BASE_URL).trim_end_matches('/');
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs.max(1)))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            http,
            chat_url: format!("{}/chat/completions", base),
            api_key: api_key.to_string(),
            model: model.to_string(),
            temperature,
            usage: TokenUsage::new(),
        }
    }

    fn build_request<'a>(
        &'a self,
        messages: &[Message],
        tools: &'a [ToolDeclaration],
    ) -> ChatRequest<'a> {
        ChatRequest {
            model: &self.model,
            messages: messages.iter().map(to_wire_message).collect(),
            tools: tools
                .iter()
                .map(|t| WireTool {
                    kind: "function",
                    function: WireFunction {
                        name: &t.name,
                        description: &t.description,
                        parameters: &t.parameters,
                    },
                })
                .collect(),
            temperature: self.temperature,
        }
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    fn token_usage(&self) -> (u64, u64, u64) {
        self.usage.get()
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(
        &self,
        messages: &[Message],
        tools: &[ToolDeclaration],
    ) -> Result<Message, LlmError> {
        let request = self.build_request(messages, tools);

        let response = self
            .http
            .post(&self.chat_url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::Network(format!("request timeout: {e}"))
                } else if e.is_connect() {
                    LlmError::Network(format!("connection failed: {e}"))
                } else {
                    LlmError::Network(format!("request failed: {e}"))
                }
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| LlmError::Network(format!("failed to read response: {e}")))?;

        if !status.is_success() {
            return Err(classify_http_error(status.as_u16(), &body));
        }

        let parsed: ChatResponse = serde_json::from_str(&body)
            .map_err(|e| LlmError::MalformedResponse(format!("{e} - body: {body}")))?;

        if let Some(usage) = &parsed.usage {
            self.usage.add(usage.prompt_tokens, usage.completion_tokens);
        }

        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::MalformedResponse("response has no choices".to_string()))?;
        Ok(from_wire_message(choice.message))
    }
}

/// 将非 2xx 响应映射为 LlmError；优先使用 {"error": {"message": ...}} 中的说明
fn classify_http_error(status: u16, body: &str) -> LlmError {
    let message = serde_json::from_str::<ErrorResponse>(body)
        .map(|e| e.error.message)
        .unwrap_or_else(|_| body.to_string());
    match status {
        401 | 403 => LlmError::Auth(message),
        429 => LlmError::RateLimited(message),
        400 | 404 | 422 => LlmError::InvalidRequest(message),
        500..=599 => LlmError::Server(message),
        _ => LlmError::Network(format!("HTTP {status}: {message}")),
    }
}

fn to_wire_message(m: &Message) -> WireMessage {
    let tool_calls = if m.has_tool_calls() {
        Some(
            m.tool_calls
                .iter()
                .map(|c| WireToolCall {
                    id: c.id.clone(),
                    kind: "function".to_string(),
                    function: WireFunctionCall {
                        name: c.name.clone(),
                        arguments: Value::Object(c.arguments.clone()).to_string(),
                    },
                })
                .collect(),
        )
    } else {
        None
    };
    WireMessage {
        role: m.role.as_str().to_string(),
        content: m.content.clone(),
        tool_calls,
        tool_call_id: m.tool_call_id.clone(),
    }
}

/// 响应消息转为 Assistant Message：有工具调用时空文本视为无文本；无工具调用时保证有文本
fn from_wire_message(wire: WireMessage) -> Message {
    let mut tool_calls: Vec<ToolCall> = wire
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .map(|c| ToolCall {
            arguments: parse_tool_arguments(&c.function.name, &c.function.arguments),
            id: c.id,
            name: c.function.name,
        })
        .collect();
    dedupe_tool_call_ids(&mut tool_calls);
    if tool_calls.is_empty() {
        Message::assistant(wire.content.unwrap_or_default())
    } else {
        let content = wire.content.filter(|c| !c.trim().is_empty());
        Message::assistant_with_tools(content, tool_calls)
    }
}

/// 部分兼容后端会给出空的或重复的调用 id；改写为 `call_<序号>`，保证结果能一一配对
fn dedupe_tool_call_ids(calls: &mut [ToolCall]) {
    let mut seen: Vec<String> = Vec::with_capacity(calls.len());
    for (index, call) in calls.iter_mut().enumerate() {
        if call.id.is_empty() || seen.contains(&call.id) {
            let mut fresh = format!("call_{}", index);
            while seen.contains(&fresh) {
                fresh.push('_');
            }
            tracing::warn!(tool = %call.name, "replacing tool call id '{}' with '{}'", call.id, fresh);
            call.id = fresh;
        }
        seen.push(call.id.clone());
    }
}

/// 模型以 JSON 字符串给出参数；空串或非对象按无参数处理
pub(crate) fn parse_tool_arguments(tool: &str, raw: &str) -> Map<String, Value> {
    if raw.trim().is_empty() {
        return Map::new();
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => map,
        Ok(other) => {
            tracing::warn!(tool = %tool, "tool arguments are not an object: {}", other);
            Map::new()
        }
        Err(e) => {
            tracing::warn!(tool = %tool, "unparsable tool arguments: {}", e);
            Map::new()
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<WireTool<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireMessage {
    role: String,
    #[serde(default)]
    content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<WireToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct WireTool<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    function: WireFunction<'a>,
}

#[derive(Debug, Serialize)]
struct WireFunction<'a> {
    name: &'a str,
    description: &'a str,
    parameters: &'a Value,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireToolCall {
    #[serde(default)]
    id: String,
    #[serde(rename = "type", default = "function_kind")]
    kind: String,
    function: WireFunctionCall,
}

fn function_kind() -> String {
    "function".to_string()
}

#[derive(Debug, Serialize, Deserialize)]
struct WireFunctionCall {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: WireMessage,
}

#[derive(Debug, Deserialize)]
struct Usage {
    prompt_tokens: u64,
    completion_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}
