//! 脚本化 Mock 客户端（用于测试，无需 API）
//!
//! 按顺序回放预设响应，并记录每次请求收到的消息与工具声明；脚本耗尽后可重复一条兜底响应。

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::llm::{LlmClient, LlmError, ToolDeclaration};
use crate::memory::Message;

/// 单次请求记录
#[derive(Clone, Debug)]
pub struct RecordedRequest {
    pub messages: Vec<Message>,
    pub tools: Vec<String>,
}

/// 脚本化客户端
#[derive(Debug, Default)]
pub struct ScriptedLlmClient {
    script: Mutex<VecDeque<Result<Message, LlmError>>>,
    fallback: Option<Message>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl ScriptedLlmClient {
    pub fn new(responses: Vec<Message>) -> Self {
        Self::with_results(responses.into_iter().map(Ok).collect())
    }

    pub fn with_results(results: Vec<Result<Message, LlmError>>) -> Self {
        Self {
            script: Mutex::new(results.into()),
            fallback: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// 每次都返回同一条响应（如永远请求工具的模型）
    pub fn repeating(response: Message) -> Self {
        Self {
            fallback: Some(response),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn complete(
        &self,
        messages: &[Message],
        tools: &[ToolDeclaration],
    ) -> Result<Message, LlmError> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(RecordedRequest {
                messages: messages.to_vec(),
                tools: tools.iter().map(|t| t.name.clone()).collect(),
            });
        }
        let next = self.script.lock().ok().and_then(|mut s| s.pop_front());
        match (next, &self.fallback) {
            (Some(result), _) => result,
            (None, Some(fallback)) => Ok(fallback.clone()),
            (None, None) => Err(LlmError::MalformedResponse(
                "scripted responses exhausted".to_string(),
            )),
        }
    }

    fn model_name(&self) -> &str {
        "scripted"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_replays_in_order_then_errors() {
        let client = ScriptedLlmClient::new(vec![Message::assistant("one"), Message::assistant("two")]);
        assert_eq!(client.complete(&[], &[]).await.unwrap().text(), "one");
        assert_eq!(client.complete(&[], &[]).await.unwrap().text(), "two");
        assert!(client.complete(&[], &[]).await.is_err());
        assert_eq!(client.calls(), 3);
    }

    #[tokio::test]
    async fn test_repeating_fallback() {
        let client = ScriptedLlmClient::repeating(Message::assistant("again"));
        for _ in 0..3 {
            assert_eq!(client.complete(&[], &[]).await.unwrap().text(), "again");
        }
    }
}
