//! 对话状态：只追加的消息序列
//!
//! Message 对应一条对话记录（System / User / Assistant / Tool）。Conversation 只提供 append 与 snapshot，
//! append 时校验工具结果与上一条 Assistant 发出的调用一一对应。

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::core::AgentError;

/// 消息角色（与 LLM API 一致）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }
}

/// 模型发起的一次工具调用；id 由模型服务端分配，Tool 结果需原样回传
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub arguments: Map<String, Value>,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        let arguments = match arguments {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }

    pub fn arguments_value(&self) -> Value {
        Value::Object(self.arguments.clone())
    }
}

/// 单条消息
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    /// Assistant 仅发起工具调用时可为空
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    fn plain(role: Role, content: String) -> Self {
        Self {
            role,
            content: Some(content),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(Role::System, content.into())
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(Role::User, content.into())
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain(Role::Assistant, content.into())
    }

    pub fn assistant_with_tools(content: Option<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            role: Role::Assistant,
            content,
            tool_calls,
            tool_call_id: None,
        }
    }

    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: Some(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: Some(tool_call_id.into()),
        }
    }

    /// 文本内容，无内容时为空串
    pub fn text(&self) -> &str {
        self.content.as_deref().unwrap_or("")
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }

    /// 工具调用 id 必须非空且互不相同，否则结果无法一一配对
    pub fn check_tool_call_ids(&self) -> Result<(), AgentError> {
        let mut seen: Vec<&str> = Vec::with_capacity(self.tool_calls.len());
        for call in &self.tool_calls {
            if call.id.is_empty() {
                return Err(AgentError::TranscriptViolation(format!(
                    "tool invocation '{}' has an empty id",
                    call.name
                )));
            }
            if seen.contains(&call.id.as_str()) {
                return Err(AgentError::TranscriptViolation(format!(
                    "duplicate tool invocation id '{}'",
                    call.id
                )));
            }
            seen.push(&call.id);
        }
        Ok(())
    }
}

/// 只追加的对话历史
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Conversation {
    messages: Vec<Message>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    /// 从已有消息重建（如磁盘快照），逐条校验
    pub fn from_messages(messages: Vec<Message>) -> Result<Self, AgentError> {
        let mut conversation = Self::new();
        for m in messages {
            conversation.append(m)?;
        }
        Ok(conversation)
    }

    /// 追加一条消息；违反工具调用配对规则时拒绝
    pub fn append(&mut self, message: Message) -> Result<(), AgentError> {
        let outstanding = self.outstanding_tool_calls();
        match message.role {
            Role::Tool => {
                let id = message.tool_call_id.as_deref().ok_or_else(|| {
                    AgentError::TranscriptViolation("tool result without tool_call_id".to_string())
                })?;
                if !outstanding.iter().any(|o| *o == id) {
                    return Err(AgentError::TranscriptViolation(format!(
                        "tool result '{}' does not answer an outstanding invocation",
                        id
                    )));
                }
            }
            Role::System if !self.messages.is_empty() => {
                return Err(AgentError::TranscriptViolation(
                    "system entry is only allowed first".to_string(),
                ));
            }
            _ => {
                if !outstanding.is_empty() {
                    return Err(AgentError::TranscriptViolation(format!(
                        "{} tool invocation(s) still awaiting results",
                        outstanding.len()
                    )));
                }
                if message.role == Role::Assistant
                    && message.content.is_none()
                    && message.tool_calls.is_empty()
                {
                    return Err(AgentError::TranscriptViolation(
                        "assistant entry has neither content nor tool calls".to_string(),
                    ));
                }
                message.check_tool_call_ids()?;
            }
        }
        self.messages.push(message);
        Ok(())
    }

    pub fn snapshot(&self) -> &[Message] {
        &self.messages
    }

    /// 最近一条 Assistant 发出、尚未收到 Tool 结果的调用 id（按模型列出的顺序）
    pub fn outstanding_tool_calls(&self) -> Vec<&str> {
        let mut answered: Vec<&str> = Vec::new();
        for m in self.messages.iter().rev() {
            match m.role {
                Role::Tool => {
                    if let Some(id) = m.tool_call_id.as_deref() {
                        answered.push(id);
                    }
                }
                Role::Assistant => {
                    return m
                        .tool_calls
                        .iter()
                        .map(|c| c.id.as_str())
                        .filter(|id| !answered.contains(id))
                        .collect();
                }
                _ => return Vec::new(),
            }
        }
        Vec::new()
    }

    /// 轮数（按 User 消息计）
    pub fn turns(&self) -> usize {
        self.messages.iter().filter(|m| m.role == Role::User).count()
    }

    /// 仅保留最近 max_turns 轮；总是在 User 边界处截断，工具配对不会被拆开。0 表示不限制。
    pub fn prune_turns(&mut self, max_turns: usize) -> usize {
        if max_turns == 0 {
            return 0;
        }
        let user_positions: Vec<usize> = self
            .messages
            .iter()
            .enumerate()
            .filter(|(_, m)| m.role == Role::User)
            .map(|(i, _)| i)
            .collect();
        if user_positions.len() <= max_turns {
            return 0;
        }
        let cut = user_positions[user_positions.len() - max_turns];
        self.messages.drain(..cut);
        cut
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn call(id: &str, name: &str) -> ToolCall {
        ToolCall::new(id, name, json!({}))
    }

    #[test]
    fn test_tool_results_pair_with_invocations() {
        let mut c = Conversation::new();
        c.append(Message::user("列出数据集")).unwrap();
        c.append(Message::assistant_with_tools(
            None,
            vec![call("call_1", "list_datasets"), call("call_2", "describe_dataset")],
        ))
        .unwrap();
        assert_eq!(c.outstanding_tool_calls(), vec!["call_1", "call_2"]);

        c.append(Message::tool_result("call_1", "ok")).unwrap();
        assert_eq!(c.outstanding_tool_calls(), vec!["call_2"]);
        c.append(Message::tool_result("call_2", "ok")).unwrap();
        assert!(c.outstanding_tool_calls().is_empty());

        c.append(Message::assistant("done")).unwrap();
        assert_eq!(c.len(), 5);
    }

    #[test]
    fn test_rejects_unknown_or_duplicate_tool_result() {
        let mut c = Conversation::new();
        c.append(Message::user("hi")).unwrap();
        assert!(c.append(Message::tool_result("call_x", "orphan")).is_err());

        c.append(Message::assistant_with_tools(None, vec![call("call_1", "list_datasets")]))
            .unwrap();
        assert!(c.append(Message::tool_result("call_9", "wrong id")).is_err());
        c.append(Message::tool_result("call_1", "ok")).unwrap();
        assert!(c.append(Message::tool_result("call_1", "again")).is_err());
    }

    #[test]
    fn test_rejects_entries_while_invocations_outstanding() {
        let mut c = Conversation::new();
        c.append(Message::user("hi")).unwrap();
        c.append(Message::assistant_with_tools(None, vec![call("call_1", "run_code")]))
            .unwrap();
        let err = c.append(Message::user("next")).unwrap_err();
        assert!(matches!(err, AgentError::TranscriptViolation(_)));
    }

    #[test]
    fn test_rejects_empty_assistant() {
        let mut c = Conversation::new();
        let empty = Message::assistant_with_tools(None, vec![]);
        assert!(c.append(empty).is_err());
    }

    #[test]
    fn test_rejects_empty_or_repeated_invocation_ids() {
        let mut c = Conversation::new();
        c.append(Message::user("hi")).unwrap();
        let blank = Message::assistant_with_tools(
            None,
            vec![call("", "list_datasets"), call("", "list_datasets")],
        );
        assert!(matches!(
            blank.check_tool_call_ids(),
            Err(AgentError::TranscriptViolation(_))
        ));
        assert!(c.append(blank).is_err());

        let repeated = Message::assistant_with_tools(
            None,
            vec![call("call_1", "list_datasets"), call("call_1", "describe_dataset")],
        );
        assert!(c.append(repeated).is_err());
        assert_eq!(c.len(), 1);
        assert!(c.outstanding_tool_calls().is_empty());
    }

    #[test]
    fn test_system_entry_only_first() {
        let mut c = Conversation::new();
        c.append(Message::system("prompt")).unwrap();
        c.append(Message::user("hi")).unwrap();
        let err = c.append(Message::system("again")).unwrap_err();
        assert!(matches!(err, AgentError::TranscriptViolation(_)));
        assert_eq!(c.len(), 2);
    }

    #[test]
    fn test_prune_keeps_whole_turns() {
        let mut c = Conversation::new();
        for i in 0..3 {
            c.append(Message::user(format!("q{}", i))).unwrap();
            c.append(Message::assistant_with_tools(
                None,
                vec![call(&format!("call_{}", i), "list_datasets")],
            ))
            .unwrap();
            c.append(Message::tool_result(format!("call_{}", i), "r")).unwrap();
            c.append(Message::assistant(format!("a{}", i))).unwrap();
        }
        assert_eq!(c.turns(), 3);
        let removed = c.prune_turns(2);
        assert_eq!(removed, 4);
        assert_eq!(c.turns(), 2);
        assert_eq!(c.snapshot()[0], Message::user("q1"));
        assert_eq!(c.prune_turns(0), 0);
    }

    #[test]
    fn test_from_messages_validates() {
        let ok = Conversation::from_messages(vec![Message::user("a"), Message::assistant("b")]);
        assert!(ok.is_ok());
        let bad = Conversation::from_messages(vec![Message::tool_result("call_1", "x")]);
        assert!(bad.is_err());
    }

    #[test]
    fn test_message_serialization_skips_empty_fields() {
        let v = serde_json::to_value(Message::user("hello")).unwrap();
        assert_eq!(v, json!({"role": "user", "content": "hello"}));
        let back: Message = serde_json::from_value(v).unwrap();
        assert_eq!(back, Message::user("hello"));
    }
}
