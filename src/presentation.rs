//! 展示适配：把一轮对话中新增的消息渲染为聊天界面上的一段 Markdown
//!
//! 工具调用显示为工具名 + YAML 参数块，工具结果显示在 `📈 Result` 标题下，各段之间空一行。

use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::agent::{process_message, AgentComponents};
use crate::core::AgentError;
use crate::memory::{Conversation, Message, Role, Session, ToolCall};

pub const EMPTY_REPLY: &str = "🤔 I couldn’t generate a response.";

/// 聊天界面上的一条消息
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HistoryPair {
    pub role: String,
    pub content: String,
}

impl HistoryPair {
    fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role: role.as_str().to_string(),
            content: content.into(),
        }
    }
}

/// 工具参数的 YAML 文本
fn args_yaml(call: &ToolCall) -> String {
    match serde_yaml::to_string(&call.arguments_value()) {
        Ok(s) => s.trim_end().to_string(),
        Err(_) => Value::Object(call.arguments.clone()).to_string(),
    }
}

/// 渲染一轮中新增的消息；User 消息不显示
pub fn render_turn(messages: &[Message]) -> String {
    let mut parts = Vec::new();
    for m in messages {
        match m.role {
            Role::Assistant => {
                let text = m.text().trim();
                if !text.is_empty() {
                    parts.push(text.to_string());
                }
                for call in &m.tool_calls {
                    parts.push(format!(
                        "**⚙️ Tool Used: {}**\n\n```yaml\n{}\n```",
                        call.name,
                        args_yaml(call)
                    ));
                }
            }
            Role::Tool => parts.push(format!("**📈 Result:**\n{}", m.text())),
            Role::User | Role::System => {}
        }
    }
    if parts.is_empty() {
        EMPTY_REPLY.to_string()
    } else {
        parts.join("\n\n")
    }
}

/// 由对话历史重建界面消息：每轮一条用户消息 + 一条渲染后的助手消息
pub fn display_history(conversation: &Conversation) -> Vec<HistoryPair> {
    let mut history = Vec::new();
    let mut turn: Vec<Message> = Vec::new();
    let flush = |turn: &mut Vec<Message>, history: &mut Vec<HistoryPair>| {
        if !turn.is_empty() {
            history.push(HistoryPair::new(Role::Assistant, render_turn(turn)));
            turn.clear();
        }
    };
    for m in conversation.snapshot() {
        if m.role == Role::User {
            flush(&mut turn, &mut history);
            history.push(HistoryPair::new(Role::User, m.text()));
        } else {
            turn.push(m.clone());
        }
    }
    flush(&mut turn, &mut history);
    history
}

/// 处理一次界面输入：空输入直接返回当前历史；否则跑一轮并返回 (本轮展示文本, 完整界面历史)
pub async fn interact(
    components: &AgentComponents,
    session: &mut Session,
    user_input: &str,
    cancel_token: CancellationToken,
) -> Result<(String, Vec<HistoryPair>), AgentError> {
    let input = user_input.trim();
    if input.is_empty() {
        return Ok((String::new(), display_history(&session.conversation)));
    }
    let outcome = process_message(components, session, input, cancel_token).await?;
    let display = render_turn(&outcome.new_messages);
    Ok((display, display_history(&session.conversation)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn describe_call() -> Message {
        Message::assistant_with_tools(
            None,
            vec![ToolCall::new(
                "c1",
                "describe_dataset",
                serde_json::json!({"filename": "sales.csv"}),
            )],
        )
    }

    #[test]
    fn test_render_tool_round_trip() {
        let messages = vec![
            Message::user("describe sales"),
            describe_call(),
            Message::tool_result("c1", "📊 **Dataset:** `sales.csv`"),
            Message::assistant("It has 3 rows."),
        ];
        assert_eq!(
            render_turn(&messages),
            "**⚙️ Tool Used: describe_dataset**\n\n```yaml\nfilename: sales.csv\n```\n\n\
             **📈 Result:**\n📊 **Dataset:** `sales.csv`\n\n\
             It has 3 rows."
        );
    }

    #[test]
    fn test_render_empty_turn() {
        assert_eq!(render_turn(&[]), EMPTY_REPLY);
        assert_eq!(render_turn(&[Message::user("hi")]), EMPTY_REPLY);
    }

    #[test]
    fn test_empty_arguments_render_as_empty_mapping() {
        let call = ToolCall::new("c", "list_datasets", serde_json::json!({}));
        assert_eq!(args_yaml(&call), "{}");
    }

    #[test]
    fn test_display_history_pairs_turns() {
        let conv = Conversation::from_messages(vec![
            Message::user("first"),
            Message::assistant("one"),
            Message::user("second"),
            describe_call(),
            Message::tool_result("c1", "ok"),
            Message::assistant("two"),
            Message::user("third"),
        ])
        .unwrap();
        let history = display_history(&conv);
        let roles: Vec<&str> = history.iter().map(|h| h.role.as_str()).collect();
        assert_eq!(roles, vec!["user", "assistant", "user", "assistant", "user"]);
        assert_eq!(history[1].content, "one");
        assert!(history[3].content.starts_with("**⚙️ Tool Used: describe_dataset**"));
        assert!(history[3].content.ends_with("two"));
    }
}
