//! 调度主循环
//!
//! User -> 模型 -> (按顺序执行工具 -> 模型)* -> 最终回复。
//! 每次调用模型前检查取消与往返上限；达到上限时以诊断信息结束本轮。
//! 一次工具往返的 Assistant 消息与全部 Tool 结果在工具执行完后一并追加，
//! 因此本轮被中途丢弃时对话历史中不会残留未答复的工具调用。

use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

use crate::core::{AgentError, DispatchState, StopReason};
use crate::dispatch::DispatchEvent;
use crate::llm::LlmClient;
use crate::memory::{Conversation, Message};
use crate::tools::ToolExecutor;

/// 默认最大工具往返次数
pub const DEFAULT_MAX_ROUND_TRIPS: usize = 10;
/// ToolResult 事件预览最大字符数
const RESULT_PREVIEW_CHARS: usize = 300;

/// 达到往返上限时的诊断回复
pub fn budget_exceeded_message(round_trips: usize) -> String {
    format!(
        "⚠️ Stopped after {} tool round-trips without a final answer.",
        round_trips
    )
}

/// 单轮执行结果
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    /// 最终回复（模型文本或诊断信息）
    pub reply: String,
    pub stop: StopReason,
    /// 实际完成的工具往返次数
    pub round_trips: usize,
    /// 本轮追加到对话中的消息（含 User）
    pub new_messages: Vec<Message>,
}

/// 单轮调度所需的依赖
pub struct TurnContext<'a> {
    /// 模型网关（必需）
    pub llm: &'a dyn LlmClient,
    /// 工具执行器（必需）
    pub executor: &'a ToolExecutor,
    /// 系统提示词，每次调用模型时置于最前
    pub system_prompt: &'a str,
    pub max_round_trips: usize,
    pub cancel_token: CancellationToken,
    /// 可选：事件推送通道
    pub event_tx: Option<&'a UnboundedSender<DispatchEvent>>,
}

impl<'a> TurnContext<'a> {
    pub fn new(llm: &'a dyn LlmClient, executor: &'a ToolExecutor, system_prompt: &'a str) -> Self {
        Self {
            llm,
            executor,
            system_prompt,
            max_round_trips: DEFAULT_MAX_ROUND_TRIPS,
            cancel_token: CancellationToken::new(),
            event_tx: None,
        }
    }

    pub fn with_max_round_trips(mut self, max: usize) -> Self {
        self.max_round_trips = max;
        self
    }

    pub fn with_cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel_token = token;
        self
    }

    pub fn with_event_tx(mut self, tx: &'a UnboundedSender<DispatchEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    fn send(&self, ev: DispatchEvent) {
        if let Some(tx) = self.event_tx {
            let _ = tx.send(ev);
        }
    }

    fn fail(&self, err: AgentError) -> AgentError {
        self.send(DispatchEvent::Error {
            text: err.to_string(),
        });
        err
    }
}

/// 执行一轮对话：追加用户消息并驱动模型与工具，直到得到最终回复或达到往返上限
///
/// 模型调用失败时返回 `AgentError::Llm`，已追加的 User 消息保留在对话中。
pub async fn run_turn(
    ctx: &TurnContext<'_>,
    conversation: &mut Conversation,
    user_input: &str,
) -> Result<TurnOutcome, AgentError> {
    let start = conversation.len();
    conversation
        .append(Message::user(user_input))
        .map_err(|e| ctx.fail(e))?;

    let declarations = ctx.executor.declarations();
    let (init_prompt, init_completion, _) = ctx.llm.token_usage();
    let mut state = DispatchState::AwaitingModel;
    let mut round_trips = 0usize;
    let mut reply = String::new();
    let mut stop = StopReason::Completed;

    while !state.is_terminal() {
        if ctx.cancel_token.is_cancelled() {
            return Err(ctx.fail(AgentError::Cancelled));
        }
        if round_trips >= ctx.max_round_trips {
            tracing::warn!(round_trips, "round-trip cap reached");
            reply = budget_exceeded_message(round_trips);
            conversation
                .append(Message::assistant(reply.clone()))
                .map_err(|e| ctx.fail(e))?;
            stop = StopReason::BudgetExceeded;
            break;
        }

        ctx.send(DispatchEvent::RoundTrip {
            round_trip: round_trips,
            max_round_trips: ctx.max_round_trips,
        });
        ctx.send(DispatchEvent::Thinking);

        let mut request = Vec::with_capacity(conversation.len() + 1);
        request.push(Message::system(ctx.system_prompt));
        request.extend_from_slice(conversation.snapshot());

        let response = tokio::select! {
            _ = ctx.cancel_token.cancelled() => return Err(ctx.fail(AgentError::Cancelled)),
            r = ctx.llm.complete(&request, &declarations) => r,
        };
        let response = match response {
            Ok(m) => m,
            Err(e) => {
                tracing::error!(error = %e, "model call failed");
                return Err(ctx.fail(AgentError::Llm(e)));
            }
        };

        if !response.text().is_empty() {
            ctx.send(DispatchEvent::AssistantText {
                text: response.text().to_string(),
            });
        }

        state = DispatchState::after_model(response.tool_calls.len());
        match state {
            DispatchState::ExecutingTools => {
                // id 无法配对时不执行任何工具，历史停在本轮 User 消息
                response.check_tool_call_ids().map_err(|e| ctx.fail(e))?;
                let mut results = Vec::with_capacity(response.tool_calls.len());
                for call in &response.tool_calls {
                    ctx.send(DispatchEvent::ToolCall {
                        id: call.id.clone(),
                        tool: call.name.clone(),
                        args: call.arguments_value(),
                    });
                    let output = ctx.executor.invoke(&call.name, call.arguments_value()).await;
                    ctx.send(DispatchEvent::ToolResult {
                        id: call.id.clone(),
                        tool: call.name.clone(),
                        preview: preview(&output),
                    });
                    results.push(Message::tool_result(call.id.clone(), output));
                }
                conversation.append(response).map_err(|e| ctx.fail(e))?;
                for result in results {
                    conversation.append(result).map_err(|e| ctx.fail(e))?;
                }
                round_trips += 1;
                state = DispatchState::AwaitingModel;
            }
            _ => {
                reply = response.text().to_string();
                if response.content.is_some() {
                    conversation.append(response).map_err(|e| ctx.fail(e))?;
                } else {
                    // 空回复不入历史，展示层给出兜底文案
                    tracing::warn!("model returned neither text nor tool calls");
                }
            }
        }
    }

    let (cur_prompt, cur_completion, cur_total) = ctx.llm.token_usage();
    let prompt_tokens = cur_prompt.saturating_sub(init_prompt);
    let completion_tokens = cur_completion.saturating_sub(init_completion);
    ctx.send(DispatchEvent::TokenUsage {
        prompt_tokens,
        completion_tokens,
        total_tokens: prompt_tokens + completion_tokens,
        cumulative_prompt: cur_prompt,
        cumulative_completion: cur_completion,
        cumulative_total: cur_total,
    });
    ctx.send(DispatchEvent::Done {
        reply: reply.clone(),
        stop,
        round_trips,
    });
    tracing::info!(round_trips, stop = ?stop, "turn finished");

    Ok(TurnOutcome {
        reply,
        stop,
        round_trips,
        new_messages: conversation.snapshot()[start..].to_vec(),
    })
}

fn preview(output: &str) -> String {
    if output.chars().count() > RESULT_PREVIEW_CHARS {
        let head: String = output.chars().take(RESULT_PREVIEW_CHARS).collect();
        format!("{}...", head)
    } else {
        output.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ScriptedLlmClient;
    use crate::memory::ToolCall;
    use crate::tools::{Tool, ToolRegistry};
    use async_trait::async_trait;
    use serde_json::Value;

    struct CountRows;

    #[async_trait]
    impl Tool for CountRows {
        fn name(&self) -> &str {
            "count_rows"
        }

        fn description(&self) -> &str {
            "Count rows"
        }

        async fn execute(&self, _args: Value) -> Result<String, String> {
            Ok("3".to_string())
        }
    }

    fn executor() -> ToolExecutor {
        let mut registry = ToolRegistry::new();
        registry.register(CountRows);
        ToolExecutor::new(registry, 5)
    }

    fn call(id: &str) -> Message {
        Message::assistant_with_tools(
            None,
            vec![ToolCall::new(id, "count_rows", serde_json::json!({}))],
        )
    }

    #[tokio::test]
    async fn test_direct_answer() {
        let llm = ScriptedLlmClient::new(vec![Message::assistant("hello")]);
        let exec = executor();
        let ctx = TurnContext::new(&llm, &exec, "sys");
        let mut conv = Conversation::new();

        let out = run_turn(&ctx, &mut conv, "hi").await.unwrap();
        assert_eq!(out.reply, "hello");
        assert_eq!(out.stop, StopReason::Completed);
        assert_eq!(out.round_trips, 0);
        assert_eq!(out.new_messages.len(), 2);

        // 系统提示词只出现在请求里，不进入历史
        let requests = llm.requests();
        let req = &requests[0];
        assert_eq!(req.messages[0], Message::system("sys"));
        assert_eq!(req.tools, vec!["count_rows"]);
        assert_eq!(conv.len(), 2);
    }

    #[tokio::test]
    async fn test_events_follow_tool_round_trip() {
        let llm = ScriptedLlmClient::new(vec![call("c1"), Message::assistant("3 rows")]);
        let exec = executor();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let ctx = TurnContext::new(&llm, &exec, "sys").with_event_tx(&tx);
        let mut conv = Conversation::new();

        let out = run_turn(&ctx, &mut conv, "how many?").await.unwrap();
        assert_eq!(out.round_trips, 1);
        drop(tx);

        let mut kinds = Vec::new();
        while let Some(ev) = rx.recv().await {
            kinds.push(serde_json::to_value(&ev).unwrap()["type"].as_str().unwrap().to_string());
        }
        assert_eq!(
            kinds,
            vec![
                "round_trip",
                "thinking",
                "tool_call",
                "tool_result",
                "round_trip",
                "thinking",
                "assistant_text",
                "token_usage",
                "done"
            ]
        );
    }

    #[tokio::test]
    async fn test_cancelled_before_model_call() {
        let llm = ScriptedLlmClient::new(vec![Message::assistant("never")]);
        let exec = executor();
        let token = CancellationToken::new();
        token.cancel();
        let ctx = TurnContext::new(&llm, &exec, "sys").with_cancel_token(token);
        let mut conv = Conversation::new();

        let err = run_turn(&ctx, &mut conv, "hi").await.unwrap_err();
        assert!(matches!(err, AgentError::Cancelled));
        assert_eq!(llm.calls(), 0);
        assert_eq!(conv.len(), 1);
    }

    #[tokio::test]
    async fn test_zero_cap_stops_immediately() {
        let llm = ScriptedLlmClient::repeating(call("c"));
        let exec = executor();
        let ctx = TurnContext::new(&llm, &exec, "sys").with_max_round_trips(0);
        let mut conv = Conversation::new();

        let out = run_turn(&ctx, &mut conv, "loop").await.unwrap();
        assert_eq!(out.stop, StopReason::BudgetExceeded);
        assert_eq!(out.reply, budget_exceeded_message(0));
        assert_eq!(llm.calls(), 0);
    }

    #[tokio::test]
    async fn test_repeated_call_ids_abort_before_tools_run() {
        let llm = ScriptedLlmClient::new(vec![Message::assistant_with_tools(
            None,
            vec![
                ToolCall::new("", "count_rows", serde_json::json!({})),
                ToolCall::new("", "count_rows", serde_json::json!({})),
            ],
        )]);
        let executor = executor();
        let ctx = TurnContext::new(&llm, &executor, "sys");
        let mut conv = Conversation::new();

        let err = run_turn(&ctx, &mut conv, "rows?").await.unwrap_err();
        assert!(matches!(err, AgentError::TranscriptViolation(_)));
        assert_eq!(conv.snapshot().to_vec(), vec![Message::user("rows?")]);
        assert!(conv.outstanding_tool_calls().is_empty());

        // 历史仍然合法，下一轮照常进行
        let llm = ScriptedLlmClient::new(vec![Message::assistant("3 rows")]);
        let ctx = TurnContext::new(&llm, &executor, "sys");
        assert_eq!(run_turn(&ctx, &mut conv, "again").await.unwrap().reply, "3 rows");
    }

    #[test]
    fn test_preview_truncates() {
        let long = "a".repeat(400);
        assert_eq!(preview(&long).chars().count(), RESULT_PREVIEW_CHARS + 3);
        assert_eq!(preview("short"), "short");
    }
}
