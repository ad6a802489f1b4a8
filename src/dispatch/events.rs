//! 调度过程事件：用于流式展示模型回复、工具调用与工具结果

use serde::Serialize;

use crate::core::StopReason;

/// 单步过程事件（可序列化为 JSON 供前端展示）
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DispatchEvent {
    /// 第几次工具往返（从 0 开始）
    RoundTrip {
        round_trip: usize,
        max_round_trips: usize,
    },
    /// 正在等待模型
    Thinking,
    /// 模型给出的文本（可能与工具调用同时出现）
    AssistantText { text: String },
    /// 调用工具
    ToolCall {
        id: String,
        tool: String,
        args: serde_json::Value,
    },
    /// 工具返回（预览，避免过长）
    ToolResult {
        id: String,
        tool: String,
        preview: String,
    },
    /// Token 使用统计（本轮增量 + 累计）
    TokenUsage {
        prompt_tokens: u64,
        completion_tokens: u64,
        total_tokens: u64,
        cumulative_prompt: u64,
        cumulative_completion: u64,
        cumulative_total: u64,
    },
    /// 轮次结束
    Done {
        reply: String,
        stop: StopReason,
        round_trips: usize,
    },
    /// 错误
    Error { text: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_events_are_tagged() {
        let ev = DispatchEvent::ToolCall {
            id: "call_1".to_string(),
            tool: "describe_dataset".to_string(),
            args: serde_json::json!({"filename": "a.csv"}),
        };
        let v = serde_json::to_value(&ev).unwrap();
        assert_eq!(v["type"], "tool_call");
        assert_eq!(v["args"]["filename"], "a.csv");

        let done = DispatchEvent::Done {
            reply: "ok".to_string(),
            stop: StopReason::BudgetExceeded,
            round_trips: 10,
        };
        let v = serde_json::to_value(&done).unwrap();
        assert_eq!(v["type"], "done");
        assert_eq!(v["stop"], "budget_exceeded");
        assert_eq!(serde_json::to_value(DispatchEvent::Thinking).unwrap()["type"], "thinking");
    }
}
