//! 调度循环状态定义
//!
//! AwaitingModel -> ExecutingTools -> AwaitingModel ... -> Done；
//! 轮次结束原因由 StopReason 区分（正常回复 / 达到往返上限）。

use serde::Serialize;

/// 单轮对话内调度循环所处阶段
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchState {
    /// 等待模型返回（新 User 消息追加后的初始状态）
    AwaitingModel,
    /// 正在按顺序执行模型请求的工具
    ExecutingTools,
    /// 终态
    Done,
}

impl DispatchState {
    /// 根据模型返回的工具调用数量决定下一状态
    pub fn after_model(tool_calls: usize) -> Self {
        if tool_calls == 0 {
            DispatchState::Done
        } else {
            DispatchState::ExecutingTools
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, DispatchState::Done)
    }
}

/// 轮次结束原因
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// 模型给出了不含工具调用的最终回复
    Completed,
    /// 达到最大往返次数，以诊断信息结束
    BudgetExceeded,
}
