//! 调度层：单轮对话的模型-工具往返循环与过程事件

pub mod events;
pub mod loop_;

pub use events::DispatchEvent;
pub use loop_::{
    budget_exceeded_message, run_turn, TurnContext, TurnOutcome, DEFAULT_MAX_ROUND_TRIPS,
};
