//! 核心层：错误类型与调度状态

pub mod error;
pub mod state;

pub use error::AgentError;
pub use state::{DispatchState, StopReason};
