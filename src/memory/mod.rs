//! 记忆层：对话历史、会话管理与持久化

pub mod conversation;
pub mod persistence;
pub mod session;

pub use conversation::{Conversation, Message, Role, ToolCall};
pub use persistence::{validate_session_id, SessionStore};
pub use session::{Session, SessionManager};
