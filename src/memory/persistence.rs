//! 会话持久化
//!
//! 每个会话一个 JSON 文件（sessions_dir/<id>.json），重启后按 id 恢复。
//! 写入的是 User / Assistant / Tool 全量记录，System 提示词每轮由配置重建，不落盘。

use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::AgentError;
use crate::memory::{Conversation, Message, Session};

/// 会话 id 只允许字母、数字、`-`、`_`，避免拼接路径时逃逸出 sessions_dir
pub fn validate_session_id(id: &str) -> Result<(), AgentError> {
    let ok = !id.is_empty()
        && id.len() <= 128
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if ok {
        Ok(())
    } else {
        Err(AgentError::PathEscape(id.to_string()))
    }
}

/// 简单的文件持久化：一个会话一个 JSON
#[derive(Debug, Clone)]
pub struct SessionStore {
    dir: PathBuf,
}

impl SessionStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: &str) -> anyhow::Result<PathBuf> {
        validate_session_id(id)?;
        Ok(self.dir.join(format!("{}.json", id)))
    }

    /// 从 JSON 文件加载会话；文件不存在时返回 None
    pub fn load(&self, id: &str) -> anyhow::Result<Option<Session>> {
        let path = self.path_for(id)?;
        if !path.exists() {
            return Ok(None);
        }
        let data = std::fs::read_to_string(&path)
            .with_context(|| format!("reading {}", path.display()))?;
        let snapshot: SessionSnapshot = serde_json::from_str(&data)?;
        let conversation = Conversation::from_messages(snapshot.messages)?;
        Ok(Some(Session {
            id: id.to_string(),
            conversation,
            created_at: snapshot.created_at,
            updated_at: snapshot.updated_at,
        }))
    }

    /// 写入会话快照；目录不存在时自动创建
    pub fn save(&self, session: &Session) -> anyhow::Result<()> {
        let path = self.path_for(&session.id)?;
        std::fs::create_dir_all(&self.dir)?;
        let snapshot = SessionSnapshot {
            messages: session.conversation.snapshot().to_vec(),
            created_at: session.created_at,
            updated_at: session.updated_at,
        };
        std::fs::write(&path, serde_json::to_string_pretty(&snapshot)?)
            .with_context(|| format!("writing {}", path.display()))?;
        Ok(())
    }

    pub fn remove(&self, id: &str) -> anyhow::Result<()> {
        let path = self.path_for(id)?;
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }

    /// 磁盘上已有的会话 id
    pub fn list_ids(&self) -> Vec<String> {
        let Ok(entries) = std::fs::read_dir(&self.dir) else {
            return Vec::new();
        };
        let mut ids: Vec<String> = entries
            .filter_map(|e| e.ok())
            .filter_map(|e| {
                let name = e.file_name().to_string_lossy().to_string();
                name.strip_suffix(".json").map(String::from)
            })
            .filter(|id| validate_session_id(id).is_ok())
            .collect();
        ids.sort();
        ids
    }
}

#[derive(Serialize, Deserialize)]
struct SessionSnapshot {
    messages: Vec<Message>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}
