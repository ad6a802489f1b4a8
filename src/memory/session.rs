//! 会话管理
//!
//! SessionManager 按 id 持有 Arc<Mutex<Session>>：同一会话的轮次串行，不同会话互不影响。
//! 内存中最多保留 max_sessions 个会话，超出时淘汰最久未更新的（磁盘快照仍在，下次访问重新加载）。

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock};

use crate::memory::{Conversation, SessionStore};

/// 单个会话：id + 对话历史
#[derive(Clone, Debug)]
pub struct Session {
    pub id: String,
    pub conversation: Conversation,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn new(id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            conversation: Conversation::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// 多会话存储
pub struct SessionManager {
    sessions: RwLock<HashMap<String, Arc<Mutex<Session>>>>,
    store: Option<SessionStore>,
    max_sessions: usize,
}

impl SessionManager {
    pub fn new(store: Option<SessionStore>, max_sessions: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            store,
            max_sessions: max_sessions.max(1),
        }
    }

    /// 取得会话；内存中没有时先尝试从磁盘恢复，否则新建
    pub async fn get_or_create(&self, id: &str) -> Arc<Mutex<Session>> {
        if let Some(s) = self.sessions.read().await.get(id) {
            return Arc::clone(s);
        }
        let mut sessions = self.sessions.write().await;
        if let Some(s) = sessions.get(id) {
            return Arc::clone(s);
        }
        let session = self
            .store
            .as_ref()
            .and_then(|store| match store.load(id) {
                Ok(s) => s,
                Err(e) => {
                    tracing::warn!(session = %id, "failed to load session snapshot: {:#}", e);
                    None
                }
            })
            .unwrap_or_else(|| Session::new(id));
        let handle = Arc::new(Mutex::new(session));
        sessions.insert(id.to_string(), Arc::clone(&handle));
        Self::evict(&mut sessions, self.max_sessions, id);
        handle
    }

    /// 只读查找：内存或磁盘，不新建
    pub async fn find(&self, id: &str) -> Option<Session> {
        let handle = self.sessions.read().await.get(id).cloned();
        match handle {
            Some(h) => Some(h.lock().await.clone()),
            None => self.store.as_ref().and_then(|s| s.load(id).ok().flatten()),
        }
    }

    /// 持久化会话快照（失败只记日志，不影响本轮回复）
    pub fn persist(&self, session: &Session) {
        if let Some(store) = &self.store {
            if let Err(e) = store.save(session) {
                tracing::warn!(session = %session.id, "failed to save session: {:#}", e);
            }
        }
    }

    /// 清空会话历史（内存与磁盘）
    pub async fn clear(&self, id: &str) {
        // 先释放表锁再等会话锁：正在运行的轮次不能阻塞其他会话
        let removed = self.sessions.write().await.remove(id);
        if let Some(handle) = removed {
            handle.lock().await.conversation.clear();
        }
        if let Some(store) = &self.store {
            if let Err(e) = store.remove(id) {
                tracing::warn!(session = %id, "failed to remove session file: {:#}", e);
            }
        }
    }

    /// 内存与磁盘中的所有会话 id
    pub async fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.sessions.read().await.keys().cloned().collect();
        if let Some(store) = &self.store {
            ids.extend(store.list_ids());
        }
        ids.sort();
        ids.dedup();
        ids
    }

    pub async fn loaded(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// 超出上限时淘汰最久未更新的会话；正在运行轮次（锁被占用）的会话与刚插入的会话不淘汰
    fn evict(sessions: &mut HashMap<String, Arc<Mutex<Session>>>, max: usize, keep: &str) {
        while sessions.len() > max {
            let oldest = sessions
                .iter()
                .filter(|(id, _)| id.as_str() != keep)
                .filter_map(|(id, h)| h.try_lock().ok().map(|s| (id.clone(), s.updated_at)))
                .min_by_key(|(_, updated)| *updated)
                .map(|(id, _)| id);
            match oldest {
                Some(id) => {
                    tracing::debug!(session = %id, "evicting idle session from memory");
                    sessions.remove(&id);
                }
                None => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::Message;

    #[tokio::test]
    async fn test_sessions_are_isolated() {
        let manager = SessionManager::new(None, 10);
        let a = manager.get_or_create("a").await;
        let b = manager.get_or_create("b").await;
        a.lock().await.conversation.append(Message::user("hi")).unwrap();
        assert_eq!(a.lock().await.conversation.len(), 1);
        assert!(b.lock().await.conversation.is_empty());

        let again = manager.get_or_create("a").await;
        assert!(Arc::ptr_eq(&a, &again));
    }

    #[tokio::test]
    async fn test_evicts_oldest_and_reloads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let manager = SessionManager::new(Some(SessionStore::new(dir.path())), 2);

        let first = manager.get_or_create("first").await;
        {
            let mut s = first.lock().await;
            s.conversation.append(Message::user("保存我")).unwrap();
            s.conversation.append(Message::assistant("好的")).unwrap();
            s.touch();
            manager.persist(&s);
        }
        drop(first);
        manager.get_or_create("second").await.lock().await.touch();
        manager.get_or_create("third").await;
        assert_eq!(manager.loaded().await, 2);

        let restored = manager.get_or_create("first").await;
        assert_eq!(restored.lock().await.conversation.len(), 2);
    }

    #[tokio::test]
    async fn test_clear_removes_history() {
        let dir = tempfile::tempdir().unwrap();
        let manager = SessionManager::new(Some(SessionStore::new(dir.path())), 4);
        let s = manager.get_or_create("x").await;
        {
            let mut guard = s.lock().await;
            guard.conversation.append(Message::user("q")).unwrap();
            manager.persist(&guard);
        }
        manager.clear("x").await;
        assert!(manager.find("x").await.is_none());
        assert!(manager.get_or_create("x").await.lock().await.conversation.is_empty());
    }

    #[tokio::test]
    async fn test_clear_busy_session_does_not_block_others() {
        let manager = Arc::new(SessionManager::new(None, 10));
        let busy = manager.get_or_create("a").await;
        let guard = busy.lock().await;

        let clearing = {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move { manager.clear("a").await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let other = tokio::time::timeout(
            std::time::Duration::from_secs(2),
            manager.get_or_create("b"),
        )
        .await;
        assert!(other.is_ok());
        assert_eq!(manager.loaded().await, 1);

        drop(guard);
        clearing.await.unwrap();
        assert!(busy.lock().await.conversation.is_empty());
    }
}
