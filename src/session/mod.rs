//! 会话存储
//!
//! 过期会话在每次查找时惰性清理，不需要后台线程。

use std::collections::{BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::memory::{ChatMessage, MessageRole};
use crate::orchestrator::Role;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("Session not found: {0}")]
    NotFound(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub id: String,
    pub messages: Vec<ChatMessage>,
    pub selected_role: Role,
    pub indexed_file_names: BTreeSet<String>,
    pub created_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
}

impl Session {
    fn new(id: &str, role: Role) -> Self {
        let now = Utc::now();
        Self {
            id: id.to_string(),
            messages: Vec::new(),
            selected_role: role,
            indexed_file_names: BTreeSet::new(),
            created_at: now,
            last_accessed: now,
        }
    }

    pub fn push_message(&mut self, role: MessageRole, content: impl Into<String>) {
        self.messages.push(ChatMessage::new(role, content));
    }
}

/// 会话表，所有读写都在同一把锁内完成
///
/// 会话id由调用方提供，这里不生成也不校验格式。
pub struct SessionStore {
    sessions: Mutex<HashMap<String, Session>>,
    timeout: Duration,
    default_role: Role,
}

impl SessionStore {
    pub fn new(timeout_minutes: i64, default_role: Role) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            timeout: Duration::minutes(timeout_minutes.max(1)),
            default_role,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Session>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn evict_expired(&self, sessions: &mut HashMap<String, Session>) -> usize {
        let now = Utc::now();
        let before = sessions.len();
        sessions.retain(|_, session| now - session.last_accessed <= self.timeout);
        let evicted = before - sessions.len();
        if evicted > 0 {
            debug!("🧹 清理了 {} 个过期会话", evicted);
        }
        evicted
    }

    /// 创建会话（已存在则重置），并顺带清理过期会话
    pub fn create_session(&self, id: &str) -> Session {
        let mut sessions = self.lock();
        self.evict_expired(&mut sessions);
        let session = Session::new(id, self.default_role);
        sessions.insert(id.to_string(), session.clone());
        session
    }

    /// 获取会话并刷新访问时间
    pub fn get_session(&self, id: &str) -> Result<Session, SessionError> {
        self.update(id, |session| session.clone())
    }

    pub fn get_or_create_session(&self, id: &str) -> Session {
        let mut sessions = self.lock();
        self.evict_expired(&mut sessions);
        let session = sessions
            .entry(id.to_string())
            .or_insert_with(|| Session::new(id, self.default_role));
        session.last_accessed = Utc::now();
        session.clone()
    }

    /// 在锁内修改会话；先刷新访问时间再执行`f`
    pub fn update<T>(&self, id: &str, f: impl FnOnce(&mut Session) -> T) -> Result<T, SessionError> {
        let mut sessions = self.lock();
        self.evict_expired(&mut sessions);
        let session = sessions
            .get_mut(id)
            .ok_or_else(|| SessionError::NotFound(id.to_string()))?;
        session.last_accessed = Utc::now();
        Ok(f(session))
    }

    pub fn delete_session(&self, id: &str) -> bool {
        self.lock().remove(id).is_some()
    }

    pub fn cleanup_expired(&self) -> usize {
        let mut sessions = self.lock();
        self.evict_expired(&mut sessions)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests;
