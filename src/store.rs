use crate::constants::{SESSION_STORAGE_KEY, SESSION_TITLE_MAX_CHARS};
use crate::str_utils;
use crate::types::{now_ms, Message, MessageId, Result, Session};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

/// Key-value persistence seam for session metadata. The host environment
/// decides where the bytes live (browser storage, a file, nothing).
pub trait SessionStore: Send + Sync {
    fn load(&self, key: &str) -> Result<Option<String>>;
    fn save(&self, key: &str, value: &str) -> Result<()>;
}

/// In-process store; the default for tests and embedded use.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for MemoryStore {
    fn load(&self, key: &str) -> Result<Option<String>> {
        let map = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        Ok(map.get(key).cloned())
    }

    fn save(&self, key: &str, value: &str) -> Result<()> {
        let mut map = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        map.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// The message list for the current conversation. Owned by the engine and
/// mutated only through its callbacks.
#[derive(Default)]
pub struct Conversation {
    messages: Vec<Message>,
}

impl Conversation {
    pub fn push(&mut self, message: Message) -> MessageId {
        let id = message.id.clone();
        self.messages.push(message);
        id
    }

    pub fn update<F>(&mut self, id: &MessageId, mutate: F) -> bool
    where
        F: FnOnce(&mut Message),
    {
        match self.messages.iter_mut().find(|m| &m.id == id) {
            Some(message) => {
                mutate(message);
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, id: &MessageId) -> Option<Message> {
        let idx = self.messages.iter().position(|m| &m.id == id)?;
        Some(self.messages.remove(idx))
    }

    pub fn get(&self, id: &MessageId) -> Option<&Message> {
        self.messages.iter().find(|m| &m.id == id)
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }
}

/// Session titles derive from the first query of the conversation.
pub fn generate_session_title(query: &str) -> String {
    str_utils::truncate_with_ellipsis(query.trim(), SESSION_TITLE_MAX_CHARS)
}

/// Saved-session index, persisted as JSON through the key-value seam. Newest
/// sessions sit first.
pub struct SessionIndex {
    sessions: Vec<Session>,
    store: Arc<dyn SessionStore>,
}

impl SessionIndex {
    pub fn load(store: Arc<dyn SessionStore>) -> Self {
        let sessions = match store.load(SESSION_STORAGE_KEY) {
            Ok(Some(raw)) => match serde_json::from_str(&raw) {
                Ok(sessions) => sessions,
                Err(e) => {
                    tracing::warn!("Discarding unreadable session index: {}", e);
                    Vec::new()
                }
            },
            Ok(None) => Vec::new(),
            Err(e) => {
                tracing::warn!("Failed to load session index: {}", e);
                Vec::new()
            }
        };
        Self { sessions, store }
    }

    pub fn sessions(&self) -> &[Session] {
        &self.sessions
    }

    pub fn get(&self, session_id: &str) -> Option<&Session> {
        self.sessions.iter().find(|s| s.session_id == session_id)
    }

    pub fn create(&mut self, session_id: &str, query: &str, message_count: usize) {
        let now = now_ms();
        self.sessions.insert(
            0,
            Session {
                session_id: session_id.to_string(),
                title: generate_session_title(query),
                created_at: now,
                last_accessed: now,
                message_count,
            },
        );
        self.persist();
    }

    pub fn touch(&mut self, session_id: &str, message_count: usize) -> bool {
        match self
            .sessions
            .iter_mut()
            .find(|s| s.session_id == session_id)
        {
            Some(session) => {
                session.last_accessed = now_ms();
                session.message_count = message_count;
                self.persist();
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, session_id: &str) {
        self.sessions.retain(|s| s.session_id != session_id);
        self.persist();
    }

    fn persist(&self) {
        match serde_json::to_string(&self.sessions) {
            Ok(raw) => {
                if let Err(e) = self.store.save(SESSION_STORAGE_KEY, &raw) {
                    tracing::warn!("Failed to persist session index: {}", e);
                }
            }
            Err(e) => tracing::warn!("Failed to encode session index: {}", e),
        }
    }
}

pub(crate) fn lock_or_recover<'a, T>(mutex: &'a Mutex<T>) -> MutexGuard<'a, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
