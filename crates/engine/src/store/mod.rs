pub mod sqlite;

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use anyhow::Result;
use async_trait::async_trait;
use colloquy_shared::Message;

pub use sqlite::SqliteStore;

/// Durable record of every message a conversation produces.
///
/// Writes for one session arrive in order and are never revisited.
#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn save_message(&self, session_id: &str, message: &Message) -> Result<()>;

    async fn load_messages(&self, session_id: &str) -> Result<Vec<Message>>;
}

/// Process-local store for tests and throwaway runs.
#[derive(Default)]
pub struct MemoryStore {
    sessions: Mutex<HashMap<String, Vec<Message>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn save_message(&self, session_id: &str, message: &Message) -> Result<()> {
        let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        let messages = sessions.entry(session_id.to_string()).or_default();
        if messages.iter().any(|m| m.id == message.id) {
            anyhow::bail!("Message {} already stored", message.id);
        }
        messages.push(message.clone());
        Ok(())
    }

    async fn load_messages(&self, session_id: &str) -> Result<Vec<Message>> {
        let sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(sessions.get(session_id).cloned().unwrap_or_default())
    }
}
