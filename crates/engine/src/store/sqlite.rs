use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use colloquy_shared::{Message, Role, ToolCall};
use rusqlite::{params, Connection};

use super::MessageStore;

#[derive(Clone)]
pub struct SqliteStore {
    db: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let conn = Connection::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
        Self::init(conn)
    }

    pub fn in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        // Wait up to 5 seconds if the database is locked
        conn.busy_timeout(Duration::from_secs(5))?;
        Self::create_tables(&conn)?;

        Ok(Self {
            db: Arc::new(Mutex::new(conn)),
        })
    }

    /// Runs `work` against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, work: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || {
            let conn = db.lock().map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;
            work(&conn)
        })
        .await
        .context("Database task panicked")?
    }

    fn create_tables(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS messages (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                session_id TEXT NOT NULL,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                think TEXT,
                tool_calls TEXT,
                tool_call_id TEXT,
                parent_id TEXT,
                timestamp INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_messages_session ON messages(session_id, seq);
            ",
        )?;
        Ok(())
    }
}

#[async_trait]
impl MessageStore for SqliteStore {
    async fn save_message(&self, session_id: &str, message: &Message) -> Result<()> {
        let session_id = session_id.to_string();
        let message = message.clone();
        self.with_conn(move |conn| insert_message(conn, &session_id, &message)).await
    }

    async fn load_messages(&self, session_id: &str) -> Result<Vec<Message>> {
        let session_id = session_id.to_string();
        self.with_conn(move |conn| select_messages(conn, &session_id)).await
    }
}

fn insert_message(conn: &Connection, session_id: &str, message: &Message) -> Result<()> {
    let tool_calls = message
        .tool_calls
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;

    conn.execute(
        "INSERT INTO messages (id, session_id, role, content, think, tool_calls, tool_call_id, parent_id, timestamp)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            message.id,
            session_id,
            message.role.as_str(),
            message.content,
            message.think,
            tool_calls,
            message.tool_call_id,
            message.parent_id,
            message.timestamp,
        ],
    )
    .with_context(|| format!("Failed to insert message {}", message.id))?;
    Ok(())
}

fn select_messages(conn: &Connection, session_id: &str) -> Result<Vec<Message>> {
    let mut stmt = conn.prepare(
        "SELECT id, timestamp, role, content, think, tool_calls, tool_call_id, parent_id
         FROM messages WHERE session_id = ?1 ORDER BY seq",
    )?;

    let rows = stmt.query_map(params![session_id], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, i64>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, String>(3)?,
            row.get::<_, Option<String>>(4)?,
            row.get::<_, Option<String>>(5)?,
            row.get::<_, Option<String>>(6)?,
            row.get::<_, Option<String>>(7)?,
        ))
    })?;

    let mut messages = Vec::new();
    for row in rows {
        let (id, timestamp, role, content, think, tool_calls, tool_call_id, parent_id) = row?;
        let role = Role::parse(&role).with_context(|| format!("Unknown role '{}' on message {}", role, id))?;
        let tool_calls = tool_calls
            .map(|raw| serde_json::from_str::<Vec<ToolCall>>(&raw))
            .transpose()
            .with_context(|| format!("Corrupt tool calls on message {}", id))?;

        messages.push(Message {
            id,
            timestamp,
            role,
            content,
            think,
            tool_calls,
            tool_call_id,
            parent_id,
        });
    }
    Ok(messages)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn messages_round_trip_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("chat.db");

        let mut args = serde_json::Map::new();
        args.insert("path".into(), json!("notes.txt"));
        let call = ToolCall::new("FileSmith::read_file", args);
        let assistant = Message::assistant("", Some("need the file".into()))
            .with_tool_calls(vec![call.clone()])
            .with_parent(Some("root".into()));

        {
            let store = SqliteStore::open(&path).unwrap();
            store.save_message("s1", &Message::user("read it")).await.unwrap();
            store.save_message("s1", &assistant).await.unwrap();
            store.save_message("s1", &Message::tool(&call.id, "hello")).await.unwrap();
            store.save_message("s2", &Message::user("elsewhere")).await.unwrap();
        }

        let store = SqliteStore::open(&path).unwrap();
        let messages = store.load_messages("s1").await.unwrap();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[1], assistant);
        assert_eq!(messages[2].tool_call_id.as_deref(), Some(call.id.as_str()));
        assert_eq!(messages[0].role, Role::User);
    }

    #[tokio::test]
    async fn stored_messages_are_immutable() {
        let store = SqliteStore::in_memory().unwrap();
        let message = Message::user("hi");
        store.save_message("s", &message).await.unwrap();
        assert!(store.save_message("s", &message).await.is_err());
        assert_eq!(store.load_messages("s").await.unwrap(), vec![message]);
    }

    #[tokio::test]
    async fn concurrent_writers_share_one_connection() {
        let store = SqliteStore::in_memory().unwrap();
        let writes = (0..16).map(|i| {
            let store = store.clone();
            tokio::spawn(async move { store.save_message("s", &Message::user(format!("m{}", i))).await })
        });
        for write in futures_util::future::join_all(writes).await {
            write.unwrap().unwrap();
        }
        assert_eq!(store.load_messages("s").await.unwrap().len(), 16);
    }
}
