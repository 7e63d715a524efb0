//! Message persistence adapter
//!
//! A chat message is persisted before it is broadcast; a record that was
//! not durably saved is never announced. Records are immutable once
//! created and this core never deletes them.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, MutexGuard};
use serde::Serialize;

use crate::auth::Identity;
use crate::error::Result;

/// A stored chat message, as embedded in `message` broadcast events
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    pub id: i64,
    pub user_id: i64,
    pub message: String,
    pub created_at: String,
    pub user: Identity,
}

/// Stores and loads chat messages
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Persist a message owned by `user`, returning the stored record
    async fn save(&self, user: &Identity, text: &str) -> Result<ChatMessage>;

    /// Load a page of recent messages, oldest-first for display
    ///
    /// `offset` counts back from the newest message, so `load_recent(50, 0)`
    /// is the latest page and `load_recent(50, 50)` the one before it.
    async fn load_recent(&self, limit: usize, offset: usize) -> Result<Vec<ChatMessage>>;
}

fn now_iso8601() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}

/// Shared handle to the SQLite database
///
/// Wraps a single `rusqlite` connection behind a mutex; every query is
/// short, so connections never queue for long.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<rusqlite::Connection>>,
}

impl Database {
    /// Open (and initialize) the database at `path`
    pub fn open(path: &str) -> Result<Self> {
        Self::init(rusqlite::Connection::open(path)?)
    }

    /// Open an in-memory database, for tests and ephemeral runs
    pub fn open_in_memory() -> Result<Self> {
        Self::init(rusqlite::Connection::open_in_memory()?)
    }

    fn init(conn: rusqlite::Connection) -> Result<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS users (
                 id INTEGER PRIMARY KEY AUTOINCREMENT,
                 name TEXT NOT NULL
             );
             CREATE TABLE IF NOT EXISTS access_tokens (
                 token TEXT PRIMARY KEY,
                 user_id INTEGER NOT NULL REFERENCES users(id)
             );
             CREATE TABLE IF NOT EXISTS messages (
                 id INTEGER PRIMARY KEY AUTOINCREMENT,
                 user_id INTEGER NOT NULL REFERENCES users(id),
                 message TEXT NOT NULL,
                 created_at TEXT NOT NULL
             );",
        )?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, rusqlite::Connection> {
        self.conn.lock()
    }

    /// Create a user, returning its id
    pub fn create_user(&self, name: &str) -> Result<i64> {
        let conn = self.lock();
        conn.execute("INSERT INTO users (name) VALUES (?1)", [name])?;
        Ok(conn.last_insert_rowid())
    }

    /// Associate a bearer token with a user
    pub fn issue_token(&self, user_id: i64, token: &str) -> Result<()> {
        self.lock().execute(
            "INSERT OR REPLACE INTO access_tokens (token, user_id) VALUES (?1, ?2)",
            rusqlite::params![token, user_id],
        )?;
        Ok(())
    }
}

/// SQLite-backed message store
pub struct SqliteStore {
    db: Database,
}

impl SqliteStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl MessageStore for SqliteStore {
    async fn save(&self, user: &Identity, text: &str) -> Result<ChatMessage> {
        let created_at = now_iso8601();
        let conn = self.db.lock();
        conn.execute(
            "INSERT INTO messages (user_id, message, created_at) VALUES (?1, ?2, ?3)",
            rusqlite::params![user.id, text, created_at],
        )?;
        Ok(ChatMessage {
            id: conn.last_insert_rowid(),
            user_id: user.id,
            message: text.to_string(),
            created_at,
            user: user.clone(),
        })
    }

    async fn load_recent(&self, limit: usize, offset: usize) -> Result<Vec<ChatMessage>> {
        let conn = self.db.lock();
        let mut stmt = conn.prepare(
            "SELECT m.id, m.user_id, m.message, m.created_at, u.name
             FROM messages m JOIN users u ON u.id = m.user_id
             ORDER BY m.id DESC LIMIT ?1 OFFSET ?2",
        )?;
        let mut page = stmt
            .query_map(rusqlite::params![limit as i64, offset as i64], |row| {
                let user_id: i64 = row.get(1)?;
                Ok(ChatMessage {
                    id: row.get(0)?,
                    user_id,
                    message: row.get(2)?,
                    created_at: row.get(3)?,
                    user: Identity {
                        id: user_id,
                        name: row.get(4)?,
                    },
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        // Query is newest-first; flip to oldest-first for display
        page.reverse();
        Ok(page)
    }
}

/// In-memory message store for tests and ephemeral runs
#[derive(Default)]
pub struct MemoryStore {
    messages: Mutex<Vec<ChatMessage>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored messages
    pub fn len(&self) -> usize {
        self.messages.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.lock().is_empty()
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn save(&self, user: &Identity, text: &str) -> Result<ChatMessage> {
        let mut messages = self.messages.lock();
        let record = ChatMessage {
            id: messages.len() as i64 + 1,
            user_id: user.id,
            message: text.to_string(),
            created_at: now_iso8601(),
            user: user.clone(),
        };
        messages.push(record.clone());
        Ok(record)
    }

    async fn load_recent(&self, limit: usize, offset: usize) -> Result<Vec<ChatMessage>> {
        let messages = self.messages.lock();
        let end = messages.len().saturating_sub(offset);
        let start = end.saturating_sub(limit);
        Ok(messages[start..end].to_vec())
    }
}

/// A store that refuses every write, for exercising persistence failures
#[cfg(test)]
pub(crate) struct FailingStore;

#[cfg(test)]
#[async_trait]
impl MessageStore for FailingStore {
    async fn save(&self, _user: &Identity, _text: &str) -> Result<ChatMessage> {
        Err(crate::error::Error::Storage("disk full".to_string()))
    }

    async fn load_recent(&self, _limit: usize, _offset: usize) -> Result<Vec<ChatMessage>> {
        Err(crate::error::Error::Storage("disk full".to_string()))
    }
}
