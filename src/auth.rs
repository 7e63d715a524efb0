//! Token authentication adapter
//!
//! The core consumes a narrow capability: resolve a bearer token into an
//! identity, or reject it. Token issuance and user registration live
//! outside this crate; `SqliteAuth` reads the token table they maintain,
//! and `StaticTokens` backs tests and local runs.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use rusqlite::OptionalExtension;
use serde::Serialize;

use crate::store::Database;

/// The authenticated user principal attached to a connection
///
/// Immutable once attached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Identity {
    pub id: i64,
    pub name: String,
}

/// Resolves a bearer token into an identity
#[async_trait]
pub trait TokenValidator: Send + Sync {
    /// Returns `None` for unknown or revoked tokens
    async fn validate(&self, token: &str) -> Option<Identity>;
}

/// In-memory token table
///
/// Used by tests and the demo server path where no database is configured.
#[derive(Debug, Default)]
pub struct StaticTokens {
    tokens: RwLock<HashMap<String, Identity>>,
}

impl StaticTokens {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a token → identity mapping
    pub fn insert(&self, token: impl Into<String>, identity: Identity) {
        self.tokens.write().insert(token.into(), identity);
    }

    /// Builder-style variant of [`insert`](Self::insert)
    pub fn with_token(self, token: impl Into<String>, identity: Identity) -> Self {
        self.insert(token, identity);
        self
    }
}

#[async_trait]
impl TokenValidator for StaticTokens {
    async fn validate(&self, token: &str) -> Option<Identity> {
        self.tokens.read().get(token).cloned()
    }
}

/// Token lookup over the shared SQLite database
pub struct SqliteAuth {
    db: Database,
}

impl SqliteAuth {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl TokenValidator for SqliteAuth {
    async fn validate(&self, token: &str) -> Option<Identity> {
        let conn = self.db.lock();
        conn.query_row(
            "SELECT u.id, u.name FROM access_tokens t \
             JOIN users u ON u.id = t.user_id WHERE t.token = ?1",
            [token],
            |row| {
                Ok(Identity {
                    id: row.get(0)?,
                    name: row.get(1)?,
                })
            },
        )
        .optional()
        .ok()
        .flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_tokens() {
        let auth = StaticTokens::new().with_token(
            "T",
            Identity {
                id: 1,
                name: "Alice".to_string(),
            },
        );

        let identity = auth.validate("T").await.unwrap();
        assert_eq!(identity.id, 1);
        assert_eq!(identity.name, "Alice");
        assert!(auth.validate("bogus").await.is_none());
    }

    #[tokio::test]
    async fn test_sqlite_auth() {
        let db = Database::open_in_memory().unwrap();
        let user_id = db.create_user("Alice").unwrap();
        db.issue_token(user_id, "tok-1").unwrap();

        let auth = SqliteAuth::new(db);
        let identity = auth.validate("tok-1").await.unwrap();
        assert_eq!(identity.name, "Alice");
        assert!(auth.validate("tok-2").await.is_none());
    }
}
