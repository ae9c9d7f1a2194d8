// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Session Store (C7): durable conversation history backed by SQLite.

mod db;
pub mod budget;

pub use budget::{truncate_to_budget, BudgetedMessage};

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use tracing::instrument;
use uuid::Uuid;

use crate::error::{CoreError, Result};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "system" => Some(Role::System),
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub content: String,
    pub tokens: Option<u32>,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub id: String,
    pub model_name: String,
    pub created_at: String,
    pub updated_at: String,
    pub messages: Vec<Message>,
}

pub struct SessionStore {
    db: Mutex<Connection>,
}

impl SessionStore {
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        db::init_db(&conn)?;
        Ok(Self { db: Mutex::new(conn) })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        db::init_db(&conn)?;
        Ok(Self { db: Mutex::new(conn) })
    }

    #[instrument(skip(self))]
    pub fn create(&self, model_name: &str) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();
        let conn = self.db.lock().expect("session db lock poisoned");
        conn.execute(
            "INSERT INTO sessions (id, model_name, created_at, updated_at) VALUES (?1, ?2, ?3, ?3)",
            params![id, model_name, now],
        )?;
        Ok(id)
    }

    #[instrument(skip(self))]
    pub fn get_with_messages(&self, id: &str) -> Result<Session> {
        let conn = self.db.lock().expect("session db lock poisoned");
        let mut stmt = conn.prepare(
            "SELECT id, model_name, created_at, updated_at FROM sessions WHERE id = ?1",
        )?;
        let session = stmt
            .query_row(params![id], |row| {
                Ok(Session {
                    id: row.get(0)?,
                    model_name: row.get(1)?,
                    created_at: row.get(2)?,
                    updated_at: row.get(3)?,
                    messages: Vec::new(),
                })
            })
            .optional()?
            .ok_or_else(|| CoreError::SessionNotFound(id.to_string()))?;

        let messages = list_messages_locked(&conn, id)?;
        Ok(Session { messages, ..session })
    }

    pub fn session_exists(&self, id: &str) -> Result<bool> {
        let conn = self.db.lock().expect("session db lock poisoned");
        let exists: Option<i64> = conn
            .query_row("SELECT 1 FROM sessions WHERE id = ?1", params![id], |row| row.get(0))
            .optional()?;
        Ok(exists.is_some())
    }

    #[instrument(skip(self, content))]
    pub fn add_message(
        &self,
        session_id: &str,
        role: Role,
        content: &str,
        tokens: Option<u32>,
    ) -> Result<String> {
        let conn = self.db.lock().expect("session db lock poisoned");
        let exists: Option<i64> = conn
            .query_row("SELECT 1 FROM sessions WHERE id = ?1", params![session_id], |row| row.get(0))
            .optional()?;
        if exists.is_none() {
            return Err(CoreError::SessionNotFound(session_id.to_string()));
        }

        let id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO messages (id, session_id, role, content, tokens, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![id, session_id, role.as_str(), content, tokens, now],
        )?;
        conn.execute(
            "UPDATE sessions SET updated_at = ?1 WHERE id = ?2",
            params![now, session_id],
        )?;
        Ok(id)
    }

    pub fn list_messages(&self, session_id: &str) -> Result<Vec<Message>> {
        let conn = self.db.lock().expect("session db lock poisoned");
        list_messages_locked(&conn, session_id)
    }

    /// Delete sessions (and, via cascade, their messages) older than `days`. Returns the count
    /// of deleted sessions.
    pub fn delete_older_than(&self, days: u32) -> Result<usize> {
        let cutoff = Utc::now() - chrono::Duration::days(days as i64);
        let conn = self.db.lock().expect("session db lock poisoned");
        let deleted = conn.execute(
            "DELETE FROM sessions WHERE updated_at < ?1",
            params![cutoff.to_rfc3339()],
        )?;
        Ok(deleted)
    }
}

fn list_messages_locked(conn: &Connection, session_id: &str) -> Result<Vec<Message>> {
    let mut stmt = conn.prepare(
        "SELECT id, role, content, tokens, created_at FROM messages
         WHERE session_id = ?1 ORDER BY created_at ASC",
    )?;
    let rows = stmt.query_map(params![session_id], |row| {
        let role_str: String = row.get(1)?;
        Ok(Message {
            id: row.get(0)?,
            role: Role::from_str(&role_str).unwrap_or(Role::User),
            content: row.get(2)?,
            tokens: row.get(3)?,
            created_at: row.get(4)?,
        })
    })?;
    rows.collect::<std::result::Result<Vec<_>, _>>().map_err(CoreError::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_then_add_messages_round_trips() {
        let store = SessionStore::open_in_memory().unwrap();
        let id = store.create("test-llama").unwrap();
        store.add_message(&id, Role::User, "hi", None).unwrap();
        store.add_message(&id, Role::Assistant, "hello", Some(3)).unwrap();

        let session = store.get_with_messages(&id).unwrap();
        assert_eq!(session.messages.len(), 2);
        assert_eq!(session.messages[0].role, Role::User);
        assert_eq!(session.messages[1].content, "hello");
    }

    #[test]
    fn list_messages_is_monotonic_in_created_at() {
        let store = SessionStore::open_in_memory().unwrap();
        let id = store.create("m").unwrap();
        for i in 0..5 {
            store.add_message(&id, Role::User, &format!("msg {i}"), None).unwrap();
        }
        let messages = store.list_messages(&id).unwrap();
        for pair in messages.windows(2) {
            assert!(pair[0].created_at <= pair[1].created_at);
        }
    }

    #[test]
    fn unknown_session_is_not_found() {
        let store = SessionStore::open_in_memory().unwrap();
        let err = store.get_with_messages("missing").unwrap_err();
        assert!(matches!(err, CoreError::SessionNotFound(_)));
    }

    #[test]
    fn add_message_to_unknown_session_is_not_found() {
        let store = SessionStore::open_in_memory().unwrap();
        let err = store.add_message("missing", Role::User, "hi", None).unwrap_err();
        assert!(matches!(err, CoreError::SessionNotFound(_)));
    }
}
