//! SQLite implementation of the persistence adapter.
//!
//! rusqlite is synchronous — every call goes through
//! `tokio::task::spawn_blocking` and holds the connection mutex only for the
//! duration of the statement.

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::adapter::{Adapter, IdentitySnapshot, MessageRecord, NotificationRecord};
use crate::db::DbPool;
use crate::error::AdapterError;

pub struct SqliteAdapter {
    db: DbPool,
}

impl SqliteAdapter {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }
}

fn lock_error<T>(_: T) -> AdapterError {
    AdapterError::Database("database connection poisoned".to_string())
}

fn db_error(e: rusqlite::Error) -> AdapterError {
    match e {
        rusqlite::Error::QueryReturnedNoRows => AdapterError::NotFound,
        other => AdapterError::Database(other.to_string()),
    }
}

fn join_error(e: tokio::task::JoinError) -> AdapterError {
    AdapterError::Database(e.to_string())
}

#[async_trait]
impl Adapter for SqliteAdapter {
    async fn create_notification(
        &self,
        recipient_id: &str,
        kind: &str,
        title: &str,
        message: &str,
        data: serde_json::Value,
    ) -> Result<NotificationRecord, AdapterError> {
        let record = NotificationRecord {
            id: Uuid::new_v4().to_string(),
            user_id: recipient_id.to_string(),
            kind: kind.to_string(),
            title: title.to_string(),
            message: message.to_string(),
            data,
            read: false,
            created_at: Utc::now(),
        };

        let db = self.db.clone();
        let row = record.clone();
        tokio::task::spawn_blocking(move || {
            let conn = db.lock().map_err(lock_error)?;
            conn.execute(
                "INSERT INTO notifications (id, user_id, type, title, message, data, read, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                rusqlite::params![
                    row.id,
                    row.user_id,
                    row.kind,
                    row.title,
                    row.message,
                    row.data.to_string(),
                    row.read,
                    row.created_at.to_rfc3339(),
                ],
            )
            .map_err(db_error)?;
            Ok(())
        })
        .await
        .map_err(join_error)??;

        Ok(record)
    }

    async fn create_message(
        &self,
        sender_id: &str,
        receiver_id: &str,
        conversation_id: &str,
        content: &str,
    ) -> Result<MessageRecord, AdapterError> {
        let record = MessageRecord {
            id: Uuid::new_v4().to_string(),
            content: content.to_string(),
            sender_id: sender_id.to_string(),
            receiver_id: receiver_id.to_string(),
            conversation_id: conversation_id.to_string(),
            created_at: Utc::now(),
        };

        let db = self.db.clone();
        let row = record.clone();
        tokio::task::spawn_blocking(move || {
            let conn = db.lock().map_err(lock_error)?;
            conn.execute(
                "INSERT INTO messages (id, content, sender_id, receiver_id, conversation_id, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![
                    row.id,
                    row.content,
                    row.sender_id,
                    row.receiver_id,
                    row.conversation_id,
                    row.created_at.to_rfc3339(),
                ],
            )
            .map_err(db_error)?;
            Ok(())
        })
        .await
        .map_err(join_error)??;

        Ok(record)
    }

    async fn get_identity(&self, identity_id: &str) -> Result<IdentitySnapshot, AdapterError> {
        let db = self.db.clone();
        let id = identity_id.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = db.lock().map_err(lock_error)?;
            conn.query_row(
                "SELECT id, username, full_name, avatar_url FROM users WHERE id = ?1",
                rusqlite::params![id],
                |row| {
                    Ok(IdentitySnapshot {
                        id: row.get(0)?,
                        username: row.get(1)?,
                        full_name: row.get(2)?,
                        avatar_url: row.get(3)?,
                    })
                },
            )
            .map_err(db_error)
        })
        .await
        .map_err(join_error)?
    }
}
