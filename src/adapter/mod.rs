//! Notification Persistence Adapter — the boundary to the relational store.
//!
//! The real-time core never mutates durable state directly; it calls the
//! adapter to create notification/message rows and to resolve identities at
//! authentication time. The trait object seam lets tests inject recording or
//! failing fakes in place of SQLite.

pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AdapterError;

/// Display attributes of an identity, fetched once at authenticate time and
/// cached in the Connection Registry for the life of the connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentitySnapshot {
    pub id: String,
    pub username: String,
    pub full_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}

/// Persisted notification row. The real-time layer only announces creation;
/// the read flag is mutated elsewhere by recipient action.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationRecord {
    pub id: String,
    pub user_id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub title: String,
    pub message: String,
    pub data: serde_json::Value,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

/// Persisted direct message row.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRecord {
    pub id: String,
    pub content: String,
    pub sender_id: String,
    pub receiver_id: String,
    pub conversation_id: String,
    pub created_at: DateTime<Utc>,
}

/// External collaborator interface: durable writes plus identity lookup.
#[async_trait]
pub trait Adapter: Send + Sync {
    async fn create_notification(
        &self,
        recipient_id: &str,
        kind: &str,
        title: &str,
        message: &str,
        data: serde_json::Value,
    ) -> Result<NotificationRecord, AdapterError>;

    async fn create_message(
        &self,
        sender_id: &str,
        receiver_id: &str,
        conversation_id: &str,
        content: &str,
    ) -> Result<MessageRecord, AdapterError>;

    async fn get_identity(&self, identity_id: &str) -> Result<IdentitySnapshot, AdapterError>;
}
