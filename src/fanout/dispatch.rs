//! Event Dispatcher: translate domain events into a durable write plus a
//! room-scoped broadcast.
//!
//! Every event follows the same one-shot protocol: Validate → Persist →
//! Resolve target(s) → Publish. Persist always precedes publish, so a
//! broadcast implies a durable row exists and a failed write never fans out.
//! Counter-sync and thread-created events skip the Persist step — they carry
//! no durable state of their own.

use serde_json::json;
use std::sync::Arc;

use crate::adapter::{Adapter, MessageRecord, NotificationRecord};
use crate::error::DispatchError;
use crate::fanout::registry::ConnectionRegistry;
use crate::fanout::rooms::RoomRouter;
use crate::fanout::{conversation_room, thread_room, user_room};
use crate::ws::protocol::{MessageAlert, OutgoingMessage, ServerEvent};

pub struct EventDispatcher {
    adapter: Arc<dyn Adapter>,
    registry: Arc<ConnectionRegistry>,
    rooms: Arc<RoomRouter>,
}

impl EventDispatcher {
    pub fn new(
        adapter: Arc<dyn Adapter>,
        registry: Arc<ConnectionRegistry>,
        rooms: Arc<RoomRouter>,
    ) -> Self {
        Self {
            adapter,
            registry,
            rooms,
        }
    }

    /// Persist a notification row, then announce it to the recipient's
    /// private inbox room.
    pub async fn send_notification(
        &self,
        recipient_id: &str,
        kind: &str,
        title: &str,
        message: &str,
        data: serde_json::Value,
    ) -> Result<NotificationRecord, DispatchError> {
        if recipient_id.trim().is_empty() {
            return Err(DispatchError::Invalid("notification requires a recipient"));
        }
        if kind.trim().is_empty() {
            return Err(DispatchError::Invalid("notification requires a type"));
        }

        let record = self
            .adapter
            .create_notification(recipient_id, kind, title, message, data)
            .await?;

        self.rooms.broadcast(
            &self.registry,
            &user_room(recipient_id),
            &ServerEvent::Notification(record.clone()),
        );
        tracing::debug!(recipient = recipient_id, kind, "Notification dispatched");
        Ok(record)
    }

    /// Persist a message row, publish `new_message` to the conversation room,
    /// and — when the receiver has no live connection in that room — fall back
    /// to a `message_notification` alert on their inbox room.
    ///
    /// Sender display info comes from the registry's cached snapshot, never
    /// re-fetched from the adapter on this path.
    pub async fn send_message(
        &self,
        sender_id: &str,
        receiver_id: &str,
        conversation_id: &str,
        content: &str,
    ) -> Result<MessageRecord, DispatchError> {
        if content.trim().is_empty() {
            return Err(DispatchError::Invalid("message requires content"));
        }
        if receiver_id.trim().is_empty() || conversation_id.trim().is_empty() {
            return Err(DispatchError::Invalid(
                "message requires a receiver and a conversation",
            ));
        }
        let sender = self
            .registry
            .snapshot_of(sender_id)
            .ok_or(DispatchError::Invalid("sender is not authenticated"))?;

        let record = self
            .adapter
            .create_message(sender_id, receiver_id, conversation_id, content)
            .await?;

        let room = conversation_room(conversation_id);
        self.rooms.broadcast(
            &self.registry,
            &room,
            &ServerEvent::NewMessage(OutgoingMessage {
                message: record.clone(),
                sender: sender.clone(),
            }),
        );

        let receiver_in_room = self
            .rooms
            .members_of(&room)
            .into_iter()
            .any(|conn| self.registry.identity_of(conn).as_deref() == Some(receiver_id));
        if !receiver_in_room {
            self.rooms.broadcast(
                &self.registry,
                &user_room(receiver_id),
                &ServerEvent::MessageNotification(MessageAlert {
                    kind: "new_message".to_string(),
                    title: format!("New message from {}", sender.full_name),
                    message: content.to_string(),
                    data: json!({
                        "conversationId": conversation_id,
                        "senderId": sender_id,
                    }),
                }),
            );
        }

        tracing::debug!(conversation = conversation_id, "Message dispatched");
        Ok(record)
    }

    /// A follow became durable upstream; persist the notification row for the
    /// followed identity and announce it. Follower display info comes from the
    /// registry cache (the event originates from the follower's connection).
    pub async fn follow_created(
        &self,
        follower_id: &str,
        followed_id: &str,
    ) -> Result<NotificationRecord, DispatchError> {
        if followed_id.trim().is_empty() {
            return Err(DispatchError::Invalid("follow requires a followed user"));
        }
        let follower = self
            .registry
            .snapshot_of(follower_id)
            .ok_or(DispatchError::Invalid("follower is not authenticated"))?;

        self.send_notification(
            followed_id,
            "follow",
            "New follower",
            &format!("{} started following you", follower.full_name),
            json!({
                "followerId": follower.id,
                "followerUsername": follower.username,
                "followerAvatar": follower.avatar_url,
            }),
        )
        .await
    }

    /// Global like-counter sync: every connected client receives the updated
    /// counter. Deliberately unscoped — see DESIGN.md.
    pub fn project_liked(&self, project_id: &str, likes_count: i64) {
        self.registry.broadcast_all(&ServerEvent::ProjectUpdated {
            project_id: project_id.to_string(),
            likes_count: Some(likes_count),
            comments_count: None,
        });
    }

    pub fn video_liked(&self, video_id: &str, likes_count: i64) {
        self.registry.broadcast_all(&ServerEvent::VideoUpdated {
            video_id: video_id.to_string(),
            likes_count: Some(likes_count),
            comments_count: None,
        });
    }

    /// Global comment-counter sync for a piece of content.
    pub fn comment_added(
        &self,
        content_id: &str,
        content_type: &str,
        comments_count: i64,
    ) -> Result<(), DispatchError> {
        let event = match content_type {
            "project" => ServerEvent::ProjectUpdated {
                project_id: content_id.to_string(),
                likes_count: None,
                comments_count: Some(comments_count),
            },
            "video" => ServerEvent::VideoUpdated {
                video_id: content_id.to_string(),
                likes_count: None,
                comments_count: Some(comments_count),
            },
            _ => return Err(DispatchError::Invalid("unknown content type")),
        };
        self.registry.broadcast_all(&event);
        Ok(())
    }

    /// New forum thread: discovery-feed broadcast to everyone.
    pub fn thread_created(&self, thread: serde_json::Value) {
        self.registry.broadcast_all(&ServerEvent::NewThread(thread));
    }

    /// New forum comment: scoped to the thread's room.
    pub fn thread_comment(
        &self,
        thread_id: &str,
        comment: serde_json::Value,
    ) -> Result<(), DispatchError> {
        if thread_id.trim().is_empty() {
            return Err(DispatchError::Invalid("thread comment requires a thread id"));
        }
        self.rooms.broadcast(
            &self.registry,
            &thread_room(thread_id),
            &ServerEvent::NewThreadComment(comment),
        );
        Ok(())
    }
}
