//! JSON wire protocol and inbound event dispatch.
//!
//! Frames are text: `{ "event": "<name>", "data": { ... } }` with camelCase
//! payload fields. Unparseable frames get a direct `error` acknowledgment and
//! never abort the connection. Before a successful `authenticate`, every
//! other event is rejected the same way.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::adapter::{IdentitySnapshot, MessageRecord};
use crate::fanout::registry::PresenceStatus;
use crate::fanout::{user_room, ConnectionId};
use crate::state::AppState;

/// Events a client may send.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    #[serde(rename_all = "camelCase")]
    Authenticate { user_id: String, token: String },
    #[serde(rename_all = "camelCase")]
    JoinRoom { room_id: String },
    #[serde(rename_all = "camelCase")]
    LeaveRoom { room_id: String },
    UpdatePresence {
        status: String,
    },
    #[serde(rename_all = "camelCase")]
    TypingStart {
        conversation_id: String,
        user_id: String,
    },
    #[serde(rename_all = "camelCase")]
    TypingStop {
        conversation_id: String,
        user_id: String,
    },
    #[serde(rename_all = "camelCase")]
    SendMessage {
        content: String,
        sender_id: String,
        receiver_id: String,
        conversation_id: String,
    },
    #[serde(rename_all = "camelCase")]
    SendNotification {
        user_id: String,
        #[serde(rename = "type")]
        kind: String,
        title: String,
        message: String,
        #[serde(default)]
        data: serde_json::Value,
    },
    #[serde(rename_all = "camelCase")]
    ProjectLiked {
        project_id: String,
        user_id: String,
        likes_count: i64,
    },
    #[serde(rename_all = "camelCase")]
    VideoLiked {
        video_id: String,
        user_id: String,
        likes_count: i64,
    },
    #[serde(rename_all = "camelCase")]
    NewComment {
        content_id: String,
        content_type: String,
        comments_count: i64,
    },
    #[serde(rename_all = "camelCase")]
    NewFollower {
        follower_id: String,
        followed_id: String,
    },
    ThreadCreated(serde_json::Value),
    #[serde(rename_all = "camelCase")]
    ThreadComment {
        thread_id: String,
        comment: serde_json::Value,
    },
}

/// A persisted message hydrated with the sender's cached display info.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutgoingMessage {
    #[serde(flatten)]
    pub message: MessageRecord,
    pub sender: IdentitySnapshot,
}

/// Fallback alert delivered to a receiver's inbox room when they are not in
/// the conversation room.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageAlert {
    #[serde(rename = "type")]
    pub kind: String,
    pub title: String,
    pub message: String,
    pub data: serde_json::Value,
}

/// Events the server emits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    Authenticated {
        user: IdentitySnapshot,
    },
    AuthError {
        message: String,
    },
    Error {
        message: String,
    },
    Notification(crate::adapter::NotificationRecord),
    MessageNotification(MessageAlert),
    NewMessage(OutgoingMessage),
    #[serde(rename_all = "camelCase")]
    UserTyping {
        user_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        user: Option<IdentitySnapshot>,
        is_typing: bool,
        conversation_id: String,
    },
    #[serde(rename_all = "camelCase")]
    UserOnline {
        user_id: String,
        user: IdentitySnapshot,
    },
    #[serde(rename_all = "camelCase")]
    UserOffline { user_id: String },
    #[serde(rename_all = "camelCase")]
    UserPresenceUpdated {
        user_id: String,
        status: PresenceStatus,
        last_seen: DateTime<Utc>,
    },
    #[serde(rename_all = "camelCase")]
    ProjectUpdated {
        project_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        likes_count: Option<i64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        comments_count: Option<i64>,
    },
    #[serde(rename_all = "camelCase")]
    VideoUpdated {
        video_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        likes_count: Option<i64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        comments_count: Option<i64>,
    },
    NewThread(serde_json::Value),
    NewThreadComment(serde_json::Value),
}

impl ServerEvent {
    /// Encode as a text WebSocket frame.
    pub fn to_message(&self) -> Option<axum::extract::ws::Message> {
        match serde_json::to_string(self) {
            Ok(text) => Some(axum::extract::ws::Message::Text(text.into())),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to encode server event");
                None
            }
        }
    }
}

/// Decode one inbound text frame and dispatch it.
pub async fn handle_text_message(raw: &str, conn_id: ConnectionId, state: &AppState) {
    state.registry.touch(conn_id);

    let event = match serde_json::from_str::<ClientEvent>(raw) {
        Ok(event) => event,
        Err(e) => {
            tracing::warn!(connection_id = %conn_id, error = %e, "Malformed client event");
            send_error(state, conn_id, "malformed event");
            return;
        }
    };

    // Pre-auth, only `authenticate` is honored.
    if state.registry.identity_of(conn_id).is_none()
        && !matches!(event, ClientEvent::Authenticate { .. })
    {
        send_error(state, conn_id, "not authenticated");
        return;
    }

    dispatch_event(event, conn_id, state).await;
}

async fn dispatch_event(event: ClientEvent, conn_id: ConnectionId, state: &AppState) {
    match event {
        ClientEvent::Authenticate { user_id, token } => {
            handle_authenticate(state, conn_id, &user_id, &token).await;
        }
        ClientEvent::JoinRoom { room_id } => {
            if let Err(e) = state.rooms.join(&state.registry, conn_id, &room_id) {
                tracing::warn!(connection_id = %conn_id, room = %room_id, error = %e, "Join rejected");
                send_error(state, conn_id, &e.to_string());
            }
        }
        ClientEvent::LeaveRoom { room_id } => {
            state.rooms.leave(conn_id, &room_id);
        }
        ClientEvent::UpdatePresence { status } => {
            handle_update_presence(state, conn_id, &status);
        }
        ClientEvent::TypingStart {
            conversation_id,
            user_id,
        } => {
            state.typing.start_typing(&conversation_id, &user_id);
        }
        ClientEvent::TypingStop {
            conversation_id,
            user_id,
        } => {
            state.typing.stop_typing(&conversation_id, &user_id);
        }
        ClientEvent::SendMessage {
            content,
            sender_id,
            receiver_id,
            conversation_id,
        } => {
            if let Err(e) = state
                .dispatcher
                .send_message(&sender_id, &receiver_id, &conversation_id, &content)
                .await
            {
                tracing::warn!(connection_id = %conn_id, error = %e, "Failed to send message");
                send_error(state, conn_id, &e.to_string());
            }
        }
        ClientEvent::SendNotification {
            user_id,
            kind,
            title,
            message,
            data,
        } => {
            if let Err(e) = state
                .dispatcher
                .send_notification(&user_id, &kind, &title, &message, data)
                .await
            {
                tracing::warn!(connection_id = %conn_id, error = %e, "Failed to send notification");
                send_error(state, conn_id, &e.to_string());
            }
        }
        ClientEvent::ProjectLiked {
            project_id,
            likes_count,
            ..
        } => {
            state.dispatcher.project_liked(&project_id, likes_count);
        }
        ClientEvent::VideoLiked {
            video_id,
            likes_count,
            ..
        } => {
            state.dispatcher.video_liked(&video_id, likes_count);
        }
        ClientEvent::NewComment {
            content_id,
            content_type,
            comments_count,
        } => {
            if let Err(e) = state
                .dispatcher
                .comment_added(&content_id, &content_type, comments_count)
            {
                send_error(state, conn_id, &e.to_string());
            }
        }
        ClientEvent::NewFollower {
            follower_id,
            followed_id,
        } => {
            if let Err(e) = state
                .dispatcher
                .follow_created(&follower_id, &followed_id)
                .await
            {
                tracing::warn!(connection_id = %conn_id, error = %e, "Failed to handle follow");
                send_error(state, conn_id, &e.to_string());
            }
        }
        ClientEvent::ThreadCreated(thread) => {
            state.dispatcher.thread_created(thread);
        }
        ClientEvent::ThreadComment { thread_id, comment } => {
            if let Err(e) = state.dispatcher.thread_comment(&thread_id, comment) {
                send_error(state, conn_id, &e.to_string());
            }
        }
    }
}

/// Authenticate handshake: bind the identity, join the private inbox room,
/// echo display attributes back, announce the user online, and replay the
/// current presence table to the new connection.
async fn handle_authenticate(state: &AppState, conn_id: ConnectionId, user_id: &str, token: &str) {
    let previous = state.registry.identity_of(conn_id);
    match state
        .registry
        .authenticate(state.adapter.as_ref(), conn_id, user_id, token)
        .await
    {
        Ok(user) => {
            // A rebind to a different account gives up the old inbox room.
            // The registry already released the old binding; if that was the
            // identity's last connection, it goes offline here.
            if let Some(old) = previous.filter(|old| *old != user.id) {
                state.rooms.leave(conn_id, &user_room(&old));
                if !state.registry.is_online(&old) {
                    state
                        .registry
                        .broadcast_all(&ServerEvent::UserOffline { user_id: old });
                }
            }

            // Cannot fail: the connection just authenticated as this identity.
            let _ = state
                .rooms
                .join(&state.registry, conn_id, &user_room(&user.id));

            state.registry.send_to(
                conn_id,
                &ServerEvent::Authenticated { user: user.clone() },
            );
            state.registry.broadcast_all(&ServerEvent::UserOnline {
                user_id: user.id.clone(),
                user: user.clone(),
            });

            for info in state.registry.all_presence() {
                state.registry.send_to(
                    conn_id,
                    &ServerEvent::UserPresenceUpdated {
                        user_id: info.user.id.clone(),
                        status: info.status,
                        last_seen: info.last_seen,
                    },
                );
            }

            tracing::info!(user_id = %user.id, connection_id = %conn_id, "User authenticated");
        }
        Err(e) => {
            // Reported to the caller, never fatal; closing is their decision.
            tracing::warn!(connection_id = %conn_id, error = %e, "Authentication failed");
            state.registry.send_to(
                conn_id,
                &ServerEvent::AuthError {
                    message: e.to_string(),
                },
            );
        }
    }
}

/// Presence update: stamp the new status and fan the change out to every
/// member of every room the identity's connections belong to, once per
/// recipient.
fn handle_update_presence(state: &AppState, conn_id: ConnectionId, status: &str) {
    let Some(status) = PresenceStatus::from_client_str(status) else {
        send_error(state, conn_id, "invalid presence status");
        return;
    };
    let Some(identity_id) = state.registry.identity_of(conn_id) else {
        return;
    };
    let Some(change) = state.registry.update_presence(&identity_id, status) else {
        return;
    };

    let mut targets: HashSet<ConnectionId> = HashSet::new();
    for conn in state.registry.connections_of(&identity_id) {
        for room in state.rooms.rooms_of(conn) {
            targets.extend(state.rooms.members_of(&room));
        }
    }

    let event = ServerEvent::UserPresenceUpdated {
        user_id: change.identity_id,
        status: change.status,
        last_seen: change.last_seen,
    };
    for target in targets {
        state.registry.send_to(target, &event);
    }
}

fn send_error(state: &AppState, conn_id: ConnectionId, message: &str) {
    state.registry.send_to(
        conn_id,
        &ServerEvent::Error {
            message: message.to_string(),
        },
    );
}
