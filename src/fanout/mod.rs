//! The real-time fan-out core: connection registry, room router, typing
//! coordinator, and event dispatcher.
//!
//! All four are explicitly constructed service structs owned by `AppState` —
//! no module-level registries, no ambient broadcast handle. Anything that
//! needs to emit events gets the registry/router injected.

pub mod dispatch;
pub mod registry;
pub mod rooms;
pub mod typing;

use tokio::sync::mpsc;

/// Transport-assigned id of one live WebSocket session.
pub type ConnectionId = uuid::Uuid;

/// Sender half of a connection's outbound channel. Cloning this is how any
/// part of the system pushes messages to a specific client; the connection's
/// writer task owns the receiving end.
pub type ConnectionSender = mpsc::UnboundedSender<axum::extract::ws::Message>;

/// Room naming conventions. A room has no existence beyond its current
/// membership set.
pub fn user_room(identity_id: &str) -> String {
    format!("user:{identity_id}")
}

pub fn conversation_room(conversation_id: &str) -> String {
    format!("conversation:{conversation_id}")
}

pub fn thread_room(thread_id: &str) -> String {
    format!("thread:{thread_id}")
}
