//! Room Router: membership management for logical broadcast groups.
//!
//! Sole owner of room membership. Rooms are plain names (`user:<id>`,
//! `conversation:<id>`, `thread:<id>`) with no existence beyond their current
//! membership set; an empty room is removed.

use dashmap::DashMap;
use std::collections::HashSet;

use crate::error::JoinError;
use crate::fanout::registry::ConnectionRegistry;
use crate::fanout::ConnectionId;
use crate::ws::protocol::ServerEvent;

pub struct RoomRouter {
    rooms: DashMap<String, HashSet<ConnectionId>>,
}

impl RoomRouter {
    pub fn new() -> Self {
        Self {
            rooms: DashMap::new(),
        }
    }

    /// Idempotent add. The connection must be known to the registry.
    /// `user:*` rooms are reserved for their owner: a join to `user:<X>` from
    /// a connection whose authenticated identity is not X is rejected with
    /// membership unchanged.
    pub fn join(
        &self,
        registry: &ConnectionRegistry,
        conn_id: ConnectionId,
        room_id: &str,
    ) -> Result<(), JoinError> {
        if !registry.contains(conn_id) {
            return Err(JoinError::UnknownConnection);
        }
        if let Some(owner) = room_id.strip_prefix("user:") {
            if registry.identity_of(conn_id).as_deref() != Some(owner) {
                return Err(JoinError::Forbidden);
            }
        }
        self.rooms
            .entry(room_id.to_string())
            .or_default()
            .insert(conn_id);
        tracing::debug!(connection_id = %conn_id, room = room_id, "Joined room");
        Ok(())
    }

    /// Idempotent remove. Empty rooms are dropped.
    pub fn leave(&self, conn_id: ConnectionId, room_id: &str) {
        if let Some(mut members) = self.rooms.get_mut(room_id) {
            members.remove(&conn_id);
        }
        self.rooms.remove_if(room_id, |_, members| members.is_empty());
    }

    /// Remove a connection from every room it was a member of.
    /// Returns the rooms it left. Idempotent.
    pub fn leave_all(&self, conn_id: ConnectionId) -> Vec<String> {
        let joined: Vec<String> = self
            .rooms
            .iter()
            .filter(|e| e.value().contains(&conn_id))
            .map(|e| e.key().clone())
            .collect();
        for room_id in &joined {
            self.leave(conn_id, room_id);
        }
        joined
    }

    /// Current members of a room. The empty set — not an error — for a room
    /// with no members or that never existed.
    pub fn members_of(&self, room_id: &str) -> HashSet<ConnectionId> {
        self.rooms
            .get(room_id)
            .map(|members| members.clone())
            .unwrap_or_default()
    }

    /// All rooms a connection belongs to.
    pub fn rooms_of(&self, conn_id: ConnectionId) -> Vec<String> {
        self.rooms
            .iter()
            .filter(|e| e.value().contains(&conn_id))
            .map(|e| e.key().clone())
            .collect()
    }

    /// Deliver an event to every live member of a room, best-effort. A send
    /// failure on one connection never prevents delivery to the others and
    /// never surfaces to the caller.
    pub fn broadcast(&self, registry: &ConnectionRegistry, room_id: &str, event: &ServerEvent) {
        let members = self.members_of(room_id);
        if members.is_empty() {
            return;
        }
        let Some(msg) = event.to_message() else {
            return;
        };
        for conn_id in members {
            registry.send_raw(conn_id, msg.clone());
        }
    }
}

impl Default for RoomRouter {
    fn default() -> Self {
        Self::new()
    }
}
