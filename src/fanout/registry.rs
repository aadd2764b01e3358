//! Connection Registry: binds live connections to identities and tracks
//! presence.
//!
//! Sole owner of connection↔identity bindings. A user can have multiple
//! concurrent connections (multiple devices/tabs); presence is Online iff at
//! least one connection is attached, and flips Offline exactly once when the
//! last one goes.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::adapter::{Adapter, IdentitySnapshot};
use crate::error::{AdapterError, AuthError};
use crate::fanout::{ConnectionId, ConnectionSender};
use crate::ws::protocol::ServerEvent;

/// Presence status values carried on the wire as lowercase strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    Online,
    Away,
    Busy,
    Offline,
}

impl PresenceStatus {
    /// Statuses a client may set on itself. Offline is reserved for the
    /// registry's disconnect path.
    pub fn from_client_str(s: &str) -> Option<Self> {
        match s {
            "online" => Some(Self::Online),
            "away" => Some(Self::Away),
            "busy" => Some(Self::Busy),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Online => "online",
            Self::Away => "away",
            Self::Busy => "busy",
            Self::Offline => "offline",
        }
    }
}

/// Info tracked per identity in the presence map.
#[derive(Debug, Clone)]
pub struct PresenceInfo {
    pub user: IdentitySnapshot,
    pub status: PresenceStatus,
    pub last_seen: DateTime<Utc>,
}

/// What `update_presence` asks the caller to broadcast.
#[derive(Debug, Clone)]
pub struct PresenceChange {
    pub identity_id: String,
    pub status: PresenceStatus,
    pub last_seen: DateTime<Utc>,
}

/// Result of `disconnect`. `went_offline` carries the identity id only when
/// this was its last live connection.
#[derive(Debug, Default)]
pub struct DisconnectOutcome {
    pub removed: bool,
    pub went_offline: Option<String>,
}

struct ConnectionEntry {
    sender: ConnectionSender,
    identity: Option<IdentitySnapshot>,
    last_activity: DateTime<Utc>,
}

/// In-memory connection table, identity index, and presence map.
pub struct ConnectionRegistry {
    connections: DashMap<ConnectionId, ConnectionEntry>,
    by_identity: DashMap<String, HashSet<ConnectionId>>,
    presence: DashMap<String, PresenceInfo>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
            by_identity: DashMap::new(),
            presence: DashMap::new(),
        }
    }

    /// Record a freshly accepted transport connection. Identity is attached
    /// later by `authenticate`.
    pub fn register(&self, sender: ConnectionSender) -> ConnectionId {
        let conn_id = ConnectionId::new_v4();
        self.connections.insert(
            conn_id,
            ConnectionEntry {
                sender,
                identity: None,
                last_activity: Utc::now(),
            },
        );
        tracing::debug!(connection_id = %conn_id, "Connection registered");
        conn_id
    }

    /// Attach an identity to a connection.
    ///
    /// The credential proof is opaque here — real verification happens
    /// upstream at connection-establishment time; this core only requires
    /// that some token was supplied. The identity must resolve via the
    /// adapter; its display attributes are cached for the life of the
    /// connection. On success presence flips to Online with a fresh
    /// last-seen stamp.
    ///
    /// Re-authenticating under a different identity releases the old
    /// binding first, so the old identity cannot stay online through a
    /// connection it no longer owns.
    pub async fn authenticate(
        &self,
        adapter: &dyn Adapter,
        conn_id: ConnectionId,
        claimed_identity_id: &str,
        token: &str,
    ) -> Result<IdentitySnapshot, AuthError> {
        if token.trim().is_empty() {
            return Err(AuthError::MissingToken);
        }
        if !self.connections.contains_key(&conn_id) {
            return Err(AuthError::UnknownConnection);
        }

        // The identity lookup is the only await on this path. No map guard
        // is held across it.
        let snapshot = match adapter.get_identity(claimed_identity_id).await {
            Ok(snapshot) => snapshot,
            Err(AdapterError::NotFound) => return Err(AuthError::UnknownIdentity),
            Err(other) => return Err(AuthError::Lookup(other)),
        };

        // The connection may have disconnected while we were looking it up.
        let mut entry = self
            .connections
            .get_mut(&conn_id)
            .ok_or(AuthError::UnknownConnection)?;
        let previous = entry.identity.replace(snapshot.clone());
        entry.last_activity = Utc::now();
        drop(entry);

        if let Some(old) = previous.filter(|old| old.id != snapshot.id) {
            self.release_identity(conn_id, &old.id);
        }

        self.by_identity
            .entry(snapshot.id.clone())
            .or_default()
            .insert(conn_id);

        self.presence.insert(
            snapshot.id.clone(),
            PresenceInfo {
                user: snapshot.clone(),
                status: PresenceStatus::Online,
                last_seen: Utc::now(),
            },
        );

        Ok(snapshot)
    }

    /// Set an identity's presence status with a fresh last-seen stamp.
    /// Returns what to broadcast, or None for an identity with no presence
    /// record (never authenticated or already gone).
    pub fn update_presence(
        &self,
        identity_id: &str,
        status: PresenceStatus,
    ) -> Option<PresenceChange> {
        let mut info = self.presence.get_mut(identity_id)?;
        info.status = status;
        info.last_seen = Utc::now();
        Some(PresenceChange {
            identity_id: identity_id.to_string(),
            status,
            last_seen: info.last_seen,
        })
    }

    /// Remove a connection. Idempotent — a second call for the same id is a
    /// no-op. Room membership cleanup is the caller's job via
    /// `RoomRouter::leave_all`.
    pub fn disconnect(&self, conn_id: ConnectionId) -> DisconnectOutcome {
        let Some((_, entry)) = self.connections.remove(&conn_id) else {
            return DisconnectOutcome::default();
        };

        let mut outcome = DisconnectOutcome {
            removed: true,
            went_offline: None,
        };

        if let Some(identity) = entry.identity {
            if self.release_identity(conn_id, &identity.id) {
                outcome.went_offline = Some(identity.id);
            }
        }

        outcome
    }

    /// Drop a connection from an identity's set. Returns true when it was the
    /// identity's last connection, in which case the presence record goes too.
    fn release_identity(&self, conn_id: ConnectionId, identity_id: &str) -> bool {
        let mut last = false;
        if let Some(mut set) = self.by_identity.get_mut(identity_id) {
            set.remove(&conn_id);
            last = set.is_empty();
        }
        if last {
            self.by_identity.remove(identity_id);
            self.presence.remove(identity_id);
        }
        last
    }

    /// Whether a connection id is known (live).
    pub fn contains(&self, conn_id: ConnectionId) -> bool {
        self.connections.contains_key(&conn_id)
    }

    /// Stamp last-activity for a connection.
    pub fn touch(&self, conn_id: ConnectionId) {
        if let Some(mut entry) = self.connections.get_mut(&conn_id) {
            entry.last_activity = Utc::now();
        }
    }

    /// Authenticated identity of a connection, if any.
    pub fn identity_of(&self, conn_id: ConnectionId) -> Option<String> {
        self.connections
            .get(&conn_id)?
            .identity
            .as_ref()
            .map(|s| s.id.clone())
    }

    /// Cached identity snapshot — never hits the adapter.
    pub fn snapshot_of(&self, identity_id: &str) -> Option<IdentitySnapshot> {
        let set = self.by_identity.get(identity_id)?;
        let conn_id = set.iter().next().copied()?;
        drop(set);
        self.connections.get(&conn_id)?.identity.clone()
    }

    /// All live connections of an identity.
    pub fn connections_of(&self, identity_id: &str) -> HashSet<ConnectionId> {
        self.by_identity
            .get(identity_id)
            .map(|set| set.clone())
            .unwrap_or_default()
    }

    pub fn is_online(&self, identity_id: &str) -> bool {
        self.by_identity
            .get(identity_id)
            .map(|set| !set.is_empty())
            .unwrap_or(false)
    }

    pub fn presence_of(&self, identity_id: &str) -> Option<PresenceInfo> {
        self.presence.get(identity_id).map(|info| info.clone())
    }

    /// Current presence for all tracked identities.
    /// Used for the initial snapshot when a client authenticates.
    pub fn all_presence(&self) -> Vec<PresenceInfo> {
        self.presence.iter().map(|e| e.value().clone()).collect()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Send an event to one connection, best-effort. A closed channel means
    /// the connection is already on its way out — silently dropped.
    pub fn send_to(&self, conn_id: ConnectionId, event: &ServerEvent) {
        let Some(msg) = event.to_message() else {
            return;
        };
        self.send_raw(conn_id, msg);
    }

    /// Deliver an event to every live connection, best-effort. A send failure
    /// on one connection never prevents delivery to the others.
    pub fn broadcast_all(&self, event: &ServerEvent) {
        let Some(msg) = event.to_message() else {
            return;
        };
        for entry in self.connections.iter() {
            if entry.value().sender.send(msg.clone()).is_err() {
                tracing::debug!(connection_id = %entry.key(), "Dropped send to dead connection");
            }
        }
    }

    pub(crate) fn send_raw(&self, conn_id: ConnectionId, msg: axum::extract::ws::Message) {
        if let Some(entry) = self.connections.get(&conn_id) {
            if entry.sender.send(msg).is_err() {
                tracing::debug!(connection_id = %conn_id, "Dropped send to dead connection");
            }
        }
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
