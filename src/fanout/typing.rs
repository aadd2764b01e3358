//! Typing Coordinator: ephemeral typing-presence per conversation.
//!
//! Each `(conversation, identity)` entry carries a generation number and an
//! abortable tokio timer. A refresh or explicit stop aborts the old timer,
//! and the expiry callback removes its entry only when the stored generation
//! still matches its own, so a cancel-then-refire race can never emit a
//! spurious stop broadcast.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::fanout::conversation_room;
use crate::fanout::registry::ConnectionRegistry;
use crate::fanout::rooms::RoomRouter;
use crate::ws::protocol::ServerEvent;

/// Typing entries auto-expire after this long without a refresh.
pub const TYPING_EXPIRY: Duration = Duration::from_secs(3);

struct TypingEntry {
    generation: u64,
    timer: JoinHandle<()>,
}

struct Inner {
    entries: DashMap<(String, String), TypingEntry>,
    generations: AtomicU64,
    expiry: Duration,
    registry: Arc<ConnectionRegistry>,
    rooms: Arc<RoomRouter>,
}

pub struct TypingCoordinator {
    inner: Arc<Inner>,
}

impl TypingCoordinator {
    pub fn new(registry: Arc<ConnectionRegistry>, rooms: Arc<RoomRouter>) -> Self {
        Self::with_expiry(registry, rooms, TYPING_EXPIRY)
    }

    pub fn with_expiry(
        registry: Arc<ConnectionRegistry>,
        rooms: Arc<RoomRouter>,
        expiry: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                entries: DashMap::new(),
                generations: AtomicU64::new(0),
                expiry,
                registry,
                rooms,
            }),
        }
    }

    /// Insert or refresh the `(conversation, identity)` entry, (re)scheduling
    /// its expiry timer, and broadcast `user_typing{isTyping: true}` to the
    /// conversation room. A start received after expiry is a fresh start.
    pub fn start_typing(&self, conversation_id: &str, identity_id: &str) {
        let generation = self.inner.generations.fetch_add(1, Ordering::Relaxed);
        let key = (conversation_id.to_string(), identity_id.to_string());

        // The entry guard is taken before the timer is armed: an expiry that
        // fires immediately blocks on the shard until the insert below lands,
        // so it can never run ahead of it and strand the entry.
        let slot = self.inner.entries.entry(key);

        let inner = Arc::clone(&self.inner);
        let conversation = conversation_id.to_string();
        let identity = identity_id.to_string();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(inner.expiry).await;
            inner.expire(&conversation, &identity, generation);
        });

        let previous = match slot {
            Entry::Occupied(mut occupied) => {
                Some(occupied.insert(TypingEntry { generation, timer }))
            }
            Entry::Vacant(vacant) => {
                vacant.insert(TypingEntry { generation, timer });
                None
            }
        };
        if let Some(previous) = previous {
            previous.timer.abort();
        }

        self.inner.broadcast_typing(conversation_id, identity_id, true);
    }

    /// Remove the entry, cancel its timer, and broadcast
    /// `user_typing{isTyping: false}`. Strict no-op when the entry is absent —
    /// prevents duplicate "stopped" events.
    pub fn stop_typing(&self, conversation_id: &str, identity_id: &str) {
        let key = (conversation_id.to_string(), identity_id.to_string());
        if let Some((_, entry)) = self.inner.entries.remove(&key) {
            entry.timer.abort();
            self.inner
                .broadcast_typing(conversation_id, identity_id, false);
        }
    }

    pub fn is_typing(&self, conversation_id: &str, identity_id: &str) -> bool {
        self.inner
            .entries
            .contains_key(&(conversation_id.to_string(), identity_id.to_string()))
    }
}

impl Inner {
    /// Timer callback: same removal + broadcast as an explicit stop, but only
    /// if the entry still belongs to this timer's generation.
    fn expire(&self, conversation_id: &str, identity_id: &str, generation: u64) {
        let key = (conversation_id.to_string(), identity_id.to_string());
        let removed = self
            .entries
            .remove_if(&key, |_, entry| entry.generation == generation);
        if removed.is_some() {
            self.broadcast_typing(conversation_id, identity_id, false);
        }
    }

    fn broadcast_typing(&self, conversation_id: &str, identity_id: &str, is_typing: bool) {
        let event = ServerEvent::UserTyping {
            user_id: identity_id.to_string(),
            user: self.registry.snapshot_of(identity_id),
            is_typing,
            conversation_id: conversation_id.to_string(),
        };
        self.rooms
            .broadcast(&self.registry, &conversation_room(conversation_id), &event);
    }
}
