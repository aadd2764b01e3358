use std::sync::Arc;

use crate::adapter::sqlite::SqliteAdapter;
use crate::adapter::Adapter;
use crate::db::DbPool;
use crate::fanout::dispatch::EventDispatcher;
use crate::fanout::registry::ConnectionRegistry;
use crate::fanout::rooms::RoomRouter;
use crate::fanout::typing::TypingCoordinator;

/// Shared application state passed to all handlers via axum State extractor.
///
/// Every service is explicitly constructed and owned here — registry, router,
/// typing coordinator, and dispatcher are injected into whatever needs to
/// emit events, never reached through globals.
#[derive(Clone)]
pub struct AppState {
    /// SQLite connection wrapped in Arc<Mutex>
    pub db: DbPool,
    /// Persistence adapter for notification/message rows and identity lookup
    pub adapter: Arc<dyn Adapter>,
    /// Live connection table and presence tracking
    pub registry: Arc<ConnectionRegistry>,
    /// Broadcast-group membership
    pub rooms: Arc<RoomRouter>,
    /// Ephemeral typing indicators with auto-expiry
    pub typing: Arc<TypingCoordinator>,
    /// Persist-then-publish domain event dispatch
    pub dispatcher: Arc<EventDispatcher>,
}

impl AppState {
    pub fn new(db: DbPool) -> Self {
        let adapter: Arc<dyn Adapter> = Arc::new(SqliteAdapter::new(db.clone()));
        let registry = Arc::new(ConnectionRegistry::new());
        let rooms = Arc::new(RoomRouter::new());
        let typing = Arc::new(TypingCoordinator::new(registry.clone(), rooms.clone()));
        let dispatcher = Arc::new(EventDispatcher::new(
            adapter.clone(),
            registry.clone(),
            rooms.clone(),
        ));
        Self {
            db,
            adapter,
            registry,
            rooms,
            typing,
            dispatcher,
        }
    }
}
