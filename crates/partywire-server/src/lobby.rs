//! Rooms and their user contexts.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::connection::Connection;
use crate::room::Room;

type ContextFactory<C> = Arc<dyn Fn(&str) -> C + Send + Sync>;

/// How rooms obtain their user context.
pub enum ContextScope<C> {
    /// Every room shares the lobby's global context.
    Shared,
    /// Each room gets its own context, created on first use from the room id.
    PerRoom(ContextFactory<C>),
}

/// Server-wide registry of rooms and contexts.
///
/// Rooms are created on first join and dropped when the last member leaves.
/// Per-room contexts outlive their rooms, so HTTP handlers can still read
/// state of a room nobody is connected to.
pub struct Lobby<C> {
    global: Arc<C>,
    scope: ContextScope<C>,
    rooms: RwLock<HashMap<String, Arc<Room>>>,
    contexts: RwLock<HashMap<String, Arc<C>>>,
    evict_contexts: bool,
}

impl<C: Send + Sync + 'static> Lobby<C> {
    /// Lobby where every room shares `ctx`.
    pub fn new(ctx: C) -> Self {
        Self::with_scope(ctx, ContextScope::Shared)
    }

    /// Lobby where each room gets `factory(room_id)`. `global` is what HTTP
    /// handlers receive.
    ///
    /// Room ids come from clients, and by default a context is kept for every
    /// room id ever joined. Use [`with_context_eviction`](Self::with_context_eviction)
    /// or [`forget_context`](Self::forget_context) to bound that.
    pub fn per_room(global: C, factory: impl Fn(&str) -> C + Send + Sync + 'static) -> Self {
        Self::with_scope(global, ContextScope::PerRoom(Arc::new(factory)))
    }

    /// Lobby with an explicit scope.
    pub fn with_scope(global: C, scope: ContextScope<C>) -> Self {
        Self {
            global: Arc::new(global),
            scope,
            rooms: RwLock::new(HashMap::new()),
            contexts: RwLock::new(HashMap::new()),
            evict_contexts: false,
        }
    }

    /// Drop a room's context when its last member leaves.
    #[must_use]
    pub fn with_context_eviction(mut self, enabled: bool) -> Self {
        self.evict_contexts = enabled;
        self
    }

    /// Drop the stored context of `room_id` unless the room is open.
    /// Returns whether a context was removed.
    pub fn forget_context(&self, room_id: &str) -> bool {
        let rooms = self.rooms.read();
        if rooms.contains_key(room_id) {
            return false;
        }
        self.contexts.write().remove(room_id).is_some()
    }

    /// Number of stored per-room contexts.
    pub fn context_count(&self) -> usize {
        self.contexts.read().len()
    }

    /// The application-wide context.
    pub fn global(&self) -> &Arc<C> {
        &self.global
    }

    /// Context of `room_id`, creating it if the scope is per-room.
    pub fn context(&self, room_id: &str) -> Arc<C> {
        let ContextScope::PerRoom(factory) = &self.scope else {
            return Arc::clone(&self.global);
        };
        if let Some(ctx) = self.contexts.read().get(room_id) {
            return Arc::clone(ctx);
        }
        let mut contexts = self.contexts.write();
        Arc::clone(
            contexts
                .entry(room_id.to_owned())
                .or_insert_with(|| Arc::new(factory(room_id))),
        )
    }

    /// Existing room, if any.
    pub fn room(&self, room_id: &str) -> Option<Arc<Room>> {
        self.rooms.read().get(room_id).cloned()
    }

    /// Add `connection` to `room_id`, creating the room if needed.
    pub fn join(&self, room_id: &str, connection: Arc<Connection>) -> (Arc<Room>, Arc<C>) {
        let room = {
            let mut rooms = self.rooms.write();
            let room = rooms
                .entry(room_id.to_owned())
                .or_insert_with(|| Arc::new(Room::new(room_id)));
            room.join(connection);
            Arc::clone(room)
        };
        debug!(room_id, members = room.len(), "joined room");
        (room, self.context(room_id))
    }

    /// Remove a connection; the room goes away once empty.
    pub fn leave(&self, room_id: &str, connection_id: &str) {
        let mut rooms = self.rooms.write();
        let Some(room) = rooms.get(room_id) else {
            return;
        };
        let _ = room.leave(connection_id);
        if room.is_empty() {
            let _ = rooms.remove(room_id);
            if self.evict_contexts {
                let _ = self.contexts.write().remove(room_id);
            }
            debug!(room_id, "room closed");
        }
    }

    /// Ids of open rooms.
    pub fn room_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.rooms.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Number of open rooms.
    pub fn room_count(&self) -> usize {
        self.rooms.read().len()
    }

    /// Connections across all rooms.
    pub fn connection_count(&self) -> usize {
        self.rooms.read().values().map(|r| r.len()).sum()
    }
}
