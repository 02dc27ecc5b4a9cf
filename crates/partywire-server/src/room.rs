//! Room membership.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::{Mutex, MutexGuard};

use crate::connection::Connection;

/// A named group of connections sharing broadcast scope.
pub struct Room {
    id: String,
    members: RwLock<HashMap<String, Arc<Connection>>>,
    dispatch: Mutex<()>,
}

impl Room {
    /// Empty room.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            members: RwLock::new(HashMap::new()),
            dispatch: Mutex::new(()),
        }
    }

    /// Room id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Add a connection. A connection with the same id is replaced.
    pub fn join(&self, connection: Arc<Connection>) {
        let _ = self
            .members
            .write()
            .insert(connection.id().to_owned(), connection);
    }

    /// Remove a connection by id.
    pub fn leave(&self, connection_id: &str) -> Option<Arc<Connection>> {
        self.members.write().remove(connection_id)
    }

    /// Look up a member.
    pub fn connection(&self, connection_id: &str) -> Option<Arc<Connection>> {
        self.members.read().get(connection_id).cloned()
    }

    /// Snapshot of current members.
    pub fn connections(&self) -> Vec<Arc<Connection>> {
        self.members.read().values().cloned().collect()
    }

    /// Member count.
    pub fn len(&self) -> usize {
        self.members.read().len()
    }

    /// Whether the room has no members.
    pub fn is_empty(&self) -> bool {
        self.members.read().is_empty()
    }

    /// Enqueue `payload` to every member not listed in `exclude`.
    ///
    /// Membership is snapshotted first, so joins and leaves during the
    /// fan-out do not affect it. Returns the number of recipients attempted.
    pub fn broadcast_raw(&self, payload: &Arc<str>, exclude: &[&str]) -> usize {
        let recipients: Vec<Arc<Connection>> = self
            .members
            .read()
            .values()
            .filter(|c| !exclude.contains(&c.id()))
            .cloned()
            .collect();
        for conn in &recipients {
            let _ = conn.send_raw(Arc::clone(payload));
        }
        recipients.len()
    }

    /// Serialize message handling for this room.
    pub(crate) async fn lock_dispatch(&self) -> MutexGuard<'_, ()> {
        self.dispatch.lock().await
    }
}

impl std::fmt::Debug for Room {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Room")
            .field("id", &self.id)
            .field("members", &self.len())
            .finish_non_exhaustive()
    }
}
