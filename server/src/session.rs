//! Connection -> room mapping.

use shared::{ConnectionId, RoomId};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Records which room each attached connection currently occupies.
///
/// A connection maps to at most one room. `set_room` overwrites blindly; the
/// caller removes the connection from the previous room's membership first.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<ConnectionId, RoomId>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_room(&self, conn: ConnectionId, room_id: &str) {
        let mut sessions = self.sessions.write().await;
        sessions.insert(conn, room_id.to_string());
    }

    pub async fn get_room(&self, conn: ConnectionId) -> Option<RoomId> {
        let sessions = self.sessions.read().await;
        sessions.get(&conn).cloned()
    }

    /// Removes the mapping, returning the room the connection was in.
    pub async fn clear(&self, conn: ConnectionId) -> Option<RoomId> {
        let mut sessions = self.sessions.write().await;
        sessions.remove(&conn)
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}
