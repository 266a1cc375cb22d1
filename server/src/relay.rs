//! Fan-out of room snapshots to every attached connection.

use crate::room::{Room, RoomStore};
use crate::session::SessionRegistry;
use log::debug;
use shared::{ConnectionId, RoomState};
use std::sync::Arc;

/// Outbound effects the core asks of the network layer.
///
/// Calls are made while the affected room is locked, so implementations must
/// not block; they queue the effect and return. Effects for one room reach the
/// transport in the order the room was mutated.
pub trait Transport: Send + Sync {
    /// Attach a connection to a room's broadcast group.
    fn subscribe(&self, conn: ConnectionId, room_id: &str);

    /// Detach a connection from a room's broadcast group.
    fn unsubscribe(&self, conn: ConnectionId, room_id: &str);

    /// Deliver `state` to every connection in the room's broadcast group.
    fn broadcast(&self, room_id: &str, state: RoomState);

    /// Terminate every connection still attached to the room.
    fn force_disconnect_room(&self, room_id: &str);
}

pub struct BroadcastRelay {
    sessions: Arc<SessionRegistry>,
    rooms: Arc<RoomStore>,
    transport: Arc<dyn Transport>,
}

impl BroadcastRelay {
    pub fn new(
        sessions: Arc<SessionRegistry>,
        rooms: Arc<RoomStore>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            sessions,
            rooms,
            transport,
        }
    }

    /// Sends the full current state of `room` to all of its members.
    ///
    /// Takes the room by reference so it can only be called through a held
    /// room lock, which keeps snapshots ordered per room.
    pub fn publish(&self, room: &Room) {
        let state = room.snapshot();
        debug!(
            "Publishing room {} v{} to {} players",
            state.room_id,
            state.version,
            state.players.len()
        );
        self.transport.broadcast(room.id(), state);
    }

    /// Overwrites the payload of the sender's room and publishes it.
    ///
    /// Any member may submit, not only the host. Returns false when the update
    /// was discarded because the connection is not in an open room.
    pub async fn accept_update(&self, conn: ConnectionId, payload: Vec<u8>) -> bool {
        let Some(room_id) = self.sessions.get_room(conn).await else {
            debug!("Discarding update from unattached {}", conn);
            return false;
        };
        let Some(shared) = self.rooms.get(&room_id).await else {
            debug!("Discarding update from {} for missing room {}", conn, room_id);
            return false;
        };

        let mut room = shared.lock().await;
        if room.is_closed() || !room.contains(conn) {
            debug!("Discarding update from {} for stale room {}", conn, room_id);
            return false;
        }

        debug!(
            "Received {} byte update from {} for room {}",
            payload.len(),
            conn,
            room_id
        );
        room.set_payload(payload);
        self.publish(&room);
        true
    }
}
