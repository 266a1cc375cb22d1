//! Room creation, host migration and teardown.
//!
//! All membership changes go through [`RoomLifecycle`], which keeps three
//! things true after every call:
//! - a connection is a player of at most one room,
//! - the host of an open room is one of its players,
//! - a room without players is closed and absent from the store.

use crate::relay::{BroadcastRelay, Transport};
use crate::room::RoomStore;
use crate::session::SessionRegistry;
use log::{debug, info};
use shared::ConnectionId;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    /// The room did not exist; the joiner is its host.
    Created,
    /// Joined an existing room.
    Joined,
    /// Already a member; state was re-published.
    Rejoined,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DepartOutcome {
    /// The connection was not in any room.
    NotAttached,
    /// Left a room that still has its host.
    Left,
    /// Left as host; the role passed to the given player.
    HostMigrated(ConnectionId),
    /// Left as the last player; the room was destroyed.
    RoomClosed,
}

pub struct RoomLifecycle {
    sessions: Arc<SessionRegistry>,
    rooms: Arc<RoomStore>,
    relay: Arc<BroadcastRelay>,
    transport: Arc<dyn Transport>,
}

impl RoomLifecycle {
    pub fn new(
        sessions: Arc<SessionRegistry>,
        rooms: Arc<RoomStore>,
        relay: Arc<BroadcastRelay>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            sessions,
            rooms,
            relay,
            transport,
        }
    }

    /// Moves `conn` into `room_id`, creating the room if needed, and publishes
    /// the room to all of its members.
    ///
    /// Leaving a previous room follows the same rules as [`Self::depart`].
    pub async fn join(&self, conn: ConnectionId, room_id: &str) -> JoinOutcome {
        if let Some(old_room) = self.sessions.get_room(conn).await {
            if old_room != room_id {
                self.leave_room(conn, &old_room).await;
            }
        }

        loop {
            let (shared, created) = self.rooms.create_if_absent(room_id, conn).await;
            let mut room = shared.lock().await;

            // Destroyed between lookup and lock; the next lookup sees a fresh room.
            if room.is_closed() {
                debug!("Room {} closed while {} was joining, retrying", room_id, conn);
                continue;
            }

            let added = room.add_player(conn);
            self.sessions.set_room(conn, room_id).await;
            self.transport.subscribe(conn, room_id);
            info!("{} added to room {}", conn, room_id);

            self.relay.publish(&room);

            return if created {
                JoinOutcome::Created
            } else if added {
                JoinOutcome::Joined
            } else {
                JoinOutcome::Rejoined
            };
        }
    }

    /// Detaches `conn` from whatever room it occupies.
    pub async fn depart(&self, conn: ConnectionId) -> DepartOutcome {
        let Some(room_id) = self.sessions.clear(conn).await else {
            debug!("{} departed without a room", conn);
            return DepartOutcome::NotAttached;
        };
        self.leave_room(conn, &room_id).await
    }

    async fn leave_room(&self, conn: ConnectionId, room_id: &str) -> DepartOutcome {
        let Some(shared) = self.rooms.get(room_id).await else {
            return DepartOutcome::NotAttached;
        };

        let mut room = shared.lock().await;
        if room.is_closed() || !room.remove_player(conn) {
            return DepartOutcome::NotAttached;
        }
        self.transport.unsubscribe(conn, room_id);
        info!("{} removed from room {}", conn, room_id);

        // Destruction takes precedence over migration.
        if room.is_empty() {
            room.close();
            // Queued before the id is freed, so it cannot reach a room
            // recreated under the same id.
            self.transport.force_disconnect_room(room_id);
            self.rooms.delete(room_id).await;
            info!("Closed empty room {}", room_id);
            return DepartOutcome::RoomClosed;
        }

        if room.host() == conn {
            if let Some(new_host) = room.migrate_host() {
                info!("{} was host of room {}; new host is {}", conn, room_id, new_host);
                self.relay.publish(&room);
                return DepartOutcome::HostMigrated(new_host);
            }
        }

        DepartOutcome::Left
    }
}
