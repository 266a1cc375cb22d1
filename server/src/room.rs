//! Room entities and the store that owns them.
//!
//! Each room sits behind its own mutex so that joins, updates and departures
//! targeting one room are serialized while unrelated rooms proceed in parallel.
//! The store's map lock is only ever held for a single map operation and never
//! while a room lock is being awaited.

use log::info;
use shared::{ConnectionId, RoomId, RoomState};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

pub type SharedRoom = Arc<Mutex<Room>>;

/// A named session with a membership set, a host and an opaque payload.
///
/// While a room is open its host is always one of its players. Once the last
/// player leaves the room is closed and removed from the store; a closed room
/// is never reopened.
#[derive(Debug)]
pub struct Room {
    id: RoomId,
    host: ConnectionId,
    players: BTreeSet<ConnectionId>,
    payload: Vec<u8>,
    version: u64,
    closed: bool,
}

impl Room {
    /// Creates an open room with `founder` as its only player and host.
    pub fn new(id: &str, founder: ConnectionId) -> Self {
        let mut players = BTreeSet::new();
        players.insert(founder);
        Self {
            id: id.to_string(),
            host: founder,
            players,
            payload: Vec::new(),
            version: 1,
            closed: false,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn host(&self) -> ConnectionId {
        self.host
    }

    pub fn players(&self) -> impl Iterator<Item = &ConnectionId> {
        self.players.iter()
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn contains(&self, conn: ConnectionId) -> bool {
        self.players.contains(&conn)
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Adds a player. Returns false if they were already a member.
    pub fn add_player(&mut self, conn: ConnectionId) -> bool {
        let added = self.players.insert(conn);
        if added {
            self.version += 1;
        }
        added
    }

    /// Removes a player. Returns false if they were not a member.
    ///
    /// Removing the host leaves the room host-less until
    /// [`Room::migrate_host`] is called.
    pub fn remove_player(&mut self, conn: ConnectionId) -> bool {
        let removed = self.players.remove(&conn);
        if removed {
            self.version += 1;
        }
        removed
    }

    /// Replaces the payload wholesale. Last writer wins.
    pub fn set_payload(&mut self, payload: Vec<u8>) {
        self.payload = payload;
        self.version += 1;
    }

    /// Hands the host role to the smallest remaining player.
    ///
    /// Returns the new host, or `None` if the room has no players left.
    pub fn migrate_host(&mut self) -> Option<ConnectionId> {
        let next = *self.players.iter().next()?;
        self.host = next;
        self.version += 1;
        Some(next)
    }

    pub(crate) fn close(&mut self) {
        self.closed = true;
    }

    pub fn snapshot(&self) -> RoomState {
        RoomState {
            room_id: self.id.clone(),
            host: self.host,
            players: self.players.iter().copied().collect(),
            version: self.version,
            payload: self.payload.clone(),
        }
    }
}

/// Owns every open room, keyed by room id.
#[derive(Debug, Default)]
pub struct RoomStore {
    rooms: RwLock<HashMap<RoomId, SharedRoom>>,
}

impl RoomStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, room_id: &str) -> Option<SharedRoom> {
        let rooms = self.rooms.read().await;
        rooms.get(room_id).cloned()
    }

    /// Returns the room registered under `room_id`, creating it with
    /// `founder` as host if there is none.
    ///
    /// The boolean is true when this call created the room. Concurrent callers
    /// racing on the same new id all receive the same instance.
    pub async fn create_if_absent(
        &self,
        room_id: &str,
        founder: ConnectionId,
    ) -> (SharedRoom, bool) {
        let mut rooms = self.rooms.write().await;
        if let Some(room) = rooms.get(room_id) {
            return (Arc::clone(room), false);
        }

        let room = Arc::new(Mutex::new(Room::new(room_id, founder)));
        rooms.insert(room_id.to_string(), Arc::clone(&room));
        info!("Room {} created with host {}", room_id, founder);
        (room, true)
    }

    /// Unregisters a room. Callers hold the room's lock and have already
    /// closed it, so a racing joiner can never pick up the removed instance.
    pub async fn delete(&self, room_id: &str) -> Option<SharedRoom> {
        let mut rooms = self.rooms.write().await;
        rooms.remove(room_id)
    }

    pub async fn len(&self) -> usize {
        self.rooms.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rooms.read().await.is_empty()
    }

    pub async fn room_ids(&self) -> Vec<RoomId> {
        let rooms = self.rooms.read().await;
        let mut ids: Vec<RoomId> = rooms.keys().cloned().collect();
        ids.sort();
        ids
    }
}
