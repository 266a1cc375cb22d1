//! Wire protocol shared by the relay server and its clients.
//!
//! Every datagram carries exactly one bincode-encoded [`Packet`]. The room
//! payload is opaque to both sides of this crate: it travels as raw bytes and
//! is never inspected by the relay.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

/// Bumped whenever the `Packet` layout changes incompatibly.
pub const PROTOCOL_VERSION: u32 = 1;

/// Largest datagram either side will send or accept.
pub const MAX_PACKET_SIZE: usize = 65_507;

/// Default upper bound for a single room payload.
pub const MAX_PAYLOAD_BYTES: usize = 16 * 1024;

/// Upper bound for room identifiers, in bytes.
pub const MAX_ROOM_ID_LEN: usize = 64;

/// Most connections a server may hold at once.
///
/// A room can never have more players than this, which keeps a snapshot of a
/// full room with IPv6 members and a maximal payload inside one datagram.
pub const MAX_CLIENTS: usize = 2048;

/// Stable token naming one live client attachment.
///
/// The relay uses the client's network address, so a client that reconnects
/// from the same socket is treated as a fresh attachment of the same identity.
pub type ConnectionId = SocketAddr;

pub type RoomId = String;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub enum Packet {
    // Client -> server
    Connect {
        client_version: u32,
    },
    Join {
        room_id: RoomId,
    },
    Update {
        payload: Vec<u8>,
    },
    Heartbeat,
    Disconnect,

    // Server -> client
    Connected,
    RoomState(RoomState),
    Disconnected {
        reason: String,
    },
}

/// Full snapshot of a room as delivered to its members.
///
/// `version` increases by at least one on every mutation of a room instance,
/// so a receiver can drop any snapshot older than the last one it applied.
/// A destroyed and recreated room starts counting again from 1.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct RoomState {
    pub room_id: RoomId,
    pub host: ConnectionId,
    /// Sorted ascending.
    pub players: Vec<ConnectionId>,
    pub version: u64,
    pub payload: Vec<u8>,
}

impl RoomState {
    pub fn is_host(&self, conn: ConnectionId) -> bool {
        self.host == conn
    }

    pub fn has_player(&self, conn: ConnectionId) -> bool {
        self.players.binary_search(&conn).is_ok()
    }
}

impl Packet {
    pub fn encode(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(bytes)
    }
}
