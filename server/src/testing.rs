//! Test doubles shared by the unit tests.

use crate::relay::Transport;
use shared::{ConnectionId, RoomId, RoomState};
use std::collections::{BTreeSet, HashMap};
use std::net::SocketAddr;
use std::sync::Mutex;

pub fn conn(port: u16) -> ConnectionId {
    SocketAddr::from(([127, 0, 0, 1], port))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    Subscribe(ConnectionId, RoomId),
    Unsubscribe(ConnectionId, RoomId),
    Broadcast(RoomId, RoomState),
    ForceDisconnect(RoomId),
}

/// Records every outbound effect and tracks broadcast groups the way the UDP
/// transport does, so tests can assert on who received what.
#[derive(Debug, Default)]
pub struct RecordingTransport {
    effects: Mutex<Vec<Effect>>,
    groups: Mutex<HashMap<RoomId, BTreeSet<ConnectionId>>>,
    deliveries: Mutex<Vec<(ConnectionId, RoomState)>>,
}

impl RecordingTransport {
    pub fn effects(&self) -> Vec<Effect> {
        self.effects.lock().unwrap().clone()
    }

    pub fn broadcasts(&self) -> Vec<RoomState> {
        self.effects()
            .into_iter()
            .filter_map(|effect| match effect {
                Effect::Broadcast(_, state) => Some(state),
                _ => None,
            })
            .collect()
    }

    pub fn deliveries(&self) -> Vec<(ConnectionId, RoomState)> {
        self.deliveries.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.effects.lock().unwrap().clear();
        self.deliveries.lock().unwrap().clear();
    }

    pub fn group(&self, room_id: &str) -> BTreeSet<ConnectionId> {
        self.groups
            .lock()
            .unwrap()
            .get(room_id)
            .cloned()
            .unwrap_or_default()
    }
}

impl Transport for RecordingTransport {
    fn subscribe(&self, conn: ConnectionId, room_id: &str) {
        self.groups
            .lock()
            .unwrap()
            .entry(room_id.to_string())
            .or_default()
            .insert(conn);
        self.effects
            .lock()
            .unwrap()
            .push(Effect::Subscribe(conn, room_id.to_string()));
    }

    fn unsubscribe(&self, conn: ConnectionId, room_id: &str) {
        let mut groups = self.groups.lock().unwrap();
        if let Some(group) = groups.get_mut(room_id) {
            group.remove(&conn);
            if group.is_empty() {
                groups.remove(room_id);
            }
        }
        self.effects
            .lock()
            .unwrap()
            .push(Effect::Unsubscribe(conn, room_id.to_string()));
    }

    fn broadcast(&self, room_id: &str, state: RoomState) {
        let recipients = self.group(room_id);
        {
            let mut deliveries = self.deliveries.lock().unwrap();
            for to in recipients {
                deliveries.push((to, state.clone()));
            }
        }
        self.effects
            .lock()
            .unwrap()
            .push(Effect::Broadcast(room_id.to_string(), state));
    }

    fn force_disconnect_room(&self, room_id: &str) {
        self.groups.lock().unwrap().remove(room_id);
        self.effects
            .lock()
            .unwrap()
            .push(Effect::ForceDisconnect(room_id.to_string()));
    }
}
