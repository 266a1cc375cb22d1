//! Entry point binding transport events to the room core.

use crate::error::RelayError;
use crate::lifecycle::{DepartOutcome, JoinOutcome, RoomLifecycle};
use crate::relay::{BroadcastRelay, Transport};
use crate::room::RoomStore;
use crate::session::SessionRegistry;
use log::{error, warn};
use shared::{ConnectionId, RoomId, MAX_ROOM_ID_LEN};
use std::sync::Arc;

/// Events raised by the transport for a single connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    Joined {
        conn: ConnectionId,
        room_id: RoomId,
    },
    Updated {
        conn: ConnectionId,
        payload: Vec<u8>,
    },
    /// Raised exactly once per disconnect.
    Departing {
        conn: ConnectionId,
    },
}

impl ConnectionEvent {
    pub fn conn(&self) -> ConnectionId {
        match self {
            ConnectionEvent::Joined { conn, .. }
            | ConnectionEvent::Updated { conn, .. }
            | ConnectionEvent::Departing { conn } => *conn,
        }
    }
}

/// Owns the session registry, room store, lifecycle manager and relay, and
/// routes each connection event to the right one.
pub struct EventDispatcher {
    sessions: Arc<SessionRegistry>,
    rooms: Arc<RoomStore>,
    lifecycle: RoomLifecycle,
    relay: Arc<BroadcastRelay>,
    max_payload_bytes: usize,
}

impl EventDispatcher {
    pub fn new(transport: Arc<dyn Transport>, max_payload_bytes: usize) -> Self {
        let sessions = Arc::new(SessionRegistry::new());
        let rooms = Arc::new(RoomStore::new());
        let relay = Arc::new(BroadcastRelay::new(
            Arc::clone(&sessions),
            Arc::clone(&rooms),
            Arc::clone(&transport),
        ));
        let lifecycle = RoomLifecycle::new(
            Arc::clone(&sessions),
            Arc::clone(&rooms),
            Arc::clone(&relay),
            transport,
        );

        Self {
            sessions,
            rooms,
            lifecycle,
            relay,
            max_payload_bytes,
        }
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    pub fn rooms(&self) -> &RoomStore {
        &self.rooms
    }

    pub async fn on_join(
        &self,
        conn: ConnectionId,
        room_id: &str,
    ) -> Result<JoinOutcome, RelayError> {
        validate_room_id(room_id)?;
        Ok(self.lifecycle.join(conn, room_id).await)
    }

    /// Returns whether the update was applied; updates from connections not
    /// in a room are dropped without error.
    pub async fn on_update(
        &self,
        conn: ConnectionId,
        payload: Vec<u8>,
    ) -> Result<bool, RelayError> {
        if payload.len() > self.max_payload_bytes {
            return Err(RelayError::PayloadTooLarge {
                size: payload.len(),
                limit: self.max_payload_bytes,
            });
        }
        Ok(self.relay.accept_update(conn, payload).await)
    }

    pub async fn on_disconnect(&self, conn: ConnectionId) -> DepartOutcome {
        self.lifecycle.depart(conn).await
    }

    pub async fn dispatch(&self, event: ConnectionEvent) -> Result<(), RelayError> {
        match event {
            ConnectionEvent::Joined { conn, room_id } => {
                self.on_join(conn, &room_id).await?;
            }
            ConnectionEvent::Updated { conn, payload } => {
                self.on_update(conn, payload).await?;
            }
            ConnectionEvent::Departing { conn } => {
                self.on_disconnect(conn).await;
            }
        }
        Ok(())
    }

    /// Handles one event on its own task so that an error or a panic is
    /// confined to that event. Returns once the event has been fully handled,
    /// which keeps a connection's events in order.
    pub async fn dispatch_isolated(self: &Arc<Self>, event: ConnectionEvent) {
        let conn = event.conn();
        let dispatcher = Arc::clone(self);

        match tokio::spawn(async move { dispatcher.dispatch(event).await }).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Dropped event from {}: {}", conn, e),
            Err(e) => error!("Event handler for {} failed: {}", conn, e),
        }
    }
}

fn validate_room_id(room_id: &str) -> Result<(), RelayError> {
    if room_id.is_empty()
        || room_id.len() > MAX_ROOM_ID_LEN
        || room_id.chars().any(char::is_control)
    {
        return Err(RelayError::InvalidRoomId(room_id.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{conn, RecordingTransport};
    use shared::MAX_PAYLOAD_BYTES;

    fn dispatcher() -> (Arc<EventDispatcher>, Arc<RecordingTransport>) {
        let transport = Arc::new(RecordingTransport::default());
        let dispatcher = Arc::new(EventDispatcher::new(transport.clone(), MAX_PAYLOAD_BYTES));
        (dispatcher, transport)
    }

    fn joined(port: u16, room_id: &str) -> ConnectionEvent {
        ConnectionEvent::Joined {
            conn: conn(port),
            room_id: room_id.to_string(),
        }
    }

    fn updated(port: u16, payload: &[u8]) -> ConnectionEvent {
        ConnectionEvent::Updated {
            conn: conn(port),
            payload: payload.to_vec(),
        }
    }

    fn departing(port: u16) -> ConnectionEvent {
        ConnectionEvent::Departing { conn: conn(port) }
    }

    #[tokio::test]
    async fn test_room_session_walkthrough() {
        let (d, transport) = dispatcher();
        let (a, b, c) = (conn(1), conn(2), conn(3));

        // A creates R1.
        d.dispatch(joined(1, "R1")).await.unwrap();
        let state = transport.broadcasts().pop().unwrap();
        assert_eq!(state.host, a);
        assert_eq!(state.players, vec![a]);

        // B joins, host unchanged.
        d.dispatch(joined(2, "R1")).await.unwrap();
        let state = transport.broadcasts().pop().unwrap();
        assert_eq!(state.host, a);
        assert_eq!(state.players, vec![a, b]);

        // A updates; both members receive the new payload.
        transport.clear();
        d.dispatch(updated(1, b"{score: 5}")).await.unwrap();
        let deliveries = transport.deliveries();
        assert_eq!(
            deliveries.iter().map(|(to, _)| *to).collect::<Vec<_>>(),
            vec![a, b]
        );
        assert!(deliveries
            .iter()
            .all(|(_, s)| s.payload == b"{score: 5}".to_vec() && s.players == vec![a, b]));

        // A leaves; B becomes host and is told so.
        transport.clear();
        d.dispatch(departing(1)).await.unwrap();
        let deliveries = transport.deliveries();
        assert_eq!(deliveries.len(), 1);
        assert_eq!(deliveries[0].0, b);
        assert_eq!(deliveries[0].1.host, b);

        // B leaves; the room is gone and nothing more is broadcast.
        transport.clear();
        d.dispatch(departing(2)).await.unwrap();
        assert!(d.rooms().get("R1").await.is_none());
        assert!(transport.broadcasts().is_empty());

        // C recreates R1 from scratch.
        d.dispatch(joined(3, "R1")).await.unwrap();
        let state = transport.broadcasts().pop().unwrap();
        assert_eq!(state.host, c);
        assert_eq!(state.players, vec![c]);
        assert!(state.payload.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_room_ids_are_rejected() {
        let (d, transport) = dispatcher();

        for bad in ["".to_string(), "x".repeat(MAX_ROOM_ID_LEN + 1), "a\nb".to_string()] {
            let result = d.on_join(conn(1), &bad).await;
            assert!(matches!(result, Err(RelayError::InvalidRoomId(_))));
        }
        assert!(transport.effects().is_empty());
        assert!(d.sessions().is_empty().await);
    }

    #[tokio::test]
    async fn test_oversized_payload_is_rejected() {
        let transport = Arc::new(RecordingTransport::default());
        let d = EventDispatcher::new(transport.clone(), 4);
        d.on_join(conn(1), "R1").await.unwrap();
        transport.clear();

        let result = d.on_update(conn(1), vec![0; 5]).await;
        assert!(matches!(
            result,
            Err(RelayError::PayloadTooLarge { size: 5, limit: 4 })
        ));
        assert!(transport.broadcasts().is_empty());

        assert!(d.on_update(conn(1), vec![0; 4]).await.unwrap());
    }

    #[tokio::test]
    async fn test_unattached_update_is_not_an_error() {
        let (d, transport) = dispatcher();

        assert!(!d.on_update(conn(1), b"nobody".to_vec()).await.unwrap());
        tokio_test::assert_ok!(d.dispatch(updated(1, b"nobody")).await);
        assert!(transport.effects().is_empty());
    }

    #[tokio::test]
    async fn test_failed_event_does_not_affect_other_connections() {
        let (d, transport) = dispatcher();

        d.dispatch_isolated(joined(1, "")).await;
        d.dispatch_isolated(joined(2, "R1")).await;
        d.dispatch_isolated(updated(2, b"ok")).await;

        assert_eq!(d.sessions().len().await, 1);
        assert_eq!(transport.broadcasts().pop().unwrap().payload, b"ok".to_vec());
    }

    /// Panics when asked to publish to the "boom" room.
    #[derive(Default)]
    struct PanickingTransport {
        inner: RecordingTransport,
    }

    impl Transport for PanickingTransport {
        fn subscribe(&self, conn: ConnectionId, room_id: &str) {
            self.inner.subscribe(conn, room_id);
        }

        fn unsubscribe(&self, conn: ConnectionId, room_id: &str) {
            self.inner.unsubscribe(conn, room_id);
        }

        fn broadcast(&self, room_id: &str, state: shared::RoomState) {
            if room_id == "boom" {
                panic!("broadcast to {} failed", room_id);
            }
            self.inner.broadcast(room_id, state);
        }

        fn force_disconnect_room(&self, room_id: &str) {
            self.inner.force_disconnect_room(room_id);
        }
    }

    #[tokio::test]
    async fn test_panicking_event_does_not_affect_other_connections() {
        let transport = Arc::new(PanickingTransport::default());
        let d = Arc::new(EventDispatcher::new(transport.clone(), MAX_PAYLOAD_BYTES));

        d.dispatch_isolated(joined(1, "boom")).await;
        d.dispatch_isolated(joined(2, "R1")).await;
        d.dispatch_isolated(updated(2, b"ok")).await;

        let state = transport.inner.broadcasts().pop().unwrap();
        assert_eq!(state.room_id, "R1");
        assert_eq!(state.players, vec![conn(2)]);
        assert_eq!(state.payload, b"ok".to_vec());
    }

    #[test]
    fn test_event_conn() {
        assert_eq!(joined(1, "R1").conn(), conn(1));
        assert_eq!(updated(2, b"").conn(), conn(2));
        assert_eq!(departing(3).conn(), conn(3));
    }
}
