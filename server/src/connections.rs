//! Transport-level connection tracking for the UDP server
//!
//! UDP has no notion of a connection, so the server keeps its own table of
//! addresses that have completed the `Connect` handshake, together with the
//! last time each one was heard from. The table is what turns silence into a
//! `Departing` event: a connection that stops sending heartbeats is removed
//! here exactly once, and only then handed to the room core.

use log::info;
use shared::ConnectionId;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// A client that has completed the handshake.
#[derive(Debug)]
pub struct Connection {
    /// Network address, doubling as the connection identifier
    pub addr: ConnectionId,
    /// Last time we received any packet from this client
    pub last_seen: Instant,
}

impl Connection {
    pub fn new(addr: ConnectionId) -> Self {
        Self {
            addr,
            last_seen: Instant::now(),
        }
    }

    /// Checks if the client has exceeded the connection timeout
    ///
    /// Returns true if no packets have been received from this client
    /// within the specified timeout duration, indicating a likely disconnect.
    pub fn is_timed_out(&self, timeout: Duration) -> bool {
        self.last_seen.elapsed() > timeout
    }
}

/// All live connections, bounded by a capacity limit.
pub struct ConnectionTable {
    connections: HashMap<ConnectionId, Connection>,
    max_connections: usize,
}

impl ConnectionTable {
    pub fn new(max_connections: usize) -> Self {
        Self {
            connections: HashMap::new(),
            max_connections,
        }
    }

    /// Registers a new connection.
    ///
    /// Returns false if the server is at capacity. The caller removes any
    /// existing entry for the address first.
    pub fn add(&mut self, addr: ConnectionId) -> bool {
        if self.connections.len() >= self.max_connections {
            return false;
        }

        info!("Client connected from {}", addr);
        self.connections.insert(addr, Connection::new(addr));
        true
    }

    /// Removes a connection. Returns true if it was present.
    pub fn remove(&mut self, addr: &ConnectionId) -> bool {
        if self.connections.remove(addr).is_some() {
            info!("Client {} disconnected", addr);
            true
        } else {
            false
        }
    }

    pub fn contains(&self, addr: &ConnectionId) -> bool {
        self.connections.contains_key(addr)
    }

    /// Marks a connection as alive. Returns false if it is unknown.
    pub fn touch(&mut self, addr: &ConnectionId) -> bool {
        match self.connections.get_mut(addr) {
            Some(connection) => {
                connection.last_seen = Instant::now();
                true
            }
            None => false,
        }
    }

    /// Removes and returns every connection silent for longer than `timeout`.
    pub fn check_timeouts(&mut self, timeout: Duration) -> Vec<ConnectionId> {
        let timed_out: Vec<ConnectionId> = self
            .connections
            .values()
            .filter(|connection| connection.is_timed_out(timeout))
            .map(|connection| connection.addr)
            .collect();

        for addr in &timed_out {
            self.remove(addr);
        }

        timed_out
    }

    pub fn capacity(&self) -> usize {
        self.max_connections
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;

    fn test_addr() -> SocketAddr {
        "127.0.0.1:8080".parse().unwrap()
    }

    fn test_addr2() -> SocketAddr {
        "127.0.0.1:8081".parse().unwrap()
    }

    #[test]
    fn test_connection_timeout() {
        let mut connection = Connection::new(test_addr());

        assert!(!connection.is_timed_out(Duration::from_secs(1)));

        connection.last_seen = Instant::now() - Duration::from_secs(2);

        assert!(connection.is_timed_out(Duration::from_secs(1)));
    }

    #[test]
    fn test_add_and_remove() {
        let mut table = ConnectionTable::new(2);
        assert!(table.is_empty());

        assert!(table.add(test_addr()));
        assert!(table.contains(&test_addr()));
        assert_eq!(table.len(), 1);

        assert!(table.remove(&test_addr()));
        assert!(!table.remove(&test_addr()));
        assert!(table.is_empty());
    }

    #[test]
    fn test_add_at_capacity() {
        let mut table = ConnectionTable::new(1);
        assert_eq!(table.capacity(), 1);

        assert!(table.add(test_addr()));
        assert!(!table.add(test_addr2()));
        assert_eq!(table.len(), 1);
        assert!(!table.contains(&test_addr2()));
    }

    #[test]
    fn test_touch_unknown_connection() {
        let mut table = ConnectionTable::new(1);
        assert!(!table.touch(&test_addr()));

        table.add(test_addr());
        assert!(table.touch(&test_addr()));
    }

    #[test]
    fn test_check_timeouts_removes_only_silent_connections() {
        let mut table = ConnectionTable::new(2);
        table.add(test_addr());
        table.add(test_addr2());

        table.connections.get_mut(&test_addr()).unwrap().last_seen =
            Instant::now() - Duration::from_secs(10);

        let timed_out = table.check_timeouts(Duration::from_secs(5));
        assert_eq!(timed_out, vec![test_addr()]);
        assert!(!table.contains(&test_addr()));
        assert!(table.contains(&test_addr2()));

        // A second sweep does not report it again.
        assert!(table.check_timeouts(Duration::from_secs(5)).is_empty());
    }

    #[test]
    fn test_touch_resets_timeout() {
        let mut table = ConnectionTable::new(1);
        table.add(test_addr());
        table.connections.get_mut(&test_addr()).unwrap().last_seen =
            Instant::now() - Duration::from_secs(10);

        table.touch(&test_addr());

        assert!(table.check_timeouts(Duration::from_secs(5)).is_empty());
    }
}
