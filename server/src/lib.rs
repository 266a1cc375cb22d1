//! # Room Relay Server Library
//!
//! This library provides a real-time, room-based state relay. Clients attach to
//! a named room, any member may submit the room's state, and every member
//! receives the full room whenever it changes. The state itself is an opaque
//! byte payload that the server forwards verbatim and never interprets.
//!
//! ## Core Responsibilities
//!
//! ### Room Lifecycle
//! Rooms come into existence when the first client joins an unknown room id
//! (that client becomes the host) and disappear in the same step that removes
//! their last player. When the host leaves, the role passes to the smallest
//! remaining connection id and the room is re-published.
//!
//! ### State Broadcasting
//! Every join, every update and every host migration publishes a complete
//! snapshot of the room to all of its members. Updates are last-writer-wins:
//! the host is not the only member allowed to write.
//!
//! ### Connection Management
//! The UDP layer performs a small handshake, tracks liveness through
//! heartbeats, and turns explicit disconnects and timeouts into exactly one
//! departure per connection.
//!
//! ## Architecture Design
//!
//! ### Per-Room Locking
//! Each room lives behind its own mutex inside the room store. Joins, updates
//! and departures that target the same room are linearized; unrelated rooms
//! never contend. Snapshots are enqueued while the room lock is held, so a
//! connection never observes an older snapshot after a newer one.
//!
//! ### Sequenced Event Loop
//! Like the rest of the network layer, the server loop handles one packet at a
//! time. Each event runs on its own task and is awaited before the next, so a
//! failing event is contained without reordering a connection's events.
//!
//! ## Module Organization
//!
//! - `session`: connection -> room registry
//! - `room`: room entities and the room store
//! - `lifecycle`: join, departure, host migration, teardown
//! - `relay`: snapshot publishing, member updates and the `Transport` seam
//! - `dispatcher`: entry point for connection events
//! - `connections`: handshake and liveness tracking for UDP peers
//! - `network`: sockets, outbound queue and the server loop
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::network::{Server, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut server = Server::new(ServerConfig {
//!         bind_addr: "127.0.0.1:8080".to_string(),
//!         ..ServerConfig::default()
//!     })
//!     .await?;
//!
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod connections;
pub mod dispatcher;
pub mod error;
pub mod lifecycle;
pub mod network;
pub mod relay;
pub mod room;
pub mod session;

#[cfg(test)]
mod testing;

pub use error::RelayError;
