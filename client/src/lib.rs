//! # Room Relay Client Library
//!
//! A thin UDP client for the room relay server. It performs the handshake,
//! joins rooms, submits payload updates and receives room snapshots.
//!
//! ## Staleness
//!
//! Snapshots carry a per-room version. The client remembers the newest version
//! it has applied for the current room and drops anything older, so a
//! reordered datagram can never roll the local view backwards. Joining a room
//! resets that memory, since a recreated room starts counting again.
//!
//! ## Liveness
//!
//! The server drops clients it has not heard from for a few seconds. Callers
//! that may sit idle must send [`RelayClient::heartbeat`] periodically.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::RelayClient;
//! use std::time::Duration;
//!
//! # async fn example() -> client::network::Result<()> {
//! let mut client = RelayClient::connect("127.0.0.1:8080".parse()?).await?;
//! client.join("lobby").await?;
//! client.update(b"{\"score\":5}".to_vec()).await?;
//!
//! if let Some(state) = client.next_room_state(Duration::from_secs(1)).await? {
//!     println!("host is {}, {} players", state.host, state.players.len());
//! }
//! client.disconnect().await?;
//! # Ok(())
//! # }
//! ```

pub mod network;

pub use network::RelayClient;
