use log::{debug, info, warn};
use shared::{Packet, RoomId, RoomState, PROTOCOL_VERSION};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::timeout;

pub type Result<T> = std::result::Result<T, Box<dyn std::error::Error + Send + Sync>>;

/// How long `connect` waits for the server to answer the handshake.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(2);

/// UDP connection to a relay server.
pub struct RelayClient {
    socket: UdpSocket,
    server_addr: SocketAddr,
    /// Room and version of the newest snapshot applied so far.
    last_state: Option<(RoomId, u64)>,
}

impl RelayClient {
    /// Binds a local socket and completes the handshake.
    ///
    /// Fails if the server refuses the connection or does not answer within
    /// [`HANDSHAKE_TIMEOUT`].
    pub async fn connect(server_addr: SocketAddr) -> Result<Self> {
        let socket = UdpSocket::bind(local_bind_addr(server_addr)).await?;
        let client = RelayClient {
            socket,
            server_addr,
            last_state: None,
        };

        info!("Connecting to server at {}...", server_addr);
        client
            .send_packet(&Packet::Connect {
                client_version: PROTOCOL_VERSION,
            })
            .await?;

        loop {
            match client.recv_packet(HANDSHAKE_TIMEOUT).await? {
                Some(Packet::Connected) => {
                    info!("Connected as {}", client.local_addr()?);
                    return Ok(client);
                }
                Some(Packet::Disconnected { reason }) => {
                    return Err(format!("connection refused: {}", reason).into());
                }
                Some(other) => debug!("Ignoring {:?} during handshake", other),
                None => return Err("timed out waiting for server".into()),
            }
        }
    }

    /// The address the server knows this client by.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    async fn send_packet(&self, packet: &Packet) -> Result<()> {
        let data = packet.encode()?;
        self.socket.send_to(&data, self.server_addr).await?;
        Ok(())
    }

    pub async fn join(&mut self, room_id: &str) -> Result<()> {
        self.last_state = None;
        self.send_packet(&Packet::Join {
            room_id: room_id.to_string(),
        })
        .await
    }

    pub async fn update(&self, payload: Vec<u8>) -> Result<()> {
        self.send_packet(&Packet::Update { payload }).await
    }

    pub async fn heartbeat(&self) -> Result<()> {
        self.send_packet(&Packet::Heartbeat).await
    }

    pub async fn disconnect(&self) -> Result<()> {
        self.send_packet(&Packet::Disconnect).await
    }

    /// Waits up to `wait` for the next packet from the server.
    ///
    /// Returns `None` on timeout. Datagrams from other senders and undecodable
    /// datagrams are skipped.
    pub async fn recv_packet(&self, wait: Duration) -> Result<Option<Packet>> {
        let mut buffer = vec![0u8; shared::MAX_PACKET_SIZE];
        let deadline = tokio::time::Instant::now() + wait;

        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            let (len, from) = match timeout(remaining, self.socket.recv_from(&mut buffer)).await {
                Ok(received) => received?,
                Err(_) => return Ok(None),
            };

            if from != self.server_addr {
                warn!("Ignoring datagram from {}", from);
                continue;
            }

            match Packet::decode(&buffer[..len]) {
                Ok(packet) => return Ok(Some(packet)),
                Err(e) => warn!("Failed to deserialize packet: {}", e),
            }
        }
    }

    /// Records `state` as applied unless it is older than what we already have.
    pub fn accept_state(&mut self, state: &RoomState) -> bool {
        if let Some((room_id, version)) = &self.last_state {
            if *room_id == state.room_id && state.version <= *version {
                debug!(
                    "Dropping stale state v{} for room {}",
                    state.version, state.room_id
                );
                return false;
            }
        }
        self.last_state = Some((state.room_id.clone(), state.version));
        true
    }

    /// Waits for the next fresh room snapshot.
    ///
    /// Returns `None` on timeout and an error if the server disconnects us.
    pub async fn next_room_state(&mut self, wait: Duration) -> Result<Option<RoomState>> {
        let deadline = tokio::time::Instant::now() + wait;

        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            match self.recv_packet(remaining).await? {
                Some(Packet::RoomState(state)) => {
                    if self.accept_state(&state) {
                        return Ok(Some(state));
                    }
                }
                Some(Packet::Disconnected { reason }) => {
                    return Err(format!("disconnected: {}", reason).into());
                }
                Some(other) => debug!("Ignoring {:?}", other),
                None => return Ok(None),
            }
        }
    }
}

/// Picks a local bind address the server will see as-is.
fn local_bind_addr(server_addr: SocketAddr) -> SocketAddr {
    let ip = match (server_addr.ip().is_loopback(), server_addr) {
        (true, SocketAddr::V4(_)) => IpAddr::V4(Ipv4Addr::LOCALHOST),
        (true, SocketAddr::V6(_)) => IpAddr::V6(Ipv6Addr::LOCALHOST),
        (false, SocketAddr::V4(_)) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        (false, SocketAddr::V6(_)) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
    };
    SocketAddr::new(ip, 0)
}
