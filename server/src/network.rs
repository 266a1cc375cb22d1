//! Server network layer handling UDP communications and event sequencing

use crate::connections::ConnectionTable;
use crate::dispatcher::{ConnectionEvent, EventDispatcher};
use crate::error::RelayError;
use crate::relay::Transport;
use log::{debug, error, info, warn};
use shared::{
    ConnectionId, Packet, RoomId, RoomState, MAX_CLIENTS, MAX_PACKET_SIZE, MAX_PAYLOAD_BYTES,
    PROTOCOL_VERSION,
};
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio::time::interval;

/// Runtime settings for [`Server`].
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub max_clients: usize,
    /// Silence after which a connection is considered gone.
    pub client_timeout: Duration,
    pub max_payload_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".to_string(),
            max_clients: 256,
            client_timeout: Duration::from_secs(5),
            max_payload_bytes: MAX_PAYLOAD_BYTES,
        }
    }
}

/// Messages sent from network tasks to main server loop
#[derive(Debug)]
pub enum ServerMessage {
    PacketReceived {
        packet: Packet,
        addr: SocketAddr,
    },
    /// Removed from the connection table by a timeout or a forced close.
    ConnectionLost {
        addr: SocketAddr,
    },
    Shutdown,
}

/// Messages sent from the room core to the network sender task
#[derive(Debug)]
pub enum OutboundMessage {
    SendPacket {
        packet: Packet,
        addr: SocketAddr,
    },
    Subscribe {
        conn: ConnectionId,
        room_id: RoomId,
    },
    Unsubscribe {
        conn: ConnectionId,
        room_id: RoomId,
    },
    Broadcast {
        room_id: RoomId,
        state: RoomState,
    },
    CloseRoom {
        room_id: RoomId,
    },
}

/// [`Transport`] backed by the sender task's queue.
///
/// Enqueueing never blocks, and the single consumer preserves the order in
/// which effects were produced.
pub struct OutboundQueue {
    tx: mpsc::UnboundedSender<OutboundMessage>,
}

impl OutboundQueue {
    pub fn new(tx: mpsc::UnboundedSender<OutboundMessage>) -> Self {
        Self { tx }
    }

    fn enqueue(&self, message: OutboundMessage) {
        if let Err(e) = self.tx.send(message) {
            error!("Failed to queue outbound message: {}", e);
        }
    }

    pub fn send_packet(&self, packet: Packet, addr: SocketAddr) {
        self.enqueue(OutboundMessage::SendPacket { packet, addr });
    }
}

impl Transport for OutboundQueue {
    fn subscribe(&self, conn: ConnectionId, room_id: &str) {
        self.enqueue(OutboundMessage::Subscribe {
            conn,
            room_id: room_id.to_string(),
        });
    }

    fn unsubscribe(&self, conn: ConnectionId, room_id: &str) {
        self.enqueue(OutboundMessage::Unsubscribe {
            conn,
            room_id: room_id.to_string(),
        });
    }

    fn broadcast(&self, room_id: &str, state: RoomState) {
        self.enqueue(OutboundMessage::Broadcast {
            room_id: room_id.to_string(),
            state,
        });
    }

    fn force_disconnect_room(&self, room_id: &str) {
        self.enqueue(OutboundMessage::CloseRoom {
            room_id: room_id.to_string(),
        });
    }
}

/// Stops a running [`Server`] from another task.
#[derive(Clone)]
pub struct ShutdownHandle {
    tx: mpsc::UnboundedSender<ServerMessage>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        let _ = self.tx.send(ServerMessage::Shutdown);
    }
}

/// UDP relay server feeding connection events into the room core
pub struct Server {
    socket: Arc<UdpSocket>,
    connections: Arc<RwLock<ConnectionTable>>,
    dispatcher: Arc<EventDispatcher>,
    outbound: Arc<OutboundQueue>,
    client_timeout: Duration,
    tasks: Vec<JoinHandle<()>>,

    // Communication channels
    server_tx: mpsc::UnboundedSender<ServerMessage>,
    server_rx: mpsc::UnboundedReceiver<ServerMessage>,
    outbound_rx: Option<mpsc::UnboundedReceiver<OutboundMessage>>,
}

impl Server {
    pub async fn new(config: ServerConfig) -> Result<Self, RelayError> {
        let socket = Arc::new(UdpSocket::bind(&config.bind_addr).await?);
        info!("Server listening on {}", socket.local_addr()?);

        // Larger rooms would not fit a snapshot in one datagram.
        let max_clients = config.max_clients.min(MAX_CLIENTS);
        if max_clients < config.max_clients {
            warn!(
                "max_clients {} exceeds the protocol limit, using {}",
                config.max_clients, max_clients
            );
        }

        let (server_tx, server_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let outbound = Arc::new(OutboundQueue::new(outbound_tx));
        let dispatcher = Arc::new(EventDispatcher::new(
            outbound.clone(),
            config.max_payload_bytes,
        ));

        Ok(Server {
            socket,
            connections: Arc::new(RwLock::new(ConnectionTable::new(max_clients))),
            dispatcher,
            outbound,
            client_timeout: config.client_timeout,
            tasks: Vec::new(),
            server_tx,
            server_rx,
            outbound_rx: Some(outbound_rx),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, RelayError> {
        Ok(self.socket.local_addr()?)
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            tx: self.server_tx.clone(),
        }
    }

    /// Spawns task that continuously listens for incoming packets
    fn spawn_network_receiver(&mut self) {
        let socket = Arc::clone(&self.socket);
        let server_tx = self.server_tx.clone();

        self.tasks.push(tokio::spawn(async move {
            let mut buffer = vec![0u8; MAX_PACKET_SIZE];

            loop {
                match socket.recv_from(&mut buffer).await {
                    Ok((len, addr)) => match Packet::decode(&buffer[..len]) {
                        Ok(packet) => {
                            if let Err(e) =
                                server_tx.send(ServerMessage::PacketReceived { packet, addr })
                            {
                                error!("Failed to send packet to main loop: {}", e);
                                break;
                            }
                        }
                        Err(e) => warn!("Failed to deserialize packet from {}: {}", addr, e),
                    },
                    Err(e) => {
                        error!("Error receiving packet: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            }
        }));
    }

    /// Spawns task that drains the outbound queue and owns the broadcast groups
    fn spawn_network_sender(&mut self) {
        let socket = Arc::clone(&self.socket);
        let connections = Arc::clone(&self.connections);
        let server_tx = self.server_tx.clone();
        let Some(mut outbound_rx) = self.outbound_rx.take() else {
            return;
        };

        self.tasks.push(tokio::spawn(async move {
            let mut groups: HashMap<RoomId, HashSet<ConnectionId>> = HashMap::new();

            while let Some(message) = outbound_rx.recv().await {
                match message {
                    OutboundMessage::SendPacket { packet, addr } => {
                        if let Err(e) = Self::send_packet_impl(&socket, &packet, addr).await {
                            error!("Failed to send packet to {}: {}", addr, e);
                        }
                    }
                    OutboundMessage::Subscribe { conn, room_id } => {
                        groups.entry(room_id).or_default().insert(conn);
                    }
                    OutboundMessage::Unsubscribe { conn, room_id } => {
                        if let Some(group) = groups.get_mut(&room_id) {
                            group.remove(&conn);
                            if group.is_empty() {
                                groups.remove(&room_id);
                            }
                        }
                    }
                    OutboundMessage::Broadcast { room_id, state } => {
                        let Some(group) = groups.get(&room_id) else {
                            continue;
                        };

                        let data = match Packet::RoomState(state).encode() {
                            Ok(data) => data,
                            Err(e) => {
                                error!("Failed to encode state for room {}: {}", room_id, e);
                                continue;
                            }
                        };

                        for addr in group {
                            if let Err(e) = socket.send_to(&data, *addr).await {
                                error!("Failed to send to client {}: {}", addr, e);
                            }
                        }
                        debug!("Sent state update to room {}", room_id);
                    }
                    OutboundMessage::CloseRoom { room_id } => {
                        let Some(stragglers) = groups.remove(&room_id) else {
                            continue;
                        };

                        warn!(
                            "Room {} closed with {} attached connections",
                            room_id,
                            stragglers.len()
                        );
                        let packet = Packet::Disconnected {
                            reason: "Room closed".to_string(),
                        };
                        for addr in stragglers {
                            if let Err(e) = Self::send_packet_impl(&socket, &packet, addr).await {
                                error!("Failed to send packet to {}: {}", addr, e);
                            }
                            if connections.write().await.remove(&addr) {
                                let _ = server_tx.send(ServerMessage::ConnectionLost { addr });
                            }
                        }
                    }
                }
            }
        }));
    }

    /// Spawns task that monitors client timeouts
    fn spawn_timeout_checker(&mut self) {
        let connections = Arc::clone(&self.connections);
        let server_tx = self.server_tx.clone();
        let timeout = self.client_timeout;
        let period = (timeout / 2).clamp(Duration::from_millis(10), Duration::from_secs(1));

        self.tasks.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);

            loop {
                interval.tick().await;

                let timed_out = {
                    let mut connections = connections.write().await;
                    connections.check_timeouts(timeout)
                };

                for addr in timed_out {
                    info!("Client {} timed out", addr);
                    if let Err(e) = server_tx.send(ServerMessage::ConnectionLost { addr }) {
                        error!("Failed to send timeout message: {}", e);
                        break;
                    }
                }
            }
        }));
    }

    async fn send_packet_impl(
        socket: &UdpSocket,
        packet: &Packet,
        addr: SocketAddr,
    ) -> Result<(), RelayError> {
        let data = packet.encode()?;
        socket.send_to(&data, addr).await?;
        Ok(())
    }

    /// Refreshes liveness for a connected address.
    async fn touch(&self, addr: SocketAddr) -> Result<(), RelayError> {
        let mut connections = self.connections.write().await;
        if connections.touch(&addr) {
            Ok(())
        } else {
            Err(RelayError::NotConnected(addr))
        }
    }

    /// Processes incoming packets and turns them into connection events
    async fn handle_packet(&self, packet: Packet, addr: SocketAddr) -> Result<(), RelayError> {
        match packet {
            Packet::Connect { client_version } => {
                info!(
                    "Client connecting from {} (version: {})",
                    addr, client_version
                );

                if client_version != PROTOCOL_VERSION {
                    let response = Packet::Disconnected {
                        reason: "Protocol version mismatch".to_string(),
                    };
                    self.outbound.send_packet(response, addr);
                    return Ok(());
                }

                // A second handshake from a known address replaces the old attachment
                let existed = self.connections.write().await.remove(&addr);
                if existed {
                    info!("Replacing existing connection from {}", addr);
                    self.dispatcher
                        .dispatch_isolated(ConnectionEvent::Departing { conn: addr })
                        .await;
                }

                let accepted = self.connections.write().await.add(addr);
                let response = if accepted {
                    Packet::Connected
                } else {
                    Packet::Disconnected {
                        reason: "Server full".to_string(),
                    }
                };
                self.outbound.send_packet(response, addr);
            }

            Packet::Join { room_id } => {
                self.touch(addr).await?;
                info!("{} tried to join room {}", addr, room_id);
                self.dispatcher
                    .dispatch_isolated(ConnectionEvent::Joined {
                        conn: addr,
                        room_id,
                    })
                    .await;
            }

            Packet::Update { payload } => {
                self.touch(addr).await?;
                self.dispatcher
                    .dispatch_isolated(ConnectionEvent::Updated {
                        conn: addr,
                        payload,
                    })
                    .await;
            }

            Packet::Heartbeat => {
                self.touch(addr).await?;
            }

            Packet::Disconnect => {
                let removed = self.connections.write().await.remove(&addr);
                if removed {
                    self.dispatcher
                        .dispatch_isolated(ConnectionEvent::Departing { conn: addr })
                        .await;
                }
            }

            _ => {
                warn!("Unexpected packet type from client at {}", addr);
            }
        }

        Ok(())
    }

    async fn log_stats(&self) {
        let connections = self.connections.read().await.len();
        if connections > 0 {
            debug!(
                "{} connections, {} attached, {} rooms",
                connections,
                self.dispatcher.sessions().len().await,
                self.dispatcher.rooms().len().await
            );
        }
    }

    /// Main server loop sequencing all connection events
    pub async fn run(&mut self) -> Result<(), RelayError> {
        // Initialize concurrent tasks
        self.spawn_network_receiver();
        self.spawn_network_sender();
        self.spawn_timeout_checker();

        let mut stats_interval = interval(Duration::from_secs(30));

        info!("Server started successfully");

        loop {
            tokio::select! {
                message = self.server_rx.recv() => {
                    match message {
                        Some(ServerMessage::PacketReceived { packet, addr }) => {
                            if let Err(e) = self.handle_packet(packet, addr).await {
                                warn!("Ignoring packet from {}: {}", addr, e);
                            }
                        },
                        Some(ServerMessage::ConnectionLost { addr }) => {
                            self.dispatcher
                                .dispatch_isolated(ConnectionEvent::Departing { conn: addr })
                                .await;
                        },
                        Some(ServerMessage::Shutdown) | None => {
                            info!("Server shutting down");
                            break;
                        }
                    }
                },

                _ = stats_interval.tick() => {
                    self.log_stats().await;
                },
            }
        }

        for task in self.tasks.drain(..) {
            task.abort();
        }

        Ok(())
    }
}
