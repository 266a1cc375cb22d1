use shared::ConnectionId;
use thiserror::Error;

/// Failures surfaced by the relay server.
///
/// None of these are fatal: the server loop logs them and moves on to the
/// next event.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("invalid room id {0:?}")]
    InvalidRoomId(String),

    #[error("payload of {size} bytes exceeds the {limit} byte limit")]
    PayloadTooLarge { size: usize, limit: usize },

    #[error("{0} is not connected")]
    NotConnected(ConnectionId),

    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),

    #[error("codec error: {0}")]
    Codec(#[from] bincode::Error),
}
