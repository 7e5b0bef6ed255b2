use thiserror::Error;

use crate::protocol::{ConnectionId, RoomId};

/// Reasons a client event was not applied
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CoordinatorError {
    /// The event names a room that is not in the registry. Never surfaced to clients.
    #[error("room {0} does not exist")]
    UnknownRoom(RoomId),

    #[error("malformed event: {0}")]
    Malformed(String),

    #[error("connection {connection} is not the creator of room {room_id}")]
    UnauthorizedSyncComplete {
        room_id: RoomId,
        connection: ConnectionId,
    },
}

impl CoordinatorError {
    /// Whether the originating connection should be told about the rejection.
    pub fn is_reported(&self) -> bool {
        !matches!(self, CoordinatorError::UnknownRoom(_))
    }
}
