//! Entity 定義

use super::value_object::{
    ConnectionId, MessageBody, MessageId, RoomId, ScreenName, SocketRecordId, Timestamp, UserId,
};

/// Result of authenticating a socket token.
///
/// Never mutated after the handshake that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: UserId,
    pub screen_name: ScreenName,
    pub socket_record_id: SocketRecordId,
}

impl Identity {
    pub fn new(user_id: UserId, screen_name: ScreenName, socket_record_id: SocketRecordId) -> Self {
        Self {
            user_id,
            screen_name,
            socket_record_id,
        }
    }
}

/// Room metadata as known by persistence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomMeta {
    pub id: RoomId,
    pub name: String,
    /// Hash of the room passphrase; `None` for open rooms.
    pub secret_hash: Option<String>,
}

impl RoomMeta {
    pub fn is_locked(&self) -> bool {
        self.secret_hash.is_some()
    }
}

/// A persisted chat message or direct message, as read back after insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub id: MessageId,
    pub room_id: RoomId,
    pub body: MessageBody,
    pub created_at: Timestamp,
    pub sender: ScreenName,
    pub is_dm: bool,
}

/// Direction of a room membership change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceAction {
    Join,
    Leave,
}

/// A member entering or leaving a room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceChange {
    pub room_id: RoomId,
    pub action: PresenceAction,
    pub user_id: UserId,
    pub screen_name: ScreenName,
}

impl PresenceChange {
    pub fn new(room_id: RoomId, action: PresenceAction, identity: &Identity) -> Self {
        Self {
            room_id,
            action,
            user_id: identity.user_id,
            screen_name: identity.screen_name.clone(),
        }
    }
}

/// Chat-side state of an authenticated connection.
///
/// The transport side (socket, buffers) lives in the reactor; both halves share
/// the same [`ConnectionId`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub connection_id: ConnectionId,
    pub identity: Identity,
    pub current_room: Option<RoomId>,
}

impl Session {
    pub fn new(connection_id: ConnectionId, identity: Identity) -> Self {
        Self {
            connection_id,
            identity,
            current_room: None,
        }
    }

    pub fn is_in_room(&self, room_id: RoomId) -> bool {
        self.current_room == Some(room_id)
    }
}
