//! UseCase 層
//!
//! 各ユースケースは `ChatStore`（永続化）と `PresenceIndex`（メモリ上の索引）を
//! 操作し、配信すべきメッセージと配信先の接続を返します。
//! 実際の送信（JSON 化とフレーム書き込み）は UI 層が行います。

pub mod authenticate_socket;
pub mod disconnect_participant;
pub mod error;
pub mod join_room;
pub mod leave_room;
pub mod send_direct_message;
pub mod send_message;

pub use authenticate_socket::AuthenticateSocketUseCase;
pub use disconnect_participant::DisconnectParticipantUseCase;
pub use error::{
    AuthenticateError, JoinRoomError, LeaveRoomError, SendDirectMessageError, SendMessageError,
};
pub use join_room::{JoinOutcome, JoinRoomUseCase};
pub use leave_room::LeaveRoomUseCase;
pub use send_direct_message::SendDirectMessageUseCase;
pub use send_message::SendMessageUseCase;

use crate::domain::{ChatMessage, ConnectionId, PresenceChange};

/// A persisted message and the connections it must be pushed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub message: ChatMessage,
    pub targets: Vec<ConnectionId>,
}

/// A membership change for the other members of a room.
///
/// The presence event always goes out; the "joined/left the chat" notice only
/// when it could be persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomNotice {
    pub change: PresenceChange,
    pub message: Option<ChatMessage>,
    pub targets: Vec<ConnectionId>,
}
