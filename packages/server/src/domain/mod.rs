//! ドメイン層
//!
//! Value Object、Entity、インメモリのルーム/プレゼンス索引、
//! そして外部協調者（永続化・メッセージ送信）のインターフェースを定義します。

pub mod entity;
pub mod error;
pub mod message_pusher;
pub mod presence;
pub mod repository;
pub mod value_object;

pub use entity::{ChatMessage, Identity, PresenceAction, PresenceChange, RoomMeta, Session};
pub use error::{MessagePushError, RepositoryError, ValueObjectError};
pub use message_pusher::MessagePusher;
pub use presence::PresenceIndex;
pub use repository::{ChatStore, RECENT_HISTORY_LIMIT};
pub use value_object::{
    ConnectionId, MAX_MESSAGE_BODY_CHARS, MessageBody, MessageId, RoomId, ScreenName,
    SocketRecordId, SocketToken, Timestamp, UserId,
};

#[cfg(test)]
pub use repository::MockChatStore;
