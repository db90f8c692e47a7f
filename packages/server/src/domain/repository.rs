//! ChatStore trait 定義
//!
//! ドメイン層が必要とする永続化のインターフェースを定義します。
//! 具体的な実装は Infrastructure 層が提供します（依存性の逆転）。
//!
//! ## 同期呼び出し
//!
//! リアクターは単一スレッドで動作し、永続化の呼び出しはイベントループの中で
//! 完了まで実行されます。そのため、この trait のメソッドは全て同期です。

use std::collections::HashMap;

use super::{
    ChatMessage, Identity, MessageBody, MessageId, RepositoryError, RoomId, RoomMeta, ScreenName,
    SocketRecordId, SocketToken, UserId,
};

/// Number of messages replayed to a client when it joins a room.
pub const RECENT_HISTORY_LIMIT: usize = 50;

/// Persistence collaborator for the chat core.
///
/// UseCase 層はこの trait に依存し、Infrastructure 層の具体的な実装には依存しない。
#[cfg_attr(test, mockall::automock)]
pub trait ChatStore: Send + Sync {
    /// Identity for a token that exists and has no recorded disconnect time.
    fn authenticate_token(&self, token: &SocketToken) -> Result<Option<Identity>, RepositoryError>;

    /// Refresh the connected-at timestamp of a socket record.
    fn mark_socket_connected(&self, socket_id: SocketRecordId) -> Result<(), RepositoryError>;

    /// Record the disconnect time of a socket record; its token stops authenticating.
    fn mark_socket_disconnected(&self, socket_id: SocketRecordId) -> Result<(), RepositoryError>;

    fn find_room(&self, room_id: RoomId) -> Result<Option<RoomMeta>, RepositoryError>;

    fn verify_room_secret(&self, secret_hash: &str, passphrase: &str) -> bool;

    fn insert_presence(
        &self,
        room_id: RoomId,
        user_id: UserId,
        socket_id: SocketRecordId,
    ) -> Result<(), RepositoryError>;

    /// Delete the occupant row for (room, socket); returns the number of rows removed.
    fn delete_presence(
        &self,
        room_id: RoomId,
        socket_id: SocketRecordId,
    ) -> Result<usize, RepositoryError>;

    /// Delete every occupant row of a socket regardless of room.
    fn delete_presence_for_socket(
        &self,
        socket_id: SocketRecordId,
    ) -> Result<usize, RepositoryError>;

    fn insert_chat_message(
        &self,
        room_id: RoomId,
        user_id: UserId,
        body: &MessageBody,
    ) -> Result<MessageId, RepositoryError>;

    fn fetch_message(&self, message_id: MessageId) -> Result<Option<ChatMessage>, RepositoryError>;

    /// Resolve screen names to user ids; names without a user are absent from the map.
    fn resolve_screen_names(
        &self,
        names: &[ScreenName],
    ) -> Result<HashMap<ScreenName, UserId>, RepositoryError>;

    /// Insert one direct message and one recipient row per id, all or nothing.
    fn insert_direct_message(
        &self,
        sender_id: UserId,
        body: &MessageBody,
        recipient_ids: &[UserId],
        room_id: RoomId,
    ) -> Result<MessageId, RepositoryError>;

    fn fetch_direct_message(
        &self,
        dm_id: MessageId,
        room_id: RoomId,
    ) -> Result<Option<ChatMessage>, RepositoryError>;

    /// Latest room messages, oldest first.
    fn recent_messages(
        &self,
        room_id: RoomId,
        limit: usize,
    ) -> Result<Vec<ChatMessage>, RepositoryError>;

    /// Latest direct messages addressed to `user_id` within `room_id`, oldest first.
    fn recent_direct_messages(
        &self,
        room_id: RoomId,
        user_id: UserId,
        limit: usize,
    ) -> Result<Vec<ChatMessage>, RepositoryError>;
}
