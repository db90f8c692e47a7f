//! UseCase: メッセージ送信処理
//!
//! 送信者が参加中のルームにメッセージを保存し、送信者を含む
//! ルームの全メンバーへの配信を返します。
//!
//! 検証の順序（最初に失敗したものがエラーになる）:
//! ルーム未参加 → ルーム不一致 → 本文が空・長すぎる → 保存失敗

use std::sync::Arc;

use crate::domain::{
    ChatStore, ConnectionId, MessageBody, PresenceIndex, RepositoryError, RoomId, ValueObjectError,
};

use super::{Delivery, error::SendMessageError};

/// メッセージ送信のユースケース
pub struct SendMessageUseCase {
    store: Arc<dyn ChatStore>,
}

impl SendMessageUseCase {
    pub fn new(store: Arc<dyn ChatStore>) -> Self {
        Self { store }
    }

    /// メッセージ送信を実行
    ///
    /// # Arguments
    ///
    /// * `room_id` - クライアントが指定したルーム（参加中のルームと一致する必要がある）
    /// * `body` - トリム前の本文
    ///
    /// # Returns
    ///
    /// * `Ok(Delivery)` - 保存されたメッセージと配信先（送信者を含む）
    /// * `Err(SendMessageError)` - 送信失敗（状態は変更されない）
    pub fn execute(
        &self,
        presence: &PresenceIndex,
        connection_id: ConnectionId,
        room_id: Option<RoomId>,
        body: &str,
    ) -> Result<Delivery, SendMessageError> {
        let session = presence
            .session(connection_id)
            .ok_or(SendMessageError::JoinRoomFirst)?;
        let current_room = session
            .current_room
            .ok_or(SendMessageError::JoinRoomFirst)?;
        if room_id != Some(current_room) {
            return Err(SendMessageError::InvalidRoomContext);
        }

        let body = MessageBody::new(body).map_err(|e| match e {
            ValueObjectError::MessageBodyTooLong { .. } => SendMessageError::MessageTooLong,
            _ => SendMessageError::EmptyMessage,
        })?;

        let message_id = self
            .store
            .insert_chat_message(current_room, session.identity.user_id, &body)
            .map_err(SendMessageError::PersistFailed)?;
        let message = self
            .store
            .fetch_message(message_id)
            .map_err(SendMessageError::PersistFailed)?
            .ok_or_else(|| {
                SendMessageError::PersistFailed(RepositoryError::NotFound(format!(
                    "message {}",
                    message_id
                )))
            })?;

        Ok(Delivery {
            message,
            targets: presence.room_members(current_room),
        })
    }
}
