//! UseCase: ダイレクトメッセージ送信処理
//!
//! 宛先のスクリーンネームをトリム・重複排除してから解決し、1 件でも解決できなければ
//! 何も書き込まずに `missing` 付きのエラーを返します（全件成功か何もしないか）。
//! 宛先には常に送信者自身が含まれ、DM は送信したルームに紐付けて保存されます。

use std::sync::Arc;

use crate::domain::{
    ChatStore, ConnectionId, MessageBody, PresenceIndex, RepositoryError, RoomId, ScreenName,
    UserId, ValueObjectError,
};

use super::{Delivery, error::SendDirectMessageError};

/// DM 送信のユースケース
pub struct SendDirectMessageUseCase {
    store: Arc<dyn ChatStore>,
}

impl SendDirectMessageUseCase {
    pub fn new(store: Arc<dyn ChatStore>) -> Self {
        Self { store }
    }

    /// DM 送信を実行
    ///
    /// # Returns
    ///
    /// * `Ok(Delivery)` - 保存された DM と、全宛先（送信者を含む）の全接続
    /// * `Err(SendDirectMessageError)` - 送信失敗（何も書き込まれない）
    pub fn execute(
        &self,
        presence: &PresenceIndex,
        connection_id: ConnectionId,
        room_id: Option<RoomId>,
        body: &str,
        recipients: &[String],
    ) -> Result<Delivery, SendDirectMessageError> {
        let session = presence
            .session(connection_id)
            .ok_or(SendDirectMessageError::JoinRoomFirst)?;
        let current_room = session
            .current_room
            .ok_or(SendDirectMessageError::JoinRoomFirst)?;
        if room_id != Some(current_room) {
            return Err(SendDirectMessageError::InvalidRoomContext);
        }

        let body = MessageBody::new(body).map_err(|e| match e {
            ValueObjectError::MessageBodyTooLong { .. } => SendDirectMessageError::MessageTooLong,
            _ => SendDirectMessageError::EmptyMessage,
        })?;

        if recipients.is_empty() {
            return Err(SendDirectMessageError::NoRecipients);
        }
        let names = normalize_recipients(recipients);
        if names.is_empty() {
            return Err(SendDirectMessageError::RecipientsNotProvided);
        }

        let resolved = self
            .store
            .resolve_screen_names(&names)
            .map_err(SendDirectMessageError::SendFailed)?;
        let missing: Vec<String> = names
            .iter()
            .filter(|name| !resolved.contains_key(*name))
            .map(|name| name.as_str().to_string())
            .collect();
        if !missing.is_empty() {
            return Err(SendDirectMessageError::UnknownRecipients { missing });
        }

        let sender_id = session.identity.user_id;
        let mut recipient_ids: Vec<UserId> = names.iter().map(|name| resolved[name]).collect();
        recipient_ids.push(sender_id);
        recipient_ids.sort();
        recipient_ids.dedup();

        let dm_id = self
            .store
            .insert_direct_message(sender_id, &body, &recipient_ids, current_room)
            .map_err(|e| {
                tracing::error!("Failed to insert direct message: {}", e);
                SendDirectMessageError::SendFailed(e)
            })?;
        let message = self
            .store
            .fetch_direct_message(dm_id, current_room)
            .map_err(SendDirectMessageError::SendFailed)?
            .ok_or_else(|| {
                SendDirectMessageError::SendFailed(RepositoryError::NotFound(format!(
                    "direct message {}",
                    dm_id
                )))
            })?;

        Ok(Delivery {
            message,
            targets: presence.connections_for_users(&recipient_ids),
        })
    }
}

/// Trim, drop blanks and deduplicate, keeping first-seen order.
fn normalize_recipients(raw: &[String]) -> Vec<ScreenName> {
    let mut names: Vec<ScreenName> = Vec::with_capacity(raw.len());
    for name in raw.iter().filter_map(|value| ScreenName::new(value).ok()) {
        if !names.contains(&name) {
            names.push(name);
        }
    }
    names
}
