//! UseCase: ルーム参加処理
//!
//! 処理の流れ:
//!
//! 1. ルームの存在とパスフレーズを確認
//! 2. 別のルームに参加中なら先に退出（"left" を配信）
//! 3. このソケットの古いプレゼンス行を削除し、新しい行を挿入
//! 4. メモリ上のルームに追加し、"joined the chat" を保存
//! 5. 参加者以外のメンバーへの通知（presence と "joined"）と、参加者向けの履歴を返す
//!
//! 既に参加中のルームへの再参加は何も変更せず、履歴付きの結果だけを返します。

use std::sync::Arc;

use crate::domain::{
    ChatMessage, ChatStore, ConnectionId, MessageBody, PresenceAction, PresenceChange,
    PresenceIndex, RECENT_HISTORY_LIMIT, RoomId, RoomMeta, Session,
};

use super::{LeaveRoomUseCase, RoomNotice, error::JoinRoomError};

/// Result of a successful join.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinOutcome {
    pub room: RoomMeta,
    /// Notice for the room the connection moved out of.
    pub departure: Option<RoomNotice>,
    /// Notice for the other members of the new room; `None` on a re-join.
    pub arrival: Option<RoomNotice>,
    /// Recent room messages, oldest first.
    pub history: Vec<ChatMessage>,
    /// Recent direct messages addressed to the joiner in this room, oldest first.
    pub direct_history: Vec<ChatMessage>,
}

/// ルーム参加のユースケース
pub struct JoinRoomUseCase {
    store: Arc<dyn ChatStore>,
    leave_room: LeaveRoomUseCase,
}

impl JoinRoomUseCase {
    pub fn new(store: Arc<dyn ChatStore>) -> Self {
        Self {
            leave_room: LeaveRoomUseCase::new(store.clone()),
            store,
        }
    }

    /// ルーム参加を実行
    pub fn execute(
        &self,
        presence: &mut PresenceIndex,
        connection_id: ConnectionId,
        room_id: Option<RoomId>,
        passphrase: Option<&str>,
    ) -> Result<JoinOutcome, JoinRoomError> {
        let session = presence
            .session(connection_id)
            .cloned()
            .ok_or(JoinRoomError::NotAuthenticated)?;
        let room_id = room_id.ok_or(JoinRoomError::InvalidRoomId)?;

        let room = self
            .store
            .find_room(room_id)
            .map_err(JoinRoomError::Persistence)?
            .ok_or(JoinRoomError::RoomNotFound)?;

        if let Some(secret_hash) = &room.secret_hash
            && !self
                .store
                .verify_room_secret(secret_hash, passphrase.unwrap_or_default())
        {
            return Err(JoinRoomError::IncorrectPassword);
        }

        if session.is_in_room(room_id) {
            return Ok(self.outcome(room, &session, None, None));
        }

        let departure = match session.current_room {
            Some(previous) => self
                .leave_room
                .leave(presence, connection_id, previous, true)?,
            None => None,
        };

        let socket_id = session.identity.socket_record_id;
        self.store
            .delete_presence_for_socket(socket_id)
            .map_err(JoinRoomError::Persistence)?;
        self.store
            .insert_presence(room_id, session.identity.user_id, socket_id)
            .map_err(JoinRoomError::Persistence)?;
        presence.enter_room(connection_id, room_id);

        tracing::info!(
            "'{}' joined room {} '{}' (connection {})",
            session.identity.screen_name,
            room_id,
            room.name,
            connection_id
        );

        let arrival = self.announce_arrival(presence, &session, room_id);
        Ok(self.outcome(room, &session, departure, Some(arrival)))
    }

    /// Persist the "joined" notice; a failure is logged and drops only the chat message.
    fn announce_arrival(
        &self,
        presence: &PresenceIndex,
        session: &Session,
        room_id: RoomId,
    ) -> RoomNotice {
        let body = MessageBody::system_notice(&session.identity.screen_name, "joined");
        let message = self
            .store
            .insert_chat_message(room_id, session.identity.user_id, &body)
            .and_then(|id| self.store.fetch_message(id))
            .unwrap_or_else(|e| {
                tracing::error!("Failed to persist arrival notice for room {}: {}", room_id, e);
                None
            });

        RoomNotice {
            change: PresenceChange::new(room_id, PresenceAction::Join, &session.identity),
            message,
            targets: presence.room_members_except(room_id, session.connection_id),
        }
    }

    fn outcome(
        &self,
        room: RoomMeta,
        session: &Session,
        departure: Option<RoomNotice>,
        arrival: Option<RoomNotice>,
    ) -> JoinOutcome {
        let history = self
            .store
            .recent_messages(room.id, RECENT_HISTORY_LIMIT)
            .unwrap_or_else(|e| {
                tracing::error!("Failed to load history for room {}: {}", room.id, e);
                Vec::new()
            });
        let direct_history = self
            .store
            .recent_direct_messages(room.id, session.identity.user_id, RECENT_HISTORY_LIMIT)
            .unwrap_or_else(|e| {
                tracing::error!("Failed to load direct messages for room {}: {}", room.id, e);
                Vec::new()
            });

        JoinOutcome {
            room,
            departure,
            arrival,
            history,
            direct_history,
        }
    }
}
