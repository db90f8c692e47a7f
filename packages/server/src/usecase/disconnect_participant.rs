//! UseCase: 参加者切断処理
//!
//! 接続の終了時（クライアントからの close、読み込みエラー、タイムアウト、
//! サーバー停止）に呼ばれ、次の順で後始末を行います。
//!
//! 1. 参加中のルームがあれば退出（"left" を配信）、なければこのソケットのプレゼンス行を掃除
//! 2. ソケットレコードに切断時刻を記録（以後このトークンでは認証できない）
//! 3. プレゼンス索引（ルーム・ユーザー）から接続を削除
//!
//! 永続化の失敗はログに残して処理を続けます。切断処理自体は失敗しません。

use std::sync::Arc;

use crate::domain::{ChatStore, ConnectionId, PresenceIndex};

use super::{LeaveRoomUseCase, RoomNotice};

/// 参加者切断のユースケース
pub struct DisconnectParticipantUseCase {
    store: Arc<dyn ChatStore>,
    leave_room: LeaveRoomUseCase,
}

impl DisconnectParticipantUseCase {
    pub fn new(store: Arc<dyn ChatStore>) -> Self {
        Self {
            leave_room: LeaveRoomUseCase::new(store.clone()),
            store,
        }
    }

    /// 参加者切断を実行
    ///
    /// # Returns
    ///
    /// * `Some(RoomNotice)` - 残りのメンバーへ配信する退出通知
    /// * `None` - 配信なし（未認証の接続、ルーム未参加など）
    pub fn execute(
        &self,
        presence: &mut PresenceIndex,
        connection_id: ConnectionId,
    ) -> Option<RoomNotice> {
        let session = presence.session(connection_id).cloned()?;
        let socket_id = session.identity.socket_record_id;

        let departure = match session.current_room {
            Some(room_id) => self
                .leave_room
                .leave(presence, connection_id, room_id, true)
                .unwrap_or_else(|e| {
                    tracing::error!(
                        "Failed to leave room {} for connection {}: {}",
                        room_id,
                        connection_id,
                        e
                    );
                    None
                }),
            None => None,
        };

        // Sweep rows left behind by an earlier failure as well.
        if let Err(e) = self.store.delete_presence_for_socket(socket_id) {
            tracing::error!("Failed to clear presence for socket {}: {}", socket_id, e);
        }
        if let Err(e) = self.store.mark_socket_disconnected(socket_id) {
            tracing::error!("Failed to mark socket {} disconnected: {}", socket_id, e);
        }

        presence.unregister(connection_id);
        tracing::info!(
            "'{}' disconnected (connection {}, {} sessions remaining)",
            session.identity.screen_name,
            connection_id,
            presence.session_count()
        );

        departure
    }
}
