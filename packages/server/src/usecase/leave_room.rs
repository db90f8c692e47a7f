//! UseCase: ルーム退出処理
//!
//! 永続化されたプレゼンス行を削除し、メモリ上のルームから接続を外します。
//! 実際に行が削除された場合に限り、presence（leave）と "left the chat" の
//! システムメッセージを残りのメンバーへの通知として返します。
//!
//! 明示的な `leave` コマンドのほか、別ルームへの参加時と切断時にも使われます。

use std::sync::Arc;

use crate::domain::{
    ChatStore, ConnectionId, MessageBody, PresenceAction, PresenceChange, PresenceIndex, RoomId,
    Session,
};

use super::{RoomNotice, error::LeaveRoomError};

/// ルーム退出のユースケース
#[derive(Clone)]
pub struct LeaveRoomUseCase {
    store: Arc<dyn ChatStore>,
}

impl LeaveRoomUseCase {
    pub fn new(store: Arc<dyn ChatStore>) -> Self {
        Self { store }
    }

    /// `leave` コマンドを実行
    ///
    /// # Returns
    ///
    /// * `Ok(Some(RoomNotice))` - 残りのメンバーへ配信する退出通知
    /// * `Ok(None)` - 配信なし（参加していなかった、または未認証）
    pub fn execute(
        &self,
        presence: &mut PresenceIndex,
        connection_id: ConnectionId,
        room_id: Option<RoomId>,
    ) -> Result<Option<RoomNotice>, LeaveRoomError> {
        let room_id = room_id.ok_or(LeaveRoomError::InvalidRoomId)?;
        self.leave(presence, connection_id, room_id, true)
    }

    /// Leave `room_id`, optionally producing the "left" broadcast.
    pub fn leave(
        &self,
        presence: &mut PresenceIndex,
        connection_id: ConnectionId,
        room_id: RoomId,
        broadcast: bool,
    ) -> Result<Option<RoomNotice>, LeaveRoomError> {
        let Some(session) = presence.session(connection_id).cloned() else {
            return Ok(None);
        };

        let removed = self
            .store
            .delete_presence(room_id, session.identity.socket_record_id)
            .map_err(LeaveRoomError::Persistence)?;

        presence.exit_room(connection_id, room_id);

        if removed == 0 || !broadcast {
            return Ok(None);
        }
        tracing::info!(
            "'{}' left room {} (connection {})",
            session.identity.screen_name,
            room_id,
            connection_id
        );

        Ok(Some(self.announce_departure(presence, &session, room_id)))
    }

    /// Persist the "left" notice; a failure is logged and drops only the chat message.
    fn announce_departure(
        &self,
        presence: &PresenceIndex,
        session: &Session,
        room_id: RoomId,
    ) -> RoomNotice {
        let body = MessageBody::system_notice(&session.identity.screen_name, "left");
        let message = self
            .store
            .insert_chat_message(room_id, session.identity.user_id, &body)
            .and_then(|id| self.store.fetch_message(id))
            .unwrap_or_else(|e| {
                tracing::error!("Failed to persist departure notice for room {}: {}", room_id, e);
                None
            });

        RoomNotice {
            change: PresenceChange::new(room_id, PresenceAction::Leave, &session.identity),
            message,
            targets: presence.room_members(room_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{MockChatStore, RepositoryError};
    use crate::infrastructure::repository::inmemory::PresenceRow;
    use crate::usecase::test_support::{connect, create_test_store, room_of};

    #[test]
    fn test_leave_broadcasts_to_remaining_members() {
        // テスト項目: 退出すると "left" メッセージが残りのメンバーに配信される
        // given (前提条件):
        let store = create_test_store();
        let usecase = LeaveRoomUseCase::new(store.clone());
        let mut presence = PresenceIndex::new();
        let (alice_conn, bob_conn) = (ConnectionId::new(1), ConnectionId::new(2));
        let alice = connect(&store, &mut presence, alice_conn, "alice");
        let bob = connect(&store, &mut presence, bob_conn, "bob");
        let room = store.add_room("general", None).unwrap();
        for (conn, identity) in [(alice_conn, &alice), (bob_conn, &bob)] {
            store
                .insert_presence(room, identity.user_id, identity.socket_record_id)
                .unwrap();
            presence.enter_room(conn, room);
        }

        // when (操作):
        let notice = usecase
            .execute(&mut presence, alice_conn, Some(room))
            .unwrap()
            .unwrap();

        // then (期待する結果):
        assert_eq!(
            notice.change,
            PresenceChange::new(room, PresenceAction::Leave, &alice)
        );
        assert_eq!(notice.message.unwrap().body.as_str(), "alice left the chat");
        assert_eq!(notice.targets, vec![bob_conn]);
        assert_eq!(room_of(&presence, alice_conn), None);
        assert_eq!(
            store.presence_rows(),
            vec![PresenceRow {
                room_id: room,
                user_id: bob.user_id,
                socket_id: bob.socket_record_id
            }]
        );
    }

    #[test]
    fn test_leave_without_presence_row_is_silent() {
        // テスト項目: 参加していないルームからの退出は配信もメッセージ保存も行わない
        // given (前提条件):
        let store = create_test_store();
        let usecase = LeaveRoomUseCase::new(store.clone());
        let mut presence = PresenceIndex::new();
        let conn = ConnectionId::new(1);
        connect(&store, &mut presence, conn, "alice");
        let room = store.add_room("general", None).unwrap();

        // when (操作):
        let first = usecase.execute(&mut presence, conn, Some(room)).unwrap();
        let second = usecase.execute(&mut presence, conn, Some(room)).unwrap();

        // then (期待する結果):
        assert!(first.is_none());
        assert!(second.is_none());
        assert_eq!(store.message_count(room), 0);
    }

    #[test]
    fn test_leave_without_broadcast_flag() {
        // テスト項目: broadcast=false の場合は行を削除するが配信しない
        // given (前提条件):
        let store = create_test_store();
        let usecase = LeaveRoomUseCase::new(store.clone());
        let mut presence = PresenceIndex::new();
        let conn = ConnectionId::new(1);
        let alice = connect(&store, &mut presence, conn, "alice");
        let room = store.add_room("general", None).unwrap();
        store
            .insert_presence(room, alice.user_id, alice.socket_record_id)
            .unwrap();
        presence.enter_room(conn, room);

        // when (操作):
        let notice = usecase.leave(&mut presence, conn, room, false).unwrap();

        // then (期待する結果):
        assert!(notice.is_none());
        assert!(store.presence_rows().is_empty());
        assert_eq!(store.message_count(room), 0);
    }

    #[test]
    fn test_presence_survives_notice_persistence_failure() {
        // テスト項目: "left" メッセージの保存に失敗しても presence 通知は返る
        // given (前提条件):
        let backing = create_test_store();
        let mut presence = PresenceIndex::new();
        let (alice_conn, bob_conn) = (ConnectionId::new(1), ConnectionId::new(2));
        let alice = connect(&backing, &mut presence, alice_conn, "alice");
        connect(&backing, &mut presence, bob_conn, "bob");
        let room = RoomId::new(3).unwrap();
        presence.enter_room(alice_conn, room);
        presence.enter_room(bob_conn, room);

        let mut store = MockChatStore::new();
        store.expect_delete_presence().returning(|_, _| Ok(1));
        store
            .expect_insert_chat_message()
            .returning(|_, _, _| Err(RepositoryError::Storage("full".to_string())));
        let usecase = LeaveRoomUseCase::new(Arc::new(store));

        // when (操作):
        let notice = usecase
            .execute(&mut presence, alice_conn, Some(room))
            .unwrap()
            .unwrap();

        // then (期待する結果):
        assert_eq!(notice.change.action, PresenceAction::Leave);
        assert_eq!(notice.change.user_id, alice.user_id);
        assert!(notice.message.is_none());
        assert_eq!(notice.targets, vec![bob_conn]);
    }

    #[test]
    fn test_missing_room_id_is_invalid() {
        // テスト項目: roomId が不正な場合は InvalidRoomId になる
        // given (前提条件):
        let store = create_test_store();
        let usecase = LeaveRoomUseCase::new(store);
        let mut presence = PresenceIndex::new();

        // when (操作):
        let result = usecase.execute(&mut presence, ConnectionId::new(1), None);

        // then (期待する結果):
        assert_eq!(result, Err(LeaveRoomError::InvalidRoomId));
    }

    #[test]
    fn test_storage_failure_keeps_membership() {
        // テスト項目: プレゼンス削除に失敗した場合はエラーを返し、メモリ上の所属は変わらない
        // given (前提条件):
        let backing = create_test_store();
        let mut presence = PresenceIndex::new();
        let conn = ConnectionId::new(1);
        connect(&backing, &mut presence, conn, "alice");
        let room = RoomId::new(3).unwrap();
        presence.enter_room(conn, room);

        let mut store = MockChatStore::new();
        store
            .expect_delete_presence()
            .returning(|_, _| Err(RepositoryError::Storage("locked".to_string())));
        let usecase = LeaveRoomUseCase::new(Arc::new(store));

        // when (操作):
        let result = usecase.execute(&mut presence, conn, Some(room));

        // then (期待する結果):
        assert!(matches!(result, Err(LeaveRoomError::Persistence(_))));
        assert_eq!(room_of(&presence, conn), Some(room));
    }
}
