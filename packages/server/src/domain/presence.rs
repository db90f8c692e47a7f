//! Room / Presence Index
//!
//! 認証済みセッション、ルーム参加（room → 接続）、ユーザーごとの接続
//! （user → 接続、マルチデバイス配信用）をメモリ上で保持します。
//!
//! ## 不変条件
//!
//! - 1 つの接続が同時に所属できるルームは高々 1 つ
//! - `rooms` と各 `Session::current_room` は常に一致する
//! - 空になった集合は削除する

use std::collections::{BTreeSet, HashMap};

use super::{ConnectionId, Identity, RoomId, Session, UserId};

#[derive(Debug, Default)]
pub struct PresenceIndex {
    sessions: HashMap<ConnectionId, Session>,
    rooms: HashMap<RoomId, BTreeSet<ConnectionId>>,
    users: HashMap<UserId, BTreeSet<ConnectionId>>,
}

impl PresenceIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an authenticated connection and add it to the user fan-out index.
    pub fn register(&mut self, connection_id: ConnectionId, identity: Identity) {
        self.users
            .entry(identity.user_id)
            .or_default()
            .insert(connection_id);
        self.sessions
            .insert(connection_id, Session::new(connection_id, identity));
    }

    /// Remove a connection from every index and return its session.
    pub fn unregister(&mut self, connection_id: ConnectionId) -> Option<Session> {
        let session = self.sessions.remove(&connection_id)?;

        if let Some(room_id) = session.current_room {
            remove_member(&mut self.rooms, room_id, connection_id);
        }
        remove_member(&mut self.users, session.identity.user_id, connection_id);

        Some(session)
    }

    pub fn session(&self, connection_id: ConnectionId) -> Option<&Session> {
        self.sessions.get(&connection_id)
    }

    pub fn is_registered(&self, connection_id: ConnectionId) -> bool {
        self.sessions.contains_key(&connection_id)
    }

    /// Put the connection into `room_id`, removing it from any previous room set.
    ///
    /// Returns `false` when the connection is not registered.
    pub fn enter_room(&mut self, connection_id: ConnectionId, room_id: RoomId) -> bool {
        let Some(session) = self.sessions.get_mut(&connection_id) else {
            return false;
        };

        if let Some(previous) = session.current_room.replace(room_id)
            && previous != room_id
        {
            remove_member(&mut self.rooms, previous, connection_id);
        }
        self.rooms.entry(room_id).or_default().insert(connection_id);
        true
    }

    /// Remove the connection from `room_id` and clear its current room if it matches.
    pub fn exit_room(&mut self, connection_id: ConnectionId, room_id: RoomId) {
        remove_member(&mut self.rooms, room_id, connection_id);
        if let Some(session) = self.sessions.get_mut(&connection_id)
            && session.current_room == Some(room_id)
        {
            session.current_room = None;
        }
    }

    pub fn room_members(&self, room_id: RoomId) -> Vec<ConnectionId> {
        self.rooms
            .get(&room_id)
            .map(|members| members.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn room_members_except(&self, room_id: RoomId, exclude: ConnectionId) -> Vec<ConnectionId> {
        self.rooms
            .get(&room_id)
            .map(|members| {
                members
                    .iter()
                    .copied()
                    .filter(|id| *id != exclude)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn user_connections(&self, user_id: UserId) -> Vec<ConnectionId> {
        self.users
            .get(&user_id)
            .map(|connections| connections.iter().copied().collect())
            .unwrap_or_default()
    }

    /// All connections of all given users, without duplicates.
    pub fn connections_for_users(&self, user_ids: &[UserId]) -> Vec<ConnectionId> {
        let targets: BTreeSet<ConnectionId> = user_ids
            .iter()
            .filter_map(|user_id| self.users.get(user_id))
            .flatten()
            .copied()
            .collect();
        targets.into_iter().collect()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }
}

fn remove_member<K: std::hash::Hash + Eq>(
    index: &mut HashMap<K, BTreeSet<ConnectionId>>,
    key: K,
    connection_id: ConnectionId,
) {
    if let Some(members) = index.get_mut(&key) {
        members.remove(&connection_id);
        if members.is_empty() {
            index.remove(&key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ScreenName, SocketRecordId};

    fn identity(user_id: i64, name: &str) -> Identity {
        Identity::new(
            UserId::new(user_id).unwrap(),
            ScreenName::new(name).unwrap(),
            SocketRecordId::new(user_id * 100).unwrap(),
        )
    }

    fn room(id: i64) -> RoomId {
        RoomId::new(id).unwrap()
    }

    #[test]
    fn test_register_adds_user_fan_out() {
        // テスト項目: 認証済み接続の登録でユーザーの配信先に追加される
        // given (前提条件):
        let mut index = PresenceIndex::new();
        let phone = ConnectionId::new(1);
        let laptop = ConnectionId::new(2);

        // when (操作):
        index.register(phone, identity(7, "alice"));
        index.register(laptop, identity(7, "alice"));

        // then (期待する結果):
        assert_eq!(
            index.user_connections(UserId::new(7).unwrap()),
            vec![phone, laptop]
        );
        assert_eq!(index.session_count(), 2);
    }

    #[test]
    fn test_enter_room_moves_membership() {
        // テスト項目: 別のルームに入ると以前のルームから外れる（所属は常に 1 つ）
        // given (前提条件):
        let mut index = PresenceIndex::new();
        let conn = ConnectionId::new(1);
        index.register(conn, identity(1, "alice"));
        index.enter_room(conn, room(3));

        // when (操作):
        index.enter_room(conn, room(5));

        // then (期待する結果):
        assert!(index.room_members(room(3)).is_empty());
        assert_eq!(index.room_members(room(5)), vec![conn]);
        assert_eq!(index.session(conn).unwrap().current_room, Some(room(5)));
        assert_eq!(index.room_count(), 1);
    }

    #[test]
    fn test_enter_room_requires_registration() {
        // テスト項目: 未登録の接続はルームに入れない
        // given (前提条件):
        let mut index = PresenceIndex::new();

        // when (操作):
        let entered = index.enter_room(ConnectionId::new(9), room(3));

        // then (期待する結果):
        assert!(!entered);
        assert!(index.room_members(room(3)).is_empty());
    }

    #[test]
    fn test_exit_room_clears_current_room_only_when_matching() {
        // テスト項目: 現在のルームと異なるルームからの退出は current_room を変更しない
        // given (前提条件):
        let mut index = PresenceIndex::new();
        let conn = ConnectionId::new(1);
        index.register(conn, identity(1, "alice"));
        index.enter_room(conn, room(3));

        // when (操作):
        index.exit_room(conn, room(4));

        // then (期待する結果):
        assert_eq!(index.session(conn).unwrap().current_room, Some(room(3)));

        // when (操作):
        index.exit_room(conn, room(3));

        // then (期待する結果):
        assert_eq!(index.session(conn).unwrap().current_room, None);
        assert_eq!(index.room_count(), 0);
    }

    #[test]
    fn test_room_members_except_excludes_connection() {
        // テスト項目: 指定した接続を除いたルームメンバーを取得できる
        // given (前提条件):
        let mut index = PresenceIndex::new();
        let alice = ConnectionId::new(1);
        let bob = ConnectionId::new(2);
        index.register(alice, identity(1, "alice"));
        index.register(bob, identity(2, "bob"));
        index.enter_room(alice, room(3));
        index.enter_room(bob, room(3));

        // when (操作):
        let others = index.room_members_except(room(3), alice);

        // then (期待する結果):
        assert_eq!(others, vec![bob]);
    }

    #[test]
    fn test_unregister_removes_from_all_indexes() {
        // テスト項目: 登録解除でルームとユーザーの両方のインデックスから削除される
        // given (前提条件):
        let mut index = PresenceIndex::new();
        let conn = ConnectionId::new(1);
        index.register(conn, identity(1, "alice"));
        index.enter_room(conn, room(5));

        // when (操作):
        let session = index.unregister(conn);

        // then (期待する結果):
        assert_eq!(session.unwrap().current_room, Some(room(5)));
        assert!(index.room_members(room(5)).is_empty());
        assert!(index.user_connections(UserId::new(1).unwrap()).is_empty());
        assert!(index.unregister(conn).is_none());
    }

    #[test]
    fn test_connections_for_users_deduplicates() {
        // テスト項目: 複数ユーザーの接続を重複なく取得できる
        // given (前提条件):
        let mut index = PresenceIndex::new();
        index.register(ConnectionId::new(1), identity(1, "alice"));
        index.register(ConnectionId::new(2), identity(1, "alice"));
        index.register(ConnectionId::new(3), identity(2, "bob"));
        let alice = UserId::new(1).unwrap();
        let bob = UserId::new(2).unwrap();
        let ghost = UserId::new(99).unwrap();

        // when (操作):
        let targets = index.connections_for_users(&[alice, bob, alice, ghost]);

        // then (期待する結果):
        assert_eq!(
            targets,
            vec![
                ConnectionId::new(1),
                ConnectionId::new(2),
                ConnectionId::new(3)
            ]
        );
    }
}
