//! SQLite ChatStore 実装
//!
//! rusqlite（bundled SQLite）による `ChatStore` の永続化実装です。
//! スキーマはオープン時に作成されます。接続は 1 本を `Mutex` で保護して共有します。

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use rusqlite::{Connection, OptionalExtension, params};
use tsudoi_shared::time::{Clock, SystemClock};
use uuid::Uuid;

use crate::domain::{
    ChatMessage, ChatStore, Identity, MessageBody, MessageId, RepositoryError, RoomId, RoomMeta,
    ScreenName, SocketRecordId, SocketToken, Timestamp, UserId,
};
use crate::infrastructure::secret;

const SCHEMA: &str = "
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS users (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    screen_name TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS sockets (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id         INTEGER NOT NULL REFERENCES users(id),
    socket_token    TEXT NOT NULL UNIQUE,
    connected_at    INTEGER NOT NULL,
    disconnected_at INTEGER
);

CREATE TABLE IF NOT EXISTS list_of_chatrooms (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    chatroomName TEXT NOT NULL,
    key_hash     TEXT
);

CREATE TABLE IF NOT EXISTS messages (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    chatroom_id INTEGER NOT NULL REFERENCES list_of_chatrooms(id),
    user_id     INTEGER NOT NULL REFERENCES users(id),
    body        TEXT NOT NULL,
    created_at  INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_messages_room ON messages(chatroom_id, id);

CREATE TABLE IF NOT EXISTS current_chatroom_occupants (
    chatroom_id INTEGER NOT NULL REFERENCES list_of_chatrooms(id),
    user_id     INTEGER NOT NULL REFERENCES users(id),
    socket_id   INTEGER NOT NULL REFERENCES sockets(id)
);

CREATE TABLE IF NOT EXISTS direct_messages (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    sender_id  INTEGER NOT NULL REFERENCES users(id),
    body       TEXT NOT NULL,
    created_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS direct_message_recipients (
    dm_id        INTEGER NOT NULL REFERENCES direct_messages(id),
    recipient_id INTEGER NOT NULL REFERENCES users(id),
    chatroom_id  INTEGER NOT NULL REFERENCES list_of_chatrooms(id),
    PRIMARY KEY (dm_id, recipient_id)
);
";

/// A message row joined with its sender's screen name.
struct MessageRecord {
    id: i64,
    room_id: i64,
    body: String,
    created_at: i64,
    sender: String,
}

impl MessageRecord {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            room_id: row.get(1)?,
            body: row.get(2)?,
            created_at: row.get(3)?,
            sender: row.get(4)?,
        })
    }

    fn into_message(self, is_dm: bool) -> Result<ChatMessage, RepositoryError> {
        Ok(ChatMessage {
            id: MessageId::new(self.id).map_err(corrupt)?,
            room_id: RoomId::new(self.room_id).map_err(corrupt)?,
            body: MessageBody::from_stored(self.body),
            created_at: Timestamp::new(self.created_at),
            sender: ScreenName::from_stored(self.sender),
            is_dm,
        })
    }
}

fn storage(e: rusqlite::Error) -> RepositoryError {
    RepositoryError::Storage(e.to_string())
}

fn corrupt(e: impl std::fmt::Display) -> RepositoryError {
    RepositoryError::Storage(format!("invalid row: {}", e))
}

pub struct SqliteChatStore {
    clock: Arc<dyn Clock>,
    connection: Mutex<Connection>,
}

impl SqliteChatStore {
    /// Open (or create) a database file and apply the schema.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, RepositoryError> {
        let connection = Connection::open(path).map_err(storage)?;
        Self::from_connection(connection)
    }

    pub fn open_in_memory() -> Result<Self, RepositoryError> {
        let connection = Connection::open_in_memory().map_err(storage)?;
        Self::from_connection(connection)
    }

    /// Replace the clock used for `connected_at` / `created_at` values.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    fn from_connection(connection: Connection) -> Result<Self, RepositoryError> {
        connection.execute_batch(SCHEMA).map_err(storage)?;
        Ok(Self {
            clock: Arc::new(SystemClock),
            connection: Mutex::new(connection),
        })
    }

    fn connection(&self) -> Result<MutexGuard<'_, Connection>, RepositoryError> {
        self.connection
            .lock()
            .map_err(|_| RepositoryError::Storage("sqlite connection poisoned".to_string()))
    }

    fn now(&self) -> i64 {
        self.clock.now_millis()
    }

    // ========================================
    // Administration (used by the CLI)
    // ========================================

    /// Register a user, or return the existing id for that screen name.
    pub fn add_user(&self, screen_name: &ScreenName) -> Result<UserId, RepositoryError> {
        let connection = self.connection()?;
        connection
            .execute(
                "INSERT OR IGNORE INTO users (screen_name) VALUES (?1)",
                params![screen_name.as_str()],
            )
            .map_err(storage)?;
        let id: i64 = connection
            .query_row(
                "SELECT id FROM users WHERE screen_name = ?1",
                params![screen_name.as_str()],
                |row| row.get(0),
            )
            .map_err(storage)?;
        UserId::new(id).map_err(corrupt)
    }

    /// Issue a fresh socket token for a user, as the login flow would.
    pub fn issue_socket_token(&self, user_id: UserId) -> Result<SocketToken, RepositoryError> {
        let token = SocketToken::new(Uuid::new_v4().simple().to_string()).map_err(corrupt)?;
        self.connection()?
            .execute(
                "INSERT INTO sockets (user_id, socket_token, connected_at) VALUES (?1, ?2, ?3)",
                params![user_id.value(), token.as_str(), self.now()],
            )
            .map_err(storage)?;
        Ok(token)
    }

    /// Create a room; a passphrase locks it.
    pub fn add_room(&self, name: &str, passphrase: Option<&str>) -> Result<RoomId, RepositoryError> {
        let connection = self.connection()?;
        connection
            .execute(
                "INSERT INTO list_of_chatrooms (chatroomName, key_hash) VALUES (?1, ?2)",
                params![name, passphrase.map(secret::hash_secret)],
            )
            .map_err(storage)?;
        RoomId::new(connection.last_insert_rowid()).map_err(corrupt)
    }

    fn query_messages(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
        is_dm: bool,
    ) -> Result<Vec<ChatMessage>, RepositoryError> {
        let connection = self.connection()?;
        let mut statement = connection.prepare(sql).map_err(storage)?;
        let records = statement
            .query_map(params, MessageRecord::from_row)
            .map_err(storage)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(storage)?;
        records
            .into_iter()
            .map(|record| record.into_message(is_dm))
            .collect()
    }
}

impl ChatStore for SqliteChatStore {
    fn authenticate_token(&self, token: &SocketToken) -> Result<Option<Identity>, RepositoryError> {
        let row: Option<(i64, i64, String)> = self
            .connection()?
            .query_row(
                "SELECT s.id, s.user_id, u.screen_name
                   FROM sockets s JOIN users u ON u.id = s.user_id
                  WHERE s.socket_token = ?1 AND s.disconnected_at IS NULL
                  LIMIT 1",
                params![token.as_str()],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()
            .map_err(storage)?;

        row.map(|(socket_id, user_id, screen_name)| {
            Ok(Identity::new(
                UserId::new(user_id).map_err(corrupt)?,
                ScreenName::new(&screen_name).map_err(corrupt)?,
                SocketRecordId::new(socket_id).map_err(corrupt)?,
            ))
        })
        .transpose()
    }

    fn mark_socket_connected(&self, socket_id: SocketRecordId) -> Result<(), RepositoryError> {
        let updated = self
            .connection()?
            .execute(
                "UPDATE sockets SET connected_at = ?1 WHERE id = ?2",
                params![self.now(), socket_id.value()],
            )
            .map_err(storage)?;
        if updated == 0 {
            return Err(RepositoryError::NotFound(format!("socket {}", socket_id)));
        }
        Ok(())
    }

    fn mark_socket_disconnected(&self, socket_id: SocketRecordId) -> Result<(), RepositoryError> {
        let updated = self
            .connection()?
            .execute(
                "UPDATE sockets SET disconnected_at = ?1 WHERE id = ?2",
                params![self.now(), socket_id.value()],
            )
            .map_err(storage)?;
        if updated == 0 {
            return Err(RepositoryError::NotFound(format!("socket {}", socket_id)));
        }
        Ok(())
    }

    fn find_room(&self, room_id: RoomId) -> Result<Option<RoomMeta>, RepositoryError> {
        let row: Option<(String, Option<String>)> = self
            .connection()?
            .query_row(
                "SELECT chatroomName, key_hash FROM list_of_chatrooms WHERE id = ?1",
                params![room_id.value()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(storage)?;

        Ok(row.map(|(name, secret_hash)| RoomMeta {
            id: room_id,
            name,
            secret_hash: secret_hash.filter(|hash| !hash.is_empty()),
        }))
    }

    fn verify_room_secret(&self, secret_hash: &str, passphrase: &str) -> bool {
        secret::verify_secret(secret_hash, passphrase)
    }

    fn insert_presence(
        &self,
        room_id: RoomId,
        user_id: UserId,
        socket_id: SocketRecordId,
    ) -> Result<(), RepositoryError> {
        self.connection()?
            .execute(
                "INSERT INTO current_chatroom_occupants (chatroom_id, user_id, socket_id)
                 VALUES (?1, ?2, ?3)",
                params![room_id.value(), user_id.value(), socket_id.value()],
            )
            .map_err(storage)?;
        Ok(())
    }

    fn delete_presence(
        &self,
        room_id: RoomId,
        socket_id: SocketRecordId,
    ) -> Result<usize, RepositoryError> {
        self.connection()?
            .execute(
                "DELETE FROM current_chatroom_occupants WHERE chatroom_id = ?1 AND socket_id = ?2",
                params![room_id.value(), socket_id.value()],
            )
            .map_err(storage)
    }

    fn delete_presence_for_socket(
        &self,
        socket_id: SocketRecordId,
    ) -> Result<usize, RepositoryError> {
        self.connection()?
            .execute(
                "DELETE FROM current_chatroom_occupants WHERE socket_id = ?1",
                params![socket_id.value()],
            )
            .map_err(storage)
    }

    fn insert_chat_message(
        &self,
        room_id: RoomId,
        user_id: UserId,
        body: &MessageBody,
    ) -> Result<MessageId, RepositoryError> {
        let connection = self.connection()?;
        connection
            .execute(
                "INSERT INTO messages (chatroom_id, user_id, body, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![room_id.value(), user_id.value(), body.as_str(), self.now()],
            )
            .map_err(storage)?;
        MessageId::new(connection.last_insert_rowid()).map_err(corrupt)
    }

    fn fetch_message(&self, message_id: MessageId) -> Result<Option<ChatMessage>, RepositoryError> {
        let record = self
            .connection()?
            .query_row(
                "SELECT m.id, m.chatroom_id, m.body, m.created_at, u.screen_name
                   FROM messages m JOIN users u ON u.id = m.user_id
                  WHERE m.id = ?1",
                params![message_id.value()],
                MessageRecord::from_row,
            )
            .optional()
            .map_err(storage)?;
        record.map(|record| record.into_message(false)).transpose()
    }

    fn resolve_screen_names(
        &self,
        names: &[ScreenName],
    ) -> Result<HashMap<ScreenName, UserId>, RepositoryError> {
        let connection = self.connection()?;
        let mut statement = connection
            .prepare("SELECT id FROM users WHERE screen_name = ?1")
            .map_err(storage)?;

        let mut resolved = HashMap::new();
        for name in names {
            let id: Option<i64> = statement
                .query_row(params![name.as_str()], |row| row.get(0))
                .optional()
                .map_err(storage)?;
            if let Some(id) = id {
                resolved.insert(name.clone(), UserId::new(id).map_err(corrupt)?);
            }
        }
        Ok(resolved)
    }

    fn insert_direct_message(
        &self,
        sender_id: UserId,
        body: &MessageBody,
        recipient_ids: &[UserId],
        room_id: RoomId,
    ) -> Result<MessageId, RepositoryError> {
        let transaction_error = |e: rusqlite::Error| RepositoryError::Transaction(e.to_string());
        let created_at = self.now();

        let mut connection = self.connection()?;
        // Dropping the transaction without commit rolls it back.
        let tx = connection.transaction().map_err(transaction_error)?;
        tx.execute(
            "INSERT INTO direct_messages (sender_id, body, created_at) VALUES (?1, ?2, ?3)",
            params![sender_id.value(), body.as_str(), created_at],
        )
        .map_err(transaction_error)?;
        let dm_id = tx.last_insert_rowid();
        {
            let mut statement = tx
                .prepare(
                    "INSERT OR IGNORE INTO direct_message_recipients (dm_id, recipient_id, chatroom_id)
                     VALUES (?1, ?2, ?3)",
                )
                .map_err(transaction_error)?;
            for recipient_id in recipient_ids {
                statement
                    .execute(params![dm_id, recipient_id.value(), room_id.value()])
                    .map_err(transaction_error)?;
            }
        }
        tx.commit().map_err(transaction_error)?;

        MessageId::new(dm_id).map_err(corrupt)
    }

    fn fetch_direct_message(
        &self,
        dm_id: MessageId,
        room_id: RoomId,
    ) -> Result<Option<ChatMessage>, RepositoryError> {
        let record = self
            .connection()?
            .query_row(
                "SELECT dm.id, ?2, dm.body, dm.created_at, u.screen_name
                   FROM direct_messages dm JOIN users u ON u.id = dm.sender_id
                  WHERE dm.id = ?1
                    AND EXISTS (SELECT 1 FROM direct_message_recipients r
                                 WHERE r.dm_id = dm.id AND r.chatroom_id = ?2)",
                params![dm_id.value(), room_id.value()],
                MessageRecord::from_row,
            )
            .optional()
            .map_err(storage)?;
        record.map(|record| record.into_message(true)).transpose()
    }

    fn recent_messages(
        &self,
        room_id: RoomId,
        limit: usize,
    ) -> Result<Vec<ChatMessage>, RepositoryError> {
        let mut messages = self.query_messages(
            "SELECT m.id, m.chatroom_id, m.body, m.created_at, u.screen_name
               FROM messages m JOIN users u ON u.id = m.user_id
              WHERE m.chatroom_id = ?1
              ORDER BY m.id DESC
              LIMIT ?2",
            params![room_id.value(), limit as i64],
            false,
        )?;
        messages.reverse();
        Ok(messages)
    }

    fn recent_direct_messages(
        &self,
        room_id: RoomId,
        user_id: UserId,
        limit: usize,
    ) -> Result<Vec<ChatMessage>, RepositoryError> {
        let mut messages = self.query_messages(
            "SELECT dm.id, r.chatroom_id, dm.body, dm.created_at, u.screen_name
               FROM direct_messages dm
               JOIN direct_message_recipients r ON r.dm_id = dm.id
               JOIN users u ON u.id = dm.sender_id
              WHERE r.chatroom_id = ?1 AND r.recipient_id = ?2
              ORDER BY dm.id DESC
              LIMIT ?3",
            params![room_id.value(), user_id.value(), limit as i64],
            true,
        )?;
        messages.reverse();
        Ok(messages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tsudoi_shared::time::FixedClock;

    use crate::domain::{ConnectionId, PresenceIndex};
    use crate::usecase::JoinRoomUseCase;

    const NOW: i64 = 1_672_531_200_000;

    fn create_test_store() -> SqliteChatStore {
        SqliteChatStore::open_in_memory()
            .unwrap()
            .with_clock(Arc::new(FixedClock::new(NOW)))
    }

    fn name(value: &str) -> ScreenName {
        ScreenName::new(value).unwrap()
    }

    fn body(value: &str) -> MessageBody {
        MessageBody::new(value).unwrap()
    }

    #[test]
    fn test_schema_survives_reopen() {
        // テスト項目: ファイルに保存したデータは再オープン後も読める
        // given (前提条件):
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chat.db");
        let room_id = {
            let store = SqliteChatStore::open(&path).unwrap();
            store.add_room("general", None).unwrap()
        };

        // when (操作):
        let reopened = SqliteChatStore::open(&path).unwrap();
        let room = reopened.find_room(room_id).unwrap();

        // then (期待する結果):
        let room = room.unwrap();
        assert_eq!(room.name, "general");
        assert!(!room.is_locked());
    }

    #[test]
    fn test_token_lifecycle() {
        // テスト項目: 発行したトークンは切断記録まで認証に使える
        // given (前提条件):
        let store = create_test_store();
        let alice = store.add_user(&name("alice")).unwrap();
        let token = store.issue_socket_token(alice).unwrap();

        // when (操作):
        let identity = store.authenticate_token(&token).unwrap().unwrap();
        store.mark_socket_connected(identity.socket_record_id).unwrap();
        store
            .mark_socket_disconnected(identity.socket_record_id)
            .unwrap();

        // then (期待する結果):
        assert_eq!(identity.user_id, alice);
        assert_eq!(identity.screen_name, name("alice"));
        assert!(store.authenticate_token(&token).unwrap().is_none());
    }

    #[test]
    fn test_mark_unknown_socket_is_not_found() {
        // テスト項目: 存在しないソケットの更新は NotFound になる
        // given (前提条件):
        let store = create_test_store();

        // when (操作):
        let result = store.mark_socket_disconnected(SocketRecordId::new(42).unwrap());

        // then (期待する結果):
        assert!(matches!(result, Err(RepositoryError::NotFound(_))));
    }

    #[test]
    fn test_presence_rows_are_deleted_per_room_and_socket() {
        // テスト項目: プレゼンス行をルーム・ソケット単位で削除できる
        // given (前提条件):
        let store = create_test_store();
        let alice = store.add_user(&name("alice")).unwrap();
        let token = store.issue_socket_token(alice).unwrap();
        let socket = store
            .authenticate_token(&token)
            .unwrap()
            .unwrap()
            .socket_record_id;
        let general = store.add_room("general", None).unwrap();
        let random = store.add_room("random", None).unwrap();
        store.insert_presence(general, alice, socket).unwrap();
        store.insert_presence(random, alice, socket).unwrap();

        // when (操作):
        let in_general = store.delete_presence(general, socket).unwrap();
        let again = store.delete_presence(general, socket).unwrap();
        let rest = store.delete_presence_for_socket(socket).unwrap();

        // then (期待する結果):
        assert_eq!(in_general, 1);
        assert_eq!(again, 0);
        assert_eq!(rest, 1);
    }

    #[test]
    fn test_messages_round_trip_with_history() {
        // テスト項目: メッセージを保存・読み戻しでき、履歴は古い順で返る
        // given (前提条件):
        let store = create_test_store();
        let alice = store.add_user(&name("alice")).unwrap();
        let general = store.add_room("general", None).unwrap();
        let first = store
            .insert_chat_message(general, alice, &body("first"))
            .unwrap();
        store
            .insert_chat_message(general, alice, &body("second"))
            .unwrap();

        // when (操作):
        let fetched = store.fetch_message(first).unwrap().unwrap();
        let history = store.recent_messages(general, 50).unwrap();

        // then (期待する結果):
        assert_eq!(fetched.body, body("first"));
        assert_eq!(fetched.created_at, Timestamp::new(NOW));
        assert_eq!(fetched.sender, name("alice"));
        let bodies: Vec<&str> = history.iter().map(|m| m.body.as_str()).collect();
        assert_eq!(bodies, vec!["first", "second"]);
    }

    #[test]
    fn test_history_reads_rows_beyond_input_limits() {
        // テスト項目: 入力上限を超える行や空の行があっても履歴を読み戻せる
        // given (前提条件):
        let store = create_test_store();
        let long_name = name(&"L".repeat(4090));
        let writer = store.add_user(&long_name).unwrap();
        let general = store.add_room("general", None).unwrap();
        let notice = MessageBody::system_notice(&long_name, "joined");
        let notice_id = store.insert_chat_message(general, writer, &notice).unwrap();
        store
            .connection()
            .unwrap()
            .execute(
                "INSERT INTO messages (chatroom_id, user_id, body, created_at)
                 VALUES (?1, ?2, '', ?3)",
                params![general.value(), writer.value(), NOW],
            )
            .unwrap();

        // when (操作):
        let fetched = store.fetch_message(notice_id).unwrap();
        let history = store.recent_messages(general, 50).unwrap();

        // then (期待する結果):
        assert_eq!(fetched.unwrap().body, notice);
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].body.as_str(), "");
    }

    #[test]
    fn test_join_after_long_name_keeps_broadcast_and_history() {
        // テスト項目: 長いスクリーンネームの参加後も "joined" の配信と履歴が失われない
        // given (前提条件):
        let store = Arc::new(create_test_store());
        let usecase = JoinRoomUseCase::new(store.clone());
        let mut presence = PresenceIndex::new();
        let general = store.add_room("general", None).unwrap();
        let mut register = |connection: usize, screen_name: &str| {
            let user_id = store.add_user(&name(screen_name)).unwrap();
            let token = store.issue_socket_token(user_id).unwrap();
            let identity = store.authenticate_token(&token).unwrap().unwrap();
            presence.register(ConnectionId::new(connection), identity);
            ConnectionId::new(connection)
        };
        let bob = register(1, "bob");
        let long = register(2, &"L".repeat(4090));
        let carol = register(3, "carol");
        usecase.execute(&mut presence, bob, Some(general), None).unwrap();

        // when (操作):
        let long_join = usecase
            .execute(&mut presence, long, Some(general), None)
            .unwrap();
        let carol_join = usecase
            .execute(&mut presence, carol, Some(general), None)
            .unwrap();

        // then (期待する結果):
        let arrival = long_join.arrival.unwrap();
        assert!(arrival.message.is_some());
        assert_eq!(arrival.targets, vec![bob]);
        assert_eq!(carol_join.history.len(), 3);
        assert!(store.recent_messages(general, 50).is_ok());
    }

    #[test]
    fn test_locked_room_round_trip() {
        // テスト項目: パスフレーズ付きルームのハッシュを検証できる
        // given (前提条件):
        let store = create_test_store();
        let room_id = store.add_room("vault", Some("open sesame")).unwrap();

        // when (操作):
        let room = store.find_room(room_id).unwrap().unwrap();

        // then (期待する結果):
        let hash = room.secret_hash.unwrap();
        assert!(store.verify_room_secret(&hash, "open sesame"));
        assert!(!store.verify_room_secret(&hash, "nope"));
    }

    #[test]
    fn test_direct_message_transaction() {
        // テスト項目: DM は宛先ごとの行とともに保存され、ルーム外からは読めない
        // given (前提条件):
        let store = create_test_store();
        let alice = store.add_user(&name("alice")).unwrap();
        let bob = store.add_user(&name("bob")).unwrap();
        let general = store.add_room("general", None).unwrap();
        let random = store.add_room("random", None).unwrap();

        // when (操作):
        let dm_id = store
            .insert_direct_message(alice, &body("psst"), &[bob, alice], general)
            .unwrap();

        // then (期待する結果):
        let dm = store.fetch_direct_message(dm_id, general).unwrap().unwrap();
        assert!(dm.is_dm);
        assert_eq!(dm.room_id, general);
        assert!(store.fetch_direct_message(dm_id, random).unwrap().is_none());
        assert_eq!(store.recent_direct_messages(general, bob, 50).unwrap().len(), 1);
        assert!(store.recent_direct_messages(random, bob, 50).unwrap().is_empty());
    }

    #[test]
    fn test_direct_message_rolls_back_on_unknown_recipient() {
        // テスト項目: 存在しない宛先があると DM 全体がロールバックされる
        // given (前提条件):
        let store = create_test_store();
        let alice = store.add_user(&name("alice")).unwrap();
        let general = store.add_room("general", None).unwrap();
        let ghost = UserId::new(999).unwrap();

        // when (操作):
        let result = store.insert_direct_message(alice, &body("psst"), &[ghost], general);

        // then (期待する結果):
        assert!(matches!(result, Err(RepositoryError::Transaction(_))));
        assert!(store.recent_direct_messages(general, alice, 50).unwrap().is_empty());
        let count: i64 = store
            .connection()
            .unwrap()
            .query_row("SELECT COUNT(*) FROM direct_messages", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_resolve_screen_names() {
        // テスト項目: 既知の名前だけが解決される
        // given (前提条件):
        let store = create_test_store();
        let bob = store.add_user(&name("bob")).unwrap();

        // when (操作):
        let resolved = store
            .resolve_screen_names(&[name("bob"), name("ghost")])
            .unwrap();

        // then (期待する結果):
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[&name("bob")], bob);
    }
}
