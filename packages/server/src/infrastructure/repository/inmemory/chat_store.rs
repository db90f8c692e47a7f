//! InMemory ChatStore 実装
//!
//! ドメイン層が定義する `ChatStore` trait の具体的な実装。
//! 永続化スキーマ（users / sockets / rooms / messages / occupants / DMs）を
//! `Mutex` で保護したテーブルとしてメモリ上に再現します。
//!
//! データベースを用意せずにサーバーを起動する場合と、テストで使用します。

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use tsudoi_shared::time::{Clock, SystemClock};
use uuid::Uuid;

use crate::domain::{
    ChatMessage, ChatStore, Identity, MessageBody, MessageId, RepositoryError, RoomId, RoomMeta,
    ScreenName, SocketRecordId, SocketToken, Timestamp, UserId,
};
use crate::infrastructure::secret;

#[derive(Debug, Clone)]
struct SocketRow {
    user_id: UserId,
    token: String,
    connected_at: Timestamp,
    disconnected_at: Option<Timestamp>,
}

#[derive(Debug, Clone)]
struct MessageRow {
    id: MessageId,
    room_id: RoomId,
    user_id: UserId,
    body: MessageBody,
    created_at: Timestamp,
}

#[derive(Debug, Clone)]
struct DirectMessageRow {
    id: MessageId,
    sender_id: UserId,
    body: MessageBody,
    created_at: Timestamp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RecipientRow {
    dm_id: MessageId,
    recipient_id: UserId,
    room_id: RoomId,
}

/// Presence row as stored in the occupants table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct PresenceRow {
    pub room_id: RoomId,
    pub user_id: UserId,
    pub socket_id: SocketRecordId,
}

#[derive(Debug, Default)]
struct Tables {
    users: BTreeMap<UserId, ScreenName>,
    sockets: BTreeMap<SocketRecordId, SocketRow>,
    rooms: BTreeMap<RoomId, RoomMeta>,
    messages: Vec<MessageRow>,
    occupants: Vec<PresenceRow>,
    direct_messages: Vec<DirectMessageRow>,
    recipients: Vec<RecipientRow>,
    last_id: i64,
}

impl Tables {
    /// Ids are shared across tables; they only need to be unique and positive.
    fn next_id(&mut self) -> i64 {
        self.last_id += 1;
        self.last_id
    }

    fn screen_name(&self, user_id: UserId) -> Result<ScreenName, RepositoryError> {
        self.users
            .get(&user_id)
            .cloned()
            .ok_or_else(|| RepositoryError::NotFound(format!("user {}", user_id)))
    }

    fn chat_message(&self, row: &MessageRow) -> Result<ChatMessage, RepositoryError> {
        Ok(ChatMessage {
            id: row.id,
            room_id: row.room_id,
            body: row.body.clone(),
            created_at: row.created_at,
            sender: self.screen_name(row.user_id)?,
            is_dm: false,
        })
    }

    fn direct_message(
        &self,
        row: &DirectMessageRow,
        room_id: RoomId,
    ) -> Result<ChatMessage, RepositoryError> {
        Ok(ChatMessage {
            id: row.id,
            room_id,
            body: row.body.clone(),
            created_at: row.created_at,
            sender: self.screen_name(row.sender_id)?,
            is_dm: true,
        })
    }
}

/// インメモリ ChatStore 実装
pub struct InMemoryChatStore {
    clock: Arc<dyn Clock>,
    tables: Mutex<Tables>,
}

impl Default for InMemoryChatStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryChatStore {
    /// 新しい InMemoryChatStore を作成（システム時刻を使用）
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// 時刻を注入して InMemoryChatStore を作成
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            tables: Mutex::new(Tables::default()),
        }
    }

    fn tables(&self) -> Result<MutexGuard<'_, Tables>, RepositoryError> {
        self.tables
            .lock()
            .map_err(|_| RepositoryError::Storage("in-memory tables poisoned".to_string()))
    }

    fn now(&self) -> Timestamp {
        Timestamp::new(self.clock.now_millis())
    }

    // ========================================
    // Seeding (stands in for the HTTP surface)
    // ========================================

    /// Register a user, or return the existing id for that screen name.
    pub fn add_user(&self, screen_name: &ScreenName) -> Result<UserId, RepositoryError> {
        let mut tables = self.tables()?;
        if let Some((id, _)) = tables.users.iter().find(|(_, name)| *name == screen_name) {
            return Ok(*id);
        }
        let id = UserId::new(tables.next_id()).map_err(storage)?;
        tables.users.insert(id, screen_name.clone());
        Ok(id)
    }

    /// Issue a fresh socket token for a user, as the login flow would.
    pub fn issue_socket_token(&self, user_id: UserId) -> Result<SocketToken, RepositoryError> {
        let now = self.now();
        let mut tables = self.tables()?;
        if !tables.users.contains_key(&user_id) {
            return Err(RepositoryError::NotFound(format!("user {}", user_id)));
        }
        let token = SocketToken::new(Uuid::new_v4().simple().to_string()).map_err(storage)?;
        let id = SocketRecordId::new(tables.next_id()).map_err(storage)?;
        tables.sockets.insert(
            id,
            SocketRow {
                user_id,
                token: token.as_str().to_string(),
                connected_at: now,
                disconnected_at: None,
            },
        );
        Ok(token)
    }

    /// Create a room; a passphrase locks it.
    pub fn add_room(&self, name: &str, passphrase: Option<&str>) -> Result<RoomId, RepositoryError> {
        let mut tables = self.tables()?;
        let id = RoomId::new(tables.next_id()).map_err(storage)?;
        tables.rooms.insert(
            id,
            RoomMeta {
                id,
                name: name.to_string(),
                secret_hash: passphrase.map(secret::hash_secret),
            },
        );
        Ok(id)
    }

    // ========================================
    // Inspection
    // ========================================

    /// Every occupant row, sorted.
    pub fn presence_rows(&self) -> Vec<PresenceRow> {
        let Ok(tables) = self.tables() else {
            return Vec::new();
        };
        let mut rows = tables.occupants.clone();
        rows.sort();
        rows
    }

    pub fn message_count(&self, room_id: RoomId) -> usize {
        self.tables()
            .map(|tables| tables.messages.iter().filter(|m| m.room_id == room_id).count())
            .unwrap_or_default()
    }

    pub fn direct_message_count(&self) -> usize {
        self.tables()
            .map(|tables| tables.direct_messages.len())
            .unwrap_or_default()
    }

    /// Recipient user ids of a direct message, sorted.
    pub fn direct_message_recipients(&self, dm_id: MessageId) -> Vec<UserId> {
        let Ok(tables) = self.tables() else {
            return Vec::new();
        };
        let mut ids: Vec<UserId> = tables
            .recipients
            .iter()
            .filter(|row| row.dm_id == dm_id)
            .map(|row| row.recipient_id)
            .collect();
        ids.sort();
        ids
    }

    pub fn socket_connected_at(&self, socket_id: SocketRecordId) -> Option<Timestamp> {
        self.tables()
            .ok()
            .and_then(|tables| tables.sockets.get(&socket_id).map(|s| s.connected_at))
    }

    /// Whether the socket record has a recorded disconnect time.
    pub fn is_socket_disconnected(&self, socket_id: SocketRecordId) -> bool {
        self.tables()
            .ok()
            .and_then(|tables| tables.sockets.get(&socket_id).map(|s| s.disconnected_at.is_some()))
            .unwrap_or(false)
    }
}

fn storage(e: impl std::fmt::Display) -> RepositoryError {
    RepositoryError::Storage(e.to_string())
}

impl ChatStore for InMemoryChatStore {
    fn authenticate_token(&self, token: &SocketToken) -> Result<Option<Identity>, RepositoryError> {
        let tables = self.tables()?;
        let Some((socket_id, row)) = tables
            .sockets
            .iter()
            .find(|(_, row)| row.token == token.as_str() && row.disconnected_at.is_none())
        else {
            return Ok(None);
        };
        let screen_name = tables.screen_name(row.user_id)?;
        Ok(Some(Identity::new(row.user_id, screen_name, *socket_id)))
    }

    fn mark_socket_connected(&self, socket_id: SocketRecordId) -> Result<(), RepositoryError> {
        let now = self.now();
        let mut tables = self.tables()?;
        let row = tables
            .sockets
            .get_mut(&socket_id)
            .ok_or_else(|| RepositoryError::NotFound(format!("socket {}", socket_id)))?;
        row.connected_at = now;
        Ok(())
    }

    fn mark_socket_disconnected(&self, socket_id: SocketRecordId) -> Result<(), RepositoryError> {
        let now = self.now();
        let mut tables = self.tables()?;
        let row = tables
            .sockets
            .get_mut(&socket_id)
            .ok_or_else(|| RepositoryError::NotFound(format!("socket {}", socket_id)))?;
        row.disconnected_at = Some(now);
        Ok(())
    }

    fn find_room(&self, room_id: RoomId) -> Result<Option<RoomMeta>, RepositoryError> {
        Ok(self.tables()?.rooms.get(&room_id).cloned())
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
        self.tables()?.occupants.push(PresenceRow {
            room_id,
            user_id,
            socket_id,
        });
        Ok(())
    }

    fn delete_presence(
        &self,
        room_id: RoomId,
        socket_id: SocketRecordId,
    ) -> Result<usize, RepositoryError> {
        let mut tables = self.tables()?;
        let before = tables.occupants.len();
        tables
            .occupants
            .retain(|row| !(row.room_id == room_id && row.socket_id == socket_id));
        Ok(before - tables.occupants.len())
    }

    fn delete_presence_for_socket(
        &self,
        socket_id: SocketRecordId,
    ) -> Result<usize, RepositoryError> {
        let mut tables = self.tables()?;
        let before = tables.occupants.len();
        tables.occupants.retain(|row| row.socket_id != socket_id);
        Ok(before - tables.occupants.len())
    }

    fn insert_chat_message(
        &self,
        room_id: RoomId,
        user_id: UserId,
        body: &MessageBody,
    ) -> Result<MessageId, RepositoryError> {
        let created_at = self.now();
        let mut tables = self.tables()?;
        if !tables.rooms.contains_key(&room_id) {
            return Err(RepositoryError::NotFound(format!("room {}", room_id)));
        }
        let id = MessageId::new(tables.next_id()).map_err(storage)?;
        tables.messages.push(MessageRow {
            id,
            room_id,
            user_id,
            body: body.clone(),
            created_at,
        });
        Ok(id)
    }

    fn fetch_message(&self, message_id: MessageId) -> Result<Option<ChatMessage>, RepositoryError> {
        let tables = self.tables()?;
        tables
            .messages
            .iter()
            .find(|row| row.id == message_id)
            .map(|row| tables.chat_message(row))
            .transpose()
    }

    fn resolve_screen_names(
        &self,
        names: &[ScreenName],
    ) -> Result<HashMap<ScreenName, UserId>, RepositoryError> {
        let tables = self.tables()?;
        Ok(tables
            .users
            .iter()
            .filter(|(_, name)| names.contains(name))
            .map(|(id, name)| (name.clone(), *id))
            .collect())
    }

    fn insert_direct_message(
        &self,
        sender_id: UserId,
        body: &MessageBody,
        recipient_ids: &[UserId],
        room_id: RoomId,
    ) -> Result<MessageId, RepositoryError> {
        let created_at = self.now();
        let mut tables = self.tables()?;

        // Validate every row before writing any, so a failure leaves no trace.
        if let Some(unknown) = std::iter::once(&sender_id)
            .chain(recipient_ids)
            .find(|id| !tables.users.contains_key(*id))
        {
            return Err(RepositoryError::Transaction(format!(
                "unknown user {}",
                unknown
            )));
        }

        let id = MessageId::new(tables.next_id()).map_err(storage)?;
        tables.direct_messages.push(DirectMessageRow {
            id,
            sender_id,
            body: body.clone(),
            created_at,
        });
        for &recipient_id in recipient_ids {
            let row = RecipientRow {
                dm_id: id,
                recipient_id,
                room_id,
            };
            if !tables.recipients.contains(&row) {
                tables.recipients.push(row);
            }
        }
        Ok(id)
    }

    fn fetch_direct_message(
        &self,
        dm_id: MessageId,
        room_id: RoomId,
    ) -> Result<Option<ChatMessage>, RepositoryError> {
        let tables = self.tables()?;
        let scoped = tables
            .recipients
            .iter()
            .any(|row| row.dm_id == dm_id && row.room_id == room_id);
        if !scoped {
            return Ok(None);
        }
        tables
            .direct_messages
            .iter()
            .find(|row| row.id == dm_id)
            .map(|row| tables.direct_message(row, room_id))
            .transpose()
    }

    fn recent_messages(
        &self,
        room_id: RoomId,
        limit: usize,
    ) -> Result<Vec<ChatMessage>, RepositoryError> {
        let tables = self.tables()?;
        let mut recent = tables
            .messages
            .iter()
            .rev()
            .filter(|row| row.room_id == room_id)
            .take(limit)
            .map(|row| tables.chat_message(row))
            .collect::<Result<Vec<_>, _>>()?;
        recent.reverse();
        Ok(recent)
    }

    fn recent_direct_messages(
        &self,
        room_id: RoomId,
        user_id: UserId,
        limit: usize,
    ) -> Result<Vec<ChatMessage>, RepositoryError> {
        let tables = self.tables()?;
        let mut recent = tables
            .direct_messages
            .iter()
            .rev()
            .filter(|dm| {
                tables.recipients.iter().any(|row| {
                    row.dm_id == dm.id && row.recipient_id == user_id && row.room_id == room_id
                })
            })
            .take(limit)
            .map(|dm| tables.direct_message(dm, room_id))
            .collect::<Result<Vec<_>, _>>()?;
        recent.reverse();
        Ok(recent)
    }
}
