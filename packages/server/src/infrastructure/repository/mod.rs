//! Repository 実装
//!
//! - `inmemory`: `Mutex` で保護したテーブルによる実装（データベース不要）
//! - `sqlite`: rusqlite による永続化実装

pub mod inmemory;
pub mod sqlite;

pub use inmemory::InMemoryChatStore;
pub use sqlite::SqliteChatStore;
