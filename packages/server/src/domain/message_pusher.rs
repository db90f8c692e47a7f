//! MessagePusher trait 定義
//!
//! クライアントへのメッセージ送信（通知）のインターフェース。
//! 実装はリアクターが持つ接続レジストリで、エンコード済みのテキストフレームを
//! ソケットへ書き込みます。

use super::{ConnectionId, MessagePushError};

/// Outbound delivery of JSON text to live connections.
pub trait MessagePusher {
    /// Send `content` to a single connection.
    fn push_to(&mut self, target: ConnectionId, content: &str) -> Result<(), MessagePushError>;

    /// Send `content` to every target, tolerating individual failures.
    fn broadcast(&mut self, targets: &[ConnectionId], content: &str) {
        for &target in targets {
            if let Err(e) = self.push_to(target, content) {
                tracing::warn!("Failed to push message to connection {}: {}", target, e);
            }
        }
    }
}
