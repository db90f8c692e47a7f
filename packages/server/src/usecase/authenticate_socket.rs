//! UseCase: ハンドシェイク時のトークン認証
//!
//! トークンを検証し、ソケットレコードの接続時刻を更新してから、
//! 接続をプレゼンス索引（ユーザー → 接続）に登録します。
//! 登録はコマンドの処理より必ず先に行われます。

use std::sync::Arc;

use crate::domain::{ChatStore, ConnectionId, Identity, PresenceIndex, SocketToken};

use super::error::AuthenticateError;

/// ソケット認証のユースケース
pub struct AuthenticateSocketUseCase {
    store: Arc<dyn ChatStore>,
}

impl AuthenticateSocketUseCase {
    pub fn new(store: Arc<dyn ChatStore>) -> Self {
        Self { store }
    }

    /// 認証を実行し、成功した場合は接続を登録する
    pub fn execute(
        &self,
        presence: &mut PresenceIndex,
        connection_id: ConnectionId,
        token: &SocketToken,
    ) -> Result<Identity, AuthenticateError> {
        let identity = self
            .store
            .authenticate_token(token)
            .map_err(AuthenticateError::Unavailable)?
            .ok_or(AuthenticateError::InvalidToken)?;

        self.store
            .mark_socket_connected(identity.socket_record_id)
            .map_err(AuthenticateError::Unavailable)?;

        presence.register(connection_id, identity.clone());
        tracing::info!(
            "Connection {} authenticated as '{}' (user {})",
            connection_id,
            identity.screen_name,
            identity.user_id
        );

        Ok(identity)
    }
}
